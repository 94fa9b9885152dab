//! Test harness for isolated test execution.
//!
//! `TestHarness` owns a temporary directory holding the config file and
//! the SQLite database, so each test gets a private on-disk store.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use coffeetrack::config::Config;
use coffeetrack::{BatchService, ProgressEntry};

use super::builders::{report, washed_method, ConfigBuilder};

pub struct TestHarness {
    temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub db_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        let db_path = temp_dir.path().join("data").join("coffeetrack.db");

        Self {
            temp_dir,
            config_dir,
            db_path,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A config with the washed method, pointing at this harness's database.
    pub fn washed_config(&self) -> Config {
        ConfigBuilder::new()
            .database_path(&self.db_path.to_string_lossy())
            .method(washed_method())
            .build()
    }

    /// Write a config file to the config directory.
    pub fn write_config(&self, filename: &str, config: &Config) -> PathBuf {
        let path = self.config_dir.join(filename);
        let json = serde_json::to_string_pretty(config).expect("Failed to serialize config");
        std::fs::write(&path, json).expect("Failed to write config file");
        path
    }

    pub fn service(&self, config: &Config) -> BatchService {
        BatchService::from_config(config).expect("Failed to build service")
    }

    pub fn washed_service(&self) -> BatchService {
        self.service(&self.washed_config())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances a batch once, reading a fresh snapshot first.
pub fn advance_on(
    service: &BatchService,
    batch_id: &str,
    at: chrono::DateTime<chrono::Utc>,
) -> ProgressEntry {
    let snapshot = service.snapshot(batch_id).expect("Failed to read snapshot");
    service
        .advance_to_next(batch_id, &report(snapshot, at))
        .expect("Advance failed")
}
