//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use coffeetrack::config::{Config, EvaluationsConfig, MethodConfig, StageConfig};
use coffeetrack::{
    AdvanceRequest, EvaluationResult, FailureDetail, NewEvaluation, StepSnapshot,
};

/// Noon UTC on the given day of January 2024.
pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    version: String,
    database_path: Option<String>,
    methods: Vec<MethodConfig>,
    mirror_failure_detail_in_comment: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            methods: vec![],
            mirror_failure_detail_in_comment: false,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn method(mut self, method: MethodConfig) -> Self {
        self.methods.push(method);
        self
    }

    pub fn mirror_failure_detail_in_comment(mut self, enabled: bool) -> Self {
        self.mirror_failure_detail_in_comment = enabled;
        self
    }

    pub fn build(self) -> Config {
        Config {
            version: self.version,
            database_path: self.database_path,
            methods: self.methods,
            evaluations: EvaluationsConfig {
                mirror_failure_detail_in_comment: self.mirror_failure_detail_in_comment,
            },
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a processing method. Stages are numbered in insertion order.
pub struct MethodBuilder {
    id: String,
    name: String,
    stages: Vec<StageConfig>,
}

impl MethodBuilder {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            stages: vec![],
        }
    }

    pub fn stage(mut self, id: &str, name: &str) -> Self {
        let order_index = self.stages.len() as u32 + 1;
        self.stage_at(id, name, order_index)
    }

    pub fn stage_at(mut self, id: &str, name: &str, order_index: u32) -> Self {
        self.stages.push(StageConfig {
            id: id.to_string(),
            name: name.to_string(),
            order_index,
        });
        self
    }

    pub fn build(self) -> MethodConfig {
        MethodConfig {
            id: self.id,
            name: self.name,
            stages: self.stages,
        }
    }
}

/// The washed method used by most scenarios: Drying, Hulling, Grading.
pub fn washed_method() -> MethodConfig {
    MethodBuilder::new("washed", "Washed")
        .stage("drying", "Drying")
        .stage("hulling", "Hulling")
        .stage("grading", "Grading")
        .build()
}

/// A farmer's report of 100 kg, dated `at`.
pub fn report(snapshot: StepSnapshot, at: DateTime<Utc>) -> AdvanceRequest {
    AdvanceRequest::new(snapshot, at, 100.0, "kg", "farmer-1")
}

/// Builder for expert verdicts.
pub struct EvaluationBuilder {
    result: EvaluationResult,
    evaluated_at: DateTime<Utc>,
    evaluated_by: String,
    comment: String,
    failure_detail: Option<FailureDetail>,
}

impl EvaluationBuilder {
    pub fn new(result: EvaluationResult, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            result,
            evaluated_at,
            evaluated_by: "expert-1".to_string(),
            comment: String::new(),
            failure_detail: None,
        }
    }

    pub fn pass(evaluated_at: DateTime<Utc>) -> Self {
        Self::new(EvaluationResult::Pass, evaluated_at)
    }

    /// A Fail naming the stage at `order_index`.
    pub fn fail_at(evaluated_at: DateTime<Utc>, order_index: u32, stage_name: &str) -> Self {
        let mut builder = Self::new(EvaluationResult::Fail, evaluated_at);
        builder.failure_detail = Some(FailureDetail::new(
            order_index,
            stage_name,
            "moisture above 12.5 %",
        ));
        builder
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn recommendations(mut self, text: &str) -> Self {
        self.failure_detail = self.failure_detail.map(|d| d.with_recommendations(text));
        self
    }

    pub fn build(self) -> NewEvaluation {
        NewEvaluation {
            result: self.result,
            evaluated_at: self.evaluated_at,
            evaluated_by_user_id: self.evaluated_by,
            comment: self.comment,
            failure_detail: self.failure_detail,
        }
    }
}
