//! Stage catalogs: the ordered stages each processing method defines.

use std::collections::{BTreeMap, HashSet};

use crate::config::schema::MethodConfig;
use crate::error::{CatalogError, ProcessingError};
use crate::model::ProcessingStage;

/// Read-only lookup of stage sequences by processing method.
///
/// Every stored sequence is sorted by `order_index` and contiguous from 1.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    methods: BTreeMap<String, Vec<ProcessingStage>>,
}

impl StageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from the configured processing methods.
    pub fn from_methods(methods: &[MethodConfig]) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for method in methods {
            let stages = method
                .stages
                .iter()
                .map(|s| ProcessingStage::new(&s.id, &method.id, &s.name, s.order_index))
                .collect();
            catalog.insert(&method.id, stages)?;
        }
        Ok(catalog)
    }

    /// Adds (or replaces) a method's stages after checking their order.
    pub fn insert(
        &mut self,
        method_id: &str,
        mut stages: Vec<ProcessingStage>,
    ) -> Result<(), CatalogError> {
        validate_stages(method_id, &mut stages)?;
        self.methods.insert(method_id.to_string(), stages);
        Ok(())
    }

    /// Returns the ordered stages of a method.
    pub fn stages_for(&self, method_id: &str) -> Result<&[ProcessingStage], ProcessingError> {
        self.methods
            .get(method_id)
            .map(Vec::as_slice)
            .ok_or_else(|| ProcessingError::not_found("Processing method", method_id))
    }

    /// Returns the stage at a 1-based position, if the method has one.
    pub fn stage_at(
        &self,
        method_id: &str,
        order_index: u32,
    ) -> Result<Option<&ProcessingStage>, ProcessingError> {
        Ok(stage_at(self.stages_for(method_id)?, order_index))
    }

    /// Highest order index of the method, i.e. its final stage.
    pub fn final_order_index(&self, method_id: &str) -> Result<u32, ProcessingError> {
        Ok(final_order_index(self.stages_for(method_id)?))
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Position lookup over an already ordered, contiguous stage slice.
pub fn stage_at(stages: &[ProcessingStage], order_index: u32) -> Option<&ProcessingStage> {
    if order_index == 0 {
        return None;
    }
    stages
        .get(order_index as usize - 1)
        .filter(|s| s.order_index == order_index)
}

pub fn final_order_index(stages: &[ProcessingStage]) -> u32 {
    stages.last().map(|s| s.order_index).unwrap_or(0)
}

fn validate_stages(method_id: &str, stages: &mut [ProcessingStage]) -> Result<(), CatalogError> {
    if stages.is_empty() {
        return Err(CatalogError::Empty(method_id.to_string()));
    }

    stages.sort_by_key(|s| s.order_index);

    let mut seen = HashSet::new();
    for (i, stage) in stages.iter().enumerate() {
        let expected = i as u32 + 1;
        if stage.order_index != expected {
            return Err(CatalogError::NonContiguous {
                method_id: method_id.to_string(),
                expected,
                found: stage.order_index,
            });
        }
        if !seen.insert(stage.stage_id.as_str()) {
            return Err(CatalogError::DuplicateStage {
                method_id: method_id.to_string(),
                stage_id: stage.stage_id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn washed() -> Vec<ProcessingStage> {
        vec![
            ProcessingStage::new("s-grading", "washed", "Grading", 3),
            ProcessingStage::new("s-drying", "washed", "Drying", 1),
            ProcessingStage::new("s-hulling", "washed", "Hulling", 2),
        ]
    }

    #[test]
    fn test_stages_sorted_by_order() {
        let mut catalog = StageCatalog::new();
        catalog.insert("washed", washed()).unwrap();

        let names: Vec<_> = catalog
            .stages_for("washed")
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["Drying", "Hulling", "Grading"]);
        assert_eq!(catalog.final_order_index("washed").unwrap(), 3);
    }

    #[test]
    fn test_unknown_method_is_not_found() {
        let catalog = StageCatalog::new();
        let err = catalog.stages_for("natural").unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound { .. }));
    }

    #[test]
    fn test_stage_at() {
        let mut catalog = StageCatalog::new();
        catalog.insert("washed", washed()).unwrap();

        assert_eq!(
            catalog.stage_at("washed", 2).unwrap().map(|s| s.name.as_str()),
            Some("Hulling")
        );
        assert!(catalog.stage_at("washed", 0).unwrap().is_none());
        assert!(catalog.stage_at("washed", 4).unwrap().is_none());
    }

    #[test]
    fn test_rejects_gap_in_order() {
        let mut catalog = StageCatalog::new();
        let stages = vec![
            ProcessingStage::new("a", "m", "Drying", 1),
            ProcessingStage::new("b", "m", "Grading", 3),
        ];
        let err = catalog.insert("m", stages).unwrap_err();
        assert_eq!(
            err,
            CatalogError::NonContiguous {
                method_id: "m".to_string(),
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_rejects_duplicate_order() {
        let mut catalog = StageCatalog::new();
        let stages = vec![
            ProcessingStage::new("a", "m", "Drying", 1),
            ProcessingStage::new("b", "m", "Hulling", 1),
        ];
        assert!(catalog.insert("m", stages).is_err());
    }

    #[test]
    fn test_rejects_duplicate_stage_id() {
        let mut catalog = StageCatalog::new();
        let stages = vec![
            ProcessingStage::new("a", "m", "Drying", 1),
            ProcessingStage::new("a", "m", "Hulling", 2),
        ];
        assert!(matches!(
            catalog.insert("m", stages),
            Err(CatalogError::DuplicateStage { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_method() {
        let mut catalog = StageCatalog::new();
        assert_eq!(
            catalog.insert("m", vec![]),
            Err(CatalogError::Empty("m".to_string()))
        );
    }
}
