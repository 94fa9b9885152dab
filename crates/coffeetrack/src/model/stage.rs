use serde::{Deserialize, Serialize};

/// A named step in a processing method's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStage {
    pub stage_id: String,
    pub method_id: String,
    pub name: String,
    /// 1-based position within the method's stage sequence.
    pub order_index: u32,
}

impl ProcessingStage {
    pub fn new(stage_id: &str, method_id: &str, name: &str, order_index: u32) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            method_id: method_id.to_string(),
            name: name.to_string(),
            order_index,
        }
    }
}
