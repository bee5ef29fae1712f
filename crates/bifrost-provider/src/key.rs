use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One API credential plus its model-support declaration and selection weight.
///
/// A key is eligible for a model iff `models` contains that model or the
/// wildcard `"*"`. Weights are relative within one provider; a zero-weight
/// key only ever gets picked when every eligible key has weight zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub value: String,
    pub models: HashSet<String>,
    pub weight: f64,
}

impl Key {
    pub fn new(value: impl Into<String>, models: impl IntoIterator<Item = String>, weight: f64) -> Self {
        Self {
            id: None,
            value: value.into(),
            models: models.into_iter().collect(),
            weight,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.contains(model) || self.models.contains("*")
    }
}
