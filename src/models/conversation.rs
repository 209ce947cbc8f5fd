use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which questionnaire drives a `/next` session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    /// Fixed list of questions, then a plan.
    #[default]
    Guided,
    /// Free conversation until the model emits a task list.
    Open,
}

/// Cursor of a `/next` conversation, kept in the shared store.
///
/// `version` is bumped by the store on every successful write; a write
/// carrying an older version is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub session_id: String,
    pub mode: FlowMode,
    pub step: u32,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub history: Vec<String>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: &str, mode: FlowMode) -> Self {
        Self {
            session_id: session_id.to_string(),
            mode,
            step: 0,
            answers: BTreeMap::new(),
            history: Vec::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }
}
