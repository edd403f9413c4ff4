use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-query pipeline state.
///
/// `Retrieving -> Compressing -> PromptBuilding -> Generating -> Complete`,
/// with `Failed` reachable from any of the first four and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Retrieving,
    Compressing,
    PromptBuilding,
    Generating,
    Complete,
    Failed,
}

impl QueryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryStage::Retrieving => "retrieving",
            QueryStage::Compressing => "compressing",
            QueryStage::PromptBuilding => "prompt_building",
            QueryStage::Generating => "generating",
            QueryStage::Complete => "complete",
            QueryStage::Failed => "failed",
        }
    }

    /// The state that follows a successful run of `self`.
    pub fn next(self) -> Option<QueryStage> {
        match self {
            QueryStage::Retrieving => Some(QueryStage::Compressing),
            QueryStage::Compressing => Some(QueryStage::PromptBuilding),
            QueryStage::PromptBuilding => Some(QueryStage::Generating),
            QueryStage::Generating => Some(QueryStage::Complete),
            QueryStage::Complete | QueryStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueryStage::Complete | QueryStage::Failed)
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
