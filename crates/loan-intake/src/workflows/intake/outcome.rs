use serde::{Deserialize, Serialize};

pub const BANK_APPROVED: &str = "BANK_APPROVED";
pub const BANK_REJECTED: &str = "BANK_REJECTED";

/// Terminal classification of an application after external decisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Pending,
    Rejected,
}

impl Outcome {
    pub const fn label(self) -> &'static str {
        match self {
            Outcome::Approved => "approved",
            Outcome::Pending => "pending",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Map a backend status onto an outcome. Unknown and future statuses are pending.
pub fn resolve_outcome(status: &str) -> Outcome {
    match status {
        BANK_APPROVED => Outcome::Approved,
        BANK_REJECTED => Outcome::Rejected,
        _ => Outcome::Pending,
    }
}
