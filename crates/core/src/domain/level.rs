use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One rung of the approval ladder. `max_amount: None` means no ceiling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevelConfig {
    pub level: u32,
    pub level_name: String,
    pub max_amount: Option<Decimal>,
    pub approver_email: String,
    pub is_active: bool,
}

impl ApprovalLevelConfig {
    pub fn can_finally_approve(&self, total: Decimal) -> bool {
        match self.max_amount {
            None => true,
            Some(ceiling) => total <= ceiling,
        }
    }
}
