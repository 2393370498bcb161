// 💥 Fault injection for the exchange transaction
//
// Lets tests force a failure at a chosen step so rollback can be observed.
// Disabled plans never fire.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// The four writes of an exchange, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStep {
    /// ExchangeRecord from -> to for item 1
    RecordForward,
    /// ExchangeRecord to -> from for item 2
    RecordReverse,
    /// Ledger row (from, item 1) moves to `to`
    MoveFirst,
    /// Ledger row (to, item 2) moves to `from`
    MoveSecond,
}

impl ExchangeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStep::RecordForward => "record_forward",
            ExchangeStep::RecordReverse => "record_reverse",
            ExchangeStep::MoveFirst => "move_first",
            ExchangeStep::MoveSecond => "move_second",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_at: Option<ExchangeStep>,
}

impl FaultPlan {
    pub fn disabled() -> Self {
        Self { fail_at: None }
    }

    pub fn fail_at(step: ExchangeStep) -> Self {
        Self {
            fail_at: Some(step),
        }
    }

    /// Called right before `step` executes
    pub fn trip(&self, step: ExchangeStep) -> EngineResult<()> {
        if self.fail_at == Some(step) {
            return Err(EngineError::Storage(format!(
                "injected fault at {}",
                step.as_str()
            )));
        }
        Ok(())
    }
}
