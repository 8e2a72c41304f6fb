//! Operator commands accepted by the monitoring loop between ticks.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::LimitUpdate;
use crate::errors::Result;
use crate::risk::{BarrierId, BreakerLevel, RecoveryOutcome, RiskController};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Clear all latched state regardless of cooldown and deviation.
    OperatorReset,
    /// Gated recovery attempt, same rules as the automatic one.
    AttemptRecovery,
    SetBarrierActive { id: BarrierId, active: bool },
    SetBreakerActive { level: BreakerLevel, active: bool },
    UpdateLimits(LimitUpdate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Reset(RecoveryOutcome),
    Recovery(bool),
    Applied,
}

/// A command in flight together with its reply slot.
pub(crate) struct Envelope {
    pub(crate) command: Command,
    pub(crate) reply: oneshot::Sender<Result<CommandReply>>,
}

pub(crate) fn apply(
    controller: &mut RiskController,
    command: Command,
    now_ms: u64,
) -> Result<CommandReply> {
    tracing::info!(?command, "Applying operator command");
    match command {
        Command::OperatorReset => Ok(CommandReply::Reset(controller.operator_reset(now_ms))),
        Command::AttemptRecovery => Ok(CommandReply::Recovery(
            controller.attempt_recovery(now_ms),
        )),
        Command::SetBarrierActive { id, active } => {
            controller.set_barrier_active(id, active)?;
            Ok(CommandReply::Applied)
        }
        Command::SetBreakerActive { level, active } => {
            controller.set_breaker_active(level, active)?;
            Ok(CommandReply::Applied)
        }
        Command::UpdateLimits(update) => {
            controller.update_limits(&update)?;
            Ok(CommandReply::Applied)
        }
    }
}
