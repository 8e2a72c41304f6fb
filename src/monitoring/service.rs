//! The monitoring task: a single tokio task that owns the [`RiskController`].
//!
//! Each tick samples the latest [`PortfolioSnapshot`], asks the engine for its
//! energy and feeds the controller. Commands arrive on an mpsc mailbox and are
//! applied between ticks; a [`StatusSnapshot`] is published on a watch channel
//! after every tick and command.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{LimitUpdate, RiskControlConfig};
use crate::engine::{PortfolioSnapshot, RiskEngine};
use crate::errors::{ensure_finite, Error, Result};
use crate::events::SharedSink;
use crate::helpers::now_ms;
use crate::risk::{BarrierId, BreakerLevel, RecoveryOutcome, RiskController};

use super::commands::{self, Command, CommandReply, Envelope};
use super::status::{Lifecycle, StatusSnapshot};

const COMMAND_BUFFER: usize = 64;

/// Millisecond clock anchored to wall time at start, advanced by the tokio
/// clock (so paused-time tests see cooldowns elapse).
struct LoopClock {
    base_ms: u64,
    start: Instant,
}

impl LoopClock {
    fn start() -> Self {
        Self {
            base_ms: now_ms(),
            start: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.base_ms + self.start.elapsed().as_millis() as u64
    }
}

/// Periodic re-evaluation of the risk state.
pub struct MonitoringLoop {
    controller: RiskController,
    engine: Arc<dyn RiskEngine>,
    portfolio: watch::Receiver<PortfolioSnapshot>,
    interval: Duration,
}

impl MonitoringLoop {
    pub fn new(
        controller: RiskController,
        engine: Arc<dyn RiskEngine>,
        portfolio: watch::Receiver<PortfolioSnapshot>,
    ) -> Self {
        let interval = controller.monitoring_config().interval();
        Self {
            controller,
            engine,
            portfolio,
            interval,
        }
    }

    /// Build the controller around the engine's ground state.
    ///
    /// Engines without a ground state fall back to
    /// `monitoring.reference_energy`; any other engine error is returned.
    pub fn from_engine(
        config: &RiskControlConfig,
        engine: Arc<dyn RiskEngine>,
        portfolio: watch::Receiver<PortfolioSnapshot>,
        sink: SharedSink,
    ) -> Result<Self> {
        let (ground, gap) = match engine.find_ground_state() {
            Ok(ground) => {
                let energy = ensure_finite("ground energy", ground.energy)?;
                let gap = match engine.diagonalize_hamiltonian() {
                    Ok(decomposition) => decomposition.energy_gap().unwrap_or(0.0),
                    Err(Error::EngineUnavailable { .. }) => 0.0,
                    Err(e) => return Err(e),
                };
                (energy, gap)
            }
            Err(Error::EngineUnavailable { capability }) => {
                tracing::warn!(
                    capability,
                    reference_energy = config.monitoring.reference_energy,
                    "Engine has no ground state, using reference energy"
                );
                (config.monitoring.reference_energy, 0.0)
            }
            Err(e) => return Err(e),
        };
        let controller = RiskController::new(config, ground, gap, sink)?;
        Ok(Self::new(controller, engine, portfolio))
    }

    pub fn controller_mut(&mut self) -> &mut RiskController {
        &mut self.controller
    }

    /// Start the task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> MonitorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        let initial = StatusSnapshot::capture(
            &self.controller,
            Lifecycle::Initializing,
            now_ms(),
            0,
            0,
            None,
        );
        let (status_tx, status_rx) = watch::channel(initial);

        let task = tokio::spawn(self.run(command_rx, stop_rx, status_tx));
        MonitorHandle {
            commands: command_tx,
            status: status_rx,
            stop: stop_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<Envelope>,
        mut stop: watch::Receiver<bool>,
        status: watch::Sender<StatusSnapshot>,
    ) {
        let clock = LoopClock::start();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticks: u64 = 0;
        let mut rejected: u64 = 0;
        let mut last_error: Option<String> = None;

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Monitoring loop started");
        let publish = |controller: &RiskController,
                       lifecycle: Lifecycle,
                       ticks: u64,
                       rejected: u64,
                       last_error: &Option<String>| {
            status.send_replace(StatusSnapshot::capture(
                controller,
                lifecycle,
                clock.now_ms(),
                ticks,
                rejected,
                last_error.clone(),
            ));
        };
        publish(&self.controller, Lifecycle::Active, ticks, rejected, &last_error);

        loop {
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                Some(envelope) = mailbox.recv() => {
                    let reply =
                        commands::apply(&mut self.controller, envelope.command, clock.now_ms());
                    if let Err(e) = &reply {
                        tracing::warn!(error = %e, "Operator command rejected");
                    }
                    publish(&self.controller, Lifecycle::Active, ticks, rejected, &last_error);
                    // Requester may have given up; the command is applied regardless.
                    let _ = envelope.reply.send(reply);
                }

                _ = ticker.tick() => {
                    let snapshot = self.portfolio.borrow().clone();
                    let energy = snapshot.energy(self.engine.as_ref());
                    match self.controller.tick(energy, clock.now_ms()) {
                        Ok(_) => ticks += 1,
                        Err(e) => {
                            rejected += 1;
                            tracing::warn!(error = %e, rejected, "Tick skipped, risk state unchanged");
                            last_error = Some(e.to_string());
                        }
                    }
                    publish(&self.controller, Lifecycle::Active, ticks, rejected, &last_error);
                }
            }
        }

        publish(&self.controller, Lifecycle::Stopped, ticks, rejected, &last_error);
        tracing::info!(ticks, rejected, "Monitoring loop stopped");
    }
}

/// Handle to a running [`MonitoringLoop`].
pub struct MonitorHandle {
    commands: mpsc::Sender<Envelope>,
    status: watch::Receiver<StatusSnapshot>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Latest published status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// A receiver that is notified on every published status.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Send a command and wait for it to be applied.
    pub async fn send(&self, command: Command) -> Result<CommandReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Envelope {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::MonitorStopped)?;
        reply_rx.await.map_err(|_| Error::MonitorStopped)?
    }

    pub async fn operator_reset(&self) -> Result<RecoveryOutcome> {
        match self.send(Command::OperatorReset).await? {
            CommandReply::Reset(outcome) => Ok(outcome),
            _ => Ok(RecoveryOutcome::default()),
        }
    }

    pub async fn attempt_recovery(&self) -> Result<bool> {
        match self.send(Command::AttemptRecovery).await? {
            CommandReply::Recovery(recovered) => Ok(recovered),
            _ => Ok(false),
        }
    }

    pub async fn set_barrier_active(&self, id: BarrierId, active: bool) -> Result<()> {
        self.send(Command::SetBarrierActive { id, active }).await.map(|_| ())
    }

    pub async fn set_breaker_active(&self, level: BreakerLevel, active: bool) -> Result<()> {
        self.send(Command::SetBreakerActive { level, active })
            .await
            .map(|_| ())
    }

    pub async fn update_limits(&self, update: LimitUpdate) -> Result<()> {
        self.send(Command::UpdateLimits(update)).await.map(|_| ())
    }

    /// Signal stop, let the in-flight tick finish, and return the final status.
    pub async fn stop(self) -> Result<StatusSnapshot> {
        // Task may already be gone; joining below reports that.
        let _ = self.stop.send(true);
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "Monitoring task failed");
            Error::MonitorStopped
        })?;
        let last = self.status.borrow().clone();
        Ok(last)
    }
}
