//! Periodic monitoring task and its operator surface.
//!
//! ```ignore
//! let (portfolio_tx, portfolio_rx) = watch::channel(PortfolioSnapshot::default());
//! let monitor = MonitoringLoop::from_engine(&config, engine, portfolio_rx, sink)?;
//! let handle = monitor.spawn();
//! // ... feed portfolio_tx, read handle.status() ...
//! let final_status = handle.stop().await?;
//! ```

mod commands;
mod service;
mod status;

pub use commands::{Command, CommandReply};
pub use service::{MonitorHandle, MonitoringLoop};
pub use status::{HealthStatus, Lifecycle, StatusSnapshot, SystemHealth};
