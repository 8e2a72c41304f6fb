//! Infrastructure shared by the binaries.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
