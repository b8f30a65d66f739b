//! Serial port monitor: prints whatever a serial device sends, and keeps
//! reconnecting when the device goes away.
//!
//! The interesting part is `monitor::Monitor`, a small state machine that
//! owns the one open port. Everything it needs from the outside world (port
//! enumeration, sleeping, asking the user, printing) is behind a trait so
//! that it can be driven without hardware.

pub mod config;
pub mod monitor;
pub mod port;
pub mod render;
pub mod session;
pub mod signal;
pub mod status;

use thiserror::Error;

pub use config::{MonitorConfig, Timing};
pub use monitor::{Exit, Monitor, State};
pub use port::{PortDescriptor, Ports, SystemPorts};
pub use signal::{AutoDecline, ConsolePrompt, Interrupt};
pub use status::StdoutReporter;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Runs the monitor against real ports and the console until it stops.
/// Installs a process-wide Ctrl+C handler, so call this at most once.
pub fn start(config: MonitorConfig) -> Result<Exit, Error> {
    config.validate()?;
    let interrupt = Interrupt::install()?;
    let mut monitor = Monitor::new(
        config,
        SystemPorts,
        interrupt,
        ConsolePrompt::new(),
        StdoutReporter,
    );
    Ok(monitor.run())
}
