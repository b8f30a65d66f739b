use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;

use crate::port::{OpenError, PortDescriptor};
use crate::render::Line;

/// Everything the monitor has to tell its user, received data included.
/// The `[OK]`/`[ERROR]`/... prefixes are for humans, not parsers.
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    PortsListed(Vec<PortDescriptor>),
    NoPorts,
    Connecting {
        device: String,
    },
    Connected {
        device: String,
        baud_rate: u32,
    },
    Reconnected {
        attempts: u32,
    },
    OpenFailed {
        device: String,
        error: OpenError,
    },
    RetryScheduled {
        delay: Duration,
    },
    Reconnecting {
        attempt: u32,
    },
    PortVanished {
        device: String,
    },
    WaitingForPorts,
    SwitchingPort {
        from: String,
        to: String,
    },
    ConnectionLost {
        device: String,
        reason: String,
        since: OffsetDateTime,
    },
    ThresholdReached {
        failures: u32,
    },
    Data(Line),
    Interrupted,
    /// Emitted exactly once, on the way out. `device` is None if nothing
    /// was open at the time.
    Released {
        device: Option<String>,
    },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::PortsListed(ports) => {
                write!(f, "Available serial ports:")?;
                for (i, port) in ports.iter().enumerate() {
                    write!(f, "\n  {}. {port}", i + 1)?;
                }
                Ok(())
            }
            Status::NoPorts => write!(f, "No serial ports available. Exiting..."),
            Status::Connecting { device } => write!(f, "Attempting to connect to {device}..."),
            Status::Connected { device, baud_rate } => write!(
                f,
                "[OK] Successfully connected to {device} at {baud_rate} baud\n\n\
                 Serial Monitor Active (Press Ctrl+C to exit)\n{}",
                "-".repeat(40)
            ),
            Status::Reconnected { attempts } => {
                write!(f, "[OK] Reconnected successfully after {attempts} attempts!")
            }
            Status::OpenFailed { device, error } => {
                write!(f, "[ERROR] Failed to connect to {device}: {error}")
            }
            Status::RetryScheduled { delay } => write!(
                f,
                "Waiting {} seconds before retry...",
                delay.as_secs_f32()
            ),
            Status::Reconnecting { attempt } => write!(
                f,
                "[RECONNECT] Attempting to reconnect... (attempt {attempt})"
            ),
            Status::PortVanished { device } => write!(
                f,
                "[WARNING] Port {device} is no longer available\nChecking for available ports..."
            ),
            Status::WaitingForPorts => write!(f, "No serial ports available. Waiting..."),
            Status::SwitchingPort { to, .. } => write!(f, "Switching to {to}"),
            Status::ConnectionLost {
                device,
                reason,
                since,
            } => {
                let format = time::macros::format_description!(
                    version = 2,
                    "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
                );
                let since = since.format(&format).map_err(|_| fmt::Error)?;
                write!(
                    f,
                    "\n[ERROR] Serial connection lost: {reason} ({device}, connected since {since})\n\
                     Will attempt to reconnect..."
                )
            }
            Status::ThresholdReached { failures } => write!(
                f,
                "\n[WARNING] Failed to reconnect after {failures} attempts"
            ),
            Status::Data(line) => write!(f, "{line}"),
            Status::Interrupted => write!(f, "\n\nShutting down..."),
            Status::Released { device: Some(_) } => write!(f, "Serial connection closed."),
            Status::Released { device: None } => Ok(()),
        }
    }
}

pub trait Reporter {
    fn report(&mut self, status: &Status);
}

/// Collects statuses instead of printing them.
impl Reporter for Vec<Status> {
    fn report(&mut self, status: &Status) {
        self.push(status.clone());
    }
}

/// Prints every status as its own line(s) on stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn report(&mut self, status: &Status) {
        if let Status::Released { device: None } = status {
            return;
        }
        println!("{status}");
    }
}
