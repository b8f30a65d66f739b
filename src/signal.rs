use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

/// How a wait ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Wake {
    Elapsed,
    Interrupted,
}

/// Sleeping that can be cut short by an interrupt. Every pause the monitor
/// takes goes through this, so Ctrl+C is noticed within one wait.
pub trait Waiter {
    fn wait(&mut self, duration: Duration) -> Wake;
    /// Non-blocking: has an interrupt arrived (now or earlier)?
    fn interrupted(&mut self) -> bool;
}

/// Interrupt delivery via ctrlc. The handler runs on ctrlc's own thread and
/// only sends on a channel, waits are `recv_timeout` on that channel.
pub struct Interrupt {
    rx: Receiver<()>,
    fired: bool,
}

impl Interrupt {
    /// Installs the process-wide Ctrl+C handler. Can only be done once per
    /// process.
    pub fn install() -> Result<Interrupt, ctrlc::Error> {
        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            // The receiver only goes away once we're exiting anyway.
            let _ = tx.send(());
        })?;
        Ok(Interrupt::from_receiver(rx))
    }

    pub(crate) fn from_receiver(rx: Receiver<()>) -> Interrupt {
        Interrupt { rx, fired: false }
    }
}

impl Waiter for Interrupt {
    fn wait(&mut self, duration: Duration) -> Wake {
        if self.fired {
            return Wake::Interrupted;
        }
        match self.rx.recv_timeout(duration) {
            Ok(()) => {
                self.fired = true;
                Wake::Interrupted
            }
            Err(RecvTimeoutError::Timeout) => Wake::Elapsed,
            Err(RecvTimeoutError::Disconnected) => {
                // No handler left to interrupt us, plain sleep will do.
                thread::sleep(duration);
                Wake::Elapsed
            }
        }
    }

    fn interrupted(&mut self) -> bool {
        if !self.fired && self.rx.try_recv().is_ok() {
            self.fired = true;
        }
        self.fired
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    Retry,
    Decline,
    Interrupted,
}

/// Asks whether to keep retrying once the failure threshold is hit.
pub trait Decider {
    fn decide(&mut self, failures: u32, waiter: &mut dyn Waiter) -> Decision;
}

/// Never retries. Useful when nobody is around to answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoDecline;

impl Decider for AutoDecline {
    fn decide(&mut self, failures: u32, _waiter: &mut dyn Waiter) -> Decision {
        log::info!("declining to retry after {failures} failures (non-interactive)");
        Decision::Decline
    }
}

/// Asks on stdin. Only a "y" (any case) means retry; EOF means no.
pub struct ConsolePrompt {
    poll_interval: Duration,
}

impl ConsolePrompt {
    pub fn new() -> ConsolePrompt {
        ConsolePrompt {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        ConsolePrompt::new()
    }
}

impl Decider for ConsolePrompt {
    fn decide(&mut self, _failures: u32, waiter: &mut dyn Waiter) -> Decision {
        print!("Continue trying? (y/n): ");
        if let Err(e) = io::stdout().flush() {
            log::debug!("failed to flush prompt: {e}");
        }

        // Reading stdin blocks, and blocking here would make us deaf to
        // Ctrl+C. The reader thread is abandoned if we get interrupted, which
        // is fine since we're about to exit.
        let (tx_answer, rx_answer) = mpsc::channel();
        thread::spawn(move || {
            let mut answer = String::new();
            let answer = match io::stdin().lock().read_line(&mut answer) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(answer),
            };
            let _ = tx_answer.send(answer);
        });

        loop {
            match rx_answer.try_recv() {
                Ok(Some(answer)) => return parse_answer(&answer),
                Ok(None) | Err(TryRecvError::Disconnected) => {
                    // stdin closed: nobody can answer, so don't keep retrying.
                    println!();
                    return Decision::Decline;
                }
                Err(TryRecvError::Empty) => (),
            }
            if waiter.wait(self.poll_interval) == Wake::Interrupted {
                return Decision::Interrupted;
            }
        }
    }
}

pub fn parse_answer(answer: &str) -> Decision {
    if answer.trim().eq_ignore_ascii_case("y") {
        Decision::Retry
    } else {
        Decision::Decline
    }
}
