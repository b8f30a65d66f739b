use std::process::ExitCode;
use std::time::Duration;

use crate::config::MonitorConfig;
use crate::port::{LinkSettings, OpenError, Ports};
use crate::session::Session;
use crate::signal::{Decider, Decision, Wake, Waiter};
use crate::status::{Reporter, Status};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum State {
    /// Waiting for a first port to show up. Only used at startup, and only
    /// when no port was given explicitly.
    Discovering,
    Connecting,
    Connected,
    /// Making sure the target still exists (or picking a new one) before
    /// the next connection attempt.
    Reconnecting,
    AwaitingDecision,
    Shutdown(Exit),
}

/// Why the monitor stopped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Exit {
    Interrupted,
    Declined,
    NoPorts,
}

impl Exit {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Exit::Interrupted | Exit::Declined => ExitCode::SUCCESS,
            Exit::NoPorts => ExitCode::FAILURE,
        }
    }
}

/// The connection manager: owns the (single) session and drives the
/// discover/connect/read/reconnect cycle until interrupted or told to stop.
///
/// All OS interaction goes through `Ports`, all pauses through `Waiter`, so
/// the whole cycle runs without hardware (or real time) in tests.
pub struct Monitor<P: Ports, W: Waiter, D: Decider, R: Reporter> {
    config: MonitorConfig,
    ports: P,
    waiter: W,
    decider: D,
    reporter: R,
    target: Option<String>,
    session: Option<Session<P::Handle>>,
    // Consecutive failures since the last successful open (or "yes").
    failures: u32,
    // Successful opens after the first one.
    reconnects: u32,
    connected_once: bool,
}

impl<P: Ports, W: Waiter, D: Decider, R: Reporter> Monitor<P, W, D, R> {
    pub fn new(
        config: MonitorConfig,
        ports: P,
        waiter: W,
        decider: D,
        reporter: R,
    ) -> Monitor<P, W, D, R> {
        Monitor {
            target: config.port.clone(),
            config,
            ports,
            waiter,
            decider,
            reporter,
            session: None,
            failures: 0,
            reconnects: 0,
            connected_once: false,
        }
    }

    pub fn initial_state(&self) -> State {
        match self.target {
            Some(_) => State::Connecting,
            None => State::Discovering,
        }
    }

    /// Runs until a terminal state is reached. The port (if any) is always
    /// released before this returns.
    pub fn run(&mut self) -> Exit {
        let mut state = self.initial_state();
        loop {
            if let State::Shutdown(exit) = state {
                self.release();
                return exit;
            }
            if self.waiter.interrupted() {
                state = self.interrupt();
                continue;
            }
            let next = self.step(state);
            if next != state {
                log::debug!("{state:?} -> {next:?} (failures: {0})", self.failures);
            }
            state = next;
        }
    }

    /// Performs the work of one state and returns the next one. `Connected`
    /// returns to itself once per poll cycle.
    pub fn step(&mut self, state: State) -> State {
        match state {
            State::Discovering => self.discover(),
            State::Connecting => self.connect(),
            State::Connected => self.poll(),
            State::Reconnecting => self.reconnect(),
            State::AwaitingDecision => self.await_decision(),
            State::Shutdown(exit) => State::Shutdown(exit),
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    pub fn decider(&self) -> &D {
        &self.decider
    }

    fn report(&mut self, status: Status) {
        self.reporter.report(&status);
    }

    fn interrupt(&mut self) -> State {
        self.report(Status::Interrupted);
        State::Shutdown(Exit::Interrupted)
    }

    fn pause(&mut self, duration: Duration) -> Result<(), State> {
        match self.waiter.wait(duration) {
            Wake::Elapsed => Ok(()),
            Wake::Interrupted => Err(self.interrupt()),
        }
    }

    fn discover(&mut self) -> State {
        let interval = self.config.timing.discovery_interval;
        let mut waited = Duration::ZERO;
        loop {
            let ports = self.ports.list();
            if let Some(first) = ports.first() {
                // Enumeration order is the tie-break.
                let device = first.device.clone();
                self.report(Status::PortsListed(ports));
                self.target = Some(device);
                return State::Connecting;
            }
            if waited >= self.config.timing.discovery_timeout {
                self.report(Status::NoPorts);
                return State::Shutdown(Exit::NoPorts);
            }
            if let Err(state) = self.pause(interval) {
                return state;
            }
            waited += interval;
        }
    }

    fn connect(&mut self) -> State {
        let Some(device) = self.target.clone() else {
            return State::Discovering;
        };
        // Never hold two handles at once.
        self.close_session();

        if self.failures == 0 {
            self.report(Status::Connecting {
                device: device.clone(),
            });
        }
        let settings = LinkSettings {
            baud_rate: self.config.baud_rate,
            read_timeout: self.config.timing.read_timeout,
        };
        match self.ports.open(&device, &settings) {
            Ok(handle) => {
                if self.failures > 0 {
                    self.report(Status::Reconnected {
                        attempts: self.failures,
                    });
                }
                if self.connected_once {
                    self.reconnects += 1;
                }
                self.connected_once = true;
                self.failures = 0;
                self.session = Some(Session::new(device.clone(), handle));
                self.report(Status::Connected {
                    device,
                    baud_rate: settings.baud_rate,
                });
                State::Connected
            }
            Err(error) => {
                if let OpenError::PermissionDenied(_) = error {
                    log::warn!("no permission to open {device}, check group membership (e.g. dialout/uucp)");
                }
                self.report(Status::OpenFailed { device, error });
                self.failures += 1;
                if self.failures >= self.config.failure_threshold {
                    return State::AwaitingDecision;
                }
                let backoff = self.config.timing.backoff;
                self.report(Status::RetryScheduled { delay: backoff });
                if let Err(state) = self.pause(backoff) {
                    return state;
                }
                State::Reconnecting
            }
        }
    }

    fn poll(&mut self) -> State {
        let read = match self.session.as_mut() {
            Some(session) => session.read_available(),
            None => return State::Reconnecting,
        };
        match read {
            Ok(Some(line)) => self.report(Status::Data(line)),
            Ok(None) => (),
            Err(error) => {
                if let Some(session) = self.session.take() {
                    self.report(Status::ConnectionLost {
                        device: session.device.clone(),
                        reason: error.to_string(),
                        since: session.opened_at,
                    });
                    session.close();
                }
                return State::Reconnecting;
            }
        }
        if let Err(state) = self.pause(self.config.timing.poll_interval) {
            return state;
        }
        State::Connected
    }

    fn reconnect(&mut self) -> State {
        let Some(device) = self.target.clone() else {
            return State::Discovering;
        };
        if self.failures > 0 {
            self.report(Status::Reconnecting {
                attempt: self.failures,
            });
        }

        let ports = self.ports.list();
        if ports.iter().any(|port| port.device == device) {
            return State::Connecting;
        }

        self.report(Status::PortVanished {
            device: device.clone(),
        });
        let Some(first) = ports.first() else {
            self.report(Status::WaitingForPorts);
            if let Err(state) = self.pause(self.config.timing.backoff) {
                return state;
            }
            // Counted, but a missing device alone never escalates to the
            // prompt: we keep waiting for it to come back.
            self.failures += 1;
            return State::Reconnecting;
        };
        let next = first.device.clone();
        self.report(Status::PortsListed(ports));
        self.report(Status::SwitchingPort {
            from: device,
            to: next.clone(),
        });
        self.target = Some(next);
        State::Connecting
    }

    fn await_decision(&mut self) -> State {
        self.report(Status::ThresholdReached {
            failures: self.failures,
        });
        match self.decider.decide(self.failures, &mut self.waiter) {
            Decision::Retry => {
                self.failures = 0;
                State::Reconnecting
            }
            Decision::Decline => State::Shutdown(Exit::Declined),
            Decision::Interrupted => self.interrupt(),
        }
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn release(&mut self) {
        let device = self.session.take().map(|session| {
            let device = session.device.clone();
            session.close();
            device
        });
        log::info!(
            "shutting down ({0} reconnects this run)",
            self.reconnects
        );
        self.report(Status::Released { device });
    }
}
