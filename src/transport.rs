//! Pieces shared by [`Master`](crate::Master) and [`Slave`](crate::Slave):
//! the transmitter and receiver seams, device callbacks, timing parameters and
//! the listen-with-timeout handoff between the caller and a receiver thread.

use crate::error::{ModemError, Result};
use crate::protocol::{Frame, ParseOutcome};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Sleeps for `duration`, checking the flag every `step`. Returns whether
    /// the flag was raised.
    pub fn sleep(&self, duration: Duration, step: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let step = step.max(Duration::from_millis(1));
        loop {
            if self.is_raised() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(step.min(deadline - now));
        }
    }
}

pub trait FrameTransmitter: Send + 'static {
    /// Number of transmission channels, needed to pad frames.
    fn channels(&self) -> usize;

    /// Plays `frame`, returning once it has been sent.
    fn transmit(&mut self, frame: Frame) -> Result<()>;
}

pub trait FrameReceiver: Send + 'static {
    /// Blocks until a complete frame has been received. Returns `Ok(None)` when
    /// the audio stream ends or `cancel` is raised first.
    fn receive(&mut self, cancel: &StopFlag) -> Result<Option<ParseOutcome>>;

    /// Address frames are checked against, `None` accepts everything.
    fn set_device_address(&mut self, address: Option<u8>);
}

/// Callbacks fired by a device's worker thread.
pub trait DeviceEvents: Send + 'static {
    fn on_data_received(&mut self, _data: &[u8]) {}

    fn on_command_received(&mut self, _command: u8) {}

    fn on_transmission_confirmed(&mut self) {}

    fn on_transmission_timed_out(&mut self) {}
}

impl DeviceEvents for () {}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// How long the master waits for an ACK, `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// Retransmissions after the first attempt, `None` retries forever.
    pub max_retries: Option<u32>,
    /// Idle sleep of the worker loops.
    pub poll_interval: Duration,
    /// How often a pending listen checks for its result.
    pub response_poll: Duration,
    /// Pause before the slave answers, giving the master time to switch to
    /// listening.
    pub turnaround: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(20)),
            max_retries: None,
            poll_interval: Duration::from_millis(50),
            response_poll: Duration::from_millis(10),
            turnaround: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Listen {
    Received(ParseOutcome),
    /// The receiver returned without a frame.
    Closed,
    TimedOut,
    Stopped,
    Failed(ModemError),
}

/// A transmitter and a receiver used half duplex.
pub(crate) struct Link<T, R> {
    transmitter: T,
    receiver: Option<R>,
    config: DeviceConfig,
}

impl<T: FrameTransmitter, R: FrameReceiver> Link<T, R> {
    pub fn new(transmitter: T, receiver: R, config: DeviceConfig) -> Self {
        Self {
            transmitter,
            receiver: Some(receiver),
            config,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn channels(&self) -> usize {
        self.transmitter.channels()
    }

    pub fn set_device_address(&mut self, address: Option<u8>) {
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.set_device_address(address);
        }
    }

    pub fn send(&mut self, frame: Frame) -> Result<()> {
        log::debug!("Sending {}", frame);
        self.transmitter.transmit(frame)
    }

    /// Runs the receiver on its own thread until it produces a result, the
    /// timeout elapses or `stop` is raised. The receiver is cancelled and
    /// joined before returning.
    pub fn listen(&mut self, timeout: Option<Duration>, stop: &StopFlag) -> Listen {
        let mut receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => {
                return Listen::Failed(ModemError::AudioDevice("receiver is gone".into()));
            }
        };

        let cancel = StopFlag::new();
        let (tx, rx) = bounded(1);
        let worker_cancel = cancel.clone();
        let handle = thread::spawn(move || {
            let result = receiver.receive(&worker_cancel);
            let _ = tx.send(result);
            receiver
        });

        let deadline = timeout.map(|t| Instant::now() + t);
        let outcome = loop {
            match rx.recv_timeout(self.config.response_poll) {
                Ok(Ok(Some(outcome))) => break Listen::Received(outcome),
                Ok(Ok(None)) => break Listen::Closed,
                Ok(Err(e)) => break Listen::Failed(e),
                Err(RecvTimeoutError::Disconnected) => {
                    break Listen::Failed(ModemError::AudioDevice(
                        "receiver thread exited".into(),
                    ))
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if stop.is_raised() {
                break Listen::Stopped;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                break Listen::TimedOut;
            }
        };

        cancel.raise();
        match handle.join() {
            Ok(receiver) => self.receiver = Some(receiver),
            Err(_) => log::error!("Receiver thread panicked"),
        }
        outcome
    }
}
