//! Bus master: queues outgoing frames and retransmits unicast frames until the
//! addressed slave acknowledges them.

use crate::control::{ACK, STX};
use crate::error::Result;
use crate::protocol::{Frame, BROADCAST_ADDRESS, MASTER_ADDRESS};
use crate::transport::{
    DeviceConfig, DeviceEvents, FrameReceiver, FrameTransmitter, Link, Listen, StopFlag,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    Sending,
    AwaitingResponse,
}

impl MasterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MasterState::Sending,
            2 => MasterState::AwaitingResponse,
            _ => MasterState::Idle,
        }
    }
}

pub struct Master {
    actions: Sender<Frame>,
    outstanding: Arc<AtomicUsize>,
    state: Arc<AtomicU8>,
    stop: StopFlag,
    channels: usize,
    handle: Option<JoinHandle<()>>,
}

impl Master {
    /// Starts the master's worker thread.
    pub fn new<T, R, E>(transmitter: T, mut receiver: R, events: E, config: DeviceConfig) -> Self
    where
        T: FrameTransmitter,
        R: FrameReceiver,
        E: DeviceEvents,
    {
        receiver.set_device_address(Some(MASTER_ADDRESS));
        let channels = transmitter.channels();
        let link = Link::new(transmitter, receiver, config);

        let (actions, queue) = unbounded();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AtomicU8::new(MasterState::Idle as u8));
        let stop = StopFlag::new();

        let worker = Worker {
            link,
            events,
            queue,
            outstanding: Arc::clone(&outstanding),
            state: Arc::clone(&state),
            stop: stop.clone(),
        };
        let handle = thread::spawn(move || worker.run());

        Self {
            actions,
            outstanding,
            state,
            stop,
            channels,
            handle: Some(handle),
        }
    }

    /// Queues a frame for `receiver_address`. The frame is built, and so
    /// validated, before anything is queued.
    pub fn send(&self, receiver_address: u8, command: u8, data: Option<&[u8]>) -> Result<()> {
        let mut builder = Frame::builder(receiver_address, self.channels).command(command);
        if let Some(data) = data {
            builder = builder.data(data);
        }
        let frame = builder.build()?;

        log::debug!("Queued {}", frame);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.actions.send(frame).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            log::error!("Master worker is not running, frame dropped");
        }
        Ok(())
    }

    pub fn send_command(&self, receiver_address: u8, command: u8) -> Result<()> {
        self.send(receiver_address, command, None)
    }

    pub fn send_data(&self, receiver_address: u8, data: &[u8]) -> Result<()> {
        self.send(receiver_address, STX, Some(data))
    }

    /// Queues a frame for every slave. Broadcasts are never acknowledged.
    pub fn send_broadcast(&self, command: u8, data: Option<&[u8]>) -> Result<()> {
        self.send(BROADCAST_ADDRESS, command, data)
    }

    pub fn send_broadcast_command(&self, command: u8) -> Result<()> {
        self.send_broadcast(command, None)
    }

    pub fn send_broadcast_data(&self, data: &[u8]) -> Result<()> {
        self.send_broadcast(STX, Some(data))
    }

    /// No frame queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    pub fn state(&self) -> MasterState {
        MasterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stops the worker, abandoning queued frames, and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Master worker panicked");
            }
        }
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<T, R, E> {
    link: Link<T, R>,
    events: E,
    queue: Receiver<Frame>,
    outstanding: Arc<AtomicUsize>,
    state: Arc<AtomicU8>,
    stop: StopFlag,
}

impl<T: FrameTransmitter, R: FrameReceiver, E: DeviceEvents> Worker<T, R, E> {
    fn run(mut self) {
        log::info!("Master started");
        let poll_interval = self.link.config().poll_interval;

        while !self.stop.is_raised() {
            match self.queue.recv_timeout(poll_interval) {
                Ok(frame) => {
                    self.deliver(frame);
                    self.set_state(MasterState::Idle);
                    self.outstanding.fetch_sub(1, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Master stopped");
    }

    fn set_state(&self, state: MasterState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn deliver(&mut self, frame: Frame) {
        let timeout = self.link.config().response_timeout;
        let max_retries = self.link.config().max_retries;
        let mut retries = 0u32;

        loop {
            log::info!("Transmitting {}", frame);
            self.set_state(MasterState::Sending);
            let attempt = Instant::now();

            let settled = match self.link.send(frame.clone()) {
                Err(e) => {
                    log::error!("Transmission failed: {}", e);
                    self.events.on_transmission_timed_out();
                    false
                }
                Ok(()) if frame.is_broadcast() => return,
                Ok(()) => {
                    self.set_state(MasterState::AwaitingResponse);
                    match self.link.listen(timeout, &self.stop) {
                        Listen::Received(outcome)
                            if outcome.is_ok()
                                && outcome.frame.as_ref().map(Frame::command) == Some(ACK) =>
                        {
                            log::info!("Transmission confirmed");
                            self.events.on_transmission_confirmed();
                            return;
                        }
                        Listen::Received(outcome) => {
                            log::warn!("No acknowledgement, response {}", outcome.result);
                            true
                        }
                        Listen::Stopped => return,
                        Listen::TimedOut => {
                            log::warn!("Response timed out");
                            self.events.on_transmission_timed_out();
                            true
                        }
                        Listen::Closed => {
                            log::warn!("Receiver closed before a response arrived");
                            self.events.on_transmission_timed_out();
                            false
                        }
                        Listen::Failed(e) => {
                            log::warn!("Listening for response failed: {}", e);
                            self.events.on_transmission_timed_out();
                            false
                        }
                    }
                }
            };

            // a failed attempt still takes a full response window
            if !settled && self.wait_out(attempt, timeout) {
                return;
            }
            if self.stop.is_raised() {
                return;
            }
            if max_retries.map_or(false, |max| retries >= max) {
                log::error!("Giving up on {} after {} retries", frame, retries);
                return;
            }
            retries += 1;
            log::info!("Retransmitting, attempt {}", retries + 1);
        }
    }

    /// Sleeps until `timeout` has passed since `attempt`, and for at least the
    /// poll interval. Returns whether the master was stopped meanwhile.
    fn wait_out(&self, attempt: Instant, timeout: Option<Duration>) -> bool {
        let config = self.link.config();
        let remaining = timeout
            .map_or(Duration::ZERO, |t| t.saturating_sub(attempt.elapsed()))
            .max(config.poll_interval);
        self.stop.sleep(remaining, config.response_poll)
    }
}
