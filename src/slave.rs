//! Addressed bus device: listens for frames and answers the master with ACK or
//! NAK.

use crate::control::{ACK, NAK};
use crate::protocol::{AddressCheck, Frame, ParseOutcome, ParserResult, MASTER_ADDRESS};
use crate::transport::{
    DeviceConfig, DeviceEvents, FrameReceiver, FrameTransmitter, Link, Listen, StopFlag,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Idle,
    Receiving,
}

pub struct Slave {
    address: u8,
    receiving: Arc<AtomicBool>,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl Slave {
    /// Starts listening as `address`.
    pub fn new<T, R, E>(address: u8, transmitter: T, receiver: R, events: E, config: DeviceConfig) -> Self
    where
        T: FrameTransmitter,
        R: FrameReceiver,
        E: DeviceEvents,
    {
        let mut link = Link::new(transmitter, receiver, config);
        link.set_device_address(Some(address));

        let receiving = Arc::new(AtomicBool::new(false));
        let stop = StopFlag::new();
        let worker = Worker {
            link,
            events,
            receiving: Arc::clone(&receiving),
            stop: stop.clone(),
        };
        let handle = thread::spawn(move || worker.run());

        Self {
            address,
            receiving,
            stop,
            handle: Some(handle),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn state(&self) -> SlaveState {
        if self.receiving.load(Ordering::SeqCst) {
            SlaveState::Receiving
        } else {
            SlaveState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Slave worker panicked");
            }
        }
    }
}

impl Drop for Slave {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<T, R, E> {
    link: Link<T, R>,
    events: E,
    receiving: Arc<AtomicBool>,
    stop: StopFlag,
}

impl<T: FrameTransmitter, R: FrameReceiver, E: DeviceEvents> Worker<T, R, E> {
    fn run(mut self) {
        log::info!("Slave started");
        let poll_interval = self.link.config().poll_interval;

        while !self.stop.is_raised() {
            self.receiving.store(true, Ordering::SeqCst);
            let result = self.link.listen(None, &self.stop);
            self.receiving.store(false, Ordering::SeqCst);

            match result {
                Listen::Received(outcome) => self.handle(outcome),
                Listen::Stopped => break,
                Listen::Closed | Listen::TimedOut => thread::sleep(poll_interval),
                Listen::Failed(e) => {
                    log::warn!("Listening failed: {}", e);
                    thread::sleep(poll_interval);
                }
            }
        }
        log::info!("Slave stopped");
    }

    fn handle(&mut self, outcome: ParseOutcome) {
        let addressed = outcome.address == Some(AddressCheck::Ok);

        match (outcome.result, outcome.frame) {
            (ParserResult::ParsingOk, Some(frame)) => {
                match frame.data() {
                    Some(data) => self.events.on_data_received(data),
                    None => self.events.on_command_received(frame.command()),
                }
                if addressed {
                    self.reply(ACK);
                }
            }
            (ParserResult::OtherRecipient, _) => log::debug!("Frame for another device"),
            (result, _) => {
                log::warn!("Bad frame: {}", result);
                if addressed {
                    self.reply(NAK);
                }
            }
        }
    }

    fn reply(&mut self, code: u8) {
        thread::sleep(self.link.config().turnaround);

        let frame = match Frame::command_frame(MASTER_ADDRESS, code, self.link.channels()) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Building reply failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.link.send(frame) {
            log::error!("Sending reply failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MemorySink, MemorySource};
    use crate::demodulation::Decoder;
    use crate::modulation::Encoder;
    use crate::protocol::{parse, BROADCAST_ADDRESS};
    use crate::transport::tests::{RecordingTransmitter, ScriptedReceiver};
    use crate::{CoderMode, Config};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct Inbox {
        data: Arc<Mutex<Vec<Vec<u8>>>>,
        commands: Arc<Mutex<Vec<u8>>>,
    }

    impl DeviceEvents for Inbox {
        fn on_data_received(&mut self, data: &[u8]) {
            self.data.lock().unwrap().push(data.to_vec());
        }

        fn on_command_received(&mut self, command: u8) {
            self.commands.lock().unwrap().push(command);
        }
    }

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            poll_interval: Duration::from_millis(5),
            turnaround: Duration::ZERO,
            ..Default::default()
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !condition() {
            assert!(Instant::now() < deadline, "condition never met");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn outcome_of(frame: &Frame, device: u8) -> ParseOutcome {
        parse(&frame.to_bytes(), 4, Some(device))
    }

    #[test]
    fn test_acknowledges_addressed_frame_from_audio() {
        let config = Config {
            mode: CoderMode::DataFrame,
            ..Config::new(48000, 4, 17000, 40)
        };
        let frame = Frame::data_frame(0x05, b"hi", config.channels).unwrap();
        let mut encoder = Encoder::new(config.clone(), MemorySink::new()).unwrap();
        encoder.transmit_frame(frame).unwrap();
        let samples = encoder.into_sink().take();

        let decoder = Decoder::new(config, MemorySource::new(samples)).unwrap();
        let transmitter = RecordingTransmitter {
            channels: 4,
            ..Default::default()
        };
        let replies = Arc::clone(&transmitter.frames);
        let inbox = Inbox::default();

        let mut slave = Slave::new(0x05, transmitter, decoder, inbox.clone(), test_config());
        wait_for(|| !replies.lock().unwrap().is_empty());
        slave.stop();

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0], Frame::command_frame(MASTER_ADDRESS, ACK, 4).unwrap());

        assert_eq!(*inbox.data.lock().unwrap(), vec![b"hi".to_vec()]);
    }

    #[test]
    fn test_broadcast_and_foreign_frames_are_not_answered() {
        let broadcast = Frame::command_frame(BROADCAST_ADDRESS, 0x07, 4).unwrap();
        let foreign = Frame::command_frame(0x09, 0x07, 4).unwrap();
        let receiver = ScriptedReceiver {
            replies: vec![outcome_of(&broadcast, 0x05), outcome_of(&foreign, 0x05)],
        };
        let transmitter = RecordingTransmitter {
            channels: 4,
            ..Default::default()
        };
        let sent = Arc::clone(&transmitter.frames);
        let inbox = Inbox::default();

        let mut slave = Slave::new(0x05, transmitter, receiver, inbox.clone(), test_config());
        wait_for(|| !inbox.commands.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(slave.state(), SlaveState::Receiving);
        slave.stop();
        assert_eq!(slave.state(), SlaveState::Idle);

        assert_eq!(*inbox.commands.lock().unwrap(), vec![0x07]);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_frame_is_nacked() {
        let mut bytes = Frame::command_frame(0x05, 0x07, 4).unwrap().to_bytes();
        bytes[3] = 0x09;
        let receiver = ScriptedReceiver {
            replies: vec![parse(&bytes, 4, Some(0x05))],
        };
        let transmitter = RecordingTransmitter {
            channels: 4,
            ..Default::default()
        };
        let sent = Arc::clone(&transmitter.frames);

        let mut slave = Slave::new(0x05, transmitter, receiver, (), test_config());
        wait_for(|| !sent.lock().unwrap().is_empty());
        slave.stop();

        assert_eq!(sent.lock().unwrap()[0].command(), NAK);
        assert!(!slave.is_running());
    }
}
