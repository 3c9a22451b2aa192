use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use ultrasonic_modem::{
    CoderMode, Config, Decoder, DeviceConfig, DeviceEvents, Encoder, Frame, Master, MemorySink,
    MemorySource, ParserResult, Result, SampleSink, SampleSource, Slave, BROADCAST_ADDRESS,
};

/// Speaker end of a simulated room. A transmission is released at once when
/// the sink is closed.
struct AirSink {
    air: Sender<Vec<i16>>,
    buffer: Vec<i16>,
}

impl SampleSink for AirSink {
    fn open(&mut self) -> Result<()> {
        self.buffer.clear();
        Ok(())
    }

    fn play(&mut self, samples: &[i16]) -> Result<()> {
        self.buffer.extend_from_slice(samples);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.air.send(std::mem::take(&mut self.buffer));
        Ok(())
    }
}

/// Microphone end; hears silence while nothing is playing.
struct AirSource {
    air: Receiver<Vec<i16>>,
    pending: Vec<i16>,
}

impl SampleSource for AirSource {
    fn read_frame(&mut self, len: usize) -> Result<Vec<i16>> {
        if self.pending.is_empty() {
            if let Ok(samples) = self.air.recv_timeout(Duration::from_millis(2)) {
                self.pending = samples;
            }
        }
        let take = len.min(self.pending.len());
        let mut frame: Vec<i16> = self.pending.drain(..take).collect();
        frame.resize(len, 0);
        Ok(frame)
    }
}

fn air() -> (AirSink, AirSource) {
    let (tx, rx) = unbounded();
    (
        AirSink {
            air: tx,
            buffer: Vec::new(),
        },
        AirSource {
            air: rx,
            pending: Vec::new(),
        },
    )
}

fn frame_config() -> Config {
    Config {
        mode: CoderMode::DataFrame,
        ..Config::new(48000, 4, 17000, 40)
    }
}

#[derive(Clone, Default)]
struct Events {
    data: Arc<Mutex<Vec<Vec<u8>>>>,
    confirmed: Arc<AtomicUsize>,
}

impl DeviceEvents for Events {
    fn on_data_received(&mut self, data: &[u8]) {
        self.data.lock().unwrap().push(data.to_vec());
    }

    fn on_transmission_confirmed(&mut self) {
        self.confirmed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn simple_mode_hex_survives_the_air() {
    let config = Config {
        mode: CoderMode::Simple,
        nfft: 4096,
        threshold: 0.3,
        ..Config::new(48000, 4, 17000, 40)
    };

    let mut encoder = Encoder::new(config.clone(), MemorySink::new()).unwrap();
    encoder.set_hex_data("6C");
    encoder.run().unwrap();
    let samples = encoder.into_sink().take();

    let mut decoder = Decoder::new(config, MemorySource::new(samples)).unwrap();
    decoder.run().unwrap();
    assert_eq!(decoder.received_hex(), "6c");
}

#[test]
fn broadcast_data_frame_over_sixteen_channels() {
    let config = Config {
        nfft: 8192,
        ..Config::new(48000, 16, 18000, 20)
    };
    let frame = Frame::data_frame(BROADCAST_ADDRESS, b"Alamakota", 16).unwrap();

    let mut encoder = Encoder::new(config.clone(), MemorySink::new()).unwrap();
    encoder.set_frame(frame);
    encoder.run().unwrap();
    let samples = encoder.into_sink().take();

    let mut decoder = Decoder::new(config, MemorySource::new(samples)).unwrap();
    decoder.set_device_address(Some(0x01));
    decoder.run().unwrap();

    assert!(decoder.end_of_transmission_received());
    let outcome = decoder.take_reception().unwrap();
    assert_eq!(outcome.result, ParserResult::ParsingOk);
    assert_eq!(outcome.frame.unwrap().data(), Some(&b"Alamakota"[..]));
}

#[test]
fn master_and_slave_complete_an_acknowledged_exchange() {
    let config = frame_config();
    let (to_slave, slave_ear) = air();
    let (to_master, master_ear) = air();

    let device_config = DeviceConfig {
        response_timeout: Some(Duration::from_secs(20)),
        max_retries: Some(2),
        poll_interval: Duration::from_millis(5),
        turnaround: Duration::ZERO,
        ..Default::default()
    };

    let slave_events = Events::default();
    let mut slave = Slave::new(
        0x05,
        Encoder::new(config.clone(), to_master).unwrap(),
        Decoder::new(config.clone(), slave_ear).unwrap(),
        slave_events.clone(),
        device_config.clone(),
    );

    let master_events = Events::default();
    let mut master = Master::new(
        Encoder::new(config.clone(), to_slave).unwrap(),
        Decoder::new(config, master_ear).unwrap(),
        master_events.clone(),
        device_config,
    );

    master.send_data(0x05, b"ping").unwrap();

    let deadline = Instant::now() + Duration::from_secs(60);
    while !master.is_idle() {
        assert!(Instant::now() < deadline, "exchange never completed");
        thread::sleep(Duration::from_millis(10));
    }
    master.stop();
    slave.stop();

    assert_eq!(master_events.confirmed.load(Ordering::SeqCst), 1);
    assert_eq!(*slave_events.data.lock().unwrap(), vec![b"ping".to_vec()]);
}
