use crate::audio::{scale_samples, sum_samples, SampleSink};
use crate::bits::{bin_array_from_bin_str, bin_str_from_bin_array, bin_to_hex, bytes_to_bits, hex_to_bin, validate_hex};
use crate::codec;
use crate::error::{ModemError, Result};
use crate::protocol::Frame;
use crate::transport::FrameTransmitter;
use crate::{samples_for, Channel, CoderMode, Config, CALIBRATION_FREQUENCY};
use std::f64::consts::PI;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Transmitting,
}

/// Multi-channel FSK transmitter.
///
/// Every slot carries one bit per channel: the channel's low tone for 0 and its
/// high tone for 1, all channels summed at `1/channels` amplitude. Slots are a
/// tone surrounded by half a break of silence on each side.
pub struct Encoder<K: SampleSink> {
    config: Config,
    channels: Vec<Channel>,
    slot_len: usize,
    break_len: usize,
    /// Per channel, the scaled low and high tone slot.
    tones: Vec<[Vec<i16>; 2]>,
    sink: K,
    hex_data: String,
    frame: Option<Frame>,
    message_bits: Vec<bool>,
    encoded_bits: Vec<bool>,
    state: EncoderState,
}

impl<K: SampleSink> Encoder<K> {
    pub fn new(config: Config, sink: K) -> Result<Self> {
        config.validate()?;

        let channels = config.channel_table();
        let slot_len = config.slot_len();
        let break_len = samples_for(config.break_duration() / 2.0, config.sample_rate);
        let scale = 1.0 / config.channels as f64;

        let mut encoder = Self {
            config,
            channels,
            slot_len,
            break_len,
            tones: Vec::new(),
            sink,
            hex_data: String::new(),
            frame: None,
            message_bits: Vec::new(),
            encoded_bits: Vec::new(),
            state: EncoderState::Idle,
        };
        encoder.tones = encoder
            .channels
            .iter()
            .map(|ch| {
                [
                    scale_samples(&encoder.gen_tone(ch.low), scale),
                    scale_samples(&encoder.gen_tone(ch.high), scale),
                ]
            })
            .collect();

        Ok(encoder)
    }

    /// One slot of `freq`: silence, sine with linear fade in and out over
    /// `fade_length` of the tone, silence.
    pub fn gen_tone(&self, freq: f64) -> Vec<i16> {
        let n = self.slot_len;
        let n_sig = n.saturating_sub(2 * self.break_len);
        let fade = self.config.fade_length * n_sig as f64;
        let increment = 2.0 * PI * freq / self.config.sample_rate as f64;

        let mut samples = vec![0i16; n];
        let start = self.break_len + 1;
        let end = n.saturating_sub(self.break_len);
        for (i_sig, i) in (start..end).enumerate() {
            let pos = i_sig as f64;
            let gain = if pos < fade {
                pos / fade
            } else if pos > n_sig as f64 - fade {
                (n_sig as f64 - pos) / fade
            } else {
                1.0
            };
            samples[i] = (gain * (increment * pos).sin() * i16::MAX as f64) as i16;
        }
        samples
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.config.channels
    }

    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Scaled tone slot a channel plays for `bit`.
    pub fn tone(&self, channel: usize, bit: bool) -> &[i16] {
        &self.tones[channel][bit as usize]
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn set_hex_data(&mut self, hex: impl Into<String>) {
        self.hex_data = hex.into();
    }

    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = Some(frame);
    }

    /// Transmits the pending hex data or frame, depending on the mode.
    pub fn run(&mut self) -> Result<()> {
        let bits = match self.config.mode {
            CoderMode::Simple => self.hex_message_bits()?,
            CoderMode::DataFrame => match &self.frame {
                Some(frame) => bytes_to_bits(&frame.to_bytes()),
                None => return Err(ModemError::MissingCommand),
            },
        };
        self.transmit_bits(bits)
    }

    /// Transmits `frame` regardless of the configured mode.
    pub fn transmit_frame(&mut self, frame: Frame) -> Result<()> {
        let bits = bytes_to_bits(&frame.to_bytes());
        self.frame = Some(frame);
        self.transmit_bits(bits)
    }

    fn hex_message_bits(&self) -> Result<Vec<bool>> {
        let digits = validate_hex(&self.hex_data)?;
        let mut bits = bin_array_from_bin_str(&hex_to_bin(digits)?)?;

        let n = self.config.channels;
        let pad = (2 * bits.len()) % n;
        if pad != 0 {
            bits.resize(bits.len() + n - pad / 2, false);
        }
        Ok(bits)
    }

    fn transmit_bits(&mut self, bits: Vec<bool>) -> Result<()> {
        self.state = EncoderState::Transmitting;
        let result = self.play_bits(bits);
        self.state = EncoderState::Idle;

        if let Err(e) = &result {
            log::error!("Transmission failed: {}", e);
        }
        result
    }

    fn play_bits(&mut self, bits: Vec<bool>) -> Result<()> {
        self.encoded_bits = if self.config.secded {
            codec::encode(&bits)?
        } else {
            bits.clone()
        };
        self.message_bits = bits;

        log::info!("Transmitting message...");
        self.sink.open()?;

        let calibration = self.gen_tone(CALIBRATION_FREQUENCY);
        self.sink.play(&calibration)?;

        let n = self.config.channels;
        for slot in self.encoded_bits.chunks(n) {
            let mut signal = vec![0i16; self.slot_len];
            for channel in 0..n {
                let bit = slot.get(channel).copied().unwrap_or(false);
                signal = sum_samples(&signal, &self.tones[channel][bit as usize]);
            }
            self.sink.play(&signal)?;
        }

        self.sink.play(&calibration)?;
        self.sink.close()?;

        log::info!("Transmission ended.");
        match (&self.config.mode, &self.frame) {
            (CoderMode::DataFrame, Some(frame)) => log::info!("{}", frame),
            _ => log::info!("Message: {}", self.hex_data),
        }
        log::debug!("Bin message: {}", self.binary_message_string());
        log::debug!("Hex message: {}", self.hex_message_string());
        log::info!(
            "Bandwidth: {}Hz - {}Hz, speed rate: {}b/s",
            self.channels[0].low,
            self.channels[n - 1].high,
            self.bit_rate()
        );

        Ok(())
    }

    /// Bits of the last transmission after SECDED encoding.
    pub fn encoded_bits(&self) -> &[bool] {
        &self.encoded_bits
    }

    pub fn binary_message_string(&self) -> String {
        bin_str_from_bin_array(&self.message_bits)
    }

    pub fn hex_message_string(&self) -> String {
        bin_to_hex(&self.message_bits)
    }

    /// Raw channel bits per second.
    pub fn bit_rate(&self) -> f64 {
        (self.config.channels as f64
            / (self.config.pulse_duration() + self.config.break_duration()))
        .floor()
    }
}

impl<K: SampleSink + Send + 'static> FrameTransmitter for Encoder<K> {
    fn channels(&self) -> usize {
        self.config.channels
    }

    fn transmit(&mut self, frame: Frame) -> Result<()> {
        self.transmit_frame(frame)
    }
}

impl<K: SampleSink> fmt::Display for Encoder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Encoder:")?;
        writeln!(f, "\tSampling frequency {} Hz", self.config.sample_rate)?;
        writeln!(
            f,
            "\tPulse {}s, break {}s",
            self.config.pulse_duration(),
            self.config.break_duration()
        )?;
        write!(
            f,
            "\tBandwidth: {}Hz - {}Hz",
            self.channels[0].low,
            self.channels[self.channels.len() - 1].high
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySink;
    use crate::protocol::BROADCAST_ADDRESS;

    fn simple_config() -> Config {
        Config {
            mode: CoderMode::Simple,
            ..Config::new(48000, 4, 17000, 40)
        }
    }

    #[test]
    fn test_tone_layout() {
        let encoder = Encoder::new(simple_config(), MemorySink::new()).unwrap();
        let tone = encoder.tone(0, false);

        assert_eq!(tone.len(), 7200);
        assert!(tone[..=2400].iter().all(|&s| s == 0));
        assert!(tone[4800..].iter().all(|&s| s == 0));
        let peak = tone.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 8000 && peak <= (i16::MAX / 4) as u16, "peak {}", peak);
    }

    #[test]
    fn test_tone_frequency() {
        let encoder = Encoder::new(simple_config(), MemorySink::new()).unwrap();
        let tone = encoder.gen_tone(17040.0);
        let active = &tone[2401..4800];
        let crossings = active
            .windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count();
        // 17040 Hz over 0.05 s is 852 periods, two crossings each
        assert!((1690..=1720).contains(&crossings), "crossings {}", crossings);
    }

    #[test]
    fn test_run_simple() {
        let mut encoder = Encoder::new(simple_config(), MemorySink::new()).unwrap();
        encoder.set_hex_data("6C");
        encoder.run().unwrap();

        assert_eq!(encoder.binary_message_string(), "01101100");
        assert_eq!(encoder.hex_message_string(), "6c");
        assert_eq!(encoder.encoded_bits().len(), 16);
        assert_eq!(encoder.state(), EncoderState::Idle);

        let sink = encoder.sink();
        assert_eq!(sink.buffers(), 6);
        assert_eq!(sink.samples().len(), 6 * 7200);
    }

    #[test]
    fn test_simple_padding() {
        let config = Config {
            mode: CoderMode::Simple,
            ..Config::new(48000, 16, 18000, 20)
        };
        let mut encoder = Encoder::new(config, MemorySink::new()).unwrap();
        encoder.set_hex_data("-6");
        encoder.run().unwrap();

        assert_eq!(encoder.binary_message_string(), "0110000000000000");
        assert_eq!(encoder.encoded_bits().len(), 32);
        assert_eq!(encoder.sink().buffers(), 4);
    }

    #[test]
    fn test_invalid_hex_plays_nothing() {
        let mut encoder = Encoder::new(simple_config(), MemorySink::new()).unwrap();
        for bad in ["", "6X", "  "] {
            encoder.set_hex_data(bad);
            assert!(matches!(encoder.run(), Err(ModemError::InvalidHexData(_))));
        }
        assert_eq!(encoder.sink().buffers(), 0);
    }

    #[test]
    fn test_run_data_frame() {
        let config = Config::new(48000, 16, 18000, 20);
        let frame = Frame::data_frame(BROADCAST_ADDRESS, b"Alamakota", 16).unwrap();
        let mut encoder = Encoder::new(config, MemorySink::new()).unwrap();
        encoder.set_frame(frame);
        encoder.run().unwrap();

        // 15 frame bytes, doubled by SECDED, one 16 bit slot each
        assert_eq!(encoder.encoded_bits().len(), 240);
        assert_eq!(encoder.sink().buffers(), 17);
    }

    #[test]
    fn test_secded_disabled() {
        let config = Config {
            secded: false,
            ..simple_config()
        };
        let mut encoder = Encoder::new(config, MemorySink::new()).unwrap();
        encoder.set_hex_data("6C");
        encoder.run().unwrap();

        assert_eq!(encoder.encoded_bits(), &bin_array_from_bin_str("01101100").unwrap()[..]);
        assert_eq!(encoder.sink().buffers(), 4);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = Config::new(48000, 3, 17000, 40);
        assert!(Encoder::new(config, MemorySink::new()).is_err());
    }

    #[test]
    fn test_bit_rate() {
        let encoder = Encoder::new(simple_config(), MemorySink::new()).unwrap();
        assert_eq!(encoder.bit_rate(), 26.0);
    }
}
