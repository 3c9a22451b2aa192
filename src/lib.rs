pub mod audio;
pub mod bits;
pub mod codec;
pub mod control;
pub mod demodulation;
pub mod error;
pub mod master;
pub mod modulation;
pub mod protocol;
pub mod slave;
pub mod transport;

pub use audio::*;
pub use control::ControlCode;
pub use demodulation::{Decoder, DetectorState};
pub use error::*;
pub use master::{Master, MasterState};
pub use modulation::{Encoder, EncoderState};
pub use protocol::*;
pub use slave::{Slave, SlaveState};
pub use transport::*;

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_FADE_LENGTH: f64 = 0.05;
pub const DEFAULT_NFFT: usize = 4096;
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Frequency of the tone played before and after every transmission.
pub const CALIBRATION_FREQUENCY: f64 = 40.0;

/// What the encoder transmits and what the decoder reassembles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderMode {
    /// Bare hex payloads, no framing.
    Simple,
    /// Addressed, checksummed [`Frame`]s.
    DataFrame,
}

/// Low/high tone pair of one transmission channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub low: f64,
    pub high: f64,
}

impl Channel {
    pub fn frequency(&self, bit: bool) -> f64 {
        if bit {
            self.high
        } else {
            self.low
        }
    }
}

/// Parameters shared by the encoder and the decoder.
///
/// `nfft` and `threshold` are only read by the decoder; `t_break` and
/// `fade_length` only by the encoder.
#[derive(Debug, Clone)]
pub struct Config {
    pub sample_rate: u32,
    pub channels: usize,
    pub first_freq: u32,
    pub freq_step: u32,
    /// Tone length in seconds, `2 / freq_step` when unset.
    pub t_one_pulse: Option<f64>,
    /// Silence between tones in seconds, twice the pulse when unset.
    pub t_break: Option<f64>,
    pub fade_length: f64,
    pub secded: bool,
    pub mode: CoderMode,
    pub nfft: usize,
    pub threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 16,
            first_freq: 18000,
            freq_step: 20,
            t_one_pulse: None,
            t_break: None,
            fade_length: DEFAULT_FADE_LENGTH,
            secded: true,
            mode: CoderMode::DataFrame,
            nfft: DEFAULT_NFFT,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn new(sample_rate: u32, channels: usize, first_freq: u32, freq_step: u32) -> Self {
        Self {
            sample_rate,
            channels,
            first_freq,
            freq_step,
            ..Default::default()
        }
    }

    pub fn pulse_duration(&self) -> f64 {
        self.t_one_pulse
            .unwrap_or_else(|| 2.0 / self.freq_step as f64)
    }

    pub fn break_duration(&self) -> f64 {
        self.t_break.unwrap_or_else(|| 2.0 * self.pulse_duration())
    }

    /// `low[i] = first + 2·i·step`, `high[i] = low[i] + step`.
    pub fn channel_table(&self) -> Vec<Channel> {
        let first = self.first_freq as f64;
        let step = self.freq_step as f64;
        (0..self.channels)
            .map(|i| Channel {
                low: first + (2 * i) as f64 * step,
                high: first + step + (2 * i) as f64 * step,
            })
            .collect()
    }

    /// Samples in one decoder analysis frame.
    pub fn frame_len(&self) -> usize {
        samples_for(self.pulse_duration(), self.sample_rate)
    }

    /// Samples in one encoder slot (tone plus surrounding break).
    pub fn slot_len(&self) -> usize {
        samples_for(self.pulse_duration() + self.break_duration(), self.sample_rate)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ModemError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.freq_step == 0 {
            return Err(ModemError::InvalidConfig("frequency step must be positive".into()));
        }
        check_channel_count(self.channels)?;
        check_fft_size(self.nfft)?;

        if !(self.fade_length > 0.0 && self.fade_length <= 0.5) {
            return Err(ModemError::InvalidConfig(format!(
                "fade length {} outside (0, 0.5]",
                self.fade_length
            )));
        }
        if self.pulse_duration() <= 0.0 || self.break_duration() < 0.0 {
            return Err(ModemError::InvalidConfig("pulse and break durations must be positive".into()));
        }

        let top = self.first_freq as f64 + (2 * self.channels - 1) as f64 * self.freq_step as f64;
        if top >= self.sample_rate as f64 / 2.0 {
            return Err(ModemError::InvalidConfig(format!(
                "highest channel frequency {} Hz above Nyquist limit of {} Hz",
                top,
                self.sample_rate / 2
            )));
        }

        Ok(())
    }
}

pub fn check_channel_count(channels: usize) -> Result<()> {
    if !channels.is_power_of_two() {
        return Err(ModemError::InvalidConfig(format!(
            "number of channels must be a power of 2, got {}",
            channels
        )));
    }
    Ok(())
}

pub fn check_fft_size(nfft: usize) -> Result<()> {
    if !nfft.is_power_of_two() {
        return Err(ModemError::InvalidConfig(format!(
            "Nfft must be a power of 2, got {}",
            nfft
        )));
    }
    Ok(())
}

/// `ceil(duration · rate)`, ignoring floating point noise just above an integer.
pub(crate) fn samples_for(duration: f64, sample_rate: u32) -> usize {
    let exact = duration * sample_rate as f64;
    (exact - 1e-6).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_table() {
        let config = Config::new(48000, 4, 17000, 40);
        let table = config.channel_table();

        assert_eq!(table.len(), 4);
        assert_eq!(table[0], Channel { low: 17000.0, high: 17040.0 });
        assert_eq!(table[3], Channel { low: 17240.0, high: 17280.0 });
        for pair in table.windows(2) {
            assert!(pair[0].high < pair[1].low);
        }
    }

    #[test]
    fn test_derived_durations() {
        let config = Config::new(48000, 4, 17000, 40);
        assert!((config.pulse_duration() - 0.05).abs() < 1e-12);
        assert!((config.break_duration() - 0.1).abs() < 1e-12);
        assert_eq!(config.frame_len(), 2400);
        assert_eq!(config.slot_len(), 7200);

        let config = Config::new(48000, 16, 18000, 20);
        assert_eq!(config.frame_len(), 4800);
        assert_eq!(config.slot_len(), 14400);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::new(48000, 6, 17000, 40).validate().is_err());

        let mut config = Config::default();
        config.nfft = 3000;
        assert!(matches!(config.validate(), Err(ModemError::InvalidConfig(_))));

        let config = Config::new(48000, 64, 23000, 40);
        assert!(config.validate().is_err());
    }
}
