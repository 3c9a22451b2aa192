use crate::audio::SampleSource;
use crate::bits::{bin_to_hex, bits_to_bytes};
use crate::codec;
use crate::control::EOT;
use crate::error::{ModemError, Result};
use crate::protocol::{parse, ParseOutcome};
use crate::transport::{FrameReceiver, StopFlag};
use crate::{Channel, CoderMode, Config};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Detector memory carried from one analysis frame to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorState {
    /// Last accepted peak frequency per channel, 0 for nothing.
    pub values: Vec<f64>,
    /// Whether a frame without a full set of tones was seen since the last
    /// accepted slot.
    pub break_seen: bool,
}

impl DetectorState {
    pub fn new(channels: usize) -> Self {
        Self {
            values: vec![0.0; channels],
            break_seen: false,
        }
    }

    /// Folds in the peaks of one frame. Returns the new state and, when the
    /// frame starts a new slot, the frequencies to map to bits.
    pub fn step(self, peaks: &[Option<f64>], delta_f: f64) -> (Self, Option<Vec<f64>>) {
        let current: Vec<f64> = peaks.iter().map(|p| p.unwrap_or(0.0)).collect();
        let changed = current
            .iter()
            .zip(&self.values)
            .any(|(new, old)| (new - old).abs() > delta_f);
        let any_missing = peaks.iter().any(Option::is_none);

        let values = if changed || any_missing {
            current
        } else {
            self.values
        };
        let break_seen = self.break_seen || any_missing;

        let slot = if !any_missing && changed && break_seen {
            Some(values.clone())
        } else {
            None
        };
        (Self { values, break_seen }, slot)
    }
}

/// Maps detected frequencies onto bits, `None` when any of them is neither
/// tone of its channel.
pub fn frequencies_to_bits(channels: &[Channel], values: &[f64], delta_f: f64) -> Option<Vec<bool>> {
    channels
        .iter()
        .zip(values)
        .map(|(ch, &f)| {
            if (f - ch.low).abs() <= delta_f {
                Some(false)
            } else if (f - ch.high).abs() <= delta_f {
                Some(true)
            } else {
                None
            }
        })
        .collect()
}

/// Spectral FSK receiver.
///
/// Reads pulse-length frames from a [`SampleSource`], finds the strongest bin
/// inside every channel's band and turns each new set of tones that follows a
/// break into one bit per channel.
pub struct Decoder<S: SampleSource> {
    config: Config,
    source: S,
    channels: Vec<Channel>,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    frame_len: usize,
    delta_f: f64,
    lowest_bin: usize,
    /// Inclusive bin ranges per channel, relative to `lowest_bin`.
    bands: Vec<(usize, usize)>,
    frequencies: Vec<f64>,
    spectrum: Vec<f64>,
    state: DetectorState,
    pending_bits: Vec<bool>,
    received_bits: Vec<bool>,
    received_hex: String,
    received_bytes: Vec<u8>,
    reception: Option<ParseOutcome>,
    end_of_transmission: bool,
    device_address: Option<u8>,
    stop: StopFlag,
}

impl<S: SampleSource> Decoder<S> {
    pub fn new(config: Config, source: S) -> Result<Self> {
        config.validate()?;

        let nfft = config.nfft;
        let sample_rate = config.sample_rate as f64;
        let frame_len = config.frame_len();
        if frame_len < 2 {
            return Err(ModemError::InvalidConfig(format!(
                "pulse of {} samples is too short",
                frame_len
            )));
        }

        let delta_f = sample_rate / nfft as f64;
        let to_bin = |freq: f64| (freq * nfft as f64 / sample_rate).ceil().max(0.0) as usize;
        let channels = config.channel_table();

        let lowest_bin = to_bin(channels[0].low - delta_f);
        let highest_bin = to_bin(channels[channels.len() - 1].high + delta_f).min(nfft - 1);
        let bands = channels
            .iter()
            .map(|ch| (to_bin(ch.low) - lowest_bin, to_bin(ch.high) - lowest_bin))
            .collect();
        let frequencies = (lowest_bin..=highest_bin)
            .map(|k| k as f64 * sample_rate / nfft as f64)
            .collect();

        let window = (0..frame_len)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (frame_len - 1) as f64).cos())
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nfft);

        log::debug!(
            "Decoder: frame {} samples, nfft {}, resolution {:.2} Hz, bins {}..={}",
            frame_len,
            nfft,
            delta_f,
            lowest_bin,
            highest_bin
        );

        Ok(Self {
            state: DetectorState::new(config.channels),
            config,
            source,
            channels,
            fft,
            window,
            frame_len,
            delta_f,
            lowest_bin,
            bands,
            frequencies,
            spectrum: Vec::new(),
            pending_bits: Vec::new(),
            received_bits: Vec::new(),
            received_hex: String::new(),
            received_bytes: Vec::new(),
            reception: None,
            end_of_transmission: false,
            device_address: None,
            stop: StopFlag::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Samples read per analysis frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn frequency_resolution(&self) -> f64 {
        self.delta_f
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.raise();
    }

    /// Power of the last analysed frame over the channel band.
    pub fn spectrum(&self) -> &[f64] {
        &self.spectrum
    }

    /// Frequency of every [`spectrum`](Self::spectrum) bin.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn detector_state(&self) -> &DetectorState {
        &self.state
    }

    pub fn received_hex(&self) -> &str {
        &self.received_hex
    }

    /// Decoded message bits since the last clear.
    pub fn received_bits(&self) -> &[bool] {
        &self.received_bits
    }

    pub fn end_of_transmission_received(&self) -> bool {
        self.end_of_transmission
    }

    /// Last parsed frame, leaving the decoder ready for the next one.
    pub fn take_reception(&mut self) -> Option<ParseOutcome> {
        self.end_of_transmission = false;
        self.reception.take()
    }

    pub fn clear_result(&mut self) {
        self.received_hex.clear();
        self.received_bits.clear();
        self.reception = None;
        self.end_of_transmission = false;
    }

    /// Drops undecoded bits, collected frame bytes and the decoded message.
    pub fn clear_received_data_buffers(&mut self) {
        self.pending_bits.clear();
        self.received_bytes.clear();
        self.received_hex.clear();
        self.received_bits.clear();
    }

    pub fn set_device_address(&mut self, address: Option<u8>) {
        self.device_address = address;
    }

    /// Decodes until the source runs dry or [`stop`](Self::stop) is called.
    /// A stop raised before the call is cleared.
    pub fn run(&mut self) -> Result<()> {
        self.stop.reset();
        let cancel = self.stop.clone();
        self.run_until(&cancel, false)
    }

    /// Decodes until a frame has been received, the source runs dry or either
    /// stop flag is raised. Nothing left over from an earlier call is kept.
    pub fn receive_frame(&mut self, cancel: &StopFlag) -> Result<Option<ParseOutcome>> {
        self.clear_received_data_buffers();
        self.state = DetectorState::new(self.config.channels);
        self.end_of_transmission = false;
        self.run_until(cancel, true)?;
        if self.end_of_transmission {
            Ok(self.take_reception())
        } else {
            Ok(None)
        }
    }

    fn run_until(&mut self, cancel: &StopFlag, frame_only: bool) -> Result<()> {
        self.source.start()?;
        log::info!("Listening...");

        let result = loop {
            if self.stop.is_raised() || cancel.is_raised() {
                log::debug!("Decoder stopped");
                break Ok(());
            }
            let frame = match self.source.read_frame(self.frame_len) {
                Ok(frame) => frame,
                Err(ModemError::EndOfStream) => break Ok(()),
                Err(e) => {
                    log::error!("Reading audio failed: {}", e);
                    break Err(e);
                }
            };
            self.process_frame(&frame);
            if frame_only && self.end_of_transmission {
                break Ok(());
            }
        };

        self.source.stop();
        result
    }

    /// Runs one analysis frame through the detector.
    pub fn process_frame(&mut self, samples: &[i16]) {
        self.spectrum = self.power_spectrum(samples);
        let peaks = self.detect_peaks();

        let state = std::mem::replace(&mut self.state, DetectorState::new(0));
        let (mut state, slot) = state.step(&peaks, self.delta_f);

        if let Some(values) = slot {
            match frequencies_to_bits(&self.channels, &values, self.delta_f) {
                Some(bits) => {
                    log::trace!("Slot: {:?}", values);
                    state.break_seen = false;
                    self.state = state;
                    self.push_slot(bits);
                    return;
                }
                None => log::debug!("Tones off channel grid: {:?}", values),
            }
        }
        self.state = state;
    }

    fn power_spectrum(&self, samples: &[i16]) -> Vec<f64> {
        let nfft = self.config.nfft;
        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .zip(&self.window)
            .take(nfft)
            .map(|(&s, &w)| Complex::new(s as f64 / i16::MAX as f64 * w, 0.0))
            .collect();
        buffer.resize(nfft, Complex::new(0.0, 0.0));

        self.fft.process(&mut buffer);

        buffer[self.lowest_bin..self.lowest_bin + self.frequencies.len()]
            .iter()
            .map(|c| c.re * c.re + c.im * c.im)
            .collect()
    }

    fn detect_peaks(&self) -> Vec<Option<f64>> {
        self.bands
            .iter()
            .map(|&(start, end)| {
                let end = end.min(self.spectrum.len().saturating_sub(1));
                (start..=end)
                    .filter_map(|k| self.spectrum.get(k).map(|&p| (k, p)))
                    .fold(None, |best: Option<(usize, f64)>, (k, p)| match best {
                        Some((_, bp)) if bp >= p => best,
                        _ => Some((k, p)),
                    })
                    .filter(|&(_, p)| p > self.config.threshold)
                    .map(|(k, _)| self.frequencies[k])
            })
            .collect()
    }

    fn push_slot(&mut self, bits: Vec<bool>) {
        self.pending_bits.extend(bits);

        let unit = if self.config.secded { codec::CODE_BITS * 2 } else { 8 };
        let len = self.pending_bits.len();
        if len % self.config.channels != 0 || len % unit != 0 {
            return;
        }

        let decoded = if self.config.secded {
            match codec::decode(&self.pending_bits) {
                Ok(bits) => bits,
                Err(e) => {
                    log::warn!("{}, dropping received data", e);
                    self.clear_received_data_buffers();
                    return;
                }
            }
        } else {
            self.pending_bits.clone()
        };
        self.pending_bits.clear();

        self.received_hex.push_str(&bin_to_hex(&decoded));
        self.received_bits.extend_from_slice(&decoded);
        log::debug!("New data: {}", self.received_hex);

        if self.config.mode == CoderMode::DataFrame {
            match bits_to_bytes(&decoded) {
                Ok(bytes) => self.push_bytes(&bytes),
                Err(e) => log::warn!("{}", e),
            }
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.received_bytes.push(byte);
            if byte != EOT {
                continue;
            }

            let outcome = parse(&self.received_bytes, self.config.channels, self.device_address);
            match &outcome.frame {
                Some(frame) => log::info!("Received {} ({})", frame, outcome.result),
                None => log::info!("Received broken frame ({})", outcome.result),
            }
            self.reception = Some(outcome);
            self.end_of_transmission = true;
            self.clear_received_data_buffers();
        }
    }
}

impl<S: SampleSource + Send + 'static> FrameReceiver for Decoder<S> {
    fn receive(&mut self, cancel: &StopFlag) -> Result<Option<ParseOutcome>> {
        self.receive_frame(cancel)
    }

    fn set_device_address(&mut self, address: Option<u8>) {
        Decoder::set_device_address(self, address);
    }
}

impl<S: SampleSource> fmt::Display for Decoder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Decoder:")?;
        writeln!(f, "\tSampling frequency {} Hz", self.config.sample_rate)?;
        writeln!(f, "\tNfft {}, resolution {:.2} Hz", self.config.nfft, self.delta_f)?;
        write!(f, "\tThreshold {}", self.config.threshold)
    }
}
