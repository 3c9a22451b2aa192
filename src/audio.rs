use crate::error::{ModemError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

/// Where the decoder gets its audio from.
pub trait SampleSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next `len` samples. [`ModemError::EndOfStream`] ends decoding cleanly,
    /// any other error is a device failure.
    fn read_frame(&mut self, len: usize) -> Result<Vec<i16>>;

    fn stop(&mut self) {}
}

/// Where the encoder sends its audio to. `play` blocks until the samples are
/// consumed.
pub trait SampleSink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn play(&mut self, samples: &[i16]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Replays a recorded buffer frame by frame; the last frame is zero padded.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    samples: Vec<i16>,
    position: usize,
}

impl MemorySource {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len().saturating_sub(self.position)
    }
}

impl SampleSource for MemorySource {
    fn read_frame(&mut self, len: usize) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Err(ModemError::EndOfStream);
        }
        let end = (self.position + len).min(self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        frame.resize(len, 0);
        self.position += len;
        Ok(frame)
    }
}

/// Collects everything played into it.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    samples: Vec<i16>,
    buffers: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of `play` calls so far.
    pub fn buffers(&self) -> usize {
        self.buffers
    }

    pub fn take(&mut self) -> Vec<i16> {
        self.buffers = 0;
        std::mem::take(&mut self.samples)
    }
}

impl SampleSink for MemorySink {
    fn play(&mut self, samples: &[i16]) -> Result<()> {
        self.samples.extend_from_slice(samples);
        self.buffers += 1;
        Ok(())
    }
}

/// Raw signed 16-bit little-endian PCM from any reader.
pub struct PcmReader<R: Read> {
    inner: R,
}

impl<R: Read> PcmReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> SampleSource for PcmReader<R> {
    fn read_frame(&mut self, len: usize) -> Result<Vec<i16>> {
        let mut frame = Vec::with_capacity(len);
        while frame.len() < len {
            match self.inner.read_i16::<LittleEndian>() {
                Ok(sample) => frame.push(sample),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }
        if frame.is_empty() {
            return Err(ModemError::EndOfStream);
        }
        frame.resize(len, 0);
        Ok(frame)
    }
}

/// Raw signed 16-bit little-endian PCM into any writer.
pub struct PcmWriter<W: Write> {
    inner: W,
}

impl<W: Write> PcmWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> SampleSink for PcmWriter<W> {
    fn play(&mut self, samples: &[i16]) -> Result<()> {
        for &sample in samples {
            self.inner.write_i16::<LittleEndian>(sample)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Element-wise wrapping sum; the shorter buffer is treated as zero padded.
pub fn sum_samples(a: &[i16], b: &[i16]) -> Vec<i16> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.wrapping_add(y)
        })
        .collect()
}

/// Scales every sample, truncating toward zero.
pub fn scale_samples(samples: &[i16], factor: f64) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s as f64 * factor) as i16)
        .collect()
}
