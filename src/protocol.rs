//! Addressed data frames.
//!
//! ```text
//! command frame:  SOH | receiver | command | checksum | EOT
//! data frame:     SOH | receiver | STX | data.. padding.. | ETX | checksum | EOT
//! ```
//!
//! The checksum is the total length of the frame in bytes. Data is padded with
//! zero bytes until twice the frame's bit length is a multiple of the number of
//! transmission channels.

use crate::bits::byte_to_hex;
use crate::control::{code_name, EOT, ETX, SOH, STX};
use crate::error::{ModemError, Result};
use std::fmt;

pub const MIN_FRAME_LENGTH: usize = 5;
pub const MAX_MESSAGE_SIZE: usize = i8::MAX as usize;
pub const BROADCAST_ADDRESS: u8 = 0xFF;
pub const MASTER_ADDRESS: u8 = 0x00;

/// SOH, receiver, command, ETX, checksum, EOT.
const DATA_FRAME_OVERHEAD: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    receiver_address: u8,
    command: u8,
    data: Option<Vec<u8>>,
    checksum: u8,
}

impl Frame {
    pub fn builder(receiver_address: u8, channels: usize) -> FrameBuilder {
        FrameBuilder::new(receiver_address, channels)
    }

    pub fn command_frame(receiver_address: u8, command: u8, channels: usize) -> Result<Self> {
        FrameBuilder::new(receiver_address, channels)
            .command(command)
            .build()
    }

    pub fn data_frame(receiver_address: u8, data: &[u8], channels: usize) -> Result<Self> {
        FrameBuilder::new(receiver_address, channels)
            .command(STX)
            .data(data)
            .build()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.push(SOH);
        bytes.push(self.receiver_address);
        bytes.push(self.command);
        if let Some(data) = &self.data {
            bytes.extend_from_slice(data);
            bytes.push(ETX);
        }
        bytes.push(self.checksum);
        bytes.push(EOT);
        bytes
    }

    pub fn wire_len(&self) -> usize {
        match &self.data {
            Some(data) => DATA_FRAME_OVERHEAD + data.len(),
            None => MIN_FRAME_LENGTH,
        }
    }

    pub fn receiver_address(&self) -> u8 {
        self.receiver_address
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    /// Data including any padding.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver_address == BROADCAST_ADDRESS
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data frame: receiver ")?;
        if self.is_broadcast() {
            write!(f, "BROADCAST")?;
        } else {
            write!(f, "0x{}", byte_to_hex(self.receiver_address))?;
        }
        match code_name(self.command) {
            Some(name) => write!(f, ", command {}", name)?,
            None => write!(f, ", command 0x{}", byte_to_hex(self.command))?,
        }
        if let Some(data) = &self.data {
            write!(f, ", data {:?}", String::from_utf8_lossy(data))?;
        }
        Ok(())
    }
}

pub struct FrameBuilder {
    receiver_address: u8,
    command: Option<u8>,
    data: Option<Vec<u8>>,
    channels: usize,
}

impl FrameBuilder {
    pub fn new(receiver_address: u8, channels: usize) -> Self {
        Self {
            receiver_address,
            command: None,
            data: None,
            channels,
        }
    }

    pub fn broadcast(channels: usize) -> Self {
        Self::new(BROADCAST_ADDRESS, channels)
    }

    pub fn receiver_address(mut self, receiver_address: u8) -> Self {
        self.receiver_address = receiver_address;
        self
    }

    pub fn command(mut self, command: u8) -> Self {
        self.command = Some(command);
        self
    }

    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn build(self) -> Result<Frame> {
        let command = self.command.ok_or(ModemError::MissingCommand)?;

        let data = match self.data {
            Some(data) if command != STX => {
                log::debug!("{} data bytes given with command 0x{:02x}", data.len(), command);
                return Err(ModemError::UnexpectedData);
            }
            Some(data) if data.is_empty() => return Err(ModemError::MissingData),
            Some(data) if data.len() > MAX_MESSAGE_SIZE => {
                return Err(ModemError::DataTooLarge {
                    len: data.len(),
                    max: MAX_MESSAGE_SIZE,
                })
            }
            Some(data) => Some(pad_data(data, self.channels)),
            None if command == STX => return Err(ModemError::MissingData),
            None => None,
        };

        let mut frame = Frame {
            receiver_address: self.receiver_address,
            command,
            data,
            checksum: 0,
        };
        frame.checksum = frame.wire_len() as u8;
        Ok(frame)
    }
}

fn pad_data(mut data: Vec<u8>, channels: usize) -> Vec<u8> {
    let channels = channels.max(1);
    while (2 * 8 * (data.len() + DATA_FRAME_OVERHEAD)) % channels != 0 {
        data.push(0x00);
    }
    data
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserResult {
    ParsingOk,
    IncorrectFrameLength,
    StartByteNotFound,
    FrameBuildError,
    ChecksumIncorrect,
    OtherRecipient,
}

impl fmt::Display for ParserResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParserResult::ParsingOk => "parsing ok",
            ParserResult::IncorrectFrameLength => "incorrect frame length",
            ParserResult::StartByteNotFound => "start byte not found",
            ParserResult::FrameBuildError => "frame build error",
            ParserResult::ChecksumIncorrect => "checksum incorrect",
            ParserResult::OtherRecipient => "other recipient",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressCheck {
    Ok,
    Broadcast,
    OtherRecipient,
}

/// Result of [`parse`]. `address` is `None` when parsing stopped before the
/// address byte was examined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub frame: Option<Frame>,
    pub result: ParserResult,
    pub address: Option<AddressCheck>,
}

impl ParseOutcome {
    fn failed(result: ParserResult, address: Option<AddressCheck>) -> Self {
        Self {
            frame: None,
            result,
            address,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == ParserResult::ParsingOk
    }
}

/// Without a device address every frame is accepted as addressed to us.
pub fn check_address(receiver_address: u8, device_address: Option<u8>) -> AddressCheck {
    match device_address {
        None => AddressCheck::Ok,
        Some(_) if receiver_address == BROADCAST_ADDRESS => AddressCheck::Broadcast,
        Some(own) if receiver_address == own => AddressCheck::Ok,
        Some(_) => AddressCheck::OtherRecipient,
    }
}

pub fn parse(bytes: &[u8], channels: usize, device_address: Option<u8>) -> ParseOutcome {
    if bytes.len() < MIN_FRAME_LENGTH {
        return ParseOutcome::failed(ParserResult::IncorrectFrameLength, None);
    }
    if bytes[0] != SOH {
        return ParseOutcome::failed(ParserResult::StartByteNotFound, None);
    }

    let receiver_address = bytes[1];
    let address = check_address(receiver_address, device_address);
    if address == AddressCheck::OtherRecipient {
        return ParseOutcome::failed(ParserResult::OtherRecipient, Some(address));
    }

    let command = bytes[2];
    if command != STX && bytes.len() != MIN_FRAME_LENGTH {
        return ParseOutcome::failed(ParserResult::IncorrectFrameLength, Some(address));
    }

    let mut builder = FrameBuilder::new(receiver_address, channels).command(command);
    if command == STX {
        let data: Vec<u8> = bytes[3..].iter().copied().take_while(|&b| b != ETX).collect();
        builder = builder.data(data);
    }
    let checksum = bytes[bytes.len() - 2];

    match builder.build() {
        Ok(frame) if frame.checksum() == checksum => ParseOutcome {
            frame: Some(frame),
            result: ParserResult::ParsingOk,
            address: Some(address),
        },
        Ok(frame) => {
            log::debug!(
                "checksum mismatch: wire 0x{:02x}, computed 0x{:02x}",
                checksum,
                frame.checksum()
            );
            ParseOutcome::failed(ParserResult::ChecksumIncorrect, Some(address))
        }
        Err(e) => {
            log::debug!("frame build error: {}", e);
            ParseOutcome::failed(ParserResult::FrameBuildError, Some(address))
        }
    }
}
