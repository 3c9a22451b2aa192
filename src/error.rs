use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModemError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid hex data: {0}")]
    InvalidHexData(String),

    #[error("Illegal character in binary string: {0:?}")]
    InvalidBinaryString(char),

    #[error("Block length incorrect: is {actual}, should be {expected}")]
    BlockLength { expected: usize, actual: usize },

    #[error("Double error detected")]
    DoubleErrorDetected,

    #[error("Data frame must contain a command")]
    MissingCommand,

    #[error("Start of text command given but no text")]
    MissingData,

    #[error("Data given for a command frame")]
    UnexpectedData,

    #[error("Message size {len} is greater than maximal allowed {max}")]
    DataTooLarge { len: usize, max: usize },

    #[error("End of sample stream")]
    EndOfStream,

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModemError>;
