use crate::address::Address;

/// Error type for parameter model, file and transport operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("address {address} rejected: {reason}")]
    Address {
        address: Address,
        reason: &'static str,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("value {value} outside range {min}..={max}")]
    ValueRange { value: i32, min: i32, max: i32 },

    #[error("invalid file format: {0}")]
    Format(String),

    #[error("patch is incomplete")]
    IncompletePatch,

    #[error("MIDI transport error: {0}")]
    Transport(String),

    #[error("no reply for request at {address} after {attempts} attempts")]
    Timeout { address: Address, attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn address(address: Address, reason: &'static str) -> Self {
        Error::Address { address, reason }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
