use crate::frame::ResponseCode;

/// Errors raised while talking to the BMS or decoding its replies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening, writing to or reading from the transport failed. The link is considered lost.
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),
    /// An operation needed an open transport.
    #[error("Transport is not connected")]
    NotConnected,
    /// Frame boundaries are malformed (missing markers, truncated, bad header).
    #[error("Frame error: {0}")]
    Frame(String),
    /// A checksum did not match its calculated value.
    #[error("Invalid {field} - calculated={calculated:04X} received={received}")]
    Checksum {
        field: &'static str,
        calculated: u16,
        received: String,
    },
    /// The BMS answered with a non-normal return code.
    #[error("BMS returned {0}")]
    Response(ResponseCode),
    /// A field inside a valid frame could not be decoded.
    #[error("Decode error at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },
}

impl Error {
    /// True when the error means the transport must be reopened.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::NotConnected)
    }

    pub(crate) fn decode(offset: usize, reason: impl Into<String>) -> Self {
        Error::Decode {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
