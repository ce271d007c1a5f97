use thiserror::Error;

use crate::protocol::names;

#[derive(Error, Debug)]
pub enum CorralError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Call timed out after {0}ms")]
    CallTimeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Address in use: {0}")]
    AddressInUse(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CorralError>;

impl CorralError {
    /// Wire name used when this error is sent as a method error reply.
    pub fn error_name(&self) -> &str {
        match self {
            CorralError::InvalidArgument(_) => names::error::INVALID_ARGUMENT,
            CorralError::AddressInUse(_) => names::error::ADDRESS_IN_USE,
            CorralError::CallTimeout(_) => names::error::CALL_TIMEOUT,
            CorralError::Remote { name, .. } => name,
            _ => names::error::TRANSPORT_FAILURE,
        }
    }

    /// Reconstruct an error from a wire-level error reply.
    ///
    /// Names with a dedicated variant map back to it; everything else stays a
    /// [`CorralError::Remote`] so the original name is preserved.
    pub fn from_wire(name: &str, message: &str) -> Self {
        match name {
            names::error::INVALID_ARGUMENT => CorralError::InvalidArgument(message.to_owned()),
            names::error::ADDRESS_IN_USE => CorralError::AddressInUse(message.to_owned()),
            _ => CorralError::Remote {
                name: name.to_owned(),
                message: message.to_owned(),
            },
        }
    }
}
