use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("transmit is not enabled on this modem instance")]
    TxDisabled,

    #[error("receive is not enabled on this modem instance")]
    RxDisabled,

    #[error("payload too long: {size} bytes (max {max})")]
    PayloadTooLong { size: usize, max: usize },

    #[error("unknown or unregistered protocol")]
    UnknownProtocol,

    #[error("encode failed: {0}")]
    EncodeFailed(String),

    #[error("receive failed")]
    ReceiveFailed,

    #[error("Reed-Solomon block is uncorrectable")]
    Uncorrectable,

    #[error("output buffer too small: need {needed} bytes, have {have}")]
    OutputBufferTooSmall { needed: usize, have: usize },
}

pub type Result<T> = std::result::Result<T, ModemError>;
