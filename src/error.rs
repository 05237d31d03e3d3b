use thiserror::Error;

/// How a caller should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient: try again on the next tick or attempt.
    RetryLater,
    /// Give up on this order or lookup, keep tracking the position.
    Abandon,
    /// Halt the process.
    Fatal,
}

#[derive(Debug, Error)]
pub enum SniperError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("{label} gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Wallet error: {0}")]
    WalletError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl SniperError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::RpcError(_)
            | Self::DecodeError(_)
            | Self::ApiError(_)
            | Self::PriceUnavailable(_)
            | Self::Timeout(_) => Disposition::RetryLater,
            Self::TransactionError(_)
            | Self::InsufficientBalance(_)
            | Self::PoolNotFound(_)
            | Self::RetriesExhausted { .. }
            | Self::ChannelClosed(_) => Disposition::Abandon,
            Self::WalletError(_) | Self::ConfigError(_) => Disposition::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == Disposition::RetryLater
    }
}

impl From<reqwest::Error> for SniperError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::ApiError(e.to_string())
        }
    }
}

pub type SniperResult<T> = Result<T, SniperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispositions_follow_error_kind() {
        assert!(SniperError::RpcError("429".into()).is_transient());
        assert!(SniperError::Timeout("confirm".into()).is_transient());
        assert_eq!(
            SniperError::TransactionError("reverted".into()).disposition(),
            Disposition::Abandon
        );
        assert_eq!(
            SniperError::ConfigError("missing secretKey".into()).disposition(),
            Disposition::Fatal
        );
    }
}
