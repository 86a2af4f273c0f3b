use thiserror::Error;

/// Errors surfaced by a coin-node adapter. The caller decides compensation
/// policy; this crate never retries or compensates on its own.
#[derive(Debug, Error)]
pub enum CoinNodeError {
    #[error("coin node request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("coin node transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("coin node returned an RPC error: {code} {message}")]
    Rpc { code: i64, message: String },

    #[error("coin node response was missing expected field: {0}")]
    MalformedResponse(&'static str),

    #[error("no coin node is configured for coin {0}")]
    NotConfigured(String),
}
