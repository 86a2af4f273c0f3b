use thiserror::Error;

/// The error taxonomy surfaced by every public `exchange-core` operation.
/// Each variant maps to exactly one of the categories a caller (the HTTP
/// layer, a test, an admin tool) needs to branch on; no category leaks raw
/// SQL or transport error text to an external caller.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authorization failed")]
    Authorization,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance")]
    InsufficientFunds,

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("external coin-node failure: {0}")]
    External(#[from] coin_node::CoinNodeError),

    #[error("balance invariant violated for user {user_id} coin {coin}")]
    Integrity { user_id: i64, coin: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ExchangeError {
    fn from(e: sqlx::Error) -> Self {
        ExchangeError::Internal(anyhow::Error::new(e))
    }
}

/// A coarse category name, stable across error message wording changes, for
/// callers (HTTP status mapping, metrics) that need to branch without
/// matching on the full enum.
impl ExchangeError {
    pub fn category(&self) -> &'static str {
        match self {
            ExchangeError::Validation(_) => "validation",
            ExchangeError::Authorization => "authorization",
            ExchangeError::Conflict(_) => "conflict",
            ExchangeError::InsufficientFunds => "insufficient_funds",
            ExchangeError::Precondition(_) => "precondition",
            ExchangeError::External(_) => "external",
            ExchangeError::Integrity { .. } => "integrity",
            ExchangeError::Internal(_) => "internal",
        }
    }
}
