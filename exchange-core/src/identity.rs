//! API key issuance and lookup.
//!
//! Grounded on spec.md §4.7: 32 random bytes from the OS RNG, hex-encoded
//! for the key returned to the caller (once), with only its SHA-256 digest
//! persisted. No recovery or rotation primitive — consistent with the
//! teacher's `rand`+`sha2` pairing used elsewhere for nonce/identifier
//! generation.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::models::User;

/// A freshly issued API key. `raw_key` is returned to the caller exactly
/// once; only `user` (carrying the hash) is ever persisted.
pub struct IssuedKey {
    pub raw_key: String,
    pub user: User,
}

/// Issue a new account: generate a 256-bit key, persist its hash, and hand
/// back the raw key.
pub async fn create_account(ledger: &Ledger) -> Result<IssuedKey, ExchangeError> {
    let raw_key = generate_api_key();
    let hash = hash_api_key(&raw_key);
    let user = ledger.create_user(&hash).await?;
    Ok(IssuedKey { raw_key, user })
}

/// Resolve the bearer token presented on a request to its owning user.
pub async fn authenticate(ledger: &Ledger, raw_key: &str) -> Result<User, ExchangeError> {
    let hash = hash_api_key(raw_key);
    ledger
        .get_user_by_key_hash(&hash)
        .await?
        .ok_or(ExchangeError::Authorization)
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_64_lowercase_hex_chars() {
        let key = generate_api_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn authenticate_round_trips_through_create_account() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let issued = create_account(&ledger).await.unwrap();

        let user = authenticate(&ledger, &issued.raw_key).await.unwrap();
        assert_eq!(user.id, issued.user.id);
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_key() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let result = authenticate(&ledger, "not-a-real-key").await;
        assert!(matches!(result, Err(ExchangeError::Authorization)));
    }
}
