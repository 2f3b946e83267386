//! # Recovery Codes
//!
//! One-time fallback codes for users who lost access to every passkey.
//!
//! ## Format
//! Each code has 12 characters from a 31-character alphabet without the
//! look-alikes `0 o 1 l i`, shown as `xxxx-xxxx-xxxx`. Users may type it back
//! with or without hyphens and in any case; [`normalize`] undoes both.
//!
//! ## Storage
//! Only bcrypt hashes of the normalized code are persisted. The plaintext
//! batch is returned once, for display, and then forgotten.
//!
//! ## Spending a code
//! [`RecoveryCodeService::validate_and_use`] checks the candidate against the user's
//! unused hashes and spends the first match with a conditional update, so a
//! code that two requests present at the same time is accepted only once.

use crate::db::{recovery_codes, DbError};
use rand::rngs::OsRng;
use rand::Rng;
use sqlx::SqlitePool;
use std::collections::HashSet;
use thiserror::Error;

/// Characters per code, without separators
pub const CODE_LENGTH: usize = 12;

/// Codes per batch when the caller asks for none
pub const DEFAULT_CODE_COUNT: usize = 8;

pub const DEFAULT_BCRYPT_COST: u32 = 10;

const GROUP_LENGTH: usize = 4;

const ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("failed to hash recovery code: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("recovery code task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A freshly generated batch
///
/// `plaintexts[i]` hashes to `hashes[i]`.
#[derive(Debug, Clone)]
pub struct GeneratedCodes {
    pub plaintexts: Vec<String>,
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryCodeService {
    batch_size: usize,
    cost: u32,
}

impl Default for RecoveryCodeService {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_COUNT, DEFAULT_BCRYPT_COST)
    }
}

impl RecoveryCodeService {
    /// `batch_size` of zero falls back to [`DEFAULT_CODE_COUNT`]
    pub fn new(batch_size: usize, cost: u32) -> Self {
        Self {
            batch_size: if batch_size == 0 { DEFAULT_CODE_COUNT } else { batch_size },
            cost,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Generate `count` distinct codes and their hashes
    ///
    /// A `count` of zero is treated as [`DEFAULT_CODE_COUNT`]. Hashing is CPU
    /// bound; async callers should go through [`issue`](Self::issue) or
    /// [`regenerate`](Self::regenerate), which run it on the blocking pool.
    pub fn generate_codes(&self, count: usize) -> Result<GeneratedCodes, RecoveryError> {
        let count = if count == 0 { DEFAULT_CODE_COUNT } else { count };

        let mut seen = HashSet::with_capacity(count);
        let mut plaintexts = Vec::with_capacity(count);
        let mut hashes = Vec::with_capacity(count);

        while plaintexts.len() < count {
            let code = random_code();
            if !seen.insert(code.clone()) {
                continue;
            }

            hashes.push(bcrypt::hash(&code, self.cost)?);
            plaintexts.push(format_code(&code));
        }

        Ok(GeneratedCodes { plaintexts, hashes })
    }

    /// Compare a normalized candidate against one stored hash
    ///
    /// A malformed hash counts as a mismatch.
    pub fn verify(&self, normalized: &str, code_hash: &str) -> bool {
        match bcrypt::verify(normalized, code_hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable recovery code hash");
                false
            }
        }
    }

    /// Create the first batch for a user and return the plaintexts
    pub async fn issue(&self, pool: &SqlitePool, user_id: i64) -> Result<Vec<String>, RecoveryError> {
        let codes = self.generate_in_background().await?;
        recovery_codes::create_recovery_codes(pool, user_id, &codes.hashes).await?;

        tracing::info!(user_id, count = codes.plaintexts.len(), "issued recovery codes");
        Ok(codes.plaintexts)
    }

    /// Replace a user's batch; no code of the previous batch survives
    pub async fn regenerate(&self, pool: &SqlitePool, user_id: i64) -> Result<Vec<String>, RecoveryError> {
        let codes = self.generate_in_background().await?;
        recovery_codes::replace_recovery_codes(pool, user_id, &codes.hashes).await?;

        tracing::info!(user_id, count = codes.plaintexts.len(), "regenerated recovery codes");
        Ok(codes.plaintexts)
    }

    /// Validate `code` for `user_id` and spend it
    ///
    /// `Ok(false)` covers a wrong code, an exhausted batch and a code that a
    /// concurrent request spent first; callers must not tell them apart.
    pub async fn validate_and_use(&self, pool: &SqlitePool, user_id: i64, code: &str) -> Result<bool, RecoveryError> {
        let candidate = normalize(code);
        let unused = recovery_codes::find_unused(pool, user_id).await?;
        if unused.is_empty() {
            return Ok(false);
        }

        let service = *self;
        let matched = tokio::task::spawn_blocking(move || {
            unused
                .into_iter()
                .find(|stored| service.verify(&candidate, &stored.code_hash))
                .map(|stored| stored.id)
        })
        .await?;

        let Some(id) = matched else {
            return Ok(false);
        };

        let spent = recovery_codes::mark_used(pool, id).await?;
        if !spent {
            tracing::warn!(user_id, "recovery code was spent by a concurrent request");
        }
        Ok(spent)
    }

    async fn generate_in_background(&self) -> Result<GeneratedCodes, RecoveryError> {
        let service = *self;
        tokio::task::spawn_blocking(move || service.generate_codes(service.batch_size)).await?
    }
}

/// Strip hyphens and lowercase, so `A1B2-C3D4-E5F6` matches `a1b2c3d4e5f6`
pub fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn random_code() -> String {
    let mut rng = OsRng;
    (0..CODE_LENGTH)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

fn format_code(code: &str) -> String {
    code.as_bytes()
        .chunks(GROUP_LENGTH)
        .map(|group| String::from_utf8_lossy(group).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    // bcrypt's minimum cost keeps the tests fast
    fn service() -> RecoveryCodeService {
        RecoveryCodeService::new(DEFAULT_CODE_COUNT, 4)
    }

    #[test]
    fn alphabet_has_31_unambiguous_characters() {
        assert_eq!(ALPHABET.len(), 31);
        for confusable in b"0o1li" {
            assert!(!ALPHABET.contains(confusable));
        }
    }

    #[test]
    fn generates_requested_count() {
        let codes = service().generate_codes(3).unwrap();
        assert_eq!(codes.plaintexts.len(), 3);
        assert_eq!(codes.hashes.len(), 3);
    }

    #[test]
    fn zero_count_uses_default() {
        let codes = service().generate_codes(0).unwrap();
        assert_eq!(codes.plaintexts.len(), DEFAULT_CODE_COUNT);
        assert_eq!(codes.hashes.len(), DEFAULT_CODE_COUNT);
    }

    #[test]
    fn zero_batch_size_uses_default() {
        assert_eq!(RecoveryCodeService::new(0, 4).batch_size(), DEFAULT_CODE_COUNT);
    }

    #[test]
    fn codes_are_grouped_in_blocks_of_four() {
        let codes = service().generate_codes(1).unwrap();
        let code = &codes.plaintexts[0];

        assert_eq!(code.len(), 14);
        assert_eq!(code.as_bytes()[4], b'-');
        assert_eq!(code.as_bytes()[9], b'-');
        assert_eq!(normalize(code).len(), CODE_LENGTH);
    }

    #[test]
    fn codes_avoid_confusable_characters() {
        let codes = service().generate_codes(50).unwrap();
        for code in &codes.plaintexts {
            for c in ['0', 'o', 'O', '1', 'l', 'I', 'i'] {
                assert!(!code.contains(c), "code {code} contains {c}");
            }
        }
    }

    #[test]
    fn hundred_codes_are_unique() {
        let codes = service().generate_codes(100).unwrap();
        let unique: HashSet<_> = codes.plaintexts.iter().collect();
        assert_eq!(unique.len(), 100);
    }

    #[test]
    fn plaintext_verifies_against_paired_hash() {
        let service = service();
        let codes = service.generate_codes(2).unwrap();

        assert!(service.verify(&normalize(&codes.plaintexts[0]), &codes.hashes[0]));
        assert!(service.verify(&normalize(&codes.plaintexts[1]), &codes.hashes[1]));
        assert!(!service.verify(&normalize(&codes.plaintexts[0]), &codes.hashes[1]));
    }

    #[test]
    fn formatted_code_does_not_verify_without_normalizing() {
        let service = service();
        let codes = service.generate_codes(1).unwrap();

        assert!(!service.verify(&codes.plaintexts[0], &codes.hashes[0]));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!service().verify("abcdabcdabcd", "not-a-bcrypt-hash"));
    }

    #[test]
    fn normalize_ignores_hyphens_and_case() {
        assert_eq!(normalize("A1B2-C3D4-E5F6"), normalize("a1b2c3d4e5f6"));
        assert_eq!(normalize("A1B2-C3D4-E5F6"), "a1b2c3d4e5f6");
        assert_eq!(normalize("--ab--"), "ab");
    }
}
