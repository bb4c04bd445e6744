//! OTP lifecycle: generation, storage, verification, abuse prevention (§4.2).
//!
//! Backs both the login challenge (C2) and the order-confirmation
//! challenge (C8) under a single implementation, distinguished by
//! [`Purpose`] — which selects the key family and whether verification
//! feeds the shared `otp:fail:<identity>` cumulative-failure counter.

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use otp_store::{KeyedStore, KeyedStoreExt};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Login,
    OrderConfirmation,
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("identity is blocked")]
    Blocked,
    #[error("store error: {0}")]
    Store(#[from] otp_store::StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Mismatch,
    Expired,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OtpRecord {
    code: String,
    created_at: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Clone)]
pub struct OtpEngineConfig {
    pub code_length: u8,
    pub ttl: Duration,
    pub order_ttl: Duration,
    pub max_attempts_per_record: u32,
    pub max_cumulative_failures: u32,
    pub failure_window: Duration,
    pub block_duration: Duration,
}

impl Default for OtpEngineConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl: Duration::from_secs(300),
            order_ttl: Duration::from_secs(600),
            max_attempts_per_record: 3,
            max_cumulative_failures: 5,
            failure_window: Duration::from_secs(900),
            block_duration: Duration::from_secs(900),
        }
    }
}

pub struct OtpEngine {
    store: Arc<dyn KeyedStore>,
    config: OtpEngineConfig,
}

fn record_key(purpose: Purpose, identity: &str) -> String {
    match purpose {
        Purpose::Login => format!("otp:{}", identity),
        Purpose::OrderConfirmation => format!("order:otp:{}", identity),
    }
}

fn block_key(identity: &str) -> String {
    format!("otp:block:{}", identity)
}

fn fail_key(identity: &str) -> String {
    format!("otp:fail:{}", identity)
}

impl OtpEngine {
    pub fn new(store: Arc<dyn KeyedStore>, config: OtpEngineConfig) -> Self {
        Self { store, config }
    }

    fn generate_code(&self) -> String {
        let max = 10u32.pow(self.config.code_length as u32);
        let value: u32 = OsRng.gen_range(0..max);
        format!("{:0width$}", value, width = self.config.code_length as usize)
    }

    /// Issues a fresh code for `identity`, superseding any prior
    /// record. Only the login purpose consults `BlockRecord`; order
    /// confirmation has no block state of its own.
    pub async fn issue(&self, purpose: Purpose, identity: &str) -> Result<String, OtpError> {
        if purpose == Purpose::Login && self.store.exists(&block_key(identity)).await? {
            return Err(OtpError::Blocked);
        }

        let code = self.generate_code();
        let record = OtpRecord {
            code: code.clone(),
            created_at: Utc::now(),
            attempts: 0,
        };
        let ttl = match purpose {
            Purpose::Login => self.config.ttl,
            Purpose::OrderConfirmation => self.config.order_ttl,
        };
        self.store.set(&record_key(purpose, identity), &record, ttl).await?;
        Ok(code)
    }

    /// Verifies `candidate` against the current record for `identity`.
    /// A mismatch against a Login-purpose record increments the
    /// per-record attempt counter (deleting the record at 3) and the
    /// 15-minute cumulative-failure counter (blocking the identity at
    /// 5). Order-confirmation mismatches touch neither counter.
    pub async fn verify(&self, purpose: Purpose, identity: &str, candidate: &str) -> Result<VerifyOutcome, OtpError> {
        if purpose == Purpose::Login && self.store.exists(&block_key(identity)).await? {
            return Ok(VerifyOutcome::Blocked);
        }

        let key = record_key(purpose, identity);
        let Some(mut record): Option<OtpRecord> = self.store.get(&key).await? else {
            return Ok(VerifyOutcome::Expired);
        };

        if constant_time_eq(record.code.as_bytes(), candidate.as_bytes()) {
            self.store.del(&key).await?;
            return Ok(VerifyOutcome::Ok);
        }

        record.attempts += 1;
        if record.attempts >= self.config.max_attempts_per_record {
            self.store.del(&key).await?;
        } else {
            let remaining_ttl = self.store.pttl(&key).await?.unwrap_or(self.config.ttl);
            self.store.set(&key, &record, remaining_ttl).await?;
        }

        if purpose == Purpose::Login {
            let counter_key = fail_key(identity);
            let failures = self.store.incr(&counter_key).await?;
            if failures == 1 {
                self.store.expire(&counter_key, self.config.failure_window).await?;
            }
            if failures as u32 >= self.config.max_cumulative_failures {
                self.store.set_if_absent(&block_key(identity), &true, self.config.block_duration).await?;
            }
        }

        Ok(VerifyOutcome::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otp_store::InMemoryStore;

    fn engine() -> OtpEngine {
        OtpEngine::new(Arc::new(InMemoryStore::new()), OtpEngineConfig::default())
    }

    #[tokio::test]
    async fn issued_code_matches_six_digit_shape() {
        let engine = engine();
        let code = engine.issue(Purpose::Login, "+15551234567").await.unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn correct_code_verifies_once_and_consumes_record() {
        let engine = engine();
        let code = engine.issue(Purpose::Login, "+15551234567").await.unwrap();
        assert_eq!(engine.verify(Purpose::Login, "+15551234567", &code).await.unwrap(), VerifyOutcome::Ok);
        assert_eq!(
            engine.verify(Purpose::Login, "+15551234567", &code).await.unwrap(),
            VerifyOutcome::Expired
        );
    }

    #[tokio::test]
    async fn wrong_code_then_right_code() {
        let engine = engine();
        let _ = engine.issue(Purpose::Login, "+15551234567").await.unwrap();
        // Overwrite with a known code for a deterministic test.
        engine
            .store
            .set("otp:+15551234567", &OtpRecord { code: "111111".to_string(), created_at: Utc::now(), attempts: 0 }, Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(
            engine.verify(Purpose::Login, "+15551234567", "222222").await.unwrap(),
            VerifyOutcome::Mismatch
        );
        assert_eq!(
            engine.verify(Purpose::Login, "+15551234567", "333333").await.unwrap(),
            VerifyOutcome::Mismatch
        );
        assert_eq!(
            engine.verify(Purpose::Login, "+15551234567", "111111").await.unwrap(),
            VerifyOutcome::Ok
        );
    }

    #[tokio::test]
    async fn five_cumulative_failures_blocks_identity() {
        let engine = engine();
        for _ in 0..5 {
            let _ = engine.issue(Purpose::Login, "+15550000000").await.unwrap();
            assert_eq!(
                engine.verify(Purpose::Login, "+15550000000", "000000000").await.unwrap(),
                VerifyOutcome::Mismatch
            );
        }
        let _ = engine.issue(Purpose::Login, "+15550000000").await;
        assert_eq!(
            engine.verify(Purpose::Login, "+15550000000", "123456").await.unwrap(),
            VerifyOutcome::Blocked
        );
    }

    #[tokio::test]
    async fn order_confirmation_binds_to_specific_order() {
        let engine = engine();
        let code_o1 = engine.issue(Purpose::OrderConfirmation, "O1").await.unwrap();
        assert_eq!(
            engine.verify(Purpose::OrderConfirmation, "O2", &code_o1).await.unwrap(),
            VerifyOutcome::Expired
        );
        assert_eq!(
            engine.verify(Purpose::OrderConfirmation, "O1", &code_o1).await.unwrap(),
            VerifyOutcome::Ok
        );
    }

    #[tokio::test]
    async fn order_confirmation_mismatch_does_not_touch_login_fail_counter() {
        let engine = engine();
        let _ = engine.issue(Purpose::OrderConfirmation, "O1").await.unwrap();
        let _ = engine.verify(Purpose::OrderConfirmation, "O1", "000000").await.unwrap();
        assert!(!engine.store.exists("otp:fail:O1").await.unwrap());
    }
}
