use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

/// Bytes of entropy behind every verification token.
pub const TOKEN_BYTES: usize = 32;

/// Wall-clock source in unix milliseconds, the only timestamp form tokens use.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Hex-encoded random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn tokens_match(stored: &str, supplied: &str) -> bool {
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::Clock;

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock(AtomicI64);

    impl ManualClock {
        pub fn new(start_ms: i64) -> Self {
            Self(AtomicI64::new(start_ms))
        }

        pub fn advance_ms(&self, ms: i64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
