// Replay protection
// (c) 2024 the OpenSPA developers

use std::{collections::HashMap, time::Duration};

use sha2::{Digest as _, Sha256};
use tokio::sync::Mutex;
use tracing::trace;

/// Why a datagram was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// The request's timestamp is outside the window around our clock
    #[error("request timestamp {timestamp} is more than {window}s away from now ({now})")]
    OutsideWindow {
        /// Request timestamp, Unix seconds
        timestamp: i64,
        /// Our clock, Unix seconds
        now: i64,
        /// Tolerance in seconds
        window: u64,
    },
    /// We already accepted this exact datagram
    #[error("datagram already seen")]
    Duplicate,
}

/// Rejects stale requests and exact repeats.
///
/// A request is fresh if its timestamp is within `window` of our clock, in either direction.
/// Digests of accepted datagrams are remembered for as long as they would still be fresh,
/// so a captured datagram cannot be replayed inside the window either.
#[derive(Debug)]
pub struct ReplayGuard {
    window: Duration,
    seen: Mutex<HashMap<[u8; 32], i64>>,
}

impl ReplayGuard {
    /// Constructor
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Checks a datagram with the given (verified) timestamp against the clock `now`,
    /// and remembers it if it passes
    pub async fn check(&self, datagram: &[u8], timestamp: i64, now: i64) -> Result<(), ReplayError> {
        let window = self.window.as_secs();
        let window_i = i64::try_from(window).unwrap_or(i64::MAX);
        if timestamp.abs_diff(now) > window {
            return Err(ReplayError::OutsideWindow {
                timestamp,
                now,
                window,
            });
        }
        let digest: [u8; 32] = Sha256::digest(datagram).into();

        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|_, ts| ts.saturating_add(window_i) >= now);
        if seen.len() != before {
            trace!("pruned {} replay digests", before - seen.len());
        }
        if seen.contains_key(&digest) {
            return Err(ReplayError::Duplicate);
        }
        let _ = seen.insert(digest, timestamp);
        Ok(())
    }

    /// Number of remembered digests
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Whether nothing is remembered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
