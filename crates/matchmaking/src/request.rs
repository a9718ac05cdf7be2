//! Player requests and their lock-free lifecycle
//!
//! A [`PlayerRequest`] is immutable once built except for its state word.
//! The word packs the lifecycle status into the low 16 bits and a sticky
//! "matched" flag into bit 16, so a single compare-exchange moves both.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

const STATUS_MASK: u32 = 0xFFFF;
const MATCHED_FLAG: u32 = 0x1_0000;

/// Opaque identifier of a live client connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Wrap a transport-specific connection id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle of a request. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum RequestState {
    Initial = 0,
    Processing = 1,
    Matched = 2,
    Finalized = 3,
}

impl RequestState {
    fn from_word(word: u32) -> Self {
        match word & STATUS_MASK {
            0 => RequestState::Initial,
            1 => RequestState::Processing,
            2 => RequestState::Matched,
            _ => RequestState::Finalized,
        }
    }

    fn bits(self) -> u32 {
        self as u32
    }
}

/// A player waiting for an opponent
///
/// Shared as an `Arc` between the bucket queue, the batch being matched and
/// the pair that finally claims it. Only the state word ever changes, and only
/// forward: `Initial -> Processing -> Matched -> Finalized`.
#[derive(Debug)]
pub struct PlayerRequest {
    username: String,
    score: i32,
    match_range: i32,
    channel_id: ChannelId,
    state: AtomicU32,
}

impl PlayerRequest {
    /// Build a request in the `Initial` state
    pub fn new(
        username: impl Into<String>,
        score: i32,
        match_range: i32,
        channel_id: impl Into<ChannelId>,
    ) -> Self {
        Self {
            username: username.into(),
            score,
            match_range,
            channel_id: channel_id.into(),
            state: AtomicU32::new(RequestState::Initial.bits()),
        }
    }

    /// Display name, copied into match notifications
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Rating used for bucketing and compatibility.
    ///
    /// # Example
    ///
    /// ```
    /// use matchmaking::PlayerRequest;
    ///
    /// let req = PlayerRequest::new("ann", 42, 5, "ws-1");
    /// assert_eq!(req.score(), 42);
    /// assert_eq!(req.match_range(), 5);
    /// ```
    pub fn score(&self) -> i32 {
        self.score
    }

    /// Inclusive tolerance on the score difference
    pub fn match_range(&self) -> i32 {
        self.match_range
    }

    /// Connection the match result is delivered to
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_word(self.state.load(Ordering::Acquire))
    }

    /// Queued or being matched, still without a partner
    pub fn is_processing(&self) -> bool {
        self.state() == RequestState::Processing
    }

    /// True once the request joined a pair, including after finalization
    pub fn is_matched(&self) -> bool {
        self.state.load(Ordering::Acquire) & MATCHED_FLAG != 0
    }

    /// Claim the request for matching (`Initial -> Processing`).
    ///
    /// Returns true for exactly one caller.
    pub fn try_acquire(&self) -> bool {
        self.transition(RequestState::Initial, RequestState::Processing.bits())
    }

    /// Fold the request into a pair (`Processing -> Matched`).
    pub fn mark_matched(&self) -> bool {
        self.transition(
            RequestState::Processing,
            RequestState::Matched.bits() | MATCHED_FLAG,
        )
    }

    /// Retire a matched request (`Matched -> Finalized`). The matched flag is kept.
    pub fn finalize(&self) -> bool {
        self.transition(
            RequestState::Matched,
            RequestState::Finalized.bits() | MATCHED_FLAG,
        )
    }

    /// Return the record to a blank `Initial` state for reuse.
    ///
    /// Requires exclusive access, so no other thread can observe the reset.
    pub fn reset(&mut self) {
        self.username.clear();
        self.score = 0;
        self.match_range = 0;
        self.channel_id = ChannelId::default();
        *self.state.get_mut() = RequestState::Initial.bits();
    }

    fn transition(&self, from: RequestState, to: u32) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if RequestState::from_word(current) != from {
                return false;
            }
            match self
                .state
                .compare_exchange_weak(current, to, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_acquire_once() {
        let req = PlayerRequest::new("alice", 50, 5, "c1");
        assert_eq!(req.state(), RequestState::Initial);
        assert!(req.try_acquire());
        assert!(!req.try_acquire());
        assert!(req.is_processing());
    }

    #[test]
    fn test_acquire_is_exclusive_across_threads() {
        let req = Arc::new(PlayerRequest::new("alice", 50, 5, "c1"));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let req = Arc::clone(&req);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if req.try_acquire() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mark_matched_requires_processing() {
        let req = PlayerRequest::new("bob", 10, 1, "c2");
        assert!(!req.mark_matched());
        assert!(!req.is_matched());

        req.try_acquire();
        assert!(req.mark_matched());
        assert!(req.is_matched());
        assert_eq!(req.state(), RequestState::Matched);
        assert!(!req.mark_matched());
        assert!(!req.try_acquire());
    }

    #[test]
    fn test_finalize_keeps_matched_flag() {
        let req = PlayerRequest::new("bob", 10, 1, "c2");
        assert!(!req.finalize());
        req.try_acquire();
        req.mark_matched();
        assert!(req.finalize());
        assert_eq!(req.state(), RequestState::Finalized);
        assert!(req.is_matched());
    }

    #[test]
    fn test_reset() {
        let mut req = PlayerRequest::new("carol", 70, 3, "c3");
        req.try_acquire();
        req.mark_matched();

        req.reset();
        assert_eq!(req.state(), RequestState::Initial);
        assert!(!req.is_matched());
        assert_eq!(req.score(), 0);
        assert_eq!(req.username(), "");
        assert!(req.try_acquire());
    }
}
