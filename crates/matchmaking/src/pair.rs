//! Match pairs produced by the matcher
//!
//! A pair carries value snapshots of both players taken at pairing time and
//! a forward-only delivery state owned by the notification pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::request::{ChannelId, PlayerRequest};

/// Pairs older than this are reported as stale
pub const PAIR_TIMEOUT: Duration = Duration::from_millis(500);

/// Delivery state of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PairState {
    Unnotified = 0,
    Notifying = 1,
    Success = 2,
    Failure = 3,
}

impl PairState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PairState::Unnotified,
            1 => PairState::Notifying,
            2 => PairState::Success,
            _ => PairState::Failure,
        }
    }
}

/// Snapshot of one player at the moment of pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSide {
    pub username: String,
    pub channel_id: ChannelId,
    pub score: i32,
    pub match_range: i32,
}

impl From<&PlayerRequest> for PairSide {
    fn from(req: &PlayerRequest) -> Self {
        Self {
            username: req.username().to_string(),
            channel_id: req.channel_id().clone(),
            score: req.score(),
            match_range: req.match_range(),
        }
    }
}

/// Outbound message sent to one side of a pair
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchNotice<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub match_id: Uuid,
    pub matched_at: DateTime<Utc>,
    pub you: &'a PairSide,
    pub opponent: &'a PairSide,
}

/// Two players matched together
#[derive(Debug)]
pub struct MatchPair {
    match_id: Uuid,
    first: PairSide,
    second: PairSide,
    state: AtomicU8,
    created_at: Instant,
    matched_at: DateTime<Utc>,
}

impl MatchPair {
    /// Snapshot both requests and stamp the creation time
    pub fn new(first: &PlayerRequest, second: &PlayerRequest) -> Self {
        Self::from_sides(first.into(), second.into())
    }

    pub fn from_sides(first: PairSide, second: PairSide) -> Self {
        Self {
            match_id: Uuid::new_v4(),
            first,
            second,
            state: AtomicU8::new(PairState::Unnotified as u8),
            created_at: Instant::now(),
            matched_at: Utc::now(),
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn first(&self) -> &PairSide {
        &self.first
    }

    pub fn second(&self) -> &PairSide {
        &self.second
    }

    pub fn matched_at(&self) -> DateTime<Utc> {
        self.matched_at
    }

    pub fn state(&self) -> PairState {
        PairState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once the pair reached `Success` or `Failure`
    pub fn is_finalized(&self) -> bool {
        matches!(self.state(), PairState::Success | PairState::Failure)
    }

    /// Claim delivery (`Unnotified -> Notifying`). Exactly one caller wins.
    pub fn try_notify(&self) -> bool {
        self.transition(PairState::Unnotified, PairState::Notifying)
    }

    pub fn mark_success(&self) -> bool {
        self.transition(PairState::Notifying, PairState::Success)
    }

    pub fn mark_failure(&self) -> bool {
        self.transition(PairState::Notifying, PairState::Failure)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the pair has outlived [`PAIR_TIMEOUT`]
    pub fn is_timeout(&self) -> bool {
        self.is_older_than(PAIR_TIMEOUT)
    }

    pub fn is_older_than(&self, limit: Duration) -> bool {
        self.age() > limit
    }

    /// Message addressed to `first` (or to `second` when `to_first` is false)
    pub fn notice(&self, to_first: bool) -> MatchNotice<'_> {
        let (you, opponent) = if to_first {
            (&self.first, &self.second)
        } else {
            (&self.second, &self.first)
        };
        MatchNotice {
            kind: "matched",
            match_id: self.match_id,
            matched_at: self.matched_at,
            you,
            opponent,
        }
    }

    fn transition(&self, from: PairState, to: PairState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current != from as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
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

    fn pair() -> MatchPair {
        let a = PlayerRequest::new("alice", 50, 5, "c1");
        let b = PlayerRequest::new("bob", 52, 5, "c2");
        MatchPair::new(&a, &b)
    }

    #[test]
    fn test_snapshot_is_copied() {
        let p = pair();
        assert_eq!(p.first().username, "alice");
        assert_eq!(p.second().channel_id.as_str(), "c2");
        assert_eq!(p.state(), PairState::Unnotified);
    }

    #[test]
    fn test_terminal_requires_notifying() {
        let p = pair();
        assert!(!p.mark_success());
        assert!(!p.mark_failure());

        assert!(p.try_notify());
        assert!(!p.try_notify());
        assert!(p.mark_success());
        assert!(!p.mark_failure());
        assert!(p.is_finalized());
    }

    #[test]
    fn test_try_notify_single_winner() {
        let p = Arc::new(pair());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let p = Arc::clone(&p);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if p.try_notify() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(p.state(), PairState::Notifying);
    }

    #[test]
    fn test_timeout_predicate() {
        let p = pair();
        assert!(!p.is_timeout());

        std::thread::sleep(Duration::from_millis(20));
        assert!(p.is_older_than(Duration::from_millis(10)));
    }

    #[test]
    fn test_notice_perspective() {
        let p = pair();
        let json = serde_json::to_value(p.notice(false)).unwrap();
        assert_eq!(json["type"], "matched");
        assert_eq!(json["you"]["username"], "bob");
        assert_eq!(json["opponent"]["username"], "alice");
        assert_eq!(json["opponent"]["matchRange"], 5);
    }
}
