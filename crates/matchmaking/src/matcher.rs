//! Greedy batch matcher
//!
//! The matcher sorts a batch by score, then for each still-processing request
//! looks for the first compatible partner at a higher or equal score. Only the
//! window `(i, upper_bound)` can hold partners, where `upper_bound` is the first
//! sorted position whose score exceeds `score_i + range_i`.
//!
//! Candidates are tested [`LANES`] at a time over contiguous `i32` slices so the
//! compiler can vectorize the mutual predicate. The scalar kernel is kept for
//! the tail of each window and as a reference implementation; both produce the
//! same pairs.
//!
//! The matcher mutates request state in place. Requests still `Processing`
//! when it returns are left for the caller to requeue.

use std::sync::Arc;
use tracing::warn;

use crate::pair::MatchPair;
use crate::request::PlayerRequest;

/// Candidates evaluated per predicate step
pub const LANES: usize = 8;

/// Candidate search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kernel {
    /// Fixed-width lane masks over contiguous score/range arrays
    #[default]
    Chunked,
    /// One candidate at a time
    Scalar,
}

/// Match the first `len` requests of `batch`, appending new pairs to `out`.
///
/// Returns the number of pairs produced.
pub fn match_batch(batch: &[Arc<PlayerRequest>], len: usize, out: &mut Vec<MatchPair>) -> usize {
    match_batch_with(Kernel::Chunked, batch, len, out)
}

/// [`match_batch`] with an explicit kernel
pub fn match_batch_with(
    kernel: Kernel,
    batch: &[Arc<PlayerRequest>],
    len: usize,
    out: &mut Vec<MatchPair>,
) -> usize {
    let active = &batch[..len.min(batch.len())];
    if active.len() < 2 {
        return 0;
    }

    let sorted = SortedView::new(active);
    let before = out.len();

    for pos in 0..sorted.len() {
        let req = &active[sorted.order[pos]];
        if !req.is_processing() {
            continue;
        }
        let score = sorted.scores[pos];
        let range = sorted.ranges[pos];

        let start = pos + 1;
        let limit = score.saturating_add(range);
        let upper = start + sorted.scores[start..].partition_point(|&s| s <= limit);

        let found = match kernel {
            Kernel::Chunked => scan_chunked(active, &sorted, start, upper, score, range),
            Kernel::Scalar => scan_scalar(active, &sorted, start, upper, score, range),
        };

        if let Some(candidate) = found {
            commit(candidate, req, out);
        }
    }

    out.len() - before
}

/// Match requests of `left` against requests of `right`.
///
/// Each side is sorted independently; for every processing request on the
/// left, partners are searched in the right-hand window
/// `[score - range, score + range]`. Requests appearing in both batches are
/// never paired with themselves.
pub fn match_cross_batch(
    left: &[Arc<PlayerRequest>],
    right: &[Arc<PlayerRequest>],
    out: &mut Vec<MatchPair>,
) -> usize {
    if left.is_empty() || right.is_empty() {
        return 0;
    }

    let lhs = SortedView::new(left);
    let rhs = SortedView::new(right);
    let before = out.len();

    for pos in 0..lhs.len() {
        let req = &left[lhs.order[pos]];
        if !req.is_processing() {
            continue;
        }
        let score = lhs.scores[pos];
        let range = lhs.ranges[pos];

        let low = score.saturating_sub(range);
        let high = score.saturating_add(range);
        let lo = rhs.scores.partition_point(|&s| s < low);
        let hi = rhs.scores.partition_point(|&s| s <= high);

        let found = (lo..hi).find_map(|k| {
            let candidate = &right[rhs.order[k]];
            if Arc::ptr_eq(candidate, req) {
                return None;
            }
            let diff = (i64::from(rhs.scores[k]) - i64::from(score)).abs();
            let compatible = diff <= i64::from(range) && diff <= i64::from(rhs.ranges[k]);
            (compatible && candidate.mark_matched()).then_some(candidate)
        });

        if let Some(candidate) = found {
            commit(candidate, req, out);
        }
    }

    out.len() - before
}

/// Batch reordered ascending by score with parallel score/range arrays
struct SortedView {
    order: Vec<usize>,
    scores: Vec<i32>,
    ranges: Vec<i32>,
}

impl SortedView {
    fn new(batch: &[Arc<PlayerRequest>]) -> Self {
        let mut order: Vec<usize> = (0..batch.len()).collect();
        order.sort_by_key(|&i| batch[i].score());

        let scores = order.iter().map(|&i| batch[i].score()).collect();
        let ranges = order.iter().map(|&i| batch[i].match_range()).collect();

        Self {
            order,
            scores,
            ranges,
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

fn scan_chunked<'a>(
    batch: &'a [Arc<PlayerRequest>],
    sorted: &SortedView,
    start: usize,
    upper: usize,
    score: i32,
    range: i32,
) -> Option<&'a Arc<PlayerRequest>> {
    let scores = &sorted.scores[start..upper];
    let ranges = &sorted.ranges[start..upper];

    let mut base = start;
    for (s_chunk, r_chunk) in scores.chunks_exact(LANES).zip(ranges.chunks_exact(LANES)) {
        let mut mask = lane_mask(s_chunk, r_chunk, score, range);
        while mask != 0 {
            let lane = mask.trailing_zeros() as usize;
            let candidate = &batch[sorted.order[base + lane]];
            if candidate.mark_matched() {
                return Some(candidate);
            }
            mask &= mask - 1;
        }
        base += LANES;
    }

    scan_scalar(batch, sorted, base, upper, score, range)
}

fn scan_scalar<'a>(
    batch: &'a [Arc<PlayerRequest>],
    sorted: &SortedView,
    start: usize,
    upper: usize,
    score: i32,
    range: i32,
) -> Option<&'a Arc<PlayerRequest>> {
    (start..upper).find_map(|k| {
        let diff = sorted.scores[k].saturating_sub(score);
        if diff <= range && diff <= sorted.ranges[k] {
            let candidate = &batch[sorted.order[k]];
            if candidate.mark_matched() {
                return Some(candidate);
            }
        }
        None
    })
}

/// Bit `n` is set when lane `n` satisfies the mutual predicate
#[inline]
fn lane_mask(scores: &[i32], ranges: &[i32], score: i32, range: i32) -> u32 {
    let mut mask = 0u32;
    for lane in 0..LANES {
        let diff = scores[lane].saturating_sub(score);
        let hit = (diff <= range) & (diff <= ranges[lane]);
        mask |= (hit as u32) << lane;
    }
    mask
}

/// Candidate has already been claimed; claim `req` and emit the pair
fn commit(candidate: &Arc<PlayerRequest>, req: &Arc<PlayerRequest>, out: &mut Vec<MatchPair>) {
    if req.mark_matched() {
        out.push(MatchPair::new(candidate, req));
    } else {
        warn!(
            candidate = candidate.username(),
            request = req.username(),
            "Request changed state during matching; candidate left matched without a pair"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestState;

    fn claimed(name: &str, score: i32, range: i32) -> Arc<PlayerRequest> {
        let req = Arc::new(PlayerRequest::new(name, score, range, format!("ch-{name}")));
        assert!(req.try_acquire());
        req
    }

    fn names(pairs: &[MatchPair]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|p| (p.first().username.clone(), p.second().username.clone()))
            .collect()
    }

    #[test]
    fn test_compatible_pair_matches() {
        let batch = vec![claimed("a", 50, 5), claimed("b", 52, 5)];
        let mut out = Vec::new();

        assert_eq!(match_batch(&batch, batch.len(), &mut out), 1);
        assert!(batch.iter().all(|r| r.is_matched()));
        // Candidate goes first
        assert_eq!(names(&out), vec![("b".to_string(), "a".to_string())]);
    }

    #[test]
    fn test_incompatible_stay_processing() {
        let batch = vec![claimed("a", 10, 1), claimed("b", 50, 1)];
        let mut out = Vec::new();

        assert_eq!(match_batch(&batch, batch.len(), &mut out), 0);
        assert!(out.is_empty());
        assert!(batch.iter().all(|r| r.state() == RequestState::Processing));
    }

    #[test]
    fn test_predicate_is_mutual() {
        // a tolerates b, b does not tolerate a
        let batch = vec![claimed("a", 50, 10), claimed("b", 58, 2)];
        let mut out = Vec::new();

        assert_eq!(match_batch(&batch, 2, &mut out), 0);
    }

    #[test]
    fn test_greedy_tie_break() {
        let batch = vec![
            claimed("hi", 60, 10),
            claimed("lo", 50, 10),
            claimed("mid", 55, 10),
        ];
        let mut out = Vec::new();

        assert_eq!(match_batch(&batch, batch.len(), &mut out), 1);
        assert_eq!(names(&out), vec![("mid".to_string(), "lo".to_string())]);
        assert!(batch[0].is_processing());
    }

    #[test]
    fn test_matched_request_not_reused() {
        let batch = vec![
            claimed("a", 50, 5),
            claimed("b", 51, 5),
            claimed("c", 52, 5),
            claimed("d", 53, 5),
        ];
        let mut out = Vec::new();
        match_batch(&batch, batch.len(), &mut out);

        assert_eq!(out.len(), 2);
        let mut seen: Vec<String> = out
            .iter()
            .flat_map(|p| [p.first().username.clone(), p.second().username.clone()])
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_respects_logical_length() {
        let batch = vec![claimed("a", 50, 5), claimed("b", 52, 5), claimed("c", 51, 5)];
        let mut out = Vec::new();

        assert_eq!(match_batch(&batch, 1, &mut out), 0);
        assert_eq!(match_batch(&batch, 0, &mut out), 0);
        assert_eq!(match_batch(&batch, 2, &mut out), 1);
        assert!(batch[2].is_processing());
    }

    #[test]
    fn test_skips_non_processing() {
        let idle = Arc::new(PlayerRequest::new("idle", 50, 5, "x"));
        let batch = vec![idle.clone(), claimed("b", 51, 5)];
        let mut out = Vec::new();

        assert_eq!(match_batch(&batch, 2, &mut out), 0);
        assert_eq!(idle.state(), RequestState::Initial);
    }

    #[test]
    fn test_kernels_agree() {
        let make = || -> Vec<Arc<PlayerRequest>> {
            (0..97)
                .map(|i| {
                    let score = ((i * 37) % 100) + 1;
                    let range = (i % 7) + 1;
                    claimed(&format!("p{i}"), score, range)
                })
                .collect()
        };

        let chunked = make();
        let scalar = make();
        let mut out_chunked = Vec::new();
        let mut out_scalar = Vec::new();

        match_batch_with(Kernel::Chunked, &chunked, chunked.len(), &mut out_chunked);
        match_batch_with(Kernel::Scalar, &scalar, scalar.len(), &mut out_scalar);

        assert!(!out_chunked.is_empty());
        assert_eq!(names(&out_chunked), names(&out_scalar));
    }

    #[test]
    fn test_wide_window_crosses_chunks() {
        // The only compatible partner sits past the first full chunk
        let mut batch: Vec<_> = (0..LANES as i32 + 3)
            .map(|i| claimed(&format!("n{i}"), 10 + i, 0))
            .collect();
        batch.push(claimed("anchor", 1, 40));
        batch.push(claimed("far", 30, 40));
        let mut out = Vec::new();

        match_batch(&batch, batch.len(), &mut out);
        assert_eq!(names(&out), vec![("far".to_string(), "anchor".to_string())]);
    }

    #[test]
    fn test_cross_batch() {
        let left = vec![claimed("l1", 19, 3), claimed("l2", 5, 1)];
        let right = vec![claimed("r1", 21, 3), claimed("r2", 40, 3)];
        let mut out = Vec::new();

        assert_eq!(match_cross_batch(&left, &right, &mut out), 1);
        assert_eq!(names(&out), vec![("r1".to_string(), "l1".to_string())]);
        assert!(left[1].is_processing());
        assert!(right[1].is_processing());
    }

    #[test]
    fn test_cross_batch_lower_window() {
        let left = vec![claimed("l", 30, 5)];
        let right = vec![claimed("r", 27, 4)];
        let mut out = Vec::new();

        assert_eq!(match_cross_batch(&left, &right, &mut out), 1);
    }

    #[test]
    fn test_cross_batch_never_pairs_self() {
        let shared = claimed("same", 50, 5);
        let mut out = Vec::new();

        assert_eq!(
            match_cross_batch(&[shared.clone()], &[shared.clone()], &mut out),
            0
        );
        assert!(shared.is_processing());
    }
}
