//! Score-partitioned bucket store
//!
//! Each bucket covers `bucket_size` consecutive scores and owns a bounded
//! lock-free queue plus an exclusive-access flag. Whoever wins the flag is the
//! only thread allowed to drain and match that bucket until the returned
//! [`BucketGuard`] is dropped. Producers never take the flag.
//!
//! Capacity is counted in slots, not queue entries. A request holds its slot
//! from the moment it is accepted until it is settled, including the time it
//! spends drained for matching. Producers cannot claim the slot of a drained
//! request, so putting it back always succeeds.

use crossbeam_queue::ArrayQueue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{MatchingError, Result};
use crate::request::PlayerRequest;

/// Shared handle to a request; buckets, batches and pairs all point at the same one
pub type RequestRef = Arc<PlayerRequest>;

/// One score range of the store
pub struct Bucket {
    index: usize,
    queue: ArrayQueue<RequestRef>,
    /// Slots held by queued requests and by drained ones not yet settled
    occupied: AtomicUsize,
    busy: AtomicBool,
    drain_buf: Mutex<Vec<RequestRef>>,
}

impl Bucket {
    fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            queue: ArrayQueue::new(capacity),
            occupied: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
            drain_buf: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Requests sitting in the queue. Drained requests are not counted.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Slots in this bucket, shared by queued and drained requests
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Slots in use, queued plus drained-but-unsettled
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    /// True while a scanner or the sweep holds the flag
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Non-blocking insert of a new request.
    ///
    /// Claims a free slot first and hands the request back when every slot is
    /// taken, whether by queued requests or by ones a scanner is matching.
    ///
    /// # Example
    ///
    /// ```
    /// use matchmaking::bucket::BucketStore;
    /// use matchmaking::PlayerRequest;
    /// use std::sync::Arc;
    ///
    /// let store = BucketStore::new(10, 100, 1).unwrap();
    /// let bucket = store.bucket_for(42);
    /// assert!(bucket.push(Arc::new(PlayerRequest::new("ann", 42, 3, "ws-1"))).is_ok());
    /// assert!(bucket.push(Arc::new(PlayerRequest::new("bob", 44, 3, "ws-2"))).is_err());
    /// ```
    pub fn push(&self, req: RequestRef) -> std::result::Result<(), RequestRef> {
        let capacity = self.queue.capacity();
        let reserved = self
            .occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return Err(req);
        }

        self.queue.push(req).map_err(|req| {
            self.release();
            req
        })
    }

    /// Put a drained request back into the slot it still holds
    pub(crate) fn requeue(&self, req: RequestRef) -> std::result::Result<(), RequestRef> {
        self.queue.push(req)
    }

    /// Free the slot of a drained request that is leaving the bucket
    pub(crate) fn release(&self) {
        self.occupied.fetch_sub(1, Ordering::AcqRel);
    }

    /// Requests still referenced by the drain buffer
    pub(crate) fn buffered(&self) -> usize {
        self.drain_buf.lock().len()
    }

    /// Claim exclusive access. Returns `None` if another thread holds it.
    ///
    /// Scanners and the global sweep both go through this flag, so a bucket is
    /// never drained by two of them at once.
    pub fn try_acquire(&self) -> Option<BucketGuard<'_>> {
        if self.busy.load(Ordering::Acquire) {
            return None;
        }
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BucketGuard { bucket: self })
    }
}

/// Exclusive access to one bucket; released on drop
pub struct BucketGuard<'a> {
    bucket: &'a Bucket,
}

impl<'a> BucketGuard<'a> {
    pub fn bucket(&self) -> &'a Bucket {
        self.bucket
    }

    /// Pop up to the bucket's capacity into its preallocated drain buffer.
    ///
    /// Drained requests keep their slots. The caller clears the buffer once
    /// every request in it has been requeued or released.
    pub fn drain(&self) -> MutexGuard<'a, Vec<RequestRef>> {
        let mut buf = self.bucket.drain_buf.lock();
        buf.clear();
        let limit = buf.capacity();
        while buf.len() < limit {
            match self.bucket.queue.pop() {
                Some(req) => buf.push(req),
                None => break,
            }
        }
        buf
    }

    /// Pop everything currently queued into `out`
    pub fn drain_into(&self, out: &mut Vec<RequestRef>) -> usize {
        let before = out.len();
        while let Some(req) = self.bucket.queue.pop() {
            out.push(req);
        }
        out.len() - before
    }
}

impl Drop for BucketGuard<'_> {
    fn drop(&mut self) {
        self.bucket.busy.store(false, Ordering::Release);
    }
}

/// Fixed array of buckets covering `1..=max_score`
pub struct BucketStore {
    buckets: Vec<Bucket>,
    bucket_size: i32,
}

impl BucketStore {
    /// `ceil(max_score / bucket_size)` buckets of `capacity` slots each
    pub fn new(bucket_size: i32, max_score: i32, capacity: usize) -> Result<Self> {
        if bucket_size <= 0 {
            return Err(MatchingError::InvalidConfig(format!(
                "bucket_size must be positive, got {bucket_size}"
            )));
        }
        if max_score <= 0 {
            return Err(MatchingError::InvalidConfig(format!(
                "max_score must be positive, got {max_score}"
            )));
        }
        if capacity == 0 {
            return Err(MatchingError::InvalidConfig(
                "bucket capacity must be positive".into(),
            ));
        }

        let count = (max_score + bucket_size - 1) / bucket_size;
        let buckets = (0..count as usize)
            .map(|i| Bucket::new(i, capacity))
            .collect();

        Ok(Self {
            buckets,
            bucket_size,
        })
    }

    /// `ceil(max_score / bucket_size)`, fixed at construction
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_size(&self) -> i32 {
        self.bucket_size
    }

    /// `(score - 1) / bucket_size`, clamped into the bucket array
    pub fn bucket_index(&self, score: i32) -> usize {
        let raw = (i64::from(score) - 1).div_euclid(i64::from(self.bucket_size));
        raw.clamp(0, self.buckets.len() as i64 - 1) as usize
    }

    /// Bucket at `index`. Panics when out of range, like slice indexing.
    pub fn bucket(&self, index: usize) -> &Bucket {
        &self.buckets[index]
    }

    /// Bucket that owns `score`
    pub fn bucket_for(&self, score: i32) -> &Bucket {
        self.bucket(self.bucket_index(score))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bucket> {
        self.buckets.iter()
    }

    /// Route a request to its bucket. False when that bucket is full.
    pub fn submit(&self, req: RequestRef) -> bool {
        self.push(req).is_ok()
    }

    /// Route a request to its bucket, handing it back when that bucket is full
    pub fn push(&self, req: RequestRef) -> std::result::Result<(), RequestRef> {
        self.bucket_for(req.score()).push(req)
    }

    /// Requests queued across all buckets
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Bucket::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(score: i32) -> RequestRef {
        Arc::new(PlayerRequest::new("p", score, 1, "c"))
    }

    #[test]
    fn test_bucket_count_rounds_up() {
        assert_eq!(BucketStore::new(10, 100, 4).unwrap().num_buckets(), 10);
        assert_eq!(BucketStore::new(10, 95, 4).unwrap().num_buckets(), 10);
        assert_eq!(BucketStore::new(30, 100, 4).unwrap().num_buckets(), 4);
    }

    #[test]
    fn test_bucket_index() {
        let store = BucketStore::new(10, 100, 4).unwrap();
        assert_eq!(store.bucket_index(1), 0);
        assert_eq!(store.bucket_index(10), 0);
        assert_eq!(store.bucket_index(11), 1);
        assert_eq!(store.bucket_index(19), 1);
        assert_eq!(store.bucket_index(21), 2);
        assert_eq!(store.bucket_index(100), 9);
        // Out-of-range scores clamp to the edges
        assert_eq!(store.bucket_index(0), 0);
        assert_eq!(store.bucket_index(-40), 0);
        assert_eq!(store.bucket_index(5_000), 9);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(BucketStore::new(0, 100, 4).is_err());
        assert!(BucketStore::new(10, 0, 4).is_err());
        assert!(BucketStore::new(10, 100, 0).is_err());
    }

    #[test]
    fn test_submit_full_bucket() {
        let store = BucketStore::new(10, 100, 2).unwrap();
        assert!(store.submit(req(5)));
        assert!(store.submit(req(6)));
        assert!(!store.submit(req(7)));
        // Other buckets are unaffected
        assert!(store.submit(req(15)));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_guard_is_exclusive() {
        let store = BucketStore::new(10, 100, 4).unwrap();
        let bucket = store.bucket(3);

        let guard = bucket.try_acquire().unwrap();
        assert!(bucket.is_busy());
        assert!(bucket.try_acquire().is_none());
        drop(guard);

        assert!(!bucket.is_busy());
        assert!(bucket.try_acquire().is_some());
    }

    #[test]
    fn test_drain_uses_buffer() {
        let store = BucketStore::new(10, 100, 3).unwrap();
        for s in [1, 2, 3] {
            store.submit(req(s));
        }

        let guard = store.bucket(0).try_acquire().unwrap();
        let buf = guard.drain();
        assert_eq!(buf.len(), 3);
        assert!(store.bucket(0).is_empty());
    }

    #[test]
    fn test_drained_requests_keep_their_slots() {
        let store = BucketStore::new(10, 100, 2).unwrap();
        let bucket = store.bucket(0);
        assert!(store.submit(req(1)));
        assert!(store.submit(req(2)));

        let guard = bucket.try_acquire().unwrap();
        let mut buf = guard.drain();
        assert!(bucket.is_empty());
        assert_eq!(bucket.occupied(), 2);

        // The queue has room but both slots are still held
        assert!(!store.submit(req(3)));

        assert!(bucket.requeue(buf[0].clone()).is_ok());
        bucket.release();
        buf.clear();
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.occupied(), 1);
        assert_eq!(bucket.buffered(), 0);

        drop(buf);
        drop(guard);
        assert!(store.submit(req(4)));
        assert!(!store.submit(req(5)));
    }

    #[test]
    fn test_concurrent_push_never_overfills() {
        let store = BucketStore::new(10, 100, 32).unwrap();
        let accepted = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..20 {
                        if store.submit(req(7)) {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(accepted.load(Ordering::Relaxed), 32);
        assert_eq!(store.bucket(0).len(), 32);
        assert_eq!(store.bucket(0).occupied(), 32);
    }

    #[test]
    fn test_drain_into_appends() {
        let store = BucketStore::new(10, 100, 4).unwrap();
        store.submit(req(41));
        store.submit(req(42));

        let guard = store.bucket(4).try_acquire().unwrap();
        let mut all = vec![req(1)];
        assert_eq!(guard.drain_into(&mut all), 2);
        assert_eq!(all.len(), 3);
    }
}
