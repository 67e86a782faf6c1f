//! Per-thread bookkeeping shared by concurrent evaluations.
//!
//! - [`InFlightThreads`]: last message per thread wins. Starting an
//!   evaluation cancels the token of any older evaluation still running in
//!   the same thread.
//! - [`SeenMessages`]: message IDs that already produced a response, kept
//!   for a retention TTL so at-least-once redelivery is a no-op.
//! - [`EngagedThreads`]: threads the bot has answered in, which keep
//!   passing the mention-only short-circuit until their TTL runs out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

fn thread_slot(channel_id: &str, thread_key: &str) -> (String, String) {
    (channel_id.to_string(), thread_key.to_string())
}

/// Evaluations currently running, one token per thread.
#[derive(Debug, Default)]
pub struct InFlightThreads {
    next_seq: AtomicU64,
    active: DashMap<(String, String), (u64, CancellationToken)>,
}

impl InFlightThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new evaluation for a thread, superseding any older one.
    pub fn begin(&self, channel_id: &str, thread_key: &str) -> InFlightGuard<'_> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let slot = thread_slot(channel_id, thread_key);
        if let Some((previous_seq, previous)) = self.active.insert(slot.clone(), (seq, token.clone())) {
            tracing::debug!(
                channel_id,
                thread_key,
                superseded = previous_seq,
                by = seq,
                "newer message superseded in-flight evaluation"
            );
            previous.cancel();
        }
        InFlightGuard {
            owner: self,
            slot,
            seq,
            token,
        }
    }

    /// Number of threads with an evaluation in flight.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Held by one evaluation for its lifetime. Dropping it unregisters the
/// evaluation unless a newer one already replaced it.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlightThreads,
    slot: (String, String),
    seq: u64,
    token: CancellationToken,
}

impl InFlightGuard<'_> {
    /// Whether a newer message in the same thread has arrived.
    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let seq = self.seq;
        self.owner
            .active
            .remove_if(&self.slot, |_, (active_seq, _)| *active_seq == seq);
    }
}

/// Message IDs that already produced a response.
#[derive(Debug)]
pub struct SeenMessages {
    ttl: Duration,
    seen: DashMap<String, DateTime<Utc>>,
}

impl SeenMessages {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Whether `message_id` responded within the retention TTL.
    pub fn contains(&self, message_id: &str, now: DateTime<Utc>) -> bool {
        self.seen
            .get(message_id)
            .is_some_and(|at| !self.expired(*at, now))
    }

    /// Claim `message_id` for a response. Returns `false` if it is already
    /// claimed and still retained.
    pub fn claim(&self, message_id: &str, now: DateTime<Utc>) -> bool {
        self.purge_expired(now);
        match self.seen.entry(message_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if self.expired(*entry.get(), now) {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Undo a claim whose response was not committed.
    pub fn release(&self, message_id: &str) {
        self.seen.remove(message_id);
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, at| !self.expired(*at, now));
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn expired(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - at).to_std().is_ok_and(|age| age > self.ttl)
    }
}

/// Threads the bot has responded in, each kept for a TTL after its latest
/// response.
///
/// Ages are measured between message timestamps, like cooldowns.
#[derive(Debug)]
pub struct EngagedThreads {
    ttl: Duration,
    threads: DashMap<(String, String), DateTime<Utc>>,
}

impl EngagedThreads {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            threads: DashMap::new(),
        }
    }

    /// Record a response in a thread at `at`, purging threads that went
    /// quiet longer than the TTL before it.
    pub fn mark(&self, channel_id: &str, thread_key: &str, at: DateTime<Utc>) {
        self.purge_expired(at);
        self.threads
            .entry(thread_slot(channel_id, thread_key))
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
    }

    /// Whether the bot responded in the thread within the TTL of `at`.
    pub fn contains(&self, channel_id: &str, thread_key: &str, at: DateTime<Utc>) -> bool {
        self.threads
            .get(&thread_slot(channel_id, thread_key))
            .is_some_and(|last| !self.expired(*last, at))
    }

    /// Drop threads whose latest response is older than the TTL. Returns
    /// how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.threads.len();
        self.threads.retain(|_, last| !self.expired(*last, now));
        before.saturating_sub(self.threads.len())
    }

    /// Forget every engaged thread. Returns how many were tracked.
    pub fn clear(&self) -> usize {
        let cleared = self.threads.len();
        self.threads.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    fn expired(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - last).to_std().is_ok_and(|age| age > self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn newer_evaluation_supersedes_older() {
        let threads = InFlightThreads::new();
        let first = threads.begin("C1", "T1");
        assert!(!first.is_superseded());

        let second = threads.begin("C1", "T1");
        assert!(first.is_superseded());
        assert!(!second.is_superseded());
        assert_eq!(threads.len(), 1);
    }

    #[test]
    fn other_threads_are_not_superseded() {
        let threads = InFlightThreads::new();
        let first = threads.begin("C1", "T1");
        let _other = threads.begin("C1", "T2");
        let _other_channel = threads.begin("C2", "T1");
        assert!(!first.is_superseded());
        assert_eq!(threads.len(), 3);
    }

    #[test]
    fn dropping_superseded_guard_keeps_newer_registration() {
        let threads = InFlightThreads::new();
        let first = threads.begin("C1", "T1");
        let second = threads.begin("C1", "T1");
        drop(first);
        assert_eq!(threads.len(), 1);
        drop(second);
        assert!(threads.is_empty());
    }

    #[test]
    fn seen_claim_is_exclusive_within_ttl() {
        let seen = SeenMessages::new(Duration::from_secs(3_600));
        assert!(seen.claim("m1", t(0)));
        assert!(!seen.claim("m1", t(10)));
        assert!(seen.contains("m1", t(10)));
    }

    #[test]
    fn seen_entries_expire_after_ttl() {
        let seen = SeenMessages::new(Duration::from_secs(60));
        assert!(seen.claim("m1", t(0)));
        assert!(!seen.contains("m1", t(61)));
        assert!(seen.claim("m1", t(61)));
    }

    #[test]
    fn seen_release_and_purge() {
        let seen = SeenMessages::new(Duration::from_secs(60));
        seen.claim("m1", t(0));
        seen.release("m1");
        assert!(seen.is_empty());

        seen.claim("m2", t(0));
        seen.claim("m3", t(50));
        assert_eq!(seen.purge_expired(t(100)), 1);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn engaged_threads_clear_reports_count() {
        let engaged = EngagedThreads::new(Duration::from_secs(3_600));
        engaged.mark("C1", "T1", t(0));
        engaged.mark("C1", "T1", t(5));
        engaged.mark("C1", "T2", t(10));
        assert!(engaged.contains("C1", "T1", t(10)));
        assert!(!engaged.contains("C2", "T1", t(10)));
        assert_eq!(engaged.clear(), 2);
        assert!(engaged.is_empty());
    }

    #[test]
    fn engaged_threads_expire_and_are_purged() {
        let engaged = EngagedThreads::new(Duration::from_secs(60));
        engaged.mark("C1", "T1", t(0));
        engaged.mark("C1", "T2", t(30));
        assert!(engaged.contains("C1", "T1", t(60)));
        assert!(!engaged.contains("C1", "T1", t(61)));

        // A later response purges T1; T2 is still inside its TTL.
        engaged.mark("C1", "T3", t(80));
        assert_eq!(engaged.len(), 2);
        assert!(engaged.contains("C1", "T2", t(80)));

        // An out-of-order mark never shortens a thread's engagement.
        engaged.mark("C1", "T3", t(70));
        assert!(engaged.contains("C1", "T3", t(140)));
        assert_eq!(engaged.purge_expired(t(200)), 2);
        assert!(engaged.is_empty());
    }
}
