//! Per-channel (and optionally per-thread) response cooldowns.
//!
//! Cooldown state lives in a `DashMap` keyed by channel. Thread logs are
//! stored inside the channel record, so one entry guard covers both and
//! [`CooldownTracker::try_commit`] is a single critical section per channel.
//!
//! Elapsed time is measured between message timestamps, not wall-clock
//! arrival, so replays and out-of-order delivery give the same answer. A
//! response is blocked when *any* committed response lies within the window
//! of its timestamp, earlier or later.
//!
//! Logs keep only the responses within a retention horizon of the newest
//! one. A message older than everything retained cannot be proven clear of
//! the pruned responses and is treated as inside the window.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// How long committed responses are remembered when the caller does not
/// choose.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Cooldown windows in effect for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub channel: Duration,
    pub thread: Option<Duration>,
}

impl CooldownPolicy {
    fn widest(&self) -> Duration {
        self.channel.max(self.thread.unwrap_or_default())
    }
}

/// Why [`CooldownTracker::try_commit`] refused a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitError {
    /// Another response lies inside the window; carries the time left.
    Cooling(Duration),
    /// The caller's gate said no while the channel entry was held.
    Withdrawn,
}

/// Committed response timestamps, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
struct ResponseLog {
    stamps: Vec<DateTime<Utc>>,
    /// Newest timestamp dropped by pruning.
    horizon: Option<DateTime<Utc>>,
}

impl ResponseLog {
    fn remaining(&self, at: DateTime<Utc>, window: Duration) -> Option<Duration> {
        if window.is_zero() {
            return None;
        }
        let pruned = self.horizon.and_then(|horizon| beyond_horizon(horizon, at, window));
        self.stamps
            .iter()
            .filter_map(|stamp| remaining_in(*stamp, at, window))
            .chain(pruned)
            .max()
    }

    fn record(&mut self, at: DateTime<Utc>, retention: Duration) {
        let index = self.stamps.partition_point(|stamp| *stamp <= at);
        self.stamps.insert(index, at);

        let Some(cutoff) = self.newest().and_then(|newest| retention_cutoff(newest, retention)) else {
            return;
        };
        let stale = self.stamps.partition_point(|stamp| *stamp < cutoff);
        if stale > 0 {
            self.horizon = self.horizon.max(Some(self.stamps[stale - 1]));
            self.stamps.drain(..stale);
        }
    }

    fn newest(&self) -> Option<DateTime<Utc>> {
        self.stamps.last().copied()
    }
}

/// Response bookkeeping for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownRecord {
    /// Newest committed response timestamp. Never moves backwards.
    pub last_response: DateTime<Utc>,
    /// Responses committed in this channel since startup.
    pub count: u64,
    responses: ResponseLog,
    threads: HashMap<String, ResponseLog>,
    /// Newest timestamp of any thread log dropped entirely.
    thread_horizon: Option<DateTime<Utc>>,
}

impl CooldownRecord {
    fn empty(at: DateTime<Utc>) -> Self {
        Self {
            last_response: at,
            count: 0,
            responses: ResponseLog::default(),
            threads: HashMap::new(),
            thread_horizon: None,
        }
    }

    /// Responses still inside the retention horizon.
    pub fn retained_responses(&self) -> usize {
        self.responses.stamps.len()
    }

    /// Threads with a per-thread log.
    pub fn tracked_threads(&self) -> usize {
        self.threads.len()
    }

    fn remaining(&self, thread_key: &str, at: DateTime<Utc>, policy: &CooldownPolicy) -> Option<Duration> {
        let channel = self.responses.remaining(at, policy.channel);
        let thread = policy.thread.and_then(|window| match self.threads.get(thread_key) {
            Some(log) => log.remaining(at, window),
            None if window.is_zero() => None,
            None => self
                .thread_horizon
                .and_then(|horizon| beyond_horizon(horizon, at, window)),
        });
        channel.into_iter().chain(thread).max()
    }

    fn record(&mut self, thread_key: &str, at: DateTime<Utc>, policy: &CooldownPolicy, retention: Duration) {
        let retention = retention.max(policy.widest());
        self.responses.record(at, retention);
        self.last_response = self.last_response.max(at);
        self.count += 1;
        if policy.thread.is_some() {
            self.threads
                .entry(thread_key.to_string())
                .or_default()
                .record(at, retention);
        }
        self.prune_threads(retention);
    }

    fn prune_threads(&mut self, retention: Duration) {
        let Some(cutoff) = retention_cutoff(self.last_response, retention) else {
            return;
        };
        let mut horizon = self.thread_horizon;
        self.threads.retain(|_, log| match log.newest() {
            Some(newest) if newest >= cutoff => true,
            newest => {
                horizon = horizon.max(newest).max(log.horizon);
                false
            }
        });
        self.thread_horizon = horizon;
    }
}

/// Process-wide cooldown state, written only by the decision engine.
#[derive(Debug)]
pub struct CooldownTracker {
    retention: Duration,
    channels: DashMap<String, CooldownRecord>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember committed responses for at least `retention` behind the
    /// newest one (never less than the widest cooldown window).
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention,
            channels: DashMap::new(),
        }
    }

    /// Read-only pre-check. Returns the remaining cooldown when blocked.
    pub fn check(
        &self,
        channel_id: &str,
        thread_key: &str,
        at: DateTime<Utc>,
        policy: &CooldownPolicy,
    ) -> Result<(), Duration> {
        match self.channels.get(channel_id) {
            Some(record) => match record.remaining(thread_key, at, policy) {
                Some(remaining) => Err(remaining),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Re-check and record a response atomically.
    ///
    /// Holds the channel's entry for the whole check-and-update, so two
    /// concurrent commits in one channel cannot both succeed inside the
    /// window. `admit` runs under the same entry guard after the window
    /// check; returning `false` withdraws the commit without recording it.
    /// Returns the channel's new response count.
    pub fn try_commit<F>(
        &self,
        channel_id: &str,
        thread_key: &str,
        at: DateTime<Utc>,
        policy: &CooldownPolicy,
        admit: F,
    ) -> Result<u64, CommitError>
    where
        F: FnOnce() -> bool,
    {
        match self.channels.entry(channel_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if let Some(remaining) = entry.get().remaining(thread_key, at, policy) {
                    return Err(CommitError::Cooling(remaining));
                }
                if !admit() {
                    return Err(CommitError::Withdrawn);
                }
                let record = entry.get_mut();
                record.record(thread_key, at, policy, self.retention);
                Ok(record.count)
            }
            Entry::Vacant(entry) => {
                if !admit() {
                    return Err(CommitError::Withdrawn);
                }
                let mut record = CooldownRecord::empty(at);
                record.record(thread_key, at, policy, self.retention);
                Ok(entry.insert(record).count)
            }
        }
    }

    /// Copy of a channel's record, if it has responded.
    pub fn snapshot(&self, channel_id: &str) -> Option<CooldownRecord> {
        self.channels.get(channel_id).map(|r| r.value().clone())
    }

    /// Forget all cooldown state.
    pub fn reset_all(&self) {
        self.channels.clear();
    }
}

fn remaining_in(last: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> Option<Duration> {
    let elapsed = (at - last).abs().to_std().unwrap_or(Duration::MAX);
    (elapsed < window).then(|| window - elapsed)
}

/// Pruned responses all sit at or before `horizon`; anything earlier than
/// it may have had a neighbour there.
fn beyond_horizon(horizon: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> Option<Duration> {
    if at < horizon {
        Some(window)
    } else {
        remaining_in(horizon, at, window)
    }
}

fn retention_cutoff(newest: DateTime<Utc>, retention: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| newest.checked_sub_signed(retention))
}

/// Whole seconds left, rounded up so a blocked caller never sees zero.
pub fn ceil_secs(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::tracking::InFlightThreads;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn policy(channel: u64, thread: Option<u64>) -> CooldownPolicy {
        CooldownPolicy {
            channel: Duration::from_secs(channel),
            thread: thread.map(Duration::from_secs),
        }
    }

    fn commit(tracker: &CooldownTracker, thread: &str, at: i64, p: &CooldownPolicy) -> Result<u64, CommitError> {
        tracker.try_commit("C1", thread, t(at), p, || true)
    }

    fn cooling(secs: u64) -> CommitError {
        CommitError::Cooling(Duration::from_secs(secs))
    }

    #[test]
    fn first_response_is_allowed() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        assert!(tracker.check("C1", "T1", t(0), &p).is_ok());
        assert_eq!(commit(&tracker, "T1", 0, &p), Ok(1));
    }

    #[test]
    fn second_response_inside_window_is_blocked() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        commit(&tracker, "T1", 0, &p).unwrap();

        assert_eq!(tracker.check("C1", "T2", t(2), &p), Err(Duration::from_secs(58)));
        assert_eq!(commit(&tracker, "T2", 2, &p), Err(cooling(58)));
        assert_eq!(commit(&tracker, "T2", 60, &p), Ok(2));
    }

    #[test]
    fn channels_are_independent() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        commit(&tracker, "T1", 0, &p).unwrap();
        assert!(tracker.try_commit("C2", "T1", t(1), &p, || true).is_ok());
    }

    #[test]
    fn out_of_order_timestamps_still_respect_window() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        commit(&tracker, "T1", 100, &p).unwrap();
        assert!(tracker.check("C1", "T1", t(70), &p).is_err());
    }

    #[test]
    fn late_message_between_two_responses_is_blocked_by_the_earlier_one() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        commit(&tracker, "T1", 0, &p).unwrap();
        commit(&tracker, "T2", 100, &p).unwrap();

        // 70 s after the newest response but only 30 s after the first.
        assert_eq!(tracker.check("C1", "T3", t(30), &p), Err(Duration::from_secs(30)));
        assert_eq!(commit(&tracker, "T3", 30, &p), Err(cooling(30)));

        let record = tracker.snapshot("C1").unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.last_response, t(100));
    }

    #[test]
    fn late_commit_never_moves_last_response_backwards() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        commit(&tracker, "T1", 200, &p).unwrap();
        assert_eq!(commit(&tracker, "T2", 100, &p), Ok(2));

        let record = tracker.snapshot("C1").unwrap();
        assert_eq!(record.last_response, t(200));
        // Both neighbours now guard the gap between them.
        assert_eq!(tracker.check("C1", "T3", t(150), &p), Err(Duration::from_secs(10)));
    }

    #[test]
    fn messages_older_than_retained_history_are_blocked() {
        let tracker = CooldownTracker::with_retention(Duration::from_secs(120));
        let p = policy(60, None);
        for at in [0, 100, 200, 300] {
            commit(&tracker, "T1", at, &p).unwrap();
        }
        assert_eq!(tracker.snapshot("C1").unwrap().retained_responses(), 2);

        // t50 and t130 may neighbour pruned responses; t250 does not.
        assert_eq!(commit(&tracker, "T2", 50, &p), Err(cooling(60)));
        assert_eq!(tracker.check("C1", "T2", t(130), &p), Err(Duration::from_secs(30)));
        assert_eq!(tracker.check("C1", "T2", t(250), &p), Err(Duration::from_secs(10)));
        assert!(tracker.check("C1", "T2", t(360), &p).is_ok());
    }

    #[test]
    fn thread_cooldown_applies_on_top_of_channel() {
        let tracker = CooldownTracker::new();
        let p = policy(10, Some(300));
        commit(&tracker, "T1", 0, &p).unwrap();

        // Channel window passed; the thread is still cooling down.
        assert_eq!(tracker.check("C1", "T1", t(20), &p), Err(Duration::from_secs(280)));
        // Another thread only sees the channel window.
        assert!(tracker.check("C1", "T2", t(20), &p).is_ok());
    }

    #[test]
    fn thread_logs_are_skipped_without_policy_and_pruned_with_one() {
        let tracker = CooldownTracker::with_retention(Duration::from_secs(120));
        let without = policy(10, None);
        for (i, at) in [0, 20, 40].into_iter().enumerate() {
            commit(&tracker, &format!("T{i}"), at, &without).unwrap();
        }
        assert_eq!(tracker.snapshot("C1").unwrap().tracked_threads(), 0);

        let tracker = CooldownTracker::with_retention(Duration::from_secs(120));
        let with = policy(10, Some(30));
        commit(&tracker, "T1", 0, &with).unwrap();
        commit(&tracker, "T2", 200, &with).unwrap();
        assert_eq!(tracker.snapshot("C1").unwrap().tracked_threads(), 1);

        // T1's log is gone, but a late T1 message near its response is
        // still held back.
        assert_eq!(tracker.check("C1", "T1", t(10), &with), Err(Duration::from_secs(20)));
        assert!(tracker.check("C1", "T1", t(215), &with).is_ok());
    }

    #[test]
    fn zero_cooldown_never_blocks() {
        let tracker = CooldownTracker::new();
        let p = policy(0, None);
        commit(&tracker, "T1", 0, &p).unwrap();
        assert_eq!(commit(&tracker, "T1", 0, &p), Ok(2));
        assert_eq!(tracker.snapshot("C1").unwrap().count, 2);
    }

    #[test]
    fn withdrawn_commit_records_nothing() {
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        assert_eq!(
            tracker.try_commit("C1", "T1", t(0), &p, || false),
            Err(CommitError::Withdrawn)
        );
        assert!(tracker.snapshot("C1").is_none());

        commit(&tracker, "T1", 0, &p).unwrap();
        // The window check runs first; the gate is never consulted.
        assert_eq!(
            tracker.try_commit("C1", "T2", t(1), &p, || panic!("gate consulted")),
            Err(cooling(59))
        );
        assert_eq!(
            tracker.try_commit("C1", "T2", t(90), &p, || false),
            Err(CommitError::Withdrawn)
        );
        assert_eq!(tracker.snapshot("C1").unwrap().count, 1);
    }

    #[test]
    fn superseded_evaluation_cannot_commit() {
        let in_flight = InFlightThreads::new();
        let tracker = CooldownTracker::new();
        let p = policy(60, None);
        let older = in_flight.begin("C1", "T1");
        let newer = in_flight.begin("C1", "T1");

        assert_eq!(
            tracker.try_commit("C1", "T1", t(0), &p, || !older.is_superseded()),
            Err(CommitError::Withdrawn)
        );
        assert_eq!(
            tracker.try_commit("C1", "T1", t(1), &p, || !newer.is_superseded()),
            Ok(1)
        );
        assert_eq!(tracker.snapshot("C1").unwrap().last_response, t(1));
    }

    #[test]
    fn ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(58_001)), 59);
        assert_eq!(ceil_secs(Duration::from_secs(58)), 58);
    }

    #[test]
    fn concurrent_commits_admit_exactly_one() {
        let tracker = Arc::new(CooldownTracker::new());
        let p = policy(60, None);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    tracker
                        .try_commit("C1", &format!("T{i}"), t(i), &p, || true)
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(tracker.snapshot("C1").unwrap().count, 1);
    }
}
