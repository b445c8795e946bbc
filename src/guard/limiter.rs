//! Sliding-window rate limiter with fixed-duration lockout.
//!
//! Flow Overview:
//! 1) `check` runs before credential verification and denies locked identifiers.
//! 2) `record_attempt` runs after a failed verification; the attempt that reaches
//!    `max_attempts` inside the window sets `locked_until = now + lockout_seconds`.
//! 3) `reset` runs after a successful verification and forgets the identifier.
//!
//! Every operation is one load -> mutate -> save cycle on the whole store. The cycle
//! runs as a single task on the blocking pool that owns the limiter's cycle lock, so
//! a caller that gives up after `store_timeout` does not release the lock early: the
//! next cycle starts only once the abandoned one has finished writing. An unavailable
//! store resolves through the `fail_open` policy instead of an error.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::config::GuardConfig;
use super::events::{EventKind, SecurityEvent, SecurityLog};
use super::identifier::IdentifierKey;
use super::store::{AttemptMap, AttemptRecord, RateLimitStore, StoreError};

const UNAVAILABLE_MESSAGE: &str = "Login is temporarily unavailable, please try again later";

/// Answer of the limiter for one identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Failed attempts left before the identifier locks.
    pub remaining: u32,
    /// Unix seconds at which the current restriction lifts: `locked_until` while
    /// locked, otherwise when the oldest live attempt leaves the window.
    pub reset_time: i64,
    pub locked: bool,
    pub message: String,
}

impl Decision {
    /// Seconds until `reset_time`, never negative.
    #[must_use]
    pub fn retry_after(&self, now: i64) -> i64 {
        self.reset_time.saturating_sub(now).max(0)
    }
}

/// Record state after one cycle, and the attempt count when the cycle locked it.
#[derive(Debug, Default)]
struct Settled {
    record: AttemptRecord,
    locked_with: Option<usize>,
}

/// What a cycle produced: `None` when the store failed before the mutation ran,
/// and the save result otherwise.
type CycleResult<T> = (Option<T>, Result<(), StoreError>);

pub struct RateLimiter {
    config: GuardConfig,
    store: Arc<dyn RateLimitStore>,
    log: Arc<SecurityLog>,
    clock: Arc<dyn Clock>,
    cycle: Arc<Mutex<()>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        config: GuardConfig,
        store: Arc<dyn RateLimitStore>,
        log: Arc<SecurityLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            log,
            clock,
            cycle: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// May this identifier attempt a login now?
    pub async fn check(&self, identifier: &str) -> Decision {
        let key = IdentifierKey::derive(identifier);
        let now = self.clock.now();
        let config = self.config.clone();
        let cycle_key = key.clone();

        let result = self
            .run_cycle(move |store| {
                let mut settled = None;
                let saved = store.update(&mut |records| {
                    let (outcome, changed) = check_record(&config, records, &cycle_key, now);
                    settled = Some(outcome);
                    changed
                });
                (settled, saved)
            })
            .await;

        let settled = match self.settled("check", result) {
            Ok(settled) => settled,
            Err(err) => return self.unavailable("check", &err, now),
        };

        let decision = decide(&self.config, &settled.record, now);
        if let Some(attempts) = settled.locked_with {
            self.log_lockout(&key, attempts, decision.reset_time).await;
        }
        decision
    }

    /// Record one failed credential check and return the updated decision.
    pub async fn record_attempt(&self, identifier: &str) -> Decision {
        let key = IdentifierKey::derive(identifier);
        let now = self.clock.now();
        let config = self.config.clone();
        let cycle_key = key.clone();

        let result = self
            .run_cycle(move |store| {
                let mut settled = None;
                let saved = store.update(&mut |records| {
                    settled = Some(record_failure(&config, records, &cycle_key, now));
                    true
                });
                (settled, saved)
            })
            .await;

        let settled = match self.settled("record_attempt", result) {
            Ok(settled) => settled,
            Err(err) => return self.unavailable("record_attempt", &err, now),
        };

        let decision = decide(&self.config, &settled.record, now);
        if let Some(attempts) = settled.locked_with {
            self.log_lockout(&key, attempts, decision.reset_time).await;
        }
        decision
    }

    /// Forget the identifier's attempts and lock. Returns `true` if a record existed.
    pub async fn reset(&self, identifier: &str) -> bool {
        let key = IdentifierKey::derive(identifier);

        let result = self
            .run_cycle(move |store| {
                let mut existed = false;
                let saved = store.update(&mut |records| {
                    existed = records.remove(&key).is_some();
                    existed
                });
                saved.map(|()| existed)
            })
            .await;

        match result {
            Ok(Ok(existed)) => existed,
            Ok(Err(err)) | Err(err) => {
                warn!("Failed to reset rate limit state: {err}");
                false
            }
        }
    }

    /// Current record for an identifier, without modifying the store.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    pub async fn inspect(&self, identifier: &str) -> Result<Option<AttemptRecord>, StoreError> {
        let key = IdentifierKey::derive(identifier);
        let records = self.run_cycle(|store| store.load()).await??;
        Ok(records.get(&key).cloned())
    }

    /// Drop records whose attempts aged out and whose lock, if any, expired.
    ///
    /// # Errors
    /// Returns an error if the store cannot be loaded or saved.
    pub async fn purge_stale(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let config = self.config.clone();

        let purged = self
            .run_cycle(move |store| {
                let mut purged = 0;
                let saved = store.update(&mut |records| {
                    let (count, changed) = purge_records(&config, records, now);
                    purged = count;
                    changed
                });
                saved.map(|()| purged)
            })
            .await??;

        debug!(purged, "purged stale rate limit records");
        Ok(purged)
    }

    /// Run `op` on the blocking pool while holding the cycle lock.
    ///
    /// The caller waits at most `store_timeout`, counting the wait for the lock. The
    /// task keeps the lock until `op` returns, even when the caller stopped waiting.
    async fn run_cycle<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn RateLimitStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let cycle = Arc::clone(&self.cycle);
        let timeout = self.config.store_timeout();

        let task = async move {
            let guard = cycle.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                op(store.as_ref())
            })
            .await
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(StoreError::Task(err.to_string())),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    /// A cycle whose mutation ran still answers from the mutated record when only
    /// the save failed; the next cycle reloads whatever was persisted.
    fn settled(
        &self,
        operation: &str,
        result: Result<CycleResult<Settled>, StoreError>,
    ) -> Result<Settled, StoreError> {
        match result? {
            (Some(settled), Ok(())) => Ok(settled),
            (Some(settled), Err(err)) => {
                warn!(operation, "Failed to persist rate limit state: {err}");
                Ok(settled)
            }
            (None, Err(err)) => Err(err),
            (None, Ok(())) => Err(StoreError::Task(format!(
                "store skipped the {operation} update"
            ))),
        }
    }

    fn unavailable(&self, operation: &str, err: &StoreError, now: i64) -> Decision {
        warn!(
            operation,
            fail_open = self.config.fail_open(),
            "Rate limit store unavailable: {err}"
        );
        if self.config.fail_open() {
            Decision {
                allowed: true,
                remaining: self.config.max_attempts(),
                reset_time: now,
                locked: false,
                message: String::new(),
            }
        } else {
            Decision {
                allowed: false,
                remaining: 0,
                reset_time: now,
                locked: false,
                message: UNAVAILABLE_MESSAGE.to_string(),
            }
        }
    }

    async fn log_lockout(&self, key: &IdentifierKey, attempts: usize, locked_until: i64) {
        let minutes = lockout_minutes(self.config.lockout_seconds());
        info!(identifier_key = %key, attempts, locked_until, "identifier locked");
        self.log
            .log(
                SecurityEvent::new(
                    EventKind::AccountLocked,
                    format!("Identifier locked for {minutes} minute(s) after {attempts} failed attempts"),
                )
                .with_context("identifier_key", key.as_str())
                .with_context("attempts", attempts)
                .with_context("locked_until", locked_until),
            )
            .await;
    }
}

/// Settle the identifier's record and lock it if it is over the limit.
/// Returns the outcome and whether the map changed.
fn check_record(
    config: &GuardConfig,
    records: &mut AttemptMap,
    key: &IdentifierKey,
    now: i64,
) -> (Settled, bool) {
    let Some(record) = records.get_mut(key) else {
        return (Settled::default(), false);
    };

    let mut changed = settle(config, record, now);
    let mut locked_with = None;
    if !record.is_locked(now) && over_limit(config, record) {
        record.locked_until = now.saturating_add(config.lockout_seconds());
        locked_with = Some(record.attempts.len());
        changed = true;
    }
    let settled = Settled {
        record: record.clone(),
        locked_with,
    };

    if record.is_empty() {
        records.remove(key);
    }
    (settled, changed)
}

fn record_failure(
    config: &GuardConfig,
    records: &mut AttemptMap,
    key: &IdentifierKey,
    now: i64,
) -> Settled {
    let record = records.entry(key.clone()).or_default();
    settle(config, record, now);
    record.attempts.push(now);

    let mut locked_with = None;
    if !record.is_locked(now) && over_limit(config, record) {
        record.locked_until = now.saturating_add(config.lockout_seconds());
        locked_with = Some(record.attempts.len());
    }
    Settled {
        record: record.clone(),
        locked_with,
    }
}

/// Returns the number of records dropped and whether the map changed.
fn purge_records(config: &GuardConfig, records: &mut AttemptMap, now: i64) -> (usize, bool) {
    let before = records.len();
    let mut changed = false;
    for record in records.values_mut() {
        changed |= settle(config, record, now);
    }
    records.retain(|_, record| !record.is_empty());
    let purged = before - records.len();
    (purged, changed || purged > 0)
}

/// Apply expiry rules: a served lock clears the record, otherwise old attempts age out.
fn settle(config: &GuardConfig, record: &mut AttemptRecord, now: i64) -> bool {
    if record.lock_served(now) {
        record.attempts.clear();
        record.locked_until = 0;
        return true;
    }
    record.prune(now, config.window_seconds())
}

fn over_limit(config: &GuardConfig, record: &AttemptRecord) -> bool {
    u32::try_from(record.attempts.len()).unwrap_or(u32::MAX) >= config.max_attempts()
}

fn decide(config: &GuardConfig, record: &AttemptRecord, now: i64) -> Decision {
    if record.is_locked(now) {
        let minutes = lockout_minutes(record.locked_until.saturating_sub(now));
        return Decision {
            allowed: false,
            remaining: 0,
            reset_time: record.locked_until,
            locked: true,
            message: format!(
                "Too many failed login attempts. Please try again in {minutes} minute(s)."
            ),
        };
    }

    let used = u32::try_from(record.attempts.len()).unwrap_or(u32::MAX);
    let remaining = config.max_attempts().saturating_sub(used);
    Decision {
        allowed: true,
        remaining,
        reset_time: record
            .attempts
            .first()
            .map_or(now, |oldest| oldest.saturating_add(config.window_seconds())),
        locked: false,
        message: format!("{remaining} attempt(s) remaining"),
    }
}

/// Whole minutes, rounded up.
fn lockout_minutes(seconds: i64) -> i64 {
    seconds.max(0).saturating_add(59) / 60
}
