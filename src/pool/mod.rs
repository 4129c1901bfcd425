//! Cooldown-aware pool of API credentials shared by every generation call in the process.
//!
//! One `Arc<CredentialPool>` is built at startup and injected wherever generation happens.
//! All bookkeeping sits behind a single mutex, so `pick` and the `mark_*` calls are atomic
//! with respect to each other.

pub mod clock;
pub mod retry_delay;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry_delay::parse_retry_delay;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub const ENV_API_KEYS: &str = "GEMINI_API_KEYS";
pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_DEFAULT_COOLDOWN: &str = "GEMINI_DEFAULT_COOLDOWN";
pub const ENV_TRANSIENT_COOLDOWN: &str = "GEMINI_TRANSIENT_COOLDOWN";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no credentials configured")]
    NoCredentials,

    #[error("all {total} credential(s) are permanently failed")]
    Exhausted { total: usize },
}

/// Index of a credential in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CredentialId(usize);

impl CredentialId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key#{}", self.0)
    }
}

/// A secret handed to the generator. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Credential(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        write!(f, "Credential(***{tail})")
    }
}

/// Cooldown windows applied by the `mark_*` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Used by `mark_quota_exhausted` when the error text carries no retry hint
    pub default_cooldown: Duration,
    /// Used by `mark_transient_error`
    pub transient_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_cooldown: Duration::from_secs(60),
            transient_cooldown: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Reads `GEMINI_DEFAULT_COOLDOWN` / `GEMINI_TRANSIENT_COOLDOWN` (seconds), keeping defaults
    /// for unset or malformed values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|raw| match raw.trim().parse::<u64>() {
                    Ok(secs) => Some(Duration::from_secs(secs)),
                    Err(err) => {
                        log::warn!("ignoring {key}={raw:?}: {err}");
                        None
                    }
                })
                .unwrap_or(fallback)
        };
        Self {
            default_cooldown: secs(ENV_DEFAULT_COOLDOWN, defaults.default_cooldown),
            transient_cooldown: secs(ENV_TRANSIENT_COOLDOWN, defaults.transient_cooldown),
        }
    }
}

/// Read-only snapshot returned by [`CredentialPool::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub failed: Vec<CredentialId>,
    /// Remaining cooldown in whole seconds, rounded up, for every cooling credential
    pub cooldowns: BTreeMap<CredentialId, u64>,
    /// Last credential handed out by `pick`
    pub current: Option<CredentialId>,
}

#[derive(Debug)]
struct CredentialRecord {
    id: CredentialId,
    secret: Credential,
    cooldown_until: Option<DateTime<Utc>>,
    permanently_failed: bool,
    last_pick: Option<u64>,
}

impl CredentialRecord {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.permanently_failed && self.cooldown_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug)]
struct PoolState {
    records: Vec<CredentialRecord>,
    current: Option<CredentialId>,
    picks: u64,
}

pub struct CredentialPool {
    state: Mutex<PoolState>,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

impl CredentialPool {
    /// Builds a pool from raw secrets in declaration order. Blank entries are skipped.
    pub fn new<I, S>(secrets: I, config: PoolConfig) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records: Vec<CredentialRecord> = secrets
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(index, secret)| CredentialRecord {
                id: CredentialId(index),
                secret: Credential(secret),
                cooldown_until: None,
                permanently_failed: false,
                last_pick: None,
            })
            .collect();

        if records.is_empty() {
            return Err(PoolError::NoCredentials);
        }
        log::info!("credential pool initialized with {} key(s)", records.len());

        Ok(Self {
            state: Mutex::new(PoolState {
                records,
                current: None,
                picks: 0,
            }),
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the wall clock, typically with a [`ManualClock`] in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reads keys from `GEMINI_API_KEYS` (comma separated) or, failing that, `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PoolError> {
        let keys: Vec<String> = lookup(ENV_API_KEYS)
            .filter(|raw| !raw.trim().is_empty())
            .or_else(|| lookup(ENV_API_KEY))
            .map(|raw| raw.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        Self::new(keys, PoolConfig::from_lookup(&lookup))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Hands out a credential.
    ///
    /// Prefers available credentials, least recently picked first (never-picked ones in
    /// declaration order). When every usable credential is cooling down, the one whose cooldown
    /// ends soonest is returned anyway; the call never blocks. Fails only when every credential
    /// is permanently failed.
    pub fn pick(&self) -> Result<(Credential, CredentialId), PoolError> {
        let now = self.clock.now();
        let mut state = self.lock();

        let index = match state
            .records
            .iter()
            .filter(|r| r.is_available(now))
            .min_by_key(|r| r.last_pick)
        {
            Some(record) => record.id.0,
            None => {
                let soonest = state
                    .records
                    .iter()
                    .filter(|r| !r.permanently_failed)
                    .min_by_key(|r| r.cooldown_until)
                    .ok_or(PoolError::Exhausted {
                        total: state.records.len(),
                    })?;
                log::warn!(
                    "all credentials cooling down, using {} (cooldown ends {:?})",
                    soonest.id,
                    soonest.cooldown_until
                );
                soonest.id.0
            }
        };

        state.picks += 1;
        let pick = state.picks;
        let record = &mut state.records[index];
        record.last_pick = Some(pick);
        let picked = (record.secret.clone(), record.id);
        state.current = Some(picked.1);
        log::debug!("picked credential {}", picked.1);
        Ok(picked)
    }

    /// Cools `id` down for the delay hinted in `error_text`, or the default cooldown.
    pub fn mark_quota_exhausted(&self, id: CredentialId, error_text: &str) {
        let delay = parse_retry_delay(error_text).unwrap_or(self.config.default_cooldown);
        log::warn!("{} quota exhausted, cooling down for {}s", id, delay.as_secs());
        self.cool_down(id, delay);
    }

    pub fn mark_transient_error(&self, id: CredentialId) {
        let delay = self.config.transient_cooldown;
        log::warn!("{} hit a transient error, cooling down for {}s", id, delay.as_secs());
        self.cool_down(id, delay);
    }

    /// Excludes `id` until [`reset_all`](Self::reset_all).
    pub fn mark_permanent_fail(&self, id: CredentialId) {
        let mut state = self.lock();
        match state.records.get_mut(id.0) {
            Some(record) => {
                record.permanently_failed = true;
                record.cooldown_until = None;
                log::warn!("{} marked as permanently failed", id);
            }
            None => log::warn!("ignoring permanent failure for unknown credential {}", id),
        }
    }

    /// Clears every permanent-failure flag. Cooldowns are left untouched.
    pub fn reset_all(&self) {
        let mut state = self.lock();
        for record in &mut state.records {
            record.permanently_failed = false;
        }
        log::info!("credential pool reset: {} key(s) re-enabled", state.records.len());
    }

    pub fn status(&self) -> PoolStatus {
        let now = self.clock.now();
        let state = self.lock();
        let failed = state
            .records
            .iter()
            .filter(|r| r.permanently_failed)
            .map(|r| r.id)
            .collect();
        let cooldowns = state
            .records
            .iter()
            .filter(|r| !r.permanently_failed)
            .filter_map(|r| {
                let remaining_ms = (r.cooldown_until? - now).num_milliseconds();
                (remaining_ms > 0).then(|| (r.id, (remaining_ms as u64).div_ceil(1000)))
            })
            .collect();

        PoolStatus {
            total: state.records.len(),
            available: state.records.iter().filter(|r| r.is_available(now)).count(),
            failed,
            cooldowns,
            current: state.current,
        }
    }

    fn cool_down(&self, id: CredentialId, delay: Duration) {
        let now = self.clock.now();
        let until = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.lock();
        match state.records.get_mut(id.0) {
            Some(record) => record.cooldown_until = Some(until),
            None => log::warn!("ignoring cooldown for unknown credential {}", id),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
