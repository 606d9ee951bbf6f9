//! Precedence-ordered suppression of automated replies.
//!
//! `GatingEngine::check_permit` evaluates, first match wins:
//!
//! 1. Global pause active → denied (`global`)
//! 2. Contact pause active → denied (`contact`)
//! 3. Sleep hours active → denied (`sleep`)
//! 4. Everything else → allowed
//!
//! Every check re-reads the TTL store; nothing is cached in-process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use replyhive_memory::{get_json, set_json, Clock, StoreError, TtlStore};
use replyhive_schema::{ContactPause, GateReason, GateStatus, PauseUntil, Permit};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

pub const GLOBAL_KEY: &str = "gate:global";
pub const CONTACT_PAUSE_PREFIX: &str = "gate:contact:";
pub const SLEEP_HOURS_KEY: &str = "gate:sleep_hours";
pub const DEFERRED_KEY: &str = "gate:deferred";
pub const DEFERRED_WINDOW_KEY: &str = "gate:deferred_window";
pub const KNOWN_CONTACT_PREFIX: &str = "contact:";

const MINUTES_PER_DAY: i64 = 24 * 60;
const RESUME_HOLD_REASON: &str = "global pause lifted";

pub fn contact_pause_key(contact_id: &str) -> String {
    format!("{CONTACT_PAUSE_PREFIX}{contact_id}")
}

pub fn known_contact_key(contact_id: &str) -> String {
    format!("{KNOWN_CONTACT_PREFIX}{contact_id}")
}

// ───────────────────────────── Types ─────────────────────────────

/// Recurring local time-of-day window during which replies are withheld.
///
/// The window is `[start, end)`. When `end <= start` it crosses midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepHoursConfig {
    pub enabled: bool,
    pub start_hour: u8,
    #[serde(default)]
    pub start_minute: u8,
    pub end_hour: u8,
    #[serde(default)]
    pub end_minute: u8,
    /// Offset of local time from UTC, in minutes.
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

impl Default for SleepHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 22,
            start_minute: 0,
            end_hour: 6,
            end_minute: 0,
            tz_offset_minutes: 0,
        }
    }
}

impl SleepHoursConfig {
    pub fn validate(&self) -> Result<(), GateError> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(GateError::InvalidSleepHours(format!(
                "hours must be 0-23 (start {}, end {})",
                self.start_hour, self.end_hour
            )));
        }
        if self.start_minute > 59 || self.end_minute > 59 {
            return Err(GateError::InvalidSleepHours(format!(
                "minutes must be 0-59 (start {}, end {})",
                self.start_minute, self.end_minute
            )));
        }
        if self.tz_offset_minutes.abs() > 14 * 60 {
            return Err(GateError::InvalidSleepHours(format!(
                "timezone offset {} out of range",
                self.tz_offset_minutes
            )));
        }
        Ok(())
    }

    fn start(&self) -> i64 {
        i64::from(self.start_hour) * 60 + i64::from(self.start_minute)
    }

    fn end(&self) -> i64 {
        i64::from(self.end_hour) * 60 + i64::from(self.end_minute)
    }

    /// Minute of the local day for a UTC instant.
    pub fn local_minute(&self, now: DateTime<Utc>) -> i64 {
        let utc_minute = i64::from(now.hour()) * 60 + i64::from(now.minute());
        (utc_minute + i64::from(self.tz_offset_minutes)).rem_euclid(MINUTES_PER_DAY)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let minute = self.local_minute(now);
        let (start, end) = (self.start(), self.end());
        if end <= start {
            minute >= start || minute < end
        } else {
            start <= minute && minute < end
        }
    }
}

impl std::fmt::Display for SleepHoursConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let offset = self.tz_offset_minutes.abs();
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02} UTC{sign}{:02}:{:02} ({})",
            self.start_hour,
            self.start_minute,
            self.end_hour,
            self.end_minute,
            offset / 60,
            offset % 60,
            if self.enabled { "on" } else { "off" }
        )
    }
}

/// What happens to the deferred-message counter once a suppression window ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredCountPolicy {
    /// Zero the counter on the first allowed check after a global or sleep window.
    #[default]
    ResetOnWindowEnd,
    /// Keep counting across windows.
    Accumulate,
}

fn default_resume_hold_days() -> u32 {
    365
}

fn default_pause_all_attempts() -> u32 {
    3
}

fn default_pause_all_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub deferred_policy: DeferredCountPolicy,
    /// Length of the per-contact hold written when the global pause is lifted.
    #[serde(default = "default_resume_hold_days")]
    pub resume_hold_days: u32,
    #[serde(default = "default_pause_all_attempts")]
    pub pause_all_attempts: u32,
    #[serde(default = "default_pause_all_backoff_ms")]
    pub pause_all_backoff_ms: u64,
    /// Used until sleep hours are set through the engine.
    #[serde(default)]
    pub sleep_hours: Option<SleepHoursConfig>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            deferred_policy: DeferredCountPolicy::default(),
            resume_hold_days: default_resume_hold_days(),
            pause_all_attempts: default_pause_all_attempts(),
            pause_all_backoff_ms: default_pause_all_backoff_ms(),
            sleep_hours: None,
        }
    }
}

impl GateConfig {
    fn resume_hold(&self) -> Duration {
        Duration::from_secs(u64::from(self.resume_hold_days.max(1)) * 24 * 60 * 60)
    }
}

// ───────────────────────────── GatingEngine ─────────────────────────

pub struct GatingEngine {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    config: GateConfig,
}

impl GatingEngine {
    pub fn new(store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>, config: GateConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether an automated reply to `contact_id` is permitted now.
    ///
    /// Store failures are returned as errors; callers must treat them as a denial.
    pub async fn check_permit(&self, contact_id: &str) -> Result<Permit, GateError> {
        let now = self.clock.now();

        if self.global_pause_at(now).await?.is_some() {
            return self.deny(contact_id, GateReason::Global).await;
        }

        if self.contact_paused_at(contact_id, now).await? {
            return self.deny(contact_id, GateReason::Contact).await;
        }

        if self.sleep_hours().await?.is_active_at(now) {
            return self.deny(contact_id, GateReason::Sleep).await;
        }

        if self.config.deferred_policy == DeferredCountPolicy::ResetOnWindowEnd {
            self.close_deferred_window().await?;
        }
        Ok(Permit::allow())
    }

    async fn deny(&self, contact_id: &str, reason: GateReason) -> Result<Permit, GateError> {
        match self.store.incr(DEFERRED_KEY).await {
            Ok(count) => {
                tracing::info!(contact_id, %reason, deferred = count, "reply deferred");
            }
            Err(e) => {
                tracing::warn!(contact_id, %reason, error = %e, "reply deferred; counter not updated");
            }
        }
        if matches!(reason, GateReason::Global | GateReason::Sleep) {
            if let Err(e) = self.store.set(DEFERRED_WINDOW_KEY, reason.as_str(), None).await {
                tracing::warn!(error = %e, "failed to mark deferred window");
            }
        }
        Ok(Permit::deny(reason))
    }

    async fn close_deferred_window(&self) -> Result<(), GateError> {
        if self.store.get(DEFERRED_WINDOW_KEY).await?.is_none() {
            return Ok(());
        }
        self.reset_deferred().await
    }

    async fn reset_deferred(&self) -> Result<(), GateError> {
        self.store.delete(DEFERRED_KEY).await?;
        self.store.delete(DEFERRED_WINDOW_KEY).await?;
        tracing::debug!("deferred counter reset");
        Ok(())
    }

    /// Active global pause, if any. An unreadable value counts as indefinite.
    async fn global_pause_at(&self, now: DateTime<Utc>) -> Result<Option<PauseUntil>, GateError> {
        match get_json::<PauseUntil>(self.store.as_ref(), GLOBAL_KEY).await {
            Ok(Some(until)) if until.is_active_at(now) => Ok(Some(until)),
            Ok(_) => Ok(None),
            Err(StoreError::Malformed { reason, .. }) => {
                tracing::warn!(%reason, "malformed global pause value; treating as indefinite");
                Ok(Some(PauseUntil::Indefinite))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn contact_paused_at(&self, contact_id: &str, now: DateTime<Utc>) -> Result<bool, GateError> {
        let key = contact_pause_key(contact_id);
        match get_json::<ContactPause>(self.store.as_ref(), &key).await {
            Ok(Some(pause)) => Ok(pause.is_active_at(now)),
            Ok(None) => Ok(false),
            Err(StoreError::Malformed { reason, .. }) => {
                tracing::warn!(contact_id, %reason, "malformed contact pause; treating as paused");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Global pause ──

    /// `duration_secs = 0` pauses indefinitely.
    pub async fn set_global_pause(&self, duration_secs: u64) -> Result<PauseUntil, GateError> {
        let (until, ttl) = if duration_secs == 0 {
            (PauseUntil::Indefinite, None)
        } else {
            let ttl = Duration::from_secs(duration_secs);
            let at = expiry(self.clock.now(), ttl);
            (PauseUntil::Timestamp(at), Some(ttl))
        };
        set_json(self.store.as_ref(), GLOBAL_KEY, &until, ttl).await?;
        tracing::info!(?until, "global pause set");
        Ok(until)
    }

    /// Lift the global pause without re-enabling anyone.
    ///
    /// Phase one writes a long hold for every known contact (retried for the
    /// contacts that failed). Phase two deletes the global key, and only runs
    /// when phase one fully succeeded. Returns the number of contacts held.
    /// Without an active global pause nothing is written and the result is 0.
    pub async fn clear_global_pause(&self) -> Result<usize, GateError> {
        if self.global_pause_at(self.clock.now()).await?.is_none() {
            tracing::info!("no active global pause; nothing to clear");
            return Ok(0);
        }

        let attempts = self.config.pause_all_attempts.max(1);
        let backoff = Duration::from_millis(self.config.pause_all_backoff_ms);

        let contacts = {
            let mut attempt = 1;
            loop {
                match self.known_contacts().await {
                    Ok(contacts) => break contacts,
                    Err(e) if attempt < attempts => {
                        tracing::warn!(attempt, error = %e, "contact enumeration failed; retrying");
                        attempt += 1;
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "contact enumeration failed; global pause left in place"
                        );
                        return Err(GateError::ContactEnumeration(e));
                    }
                }
            }
        };

        let total = contacts.len();
        let hold = self.config.resume_hold();
        let mut pending = contacts;
        for attempt in 1..=attempts {
            let mut failed = Vec::new();
            for contact_id in pending {
                if let Err(e) = self.hold_contact(&contact_id, hold).await {
                    tracing::warn!(contact_id = %contact_id, attempt, error = %e, "contact hold failed");
                    failed.push(contact_id);
                }
            }
            pending = failed;
            if pending.is_empty() {
                break;
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        if !pending.is_empty() {
            let paused = total - pending.len();
            tracing::error!(
                paused,
                total,
                failed = ?pending,
                "pause-all incomplete; global pause left in place"
            );
            return Err(GateError::PauseAllIncomplete {
                paused,
                total,
                failed: pending,
            });
        }

        self.store.delete(GLOBAL_KEY).await?;
        if self.config.deferred_policy == DeferredCountPolicy::ResetOnWindowEnd {
            self.reset_deferred().await?;
        }
        tracing::info!(held = total, "global pause cleared; contacts held individually");
        Ok(total)
    }

    /// Hold one contact for `hold`, keeping an existing pause that already
    /// runs longer.
    async fn hold_contact(&self, contact_id: &str, hold: Duration) -> Result<(), GateError> {
        let until = expiry(self.clock.now(), hold);
        match self.contact_pause(contact_id).await {
            Ok(Some(existing)) if existing.expires_at >= until => {
                tracing::debug!(contact_id, expires_at = %existing.expires_at, "longer pause kept");
                return Ok(());
            }
            Err(e @ GateError::Store(StoreError::Unavailable(_))) => return Err(e),
            // Malformed or shorter pauses are overwritten.
            _ => {}
        }
        self.write_contact_pause(contact_id, hold, Some(RESUME_HOLD_REASON.to_string()))
            .await?;
        Ok(())
    }

    // ── Contact pauses ──

    /// `duration_secs = 0` holds the contact for the configured resume hold.
    pub async fn set_contact_pause(
        &self,
        contact_id: &str,
        duration_secs: u64,
        reason: Option<String>,
    ) -> Result<ContactPause, GateError> {
        let duration = if duration_secs == 0 {
            self.config.resume_hold()
        } else {
            Duration::from_secs(duration_secs)
        };
        let pause = self.write_contact_pause(contact_id, duration, reason).await?;
        tracing::info!(contact_id, expires_at = %pause.expires_at, "contact paused");
        Ok(pause)
    }

    async fn write_contact_pause(
        &self,
        contact_id: &str,
        duration: Duration,
        reason: Option<String>,
    ) -> Result<ContactPause, GateError> {
        let pause = ContactPause {
            contact_id: contact_id.to_string(),
            expires_at: expiry(self.clock.now(), duration),
            reason,
        };
        set_json(
            self.store.as_ref(),
            &contact_pause_key(contact_id),
            &pause,
            Some(duration),
        )
        .await?;
        Ok(pause)
    }

    pub async fn clear_contact_pause(&self, contact_id: &str) -> Result<(), GateError> {
        self.store.delete(&contact_pause_key(contact_id)).await?;
        tracing::info!(contact_id, "contact pause cleared");
        Ok(())
    }

    pub async fn contact_pause(&self, contact_id: &str) -> Result<Option<ContactPause>, GateError> {
        let now = self.clock.now();
        let pause: Option<ContactPause> =
            get_json(self.store.as_ref(), &contact_pause_key(contact_id)).await?;
        Ok(pause.filter(|p| p.is_active_at(now)))
    }

    /// Every active contact pause, ordered by contact id.
    pub async fn contact_pauses(&self) -> Result<Vec<ContactPause>, GateError> {
        let now = self.clock.now();
        let mut pauses = Vec::new();
        for key in self.store.scan(CONTACT_PAUSE_PREFIX).await? {
            match get_json::<ContactPause>(self.store.as_ref(), &key).await {
                Ok(Some(p)) if p.is_active_at(now) => pauses.push(p),
                Ok(_) => {}
                Err(StoreError::Malformed { reason, .. }) => {
                    tracing::warn!(key = %key, %reason, "skipping malformed contact pause");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(pauses)
    }

    // ── Sleep hours ──

    /// Stored sleep hours, else the configured seed, else disabled.
    pub async fn sleep_hours(&self) -> Result<SleepHoursConfig, GateError> {
        let stored: Option<SleepHoursConfig> =
            get_json(self.store.as_ref(), SLEEP_HOURS_KEY).await?;
        Ok(stored
            .or(self.config.sleep_hours)
            .unwrap_or_default())
    }

    pub async fn set_sleep_hours(&self, hours: SleepHoursConfig) -> Result<(), GateError> {
        hours.validate()?;
        set_json(self.store.as_ref(), SLEEP_HOURS_KEY, &hours, None).await?;
        tracing::info!(sleep_hours = %hours, "sleep hours set");
        Ok(())
    }

    /// Disable sleep hours, keeping the window for a later re-enable.
    pub async fn clear_sleep_hours(&self) -> Result<(), GateError> {
        let mut hours = self.sleep_hours().await?;
        hours.enabled = false;
        set_json(self.store.as_ref(), SLEEP_HOURS_KEY, &hours, None).await?;
        tracing::info!("sleep hours disabled");
        Ok(())
    }

    // ── Monitoring ──

    pub async fn status(&self) -> Result<GateStatus, GateError> {
        let until = self.global_pause_at(self.clock.now()).await?;
        Ok(GateStatus {
            enabled: until.is_some(),
            until,
            deferred_count: self.deferred_count().await?,
        })
    }

    pub async fn deferred_count(&self) -> Result<u64, GateError> {
        let Some(raw) = self.store.get(DEFERRED_KEY).await? else {
            return Ok(0);
        };
        raw.trim()
            .parse::<u64>()
            .map_err(|e| {
                GateError::Store(StoreError::Malformed {
                    key: DEFERRED_KEY.to_string(),
                    reason: e.to_string(),
                })
            })
    }

    // ── Known contacts ──

    /// Record `contact_id` so a later `clear_global_pause` holds it too.
    pub async fn remember_contact(&self, contact_id: &str) -> Result<(), GateError> {
        let key = known_contact_key(contact_id);
        if self.store.get(&key).await?.is_none() {
            let first_seen = self.clock.now().to_rfc3339();
            self.store.set(&key, &first_seen, None).await?;
            tracing::debug!(contact_id, "new contact recorded");
        }
        Ok(())
    }

    pub async fn known_contacts(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .scan(KNOWN_CONTACT_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(KNOWN_CONTACT_PREFIX).map(str::to_string))
            .collect())
    }
}

fn expiry(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
