use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::store::{keys, PrefsStore};

/// One hour, granted after a completed share action.
pub const SHARE_GRANT_MS: i64 = 60 * 60 * 1000;
/// Thirty days, granted after a (simulated) subscription purchase.
pub const SUBSCRIPTION_GRANT_MS: i64 = 30 * 24 * 60 * 60 * 1000;
/// One hour, granted by the settings debug toggle.
pub const DEBUG_GRANT_MS: i64 = 60 * 60 * 1000;
/// Every new install starts with three free passes.
pub const INITIAL_FREE_PASSES: u32 = 3;

/// Build-time behavior switches, injected at startup so tests can exercise
/// both modes without recompilation. Review mode forces premium everywhere
/// for app-store review submissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildConfig {
    pub review_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    None,
    Share,
    Subscription,
    AdReward,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::None => "none",
            GrantKind::Share => "share",
            GrantKind::Subscription => "subscription",
            GrantKind::AdReward => "ad_reward",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "none" | "" => Ok(GrantKind::None),
            "share" => Ok(GrantKind::Share),
            "subscription" => Ok(GrantKind::Subscription),
            "ad_reward" => Ok(GrantKind::AdReward),
            other => bail!("unknown grant kind '{other}'"),
        }
    }
}

/// Single source of truth for premium visibility and the consumable
/// free-pass counter.
///
/// Three mechanisms compete: the review-mode override, a time-boxed grant
/// (share or subscription), and the pass counter. A time-boxed grant masks
/// but never consumes passes; passes survive grant expiry. Every mutation
/// writes its fields to the store before returning.
#[derive(Debug)]
pub struct Entitlements {
    store: PrefsStore,
    config: BuildConfig,
    expiry_epoch_ms: i64,
    grant: GrantKind,
    free_passes: u32,
}

impl Entitlements {
    /// Loads persisted state. A first visit seeds the initial free passes;
    /// an already-elapsed grant is cleared (memory and store) before the
    /// state is first read, the same transition `tick` performs later.
    pub fn load(mut store: PrefsStore, config: BuildConfig, now_ms: i64) -> Result<Self> {
        let free_passes = match store.get_i64(keys::FREE_PASSES) {
            Some(stored) => stored.max(0) as u32,
            None => {
                store.set_i64(keys::FREE_PASSES, i64::from(INITIAL_FREE_PASSES))?;
                store.set_bool(keys::HAS_VISITED, true)?;
                INITIAL_FREE_PASSES
            }
        };

        let mut expiry_epoch_ms = store.get_i64(keys::PRO_EXPIRY).unwrap_or(0);
        let mut grant = store
            .get_string(keys::PRO_TYPE)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(GrantKind::None);
        if expiry_epoch_ms > 0 && now_ms >= expiry_epoch_ms {
            store.remove(keys::PRO_EXPIRY)?;
            store.remove(keys::PRO_TYPE)?;
            expiry_epoch_ms = 0;
            grant = GrantKind::None;
        }

        Ok(Self {
            store,
            config,
            expiry_epoch_ms,
            grant,
            free_passes,
        })
    }

    pub fn is_premium(&self, now_ms: i64) -> bool {
        self.config.review_mode || now_ms < self.expiry_epoch_ms
    }

    pub fn review_mode(&self) -> bool {
        self.config.review_mode
    }

    pub fn free_passes(&self) -> u32 {
        self.free_passes
    }

    pub fn grant(&self) -> GrantKind {
        self.grant
    }

    pub fn expiry_epoch_ms(&self) -> i64 {
        self.expiry_epoch_ms
    }

    /// Starts (or replaces) a time-boxed grant. Does not touch the pass
    /// counter: unused passes are still there when the grant lapses.
    pub fn grant_time_boxed(&mut self, kind: GrantKind, duration_ms: i64, now_ms: i64) -> Result<i64> {
        if duration_ms <= 0 {
            bail!("grant duration must be positive, got {duration_ms}");
        }
        let expiry = now_ms + duration_ms;
        self.store.set_i64(keys::PRO_EXPIRY, expiry)?;
        self.store.set_string(keys::PRO_TYPE, kind.as_str())?;
        self.expiry_epoch_ms = expiry;
        self.grant = kind;
        Ok(expiry)
    }

    /// Consumes one free pass after a confirmed successful generation.
    /// Returns false (and stays at zero) when none remain.
    pub fn consume_free_pass(&mut self) -> Result<bool> {
        if self.free_passes == 0 {
            return Ok(false);
        }
        let remaining = self.free_passes - 1;
        self.store.set_i64(keys::FREE_PASSES, i64::from(remaining))?;
        self.free_passes = remaining;
        Ok(true)
    }

    /// Rewarded-ad completion: one more pass, never a time-boxed unlock.
    pub fn grant_ad_reward_pass(&mut self) -> Result<u32> {
        let count = self.free_passes.saturating_add(1);
        self.store.set_i64(keys::FREE_PASSES, i64::from(count))?;
        self.free_passes = count;
        Ok(count)
    }

    /// Once-per-second check: clears an elapsed grant from memory and the
    /// store. This is the only expiry path besides the identical load-time
    /// check; reads between ticks may see up to one second of staleness.
    pub fn tick(&mut self, now_ms: i64) -> Result<bool> {
        if self.expiry_epoch_ms > 0 && now_ms >= self.expiry_epoch_ms {
            self.store.remove(keys::PRO_EXPIRY)?;
            self.store.remove(keys::PRO_TYPE)?;
            self.expiry_epoch_ms = 0;
            self.grant = GrantKind::None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Clears an active grant without waiting for expiry (settings toggle).
    pub fn clear_grant(&mut self) -> Result<()> {
        self.store.remove(keys::PRO_EXPIRY)?;
        self.store.remove(keys::PRO_TYPE)?;
        self.expiry_epoch_ms = 0;
        self.grant = GrantKind::None;
        Ok(())
    }

    /// Wipes every persisted key ("reset data" support action).
    pub fn reset(&mut self) -> Result<()> {
        self.store.clear()?;
        self.expiry_epoch_ms = 0;
        self.grant = GrantKind::None;
        self.free_passes = 0;
        Ok(())
    }
}
