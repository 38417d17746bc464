//! Raw record → [`Quest`] normalization.
//!
//! Filter order:
//! 1. expired (`expires_at <= now`) records are dropped
//! 2. records offering no supported task kind are dropped
//!
//! Derived fields are recomputed from scratch on every call; nothing here does
//! I/O or reads the clock.

use chrono::{DateTime, Utc};

use questsync_core::{Quest, QuestId, TaskKind};

use crate::graph::RawRecord;
use crate::raw::{RawQuest, RawReward, RawTaskConfig};

/// Reward type rendered with the fixed animated asset.
pub const ANIMATED_REWARD_TYPE: i64 = 4;

pub const ANIMATED_REWARD_ASSET: &str = "https://cdn.discordapp.com/assets/content/fb761d9c206f93cd8c4e7301798abe3f623039a4054f2e7accd019e1bb059fc8.webm?format=webp";

pub const CDN_BASE: &str = "https://cdn.discordapp.com/";

const UNKNOWN_REWARD: &str = "Unknown Reward";

/// Normalizer with configurable asset resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    cdn_base: String,
    animated_asset: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(CDN_BASE)
    }
}

impl Normalizer {
    pub fn new(cdn_base: impl Into<String>) -> Self {
        Self {
            cdn_base: cdn_base.into(),
            animated_asset: ANIMATED_REWARD_ASSET.to_string(),
        }
    }

    /// Normalize every record, preserving input order for the survivors.
    pub fn normalize(&self, records: &[RawRecord], now: DateTime<Utc>) -> Vec<Quest> {
        records
            .iter()
            .filter_map(|record| match serde_json::from_value::<RawQuest>(record.clone()) {
                Ok(raw) => self.normalize_quest(&raw, now),
                Err(err) => {
                    tracing::debug!(
                        id = record.get("id").and_then(|id| id.as_str()).unwrap_or("?"),
                        error = %err,
                        "skipping unreadable quest record",
                    );
                    None
                }
            })
            .collect()
    }

    /// Normalize a single typed record; `None` when it is filtered out.
    pub fn normalize_quest(&self, raw: &RawQuest, now: DateTime<Utc>) -> Option<Quest> {
        if raw.config.expires_at <= now {
            tracing::debug!(id = %raw.id, "skipping expired quest");
            return None;
        }

        let Some((task_kind, seconds_needed)) = raw.config.tasks().and_then(select_task) else {
            tracing::debug!(id = %raw.id, "skipping quest without a supported task");
            return None;
        };

        let status = raw.user_status.as_ref();
        let is_enrolled = status.is_some_and(|s| s.enrolled_at.is_some());
        let seconds_done = if is_enrolled {
            status
                .and_then(|s| s.progress_for(task_kind.key()))
                .map(to_seconds)
                .unwrap_or(0)
        } else {
            0
        };
        let has_completed_at = status.is_some_and(|s| s.completed_at.is_some());
        let is_completed = is_enrolled && (seconds_done >= seconds_needed || has_completed_at);
        let is_claimed = status.is_some_and(|s| s.claimed_at.is_some());

        let reward = raw.config.first_reward();
        let reward_name = reward
            .and_then(|r| r.messages.as_ref())
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| UNKNOWN_REWARD.to_string());

        Some(Quest {
            id: QuestId::from(raw.id.as_str()),
            quest_name: raw.config.messages.quest_name.clone(),
            application_name: raw.config.application.name.clone(),
            task_kind,
            reward_name,
            reward_image: reward.and_then(|r| self.reward_image(r)),
            seconds_needed,
            seconds_done,
            expires_at: raw.config.expires_at,
            is_enrolled,
            is_completed,
            is_claimed,
        })
    }

    /// Animated rewards map to the fixed asset; otherwise the asset reference
    /// is resolved against the CDN base.
    pub fn reward_image(&self, reward: &RawReward) -> Option<String> {
        if reward.reward_type == Some(ANIMATED_REWARD_TYPE) {
            return Some(self.animated_asset.clone());
        }
        let asset = reward.asset.as_deref().filter(|a| !a.is_empty())?;
        Some(join_cdn(&self.cdn_base, asset))
    }
}

/// [`Normalizer::normalize`] with the default CDN.
pub fn normalize(records: &[RawRecord], now: DateTime<Utc>) -> Vec<Quest> {
    Normalizer::default().normalize(records, now)
}

/// Highest-priority supported kind with a task entry, and its target seconds.
fn select_task(config: &RawTaskConfig) -> Option<(TaskKind, u64)> {
    TaskKind::all().iter().find_map(|kind| {
        let task = config.tasks.get(kind.key())?.as_ref()?;
        Some((*kind, task.target.map(to_seconds).unwrap_or(0)))
    })
}

fn to_seconds(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}

fn join_cdn(base: &str, asset: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        asset.trim_start_matches('/')
    )
}
