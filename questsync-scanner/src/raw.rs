//! Typed view over raw quest records.
//!
//! Every field the normalizer does not strictly need is optional, and unknown
//! fields are ignored, so schema drift in the host only drops the affected
//! records instead of failing the whole poll.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuest {
    pub id: String,
    pub config: RawQuestConfig,
    #[serde(default)]
    pub user_status: Option<RawUserStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestConfig {
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub task_config: Option<RawTaskConfig>,
    #[serde(default, rename = "taskConfigV2")]
    pub task_config_v2: Option<RawTaskConfig>,
    #[serde(default)]
    pub messages: RawQuestMessages,
    #[serde(default)]
    pub application: RawApplication,
    #[serde(default)]
    pub rewards_config: Option<RawRewardsConfig>,
}

impl RawQuestConfig {
    /// The legacy task config when present, the v2 config otherwise.
    pub fn tasks(&self) -> Option<&RawTaskConfig> {
        self.task_config.as_ref().or(self.task_config_v2.as_ref())
    }

    pub fn first_reward(&self) -> Option<&RawReward> {
        self.rewards_config.as_ref()?.rewards.first()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskConfig {
    #[serde(default)]
    pub tasks: BTreeMap<String, Option<RawTask>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTask {
    #[serde(default)]
    pub target: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestMessages {
    #[serde(default)]
    pub quest_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawApplication {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRewardsConfig {
    #[serde(default)]
    pub rewards: Vec<RawReward>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReward {
    #[serde(default, rename = "type")]
    pub reward_type: Option<i64>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub messages: Option<RawRewardMessages>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRewardMessages {
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-user progress. Timestamps are only checked for presence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUserStatus {
    #[serde(default)]
    pub enrolled_at: Option<Value>,
    #[serde(default)]
    pub completed_at: Option<Value>,
    #[serde(default)]
    pub claimed_at: Option<Value>,
    #[serde(default)]
    pub progress: Option<BTreeMap<String, Option<RawProgress>>>,
}

impl RawUserStatus {
    pub fn progress_for(&self, key: &str) -> Option<f64> {
        self.progress.as_ref()?.get(key)?.as_ref()?.value
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProgress {
    #[serde(default)]
    pub value: Option<f64>,
}
