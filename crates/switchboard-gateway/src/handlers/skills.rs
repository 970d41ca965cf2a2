//! Skills RPC method handlers.
//!
//! Skill entries start from configuration and are overlaid with any state
//! files found in the skills state directory. Updates to one skill are
//! serialized by skill key so that concurrent patches from different
//! connections never interleave their read, merge and write steps.

use super::HandlerContext;
use crate::error::GatewayError;
use crate::methods::{MethodHandler, RequestContext, Responder};
use crate::queue::KeyedQueue;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use switchboard_core::config::{is_valid_skill_key, SkillEntryConfig, SkillsConfig};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Patch applied by `skills.update`.
///
/// An empty `api_key` clears the key. An `env` entry with an empty value
/// removes that variable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillPatch {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

impl SkillPatch {
    /// Apply the patch to `entry`.
    pub fn apply(&self, entry: &mut SkillEntryConfig) {
        if let Some(enabled) = self.enabled {
            entry.enabled = enabled;
        }
        if let Some(api_key) = &self.api_key {
            let trimmed = api_key.trim();
            entry.api_key = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Some(env) = &self.env {
            for (name, value) in env {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim();
                if value.is_empty() {
                    entry.env.remove(name);
                } else {
                    entry.env.insert(name.to_string(), value.to_string());
                }
            }
        }
    }
}

/// What `skills.status` reports for one skill. Secrets are not echoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillStatus {
    pub skill_key: String,
    pub enabled: bool,
    pub has_api_key: bool,
    pub env_keys: Vec<String>,
}

impl SkillStatus {
    fn new(key: &str, entry: &SkillEntryConfig) -> Self {
        let mut env_keys: Vec<String> = entry.env.keys().cloned().collect();
        env_keys.sort();
        Self {
            skill_key: key.to_string(),
            enabled: entry.enabled,
            has_api_key: entry.api_key.is_some(),
            env_keys,
        }
    }
}

/// Skill entries and their persistence.
pub struct SkillStore {
    entries: RwLock<HashMap<String, SkillEntryConfig>>,
    state_dir: Option<PathBuf>,
    queue: KeyedQueue,
}

impl SkillStore {
    /// Create an empty store.
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        Self::with_entries(HashMap::new(), state_dir)
    }

    fn with_entries(entries: HashMap<String, SkillEntryConfig>, state_dir: Option<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(entries),
            state_dir,
            queue: KeyedQueue::new(),
        }
    }

    /// Build a store from configuration, loading persisted state.
    pub fn from_config(config: &SkillsConfig) -> Result<Self> {
        let mut entries = config.entries.clone();
        if let Some(dir) = &config.state_dir {
            let dir = switchboard_core::paths::expand_tilde(&dir.to_string_lossy());
            for (key, entry) in load_state_dir(&dir)? {
                entries.insert(key, entry);
            }
            return Ok(Self::with_entries(entries, Some(dir)));
        }
        Ok(Self::with_entries(entries, None))
    }

    /// Status of every skill, sorted by key.
    pub async fn status(&self) -> Vec<SkillStatus> {
        let entries = self.entries.read().await;
        let mut list: Vec<SkillStatus> = entries
            .iter()
            .map(|(key, entry)| SkillStatus::new(key, entry))
            .collect();
        list.sort_by(|a, b| a.skill_key.cmp(&b.skill_key));
        list
    }

    /// Get one skill entry.
    pub async fn get(&self, key: &str) -> Option<SkillEntryConfig> {
        self.entries.read().await.get(key).cloned()
    }

    /// Apply `patch` to the skill `key` and persist it.
    ///
    /// Unknown keys are created from defaults.
    pub async fn update(&self, key: &str, patch: &SkillPatch) -> Result<SkillEntryConfig> {
        if !is_valid_skill_key(key) {
            return Err(GatewayError::InvalidParams(format!(
                "invalid skill key '{}'",
                key
            )));
        }

        self.queue
            .serialize_by_key(key, async {
                let mut entry = self.get(key).await.unwrap_or_default();
                patch.apply(&mut entry);

                if let Some(dir) = &self.state_dir {
                    persist(dir, key, &entry).await?;
                }

                self.entries
                    .write()
                    .await
                    .insert(key.to_string(), entry.clone());
                debug!(skill = key, "Skill updated");
                Ok::<_, GatewayError>(entry)
            })
            .await
    }
}

fn load_state_dir(dir: &Path) -> Result<Vec<(String, SkillEntryConfig)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut loaded = Vec::new();
    for item in std::fs::read_dir(dir)? {
        let path = item?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_valid_skill_key(key) {
            continue;
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<SkillEntryConfig>(&content) {
            Ok(entry) => loaded.push((key.to_string(), entry)),
            Err(e) => warn!("Ignoring unreadable skill state {}: {}", path.display(), e),
        }
    }

    info!("Loaded {} skill state file(s) from {}", loaded.len(), dir.display());
    Ok(loaded)
}

async fn persist(dir: &Path, key: &str, entry: &SkillEntryConfig) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let path = dir.join(format!("{}.json", key));
    let temp_path = dir.join(format!("{}.json.tmp", key));
    let content = serde_json::to_string_pretty(entry)?;

    // Write atomically
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, &path).await?;
    Ok(())
}

/// Skills status handler.
pub struct SkillsStatusHandler {
    context: Arc<HandlerContext>,
}

impl SkillsStatusHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MethodHandler for SkillsStatusHandler {
    async fn handle(&self, _ctx: RequestContext, respond: Responder) -> Result<()> {
        let skills = self.context.skills.status().await;
        respond.ok(serde_json::json!({
            "count": skills.len(),
            "skills": skills,
        }));
        Ok(())
    }
}

/// Parameters for skills.update.
#[derive(Debug, Deserialize)]
pub struct SkillsUpdateParams {
    pub skill_key: String,

    #[serde(flatten)]
    pub patch: SkillPatch,
}

/// Skills update handler.
pub struct SkillsUpdateHandler {
    context: Arc<HandlerContext>,
}

impl SkillsUpdateHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MethodHandler for SkillsUpdateHandler {
    async fn handle(&self, ctx: RequestContext, respond: Responder) -> Result<()> {
        let params: SkillsUpdateParams = ctx.params()?;
        let key = params.skill_key.trim();

        let entry = self.context.skills.update(key, &params.patch).await?;
        info!(conn_id = %ctx.conn_id, skill = key, "Skill settings updated");

        respond.ok(serde_json::json!({
            "ok": true,
            "skill": SkillStatus::new(key, &entry),
        }));
        Ok(())
    }

    fn serial_key(&self, ctx: &RequestContext) -> Option<String> {
        let key = ctx.params.as_ref()?.get("skill_key")?.as_str()?.trim();
        Some(format!("skills:{}", key))
    }
}
