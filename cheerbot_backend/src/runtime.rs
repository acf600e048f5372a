use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use flume::Sender;
use serde::Deserialize;

use crate::agent_client::{HttpTextAgent, TextAgent};
use crate::avatar::PrerenderedLevelImages;
use crate::config::EngineConfig;
use crate::database::EngagementDatabase;
use crate::engine::{EngagementEngine, EngineEvent, EngineSettings, ExecutionMode, InvocationSummary};
use crate::error::FatalError;
use crate::platform::{PostPlatform, XApiClient};
use crate::progression::{LevelThreshold, ProgressionTable};

/// Fully wired engine plus the database it persists to.
pub struct BackendRuntime {
    pub config: EngineConfig,
    pub database: Arc<EngagementDatabase>,
    pub engine: Arc<EngagementEngine>,
}

pub struct BackendRuntimeBuilder {
    config: EngineConfig,
    event_tx: Option<Sender<EngineEvent>>,
    platform: Option<Arc<dyn PostPlatform>>,
    agent: Option<Arc<dyn TextAgent>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            event_tx: None,
            platform: None,
            agent: None,
        }
    }

    pub fn with_events(mut self, event_tx: Sender<EngineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Replace the platform client built from the config.
    pub fn with_platform(mut self, platform: Arc<dyn PostPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Replace the agent client built from the config.
    pub fn with_agent(mut self, agent: Arc<dyn TextAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;
        config.validate()?;

        let database = Arc::new(
            EngagementDatabase::new(&config.database_path)
                .map_err(|e| FatalError::store("open database", e))?,
        );

        let platform: Arc<dyn PostPlatform> = match self.platform {
            Some(platform) => platform,
            None => Arc::new(
                XApiClient::new(
                    config.platform_api_url.clone(),
                    config.platform_upload_url.clone(),
                    config.platform_token.clone().unwrap_or_default(),
                    config.platform_timeout(),
                )
                .context("Failed to build platform client")?,
            ),
        };

        let agent: Arc<dyn TextAgent> = match self.agent {
            Some(agent) => agent,
            None => Arc::new(
                HttpTextAgent::new(
                    config.agent_url.clone(),
                    config.agent_token.clone(),
                    config.agent_timeout(),
                )
                .context("Failed to build agent client")?,
            ),
        };

        let mut engine = EngagementEngine::new(
            EngineSettings::from(&config),
            database.clone(),
            database.clone(),
            database.clone(),
            platform,
            agent,
        );
        if let Some(event_tx) = self.event_tx {
            engine = engine.with_events(event_tx);
        }
        if let Some(dir) = config.profile_image_dir.as_deref() {
            engine = engine.with_compositor(Arc::new(PrerenderedLevelImages::new(dir)));
        }

        tracing::info!(
            "Engine ready (primary {}, secondary {}, database {})",
            config.primary_user_id,
            config.secondary_user_id,
            config.database_path
        );

        Ok(BackendRuntime {
            config,
            database,
            engine: Arc::new(engine),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProgressionFile {
    levels: Vec<LevelThreshold>,
}

impl BackendRuntime {
    pub fn bootstrap(config: EngineConfig, event_tx: Sender<EngineEvent>) -> Result<Self> {
        BackendRuntimeBuilder::new(config)
            .with_events(event_tx)
            .build()
    }

    /// Run one invocation stamped with the current time.
    pub async fn invoke(&self, mode: ExecutionMode) -> Result<InvocationSummary, FatalError> {
        self.engine.run_invocation(mode, Utc::now()).await
    }

    /// Replace the progression table with the rows in a JSON file
    /// (`{"levels": [{"level": 1, "required_xp": 0}, ...]}`).
    pub fn seed_progression_from_file(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read progression table {:?}", path))?;
        let file: ProgressionFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse progression table {:?}", path))?;

        let table = ProgressionTable::new(file.levels).map_err(FatalError::from)?;
        let written = self.database.seed_progression_table(table.rows())?;
        tracing::info!(
            "Seeded {} progression levels (max level {})",
            written,
            table.max_level()
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::EngagementTotals;
    use crate::testing::{post, FakePlatform, ScriptedAgent};
    use std::sync::Mutex;

    fn temp_db_path() -> String {
        std::env::temp_dir()
            .join(format!(
                "cheerbot_runtime_{}_{}.db",
                std::process::id(),
                uuid::Uuid::new_v4()
            ))
            .to_string_lossy()
            .to_string()
    }

    fn config(database_path: String) -> EngineConfig {
        EngineConfig {
            primary_user_id: "100".to_string(),
            secondary_user_id: "200".to_string(),
            bot_user_id: "300".to_string(),
            platform_token: Some("token".to_string()),
            database_path,
            ..EngineConfig::default()
        }
    }

    fn runtime(path: &str) -> (BackendRuntime, Arc<FakePlatform>) {
        let platform = Arc::new(
            FakePlatform {
                totals: Mutex::new(Some(EngagementTotals::default())),
                ..FakePlatform::default()
            }
            .with_timeline("100", vec![post("1001", "100")]),
        );
        let agent = Arc::new(ScriptedAgent::default().reply("quote", "応援してる！ #cheerbot"));
        let runtime = BackendRuntimeBuilder::new(config(path.to_string()))
            .with_platform(platform.clone())
            .with_agent(agent)
            .build()
            .expect("build runtime");
        (runtime, platform)
    }

    #[test]
    fn invalid_config_fails_to_build() {
        let mut bad = config(temp_db_path());
        bad.bot_user_id.clear();
        let err = BackendRuntimeBuilder::new(bad)
            .build()
            .err()
            .expect("missing bot id");
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::Config(_))
        ));
    }

    #[tokio::test]
    async fn invocation_requires_a_seeded_table() {
        let path = temp_db_path();
        let (runtime, platform) = runtime(&path);

        let err = runtime
            .invoke(ExecutionMode::CoreTime)
            .await
            .expect_err("empty table");
        assert!(matches!(err, FatalError::InvalidProgressionTable(_)));
        assert!(platform.published().is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn seeded_runtime_persists_the_invocation() {
        let path = temp_db_path();
        let (runtime, platform) = runtime(&path);
        let dir = tempfile::tempdir().expect("tempdir");
        let table_path = dir.path().join("levels.json");
        std::fs::write(
            &table_path,
            r#"{"levels":[{"level":2,"required_xp":10},{"level":1,"required_xp":0}]}"#,
        )
        .expect("write table");

        let written = runtime
            .seed_progression_from_file(&table_path)
            .expect("seed table");
        assert_eq!(written, 2);

        let summary = runtime
            .invoke(ExecutionMode::CoreTime)
            .await
            .expect("invocation");
        assert_eq!(summary.quotes_posted, 1);
        assert_eq!(platform.published().len(), 1);

        let state = runtime.engine.current_state().await.expect("state");
        assert_eq!(state.version, 1);
        assert_eq!(state.latest_seen_post_id.as_deref(), Some("1001"));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn malformed_table_is_rejected_before_writing() {
        let path = temp_db_path();
        let (runtime, _) = runtime(&path);
        let dir = tempfile::tempdir().expect("tempdir");
        let table_path = dir.path().join("levels.json");
        std::fs::write(
            &table_path,
            r#"{"levels":[{"level":1,"required_xp":0},{"level":3,"required_xp":10}]}"#,
        )
        .expect("write table");

        assert!(runtime.seed_progression_from_file(&table_path).is_err());
        assert!(runtime
            .database
            .get_progression_levels()
            .expect("levels")
            .is_empty());

        let _ = std::fs::remove_file(path);
    }
}
