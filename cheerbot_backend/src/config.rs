use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FatalError;
use crate::templates::Persona;

pub const CONFIG_FILE_NAME: &str = "cheerbot_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Watched accounts and the bot's own account
    #[serde(default)]
    pub primary_user_id: String,
    #[serde(default)]
    pub secondary_user_id: String,
    #[serde(default)]
    pub bot_user_id: String,

    // Social platform API
    #[serde(default = "default_platform_api_url")]
    pub platform_api_url: String,
    #[serde(default = "default_platform_upload_url")]
    pub platform_upload_url: String,
    #[serde(default)]
    pub platform_token: Option<String>,
    #[serde(default = "default_platform_timeout_secs")]
    pub platform_timeout_secs: u64,
    #[serde(default = "default_poll_max_results")]
    pub poll_max_results: u32,
    #[serde(default = "default_metrics_sample_size")]
    pub metrics_sample_size: u32,

    // Text-generation agent
    #[serde(default = "default_agent_url")]
    pub agent_url: String,
    #[serde(default)]
    pub agent_token: Option<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    // Storage
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Directory holding `<emotion>.png` images; media attachment is off when unset.
    #[serde(default)]
    pub media_dir: Option<String>,
    /// Directory holding `level_<n>.png` profile pictures; the picture is left alone when unset.
    #[serde(default)]
    pub profile_image_dir: Option<String>,

    // Persona
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_primary_name")]
    pub primary_name: String,
    #[serde(default = "default_secondary_name")]
    pub secondary_name: String,
    #[serde(default = "default_hashtags")]
    pub hashtags: String,
}

fn default_platform_api_url() -> String {
    "https://api.x.com".to_string()
}

fn default_platform_upload_url() -> String {
    "https://upload.twitter.com".to_string()
}

fn default_platform_timeout_secs() -> u64 {
    30
}

fn default_poll_max_results() -> u32 {
    20
}

fn default_metrics_sample_size() -> u32 {
    100
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8080/invocations".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_database_path() -> String {
    "cheerbot.db".to_string()
}

fn default_display_name() -> String {
    "Cheerbot".to_string()
}

fn default_primary_name() -> String {
    "推し".to_string()
}

fn default_secondary_name() -> String {
    "グループ".to_string()
}

fn default_hashtags() -> String {
    "#cheerbot".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_user_id: String::new(),
            secondary_user_id: String::new(),
            bot_user_id: String::new(),
            platform_api_url: default_platform_api_url(),
            platform_upload_url: default_platform_upload_url(),
            platform_token: None,
            platform_timeout_secs: default_platform_timeout_secs(),
            poll_max_results: default_poll_max_results(),
            metrics_sample_size: default_metrics_sample_size(),
            agent_url: default_agent_url(),
            agent_token: None,
            agent_timeout_secs: default_agent_timeout_secs(),
            database_path: default_database_path(),
            media_dir: None,
            profile_image_dir: None,
            display_name: default_display_name(),
            primary_name: default_primary_name(),
            secondary_name: default_secondary_name(),
            hashtags: default_hashtags(),
        }
    }
}

impl EngineConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Config file next to the executable, or in the working directory.
    pub fn config_path() -> PathBuf {
        let beside_exe = Self::get_base_dir().join(CONFIG_FILE_NAME);
        if beside_exe.exists() {
            beside_exe
        } else {
            PathBuf::from(CONFIG_FILE_NAME)
        }
    }

    /// Load the TOML file if present, then apply `CHEERBOT_*` environment overrides.
    /// A missing file means defaults; a file that does not parse is fatal.
    pub fn load() -> Result<Self, FatalError> {
        let path = Self::config_path();

        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => {
                let config = Self::from_toml(&contents)
                    .map_err(|e| FatalError::Config(format!("{}: {}", path.display(), e)))?;
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(_) => {
                tracing::warn!("No config file at {:?}, using defaults + env vars", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let strings: [(&str, &mut String); 11] = [
            ("CHEERBOT_PRIMARY_USER_ID", &mut self.primary_user_id),
            ("CHEERBOT_SECONDARY_USER_ID", &mut self.secondary_user_id),
            ("CHEERBOT_BOT_USER_ID", &mut self.bot_user_id),
            ("CHEERBOT_PLATFORM_API_URL", &mut self.platform_api_url),
            ("CHEERBOT_PLATFORM_UPLOAD_URL", &mut self.platform_upload_url),
            ("CHEERBOT_AGENT_URL", &mut self.agent_url),
            ("CHEERBOT_DATABASE_PATH", &mut self.database_path),
            ("CHEERBOT_DISPLAY_NAME", &mut self.display_name),
            ("CHEERBOT_PRIMARY_NAME", &mut self.primary_name),
            ("CHEERBOT_SECONDARY_NAME", &mut self.secondary_name),
            ("CHEERBOT_HASHTAGS", &mut self.hashtags),
        ];
        for (key, slot) in strings {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }

        if let Some(token) = lookup("CHEERBOT_PLATFORM_TOKEN") {
            self.platform_token = Some(token);
        }
        if let Some(token) = lookup("CHEERBOT_AGENT_TOKEN") {
            self.agent_token = Some(token);
        }
        if let Some(dir) = lookup("CHEERBOT_MEDIA_DIR") {
            self.media_dir = Some(dir);
        }
        if let Some(dir) = lookup("CHEERBOT_PROFILE_IMAGE_DIR") {
            self.profile_image_dir = Some(dir);
        }
        if let Some(secs) = lookup("CHEERBOT_AGENT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.agent_timeout_secs = secs;
        }
        if let Some(secs) = lookup("CHEERBOT_PLATFORM_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.platform_timeout_secs = secs;
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), FatalError> {
        let required = [
            ("primary_user_id", self.primary_user_id.as_str()),
            ("secondary_user_id", self.secondary_user_id.as_str()),
            ("bot_user_id", self.bot_user_id.as_str()),
            ("agent_url", self.agent_url.as_str()),
            ("database_path", self.database_path.as_str()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(FatalError::Config(format!("missing {}", missing.join(", "))));
        }
        if self
            .platform_token
            .as_deref()
            .map(|token| token.trim().is_empty())
            .unwrap_or(true)
        {
            return Err(FatalError::Config("missing platform_token".to_string()));
        }
        if self.primary_user_id == self.secondary_user_id {
            return Err(FatalError::Config(
                "primary_user_id and secondary_user_id must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_secs)
    }

    pub fn persona(&self) -> Persona {
        Persona {
            display_name: self.display_name.clone(),
            primary_name: self.primary_name.clone(),
            secondary_name: self.secondary_name.clone(),
            hashtags: self.hashtags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> EngineConfig {
        EngineConfig {
            primary_user_id: "100".to_string(),
            secondary_user_id: "200".to_string(),
            bot_user_id: "300".to_string(),
            platform_token: Some("token".to_string()),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r##"
            primary_user_id = "100"
            hashtags = "#a #b"
            "##,
        )
        .expect("parse config");
        assert_eq!(config.primary_user_id, "100");
        assert_eq!(config.hashtags, "#a #b");
        assert_eq!(config.agent_timeout_secs, 120);
        assert_eq!(config.poll_max_results, 20);
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("CHEERBOT_PRIMARY_USER_ID", "111"),
            ("CHEERBOT_PLATFORM_TOKEN", "secret"),
            ("CHEERBOT_AGENT_TIMEOUT_SECS", "45"),
            ("CHEERBOT_PLATFORM_TIMEOUT_SECS", "not-a-number"),
            ("CHEERBOT_PROFILE_IMAGE_DIR", "/srv/levels"),
        ]
        .into_iter()
        .collect();
        let mut config = valid();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.primary_user_id, "111");
        assert_eq!(config.platform_token.as_deref(), Some("secret"));
        assert_eq!(config.agent_timeout(), Duration::from_secs(45));
        assert_eq!(config.platform_timeout_secs, 30);
        assert_eq!(config.profile_image_dir.as_deref(), Some("/srv/levels"));
    }

    #[test]
    fn validation_reports_missing_fields() {
        assert!(valid().validate().is_ok());

        let err = EngineConfig::default().validate().expect_err("defaults lack ids");
        assert!(err.to_string().contains("primary_user_id"));

        let mut no_token = valid();
        no_token.platform_token = Some("  ".to_string());
        assert!(matches!(no_token.validate(), Err(FatalError::Config(_))));

        let mut same = valid();
        same.secondary_user_id = "100".to_string();
        assert!(same.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(EngineConfig::from_toml("primary_user_id = ").is_err());
        assert!(EngineConfig::from_toml("poll_max_results = \"many\"").is_err());
        assert!(EngineConfig::from_toml("").is_ok());
    }

    #[test]
    fn config_survives_toml_round_trip() {
        let text = toml::to_string_pretty(&valid()).expect("serialize");
        let parsed: EngineConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.bot_user_id, "300");
        assert_eq!(parsed.persona().hashtags, "#cheerbot");
    }
}
