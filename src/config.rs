use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    /// User code used when `--user` is not given.
    #[serde(default)]
    pub user_code: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    #[serde(default = "default_events_interval")]
    pub events_interval_secs: u64,
    #[serde(default = "default_save_timeout")]
    pub save_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: default_save_interval(),
            events_interval_secs: default_events_interval(),
            save_timeout_secs: default_save_timeout(),
        }
    }
}

fn default_save_interval() -> u64 {
    30
}
fn default_events_interval() -> u64 {
    13
}
fn default_save_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_request_timeout")]
    pub default_secs: u64,
    #[serde(default = "default_check_response_timeout")]
    pub check_response_secs: u64,
    #[serde(default = "default_analyze_topics_timeout")]
    pub analyze_topics_secs: u64,
    /// Rewording, question checks and topic suggestions.
    #[serde(default = "default_assist_timeout")]
    pub assist_secs: u64,
    #[serde(default = "default_switch_format_timeout")]
    pub switch_format_secs: u64,
    #[serde(default = "default_task_poll_interval")]
    pub task_poll_interval_secs: u64,
    #[serde(default = "default_task_max_wait")]
    pub task_max_wait_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default_secs: default_request_timeout(),
            check_response_secs: default_check_response_timeout(),
            analyze_topics_secs: default_analyze_topics_timeout(),
            assist_secs: default_assist_timeout(),
            switch_format_secs: default_switch_format_timeout(),
            task_poll_interval_secs: default_task_poll_interval(),
            task_max_wait_secs: default_task_max_wait(),
        }
    }
}

fn default_request_timeout() -> u64 {
    5
}
fn default_check_response_timeout() -> u64 {
    31
}
fn default_analyze_topics_timeout() -> u64 {
    58
}
fn default_assist_timeout() -> u64 {
    58
}
fn default_switch_format_timeout() -> u64 {
    21
}
fn default_task_poll_interval() -> u64 {
    5
}
fn default_task_max_wait() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Questions that may be left blank.
    #[serde(default = "default_optional_questions")]
    pub optional_questions: Vec<u32>,
    /// Questions never sent for the advisory check.
    #[serde(default = "default_unchecked_questions")]
    pub unchecked_questions: Vec<u32>,
    /// Warning stored when a check request fails.
    #[serde(default = "default_support_message")]
    pub support_message: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            optional_questions: default_optional_questions(),
            unchecked_questions: default_unchecked_questions(),
            support_message: default_support_message(),
        }
    }
}

fn default_optional_questions() -> Vec<u32> {
    vec![7]
}
fn default_unchecked_questions() -> Vec<u32> {
    vec![5, 6, 7]
}
fn default_support_message() -> String {
    "An error occurred while checking your response to the above question. \
     Please try again. If the problem persists, please contact support at \
     ccc-coalesce@media.mit.edu."
        .to_string()
}

impl SyncConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
    pub fn events_interval(&self) -> Duration {
        Duration::from_secs(self.events_interval_secs)
    }
    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs(self.save_timeout_secs)
    }
}

impl TimeoutsConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }
    pub fn check_response(&self) -> Duration {
        Duration::from_secs(self.check_response_secs)
    }
    pub fn analyze_topics(&self) -> Duration {
        Duration::from_secs(self.analyze_topics_secs)
    }
    pub fn assist(&self) -> Duration {
        Duration::from_secs(self.assist_secs)
    }
    pub fn switch_format(&self) -> Duration {
        Duration::from_secs(self.switch_format_secs)
    }
    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_secs(self.task_poll_interval_secs)
    }
    pub fn task_max_wait(&self) -> Duration {
        Duration::from_secs(self.task_max_wait_secs)
    }
}

impl Config {
    /// Config pointing at `base_url` with every other setting at its default.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.into(),
            },
            session: SessionConfig::default(),
            sync: SyncConfig::default(),
            timeouts: TimeoutsConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let base_url = config.api.base_url.trim();
    if base_url.is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        anyhow::bail!("api.base_url must start with http:// or https://");
    }

    // Validate sync
    if config.sync.save_interval_secs == 0 || config.sync.events_interval_secs == 0 {
        anyhow::bail!("sync intervals must be > 0");
    }
    if config.sync.save_timeout_secs == 0 {
        anyhow::bail!("sync.save_timeout_secs must be > 0");
    }

    // Validate timeouts
    let t = &config.timeouts;
    for (name, value) in [
        ("default_secs", t.default_secs),
        ("check_response_secs", t.check_response_secs),
        ("analyze_topics_secs", t.analyze_topics_secs),
        ("assist_secs", t.assist_secs),
        ("switch_format_secs", t.switch_format_secs),
        ("task_poll_interval_secs", t.task_poll_interval_secs),
        ("task_max_wait_secs", t.task_max_wait_secs),
    ] {
        if value == 0 {
            anyhow::bail!("timeouts.{} must be > 0", name);
        }
    }
    if t.task_poll_interval_secs > t.task_max_wait_secs {
        anyhow::bail!("timeouts.task_poll_interval_secs must not exceed task_max_wait_secs");
    }

    if let Some(code) = &config.session.user_code {
        if code.trim().is_empty() {
            anyhow::bail!("session.user_code must not be blank when set");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("[api]\nbase_url = \"http://localhost:8080\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sync.save_interval_secs, 30);
        assert_eq!(config.sync.events_interval_secs, 13);
        assert_eq!(config.sync.save_timeout_secs, 10);
        assert_eq!(config.timeouts.check_response_secs, 31);
        assert_eq!(config.timeouts.analyze_topics_secs, 58);
        assert_eq!(config.timeouts.assist_secs, 58);
        assert_eq!(config.timeouts.switch_format_secs, 21);
        assert_eq!(config.context.optional_questions, vec![7]);
        assert_eq!(config.context.unchecked_questions, vec![5, 6, 7]);
        assert!(config.session.user_code.is_none());
    }

    #[test]
    fn test_overrides() {
        let file = write_config(
            r#"
[api]
base_url = "https://surveys.example.org"

[session]
user_code = "abc123"

[sync]
save_interval_secs = 5

[timeouts]
analyze_topics_secs = 90
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.session.user_code.as_deref(), Some("abc123"));
        assert_eq!(config.sync.save_interval(), Duration::from_secs(5));
        assert_eq!(config.timeouts.analyze_topics(), Duration::from_secs(90));
    }

    #[test]
    fn test_rejects_bad_values() {
        let file = write_config("[api]\nbase_url = \"\"\n");
        assert!(load_config(file.path()).is_err());

        let file = write_config("[api]\nbase_url = \"localhost\"\n");
        assert!(load_config(file.path()).is_err());

        let file = write_config("[api]\nbase_url = \"http://x\"\n[sync]\nsave_interval_secs = 0\n");
        assert!(load_config(file.path()).is_err());

        let file = write_config("[api]\nbase_url = \"http://x\"\n[timeouts]\ntask_poll_interval_secs = 200\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/svsync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
