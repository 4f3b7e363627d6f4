//! Client settings
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{QueueError, Result};

/// Default location of the settings file
pub const DEFAULT_CONFIG_PATH: &str = "./queue-client.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub queue: QueueSettings,
    pub dirs: DirSettings,
    pub polling: PollingSettings,
    pub callback: CallbackSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Base URL of the queue API (e.g. "http://localhost:8000/v1")
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DirSettings {
    /// Shared data directory; task files live under `<dat>/tasks`
    pub dat: PathBuf,
    /// Checkout of the grading tests (drivers/ and tests/)
    pub tests: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    /// Address the callback receiver listens on
    pub bind: String,
    /// URL prefix the queue uses to reach the receiver
    pub public_url: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".into(),
            username: "admin".into(),
            password: "changeme".into(),
        }
    }
}

impl Default for DirSettings {
    fn default() -> Self {
        Self {
            dat: PathBuf::from("/home/jutge/dat"),
            tests: PathBuf::from("/home/jutge/git/jutge-tests"),
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            timeout_ms: 30_000,
        }
    }
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:15555".into(),
            public_url: "http://localhost:15555".into(),
        }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Load settings from `QUEUE_CLIENT_CONFIG` (or the default path) and
    /// the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("QUEUE_CLIENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut settings = Self::from_file(Path::new(&path))?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Read a TOML settings file on top of the defaults.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)
            .map_err(|e| QueueError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Using settings file {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override fields from environment variables, looked up through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("QUEUE_BASE_URL") {
            self.queue.base_url = v;
        }
        if let Some(v) = var("QUEUE_USERNAME") {
            self.queue.username = v;
        }
        if let Some(v) = var("QUEUE_PASSWORD") {
            self.queue.password = v;
        }
        if let Some(v) = var("QUEUE_DAT_DIR") {
            self.dirs.dat = PathBuf::from(v);
        }
        if let Some(v) = var("QUEUE_TESTS_DIR") {
            self.dirs.tests = PathBuf::from(v);
        }
        if let Some(v) = var("QUEUE_POLL_INTERVAL_MS") {
            self.polling.interval_ms = parse_millis("QUEUE_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("QUEUE_POLL_TIMEOUT_MS") {
            self.polling.timeout_ms = parse_millis("QUEUE_POLL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("QUEUE_CALLBACK_BIND") {
            self.callback.bind = v;
        }
        if let Some(v) = var("QUEUE_CALLBACK_URL") {
            self.callback.public_url = v;
        }
        Ok(())
    }

    /// Directory holding `<id>.input.tar` and `<id>.output.tar.gz`
    pub fn tasks_dir(&self) -> PathBuf {
        self.dirs.dat.join("tasks")
    }

    /// Human readable listing with the password masked
    pub fn summary(&self) -> String {
        format!(
            "queue.base_url = {}\nqueue.username = {}\nqueue.password = **********\n\
             dirs.dat = {}\ndirs.tests = {}\n\
             polling.interval_ms = {}\npolling.timeout_ms = {}\n\
             callback.bind = {}\ncallback.public_url = {}",
            self.queue.base_url,
            self.queue.username,
            self.dirs.dat.display(),
            self.dirs.tests.display(),
            self.polling.interval_ms,
            self.polling.timeout_ms,
            self.callback.bind,
            self.callback.public_url,
        )
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| QueueError::Config(format!("{} must be milliseconds, got {:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
[queue]
base_url = "http://queue.example:8001/v1"

[polling]
timeout_ms = 12000
"#,
        )
        .unwrap();

        assert_eq!(settings.queue.base_url, "http://queue.example:8001/v1");
        assert_eq!(settings.queue.username, "admin");
        assert_eq!(settings.polling.timeout_ms, 12_000);
        assert_eq!(settings.polling.interval_ms, 500);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[queue]\nusername = \"from-file\"\npassword = \"secret\"").unwrap();

        let mut settings = Settings::from_file(file.path()).unwrap();
        let env: HashMap<&str, &str> = [
            ("QUEUE_USERNAME", "from-env"),
            ("QUEUE_POLL_INTERVAL_MS", "400"),
            ("QUEUE_DAT_DIR", "/srv/dat"),
        ]
        .into_iter()
        .collect();
        settings
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.queue.username, "from-env");
        assert_eq!(settings.queue.password, "secret");
        assert_eq!(settings.polling.interval(), Duration::from_millis(400));
        assert_eq!(settings.tasks_dir(), PathBuf::from("/srv/dat/tasks"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[queue\nbase_url = 3").unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn test_bad_millis_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_env(|key| {
            (key == "QUEUE_POLL_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_summary_masks_password() {
        let mut settings = Settings::default();
        settings.queue.password = "h487kjlAQ".into();
        let summary = settings.summary();
        assert!(!summary.contains("h487kjlAQ"));
        assert!(summary.contains("**********"));
    }
}
