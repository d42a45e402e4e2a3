//! Configuration loader and validator for the caddie turn service.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::{ListNumber, ListSettings};
use crate::validation;

/// Longest allowed poll period; the board must refresh in under five seconds.
const MAX_POLL_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: BackendConfig,
    pub lists: Vec<ListConfig>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
}

/// REST backend location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// Local defaults for one list, used until the backend reports its settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListConfig {
    pub number: ListNumber,
    pub call_time: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Backend base URL, always ending in `/` so relative paths join below it.
    pub fn backend_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.backend.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|_| ConfigError::Invalid("backend.base_url must be a valid URL"))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(ConfigError::Invalid("backend.base_url must use http or https")),
        }
    }

    /// Initial settings for every list.
    pub fn list_defaults(&self) -> Vec<ListSettings> {
        self.lists
            .iter()
            .map(|l| ListSettings::initial(l.number, l.call_time.clone()))
            .collect()
    }

    /// `DATABASE_URL` if set, otherwise a file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/caddie-turns.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 || cfg.app.poll_interval_ms >= MAX_POLL_INTERVAL_MS {
        return Err(ConfigError::Invalid(
            "app.poll_interval_ms must be between 1 and 4999",
        ));
    }

    cfg.backend_url()?;
    if cfg.backend.timeout_ms == 0 {
        return Err(ConfigError::Invalid("backend.timeout_ms must be > 0"));
    }

    for list in ListNumber::ALL {
        match cfg.lists.iter().filter(|l| l.number == list).count() {
            0 => return Err(ConfigError::Invalid("lists must configure lists 1, 2 and 3")),
            1 => {}
            _ => return Err(ConfigError::Invalid("lists must not repeat a list number")),
        }
    }
    if cfg
        .lists
        .iter()
        .any(|l| validation::call_time(&l.call_time).is_err())
    {
        return Err(ConfigError::Invalid("lists[].call_time must be HH:mm"));
    }

    Ok(())
}

/// Returns the example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 2000

backend:
  base_url: "http://localhost:3000/api/"
  timeout_ms: 30000

lists:
  - number: 1
    call_time: "06:00"
  - number: 2
    call_time: "08:00"
  - number: 3
    call_time: "10:00"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.list_defaults().len(), 3);
    }

    #[test]
    fn poll_interval_bounds() {
        let mut cfg = example_cfg();
        cfg.app.poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("poll_interval_ms")));

        cfg.app.poll_interval_ms = 5000;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        cfg.app.poll_interval_ms = 4999;
        validate(&cfg).unwrap();
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let mut cfg = example_cfg();
        cfg.backend.base_url = "https://caddies.example.com/api".into();
        assert_eq!(
            cfg.backend_url().unwrap().as_str(),
            "https://caddies.example.com/api/"
        );

        cfg.backend.base_url = "ftp://caddies.example.com".into();
        assert!(validate(&cfg).is_err());

        cfg.backend.base_url = "not a url".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("base_url")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_timeout() {
        let mut cfg = example_cfg();
        cfg.backend.timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("timeout_ms")));
    }

    #[test]
    fn lists_must_cover_each_list_once() {
        let mut cfg = example_cfg();
        cfg.lists.pop();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.lists[2].number = ListNumber::One;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.lists[1].call_time = "8am".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("call_time")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn unknown_list_number_fails_to_parse() {
        let yaml = example().replace("number: 3", "number: 4");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.backend.timeout_ms, 30000);
        assert_eq!(cfg.lists[1].number, ListNumber::Two);
    }
}
