// Client configuration sourced from environment variables with an optional
// YAML override file.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TOKEN_PATH: &str = ".lectern/session.json";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub token_path: PathBuf,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    api_base_url: Option<String>,
    token_path: Option<PathBuf>,
    request_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Configuration for a service at `base_url`, defaults elsewhere.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: normalize_base_url(base_url.into()),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_base_url = std::env::var("LECTERN_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        let token_path = std::env::var("LECTERN_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_PATH));
        let request_timeout_ms = match std::env::var("LECTERN_REQUEST_TIMEOUT_MS") {
            Ok(value) => value
                .parse()
                .with_context(|| "parse LECTERN_REQUEST_TIMEOUT_MS")?,
            Err(_) => DEFAULT_REQUEST_TIMEOUT_MS,
        };
        Ok(Self {
            api_base_url: normalize_base_url(api_base_url),
            token_path,
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }

    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("LECTERN_CLIENT_CONFIG").ok());
        if let Some(path) = override_path {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read client config: {path}"))?;
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }
}

impl ClientConfigOverride {
    fn apply(self, config: &mut ClientConfig) {
        if let Some(value) = self.api_base_url {
            config.api_base_url = normalize_base_url(value);
        }
        if let Some(value) = self.token_path {
            config.token_path = value;
        }
        if let Some(value) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(value);
        }
    }
}

fn normalize_base_url(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        let _g1 = EnvGuard::unset("LECTERN_API_BASE_URL");
        let _g2 = EnvGuard::unset("LECTERN_TOKEN_PATH");
        let _g3 = EnvGuard::unset("LECTERN_REQUEST_TIMEOUT_MS");
        let config = ClientConfig::from_env().expect("config");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.token_path, PathBuf::from(DEFAULT_TOKEN_PATH));
        assert_eq!(
            config.request_timeout,
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
        );
    }

    #[test]
    #[serial]
    fn env_values_are_applied() {
        let _g1 = EnvGuard::set("LECTERN_API_BASE_URL", "https://library.example.com/api/");
        let _g2 = EnvGuard::set("LECTERN_TOKEN_PATH", "/tmp/lectern.json");
        let _g3 = EnvGuard::set("LECTERN_REQUEST_TIMEOUT_MS", "2500");
        let config = ClientConfig::from_env().expect("config");
        assert_eq!(config.api_base_url, "https://library.example.com/api");
        assert_eq!(config.token_path, PathBuf::from("/tmp/lectern.json"));
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
    }

    #[test]
    #[serial]
    fn invalid_timeout_is_reported() {
        let _g = EnvGuard::set("LECTERN_REQUEST_TIMEOUT_MS", "soon");
        let err = ClientConfig::from_env().expect_err("invalid timeout");
        assert!(err.to_string().contains("LECTERN_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    #[serial]
    fn yaml_override_wins_over_env() {
        let _g1 = EnvGuard::set("LECTERN_API_BASE_URL", "http://env.example.com");
        let _g2 = EnvGuard::unset("LECTERN_CLIENT_CONFIG");
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "api_base_url: http://yaml.example.com/").expect("write");
        writeln!(file, "request_timeout_ms: 750").expect("write");
        let path = file.path().to_string_lossy().to_string();

        let config = ClientConfig::from_env_or_yaml(Some(&path)).expect("config");
        assert_eq!(config.api_base_url, "http://yaml.example.com");
        assert_eq!(config.request_timeout, Duration::from_millis(750));
    }

    #[test]
    #[serial]
    fn yaml_path_from_env() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "token_path: /var/lib/lectern/token.json").expect("write");
        let path = file.path().to_string_lossy().to_string();
        let _g = EnvGuard::set("LECTERN_CLIENT_CONFIG", &path);

        let config = ClientConfig::from_env_or_yaml(None).expect("config");
        assert_eq!(
            config.token_path,
            PathBuf::from("/var/lib/lectern/token.json")
        );
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        let _g = EnvGuard::unset("LECTERN_CLIENT_CONFIG");
        let err = ClientConfig::from_env_or_yaml(Some("/nonexistent/lectern.yaml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("read client config"));
    }

    #[test]
    fn for_base_url_trims_trailing_slash() {
        let config = ClientConfig::for_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
    }
}
