use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use curate_core::DEFAULT_PAGE_SIZE;
use curate_sources::HttpClientConfig;
use serde::Deserialize;

use crate::bulk::DEFAULT_BULK_CONCURRENCY;
use crate::scheduler::RefreshIntervals;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub active_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub heartbeat_secs: u64,
    pub bulk_concurrency: usize,
    pub page_size: u32,
    pub auto_refresh: bool,
    pub web_port: u16,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            api_token: None,
            user_agent: "curate-console/0.1".to_string(),
            http_timeout_secs: 20,
            active_interval_secs: 30,
            idle_interval_secs: 600,
            heartbeat_secs: 60,
            bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            auto_refresh: false,
            web_port: 8000,
        }
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "True" | "yes" | "on")
}

impl ConsoleConfig {
    /// Defaults, then the YAML file (if any), then `CURATE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        Ok(base.overlay(|key| std::env::var(key).ok()))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Apply `CURATE_*` overrides from `lookup`; unparsable values are ignored.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = lookup("CURATE_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("CURATE_API_TOKEN").filter(|v| !v.is_empty()) {
            self.api_token = Some(v);
        }
        if let Some(v) = lookup("CURATE_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = parsed(lookup("CURATE_HTTP_TIMEOUT_SECS")) {
            self.http_timeout_secs = v;
        }
        if let Some(v) = parsed(lookup("CURATE_ACTIVE_INTERVAL_SECS")) {
            self.active_interval_secs = v;
        }
        if let Some(v) = parsed(lookup("CURATE_IDLE_INTERVAL_SECS")) {
            self.idle_interval_secs = v;
        }
        if let Some(v) = parsed(lookup("CURATE_HEARTBEAT_SECS")) {
            self.heartbeat_secs = v;
        }
        if let Some(v) = parsed(lookup("CURATE_BULK_CONCURRENCY")) {
            self.bulk_concurrency = v;
        }
        if let Some(v) = parsed(lookup("CURATE_PAGE_SIZE")) {
            self.page_size = v;
        }
        if let Some(v) = lookup("CURATE_AUTO_REFRESH") {
            self.auto_refresh = is_truthy(&v);
        }
        if let Some(v) = parsed(lookup("CURATE_WEB_PORT")) {
            self.web_port = v;
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.bulk_concurrency = self.bulk_concurrency.max(1);
        self.page_size = self.page_size.max(1);
        self.active_interval_secs = self.active_interval_secs.max(1);
        self.idle_interval_secs = self.idle_interval_secs.max(1);
        self.heartbeat_secs = self.heartbeat_secs.max(1);
        self
    }

    pub fn intervals(&self) -> RefreshIntervals {
        RefreshIntervals {
            active: Duration::from_secs(self.active_interval_secs.max(1)),
            idle: Duration::from_secs(self.idle_interval_secs.max(1)),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            bearer_token: self.api_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_refresh_policy() {
        let config = ConsoleConfig::default();
        assert_eq!(config.intervals().active, Duration::from_secs(30));
        assert_eq!(config.intervals().idle, Duration::from_secs(600));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.bulk_concurrency, 5);
        assert!(!config.auto_refresh);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CURATE_API_URL", "https://admin.example.com/api"),
            ("CURATE_API_TOKEN", "tok"),
            ("CURATE_ACTIVE_INTERVAL_SECS", "15"),
            ("CURATE_IDLE_INTERVAL_SECS", "ten minutes"),
            ("CURATE_BULK_CONCURRENCY", "0"),
            ("CURATE_AUTO_REFRESH", "true"),
        ]);
        let config = ConsoleConfig::default().overlay(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://admin.example.com/api");
        assert_eq!(config.api_token.as_deref(), Some("tok"));
        assert_eq!(config.active_interval_secs, 15);
        assert_eq!(config.idle_interval_secs, 600);
        assert_eq!(config.bulk_concurrency, 1);
        assert!(config.auto_refresh);

        let http = config.http_client_config();
        assert_eq!(http.bearer_token.as_deref(), Some("tok"));
        assert_eq!(http.timeout, Duration::from_secs(20));
    }

    #[test]
    fn yaml_file_fills_unset_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "api_base_url: http://curation.internal/api\npage_size: 50").unwrap();
        let config = ConsoleConfig::from_yaml_file(file.path()).expect("config");
        assert_eq!(config.api_base_url, "http://curation.internal/api");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.heartbeat_secs, 60);
    }

    #[test]
    fn missing_yaml_file_has_context() {
        let err = ConsoleConfig::from_yaml_file(Path::new("/nonexistent/console.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("reading /nonexistent/console.yaml"));
    }
}
