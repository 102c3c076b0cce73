//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client runs with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tandem_shared::constants::DEFAULT_MAX_IDS_PER_QUERY;

use crate::writes::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite file backing the local document store. `None` keeps documents
    /// in memory only.
    /// Env: `TANDEM_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Largest id set placed in one `chats` subscription.
    /// Env: `TANDEM_MAX_IDS_PER_QUERY`
    /// Default: `30`
    pub max_ids_per_query: usize,

    /// Extra attempts for a failed write before it is reported.
    /// Env: `TANDEM_WRITE_RETRIES`
    /// Default: `2`
    pub write_retries: u32,

    /// Delay before retry `n` is `n * retry_backoff`.
    /// Env: `TANDEM_RETRY_BACKOFF_MS`
    /// Default: `250`
    pub retry_backoff: Duration,

    /// Mark peer messages read as they arrive in the open conversation.
    /// Env: `TANDEM_MARK_ACTIVE_ON_RECEIVE` (true/false)
    /// Default: `true`
    pub mark_active_on_receive: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_ids_per_query: DEFAULT_MAX_IDS_PER_QUERY,
            write_retries: 2,
            retry_backoff: Duration::from_millis(250),
            mark_active_on_receive: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TANDEM_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = parse_var::<usize>(&lookup, "TANDEM_MAX_IDS_PER_QUERY") {
            if n == 0 {
                tracing::warn!("TANDEM_MAX_IDS_PER_QUERY must be positive, using default");
            } else {
                config.max_ids_per_query = n;
            }
        }

        if let Some(n) = parse_var::<u32>(&lookup, "TANDEM_WRITE_RETRIES") {
            config.write_retries = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "TANDEM_RETRY_BACKOFF_MS") {
            config.retry_backoff = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("TANDEM_MARK_ACTIVE_ON_RECEIVE") {
            config.mark_active_on_receive = val != "false" && val != "0";
        }

        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.write_retries,
            backoff: self.retry_backoff,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.max_ids_per_query, 30);
        assert!(config.db_path.is_none());
        assert!(config.mark_active_on_receive);
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TANDEM_DB_PATH", "/tmp/t.db"),
            ("TANDEM_MAX_IDS_PER_QUERY", "10"),
            ("TANDEM_WRITE_RETRIES", "0"),
            ("TANDEM_RETRY_BACKOFF_MS", "5"),
            ("TANDEM_MARK_ACTIVE_ON_RECEIVE", "false"),
        ]));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/t.db")));
        assert_eq!(config.max_ids_per_query, 10);
        assert_eq!(config.retry_policy().retries, 0);
        assert_eq!(config.retry_backoff, Duration::from_millis(5));
        assert!(!config.mark_active_on_receive);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TANDEM_MAX_IDS_PER_QUERY", "0"),
            ("TANDEM_WRITE_RETRIES", "lots"),
        ]));
        assert_eq!(config.max_ids_per_query, DEFAULT_MAX_IDS_PER_QUERY);
        assert_eq!(config.write_retries, 2);
    }
}
