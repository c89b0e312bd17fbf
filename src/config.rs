//! Environment-driven configuration.
//!
//! Every value has a default so the client and the notifier both start with
//! an empty environment.

use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_VOTE_ANIMATION: Duration = Duration::from_millis(1200);
const DEFAULT_COMMIT_WINDOW: Duration = Duration::from_millis(800);
const DEFAULT_NOTIFIER_PORT: u16 = 7425;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            None
        }
    }
}

/// Pacing of a poll card's vote interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    /// Minimum time the cast-vote animation plays before the card commits
    pub vote_animation: Duration,
    /// Settle delay after the server acknowledged a vote before stats unlock.
    /// The backend read path may lag its write path.
    pub commit_window: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            vote_animation: DEFAULT_VOTE_ANIMATION,
            commit_window: DEFAULT_COMMIT_WINDOW,
        }
    }
}

impl LifecycleTimings {
    /// No delays at all, for headless use
    pub fn immediate() -> Self {
        Self {
            vote_animation: Duration::ZERO,
            commit_window: Duration::ZERO,
        }
    }
}

/// Configuration for the REST client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Picknic backend, without trailing slash
    pub api_base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Per-request timeout. There is no retry.
    pub http_timeout: Duration,
    pub timings: LifecycleTimings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            timings: LifecycleTimings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let api_base_url = env_string("PICKNIC_API_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let timings = LifecycleTimings {
            vote_animation: env_parse("PICKNIC_VOTE_ANIMATION_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_VOTE_ANIMATION),
            commit_window: env_parse("PICKNIC_COMMIT_WINDOW_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COMMIT_WINDOW),
        };

        Self {
            api_base_url,
            api_token: env_string("PICKNIC_API_TOKEN"),
            http_timeout: env_parse("PICKNIC_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT),
            timings,
        }
    }
}

/// Configuration for the hot-poll notifier service
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierConfig {
    pub port: u16,
    /// Users known at startup, comma separated in the environment
    pub seed_users: Vec<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_NOTIFIER_PORT,
            seed_users: Vec::new(),
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        let seed_users = env_string("PICKNIC_NOTIFIER_USERS")
            .map(|users| {
                users
                    .split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            port: env_parse("PICKNIC_NOTIFIER_PORT").unwrap_or(DEFAULT_NOTIFIER_PORT),
            seed_users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "PICKNIC_API_BASE_URL",
        "PICKNIC_API_TOKEN",
        "PICKNIC_HTTP_TIMEOUT_SECS",
        "PICKNIC_VOTE_ANIMATION_MS",
        "PICKNIC_COMMIT_WINDOW_MS",
        "PICKNIC_NOTIFIER_PORT",
        "PICKNIC_NOTIFIER_USERS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = ClientConfig::from_env();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert!(config.api_token.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.timings, LifecycleTimings::default());
        assert_eq!(config.timings.vote_animation, Duration::from_millis(1200));
        assert_eq!(config.timings.commit_window, Duration::from_millis(800));
    }

    #[test]
    #[serial]
    fn test_client_config_from_env() {
        clear_env();
        std::env::set_var("PICKNIC_API_BASE_URL", " https://api.picknic.kr/api/ ");
        std::env::set_var("PICKNIC_API_TOKEN", "secret");
        std::env::set_var("PICKNIC_HTTP_TIMEOUT_SECS", "3");
        std::env::set_var("PICKNIC_COMMIT_WINDOW_MS", "1500");
        std::env::set_var("PICKNIC_VOTE_ANIMATION_MS", "not-a-number");

        let config = ClientConfig::from_env();
        assert_eq!(config.api_base_url, "https://api.picknic.kr/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.timings.commit_window, Duration::from_millis(1500));
        assert_eq!(config.timings.vote_animation, DEFAULT_VOTE_ANIMATION);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_notifier_config_from_env() {
        clear_env();
        std::env::set_var("PICKNIC_NOTIFIER_PORT", "9000");
        std::env::set_var("PICKNIC_NOTIFIER_USERS", "a@x.kr, b@x.kr,,");

        let config = NotifierConfig::from_env();
        assert_eq!(config.port, 9000);
        assert_eq!(config.seed_users, vec!["a@x.kr", "b@x.kr"]);
        clear_env();

        assert_eq!(NotifierConfig::from_env(), NotifierConfig::default());
    }
}
