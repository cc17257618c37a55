//! Application-level configuration loading: phase durations, room lifetimes and reconnect policy.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::client::backoff::ReconnectPolicy;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_CONFIG_PATH";
/// Directory holding question-set JSON files when the config does not name one.
const DEFAULT_QUESTION_SETS_DIR: &str = "config/question-sets";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    explanation_time: Duration,
    leaderboard_time: Duration,
    finished_room_ttl: Duration,
    idle_room_ttl: Duration,
    sweep_interval: Duration,
    player_reconnect_grace: Duration,
    question_sets_dir: PathBuf,
    reconnect: ReconnectPolicy,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        question_sets = %app_config.question_sets_dir.display(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Default explanation phase duration.
    pub fn explanation_time(&self) -> Duration {
        self.explanation_time
    }

    /// Default leaderboard phase duration.
    pub fn leaderboard_time(&self) -> Duration {
        self.leaderboard_time
    }

    /// How long a finished room stays around to answer restoration requests.
    pub fn finished_room_ttl(&self) -> Duration {
        self.finished_room_ttl
    }

    /// Inactivity after which a room without host is closed.
    pub fn idle_room_ttl(&self) -> Duration {
        self.idle_room_ttl
    }

    /// Period of the idle room sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Time a dropped player stays `reconnecting` before being marked `disconnected`.
    pub fn player_reconnect_grace(&self) -> Duration {
        self.player_reconnect_grace
    }

    /// Directory scanned for question sets at startup.
    pub fn question_sets_dir(&self) -> &PathBuf {
        &self.question_sets_dir
    }

    /// Client reconnection defaults.
    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            explanation_time: Duration::from_secs(10),
            leaderboard_time: Duration::from_secs(8),
            finished_room_ttl: Duration::from_secs(5 * 60),
            idle_room_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            player_reconnect_grace: Duration::from_secs(30),
            question_sets_dir: PathBuf::from(DEFAULT_QUESTION_SETS_DIR),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    explanation_time_secs: Option<u64>,
    leaderboard_time_secs: Option<u64>,
    finished_room_ttl_secs: Option<u64>,
    idle_room_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    player_reconnect_grace_secs: Option<u64>,
    question_sets_dir: Option<PathBuf>,
    #[serde(default)]
    reconnect: RawReconnect,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the `reconnect` section.
struct RawReconnect {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    outbound_queue_limit: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        let secs = |raw: Option<u64>, fallback: Duration| {
            raw.filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            explanation_time: secs(value.explanation_time_secs, defaults.explanation_time),
            leaderboard_time: secs(value.leaderboard_time_secs, defaults.leaderboard_time),
            finished_room_ttl: secs(value.finished_room_ttl_secs, defaults.finished_room_ttl),
            idle_room_ttl: secs(value.idle_room_ttl_secs, defaults.idle_room_ttl),
            sweep_interval: secs(value.sweep_interval_secs, defaults.sweep_interval),
            player_reconnect_grace: secs(
                value.player_reconnect_grace_secs,
                defaults.player_reconnect_grace,
            ),
            question_sets_dir: value
                .question_sets_dir
                .unwrap_or(defaults.question_sets_dir),
            reconnect: value.reconnect.into(),
        }
    }
}

impl From<RawReconnect> for ReconnectPolicy {
    fn from(value: RawReconnect) -> Self {
        let defaults = ReconnectPolicy::default();
        Self {
            base_delay: value
                .base_delay_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: value
                .max_delay_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            max_attempts: value.max_attempts.unwrap_or(defaults.max_attempts),
            outbound_queue_limit: value
                .outbound_queue_limit
                .unwrap_or(defaults.outbound_queue_limit),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults_for_missing_keys() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"explanationTimeSecs": 4, "idleRoomTtlSecs": 0, "reconnect": {"maxAttempts": 9}}"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.explanation_time(), Duration::from_secs(4));
        assert_eq!(config.leaderboard_time(), Duration::from_secs(8));
        assert_eq!(config.idle_room_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.reconnect().max_attempts, 9);
        assert_eq!(config.reconnect().base_delay, Duration::from_secs(1));
    }
}
