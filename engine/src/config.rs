use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub alarm: AlarmSettings,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Bus information API access
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the service key
    pub access_key_env: String,
    /// Requests allowed per calendar day before `TrafficExceed` is returned
    pub daily_request_limit: u32,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ws.bus.go.kr/api/rest".to_string(),
            access_key_env: "BBUS_API_ACCESS_KEY".to_string(),
            daily_request_limit: 300,
            timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

/// Tunables shared by both alarm coordinators
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlarmSettings {
    pub poll_interval_secs: u64,
    pub countdown_tick_millis: u64,
    /// Minimum spacing between two accepted manual refreshes
    pub refresh_throttle_millis: u64,
    /// Remaining stop count at which an approach message is sent
    pub approach_threshold_stops: u32,
    pub board_match_tolerance_meters: f64,
    /// A previously matched vehicle is kept while it is at most this much
    /// farther away than the nearest candidate
    pub board_match_tie_margin_meters: f64,
    /// Location samples and vehicle positions older than this are ignored
    pub position_max_age_secs: i64,
    pub location_debounce_millis: u64,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            countdown_tick_millis: 1000,
            refresh_throttle_millis: 3000,
            approach_threshold_stops: 2,
            board_match_tolerance_meters: 100.0,
            board_match_tie_margin_meters: 15.0,
            position_max_age_secs: 120,
            location_debounce_millis: 500,
        }
    }
}

impl AlarmSettings {
    /// Timer periods must be non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("alarm.poll_interval_secs must be at least 1".to_string()));
        }
        if self.countdown_tick_millis == 0 {
            return Err(ConfigError::InvalidValue(
                "alarm.countdown_tick_millis must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_millis.max(1))
    }

    pub fn refresh_throttle(&self) -> Duration {
        Duration::from_millis(self.refresh_throttle_millis)
    }

    pub fn location_debounce(&self) -> Duration {
        Duration::from_millis(self.location_debounce_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/bbus.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            cors_origins: Vec::new(),
            cors_permissive: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.alarm.validate()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = Config::parse("alarm:\n  approach_threshold_stops: 1\n").unwrap();

        assert_eq!(config.alarm.approach_threshold_stops, 1);
        assert_eq!(config.alarm.poll_interval_secs, 15);
        assert_eq!(config.api.daily_request_limit, 300);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn rejects_zero_timer_periods() {
        let err = Config::parse("alarm:\n  poll_interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = Config::parse("alarm:\n  countdown_tick_millis: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn zero_periods_built_in_code_are_clamped() {
        let settings = AlarmSettings {
            poll_interval_secs: 0,
            countdown_tick_millis: 0,
            ..AlarmSettings::default()
        };
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.countdown_tick(), Duration::from_millis(1));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = Config::parse("alarm: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
