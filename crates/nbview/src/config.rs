use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rendergraph::wgpu::PowerPreference;
use rendergraph::DEFAULT_VISIBILITY_THRESHOLD;
use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    Low,
    #[default]
    High,
}

impl PowerSetting {
    pub fn preference(self) -> PowerPreference {
        match self {
            PowerSetting::Low => PowerPreference::LowPower,
            PowerSetting::High => PowerPreference::HighPerformance,
        }
    }
}

/// Optional `--config` file for the viewer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewerConfig {
    /// FPS cap for cells that do not set `performance.target_fps`.
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub power: PowerSetting,
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    /// Stop after this long; runs until closed (or `--frames`) when absent.
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub run_duration: Option<Duration>,
    #[serde(
        default = "default_stats_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub stats_interval: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            fps: None,
            power: PowerSetting::default(),
            visibility_threshold: default_visibility_threshold(),
            run_duration: None,
            stats_interval: default_stats_interval(),
        }
    }
}

fn default_visibility_threshold() -> f32 {
    DEFAULT_VISIBILITY_THRESHOLD
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(5)
}

impl ViewerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(ConfigError::Invalid(format!("fps must be >= 0, got {fps}")));
            }
        }
        if !(0.0..=1.0).contains(&self.visibility_threshold) {
            return Err(ConfigError::Invalid(format!(
                "visibility_threshold must be within 0..=1, got {}",
                self.visibility_threshold
            )));
        }
        if self.run_duration.is_some_and(|duration| duration.is_zero()) {
            return Err(ConfigError::Invalid(
                "run_duration must be greater than zero".into(),
            ));
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "stats_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer).map(|d| d.unwrap_or_else(default_stats_interval))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ViewerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.power.preference(), PowerPreference::HighPerformance);
    }

    #[test]
    fn parses_durations_and_power() {
        let config = ViewerConfig::from_toml_str(
            r#"
fps = 30
power = "low"
visibility_threshold = 0.5
run_duration = "1m 30s"
stats_interval = 2
"#,
        )
        .unwrap();
        assert_eq!(config.fps, Some(30.0));
        assert_eq!(config.power, PowerSetting::Low);
        assert_eq!(config.run_duration, Some(Duration::from_secs(90)));
        assert_eq!(config.stats_interval, Duration::from_secs(2));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = ViewerConfig::from_toml_str("visibility_threshold = 2.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = ViewerConfig::from_toml_str("fps = -1").unwrap_err();
        assert!(err.to_string().contains("fps"));
        let err = ViewerConfig::from_toml_str("stats_interval = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = ViewerConfig::from_toml_str("colour = \"red\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
