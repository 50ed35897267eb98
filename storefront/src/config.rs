//! Installer configuration: timings, label variants and the `mas` invocation.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.
//! [`InstallerConfig::validate`] turns the raw values into [`Settings`], which is
//! what the automation actually consumes.

use crate::errors::AutomationError;
use crate::locator::DEFAULT_MAX_DEPTH;
use crate::registry::MasConfig;
use crate::selector::{LabelPatterns, Selector};
use crate::wait::WaitSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BUNDLE_ID: &str = "com.apple.appstore";
pub const DEFAULT_INSTALL_CONTROL: &str = "AXWebArea >> AXGroup >> AXGroup >> AXButton";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for '{field}': {source}")]
    Invalid {
        field: &'static str,
        #[source]
        source: AutomationError,
    },
}

/// Parse human-readable duration strings.
/// Supports formats like: "1s", "500ms", "2m", "1.5s", "30", "2h".
/// A plain number is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, AutomationError> {
    let input = input.trim();

    if let Ok(ms) = input.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let split_pos = input
        .char_indices()
        .find(|(_, ch)| ch.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    let (number_part, unit_part) = input.split_at(split_pos);
    let number_part = number_part.trim();

    if number_part.is_empty() {
        return Err(AutomationError::InvalidArgument(format!(
            "No numeric value in duration: '{input}'"
        )));
    }
    let value: f64 = number_part.parse().map_err(|_| {
        AutomationError::InvalidArgument(format!("Invalid number in duration: '{number_part}'"))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(AutomationError::InvalidArgument(format!(
            "Duration must be a non-negative number: '{input}'"
        )));
    }

    let multiplier = match unit_part {
        "ms" | "milliseconds" | "millisecond" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        _ => {
            return Err(AutomationError::InvalidArgument(format!(
                "Unknown time unit: '{unit_part}'"
            )))
        }
    };

    Ok(Duration::from_millis((value * multiplier) as u64))
}

/// Formats a duration the way [`parse_duration`] reads it back.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms == 0 {
        "0ms".to_string()
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

mod human_duration {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}

/// Raw configuration as read from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    pub bundle_id: String,
    #[serde(with = "human_duration")]
    pub startup_timeout: Duration,
    #[serde(with = "human_duration")]
    pub navigation_timeout: Duration,
    #[serde(with = "human_duration")]
    pub ui_poll_interval: Duration,
    /// Fixed pause after opening an app's page. The page exposes no readiness
    /// signal, so this is a guess; raise it on slow machines.
    #[serde(with = "human_duration")]
    pub settle_delay: Duration,
    #[serde(with = "human_duration")]
    pub install_poll_interval: Duration,
    #[serde(with = "human_duration")]
    pub install_timeout: Duration,
    /// Selector, relative to the main window, for the install button.
    pub install_control: String,
    /// Regexes for the button description shown once an install finished.
    /// Varies by OS release.
    pub completion_labels: Vec<String>,
    pub max_search_depth: usize,
    pub mas: MasConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            bundle_id: DEFAULT_BUNDLE_ID.to_string(),
            startup_timeout: Duration::from_secs(15),
            navigation_timeout: Duration::from_secs(15),
            ui_poll_interval: Duration::from_millis(200),
            settle_delay: Duration::from_secs(3),
            install_poll_interval: Duration::from_secs(1),
            install_timeout: Duration::from_secs(600),
            install_control: DEFAULT_INSTALL_CONTROL.to_string(),
            completion_labels: vec!["^Installed,".to_string(), "^Open,".to_string()],
            max_search_depth: DEFAULT_MAX_DEPTH,
            mas: MasConfig::default(),
        }
    }
}

/// Validated, ready-to-use form of [`InstallerConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub bundle_id: String,
    pub startup: WaitSpec,
    pub navigation: WaitSpec,
    pub settle_delay: Duration,
    pub install_poll_interval: Duration,
    pub install_timeout: Duration,
    pub install_control: Selector,
    pub completion_labels: LabelPatterns,
    pub max_search_depth: usize,
}

impl Settings {
    /// Wait bounds for one install, rejecting timeouts shorter than the poll interval.
    pub fn install_wait(&self, timeout: Duration) -> Result<WaitSpec, AutomationError> {
        WaitSpec::new(self.install_poll_interval, timeout)
    }
}

impl InstallerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Builds every wait bound and compiles every selector and pattern, so bad
    /// values fail here rather than halfway through driving the UI.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let invalid = |field: &'static str| move |source| ConfigError::Invalid { field, source };

        if self.bundle_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "bundle_id",
                source: AutomationError::InvalidArgument("bundle id is empty".to_string()),
            });
        }
        if self.max_search_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_search_depth",
                source: AutomationError::InvalidArgument("search depth must be at least 1".to_string()),
            });
        }

        let startup = WaitSpec::new(self.ui_poll_interval, self.startup_timeout)
            .map_err(invalid("startup_timeout"))?;
        let navigation = WaitSpec::new(self.ui_poll_interval, self.navigation_timeout)
            .map_err(invalid("navigation_timeout"))?;
        WaitSpec::new(self.install_poll_interval, self.install_timeout)
            .map_err(invalid("install_timeout"))?;

        let install_control: Selector = self
            .install_control
            .parse()
            .map_err(invalid("install_control"))?;
        let completion_labels = LabelPatterns::regexes(&self.completion_labels)
            .map_err(invalid("completion_labels"))?;
        if completion_labels.is_empty() {
            return Err(ConfigError::Invalid {
                field: "completion_labels",
                source: AutomationError::InvalidArgument("at least one pattern is required".to_string()),
            });
        }

        Ok(Settings {
            bundle_id: self.bundle_id.clone(),
            startup,
            navigation,
            settle_delay: self.settle_delay,
            install_poll_interval: self.install_poll_interval,
            install_timeout: self.install_timeout,
            install_control,
            completion_labels,
            max_search_depth: self.max_search_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("2.5s").unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn format_round_trips_through_parse() {
        for d in [Duration::from_millis(200), Duration::from_secs(3), Duration::from_secs(600)] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }

    #[test]
    fn defaults_validate() {
        let settings = InstallerConfig::default().validate().unwrap();
        assert_eq!(settings.bundle_id, "com.apple.appstore");
        assert_eq!(settings.startup.timeout(), Duration::from_secs(15));
        assert_eq!(settings.startup.interval(), Duration::from_millis(200));
        assert_eq!(settings.completion_labels.len(), 2);
        assert!(settings.completion_labels.matches("Open, Example App"));
        assert!(!settings.completion_labels.matches("Install, Example App"));
        assert_eq!(settings.install_control.to_string(), "AXWebArea >> AXGroup >> AXGroup >> AXButton");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = InstallerConfig::from_yaml_str(
            "settle_delay: 5s\ninstall_timeout: 1800000\nmas:\n  use_rtun: true\n",
        )
        .unwrap();
        assert_eq!(config.settle_delay, Duration::from_secs(5));
        assert_eq!(config.install_timeout, Duration::from_secs(1800));
        assert!(config.mas.use_rtun);
        assert_eq!(config.mas.program, "mas");
        assert_eq!(config.startup_timeout, Duration::from_secs(15));
    }

    #[test]
    fn unknown_keys_and_bad_durations_are_parse_errors() {
        assert!(matches!(
            InstallerConfig::from_yaml_str("settle: 3s"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            InstallerConfig::from_yaml_str("settle_delay: soon"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_names_the_offending_field() {
        let config = InstallerConfig {
            ui_poll_interval: Duration::from_secs(30),
            ..InstallerConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "startup_timeout"),
            other => panic!("expected invalid startup_timeout, got {other:?}"),
        }

        let config = InstallerConfig {
            completion_labels: vec!["^(Installed".to_string()],
            ..InstallerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "completion_labels", .. })
        ));

        let config = InstallerConfig {
            install_control: "AXWebArea >> ".to_string(),
            ..InstallerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "install_control", .. })
        ));
    }

    #[test]
    fn loads_from_file_and_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bundle_id: com.example.store\nui_poll_interval: 100ms").unwrap();
        let config = InstallerConfig::load(file.path()).unwrap();
        assert_eq!(config.bundle_id, "com.example.store");
        assert_eq!(config.ui_poll_interval, Duration::from_millis(100));

        let reparsed = InstallerConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = InstallerConfig::load("/nonexistent/storefront.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
