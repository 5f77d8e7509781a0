// THEORY:
// `MonitorConfig` is the one typed home for every tunable of a monitored stream.
// Values come from three layers, later layers winning: built-in defaults, an
// optional TOML file, then environment variables (where secrets belong).
//
// Nothing downstream re-checks these values. `validate` is run once at startup and a
// failure there is fatal, before any frame is read or any port is bound.

use crate::pipeline::{FlipMode, RestartPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LOCATION: &str = "26.4567°N, 88.4567°E";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("environment variable {name} has invalid value `{value}`")]
    Env { name: &'static str, value: String },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Parameters handed through to the detector. The alarm itself only reads
/// `consecutive_frames_threshold`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub scale_factor: f64,
    pub min_neighbors: i32,
    pub consecutive_frames_threshold: u32,
    pub cascade_path: PathBuf,
    /// OpenCV flip code applied to each frame before classification.
    pub camera_flip_code: Option<i32>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.2,
            min_neighbors: 5,
            consecutive_frames_threshold: 3,
            cascade_path: PathBuf::from("fire_detection_cascade_model.xml"),
            camera_flip_code: Some(1),
        }
    }
}

impl DetectionConfig {
    pub fn flip_mode(&self) -> Option<FlipMode> {
        self.camera_flip_code.and_then(FlipMode::from_code)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub sender_email: String,
    pub password: String,
    pub recipient_email: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            sender_email: String::new(),
            password: String::new(),
            recipient_email: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub detection: DetectionConfig,
    /// Written into every activation record.
    pub location: String,
    pub database_path: PathBuf,
    pub smtp: SmtpConfig,
    pub bind_addr: String,
    pub restart: RestartPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            location: DEFAULT_LOCATION.to_string(),
            database_path: PathBuf::new(),
            smtp: SmtpConfig::default(),
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            restart: RestartPolicy::default(),
        }
    }
}

impl MonitorConfig {
    /// Loads defaults, then `path` if given, then the process environment, and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlays environment values. `lookup` is injected so tests need not touch
    /// the real process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("FIREWATCH_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("FIREWATCH_SMTP_SERVER") {
            self.smtp.server = v;
        }
        if let Some(v) = non_empty("FIREWATCH_SMTP_PORT") {
            self.smtp.port = v.trim().parse().map_err(|_| ConfigError::Env {
                name: "FIREWATCH_SMTP_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = non_empty("FIREWATCH_SENDER_EMAIL") {
            self.smtp.sender_email = v;
        }
        if let Some(v) = non_empty("FIREWATCH_SMTP_PASSWORD") {
            self.smtp.password = v;
        }
        if let Some(v) = non_empty("FIREWATCH_RECIPIENT_EMAIL") {
            self.smtp.recipient_email = v;
        }
        if let Some(v) = non_empty("PORT") {
            let port: u16 = v.trim().parse().map_err(|_| ConfigError::Env {
                name: "PORT",
                value: v.clone(),
            })?;
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.bind_addr = format!("{host}:{port}");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if d.consecutive_frames_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "detection.consecutive_frames_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(d.scale_factor > 1.0) {
            return Err(ConfigError::Invalid {
                field: "detection.scale_factor",
                reason: format!("{} must be greater than 1.0", d.scale_factor),
            });
        }
        if d.min_neighbors < 0 {
            return Err(ConfigError::Invalid {
                field: "detection.min_neighbors",
                reason: format!("{} must not be negative", d.min_neighbors),
            });
        }
        if let Some(code) = d.camera_flip_code {
            if FlipMode::from_code(code).is_none() {
                return Err(ConfigError::Invalid {
                    field: "detection.camera_flip_code",
                    reason: format!("{code} is not one of -1, 0, 1"),
                });
            }
        }
        if self.location.trim().is_empty() {
            return Err(ConfigError::Missing("location"));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("database_path"));
        }
        if self.smtp.server.trim().is_empty() {
            return Err(ConfigError::Missing("smtp.server"));
        }
        if self.smtp.sender_email.trim().is_empty() {
            return Err(ConfigError::Missing("smtp.sender_email"));
        }
        if self.smtp.password.is_empty() {
            return Err(ConfigError::Missing("smtp.password"));
        }
        if self.smtp.recipient_email.trim().is_empty() {
            return Err(ConfigError::Missing("smtp.recipient_email"));
        }
        self.restart.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn complete() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config
            .apply_env(env(&[
                ("FIREWATCH_DATABASE_PATH", "/var/lib/firewatch/events.db"),
                ("FIREWATCH_SENDER_EMAIL", "watch@example.com"),
                ("FIREWATCH_SMTP_PASSWORD", "secret"),
                ("FIREWATCH_RECIPIENT_EMAIL", "ops@example.com"),
            ]))
            .unwrap();
        config
    }

    #[test]
    fn defaults_match_the_field_deployment() {
        let config = MonitorConfig::default();
        assert_eq!(config.detection.consecutive_frames_threshold, 3);
        assert_eq!(config.detection.scale_factor, 1.2);
        assert_eq!(config.detection.min_neighbors, 5);
        assert_eq!(config.detection.flip_mode(), Some(FlipMode::Horizontal));
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.location, DEFAULT_LOCATION);
    }

    #[test]
    fn defaults_alone_are_missing_credentials() {
        assert!(matches!(
            MonitorConfig::default().validate(),
            Err(ConfigError::Missing("database_path"))
        ));
    }

    #[test]
    fn environment_completes_the_config() {
        complete().validate().expect("complete config validates");
    }

    #[test]
    fn missing_password_is_fatal() {
        let mut config = complete();
        config.smtp.password.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("smtp.password"))));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut config = complete();
        config.detection.consecutive_frames_threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn bad_flip_code_is_rejected() {
        let mut config = complete();
        config.detection.camera_flip_code = Some(2);
        assert!(config.validate().is_err());
        config.detection.camera_flip_code = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn port_env_rewrites_only_the_port() {
        let mut config = complete();
        config.apply_env(env(&[("PORT", "8080")])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");

        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "PORT", .. }));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = complete();
        config.apply_env(env(&[("FIREWATCH_SMTP_PASSWORD", "  ")])).unwrap();
        assert_eq!(config.smtp.password, "secret");
    }

    #[test]
    fn toml_overrides_defaults_partially() {
        let config: MonitorConfig = toml::from_str(
            r#"
location = "Warehouse 7"
database_path = "events.db"

[detection]
consecutive_frames_threshold = 5
camera_flip_code = 0

[smtp]
sender_email = "watch@example.com"
password = "pw"
recipient_email = "ops@example.com"

[restart]
max_restarts = 2
"#,
        )
        .unwrap();
        assert_eq!(config.location, "Warehouse 7");
        assert_eq!(config.detection.consecutive_frames_threshold, 5);
        assert_eq!(config.detection.scale_factor, 1.2);
        assert_eq!(config.detection.flip_mode(), Some(FlipMode::Vertical));
        assert_eq!(config.smtp.server, "smtp.gmail.com");
        assert_eq!(config.restart.max_restarts, 2);
        config.validate().unwrap();
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let err = MonitorConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
