use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Port the coordinator listens on when the bind address names none.
pub const DEFAULT_PORT: u16 = 9876;

fn default_bind() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_workers() -> usize {
    4
}

fn default_connection_rate() -> usize {
    256
}

fn default_ttl_secs() -> u64 {
    300
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address or `http://` URL to listen on. Loopback by convention.
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_connection_rate")]
    pub max_connection_rate: usize,

    /// Seconds a holder may keep a path before eviction is permitted.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Seconds between sweeper passes. Defaults to the TTL.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            workers: default_workers(),
            max_connection_rate: default_connection_rate(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: None,
        }
    }
}

impl Config {
    pub fn load_file(settings_file: &Path) -> Result<Config, ConfigError> {
        let contents =
            read_to_string(settings_file).map_err(|source| ConfigError::ReadFile {
                path: settings_file.display().to_string(),
                source,
            })?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.unwrap_or(self.ttl_secs))
    }
}

/// Load the configuration: `$CONFIG_FILE` if set, else `./settings.toml` if
/// present, else defaults. A `--urls=<url>` startup argument overrides the
/// bind address, matching how the coordinator has historically been launched.
pub fn load() -> Result<Config, ConfigError> {
    let mut settings = match std::env::var("CONFIG_FILE") {
        Err(_) => {
            if Path::new("settings.toml").exists() {
                Config::load_file(Path::new("settings.toml"))?
            } else {
                Config::default()
            }
        }
        Ok(settings_file) => Config::load_file(Path::new(&settings_file))?,
    };

    for arg in std::env::args().skip(1) {
        if let Some(url) = arg.strip_prefix("--urls=") {
            settings.bind = url.to_string();
        } else {
            return Err(ConfigError::Invalid {
                reason: format!("unrecognized argument '{arg}'"),
            });
        }
    }

    if settings.workers == 0 {
        return Err(ConfigError::Invalid {
            reason: "workers must be greater than 0".to_string(),
        });
    }
    if settings.ttl_secs == 0 {
        return Err(ConfigError::Invalid {
            reason: "ttl_secs must be greater than 0".to_string(),
        });
    }
    if settings.sweep_interval_secs == Some(0) {
        return Err(ConfigError::Invalid {
            reason: "sweep_interval_secs must be greater than 0".to_string(),
        });
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_conventional_port() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:9876");
        assert_eq!(config.ttl(), Duration::from_secs(300));
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("bind = \"127.0.0.1:7000\"\nttl_secs = 60\n")
            .expect("config should parse");
        assert_eq!(config.bind, "127.0.0.1:7000");
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.workers, 4);
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn sweep_interval_can_diverge_from_ttl() {
        let config: Config = toml::from_str("ttl_secs = 120\nsweep_interval_secs = 30\n")
            .expect("config should parse");
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("nonsense = true\n").is_err());
    }
}
