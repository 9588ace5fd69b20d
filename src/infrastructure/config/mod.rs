//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    /// Chatters known up front, mostly for local testing
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
    /// Channel the bot sits in
    pub streamer: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandsConfig {
    pub default_level: i32,
    pub default_delay_all: i64,
    pub default_delay_user: i64,
    pub sweep_interval_seconds: u64,
    pub commit_interval_seconds: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            default_level: 100,
            default_delay_all: 5,
            default_delay_user: 15,
            sweep_interval_seconds: 300,
            commit_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EconomyBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EconomyConfig {
    pub backend: EconomyBackend,
    /// Id of the live stream session tokens are awarded into
    pub session: Option<String>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            backend: EconomyBackend::Sqlite,
            session: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserSeed {
    pub username: String,
    #[serde(default = "default_user_level")]
    pub level: i32,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub subscriber: bool,
    #[serde(default)]
    pub moderator: bool,
}

fn default_user_level() -> i32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: "chanbot".to_string(),
                prefix: "!".to_string(),
                streamer: "channel".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("chanbot.db"),
            },
            commands: CommandsConfig::default(),
            economy: EconomyConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::MissingField("bot.prefix".to_string()));
        }
        if self.bot.streamer.is_empty() {
            return Err(ConfigError::MissingField("bot.streamer".to_string()));
        }
        if self.commands.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue("commands.sweep-interval-seconds must be positive".to_string()));
        }
        if self.commands.commit_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue("commands.commit-interval-seconds must be positive".to_string()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    pub fn load_env() -> Self {
        // Load from environment variables
        let mut config = Config::default();

        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            config.bot.prefix = prefix;
        }

        if let Ok(streamer) = std::env::var("BOT_STREAMER") {
            config.bot.streamer = streamer;
        }

        if let Ok(path) = std::env::var("BOT_DATABASE") {
            config.database.path = PathBuf::from(path);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
bot:
  name: chanbot
  prefix: "!"
  streamer: somechannel
database:
  path: test.db
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.bot.streamer, "somechannel");
        assert_eq!(config.commands.default_delay_user, 15);
        assert_eq!(config.economy.backend, EconomyBackend::Sqlite);
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
bot:
  name: chanbot
  prefix: "?"
  streamer: somechannel
database:
  path: test.db
commands:
  default-level: 250
  sweep-interval-seconds: 30
economy:
  backend: memory
  session: stream-42
users:
  - username: modguy
    level: 500
    moderator: true
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.commands.default_level, 250);
        assert_eq!(config.commands.default_delay_all, 5);
        assert_eq!(config.economy.backend, EconomyBackend::Memory);
        assert_eq!(config.economy.session.as_deref(), Some("stream-42"));
        assert_eq!(config.users[0].level, 500);
        assert_eq!(config.users[0].points, 0);
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let mut config = Config::default();
        config.bot.prefix.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_default_round_trips_through_yaml() {
        let yaml = Config::default().to_yaml().unwrap();
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.bot.prefix, "!");
    }
}
