//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::errors::ConfigError;
use crate::domain::entities::InvalidItemPolicy;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub orders: OrdersConfig,
    pub classifier: ClassifierConfig,
    pub renderer: RendererConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    /// Public base URL handed to the invoice renderer for artifact links.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    /// `postgres://...` or `sqlite://path`; unset falls back to a local
    /// SQLite file.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrdersConfig {
    pub invalid_item_policy: InvalidItemPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassifierConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub audio_model: String,
    pub vision_model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RendererConfig {
    /// Invoice render service endpoint; unset disables rendering and
    /// confirmed orders go out without a PDF link.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdaptersConfig {
    pub twilio: Option<TwilioConfig>,
    pub console: Option<ConsoleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TwilioConfig {
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsoleConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: "mina-bot".to_string(),
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig { url: None },
            queue: QueueConfig {
                workers: 4,
                capacity: 256,
            },
            orders: OrdersConfig {
                invalid_item_policy: InvalidItemPolicy::Abort,
            },
            classifier: ClassifierConfig {
                api_key: None,
                model: "llama-3.3-70b-versatile".to_string(),
                audio_model: "whisper-large-v3".to_string(),
                vision_model: "llama-3.2-90b-vision-preview".to_string(),
            },
            renderer: RendererConfig { endpoint: None },
            adapters: AdaptersConfig {
                twilio: Some(TwilioConfig {
                    enabled: false,
                    account_sid: None,
                    auth_token: None,
                    from_number: None,
                    poll_interval_seconds: 5,
                }),
                console: Some(ConsoleConfig { enabled: true }),
            },
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Environment variables win over file values; secrets usually arrive
    /// this way in deployment.
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            self.classifier.api_key = Some(key);
        }
        if let Ok(base) = std::env::var("PUBLIC_URL") {
            self.bot.base_url = base;
        }
        if let Ok(endpoint) = std::env::var("INVOICE_RENDER_URL") {
            self.renderer.endpoint = Some(endpoint);
        }

        let sid = std::env::var("TWILIO_ACCOUNT_SID").ok();
        let token = std::env::var("TWILIO_AUTH_TOKEN").ok();
        let number = std::env::var("TWILIO_NUMBER").ok();
        if sid.is_some() || token.is_some() || number.is_some() {
            let tw = self.adapters.twilio.get_or_insert(TwilioConfig {
                enabled: false,
                account_sid: None,
                auth_token: None,
                from_number: None,
                poll_interval_seconds: 5,
            });
            if sid.is_some() {
                tw.account_sid = sid;
            }
            if token.is_some() {
                tw.auth_token = token;
            }
            if number.is_some() {
                tw.from_number = number;
            }
            tw.enabled = tw.account_sid.is_some() && tw.auth_token.is_some();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roundtrips_through_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.queue.workers, 4);
        assert!(matches!(
            parsed.orders.invalid_item_policy,
            InvalidItemPolicy::Abort
        ));
    }

    #[test]
    fn kebab_case_keys_parse() {
        let yaml = r#"
bot:
  name: test-bot
  base-url: https://example.com
database:
  url: "sqlite://test.db"
queue:
  workers: 2
  capacity: 64
orders:
  invalid-item-policy: skip
classifier:
  api-key: null
  model: m
  audio-model: a
  vision-model: v
renderer:
  endpoint: null
adapters:
  twilio: null
  console:
    enabled: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bot.base_url, "https://example.com");
        assert!(matches!(
            config.orders.invalid_item_policy,
            InvalidItemPolicy::Skip
        ));
    }
}
