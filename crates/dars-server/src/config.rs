use anyhow::Context;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    /// Receives `message.sent`
    pub message_webhook_url: Option<String>,
    /// Receives `subscription.enabled` / `subscription.disabled`
    pub subscription_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = get("DARS_PORT").unwrap_or_else(|| "3000".into());
        Ok(Self {
            jwt_secret: get("DARS_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into()),
            db_path: get("DARS_DB_PATH").unwrap_or_else(|| "dars.db".into()),
            host: get("DARS_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: port
                .parse()
                .with_context(|| format!("DARS_PORT is not a port: {}", port))?,
            message_webhook_url: get("DARS_MESSAGE_WEBHOOK_URL").filter(|s| !s.is_empty()),
            subscription_webhook_url: get("DARS_SUBSCRIPTION_WEBHOOK_URL").filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_and_overrides() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert!(config.message_webhook_url.is_none());

        let env: HashMap<&str, &str> = HashMap::from([
            ("DARS_PORT", "8080"),
            ("DARS_MESSAGE_WEBHOOK_URL", "https://hooks.example/chat"),
            ("DARS_SUBSCRIPTION_WEBHOOK_URL", ""),
        ]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.message_webhook_url.as_deref(), Some("https://hooks.example/chat"));
        assert!(config.subscription_webhook_url.is_none());
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(Config::from_lookup(|k| (k == "DARS_PORT").then(|| "http".to_string())).is_err());
    }
}
