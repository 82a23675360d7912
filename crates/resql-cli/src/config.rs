use resql_client::ClientConfig;
use serde::Deserialize;
use tracing::Level;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.client.validate()?;
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> anyhow::Result<Level> {
        self.log
            .level
            .parse()
            .map_err(|_| anyhow::anyhow!(format!("unknown log level {}", self.log.level)))
    }
}
