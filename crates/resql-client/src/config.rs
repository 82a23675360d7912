use crate::endpoint::Endpoint;
use rand::distributions::Alphanumeric;
use rand::Rng;
use resql_core::{ResqlError, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const GENERATED_NAME_LEN: usize = 16;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Unique client name. Generated when absent.
    pub name: Option<String>,
    pub cluster_name: String,
    pub urls: Vec<String>,
    /// Overall bound for connecting and for each request, retries included.
    /// Zero waits forever.
    pub timeout_ms: u64,
    pub attempt_timeout_ms: u64,
    pub retry_interval_ms: u64,
    /// Local address outgoing TCP connections bind to, `ip` or `ip:port`.
    pub source_addr: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: None,
            cluster_name: "cluster".into(),
            urls: vec!["tcp://127.0.0.1:7600".into()],
            timeout_ms: 10_000,
            attempt_timeout_ms: 2_000,
            retry_interval_ms: 500,
            source_addr: None,
        }
    }
}

impl ClientConfig {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(ResqlError::Config("client name must not be empty".into()));
            }
        }
        if self.cluster_name.is_empty() {
            return Err(ResqlError::Config("cluster name must not be empty".into()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ResqlError::Config(
                "attempt_timeout_ms must be greater than zero".into(),
            ));
        }
        self.endpoints()?;
        self.source_addr()?;
        Ok(())
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        if self.urls.is_empty() {
            return Err(ResqlError::Config("at least one url is required".into()));
        }
        self.urls.iter().map(|url| url.parse()).collect()
    }

    pub fn source_addr(&self) -> Result<Option<SocketAddr>> {
        let Some(addr) = self.source_addr.as_deref() else {
            return Ok(None);
        };
        if let Ok(ip) = addr.parse::<IpAddr>() {
            return Ok(Some(SocketAddr::new(ip, 0)));
        }
        addr.parse::<SocketAddr>()
            .map(Some)
            .map_err(|err| ResqlError::Config(format!("invalid source address {addr}: {err}")))
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms != 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Random alphanumeric client name drawn from `rng`.
pub fn generate_client_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..GENERATED_NAME_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}
