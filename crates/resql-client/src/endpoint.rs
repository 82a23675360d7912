use resql_core::{ResqlError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;
use url::Url;

pub const DEFAULT_PORT: u16 = 7600;

/// Address of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl FromStr for Endpoint {
    type Err = ResqlError;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s)
            .map_err(|err| ResqlError::Config(format!("invalid url {s}: {err}")))?;
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| ResqlError::Config(format!("missing host in {s}")))?;
                Ok(Endpoint::Tcp {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    port: url.port().unwrap_or(DEFAULT_PORT),
                })
            }
            "unix" => {
                if url.path().is_empty() {
                    return Err(ResqlError::Config(format!("missing socket path in {s}")));
                }
                Ok(Endpoint::Unix {
                    path: PathBuf::from(url.path()),
                })
            }
            other => Err(ResqlError::Config(format!(
                "unsupported protocol {other} in {s}"
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Parses the space separated node list announced by the cluster. Entries
/// that do not parse are skipped.
pub fn parse_node_list(nodes: &str) -> Vec<Endpoint> {
    nodes
        .split_whitespace()
        .filter_map(|node| match node.parse() {
            Ok(endpoint) => Some(endpoint),
            Err(err) => {
                debug!("ignoring cluster node {node}: {err}");
                None
            }
        })
        .collect()
}

/// Known endpoints, used round-robin: the endpoint handed out for an attempt
/// moves to the tail, so consecutive failures visit every node before any
/// node is tried again.
#[derive(Debug, Clone)]
pub struct EndpointRing {
    nodes: VecDeque<Endpoint>,
}

impl EndpointRing {
    pub fn new(nodes: Vec<Endpoint>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(ResqlError::Config("at least one url is required".into()));
        }
        Ok(Self {
            nodes: nodes.into(),
        })
    }

    pub fn next(&mut self) -> Endpoint {
        self.nodes.rotate_left(1);
        match self.nodes.back() {
            Some(endpoint) => endpoint.clone(),
            None => unreachable!("endpoint ring is never empty"),
        }
    }

    /// Replaces the ring wholesale. Empty lists are ignored.
    pub fn replace(&mut self, nodes: Vec<Endpoint>) -> bool {
        if nodes.is_empty() {
            return false;
        }
        self.nodes = nodes.into();
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.nodes.iter()
    }
}
