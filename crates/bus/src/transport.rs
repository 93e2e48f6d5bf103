use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket under `/tmp/kurier/`.
    Ipc(String),

    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// The ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/kurier/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// ZeroMQ requires the directory of an IPC socket to exist before bind.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Parses `tcp://host:port`, `ipc://name` and full `ipc:///tmp/kurier/name.sock` forms.
impl FromStr for Transport {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BusError::InvalidEndpoint(s.to_string());

        if let Some(rest) = s.strip_prefix("tcp://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
            let port = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::tcp(host, port));
        }

        if let Some(rest) = s.strip_prefix("ipc://") {
            let name = rest
                .strip_prefix("/tmp/kurier/")
                .and_then(|n| n.strip_suffix(".sock"))
                .unwrap_or(rest);
            if name.is_empty() || name.contains('/') {
                return Err(invalid());
            }
            return Ok(Self::ipc(name));
        }

        Err(invalid())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        assert_eq!(Transport::ipc("events").endpoint(), "ipc:///tmp/kurier/events.sock");
    }

    #[test]
    fn parses_config_endpoints() {
        assert_eq!(
            "tcp://127.0.0.1:5560".parse::<Transport>().unwrap(),
            Transport::tcp("127.0.0.1", 5560)
        );
        assert_eq!("ipc://frontend".parse::<Transport>().unwrap(), Transport::ipc("frontend"));
        assert_eq!(
            "ipc:///tmp/kurier/backend.sock".parse::<Transport>().unwrap(),
            Transport::ipc("backend")
        );
    }

    #[test]
    fn rejects_bad_endpoints() {
        for bad in ["udp://x:1", "tcp://nohost", "tcp://:80", "tcp://h:notaport", "ipc://"] {
            assert!(bad.parse::<Transport>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn display_matches_endpoint() {
        let t = Transport::tcp("localhost", 9090);
        assert_eq!(t.to_string(), t.endpoint());
    }
}
