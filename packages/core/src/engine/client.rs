//! Engine client bound to one host's endpoint

use bollard::{API_DEFAULT_VERSION, Docker};

use super::error::EngineError;
use crate::host::Host;

/// Request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Docker client wrapper with connection handling
pub struct EngineClient {
    inner: Docker,
    endpoint: String,
}

impl EngineClient {
    /// Build a client for a `(proto, addr)` pair from [`Host::get_proto_addr`]
    ///
    /// No connection is made until the first request.
    pub fn connect(proto: &str, addr: &str) -> Result<Self, EngineError> {
        let endpoint = format!("{proto}://{addr}");
        let inner = match proto {
            "tcp" | "http" => {
                Docker::connect_with_http(&endpoint, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            #[cfg(unix)]
            "unix" => Docker::connect_with_unix(addr, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION),
            other => return Err(EngineError::UnsupportedProtocol(other.to_string())),
        }
        .map_err(|e| EngineError::classify(&endpoint, &e))?;

        Ok(Self { inner, endpoint })
    }

    /// Client for the engine running on `host`
    pub async fn for_host(host: &Host) -> Result<Self, EngineError> {
        let (proto, addr) = host.get_proto_addr().await?;
        Self::connect(&proto, &addr)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Verify the engine answers a ping
    pub async fn verify_connection(&self) -> Result<(), EngineError> {
        self.inner
            .ping()
            .await
            .map_err(|e| EngineError::classify(&self.endpoint, &e))?;
        Ok(())
    }

    /// Engine version, e.g. `Docker 27.3.1 (API 1.47)`
    pub async fn version(&self) -> Result<String, EngineError> {
        let version = self
            .inner
            .version()
            .await
            .map_err(|e| EngineError::classify(&self.endpoint, &e))?;

        Ok(format!(
            "Docker {} (API {})",
            version.version.unwrap_or_else(|| "unknown".to_string()),
            version.api_version.unwrap_or_else(|| "unknown".to_string())
        ))
    }

    /// Access inner Bollard client for advanced operations
    pub fn inner(&self) -> &Docker {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_endpoint_builds_lazily() {
        let client = EngineClient::connect("tcp", "127.0.0.1:2375").unwrap();
        assert_eq!(client.endpoint(), "tcp://127.0.0.1:2375");
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        assert!(matches!(
            EngineClient::connect("ssh", "docker@10.0.0.5"),
            Err(EngineError::UnsupportedProtocol(p)) if p == "ssh"
        ));
    }

    #[tokio::test]
    async fn stopped_host_has_no_engine() {
        use crate::drivers::fake::{self, FakeDriver};
        use crate::error::HostError;
        use std::path::{Path, PathBuf};

        let host = Host {
            name: "h1".to_string(),
            driver_name: fake::DRIVER_NAME.to_string(),
            driver: Box::new(FakeDriver::new(Path::new("/tmp/h1"))),
            store_path: PathBuf::from("/tmp/h1"),
        };

        assert!(matches!(
            EngineClient::for_host(&host).await,
            Err(EngineError::Host(HostError::NotRunning(_)))
        ));
    }
}
