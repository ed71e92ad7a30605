//! Health check of the backing store and the Redis broker.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use utoipa::ToSchema;

use crate::db::Store;

const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct HealthReport {
    pub mode: String,
    pub postgres_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_healthy: Option<bool>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.postgres_healthy && self.redis_healthy.unwrap_or(true)
    }
}

pub struct HealthService {
    store: Arc<dyn Store>,
    mode: &'static str,
    read_only: bool,
    redis_url: Option<String>,
    redis_timeout: Duration,
}

impl HealthService {
    pub fn new(
        store: Arc<dyn Store>,
        mode: &'static str,
        read_only: bool,
        redis_url: Option<String>,
        redis_timeout: Duration,
    ) -> Self {
        Self {
            store,
            mode,
            read_only,
            redis_url,
            redis_timeout,
        }
    }

    /// Read-only deployments and deployments without a broker skip Redis.
    pub async fn check(&self) -> HealthReport {
        let postgres_healthy = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store health check failed");
                false
            }
        };
        let redis_healthy = match (&self.redis_url, self.read_only) {
            (Some(url), false) => Some(redis_ping(url, self.redis_timeout).await),
            _ => None,
        };
        HealthReport {
            mode: self.mode.to_string(),
            postgres_healthy,
            redis_healthy,
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
fn resp_command(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn round_trip(stream: &mut TcpStream, command: &[u8]) -> std::io::Result<Vec<u8>> {
    stream.write_all(command).await?;
    let mut buf = vec![0u8; 128];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

/// `PING` the broker at `url`, authenticating first when the URL carries
/// credentials. Any failure counts as unhealthy.
pub async fn redis_ping(url: &str, limit: Duration) -> bool {
    let parsed = match url::Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid Redis broker URL");
            return false;
        }
    };
    let Some(host) = parsed.host_str().map(str::to_string) else {
        return false;
    };
    let port = parsed.port().unwrap_or(DEFAULT_REDIS_PORT);

    let check = async {
        let mut stream = TcpStream::connect((host.as_str(), port)).await?;
        if let Some(password) = parsed.password() {
            let user = parsed.username();
            let auth = if user.is_empty() {
                resp_command(&["AUTH", password])
            } else {
                resp_command(&["AUTH", user, password])
            };
            let reply = round_trip(&mut stream, &auth).await?;
            if !reply.starts_with(b"+OK") {
                return Ok::<bool, std::io::Error>(false);
            }
        }
        let reply = round_trip(&mut stream, &resp_command(&["PING"])).await?;
        Ok(reply.starts_with(b"+PONG"))
    };

    match timeout(limit, check).await {
        Ok(Ok(healthy)) => healthy,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, host = %host, port, "Redis health check failed");
            false
        }
        Err(_) => {
            tracing::warn!(host = %host, port, "Redis health check timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use tokio::net::TcpListener;

    #[test]
    fn commands_are_resp_arrays() {
        assert_eq!(resp_command(&["PING"]), b"*1\r\n$4\r\nPING\r\n".to_vec());
        assert_eq!(
            resp_command(&["AUTH", "pw"]),
            b"*2\r\n$4\r\nAUTH\r\n$2\r\npw\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn ping_against_fake_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"+PONG\r\n").await.unwrap();
        });

        let url = format!("redis://{addr}/0");
        assert!(redis_ping(&url, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn unreachable_broker_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("redis://{addr}");
        assert!(!redis_ping(&url, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn read_only_mode_omits_redis() {
        let svc = HealthService::new(
            Arc::new(MemoryStore::new()),
            "readonly",
            true,
            Some("redis://127.0.0.1:1".into()),
            Duration::from_millis(100),
        );
        let report = svc.check().await;
        assert_eq!(report.redis_healthy, None);
        assert!(report.is_healthy());
        let body = serde_json::to_value(&report).unwrap();
        assert!(body.get("redis_healthy").is_none());
    }

    #[tokio::test]
    async fn store_outage_is_unhealthy() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let svc = HealthService::new(store, "standard", false, None, Duration::from_millis(100));
        let report = svc.check().await;
        assert!(!report.postgres_healthy);
        assert!(!report.is_healthy());
    }
}
