//! Bounded-retry TCP reachability checks for the bench's backing services.

use shared_types::{CommonConfig, TenantConfig};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::db::DbTarget;
use crate::error::{Result, WorkerError};

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Fixed-delay retries: `attempts` tries, each bounded by `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// One attempt, no waiting between services.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// A named host/port the bench depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: &'static str,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

impl Service {
    /// Database plus the three redis instances, from the bench config. The
    /// database defaults follow the bench's `db_type`.
    pub fn from_config(config: &CommonConfig) -> Vec<Self> {
        let redis = |name: &'static str, url: Option<&str>, default_host: &str| {
            let (host, port) = url
                .and_then(parse_redis_url)
                .unwrap_or_else(|| (default_host.to_string(), DEFAULT_REDIS_PORT));
            Self { name, host, port }
        };

        let database = DbTarget::resolve(config.db_type(), &TenantConfig::default(), config);
        vec![
            Self {
                name: "database",
                host: database.host,
                port: database.port,
            },
            redis("redis_queue", config.redis_queue.as_deref(), "redis-queue"),
            redis("redis_cache", config.redis_cache.as_deref(), "redis-cache"),
            redis("redis_socketio", config.redis_socketio.as_deref(), "redis-socketio"),
        ]
    }
}

/// `redis://[user:pass@]host[:port][/db]` to `(host, port)`.
pub fn parse_redis_url(url: &str) -> Option<(String, u16)> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (host_port, DEFAULT_REDIS_PORT),
    };
    (!host.is_empty()).then(|| (host.to_string(), port))
}

async fn is_open(host: &str, port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("{}:{} refused: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("{}:{} timed out after {:?}", host, port, limit);
            false
        }
    }
}

/// Waits until `host:port` accepts a TCP connection or the attempts run out.
pub async fn wait_for_host(host: &str, port: u16, policy: RetryPolicy) -> Result<()> {
    for attempt in 1..=policy.attempts {
        debug!("Attempt {} to connect to {}:{}", attempt, host, port);
        if is_open(host, port, policy.timeout).await {
            return Ok(());
        }
        if attempt < policy.attempts && !policy.delay.is_zero() {
            sleep(policy.delay).await;
        }
    }
    Err(WorkerError::Connectivity {
        host: host.to_string(),
        port,
        attempts: policy.attempts,
    })
}

/// Checks every service in turn and stops at the first unreachable one.
pub async fn check_services(config: &CommonConfig, policy: RetryPolicy) -> Result<()> {
    for service in Service::from_config(config) {
        wait_for_host(&service.host, service.port, policy).await?;
        info!("{} connected", service);
    }
    info!("Connections OK");
    Ok(())
}

/// Health check: one attempt per service, every failure reported.
pub async fn doctor(config: &CommonConfig) -> Vec<(Service, Result<()>)> {
    let mut results = Vec::new();
    for service in Service::from_config(config) {
        let outcome = wait_for_host(&service.host, service.port, RetryPolicy::once()).await;
        match &outcome {
            Ok(()) => info!("{} connected", service),
            Err(e) => warn!("{}: {}", service, e),
        }
        results.push((service, outcome));
    }
    results
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use shared_types::DbType;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_redis_url() {
        assert_eq!(
            parse_redis_url("redis://redis-cache:13000"),
            Some(("redis-cache".to_string(), 13000))
        );
        assert_eq!(
            parse_redis_url("redis://:secret@queue.internal:6380/1"),
            Some(("queue.internal".to_string(), 6380))
        );
        assert_eq!(
            parse_redis_url("redis://socketio"),
            Some(("socketio".to_string(), 6379))
        );
        assert_eq!(parse_redis_url("redis://host:notaport"), None);
    }

    #[test]
    fn test_services_from_config_defaults() {
        let services = Service::from_config(&CommonConfig::default());
        let names: Vec<_> = services.iter().map(|s| s.name).collect();
        assert_eq!(names, ["database", "redis_queue", "redis_cache", "redis_socketio"]);
        assert_eq!(services[0].host, "mariadb");
        assert_eq!(services[0].port, 3306);
        assert_eq!(services[2].host, "redis-cache");
    }

    #[test]
    fn test_postgres_bench_checks_postgres_port() {
        let config = CommonConfig {
            db_type: Some(DbType::Postgres),
            ..CommonConfig::default()
        };
        let database = &Service::from_config(&config)[0];
        assert_eq!(database.host, "postgresql");
        assert_eq!(database.port, 5432);

        let config = CommonConfig {
            db_type: Some(DbType::Postgres),
            db_port: Some(15432),
            ..CommonConfig::default()
        };
        assert_eq!(Service::from_config(&config)[0].port, 15432);
    }

    #[tokio::test]
    async fn test_wait_for_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_for_host("127.0.0.1", port, RetryPolicy::once())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_port_exhausts_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let policy = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
        };
        let err = wait_for_host("127.0.0.1", port, policy).await.unwrap_err();
        assert!(matches!(err, WorkerError::Connectivity { attempts: 2, .. }));
    }
}
