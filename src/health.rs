use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DependencyStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        Self {
            status: "healthy".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        Self {
            status: "unhealthy".to_string(),
            latency_ms: None,
            error: Some(error.to_string()),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
    fn name(&self) -> &'static str;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Reachability of an upstream HTTP service: a gateway or the campaign API.
/// Any answer below 500 counts as reachable.
pub struct HttpServiceChecker {
    name: &'static str,
    url: String,
    client: reqwest::Client,
}

impl HttpServiceChecker {
    pub fn new(name: &'static str, url: String) -> Self {
        Self {
            name,
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DependencyChecker for HttpServiceChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.client.get(&self.url).send().await {
            Ok(resp) if !resp.status().is_server_error() => DependencyStatus::healthy(start),
            Ok(resp) => DependencyStatus::unhealthy(format!("HTTP {}", resp.status())),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

pub struct HealthChecker {
    checkers: Vec<Box<dyn DependencyChecker>>,
    start_time: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_checker(mut self, checker: Box<dyn DependencyChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    pub async fn check_all(&self) -> HealthResponse {
        let check_timeout = Duration::from_secs(5);
        let mut futures = Vec::new();

        for checker in &self.checkers {
            let name = checker.name().to_string();
            let future = timeout(check_timeout, checker.check());
            futures.push(async move {
                match future.await {
                    Ok(status) => (name, status),
                    Err(_) => (name, DependencyStatus::unhealthy("timeout")),
                }
            });
        }

        let results = futures::future::join_all(futures).await;
        let mut dependencies = HashMap::new();
        let mut healthy_count = 0;
        let mut total_count = 0;

        for (name, status) in results {
            if status.status == "healthy" {
                healthy_count += 1;
            }
            total_count += 1;
            dependencies.insert(name, status);
        }

        let overall_status = if healthy_count == total_count {
            "healthy"
        } else if healthy_count > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        HealthResponse {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, bool);

    #[async_trait]
    impl DependencyChecker for Fixed {
        async fn check(&self) -> DependencyStatus {
            if self.1 {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("down")
            }
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_degraded() {
        let checker = HealthChecker::new()
            .add_checker(Box::new(Fixed("postgres", true)))
            .add_checker(Box::new(Fixed("pix", false)));

        let report = checker.check_all().await;
        assert_eq!(report.status, "degraded");
        assert_eq!(
            report.dependencies["pix"].error.as_deref(),
            Some("down")
        );
    }

    #[tokio::test]
    async fn test_no_dependencies_is_healthy() {
        let report = HealthChecker::new().check_all().await;
        assert_eq!(report.status, "healthy");
        assert!(report.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_http_checker_treats_client_errors_as_reachable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/").with_status(404).create_async().await;

        let status = HttpServiceChecker::new("campaigns", format!("{}/", server.url()))
            .check()
            .await;
        assert_eq!(status.status, "healthy");
    }
}
