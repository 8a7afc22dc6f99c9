use super::GatewayError;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// JSON-over-HTTP plumbing shared by the provider adapters. Requests carry a bounded
/// timeout and go through a circuit breaker that only counts transient failures.
#[derive(Clone)]
pub(crate) struct GatewayHttp {
    client: Client,
    pub(crate) base_url: String,
    api_key: String,
    circuit_breaker: Breaker,
}

impl GatewayHttp {
    pub(crate) fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker_config(base_url, api_key, timeout, 5, Duration::from_secs(60))
    }

    pub(crate) fn with_circuit_breaker_config(
        base_url: String,
        api_key: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::exponential(Duration::from_secs(10), reset_timeout);
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body);
        self.execute(request).await
    }

    pub(crate) async fn get_json<R>(&self, path: &str) -> Result<R, GatewayError>
    where
        R: DeserializeOwned,
    {
        let request = self.client.get(self.url(path)).bearer_auth(&self.api_key);
        self.execute(request).await
    }

    async fn execute<R>(&self, request: reqwest::RequestBuilder) -> Result<R, GatewayError>
    where
        R: DeserializeOwned,
    {
        let result = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| e.is_retryable(),
                async move {
                    let response = request.send().await.map_err(transport_error)?;
                    decode::<R>(response).await
                },
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::Unavailable(
                "circuit breaker open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Unavailable("gateway request timed out".to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("invalid gateway response: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(GatewayError::Unavailable(format!("{}: {}", status, body)))
    } else {
        Err(GatewayError::Rejected(format!("{}: {}", status, body)))
    }
}
