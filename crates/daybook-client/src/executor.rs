//! Request executor
//!
//! Runs one logical call through the breaker gate, the connectivity check,
//! a per-attempt timeout race and the retry loop, feeding every outcome back
//! into the shared [`CircuitBreaker`].

use crate::config::ClientConfig;
use crate::connectivity::Connectivity;
use crate::queue::{OfflineQueue, QueuedRequest};
use crate::store::{KeyValueStore, TokenStore};
use crate::transport::{HttpRequest, Method, Transport};
use daybook_error::{ClientError, ErrorContext, Result};
use daybook_resilience::{
    attempt_timeout, with_timeout, BackoffPolicy, CircuitBreaker, CircuitState, Clock,
    ErrorClassifier, Failure,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Per-call options
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// JSON body
    pub body: Option<Value>,
    /// Attach the bearer token if one is stored
    pub authenticated: bool,
    /// Extra headers, sent after the JSON defaults
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    /// Options for a method with no body
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            authenticated: false,
            headers: Vec::new(),
        }
    }

    /// GET
    pub fn get() -> Self {
        Self::new(Method::Get)
    }

    /// POST with a JSON body
    pub fn post(body: Value) -> Self {
        Self::new(Method::Post).with_body(body)
    }

    /// PUT with a JSON body
    pub fn put(body: Value) -> Self {
        Self::new(Method::Put).with_body(body)
    }

    /// DELETE
    pub fn delete() -> Self {
        Self::new(Method::Delete)
    }

    /// Sets the body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Marks the call as needing the bearer token
    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

struct ExecutorInner {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    queue: OfflineQueue,
    connectivity: Connectivity,
    tokens: TokenStore,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    request_timeout: Duration,
}

/// Executes calls with breaker gating, retries and offline queueing.
///
/// Cheap to clone; clones share the breaker, the queue and the stores.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
}

impl RequestExecutor {
    /// Builds an executor and the breaker and queue it owns
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let connectivity = Connectivity::new(store.clone(), clock.clone(), config.stale_after());
        let breaker = Arc::new(CircuitBreaker::with_clock(
            config.breaker_config(),
            clock.clone(),
        ));
        let queue = OfflineQueue::new(
            connectivity.clone(),
            clock.clone(),
            config.queue_item_delay(),
        );
        Self {
            inner: Arc::new(ExecutorInner {
                transport,
                breaker,
                queue,
                connectivity,
                tokens: TokenStore::new(store),
                clock,
                backoff: config.backoff_policy(),
                request_timeout: config.request_timeout(),
            }),
        }
    }

    /// Performs a call, retrying transient failures up to `max_retries` times
    /// after the first attempt.
    ///
    /// When offline the call is queued for later replay and this invocation
    /// fails with a network error; the replay's result is not delivered here.
    pub async fn execute(
        &self,
        url: &str,
        options: RequestOptions,
        max_retries: u32,
    ) -> Result<Value> {
        self.run(url, &options, max_retries, true).await
    }

    /// Applies the application's online/offline signal; coming online
    /// starts draining the offline queue.
    pub fn set_online(&self, online: bool) {
        self.inner.connectivity.set_online(online);
        if online {
            self.inner.queue.start_drain();
        }
    }

    /// The shared breaker
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    /// The offline queue
    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    /// The connectivity heuristic
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// The token store used for bearer headers
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    async fn run(
        &self,
        url: &str,
        options: &RequestOptions,
        max_retries: u32,
        check_connectivity: bool,
    ) -> Result<Value> {
        let inner = &self.inner;
        let method = options.method.as_str();
        let mut remaining = max_retries;
        let mut attempt: u32 = 0;

        loop {
            let context = ErrorContext::at(url, method, inner.clock.wall_time());

            // Held across the attempt; dropping this future mid-probe frees the slot
            let _permit = match inner.breaker.admit() {
                Ok(permit) => permit,
                Err(open) => {
                    tracing::debug!(endpoint = url, circuit = %open.state, "Breaker refused attempt");
                    return Err(ClientError::service_unavailable(
                        open.to_string(),
                        context.with_circuit_state(open.state),
                    ));
                }
            };

            if check_connectivity && !inner.connectivity.is_online() {
                inner.breaker.release_probe();
                self.enqueue(url, options, max_retries);
                return Err(ClientError::network(
                    "offline, request queued for retry",
                    context.with_circuit_state(inner.breaker.state()),
                ));
            }

            let timeout = attempt_timeout(inner.request_timeout, max_retries, remaining);
            let request = self.build_request(url, options);
            let label = format!("{method} {url}");

            let failure = match with_timeout(timeout, label, inner.transport.send(request)).await {
                Ok(Ok(response)) if response.is_success() => {
                    inner.breaker.record_success();
                    inner.connectivity.record_success();
                    return Ok(response.json_body());
                }
                Ok(Ok(response)) => Failure::Status {
                    status: response.status,
                    message: response.error_message(),
                },
                Ok(Err(e)) => e.into_failure(timeout),
                Err(_) => Failure::TimedOut(timeout),
            };

            let error = ErrorClassifier::to_error(&failure, context)
                .with_attempt(attempt + 1, max_retries);

            if !error.is_retryable() {
                if error.counts_against_breaker() {
                    inner.breaker.record_failure();
                } else {
                    inner.breaker.release_probe();
                }
                tracing::debug!(endpoint = url, error = %error.message, "Call failed, not retrying");
                return Err(error.with_circuit_state(inner.breaker.state()));
            }

            if remaining == 0 {
                inner.breaker.record_failure();
                tracing::warn!(
                    endpoint = url,
                    attempts = attempt + 1,
                    error = %error.message,
                    "Retries exhausted"
                );
                return Err(error.with_circuit_state(inner.breaker.state()));
            }

            if inner.breaker.state() == CircuitState::HalfOpen {
                inner.breaker.record_failure();
            }

            let delay = inner.backoff.delay(attempt);
            tracing::debug!(
                endpoint = url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error.message,
                "Retrying after backoff"
            );
            inner.clock.sleep(delay).await;

            attempt += 1;
            remaining -= 1;
        }
    }

    fn build_request(&self, url: &str, options: &RequestOptions) -> HttpRequest {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        headers.extend(options.headers.iter().cloned());
        if options.authenticated {
            match self.inner.tokens.bearer() {
                Some(bearer) => headers.push(("Authorization".to_string(), bearer)),
                None => tracing::debug!(endpoint = url, "No token stored for authenticated call"),
            }
        }
        HttpRequest {
            method: options.method,
            url: url.to_string(),
            headers,
            body: options.body.clone(),
        }
    }

    fn enqueue(&self, url: &str, options: &RequestOptions, max_retries: u32) {
        let executor = self.clone();
        let url = url.to_string();
        let options = options.clone();
        let label = format!("{} {}", options.method, url);
        self.inner.queue.enqueue(QueuedRequest::new(
            label,
            self.inner.clock.wall_time(),
            Box::new(move || {
                let executor = executor.clone();
                let url = url.clone();
                let options = options.clone();
                Box::pin(async move { executor.run(&url, &options, max_retries, false).await })
            }),
        ));
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("breaker", &self.inner.breaker.metrics())
            .field("queue", &self.inner.queue)
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}
