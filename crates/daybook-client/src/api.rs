//! Journal API facade
//!
//! Named endpoint calls routed through the [`RequestExecutor`].

use crate::config::{endpoints, ClientConfig, ConfigError};
use crate::executor::{RequestExecutor, RequestOptions};
use crate::store::{KeyValueStore, MemoryStore};
use crate::transport::{Method, ReqwestTransport, Transport};
use daybook_error::{ClientError, ErrorContext, Result};
use daybook_resilience::{Clock, SystemClock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Credentials for login and registration
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
}

impl Credentials {
    /// Creates credentials
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Body returned by login and registration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthSession {
    /// Bearer token
    pub token: String,
    /// User record, shape owned by the server
    #[serde(default)]
    pub user: Option<Value>,
}

/// High-level client for the journal backend
///
/// After an idle period longer than the staleness window the client treats
/// itself as offline and queues every call; call [`ApiClient::set_online`]
/// when the application regains focus or the network comes back.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ClientConfig,
    executor: RequestExecutor,
}

impl ApiClient {
    /// Client over `reqwest` with an in-memory store
    pub fn new(config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_store(config, MemoryStore::shared())
    }

    /// Client over `reqwest` with the given store
    pub fn with_store(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> std::result::Result<Self, ConfigError> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_parts(config, transport, store, SystemClock::shared())
    }

    /// Client with every collaborator supplied
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let executor = RequestExecutor::new(&config, transport, store, clock);
        Ok(Self { config, executor })
    }

    /// The underlying executor
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Effective configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Forwards the application's online/offline signal
    pub fn set_online(&self, online: bool) {
        self.executor.set_online(online);
    }

    /// Calls a named endpoint with the configured retry limit
    pub async fn call(&self, endpoint: &str, options: RequestOptions) -> Result<Value> {
        let url = self.config.endpoint_url(endpoint).map_err(|e| {
            ClientError::validation(e.to_string(), ErrorContext::new(endpoint, options.method.as_str()))
        })?;
        self.executor
            .execute(&url, options, self.config.max_retries)
            .await
    }

    /// Authenticated GET, decoded into `T`
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let value = self
            .call(endpoint, RequestOptions::get().authenticated())
            .await?;
        decode(endpoint, Method::Get, value)
    }

    /// Authenticated POST of `body`, decoded into `T`
    pub async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(endpoint, Method::Post, body)?;
        let value = self
            .call(endpoint, RequestOptions::post(body).authenticated())
            .await?;
        decode(endpoint, Method::Post, value)
    }

    /// Logs in and stores the returned token
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthSession> {
        self.authenticate(endpoints::LOGIN, credentials).await
    }

    /// Registers an account and stores the returned token
    pub async fn register(&self, credentials: &Credentials) -> Result<AuthSession> {
        self.authenticate(endpoints::REGISTER, credentials).await
    }

    /// Logs out; the stored token is forgotten even if the server call fails
    pub async fn logout(&self) -> Result<()> {
        let result = self
            .call(
                endpoints::LOGOUT,
                RequestOptions::post(Value::Null).authenticated(),
            )
            .await;
        self.executor.tokens().clear();
        result.map(|_| ())
    }

    /// Liveness probe
    pub async fn health(&self) -> Result<Value> {
        self.call(endpoints::HEALTH, RequestOptions::get()).await
    }

    /// Fetches every entry
    pub async fn list_entries<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.get(endpoints::ENTRIES).await
    }

    /// Saves an entry and returns the server's copy
    pub async fn save_entry<E, T>(&self, entry: &E) -> Result<T>
    where
        E: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post(endpoints::ENTRIES, entry).await
    }

    /// True if a token is stored
    pub fn is_authenticated(&self) -> bool {
        self.executor.tokens().token().is_some()
    }

    async fn authenticate(&self, endpoint: &str, credentials: &Credentials) -> Result<AuthSession> {
        let body = encode(endpoint, Method::Post, credentials)?;
        let value = self.call(endpoint, RequestOptions::post(body)).await?;
        let session: AuthSession = decode(endpoint, Method::Post, value)?;
        self.executor.tokens().set_token(&session.token);
        tracing::info!(endpoint, "Authenticated");
        Ok(session)
    }
}

fn encode<B: Serialize + ?Sized>(endpoint: &str, method: Method, body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| {
        ClientError::validation(
            format!("request body is not serializable: {e}"),
            ErrorContext::new(endpoint, method.as_str()),
        )
    })
}

fn decode<T: DeserializeOwned>(endpoint: &str, method: Method, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        ClientError::server(
            format!("unexpected response body: {e}"),
            ErrorContext::new(endpoint, method.as_str()),
        )
        .with_retryable(false)
    })
}
