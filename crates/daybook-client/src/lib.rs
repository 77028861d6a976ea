//! # Daybook Client
//!
//! Resilient network client for the Daybook journal backend.
//!
//! ## Features
//!
//! - Request pipeline with a shared circuit breaker, bounded retries with
//!   jittered exponential backoff, and growing per-attempt timeouts
//! - Offline queue that replays deferred calls in order once back online
//! - Persistent WebSocket with automatic reconnection and per-channel
//!   subscriber registries
//! - Pluggable transport, socket connector, key-value store and clock
//!
//! ## Example
//!
//! ```ignore
//! use daybook_client::{ApiClient, ClientConfig, ConnectionManager, Credentials, Envelope};
//!
//! let config = ClientConfig::new("http://localhost:3000").with_max_retries(3);
//!
//! let api = ApiClient::new(config.clone())?;
//! api.login(&Credentials::new("me@example.com", "hunter2")).await?;
//! let entries: Vec<serde_json::Value> = api.list_entries().await?;
//!
//! let socket = ConnectionManager::new(&config);
//! socket.on_message(|env| println!("{} {}", env.kind, env.data));
//! socket.connect();
//! socket.send_message(&Envelope::get_entries());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod bus;
pub mod config;
pub mod connectivity;
pub mod envelope;
pub mod executor;
pub mod queue;
pub mod socket;
pub mod store;
pub mod transport;

pub use api::{ApiClient, AuthSession, Credentials};
pub use bus::{Channel, EventBus, Subscription};
pub use config::{endpoints, ClientConfig, ConfigError};
pub use connectivity::Connectivity;
pub use envelope::Envelope;
pub use executor::{RequestExecutor, RequestOptions};
pub use queue::{DrainHalt, DrainReport, OfflineQueue, QueuedRequest};
pub use socket::{
    ConnectionManager, ConnectionState, Connector, FrameSink, FrameStream, SocketConfig,
    SocketError, TungsteniteConnector,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, TokenStore};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

pub use daybook_error::{ClientError, ErrorContext, ErrorKind, Result};
