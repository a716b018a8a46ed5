//! # engage-client
//!
//! Client-side runtime of the engage-sync core.
//!
//! This is the crate host applications embed. It ties the pure logic of
//! `engage-core` and the asset cache of `engage-assets` to durable event
//! delivery and an explicit session lifecycle.
//!
//! ## Features
//!
//! - **Durable Event Queue**: append-only log with checksummed records and an
//!   atomically replaced ack marker; survives crashes without losing events
//! - **At-Least-Once Delivery**: a batch is only removed after a 2xx answer
//! - **Single-Flight Flushing**: concurrent flush requests coalesce
//! - **Transport Abstraction**: pluggable delivery (HTTP, mock)
//! - **Push Registration**: provider selection and token debounce
//!
//! ## Example
//!
//! ```ignore
//! use engage_sync_client::{Config, Session, MockTransport};
//! use engage_sync_assets::MockDownloader;
//! use engage_sync_core::SystemClock;
//!
//! let config = Config::from_file(Path::new("engage.toml"))?;
//! let session = Session::init(config, MockDownloader::new(), MockTransport::new(), Arc::new(SystemClock)).await?;
//!
//! session.apply_campaigns(payload).wait().await;
//! session.track("event", Attributes::new(), Attributes::new()).await?;
//! session.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod push;
pub mod queue;
pub mod session;
pub mod transport;

pub use config::{AssetsConfig, Config, ConfigError, DeviceConfig, EventsConfig, StorageConfig};
pub use dispatcher::{
    spawn_flush_task, DeviceIdentity, DispatchConfig, DispatchError, Dispatcher, FlushOutcome,
};
pub use push::{select_provider, PushError, StaticTokenProvider, TokenProvider};
pub use queue::{EventLog, EventQueue, QueueError, QueueOptions};
pub use session::{Session, SessionError, DEVICE_UPDATE_EVENT};
pub use transport::{BatchResponse, MockTransport, Transport, TransportError};
