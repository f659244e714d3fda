//! resmirror Core Library
//!
//! This crate keeps a client-side mirror of resources held by a remote
//! server, seeded from REST snapshots and kept current by events pushed
//! over a WebSocket.
//!
//! # Architecture
//!
//! - **Transport**: reconnecting WebSocket that moves text frames
//! - **Subscriptions**: the set of joined topics, replayed on every reconnect
//! - **Events**: decoding of `create`, `patch`, `add_link` and `delete` frames
//! - **Mirror**: in-memory resource store with idempotent updates
//! - **Snapshots**: REST collection fetches seeded into the mirror
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut engine = spawn_engine(EngineConfig::from_config(&config)?)?;
//!
//! engine.watch("todo_list").await?;
//! while let Some(event) = engine.next_event().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! # Modules
//!
//! - `engine`: Ties everything together (main entry point)
//! - `mirror`: Resource store and change notifications
//! - `subscription`: Topic set and reconnect replay
//! - `message`: Wire format for joins and resource events
//! - `transport`: WebSocket connection with reconnection
//! - `snapshot`: Collection loading and seeding
//! - `rest`: HTTP client for the resource API
//! - `config`: Application configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod mirror;
pub mod models;
pub mod rest;
pub mod snapshot;
pub mod subscription;
pub mod topic;
pub mod transport;

pub use config::Config;
pub use engine::{spawn_engine, EngineConfig, EngineEvent, EngineHandle, SyncCore};
pub use error::{SyncError, SyncResult};
pub use message::{ClientMessage, Decoded, ResourceEvent};
pub use mirror::{Mirror, MirrorChange};
pub use models::{Link, Resource, ResourceData, ResourceKey, ResourceRecord, TargetId};
pub use rest::RestClient;
pub use snapshot::{RetryConfig, SnapshotLoader};
pub use subscription::SubscriptionManager;
pub use topic::Topic;
pub use transport::{ConnectionStatus, TransportConfig};
