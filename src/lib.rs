//! # meshtap - Meshtastic ingestion and event routing
//!
//! meshtap passively listens to one or more Meshtastic radios on serial links,
//! decodes their traffic into typed packets, keeps a live registry of the mesh's
//! nodes and republishes every accepted packet to any number of TCP clients as
//! newline-delimited JSON.
//!
//! ## Features
//!
//! - **Self-healing links**: per-device supervisor with exponential backoff, idle
//!   detection and byte-wise frame resynchronization.
//! - **Deduplication**: flooded retransmissions seen via several relays (or several
//!   radios) are published once.
//! - **Node registry**: field-wise merge of names, positions and metrics, with TTL
//!   staleness and an optional on-disk cache.
//! - **Isolated consumers**: each client has its own bounded drop-oldest queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshtap::config::Config;
//! use meshtap::service::Meshtap;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("meshtap.toml").await?;
//!     let service = Meshtap::new(config).await?;
//!     service
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - frame decoder, packet model and interpreter
//! - [`registry`] - node registry and node cache
//! - [`events`] - domain events, event bus and wire format
//! - [`link`] - link supervisor and device connectors
//! - [`ingest`] - the task that owns interpretation and registry writes
//! - [`server`] - TCP streaming server
//! - [`service`] - startup and orderly shutdown of the whole pipeline
//! - [`config`] - TOML configuration
//! - [`protobuf`] - Meshtastic protobuf message subset

pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod link;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod protobuf;
pub mod registry;
pub mod server;
pub mod service;

pub use error::{MeshtapError, Result};
