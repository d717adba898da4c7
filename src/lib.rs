//! # FlashBloom - A Multi-Server Client for bloomd Filter Servers
//!
//! FlashBloom lets application code manage and query probabilistic
//! set-membership filters ("collections") spread across several independent
//! bloomd servers, as if they were one namespace.
//!
//! ## Features
//!
//! - **Discovery**: Finds which server hosts which collection by listing them all
//! - **Placement**: New collections go to the least-loaded server unless pinned
//! - **Routing**: Every per-collection operation goes to the owning server
//! - **Pipelining**: Many membership commands in a single round trip
//! - **Async I/O**: Built on Tokio; one `Client` can be shared by many tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                Client                                   │
//! │                                                                         │
//! │  ┌──────────────────┐   name    ┌──────────────┐    ┌───────────────┐   │
//! │  │  Routing Table   │ ────────> │  Collection  │───>│   Pipeline    │   │
//! │  │ (Mutex, refresh) │           │    proxy     │    │  (batched)    │   │
//! │  └────────┬─────────┘           └──────┬───────┘    └───────┬───────┘   │
//! │           │ list                       │ request            │ batch     │
//! │           ▼                            ▼                    ▼           │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                          Server Handles                           │  │
//! │  │  ┌────────────┐  ┌────────────┐  ┌────────────┐                   │  │
//! │  │  │ server A   │  │ server B   │  │ server C   │   one Connection  │  │
//! │  │  │ Mutex<Conn>│  │ Mutex<Conn>│  │ Mutex<Conn>│   each, lazy      │  │
//! │  │  └────────────┘  └────────────┘  └────────────┘                   │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use flashbloom::{Client, CollectionParams};
//!
//! # async fn run() -> Result<(), flashbloom::ClientError> {
//! let client = Client::connect(["bloom-a:8673", "bloom-b:8673"])?;
//!
//! let users = client
//!     .create_collection("users", CollectionParams::new().capacity(1_000_000), None)
//!     .await?;
//! users.add("alice").await?;
//! assert!(users.check("alice").await?);
//!
//! let results = users.pipeline().add("bob").check("bob").execute().await;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: bloomd line protocol commands, framing and replies
//! - [`connection`]: One TCP stream to one server
//! - [`server`]: Per-server handle owning the cached connection
//! - [`routing`]: Collection-to-server table and placement
//! - [`client`]: The `Client` façade, collection proxies and pipelines
//! - [`config`]: Server addresses and client settings
//!
//! ## Design Highlights
//!
//! ### Lazy Discovery
//!
//! The routing table is filled by listing every server, on first use, when
//! it grows older than the routing TTL, on an explicit listing, and once on a
//! routing miss before a name is declared unknown.
//!
//! ### Serialized Connections
//!
//! Each server has exactly one connection. Direct requests and pipeline
//! batches take its lock for the whole exchange, so responses can never be
//! attributed to the wrong request.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod routing;
pub mod server;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use client::{
    Client, Collection, CollectionEntry, CreateOutcome, Pipeline, PipelineError, Slot, SlotError,
};
pub use config::{ClientConfig, ServerAddr, DEFAULT_PORT, DEFAULT_ROUTING_TTL};
pub use error::{ClientError, ClientResult};
pub use protocol::{CollectionParams, Reply, ReplyError};
pub use routing::NameCollision;

/// Version of FlashBloom
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
