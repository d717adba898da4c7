//! Server Handle Module
//!
//! One [`ServerHandle`] per configured filter server. A handle owns the
//! connection to its server and exposes the collection-management commands
//! (create, drop, list, info, flush) as single-shot requests.
//!
//! ## Example
//!
//! ```ignore
//! use flashbloom::server::ServerHandle;
//! use flashbloom::protocol::CollectionParams;
//!
//! let server = ServerHandle::new("127.0.0.1:8673".parse()?, None);
//! server.create_collection("users", &CollectionParams::new()).await?;
//! for listing in server.list_collections().await? {
//!     println!("{} {}", listing.name, listing.info);
//! }
//! ```

pub mod handle;

pub use handle::{ConnectionLease, ServerHandle};
