//! Collection routing
//!
//! Maps collection names to the server that hosts them and decides where new
//! collections go.
//!
//! ## Discovery
//!
//! ```text
//! ┌──────────┐  list   ┌──────────┐
//! │ server A │ ──────> │          │
//! ├──────────┤  list   │ routing  │  name ──> Arc<ServerHandle>
//! │ server B │ ──────> │  table   │
//! ├──────────┤  list   │          │
//! │ server C │ ──────> │          │
//! └──────────┘         └──────────┘
//! ```
//!
//! Listings are merged in configured server order. When two servers report
//! the same name the earlier server keeps it and a [`NameCollision`] is
//! recorded.
//!
//! ## Placement
//!
//! New unpinned collections go to the live server holding the fewest
//! collections in the table, ties broken by ascending `(host, port)`.

pub mod table;

pub use table::{NameCollision, Route, RoutingTable, ServerListing};
