//! Connection Module
//!
//! This module manages the byte streams between the client and each filter
//! server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ServerHandle                            │
//! │                   (server module)                           │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ lock + reconnect once if dead
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Write lines │───>│ Read bytes  │───>│ Parse frame │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Buffer Management**: Efficient BytesMut buffer for incoming data
//! - **Pipelining**: Writes a whole batch before reading any response
//! - **Timeouts**: Optional deadline on every read and write
//! - **Statistics**: Tracks connection and command metrics

pub mod stream;

// Re-export commonly used types
pub use stream::{BatchError, Connection, ConnectionError, ConnectionStats};
