//! Bloomd Protocol Implementation
//!
//! This module implements the client side of the bloomd text protocol.
//!
//! ## Overview
//!
//! Requests are single lines. Responses are framed as either one line or a
//! `START` ... `END` block, and the server answers requests on a connection
//! strictly in order, which is what makes pipelining possible without
//! request identifiers.
//!
//! ## Modules
//!
//! - `types`: Commands, frames and decoded replies
//! - `parser`: Incremental response framing
//! - `reply`: Decoding a frame against the command it answers
//!
//! ## Example
//!
//! ```
//! use flashbloom::protocol::{decode, parse_frame, Command, Reply};
//!
//! let command = Command::check("users", "alice");
//! assert_eq!(command.serialize(), b"c users alice\n");
//!
//! let (frame, _) = parse_frame(b"Yes\n").unwrap().unwrap();
//! assert_eq!(decode(&command, frame), Ok(Reply::Bool(true)));
//! ```

pub mod parser;
pub mod reply;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_frame, FrameParser, ParseError, ParseResult};
pub use reply::{decode, ReplyError};
pub use types::{
    validate_token, CollectionListing, CollectionParams, Command, Frame, Reply,
};
