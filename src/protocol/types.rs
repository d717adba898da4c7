//! Bloomd Protocol Data Types
//!
//! This module defines the requests the client sends and the frames it reads
//! back. The bloomd protocol is line oriented: every request is a single
//! newline-terminated line and every response is either a single line or a
//! block of lines wrapped in `START` / `END` markers.
//!
//! ## Protocol Format
//!
//! ```text
//! create <name> [capacity=N] [prob=P] [in_memory=1]   ->  Done | Exists
//! list                                                ->  START / <name> <info...> / END
//! drop <name>                                         ->  Done | Filter does not exist
//! info <name>                                         ->  START / <key> <value> / END
//! flush [<name>]                                      ->  Done
//! s <name> <key>                                      ->  Yes | No
//! c <name> <key>                                      ->  Yes | No
//! b <name> <key> [<key> ...]                          ->  Yes No ...
//! m <name> <key> [<key> ...]                          ->  Yes No ...
//! ```

use std::collections::BTreeMap;
use std::fmt;

/// The line terminator used by the protocol
pub const LF: u8 = b'\n';

/// Fixed response tokens
pub mod token {
    pub const DONE: &str = "Done";
    pub const EXISTS: &str = "Exists";
    pub const YES: &str = "Yes";
    pub const NO: &str = "No";
    pub const NOT_FOUND: &str = "Filter does not exist";
    pub const DELETE_IN_PROGRESS: &str = "Delete in progress";
    pub const CLIENT_ERROR: &str = "Client Error";
    pub const INTERNAL_ERROR: &str = "Internal Error";
    pub const BLOCK_START: &str = "START";
    pub const BLOCK_END: &str = "END";
}

/// Creation parameters for a collection.
///
/// These are opaque to routing; they are only forwarded to the server that
/// ends up hosting the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionParams {
    /// Initial capacity of the filter
    pub capacity: Option<u64>,
    /// Target false-positive probability. Requires `capacity`.
    pub false_positive_rate: Option<f64>,
    /// Keep the filter in memory only (no persistence on the server)
    pub in_memory: bool,
}

impl CollectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn false_positive_rate(mut self, rate: f64) -> Self {
        self.false_positive_rate = Some(rate);
        self
    }

    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    /// Checks the parameter combination the server accepts.
    pub fn validate(&self) -> Result<(), String> {
        if self.false_positive_rate.is_some() && self.capacity.is_none() {
            return Err("a false-positive rate requires a capacity".to_string());
        }
        if let Some(rate) = self.false_positive_rate {
            if !(rate > 0.0 && rate < 1.0) {
                return Err(format!("false-positive rate must be in (0, 1), got {}", rate));
            }
        }
        if self.capacity == Some(0) {
            return Err("capacity must be positive".to_string());
        }
        Ok(())
    }
}

/// A request line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create {
        name: String,
        params: CollectionParams,
    },
    List,
    Drop {
        name: String,
    },
    Info {
        name: String,
    },
    Flush {
        name: Option<String>,
    },
    /// Add a single key
    Set {
        name: String,
        key: String,
    },
    /// Test a single key
    Check {
        name: String,
        key: String,
    },
    /// Add several keys
    Bulk {
        name: String,
        keys: Vec<String>,
    },
    /// Test several keys
    Multi {
        name: String,
        keys: Vec<String>,
    },
}

impl Command {
    pub fn create(name: impl Into<String>, params: CollectionParams) -> Self {
        Command::Create {
            name: name.into(),
            params,
        }
    }

    pub fn drop(name: impl Into<String>) -> Self {
        Command::Drop { name: name.into() }
    }

    pub fn info(name: impl Into<String>) -> Self {
        Command::Info { name: name.into() }
    }

    pub fn flush(name: Option<String>) -> Self {
        Command::Flush { name }
    }

    pub fn set(name: impl Into<String>, key: impl Into<String>) -> Self {
        Command::Set {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn check(name: impl Into<String>, key: impl Into<String>) -> Self {
        Command::Check {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn bulk(name: impl Into<String>, keys: Vec<String>) -> Self {
        Command::Bulk {
            name: name.into(),
            keys,
        }
    }

    pub fn multi(name: impl Into<String>, keys: Vec<String>) -> Self {
        Command::Multi {
            name: name.into(),
            keys,
        }
    }

    /// The keyword that starts the request line.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::List => "list",
            Command::Drop { .. } => "drop",
            Command::Info { .. } => "info",
            Command::Flush { .. } => "flush",
            Command::Set { .. } => "s",
            Command::Check { .. } => "c",
            Command::Bulk { .. } => "b",
            Command::Multi { .. } => "m",
        }
    }

    /// The collection this command targets, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Command::List => None,
            Command::Flush { name } => name.as_deref(),
            Command::Create { name, .. }
            | Command::Drop { name }
            | Command::Info { name }
            | Command::Set { name, .. }
            | Command::Check { name, .. }
            | Command::Bulk { name, .. }
            | Command::Multi { name, .. } => Some(name),
        }
    }

    /// Serializes the command to its wire form, including the trailing newline.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the command into an existing buffer.
    ///
    /// Pipelines use this to build one write for the whole batch.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.to_string().as_bytes());
        buf.push(LF);
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())?;
        match self {
            Command::Create { name, params } => {
                write!(f, " {}", name)?;
                if let Some(capacity) = params.capacity {
                    write!(f, " capacity={}", capacity)?;
                }
                if let Some(rate) = params.false_positive_rate {
                    write!(f, " prob={}", rate)?;
                }
                if params.in_memory {
                    f.write_str(" in_memory=1")?;
                }
                Ok(())
            }
            Command::List => Ok(()),
            Command::Flush { name: None } => Ok(()),
            Command::Flush { name: Some(name) }
            | Command::Drop { name }
            | Command::Info { name } => write!(f, " {}", name),
            Command::Set { name, key } | Command::Check { name, key } => {
                write!(f, " {} {}", name, key)
            }
            Command::Bulk { name, keys } | Command::Multi { name, keys } => {
                write!(f, " {}", name)?;
                for key in keys {
                    write!(f, " {}", key)?;
                }
                Ok(())
            }
        }
    }
}

/// Checks that a collection name or key can travel as a single protocol token.
pub fn validate_token(token: &str) -> Result<(), String> {
    if token.is_empty() {
        return Err("empty name or key".to_string());
    }
    if token.chars().any(char::is_whitespace) {
        return Err(format!("'{}' contains whitespace", token.escape_default()));
    }
    Ok(())
}

/// One framed response read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A single response line, without its terminator
    Line(String),
    /// The lines between `START` and `END`
    Block(Vec<String>),
}

impl Frame {
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Frame::Line(line) => Some(line),
            Frame::Block(_) => None,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Frame::Block(_))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Line(line) => write!(f, "\"{}\"", line),
            Frame::Block(lines) => write!(f, "(block of {} lines)", lines.len()),
        }
    }
}

/// One entry of a `list` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionListing {
    pub name: String,
    /// Everything after the name, as reported by the server
    pub info: String,
}

impl CollectionListing {
    /// Splits a listing line into the name and the rest.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (name, info) = line.split_once(' ').unwrap_or((line, ""));
        Some(Self {
            name: name.to_string(),
            info: info.trim().to_string(),
        })
    }
}

/// A decoded, successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Bool(bool),
    Bools(Vec<bool>),
    Listing(Vec<CollectionListing>),
    Info(BTreeMap<String, String>),
}

impl Reply {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bools(&self) -> Option<&[bool]> {
        match self {
            Reply::Bools(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_bools(self) -> Option<Vec<bool>> {
        match self {
            Reply::Bools(b) => Some(b),
            _ => None,
        }
    }
}
