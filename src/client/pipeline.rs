//! Pipelined requests
//!
//! A [`Pipeline`] queues commands for one collection and sends them in a
//! single batched exchange:
//!
//! ```text
//! add("a") ──┐
//! check("a") ├──> execute() ──> write all ──> read all ──> [slot, slot, slot]
//! add("b") ──┘                 (one lock on the server's connection)
//! ```
//!
//! Queuing never touches the network. Each command gets a result slot, in
//! queue order. A server error answer fills its slot and the batch goes on; a
//! broken connection fails every slot that had no answer yet.

use crate::config::ServerAddr;
use crate::error::ClientError;
use crate::protocol::{decode, validate_token, Command, Reply, ReplyError};
use crate::server::ServerHandle;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of one pipelined command.
pub type Slot = Result<Reply, SlotError>;

/// Why a pipeline slot holds no reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlotError {
    /// The connection broke before this command was answered
    #[error("connection failed before a response arrived")]
    ConnectionFailure,

    /// The server answered with an error
    #[error(transparent)]
    Reply(#[from] ReplyError),

    /// Rejected before sending
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// A failed pipeline execution.
///
/// `results` holds one slot per queued command; slots answered before the
/// failure keep their replies.
#[derive(Debug, Error)]
#[error("pipeline on '{collection}' failed: {source}")]
pub struct PipelineError {
    pub collection: String,
    pub results: Vec<Slot>,
    #[source]
    pub source: ClientError,
}

enum Queued {
    Send(Command),
    /// Decided without a round trip
    Local(Slot),
}

/// Batched commands against one collection.
pub struct Pipeline {
    collection: String,
    server: Arc<ServerHandle>,
    queued: Vec<Queued>,
    executed: bool,
}

impl Pipeline {
    pub(crate) fn new(collection: String, server: Arc<ServerHandle>) -> Self {
        Self {
            collection,
            server,
            queued: Vec::new(),
            executed: false,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn server(&self) -> &ServerAddr {
        self.server.addr()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn add(&mut self, key: &str) -> &mut Self {
        let queued = match validate_token(key) {
            Ok(()) => Queued::Send(Command::set(&self.collection, key)),
            Err(message) => Queued::Local(Err(SlotError::InvalidArgument(message))),
        };
        self.queued.push(queued);
        self
    }

    pub fn check(&mut self, key: &str) -> &mut Self {
        let queued = match validate_token(key) {
            Ok(()) => Queued::Send(Command::check(&self.collection, key)),
            Err(message) => Queued::Local(Err(SlotError::InvalidArgument(message))),
        };
        self.queued.push(queued);
        self
    }

    pub fn bulk_add<K: AsRef<str>>(&mut self, keys: &[K]) -> &mut Self {
        let queued = self.queue_keys(keys, Command::bulk);
        self.queued.push(queued);
        self
    }

    pub fn bulk_check<K: AsRef<str>>(&mut self, keys: &[K]) -> &mut Self {
        let queued = self.queue_keys(keys, Command::multi);
        self.queued.push(queued);
        self
    }

    pub fn flush(&mut self) -> &mut Self {
        self.queued
            .push(Queued::Send(Command::flush(Some(self.collection.clone()))));
        self
    }

    fn queue_keys<K: AsRef<str>>(
        &self,
        keys: &[K],
        build: fn(String, Vec<String>) -> Command,
    ) -> Queued {
        let mut owned = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            if let Err(message) = validate_token(key) {
                return Queued::Local(Err(SlotError::InvalidArgument(message)));
            }
            owned.push(key.to_string());
        }
        if owned.is_empty() {
            return Queued::Local(Ok(Reply::Bools(Vec::new())));
        }
        Queued::Send(build(self.collection.clone(), owned))
    }

    /// Sends every queued command in one exchange and returns one slot per
    /// command, in queue order.
    ///
    /// A pipeline executes once; later calls fail with
    /// [`ClientError::PipelineExhausted`].
    pub async fn execute(&mut self) -> Result<Vec<Slot>, PipelineError> {
        if self.executed {
            return Err(PipelineError {
                collection: self.collection.clone(),
                results: Vec::new(),
                source: ClientError::PipelineExhausted,
            });
        }
        self.executed = true;

        let mut plan = Vec::with_capacity(self.queued.len());
        let mut commands = Vec::new();
        for queued in std::mem::take(&mut self.queued) {
            match queued {
                Queued::Send(command) => {
                    commands.push(command);
                    plan.push(None);
                }
                Queued::Local(slot) => plan.push(Some(slot)),
            }
        }

        if commands.is_empty() {
            return Ok(plan.into_iter().flatten().collect());
        }

        let addr = self.server.addr();
        let (frames, failure) = match self.server.connection().await {
            Ok(mut lease) => match lease.send_all(&commands).await {
                Ok(frames) => (frames, None),
                Err(e) => (e.frames, Some(ClientError::connection(addr, e.source))),
            },
            Err(e) => (Vec::new(), Some(e)),
        };
        debug!(
            server = %addr,
            collection = %self.collection,
            sent = commands.len(),
            answered = frames.len(),
            "Pipeline executed"
        );

        let mut frames = frames.into_iter();
        let mut answers = commands.iter().map(|command| match frames.next() {
            Some(frame) => decode(command, frame).map_err(SlotError::from),
            None => Err(SlotError::ConnectionFailure),
        });
        let results: Vec<Slot> = plan
            .into_iter()
            .map(|planned| match planned {
                Some(slot) => slot,
                None => answers.next().unwrap_or(Err(SlotError::ConnectionFailure)),
            })
            .collect();

        match failure {
            None => Ok(results),
            Some(source) => {
                warn!(
                    server = %addr,
                    collection = %self.collection,
                    error = %source,
                    "Pipeline aborted"
                );
                Err(PipelineError {
                    collection: self.collection.clone(),
                    results,
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("collection", &self.collection)
            .field("server", self.server())
            .field("queued", &self.queued.len())
            .field("executed", &self.executed)
            .finish()
    }
}
