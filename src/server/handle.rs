//! Server Handle
//!
//! Client-side proxy for one filter server. It owns the single cached
//! connection to that server behind a mutex, so every exchange with the
//! server (direct command or pipeline batch) is serialized on that lock.
//!
//! ## Connection Acquisition
//!
//! ```text
//! lock ──> cached connection alive? ──yes──> lease it
//!                    │
//!                    no
//!                    ▼
//!          connect once ──ok──> cache it, lease it
//!                    │
//!                   err
//!                    ▼
//!          mark server dead, ConnectionFailure
//! ```
//!
//! Commands that fail after being written are never re-sent.

use crate::config::ServerAddr;
use crate::connection::{BatchError, Connection, ConnectionError, ConnectionStats};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{decode, CollectionListing, CollectionParams, Command, Frame, Reply};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Handle to one filter server.
pub struct ServerHandle {
    addr: ServerAddr,
    timeout: Option<Duration>,
    connection: Mutex<Option<Connection>>,
    /// Liveness as of the last exchange or connect attempt
    alive: AtomicBool,
    stats: Arc<ConnectionStats>,
}

impl ServerHandle {
    /// Creates a handle. No connection is made until first use.
    pub fn new(addr: ServerAddr, timeout: Option<Duration>) -> Self {
        Self {
            addr,
            timeout,
            connection: Mutex::new(None),
            alive: AtomicBool::new(true),
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    fn mark(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }

    /// Leases the connection, reconnecting once if the cached one is dead.
    ///
    /// The lease holds the connection lock; other callers wait until it is
    /// dropped.
    pub async fn connection(&self) -> ClientResult<ConnectionLease<'_>> {
        let mut slot = self.connection.lock().await;

        let reusable = slot.as_ref().is_some_and(|conn| conn.is_alive());
        if !reusable {
            if slot.take().is_some() {
                debug!(server = %self.addr, "Replacing dead connection");
            }
            match Connection::connect(&self.addr, self.timeout, Arc::clone(&self.stats)).await {
                Ok(conn) => {
                    *slot = Some(conn);
                    self.mark(true);
                }
                Err(e) => {
                    self.mark(false);
                    return Err(ClientError::connection(&self.addr, e));
                }
            }
        }

        Ok(ConnectionLease {
            slot,
            server: self,
        })
    }

    /// Sends one command and decodes its response.
    pub async fn request(&self, command: &Command) -> ClientResult<Reply> {
        let frame = self.connection().await?.send(command).await?;
        decode(command, frame)
            .map_err(|e| ClientError::from_reply(e, command.collection(), &self.addr))
    }

    /// Lists every collection this server hosts.
    pub async fn list_collections(&self) -> ClientResult<Vec<CollectionListing>> {
        match self.request(&Command::List).await? {
            Reply::Listing(listings) => Ok(listings),
            other => Err(self.unexpected("list", &other)),
        }
    }

    /// Creates a collection on this server.
    pub async fn create_collection(
        &self,
        name: &str,
        params: &CollectionParams,
    ) -> ClientResult<()> {
        let command = Command::create(name, params.clone());
        self.expect_done(&command).await?;
        info!(server = %self.addr, collection = name, "Created collection");
        Ok(())
    }

    /// Drops a collection from this server.
    pub async fn drop_collection(&self, name: &str) -> ClientResult<()> {
        self.expect_done(&Command::drop(name)).await?;
        info!(server = %self.addr, collection = name, "Dropped collection");
        Ok(())
    }

    /// Returns the server's info block for a collection.
    pub async fn info(&self, name: &str) -> ClientResult<BTreeMap<String, String>> {
        match self.request(&Command::info(name)).await? {
            Reply::Info(info) => Ok(info),
            other => Err(self.unexpected("info", &other)),
        }
    }

    /// Flushes one collection, or every collection when `name` is None.
    pub async fn flush(&self, name: Option<&str>) -> ClientResult<()> {
        self.expect_done(&Command::flush(name.map(str::to_string)))
            .await
    }

    /// Drops the cached connection. The next use reconnects.
    pub async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!(server = %self.addr, "Closed connection");
        }
    }

    async fn expect_done(&self, command: &Command) -> ClientResult<()> {
        match self.request(command).await? {
            Reply::Done => Ok(()),
            other => Err(self.unexpected(command.keyword(), &other)),
        }
    }

    fn unexpected(&self, command: &str, reply: &Reply) -> ClientError {
        ClientError::Protocol {
            server: self.addr.clone(),
            message: format!("unexpected reply to '{}': {:?}", command, reply),
        }
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Exclusive use of a server's connection.
pub struct ConnectionLease<'a> {
    slot: MutexGuard<'a, Option<Connection>>,
    server: &'a ServerHandle,
}

impl ConnectionLease<'_> {
    pub async fn send(&mut self, command: &Command) -> ClientResult<Frame> {
        let addr = self.server.addr();
        let conn = match self.slot.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::connection(addr, ConnectionError::Dead)),
        };

        let result = conn.send(command).await;
        self.server.mark(result.is_ok());
        result.map_err(|e| ClientError::connection(addr, e))
    }

    pub async fn send_all(&mut self, commands: &[Command]) -> Result<Vec<Frame>, BatchError> {
        let conn = match self.slot.as_mut() {
            Some(conn) => conn,
            None => {
                return Err(BatchError {
                    frames: Vec::new(),
                    source: ConnectionError::Dead,
                })
            }
        };

        let result = conn.send_all(commands).await;
        self.server.mark(result.is_ok());
        result
    }
}
