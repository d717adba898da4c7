//! Collection proxy
//!
//! A `Collection` is bound to the server that hosted the collection when it
//! was resolved. It does not re-resolve: if the collection moves or is
//! dropped, its requests fail with the server's answer.

use crate::client::pipeline::Pipeline;
use crate::config::ServerAddr;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{validate_token, Command, Reply};
use crate::server::ServerHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Handle to one named collection on its server.
#[derive(Clone)]
pub struct Collection {
    name: String,
    server: Arc<ServerHandle>,
}

impl Collection {
    pub(crate) fn new(name: impl Into<String>, server: Arc<ServerHandle>) -> Self {
        Self {
            name: name.into(),
            server,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server hosting this collection.
    pub fn server(&self) -> &ServerAddr {
        self.server.addr()
    }

    /// Adds a key. Returns true if the key was not already present.
    pub async fn add(&self, key: &str) -> ClientResult<bool> {
        check_key(key)?;
        self.request_bool(Command::set(&self.name, key)).await
    }

    /// Tests a key for membership.
    pub async fn check(&self, key: &str) -> ClientResult<bool> {
        check_key(key)?;
        self.request_bool(Command::check(&self.name, key)).await
    }

    /// Same as [`Collection::check`].
    pub async fn contains(&self, key: &str) -> ClientResult<bool> {
        self.check(key).await
    }

    /// Adds several keys in one request. One result per key, in order.
    pub async fn bulk_add<K: AsRef<str>>(&self, keys: &[K]) -> ClientResult<Vec<bool>> {
        let keys = check_keys(keys)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.request_bools(Command::bulk(&self.name, keys)).await
    }

    /// Tests several keys in one request. One result per key, in order.
    pub async fn bulk_check<K: AsRef<str>>(&self, keys: &[K]) -> ClientResult<Vec<bool>> {
        let keys = check_keys(keys)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.request_bools(Command::multi(&self.name, keys)).await
    }

    /// The server's info block for this collection.
    pub async fn info(&self) -> ClientResult<BTreeMap<String, String>> {
        self.server.info(&self.name).await
    }

    /// Number of keys added, from the `size` info field.
    pub async fn len(&self) -> ClientResult<u64> {
        let info = self.info().await?;
        info.get("size")
            .and_then(|size| size.parse().ok())
            .ok_or_else(|| ClientError::Protocol {
                server: self.server().clone(),
                message: format!("info for '{}' has no valid size field", self.name),
            })
    }

    pub async fn is_empty(&self) -> ClientResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Asks the server to persist this collection.
    pub async fn flush(&self) -> ClientResult<()> {
        self.server.flush(Some(&self.name)).await
    }

    /// Starts a pipeline bound to this collection's server.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.name.clone(), Arc::clone(&self.server))
    }

    async fn request_bool(&self, command: Command) -> ClientResult<bool> {
        match self.server.request(&command).await? {
            Reply::Bool(b) => Ok(b),
            other => Err(self.unexpected(&command, &other)),
        }
    }

    async fn request_bools(&self, command: Command) -> ClientResult<Vec<bool>> {
        match self.server.request(&command).await? {
            Reply::Bools(b) => Ok(b),
            other => Err(self.unexpected(&command, &other)),
        }
    }

    fn unexpected(&self, command: &Command, reply: &Reply) -> ClientError {
        ClientError::Protocol {
            server: self.server().clone(),
            message: format!("unexpected reply to '{}': {:?}", command.keyword(), reply),
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("server", self.server())
            .finish()
    }
}

fn check_key(key: &str) -> ClientResult<()> {
    validate_token(key).map_err(ClientError::InvalidArgument)
}

fn check_keys<K: AsRef<str>>(keys: &[K]) -> ClientResult<Vec<String>> {
    keys.iter()
        .map(|key| {
            let key = key.as_ref();
            check_key(key)?;
            Ok(key.to_string())
        })
        .collect()
}
