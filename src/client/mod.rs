//! Multi-server client
//!
//! The [`Client`] owns one [`ServerHandle`] per configured server and the
//! routing table that maps collection names to them.
//!
//! ## Name Resolution
//!
//! ```text
//! lock table ──> stale? ──yes──> refresh ──┐
//!                  │                       │
//!                  no                      ▼
//!                  └────────────────> lookup ──hit──> Collection
//!                                          │
//!                                         miss
//!                                          ▼
//!                          refreshed already? ──yes──> NotFound
//!                                          │
//!                                          no
//!                                          ▼
//!                                refresh, lookup again
//! ```
//!
//! The whole sequence runs under the table lock, so concurrent callers
//! never see a half-merged table and never refresh twice for the same miss.

pub mod collection;
pub mod pipeline;

pub use collection::Collection;
pub use pipeline::{Pipeline, PipelineError, Slot, SlotError};

use crate::config::{ClientConfig, ServerAddr};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{validate_token, CollectionParams};
use crate::routing::{NameCollision, RoutingTable, ServerListing};
use crate::server::ServerHandle;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of [`Client::create_or_get`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(Collection),
    AlreadyExisted(Collection),
}

impl CreateOutcome {
    pub fn collection(&self) -> &Collection {
        match self {
            CreateOutcome::Created(c) | CreateOutcome::AlreadyExisted(c) => c,
        }
    }

    pub fn into_collection(self) -> Collection {
        match self {
            CreateOutcome::Created(c) | CreateOutcome::AlreadyExisted(c) => c,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// One row of [`Client::list_collections`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub name: String,
    /// The server's description of the collection
    pub info: String,
    /// Set when the listing was asked to include servers
    pub server: Option<ServerAddr>,
}

/// Client for a set of filter servers.
///
/// `Client` is `Send + Sync`; share it behind an `Arc`.
pub struct Client {
    servers: Vec<Arc<ServerHandle>>,
    routes: Mutex<RoutingTable>,
}

impl Client {
    /// Creates a client. No connection is opened until the first request.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let servers = config
            .servers
            .into_iter()
            .map(|addr| Arc::new(ServerHandle::new(addr, config.timeout)))
            .collect();

        Ok(Self {
            servers,
            routes: Mutex::new(RoutingTable::new(config.routing_ttl)),
        })
    }

    /// Creates a client for `host[:port]` addresses with default settings.
    pub fn connect<I, S>(servers: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(ClientConfig::new(servers)?)
    }

    /// Configured servers, in discovery order.
    pub fn servers(&self) -> impl Iterator<Item = &ServerAddr> {
        self.servers.iter().map(|server| server.addr())
    }

    fn handle(&self, addr: &ServerAddr) -> Option<Arc<ServerHandle>> {
        self.servers
            .iter()
            .find(|server| server.addr() == addr)
            .cloned()
    }

    /// Lists every server and rebuilds the table from the answers.
    ///
    /// Returns the servers that answered. Fails only when none did.
    async fn refresh(&self, table: &mut RoutingTable) -> ClientResult<HashSet<ServerAddr>> {
        let mut listings = Vec::with_capacity(self.servers.len());
        let mut reachable = HashSet::new();
        let mut last_error = None;

        for server in &self.servers {
            let collections = match server.list_collections().await {
                Ok(collections) => {
                    reachable.insert(server.addr().clone());
                    Some(collections)
                }
                Err(e) => {
                    warn!(server = %server.addr(), error = %e, "Discovery skipped server");
                    last_error = Some(e);
                    None
                }
            };
            listings.push(ServerListing {
                server: Arc::clone(server),
                collections,
            });
        }

        if reachable.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let collisions = table.apply_refresh(listings, Instant::now()).len();
        debug!(
            collections = table.len(),
            reachable = reachable.len(),
            collisions,
            round = table.rounds(),
            "Routing table refreshed"
        );
        Ok(reachable)
    }

    /// Finds the server hosting `name`, refreshing at most once.
    async fn resolve(
        &self,
        table: &mut RoutingTable,
        name: &str,
    ) -> ClientResult<Option<Arc<ServerHandle>>> {
        let mut refreshed = false;
        if table.needs_refresh(Instant::now()) {
            self.refresh(table).await?;
            refreshed = true;
        }

        if let Some(route) = table.lookup(name) {
            return Ok(Some(Arc::clone(&route.server)));
        }
        if refreshed {
            return Ok(None);
        }

        debug!(collection = name, "Routing miss, refreshing");
        self.refresh(table).await?;
        Ok(table.lookup(name).map(|route| Arc::clone(&route.server)))
    }

    /// Creates a collection.
    ///
    /// With `server` set the collection goes there; otherwise it goes to the
    /// least-loaded live server. Fails with
    /// [`ClientError::AlreadyExists`] if any server already hosts the name.
    pub async fn create_collection(
        &self,
        name: &str,
        params: CollectionParams,
        server: Option<&ServerAddr>,
    ) -> ClientResult<Collection> {
        match self.create_or_get(name, params, server).await? {
            CreateOutcome::Created(collection) => Ok(collection),
            CreateOutcome::AlreadyExisted(collection) => Err(ClientError::AlreadyExists {
                name: name.to_string(),
                server: collection.server().clone(),
            }),
        }
    }

    /// Creates a collection, or returns the existing one of that name.
    ///
    /// An existing collection is returned wherever it lives, even when
    /// `server` names a different server. Its parameters are left as they
    /// are.
    pub async fn create_or_get(
        &self,
        name: &str,
        params: CollectionParams,
        server: Option<&ServerAddr>,
    ) -> ClientResult<CreateOutcome> {
        validate_token(name).map_err(ClientError::InvalidArgument)?;
        params.validate().map_err(ClientError::InvalidArgument)?;
        let pinned = match server {
            Some(addr) => Some(
                self.handle(addr)
                    .ok_or_else(|| ClientError::UnknownServer(addr.clone()))?,
            ),
            None => None,
        };

        let mut table = self.routes.lock().await;
        if let Some(existing) = self.resolve(&mut table, name).await? {
            return Ok(CreateOutcome::AlreadyExisted(Collection::new(name, existing)));
        }

        let target = match pinned {
            Some(server) => server,
            None => table
                .place(&self.servers)
                .ok_or_else(|| ClientError::Config("no servers configured".to_string()))?,
        };
        info!(
            collection = name,
            server = %target.addr(),
            pinned = server.is_some(),
            "Placing collection"
        );

        match target.create_collection(name, &params).await {
            Ok(()) => {
                table.insert(name, Arc::clone(&target));
                Ok(CreateOutcome::Created(Collection::new(name, target)))
            }
            // Created behind our back since the last refresh
            Err(ClientError::AlreadyExists { .. }) => {
                table.insert(name, Arc::clone(&target));
                Ok(CreateOutcome::AlreadyExisted(Collection::new(name, target)))
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the collection named `name`.
    ///
    /// An unknown name triggers one discovery refresh before failing with
    /// [`ClientError::NotFound`].
    pub async fn get_collection(&self, name: &str) -> ClientResult<Collection> {
        validate_token(name).map_err(ClientError::InvalidArgument)?;
        let mut table = self.routes.lock().await;
        match self.resolve(&mut table, name).await? {
            Some(server) => Ok(Collection::new(name, server)),
            None => Err(ClientError::NotFound {
                name: name.to_string(),
                server: None,
            }),
        }
    }

    /// True if some server hosts `name`.
    pub async fn exists(&self, name: &str) -> ClientResult<bool> {
        if validate_token(name).is_err() {
            return Ok(false);
        }
        let mut table = self.routes.lock().await;
        Ok(self.resolve(&mut table, name).await?.is_some())
    }

    /// Drops a collection from its server and forgets its route.
    pub async fn drop_collection(&self, name: &str) -> ClientResult<()> {
        validate_token(name).map_err(ClientError::InvalidArgument)?;
        let mut table = self.routes.lock().await;
        let server = self
            .resolve(&mut table, name)
            .await?
            .ok_or_else(|| ClientError::NotFound {
                name: name.to_string(),
                server: None,
            })?;

        match server.drop_collection(name).await {
            Ok(()) => {
                table.evict(name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                table.evict(name);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Lists the collections of every reachable server, each name once.
    ///
    /// Always re-lists the servers. Names that two servers report appear once,
    /// under the server that owns them in the routing table; the collision is
    /// available from [`Client::collisions`].
    pub async fn list_collections(
        &self,
        include_server: bool,
    ) -> ClientResult<Vec<CollectionEntry>> {
        let mut table = self.routes.lock().await;
        let reachable = self.refresh(&mut table).await?;

        Ok(table
            .entries()
            .into_iter()
            .filter(|(_, route)| reachable.contains(route.server.addr()))
            .map(|(name, route)| CollectionEntry {
                name: name.to_string(),
                info: route.info.clone(),
                server: include_server.then(|| route.server.addr().clone()),
            })
            .collect())
    }

    /// Asks every server to persist all of its collections.
    ///
    /// Every server is tried; the first error is returned.
    pub async fn flush(&self) -> ClientResult<()> {
        let mut first_error = None;
        for server in &self.servers {
            if let Err(e) = server.flush(None).await {
                warn!(server = %server.addr(), error = %e, "Flush failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes every server connection. The client stays usable and
    /// reconnects on the next request.
    pub async fn close(&self) {
        for server in &self.servers {
            server.close().await;
        }
    }

    /// Name collisions seen by the latest discovery refresh.
    pub async fn collisions(&self) -> Vec<NameCollision> {
        self.routes.lock().await.collisions().to_vec()
    }

    /// Number of discovery refreshes performed so far.
    pub async fn discovery_rounds(&self) -> u64 {
        self.routes.lock().await.rounds()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("servers", &self.servers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Reply;
    use crate::testing::FakeServer;
    use std::time::Duration;

    fn client(fakes: &[&FakeServer]) -> Client {
        let config = ClientConfig::new(fakes.iter().map(|f| f.address()))
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        Client::new(config).unwrap()
    }

    /// Starts servers and returns them in ascending address order.
    async fn sorted_fakes(n: usize) -> Vec<FakeServer> {
        let mut fakes = Vec::new();
        for _ in 0..n {
            fakes.push(FakeServer::start().await);
        }
        fakes.sort_by_key(|f| f.addr());
        fakes
    }

    #[tokio::test]
    async fn test_placement_fills_least_loaded_in_address_order() {
        let fakes = sorted_fakes(3).await;
        // Configure in reverse so configured order and address order differ
        let client = client(&[&fakes[2], &fakes[1], &fakes[0]]);

        for name in ["one", "two", "three", "four"] {
            client
                .create_collection(name, CollectionParams::new(), None)
                .await
                .unwrap();
        }

        assert!(fakes[0].has_filter("one"));
        assert!(fakes[1].has_filter("two"));
        assert!(fakes[2].has_filter("three"));
        assert!(fakes[0].has_filter("four"));
    }

    #[tokio::test]
    async fn test_placement_counts_discovered_collections() {
        let fakes = sorted_fakes(2).await;
        fakes[0].add_filter("existing");
        let client = client(&[&fakes[0], &fakes[1]]);

        let created = client
            .create_collection("fresh", CollectionParams::new(), None)
            .await
            .unwrap();
        assert_eq!(created.server(), &fakes[1].addr());
    }

    #[tokio::test]
    async fn test_pinned_create_then_get_needs_no_refresh() {
        let a = FakeServer::start().await;
        let b = FakeServer::start().await;
        let client = client(&[&a, &b]);

        client
            .create_collection("users", CollectionParams::new().capacity(1000), Some(&b.addr()))
            .await
            .unwrap();
        assert!(b.has_filter("users"));

        let rounds = client.discovery_rounds().await;
        let users = client.get_collection("users").await.unwrap();
        assert_eq!(users.server(), &b.addr());
        assert_eq!(client.discovery_rounds().await, rounds);
    }

    #[tokio::test]
    async fn test_pinned_create_unknown_server() {
        let a = FakeServer::start().await;
        let client = client(&[&a]);

        let err = client
            .create_collection(
                "users",
                CollectionParams::new(),
                Some(&ServerAddr::new("nowhere", 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownServer(_)));
        assert_eq!(a.commands(), 0);
    }

    #[tokio::test]
    async fn test_create_existing_anywhere() {
        let a = FakeServer::start().await;
        let b = FakeServer::start().await;
        b.add_filter("users");
        let client = client(&[&a, &b]);

        let err = client
            .create_collection("users", CollectionParams::new(), Some(&a.addr()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::AlreadyExists { ref server, .. } if *server == b.addr()
        ));
        assert!(!a.has_filter("users"));

        let outcome = client
            .create_or_get("users", CollectionParams::new(), None)
            .await
            .unwrap();
        assert!(!outcome.was_created());
        assert_eq!(outcome.collection().server(), &b.addr());
    }

    #[tokio::test]
    async fn test_create_or_get_creates() {
        let a = FakeServer::start().await;
        let client = client(&[&a]);

        let outcome = client
            .create_or_get("users", CollectionParams::new(), None)
            .await
            .unwrap();
        assert!(outcome.was_created());
        assert!(a.has_filter("users"));
    }

    #[tokio::test]
    async fn test_get_unknown_refreshes_once() {
        let a = FakeServer::start().await;
        let b = FakeServer::start().await;
        let client = client(&[&a, &b]);

        // Warm the table
        client.list_collections(false).await.unwrap();
        let rounds = client.discovery_rounds().await;
        let calls = a.list_calls();

        let err = client.get_collection("ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.discovery_rounds().await, rounds + 1);
        assert_eq!(a.list_calls(), calls + 1);
    }

    #[tokio::test]
    async fn test_get_on_cold_client_refreshes_once() {
        let a = FakeServer::start().await;
        let client = client(&[&a]);

        assert!(client.get_collection("ghost").await.unwrap_err().is_not_found());
        assert_eq!(client.discovery_rounds().await, 1);
        assert_eq!(a.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_get_finds_collection_created_elsewhere() {
        let a = FakeServer::start().await;
        let b = FakeServer::start().await;
        let client = client(&[&a, &b]);
        client.list_collections(false).await.unwrap();

        b.add_filter("late");
        let late = client.get_collection("late").await.unwrap();
        assert_eq!(late.server(), &b.addr());
    }

    #[tokio::test]
    async fn test_pipeline_through_client() {
        let a = FakeServer::start().await;
        let client = client(&[&a]);
        let c = client
            .create_collection("c", CollectionParams::new(), None)
            .await
            .unwrap();

        let results = c.pipeline().add("a").check("a").add("b").execute().await.unwrap();
        assert_eq!(
            results,
            vec![Ok(Reply::Bool(true)), Ok(Reply::Bool(true)), Ok(Reply::Bool(true))]
        );
    }

    #[tokio::test]
    async fn test_pipeline_connection_lost() {
        let a = FakeServer::start().await;
        a.add_filter("c");
        // list, then two pipelined answers
        a.close_after(3);
        let client = client(&[&a]);
        let c = client.get_collection("c").await.unwrap();

        let err = c
            .pipeline()
            .add("1")
            .add("2")
            .add("3")
            .add("4")
            .add("5")
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.results.len(), 5);
        assert!(err.results[..2].iter().all(|slot| slot.is_ok()));
        assert!(err.results[2..]
            .iter()
            .all(|slot| *slot == Err(SlotError::ConnectionFailure)));
    }

    #[tokio::test]
    async fn test_drop_evicts() {
        let a = FakeServer::start().await;
        let client = client(&[&a]);
        client
            .create_collection("users", CollectionParams::new(), None)
            .await
            .unwrap();

        client.drop_collection("users").await.unwrap();
        assert!(!a.has_filter("users"));

        let rounds = client.discovery_rounds().await;
        assert!(client.get_collection("users").await.unwrap_err().is_not_found());
        assert_eq!(client.discovery_rounds().await, rounds + 1);
    }

    #[tokio::test]
    async fn test_drop_missing_on_server_evicts() {
        let a = FakeServer::start().await;
        a.add_filter("users");
        let client = client(&[&a]);
        client.get_collection("users").await.unwrap();

        a.remove_filter("users");
        assert!(client.drop_collection("users").await.unwrap_err().is_not_found());
        assert!(!client.exists("users").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_reports_collision_once() {
        let fakes = sorted_fakes(2).await;
        fakes[0].add_filter("shared");
        fakes[1].add_filter("shared");
        fakes[1].add_filter("solo");
        // Higher address first: configured order decides ownership
        let client = client(&[&fakes[1], &fakes[0]]);

        let entries = client.list_collections(true).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["shared", "solo"]);
        assert_eq!(entries[0].server, Some(fakes[1].addr()));

        let collisions = client.collisions().await;
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].name, "shared");
        assert_eq!(collisions[0].kept, fakes[1].addr());
        assert_eq!(collisions[0].duplicate, fakes[0].addr());
    }

    #[tokio::test]
    async fn test_list_without_servers() {
        let a = FakeServer::start().await;
        a.add_filter("users");
        let client = client(&[&a]);

        let entries = client.list_collections(false).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server, None);
        assert_eq!(entries[0].info, "0.000100 300046 100000 0");
    }

    #[tokio::test]
    async fn test_list_skips_unreachable_server() {
        let a = FakeServer::start().await;
        a.add_filter("users");
        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig::new([a.address(), format!("127.0.0.1:{}", dead)])
            .unwrap()
            .with_timeout(Duration::from_secs(1));
        let client = Client::new(config).unwrap();

        let entries = client.list_collections(false).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_create_avoids_unreachable_server() {
        let live = FakeServer::start().await;
        live.add_filter("busy");
        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig::new([format!("127.0.0.1:{}", dead), live.address()])
            .unwrap()
            .with_timeout(Duration::from_secs(1));
        let client = Client::new(config).unwrap();

        // The dead server has no collections, so only liveness keeps it out
        let created = client
            .create_collection("fresh", CollectionParams::new(), None)
            .await
            .unwrap();
        assert_eq!(created.server(), &live.addr());
        assert!(live.has_filter("fresh"));
    }

    #[tokio::test]
    async fn test_list_prefers_reachable_owner_over_retained_route() {
        let a = FakeServer::start().await;
        let b = FakeServer::start().await;
        a.add_filter("x");
        // Every connection to `a` answers once, so its second listing fails
        a.close_after(1);
        let client = client(&[&a, &b]);

        let entries = client.list_collections(true).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server, Some(a.addr()));

        b.add_filter("x");
        let entries = client.list_collections(true).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x");
        assert_eq!(entries[0].server, Some(b.addr()));
        assert!(client.collisions().await.is_empty());

        let x = client.get_collection("x").await.unwrap();
        assert_eq!(x.server(), &b.addr());
    }

    #[tokio::test]
    async fn test_all_servers_unreachable() {
        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = Client::connect([format!("127.0.0.1:{}", dead)]).unwrap();

        let err = client.get_collection("users").await.unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_routing_ttl_expiry_refreshes() {
        let a = FakeServer::start().await;
        a.add_filter("users");
        let config = ClientConfig::new([a.address()])
            .unwrap()
            .with_routing_ttl(Some(Duration::from_millis(300)));
        let client = Client::new(config).unwrap();

        client.get_collection("users").await.unwrap();
        client.get_collection("users").await.unwrap();
        assert_eq!(client.discovery_rounds().await, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        client.get_collection("users").await.unwrap();
        assert_eq!(client.discovery_rounds().await, 2);
    }

    #[tokio::test]
    async fn test_flush_and_close() {
        let a = FakeServer::start().await;
        let b = FakeServer::start().await;
        let client = client(&[&a, &b]);

        client.flush().await.unwrap();
        client.close().await;
        client.flush().await.unwrap();
        assert_eq!(a.commands(), 2);
        assert_eq!(b.commands(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_shares_one_refresh() {
        let a = FakeServer::start().await;
        a.add_filter("users");
        let client = Arc::new(client(&[&a]));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_collection("users").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(client.discovery_rounds().await, 1);
        assert_eq!(a.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_name() {
        let a = FakeServer::start().await;
        let client = client(&[&a]);

        let err = client
            .create_collection("bad name", CollectionParams::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert!(!client.exists("bad name").await.unwrap());
        assert_eq!(a.commands(), 0);
    }
}
