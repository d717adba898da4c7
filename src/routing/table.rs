//! Routing table - maps collection names to the servers hosting them.
//!
//! The table is a cache of server-side truth. It is rebuilt by full
//! discovery refreshes and adjusted by successful creates and drops, and it is
//! never updated on a guess. A missing entry means "unknown": callers refresh
//! before concluding that a collection does not exist.

use crate::config::ServerAddr;
use crate::protocol::CollectionListing;
use crate::server::ServerHandle;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Where a collection lives.
#[derive(Debug, Clone)]
pub struct Route {
    pub server: Arc<ServerHandle>,
    /// The server's listing line for the collection, minus the name
    pub info: String,
}

/// Two servers reported the same collection during discovery.
///
/// The first server in configured order keeps the name; the other copy is
/// left alone. This is a warning, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("collection '{name}' is claimed by both {kept} and {duplicate}")]
pub struct NameCollision {
    pub name: String,
    /// The server the table routes to
    pub kept: ServerAddr,
    /// The server whose claim was ignored
    pub duplicate: ServerAddr,
}

/// One server's answer to a discovery round.
///
/// `collections` is None when the server could not be listed.
#[derive(Debug)]
pub struct ServerListing {
    pub server: Arc<ServerHandle>,
    pub collections: Option<Vec<CollectionListing>>,
}

/// Cache of collection placement across servers.
#[derive(Debug)]
pub struct RoutingTable {
    routes: HashMap<String, Route>,
    /// Collisions seen by the latest refresh
    collisions: Vec<NameCollision>,
    refreshed_at: Option<Instant>,
    /// Number of completed refreshes
    rounds: u64,
    /// Age after which the table must be refreshed before use
    ttl: Option<Duration>,
}

impl RoutingTable {
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            routes: HashMap::new(),
            collisions: Vec::new(),
            refreshed_at: None,
            rounds: 0,
            ttl,
        }
    }

    /// Returns the route for a collection, if known.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    /// True before the first refresh, or once the table is older than its TTL.
    #[must_use]
    pub fn needs_refresh(&self, now: Instant) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => self
                .ttl
                .is_some_and(|ttl| now.saturating_duration_since(at) > ttl),
        }
    }

    /// Replaces the table with the union of a discovery round.
    ///
    /// Fresh listings are merged in the given order, so the first server to
    /// report a name owns it. A server that could not be listed then keeps
    /// the entries it had before the round, except names a listed server
    /// reported.
    pub fn apply_refresh(
        &mut self,
        listings: Vec<ServerListing>,
        now: Instant,
    ) -> &[NameCollision] {
        let previous = std::mem::take(&mut self.routes);
        let mut collisions = Vec::new();
        let mut unlisted = Vec::new();

        for listing in listings {
            let Some(collections) = listing.collections else {
                unlisted.push(listing.server);
                continue;
            };
            for collection in collections {
                let route = Route {
                    server: Arc::clone(&listing.server),
                    info: collection.info,
                };
                self.merge(collection.name, route, &mut collisions);
            }
        }

        for (name, route) in previous {
            let retained = unlisted
                .iter()
                .any(|server| server.addr() == route.server.addr());
            if retained {
                self.routes.entry(name).or_insert(route);
            }
        }

        self.collisions = collisions;
        self.refreshed_at = Some(now);
        self.rounds += 1;
        &self.collisions
    }

    fn merge(&mut self, name: String, route: Route, collisions: &mut Vec<NameCollision>) {
        match self.routes.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(route);
            }
            Entry::Occupied(existing) => {
                let kept = existing.get().server.addr();
                if kept != route.server.addr() {
                    let collision = NameCollision {
                        name: existing.key().clone(),
                        kept: kept.clone(),
                        duplicate: route.server.addr().clone(),
                    };
                    warn!(
                        collection = %collision.name,
                        kept = %collision.kept,
                        duplicate = %collision.duplicate,
                        "Collection name claimed by two servers"
                    );
                    collisions.push(collision);
                }
            }
        }
    }

    /// Records a collection a server just confirmed it hosts.
    pub fn insert(&mut self, name: impl Into<String>, server: Arc<ServerHandle>) {
        self.routes.insert(
            name.into(),
            Route {
                server,
                info: String::new(),
            },
        );
    }

    /// Removes a collection after it was dropped.
    pub fn evict(&mut self, name: &str) -> Option<Route> {
        self.routes.remove(name)
    }

    /// Number of collections each server holds according to the table.
    fn load(&self) -> HashMap<&ServerAddr, usize> {
        let mut load = HashMap::new();
        for route in self.routes.values() {
            *load.entry(route.server.addr()).or_insert(0) += 1;
        }
        load
    }

    /// Picks the server for a new collection.
    ///
    /// Least-loaded among the live servers (all servers if none is live),
    /// ties broken by ascending address.
    #[must_use]
    pub fn place(&self, servers: &[Arc<ServerHandle>]) -> Option<Arc<ServerHandle>> {
        let load = self.load();
        let live: Vec<&Arc<ServerHandle>> = servers.iter().filter(|s| s.is_alive()).collect();
        let candidates = if live.is_empty() {
            servers.iter().collect()
        } else {
            live
        };

        candidates
            .into_iter()
            .min_by(|a, b| {
                let load_a = load.get(a.addr()).copied().unwrap_or(0);
                let load_b = load.get(b.addr()).copied().unwrap_or(0);
                load_a.cmp(&load_b).then_with(|| a.addr().cmp(b.addr()))
            })
            .cloned()
    }

    /// All routes, sorted by collection name.
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, &Route)> {
        let mut entries: Vec<(&str, &Route)> = self
            .routes
            .iter()
            .map(|(name, route)| (name.as_str(), route))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    #[must_use]
    pub fn collisions(&self) -> &[NameCollision] {
        &self.collisions
    }

    /// Number of completed discovery refreshes.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
