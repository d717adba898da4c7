//! In-process fake bloomd server for tests.
//!
//! Membership is exact (a `HashSet` per filter), which keeps assertions
//! deterministic.

use crate::config::ServerAddr;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Default)]
struct FakeState {
    filters: BTreeMap<String, HashSet<String>>,
    list_calls: usize,
    commands: usize,
    /// Connections close after answering this many commands
    close_after: Option<usize>,
}

impl FakeState {
    fn handle(&mut self, line: &str) -> String {
        self.commands += 1;
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let name = parts.next().map(str::to_string);
        let args: Vec<&str> = parts.collect();

        match (verb, name) {
            ("create", Some(name)) => {
                if self.filters.contains_key(&name) {
                    "Exists\n".to_string()
                } else {
                    self.filters.insert(name, HashSet::new());
                    "Done\n".to_string()
                }
            }
            ("list", _) => {
                self.list_calls += 1;
                let mut out = String::from("START\n");
                for (name, keys) in &self.filters {
                    out.push_str(&format!("{} 0.000100 300046 100000 {}\n", name, keys.len()));
                }
                out.push_str("END\n");
                out
            }
            ("flush", None) => "Done\n".to_string(),
            (_, Some(name)) if !self.filters.contains_key(&name) => {
                "Filter does not exist\n".to_string()
            }
            ("drop", Some(name)) => {
                self.filters.remove(&name);
                "Done\n".to_string()
            }
            ("flush", Some(_)) => "Done\n".to_string(),
            ("info", Some(name)) => {
                let size = self.filters.get(&name).map_or(0, HashSet::len);
                format!("START\ncapacity 100000\nprobability 0.000100\nsize {}\nEND\n", size)
            }
            ("s" | "set", Some(name)) | ("b" | "bulk", Some(name)) => {
                let filter = self.filters.entry(name).or_default();
                let answers: Vec<&str> = args
                    .iter()
                    .map(|key| if filter.insert(key.to_string()) { "Yes" } else { "No" })
                    .collect();
                format!("{}\n", answers.join(" "))
            }
            ("c" | "check", Some(name)) | ("m" | "multi", Some(name)) => {
                let filter = self.filters.entry(name).or_default();
                let answers: Vec<&str> = args
                    .iter()
                    .map(|key| if filter.contains(*key) { "Yes" } else { "No" })
                    .collect();
                format!("{}\n", answers.join(" "))
            }
            _ => "Client Error: Command not supported\n".to_string(),
        }
    }
}

/// A bloomd-speaking server on an ephemeral localhost port.
pub(crate) struct FakeServer {
    addr: ServerAddr,
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(FakeState::default()));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });

        Self {
            addr: ServerAddr::new("127.0.0.1", port),
            state,
        }
    }

    pub(crate) fn addr(&self) -> ServerAddr {
        self.addr.clone()
    }

    pub(crate) fn address(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn add_filter(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .filters
            .insert(name.to_string(), HashSet::new());
    }

    pub(crate) fn remove_filter(&self, name: &str) {
        self.state.lock().unwrap().filters.remove(name);
    }

    pub(crate) fn has_filter(&self, name: &str) -> bool {
        self.state.lock().unwrap().filters.contains_key(name)
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub(crate) fn commands(&self) -> usize {
        self.state.lock().unwrap().commands
    }

    /// Makes every connection hang up after answering `n` commands.
    pub(crate) fn close_after(&self, n: usize) {
        self.state.lock().unwrap().close_after = Some(n);
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut answered = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        let response = {
            let mut state = state.lock().unwrap();
            if state.close_after.is_some_and(|n| answered >= n) {
                return;
            }
            state.handle(&line)
        };
        if write.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        answered += 1;
    }
}
