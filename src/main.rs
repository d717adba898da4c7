//! FlashBloom - command-line client for bloomd filter servers
//!
//! Runs one operation against a set of servers and prints the result.

use anyhow::{bail, Context};
use flashbloom::{Client, ClientConfig, CollectionParams, ServerAddr};
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// What to do once connected
enum Action {
    List,
    Create {
        name: String,
        capacity: Option<u64>,
        prob: Option<f64>,
    },
    Drop {
        name: String,
    },
    Add {
        name: String,
        keys: Vec<String>,
    },
    Check {
        name: String,
        keys: Vec<String>,
    },
    Info {
        name: String,
    },
    Flush,
}

/// Command-line configuration
struct Config {
    /// Servers in discovery order
    servers: Vec<String>,
    /// I/O timeout in seconds
    timeout: Option<u64>,
    /// Log at debug level
    verbose: bool,
    action: Action,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut servers = Vec::new();
        let mut timeout = None;
        let mut verbose = false;
        let mut rest = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--server" | "-s" => {
                    if i + 1 < args.len() {
                        servers.push(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --server requires a value");
                        std::process::exit(1);
                    }
                }
                "--timeout" | "-t" => {
                    if i + 1 < args.len() {
                        timeout = Some(args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid timeout");
                            std::process::exit(1);
                        }));
                        i += 2;
                    } else {
                        eprintln!("Error: --timeout requires a value");
                        std::process::exit(1);
                    }
                }
                "--verbose" => {
                    verbose = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashBloom version {}", flashbloom::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    rest.push(args[i].clone());
                    i += 1;
                }
            }
        }

        if servers.is_empty() {
            servers.push(format!("localhost:{}", flashbloom::DEFAULT_PORT));
        }

        let action = parse_action(&rest).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        });

        Self {
            servers,
            timeout,
            verbose,
            action,
        }
    }

    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.servers)?;
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

fn parse_action(args: &[String]) -> anyhow::Result<Action> {
    let Some((verb, operands)) = args.split_first() else {
        bail!("missing command");
    };
    let name = || -> anyhow::Result<String> {
        operands
            .first()
            .cloned()
            .with_context(|| format!("'{}' requires a collection name", verb))
    };
    let keys = || -> anyhow::Result<Vec<String>> {
        let keys = operands.get(1..).unwrap_or_default().to_vec();
        if keys.is_empty() {
            bail!("'{}' requires at least one key", verb);
        }
        Ok(keys)
    };

    let action = match verb.as_str() {
        "list" => Action::List,
        "create" => Action::Create {
            name: name()?,
            capacity: operands
                .get(1)
                .map(|s| s.parse::<u64>())
                .transpose()
                .context("invalid capacity")?,
            prob: operands
                .get(2)
                .map(|s| s.parse::<f64>())
                .transpose()
                .context("invalid probability")?,
        },
        "drop" => Action::Drop { name: name()? },
        "add" => Action::Add {
            name: name()?,
            keys: keys()?,
        },
        "check" => Action::Check {
            name: name()?,
            keys: keys()?,
        },
        "info" => Action::Info { name: name()? },
        "flush" => Action::Flush,
        other => bail!("unknown command '{}'", other),
    };
    Ok(action)
}

fn print_help() {
    println!(
        r#"
FlashBloom - Multi-Server Client for bloomd Filter Servers

USAGE:
    flashbloom [OPTIONS] <COMMAND>

OPTIONS:
    -s, --server <ADDR>     Server address host[:port], repeatable (default: localhost:{port})
    -t, --timeout <SECS>    I/O timeout in seconds (default: none)
        --verbose           Log discovery and connection details
    -v, --version           Print version information
    -h, --help              Print this help message

COMMANDS:
    list                            List every collection and its server
    create <NAME> [CAP [PROB]]      Create a collection on the least-loaded server
    drop <NAME>                     Drop a collection
    add <NAME> <KEY>...             Add keys to a collection
    check <NAME> <KEY>...           Check keys for membership
    info <NAME>                     Show a collection's server-side info
    flush                           Flush every collection on every server

EXAMPLES:
    flashbloom -s bloom-a -s bloom-b list
    flashbloom create users 1000000 0.001
    flashbloom add users alice bob
    flashbloom check users alice carol
"#,
        port = flashbloom::DEFAULT_PORT
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; RUST_LOG overrides --verbose
    let level = if config.verbose { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = Client::new(config.client_config()?)?;
    debug!(
        servers = ?client.servers().map(ServerAddr::to_string).collect::<Vec<_>>(),
        "Client ready"
    );

    run(&client, config.action).await?;

    client.close().await;
    Ok(())
}

async fn run(client: &Client, action: Action) -> anyhow::Result<()> {
    match action {
        Action::List => {
            for entry in client.list_collections(true).await? {
                let server = entry.server.map(|s| s.to_string()).unwrap_or_default();
                println!("{}\t{}\t{}", entry.name, server, entry.info);
            }
            for collision in client.collisions().await {
                eprintln!("warning: {}", collision);
            }
        }
        Action::Create {
            name,
            capacity,
            prob,
        } => {
            let mut params = CollectionParams::new();
            if let Some(capacity) = capacity {
                params = params.capacity(capacity);
            }
            if let Some(prob) = prob {
                params = params.false_positive_rate(prob);
            }
            let collection = client.create_collection(&name, params, None).await?;
            println!("Created {} on {}", collection.name(), collection.server());
        }
        Action::Drop { name } => {
            client.drop_collection(&name).await?;
            println!("Dropped {}", name);
        }
        Action::Add { name, keys } => {
            let collection = client.get_collection(&name).await?;
            let added = collection.bulk_add(&keys).await?;
            print_results(&keys, &added);
        }
        Action::Check { name, keys } => {
            let collection = client.get_collection(&name).await?;
            let present = collection.bulk_check(&keys).await?;
            print_results(&keys, &present);
        }
        Action::Info { name } => {
            let collection = client.get_collection(&name).await?;
            println!("server {}", collection.server());
            for (key, value) in collection.info().await? {
                println!("{} {}", key, value);
            }
        }
        Action::Flush => {
            client.flush().await?;
            println!("Flushed {} servers", client.servers().count());
        }
    }
    Ok(())
}

fn print_results(keys: &[String], results: &[bool]) {
    for (key, result) in keys.iter().zip(results) {
        println!("{}\t{}", key, if *result { "Yes" } else { "No" });
    }
}
