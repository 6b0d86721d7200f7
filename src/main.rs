//! A standalone DHT peer with a small interactive shell.
//!
//! The node is configured through environment variables and, unless it is
//! the first node of a network, joins through a bootstrap contact before
//! accepting shell commands.

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
use std::str::FromStr;
use std::thread;

use log::{error, LevelFilter};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use kademlia_node::{Config, Contact, KademliaError, Key, Node};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn config_from_env() -> Config {
    let defaults = Config::default();
    Config {
        k: env_or("K", defaults.k),
        alpha: env_or("ALPHA", defaults.alpha),
        request_timeout: env_or("REQUEST_TIMEOUT_MS", defaults.request_timeout),
        bucket_refresh_interval: env_or(
            "BUCKET_REFRESH_INTERVAL_SECS",
            defaults.bucket_refresh_interval,
        ),
    }
}

fn bootstrap_from_env() -> Result<Contact, KademliaError> {
    let id = Key::from_hex(&env_or("BOOTSTRAP_ID", String::new()))?;
    let ip = env_or("BOOTSTRAP_IP", "127.0.0.1".to_string());
    let port = env_or("BOOTSTRAP_PORT", 8080);
    Ok(Contact::new(id, &ip, port))
}

fn run() -> Result<(), KademliaError> {
    let ip = env_or("BIND_IP", "0.0.0.0".to_string());
    let port = env_or("BIND_PORT", 8080u16);
    let node = Node::new(&ip, port, config_from_env())?;
    println!("node {} listening on {}", node.id(), node.contact().address());

    let is_bootstrap: bool = env_or("IS_BOOTSTRAP_NODE", false);
    if !is_bootstrap {
        let bootstrap = bootstrap_from_env()?;
        node.join(&bootstrap)?;
        println!("joined the network via {}", bootstrap.address());
    }

    shell(&node);
    // the shell is done but the peer keeps serving the network
    println!("shell closed; node keeps serving until the process is killed");
    loop {
        thread::park();
    }
}

fn shell(node: &Node) {
    let stdin = io::stdin();
    print!("> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let mut words = line.split_whitespace();
        match words.next() {
            Some("put") => {
                let value = words.collect::<Vec<_>>().join(" ");
                if value.is_empty() {
                    println!("usage: put <value>");
                } else {
                    match node.store(value.as_bytes()) {
                        Ok(key) => println!("stored under {}", key),
                        Err(err) => println!("store failed: {}", err),
                    }
                }
            }
            Some("get") => match words.next().map(Key::from_hex) {
                Some(Ok(key)) => match node.lookup_data(&key) {
                    Ok((data, source)) => println!(
                        "{} (served by {})",
                        String::from_utf8_lossy(&data),
                        source.address()
                    ),
                    Err(err) => println!("lookup failed: {}", err),
                },
                Some(Err(err)) => println!("bad key: {}", err),
                None => println!("usage: get <hex key>"),
            },
            Some("ping") => match (words.next(), words.next().map(str::parse)) {
                (Some(ip), Some(Ok(port))) => {
                    // the peer's id is unknown for a raw probe; any id works
                    // because the pong is correlated by request id
                    let contact = Contact::new(Key::rand(), ip, port);
                    match node.ping(&contact) {
                        Ok(()) => println!("{} is alive", contact.address()),
                        Err(err) => println!("ping failed: {}", err),
                    }
                }
                _ => println!("usage: ping <host> <port>"),
            },
            Some("exit") => break,
            Some(other) => println!("unknown command: {}", other),
            None => {}
        }
        print!("> ");
        let _ = io::stdout().flush();
    }
}

fn main() {
    let _ = TermLogger::init(
        env_or("LOG_LEVEL", LevelFilter::Info),
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    if let Err(err) = run() {
        error!("fatal: {}", err);
        process::exit(1);
    }
}
