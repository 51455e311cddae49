//! # CLI - RiptideKV Node Shell
//!
//! A REPL-style administrative console for a running node. Reads commands
//! from stdin, executes them against a local [`node::Node`], and prints
//! results to stdout. Not the outer query language: it drives row CRUD and
//! node lifecycle operations directly, one command per line, for scripted
//! testing and manual operation alike.
//!
//! ## Commands
//!
//! ```text
//! CREATEDB db                    Create a database
//! CREATETABLE db table           Create a table
//! INSERT db table json           Insert a row, prints its id
//! GET db table id                Look up a row by id
//! UPDATE db table id json        Replace a row's document
//! DELETE db table id             Delete a row
//! PERSIST                        Force a scheduler persistence tick
//! STATUS                         Print this node's status
//! EXIT / QUIT                    Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! RIPTIDE_DATA_DIR   Data root directory      (default: "data")
//! RIPTIDE_NODE_ID    Stable node identifier   (default: random uuid)
//! RIPTIDE_BIND_IP    Inter-node bind address  (default: "127.0.0.1")
//! RIPTIDE_PORT       Inter-node HTTP port     (default: 7878)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! RiptideKV node started (id=..., online=true)
//! > CREATEDB app
//! OK
//! > CREATETABLE app users
//! OK
//! > INSERT app users {"name":"Alice"}
//! 5a1f2e3c-...
//! > GET app users 5a1f2e3c-...
//! {"name":"Alice"}
//! > EXIT
//! bye
//! ```

use anyhow::{Context, Result};
use node::Node;
use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    let data_dir = env_or("RIPTIDE_DATA_DIR", "data");
    let node_id = env_or("RIPTIDE_NODE_ID", &Uuid::new_v4().to_string());
    let bind_ip = Ipv4Addr::from_str(&env_or("RIPTIDE_BIND_IP", "127.0.0.1"))
        .context("invalid RIPTIDE_BIND_IP")?;
    let port: u16 = env_or("RIPTIDE_PORT", "7878")
        .parse()
        .context("invalid RIPTIDE_PORT")?;

    let mut config = config::NodeConfig::new(&data_dir);
    config.node_id = node_id;
    config.inter_node_port = port;

    let node = Node::open(config, bind_ip)?;
    let runtime = node::NodeRuntime::start(Arc::clone(&node))?;

    let status = node.status();
    println!(
        "RiptideKV node started (id={}, online={}, data_dir={})",
        status.this.id, status.online, data_dir
    );
    println!("Commands: CREATEDB db | CREATETABLE db table | INSERT db table json");
    println!("          GET db table id | UPDATE db table id json | DELETE db table id");
    println!("          PERSIST | STATUS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.splitn(2, char::is_whitespace);
        let Some(cmd) = parts.next().map(str::trim).filter(|s| !s.is_empty()) else {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        };
        let rest = parts.next().unwrap_or("").trim();

        match cmd.to_uppercase().as_str() {
            "CREATEDB" => {
                if rest.is_empty() {
                    println!("ERR usage: CREATEDB db");
                } else {
                    match node.create_database(rest) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR createdb failed: {e}"),
                    }
                }
            }
            "CREATETABLE" => match split_two(rest) {
                Some((db, table)) => match node.create_table(db, table) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR createtable failed: {e}"),
                },
                None => println!("ERR usage: CREATETABLE db table"),
            },
            "INSERT" => match split_three(rest) {
                Some((db, table, payload)) => match serde_json::from_str(payload) {
                    Ok(json) => match node.insert_row(db, table, json) {
                        Ok(id) => println!("{id}"),
                        Err(e) => println!("ERR insert failed: {e}"),
                    },
                    Err(e) => println!("ERR invalid json: {e}"),
                },
                None => println!("ERR usage: INSERT db table json"),
            },
            "GET" => match split_three(rest) {
                Some((db, table, id)) => match Uuid::parse_str(id) {
                    Ok(id) => match node.get_row(db, table, id) {
                        Ok(Some(value)) => println!("{value}"),
                        Ok(None) => println!("(nil)"),
                        Err(e) => println!("ERR get failed: {e}"),
                    },
                    Err(e) => println!("ERR invalid id: {e}"),
                },
                None => println!("ERR usage: GET db table id"),
            },
            "UPDATE" => match split_four(rest) {
                Some((db, table, id, payload)) => match Uuid::parse_str(id) {
                    Ok(id) => match serde_json::from_str(payload) {
                        Ok(json) => match node.update_row(db, table, id, json) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR update failed: {e}"),
                        },
                        Err(e) => println!("ERR invalid json: {e}"),
                    },
                    Err(e) => println!("ERR invalid id: {e}"),
                },
                None => println!("ERR usage: UPDATE db table id json"),
            },
            "DELETE" => match split_three(rest) {
                Some((db, table, id)) => match Uuid::parse_str(id) {
                    Ok(id) => match node.delete_row(db, table, id) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR delete failed: {e}"),
                    },
                    Err(e) => println!("ERR invalid id: {e}"),
                },
                None => println!("ERR usage: DELETE db table id"),
            },
            "PERSIST" => {
                for table in node.open_tables() {
                    if let Err(e) = table.persist() {
                        println!("ERR persist failed for {}/{}: {e}", table.database(), table.name());
                    }
                }
                println!("OK");
            }
            "STATUS" => {
                let status = node.status();
                println!(
                    "id={} online={} total_nodes={} available_nodes={}",
                    status.this.id, status.online, status.total_nodes, status.available_nodes
                );
            }
            "EXIT" | "QUIT" => {
                println!("bye");
                break;
            }
            other => {
                println!("unknown command: {other}");
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    drop(runtime);
    Ok(())
}

fn split_two(rest: &str) -> Option<(&str, &str)> {
    let mut it = rest.splitn(2, char::is_whitespace);
    let a = it.next()?.trim();
    let b = it.next()?.trim();
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some((a, b))
}

fn split_three(rest: &str) -> Option<(&str, &str, &str)> {
    let mut it = rest.splitn(3, char::is_whitespace);
    let a = it.next()?.trim();
    let b = it.next()?.trim();
    let c = it.next()?.trim();
    if a.is_empty() || b.is_empty() || c.is_empty() {
        return None;
    }
    Some((a, b, c))
}

fn split_four(rest: &str) -> Option<(&str, &str, &str, &str)> {
    let mut it = rest.splitn(4, char::is_whitespace);
    let a = it.next()?.trim();
    let b = it.next()?.trim();
    let c = it.next()?.trim();
    let d = it.next()?.trim();
    if a.is_empty() || b.is_empty() || c.is_empty() || d.is_empty() {
        return None;
    }
    Some((a, b, c, d))
}
