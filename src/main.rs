//! Interactive REPL over a `Store`: open or format an image file, then accept
//! `insert`/`search`/`delete`/`sync`/`print`/`exit` commands on stdin.
//!
//! Grounded in the original C `main.c`'s command-menu loop; the teacher's own
//! current `main.rs` is a Postgres wire-protocol server several generations
//! past this crate's scope, so the REPL shape here is new, built directly
//! against `small_db`'s style of keeping `main` thin and pushing logic into
//! the library (`src/lib.rs` + `src/server/*` in the teacher).

use std::env;
use std::io::{self, BufRead, Write};

use blocktree_kv::pool::PoolConfig;
use blocktree_kv::Store;

fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| "store.img".to_string());
    let mut store = match Store::open_or_format(&path, PoolConfig::from_system_ram()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open {}: {}", path, e);
            std::process::exit(1);
        }
    };

    println!("blocktree-kv: {} (root block {})", path, store.root_block());
    println!("commands: insert <key> <value> | search <key> | print | delete <key> | sync | exit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["insert", k, v] => match (k.parse::<u64>(), v.parse::<u64>()) {
                (Ok(k), Ok(v)) => match store.insert(k, v) {
                    Ok(()) => println!("ok"),
                    Err(e) => println!("error: {}", e),
                },
                _ => println!("usage: insert <key> <value>"),
            },
            ["search", k] => match k.parse::<u64>() {
                Ok(k) => match store.search(k) {
                    Ok(Some(v)) => println!("{}", v),
                    Ok(None) => println!("not found"),
                    Err(e) => println!("error: {}", e),
                },
                Err(_) => println!("usage: search <key>"),
            },
            ["print"] => match store.print_tree() {
                Ok(rendered) => print!("{}", rendered),
                Err(e) => println!("error: {}", e),
            },
            ["delete", k] => match k.parse::<u64>() {
                Ok(k) => match store.delete(k) {
                    Ok(true) => println!("ok"),
                    Ok(false) => println!("not found"),
                    Err(e) => println!("error: {}", e),
                },
                Err(_) => println!("usage: delete <key>"),
            },
            ["sync"] => match store.sync() {
                Ok(()) => println!("ok"),
                Err(e) => println!("error: {}", e),
            },
            ["exit"] | ["quit"] => break,
            [] => {}
            _ => println!("unrecognized command"),
        }
        let _ = io::stdout().flush();
    }

    if let Err(e) = store.close() {
        eprintln!("error closing store: {}", e);
    }
}
