//! Simple CLI for manually exercising the key-value store.
//!
//! Usage:
//!   kvstore_cli <db_path_prefix> set <key> <value>
//!   kvstore_cli <db_path_prefix> get <key>
//!   kvstore_cli <db_path_prefix> delete <key>
//!   kvstore_cli <db_path_prefix> stats
//!   kvstore_cli <db_path_prefix> bulk_insert <count>

use std::env;
use std::process::exit;
use toykv_storage::{Config, Db};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: kvstore_cli <db_path_prefix> <command> [args...]");
        eprintln!("Commands:");
        eprintln!("  set <key> <value>   - Insert or update a key-value pair");
        eprintln!("  get <key>           - Get the value for a key");
        eprintln!("  delete <key>        - Delete a key");
        eprintln!("  stats               - Show database statistics");
        eprintln!("  bulk_insert <count> - Insert count test records");
        exit(1);
    }

    let db_path = &args[1];
    let command = &args[2];

    let config = Config::new(db_path).create_if_not_exists(true).error_if_exists(false);
    let db = match Db::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: failed to open database: {e}");
            exit(1);
        }
    };

    match command.as_str() {
        "set" => {
            if args.len() < 5 {
                eprintln!("Usage: kvstore_cli <db_path_prefix> set <key> <value>");
                exit(1);
            }
            let key = &args[3];
            let value = &args[4];

            match db.set(key.as_bytes(), value.as_bytes()) {
                Ok(()) => println!("OK"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "get" => {
            if args.len() < 4 {
                eprintln!("Usage: kvstore_cli <db_path_prefix> get <key>");
                exit(1);
            }
            let key = &args[3];

            match db.get(key.as_bytes()) {
                Ok(value) => match String::from_utf8(value) {
                    Ok(s) => println!("{s}"),
                    Err(_) => println!("<binary data>"),
                },
                Err(toykv_storage::StorageError::NotFound) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "delete" => {
            if args.len() < 4 {
                eprintln!("Usage: kvstore_cli <db_path_prefix> delete <key>");
                exit(1);
            }
            let key = &args[3];

            match db.delete(key.as_bytes()) {
                Ok(()) => println!("DELETED"),
                Err(toykv_storage::StorageError::NotFound) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "stats" => {
            println!("page_count: {}", db.page_count());
        }

        "bulk_insert" => {
            if args.len() < 4 {
                eprintln!("Usage: kvstore_cli <db_path_prefix> bulk_insert <count>");
                exit(1);
            }
            let count: usize = match args[3].parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("ERROR: invalid count");
                    exit(1);
                }
            };

            let start = std::time::Instant::now();
            for i in 0..count {
                let key = format!("key_{i:08}");
                let value = format!("value_{i}");
                if let Err(e) = db.set(key.as_bytes(), value.as_bytes()) {
                    eprintln!("ERROR at {i}: {e}");
                    exit(1);
                }
            }
            let elapsed = start.elapsed();

            if let Err(e) = db.flush() {
                eprintln!("ERROR flushing: {e}");
                exit(1);
            }

            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {count}");
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {ops_per_sec:.0}");
        }

        _ => {
            eprintln!("Unknown command: {command}");
            exit(1);
        }
    }

    if let Err(e) = db.close() {
        eprintln!("Warning: failed to close cleanly: {e}");
    }
}
