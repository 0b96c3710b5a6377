//! Spillway CLI
//!
//! Inspect and edit a Spillway store on disk. Payloads are strings.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use spillway::{Config, StorageEngine};
use tracing_subscriber::{fmt, EnvFilter};

/// Spillway CLI
#[derive(Parser, Debug)]
#[command(name = "spillway-cli")]
#[command(about = "Inspect and edit a sharded Spillway store")]
#[command(version)]
struct Args {
    /// Root directory of the store
    #[arg(short, long, default_value = "./spillway_data")]
    root: String,

    /// Number of database shards
    #[arg(long, default_value = "2")]
    dbs: usize,

    /// Tables per shard
    #[arg(long, default_value = "9")]
    tables: usize,

    /// Warm recovery window in minutes
    #[arg(long, default_value = "30")]
    recover_minutes: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value
    Get {
        group: String,
        key: String,
    },

    /// Store a value
    Put {
        group: String,
        key: String,
        value: String,
    },

    /// Delete a key, or a whole group when no key is given
    Del {
        group: String,
        key: Option<String>,
    },

    /// List the keys of a group
    Keys {
        group: String,
    },

    /// List all groups
    Groups,

    /// Count the rows of a group
    Count {
        group: String,
    },

    /// Flush everything
    Flush {
        /// Rebuild shards instead of truncating tables
        #[arg(long)]
        rebuild: bool,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,spillway=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .root_dir(&args.root)
        .number_of_dbs(args.dbs)
        .tables_per_db(args.tables)
        .recover_on_restart_ms(args.recover_minutes * 60 * 1000)
        .rebuild_on_remove_all(matches!(args.command, Commands::Flush { rebuild: true }))
        .build();

    let engine = match StorageEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = engine.init() {
        tracing::error!("Failed to initialize store: {}", e);
        return ExitCode::FAILURE;
    }

    let code = run(&engine, args.command);
    engine.shutdown();
    code
}

fn run(engine: &StorageEngine, command: Commands) -> ExitCode {
    match command {
        Commands::Get { group, key } => match engine.get::<String>(&group, &key) {
            Some(value) => println!("{}", value),
            None => {
                println!("(nil)");
                return ExitCode::from(1);
            }
        },
        Commands::Put { group, key, value } => {
            engine.put(&group, &key, &value);
            println!("OK");
        }
        Commands::Del { group, key: Some(key) } => {
            engine.remove(&group, &key);
            println!("OK");
        }
        Commands::Del { group, key: None } => {
            engine.remove_group(&group);
            println!("OK");
        }
        Commands::Keys { group } => print_sorted(engine.keys(&group)),
        Commands::Groups => print_sorted(engine.groups()),
        Commands::Count { group } => println!("{}", engine.group_count(&group)),
        Commands::Flush { .. } => {
            engine.remove_all();
            println!("OK");
        }
    }
    ExitCode::SUCCESS
}

fn print_sorted(items: impl IntoIterator<Item = String>) {
    let mut items: Vec<String> = items.into_iter().collect();
    items.sort();
    for item in items {
        println!("{}", item);
    }
}
