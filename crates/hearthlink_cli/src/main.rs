//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `hearthlink_core` linkage and print the registered model table.
//! - With `--open-store`, open the configured SQLite store and list
//!   per-collection document counts.

use hearthlink_core::model::household::household_registry;
use hearthlink_core::CoreConfig;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("hearthlink_core ping={}", hearthlink_core::ping());
    println!("hearthlink_core version={}", hearthlink_core::core_version());

    let registry = match household_registry() {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("registry error: {err}");
            return ExitCode::FAILURE;
        }
    };
    for model in registry.models() {
        let relations: Vec<String> = model
            .relations
            .iter()
            .map(|relation| format!("{}:{}", relation.accessor, relation.kind.label()))
            .collect();
        println!(
            "model name={} collection={} secure={} relations=[{}]",
            model.name,
            model.collection,
            model.secure,
            relations.join(",")
        );
    }

    if std::env::args().any(|arg| arg == "--open-store") {
        let config = CoreConfig::from_env();
        if let Err(err) = config.init_logging() {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
        let store = match config.open_store() {
            Ok(store) => store,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        };
        println!("store path={}", config.db_path.display());
        match store.collection_counts() {
            Ok(counts) => {
                for (collection, count) in counts {
                    println!("collection name={collection} documents={count}");
                }
            }
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
