//! Runs one sync pass over a base directory and resolves file types.
//!
//! Usage: `cargo run --bin app_index_probe -- <base-dir> [type-or-path...]`

use std::path::{Path, PathBuf};

use app_index::{type_identifier_for_path, AppIndex, AppIndexConfig};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(base) = args.next().map(PathBuf::from) else {
        eprintln!("usage: app_index_probe <base-dir> [type-or-path...]");
        std::process::exit(2);
    };

    let mut config = match AppIndexConfig::load_or_default(&base) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load config: {error}");
            std::process::exit(1);
        }
    };
    config.auto_sync = false;

    let index = match AppIndex::with_platform(config, app_index::default_platform()) {
        Ok(index) => index,
        Err(error) => {
            eprintln!("failed to open index: {error}");
            std::process::exit(1);
        }
    };

    match index.sync_now().await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(error) => eprintln!("failed to serialize report: {error}"),
        },
        Err(error) => eprintln!("sync failed: {error}"),
    }

    for query in args {
        let path = Path::new(&query);
        let type_id = if path.exists() {
            type_identifier_for_path(path, &index.config().folder_type)
        } else {
            Some(query.to_lowercase())
        };
        let Some(type_id) = type_id else {
            println!("{query}: no type identifier");
            continue;
        };
        match (index.resolve_app(&type_id), index.resolve_icon(&type_id)) {
            (Some(app), Some(icon)) => println!("{type_id}: {} {}", app.name, icon.display()),
            (Some(app), None) => println!("{type_id}: {} (no icon)", app.name),
            (None, _) => println!("{type_id}: unresolved"),
        }
    }

    index.wait_for_shutdown().await;
}
