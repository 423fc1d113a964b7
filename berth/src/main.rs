//! Berth - Entry Point
//!
//! Self-hosted deployment control plane for Node and static web apps.
//! Builds uploaded archives, runs them under PM2 and routes them through Caddy.

use std::collections::HashMap;
use std::env;

use berth::app::options::AppOptions;
use berth::app::run::run;
use berth::errors::DeployError;
use berth::filesys::file::File;
use berth::logs::{init_logging, LogOptions};
use berth::storage::layout::StorageLayout;
use berth::storage::settings::Settings;
use berth::utils::{run_diagnostic, version_info};

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };

    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            std::process::exit(1);
        }
    };

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        run_diagnostic(&settings, &layout).await;
        return;
    }

    // Initialize logging
    if let Err(e) = layout.logs_dir().create().await {
        eprintln!("Failed to create log directory: {e}");
    }
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        json_format: settings.log_json,
        ..Default::default()
    };
    // flushes the file writer when main returns
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the control plane
    let options = AppOptions::from_settings(settings, layout);
    info!(
        "Running Berth with data dir {} and API on {}:{}",
        options.layout.base_dir.display(),
        options.server.host,
        options.server.port
    );
    if let Err(e) = run(version.version, options, await_shutdown_signal()).await {
        error!("Failed to run the control plane: {e}");
        std::process::exit(1);
    }
}

/// A missing file yields defaults; an unreadable one is an error
async fn load_settings(file: &File) -> Result<Settings, DeployError> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>().await
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
