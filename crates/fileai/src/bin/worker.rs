//! `fileai-worker [config.json]`
//!
//! Runs the analysis queue against the configured database until Ctrl-C,
//! then lets in-flight jobs finish and exits.

use std::process::ExitCode;
use std::sync::Arc;

use fileai::{load_config, AnalysisService, Config, KeywordAnalyzer, MimeRouter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match std::env::args().nth(1) {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config '{}': {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    if let Err(e) = fileai::logging::init(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        log::error!("Failed to install Ctrl-C handler: {}", e);
        return ExitCode::FAILURE;
    }

    let analyzer = Arc::new(MimeRouter::new(Arc::new(KeywordAnalyzer::new())));
    let service = match AnalysisService::from_config(&config, analyzer) {
        Ok(service) => service,
        Err(e) => {
            log::error!("Failed to start analysis service: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match service.stats() {
        Ok(stats) => log::info!(
            "Queue: {} waiting, {} active, {} completed, {} failed",
            stats.waiting,
            stats.active,
            stats.completed,
            stats.failed
        ),
        Err(e) => log::warn!("Could not read queue stats: {}", e),
    }

    stop_rx.recv().await;
    log::info!("Received Ctrl-C, draining in-flight jobs...");
    service.shutdown().await;

    ExitCode::SUCCESS
}
