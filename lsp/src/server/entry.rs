use std::sync::Arc;

use tower_lsp::{LspService, Server};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::analysis::{AnalysisSettings, EvaluationSlot, QueryDispatcher};
use crate::draft::DraftStore;

use super::{cli::run_cli, state::LazenLanguageServer};

pub async fn run() {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run_cli(&args).await {
        Ok(Some(output)) => {
            println!("{}", output);
            return;
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("lazen-lsp eval error: {e:#}");
            std::process::exit(2);
        }
    }

    let drafts = Arc::new(DraftStore::new());
    let slot = match EvaluationSlot::new(drafts.clone(), AnalysisSettings::default()) {
        Ok(slot) => Arc::new(slot),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    let queries = Arc::new(QueryDispatcher::new(slot, drafts.clone()));

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(move |client| LazenLanguageServer::new(client, drafts, queries));
    Server::new(stdin, stdout, socket).serve(service).await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LAZEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}
