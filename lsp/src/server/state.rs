use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::{sleep, Duration};
use tower_lsp::lsp_types::Url;
use tower_lsp::Client;
use tracing::{debug, warn};

use crate::analysis::{QueryDispatcher, QueryError};
use crate::draft::DraftStore;

use super::config::ServerConfig;

/// Primary LSP server state shared across handlers.
pub(crate) struct LazenLanguageServer {
    pub(crate) client: Client,
    pub(crate) drafts: Arc<DraftStore>,
    pub(crate) queries: Arc<QueryDispatcher>,
    pub(crate) config: Mutex<ServerConfig>,
    pub(crate) workspace_root: Mutex<Option<PathBuf>>,
}

impl LazenLanguageServer {
    pub(crate) fn new(client: Client, drafts: Arc<DraftStore>, queries: Arc<QueryDispatcher>) -> Self {
        Self {
            client,
            drafts,
            queries,
            config: Mutex::new(ServerConfig::default()),
            workspace_root: Mutex::new(None),
        }
    }

    pub(crate) fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_root.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn debounce_ms(&self) -> u64 {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).debounce_ms
    }

    /// Publish diagnostics for `uri` after `delay_ms`, unless the content
    /// changed again in the meantime. Version bumps that leave the content
    /// alone do not cancel the pending run.
    pub(crate) fn schedule_diagnostics(&self, uri: Url, delay_ms: u64) {
        let Some(scheduled_seq) = self.drafts.debounce_seq(&uri) else {
            return;
        };
        let drafts = self.drafts.clone();
        let queries = self.queries.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            if !drafts.is_current(&uri, scheduled_seq) {
                return;
            }

            let report = match queries.diagnose(&uri).await {
                Ok(report) => report,
                Err(QueryError::DocumentNotOpen(_)) => return,
                Err(err) => {
                    warn!(uri = %uri, "diagnostics failed: {}", err);
                    return;
                }
            };
            // a newer edit schedules its own run
            if !drafts.is_current(&uri, scheduled_seq) {
                debug!(uri = %uri, version = report.version, "dropping diagnostics for outdated content");
                return;
            }
            let diagnostics = report.diagnostics.iter().map(|d| d.to_lsp()).collect();
            client
                .publish_diagnostics(uri, diagnostics, Some(report.version))
                .await;
        });
    }
}
