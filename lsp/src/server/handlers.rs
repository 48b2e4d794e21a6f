use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::LanguageServer;
use tracing::{debug, info, warn};

use crate::analysis::{CandidateKind, QueryError};

use super::state::LazenLanguageServer;

#[tower_lsp::async_trait]
impl LanguageServer for LazenLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        info!("lazen language server initializing with root {:?}", params.root_uri);
        if let Some(root) = params.root_uri.as_ref().and_then(|u| u.to_file_path().ok()) {
            *self
                .workspace_root
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(root);
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::INCREMENTAL)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(false),
                    trigger_characters: Some(vec![".".to_string()]),
                    work_done_progress_options: Default::default(),
                    all_commit_characters: None,
                    completion_item: None,
                }),
                diagnostic_provider: Some(DiagnosticServerCapabilities::Options(DiagnosticOptions {
                    identifier: Some("lazen".to_string()),
                    inter_file_dependencies: true,
                    workspace_diagnostics: false,
                    work_done_progress_options: Default::default(),
                })),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "lazen language server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("lazen language server initialized");
        self.client
            .log_message(MessageType::INFO, "lazen language server started")
            .await;
        self.load_config().await;
    }

    async fn shutdown(&self) -> Result<()> {
        info!("lazen language server shutting down");
        Ok(())
    }

    async fn did_change_configuration(&self, _params: DidChangeConfigurationParams) {
        self.load_config().await;
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        self.drafts
            .open(uri.clone(), &params.text_document.text, params.text_document.version);
        self.schedule_diagnostics(uri, self.debounce_ms().min(150));
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        if !self.drafts.apply_changes(&uri, version, params.content_changes) {
            debug!(uri = %uri, version, "content unchanged; skipping analysis");
            return;
        }
        self.schedule_diagnostics(uri, self.debounce_ms());
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.drafts.close(&uri);
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        match self.queries.hover(uri, position).await {
            Ok(info) => Ok(Some(Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: info.to_markdown(),
                }),
                range: Some(info.range),
            })),
            Err(QueryError::SlotClosed) => {
                warn!("hover requested but the evaluation worker is gone");
                Ok(None)
            }
            Err(err) => {
                debug!(uri = %uri, "no hover: {}", err);
                Ok(None)
            }
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let candidates = match self.queries.complete(uri, position) {
            Ok(candidates) => candidates,
            Err(err) => {
                debug!(uri = %uri, "no completions: {}", err);
                return Ok(None);
            }
        };
        let items = candidates
            .into_iter()
            .map(|c| CompletionItem {
                label: c.label,
                kind: Some(match c.kind {
                    CandidateKind::Keyword => CompletionItemKind::KEYWORD,
                    CandidateKind::Builtin => CompletionItemKind::FUNCTION,
                    CandidateKind::Binding => CompletionItemKind::VARIABLE,
                    CandidateKind::Attribute => CompletionItemKind::FIELD,
                }),
                detail: c.detail,
                ..Default::default()
            })
            .collect();
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn diagnostic(&self, params: DocumentDiagnosticParams) -> Result<DocumentDiagnosticReportResult> {
        let uri = &params.text_document.uri;
        let items = match self.queries.diagnose(uri).await {
            Ok(report) => report.diagnostics.iter().map(|d| d.to_lsp()).collect(),
            Err(err) => {
                debug!(uri = %uri, "no diagnostics: {}", err);
                Vec::new()
            }
        };

        Ok(DocumentDiagnosticReportResult::Report(DocumentDiagnosticReport::Full(
            RelatedFullDocumentDiagnosticReport {
                related_documents: None,
                full_document_diagnostic_report: FullDocumentDiagnosticReport { result_id: None, items },
            },
        )))
    }
}
