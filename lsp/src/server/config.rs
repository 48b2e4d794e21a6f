use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use tower_lsp::lsp_types::{ConfigurationItem, Url};
use tracing::{info, warn};

use crate::analysis::{AnalysisSettings, EntryPoint};

use super::state::LazenLanguageServer;

pub(crate) const CONFIG_SECTION: &str = "lazen";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServerConfig {
    pub(crate) analysis: AnalysisSettings,
    pub(crate) debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisSettings::default(),
            debounce_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LazenConfigSection {
    #[serde(default)]
    entry_point: EntryPointConfig,
    #[serde(default)]
    eval: EvalSection,
    #[serde(default)]
    diagnostics: DiagnosticsSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct EntryPointConfig {
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct EvalSection {
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    record_values: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DiagnosticsSection {
    #[serde(default)]
    debounce_ms: Option<u64>,
}

/// Overlay a client configuration section on `current`. Missing and
/// non-positive values keep their current setting; the entry point is taken
/// as a whole.
pub(crate) fn apply_section(
    value: serde_json::Value,
    current: &ServerConfig,
    workspace_root: Option<&Path>,
) -> anyhow::Result<ServerConfig> {
    let section: LazenConfigSection = if value.is_null() {
        LazenConfigSection::default()
    } else {
        serde_json::from_value(value).context("invalid 'lazen' configuration")?
    };

    let mut next = current.clone();
    next.analysis.entry = EntryPoint {
        args: section.entry_point.args.unwrap_or_default(),
        target: section
            .entry_point
            .target
            .filter(|t| !t.trim().is_empty())
            .map(|t| resolve_target(&t, workspace_root))
            .transpose()?,
    };
    if let Some(ms) = section.eval.timeout_ms.filter(|v| *v > 0) {
        next.analysis.timeout = Duration::from_millis(ms);
    }
    if let Some(depth) = section.eval.max_depth.filter(|v| *v > 0) {
        next.analysis.max_depth = depth;
    }
    if let Some(record) = section.eval.record_values {
        next.analysis.record_values = record;
    }
    if let Some(ms) = section.diagnostics.debounce_ms.filter(|v| *v > 0) {
        next.debounce_ms = ms;
    }
    Ok(next)
}

/// Accepts a URI or a path, relative paths resolving against the workspace.
fn resolve_target(target: &str, workspace_root: Option<&Path>) -> anyhow::Result<Url> {
    if target.contains("://") {
        return Url::parse(target).with_context(|| format!("invalid entry point '{}'", target));
    }
    let path = Path::new(target);
    let absolute = match workspace_root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    };
    Url::from_file_path(&absolute).map_err(|_| anyhow!("entry point '{}' is not an absolute path", target))
}

impl LazenLanguageServer {
    pub(crate) async fn load_config(&self) {
        let items = vec![ConfigurationItem {
            scope_uri: None,
            section: Some(CONFIG_SECTION.to_string()),
        }];

        let value = match self.client.configuration(items).await {
            Ok(values) => values.into_iter().next().unwrap_or_default(),
            Err(err) => {
                warn!("could not fetch configuration: {}", err);
                return;
            }
        };
        self.apply_config(value);
    }

    pub(crate) fn apply_config(&self, value: serde_json::Value) {
        let root = self.workspace_root();
        let mut guard = self.config.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match apply_section(value, &guard, root.as_deref()) {
            Ok(next) => {
                let entry_changed = next.analysis.entry != guard.analysis.entry;
                self.queries.slot().configure(next.analysis.clone());
                *guard = next;
                if entry_changed {
                    info!(entry = ?guard.analysis.entry, "entry point changed");
                    self.queries.invalidate();
                }
            }
            Err(err) => warn!("ignoring configuration: {:#}", err),
        }
    }
}
