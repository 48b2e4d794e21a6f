use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use tower_lsp::lsp_types::{Position, Url};

use crate::analysis::{AnalysisSettings, EntryPoint, EvaluationSlot, QueryDispatcher};
use crate::draft::DraftStore;

const USAGE: &str = "Usage: lazen-lsp --eval <file> [--json] [--hover LINE:COL] [--arg NAME EXPR] [--argstr NAME VALUE]\n  --eval <file>        : Evaluate the file once and print its diagnostics and value\n  --json               : Print the report as JSON\n  --hover LINE:COL     : Also print the hover at a 1-based position";

/// One-shot evaluation from the command line. Returns `None` when the
/// arguments do not ask for it and the language server should start instead.
pub async fn run_cli(args: &[String]) -> anyhow::Result<Option<String>> {
    let Some(i) = args.iter().position(|a| a == "--eval") else {
        return Ok(None);
    };
    let path = args
        .get(i + 1)
        .filter(|p| !p.starts_with("--"))
        .ok_or_else(|| anyhow!("{}", USAGE))?;
    let json = args.iter().any(|a| a == "--json");
    let hover = match args.iter().position(|a| a == "--hover") {
        Some(h) => Some(parse_line_col(args.get(h + 1).map(String::as_str).unwrap_or(""))?),
        None => None,
    };

    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read file '{}'", path))?;
    let absolute = std::fs::canonicalize(path).with_context(|| format!("Failed to resolve '{}'", path))?;
    let uri = Url::from_file_path(&absolute).map_err(|_| anyhow!("'{}' is not a file path", absolute.display()))?;

    let drafts = Arc::new(DraftStore::new());
    drafts.open(uri.clone(), &content, 0);
    let settings = AnalysisSettings {
        entry: EntryPoint {
            args: entry_args(args)?,
            target: None,
        },
        ..AnalysisSettings::default()
    };
    let slot = Arc::new(EvaluationSlot::new(drafts.clone(), settings)?);
    let queries = QueryDispatcher::new(slot.clone(), drafts);

    let report = queries.diagnose(&uri).await?;
    let result = slot.cache().cached();
    let hover = match hover {
        Some(position) => Some(queries.hover(&uri, position).await.map_err(|e| e.to_string())),
        None => None,
    };

    if json {
        let output = serde_json::json!({
            "uri": uri,
            "version": report.version,
            "status": result.as_ref().map(|r| r.status),
            "value": result.as_ref().and_then(|r| r.root.as_ref().ok()),
            "diagnostics": report.diagnostics,
            "hover": hover.as_ref().map(|h| match h {
                Ok(info) => serde_json::to_value(info).unwrap_or_default(),
                Err(message) => serde_json::json!({ "error": message }),
            }),
        });
        return Ok(Some(serde_json::to_string_pretty(&output)?));
    }

    let mut lines: Vec<String> = report
        .diagnostics
        .iter()
        .map(|d| {
            format!(
                "Line {}:{}: [{}] {}",
                d.range.start.line + 1,
                d.range.start.character + 1,
                d.code(),
                d.message
            )
        })
        .collect();
    if lines.is_empty() {
        lines.push("No errors found".to_string());
    }
    if let Some(Ok(value)) = result.as_ref().map(|r| &r.root) {
        lines.push(format!("value: {}", value));
    }
    match hover {
        Some(Ok(info)) => lines.push(info.to_markdown()),
        Some(Err(message)) => lines.push(format!("hover: {}", message)),
        None => {}
    }
    Ok(Some(lines.join("\n")))
}

fn parse_line_col(raw: &str) -> anyhow::Result<Position> {
    let (line, col) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("--hover expects LINE:COL, got '{}'", raw))?;
    let line: u32 = line.trim().parse().with_context(|| format!("invalid line in '{}'", raw))?;
    let col: u32 = col.trim().parse().with_context(|| format!("invalid column in '{}'", raw))?;
    if line == 0 || col == 0 {
        bail!("--hover positions are 1-based, got '{}'", raw);
    }
    Ok(Position::new(line - 1, col - 1))
}

/// `--arg`/`--argstr` triples, passed on to the entry point.
fn entry_args(args: &[String]) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--arg" || args[i] == "--argstr" {
            let triple = args
                .get(i..i + 3)
                .ok_or_else(|| anyhow!("'{}' expects a name and a value", args[i]))?;
            out.extend_from_slice(triple);
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(out)
}
