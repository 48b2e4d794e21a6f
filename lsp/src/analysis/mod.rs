//! Evaluation-backed analysis: a single evaluation worker, the result cache it
//! publishes into, and the query layer that reads answers back out.

mod cache;
mod completion;
mod hover;
mod query;
mod result;
mod slot;

#[cfg(test)]
mod tests;

pub use cache::{CacheSnapshot, Published, ResultCache};
pub use completion::{CandidateKind, CompletionCandidate, candidates};
pub use hover::{HoverCapture, HoverInfo, ValueRecorder};
pub use query::{DocumentDiagnostics, QueryDispatcher, QueryError};
pub use result::{
    AnalysisDiagnostic, DiagnosticKind, EvaluationResult, RunStatus, ValueEntry, ValueIndex, parse_diagnostics,
};
pub use slot::{
    AnalysisSettings, EntryPoint, EvaluationJob, EvaluationSlot, JobOutcome, JobTicket, SlotClosed, SlotStats,
};
