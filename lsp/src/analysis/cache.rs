use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::result::EvaluationResult;

/// Point-in-time view of the cache. Readers keep it as long as they like.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Most recent run that finished evaluating.
    pub last_valid: Option<Arc<EvaluationResult>>,
    /// Most recent run of any outcome.
    pub cached: Option<Arc<EvaluationResult>>,
    /// Results with a sequence number at or below this were submitted
    /// before the last invalidation and are refused.
    pub floor: u64,
}

/// Which fields a publish replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Published {
    pub cached: bool,
    pub last_valid: bool,
}

/// Holds the latest results as one immutable snapshot that is swapped whole.
/// The lock only guards the swap; reads clone the `Arc` and release it.
#[derive(Debug, Default)]
pub struct ResultCache {
    state: Mutex<Arc<CacheSnapshot>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cached(&self) -> Option<Arc<EvaluationResult>> {
        self.snapshot().cached.clone()
    }

    pub fn last_valid(&self) -> Option<Arc<EvaluationResult>> {
        self.snapshot().last_valid.clone()
    }

    /// Store `result` in every field it is newer than. A result never
    /// replaces one from a later submission.
    pub fn publish(&self, result: Arc<EvaluationResult>) -> Published {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if result.seq <= state.floor {
            debug!(seq = result.seq, floor = state.floor, "dropping result submitted before invalidation");
            return Published::default();
        }
        let newer = |slot: &Option<Arc<EvaluationResult>>| slot.as_ref().is_none_or(|current| current.seq < result.seq);

        let published = Published {
            cached: newer(&state.cached),
            last_valid: result.is_valid() && newer(&state.last_valid),
        };
        if published.cached || published.last_valid {
            let mut next = CacheSnapshot::clone(&state);
            if published.cached {
                next.cached = Some(result.clone());
            }
            if published.last_valid {
                next.last_valid = Some(result.clone());
            }
            *state = Arc::new(next);
        }
        debug!(
            seq = result.seq,
            version = result.version,
            cached = published.cached,
            last_valid = published.last_valid,
            "published evaluation result"
        );
        published
    }

    /// Drop both results and refuse anything submitted up to `floor`.
    pub fn invalidate(&self, floor: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = Arc::new(CacheSnapshot {
            last_valid: None,
            cached: None,
            floor: floor.max(state.floor),
        });
    }
}
