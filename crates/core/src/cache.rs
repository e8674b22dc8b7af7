use crate::index::SimilarityIndex;
use crate::models::{Document, ExtractionSummary, PipelineWarning};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A built index together with what extraction reported while building it.
#[derive(Debug, Clone)]
pub struct CachedIndex {
    pub index: Arc<SimilarityIndex>,
    pub extraction: ExtractionSummary,
    pub warnings: Vec<PipelineWarning>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedIndex>,
    order: VecDeque<String>,
}

/// Built indexes keyed by the hash of `(document bytes, chunk size)`.
///
/// Owned by the caller and shared between runs; the pipeline never creates one
/// on its own.
#[derive(Debug)]
pub struct IndexCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl IndexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, document: &Document, chunk_size: usize) -> Option<CachedIndex> {
        let key = document.fingerprint(chunk_size);
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.entries.get(&key).cloned()
    }

    pub fn insert(&self, document: &Document, chunk_size: usize, entry: CachedIndex) {
        let key = document.fingerprint(chunk_size);
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.entries.insert(key.clone(), entry).is_none() {
            state.order.push_back(key);
        }

        while state.entries.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            debug!(key = %oldest, "evicted cached index");
        }
    }

    pub fn invalidate(&self, document: &Document, chunk_size: usize) -> bool {
        let key = document.fingerprint(chunk_size);
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.order.retain(|cached| cached != &key);
        state.entries.remove(&key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.entries.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
