use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Process-scoped source counters.
///
/// Sources only update it: one increment when started, one decrement when
/// stopped.
#[derive(Debug, Default)]
pub struct SourceStats {
    count_sources_external: AtomicI64,
}

static INSTANCE: Lazy<Arc<SourceStats>> = Lazy::new(|| Arc::new(SourceStats::new()));

impl SourceStats {
    pub fn new() -> Self {
        Self {
            count_sources_external: AtomicI64::new(0),
        }
    }

    /// Shared instance used by sources started without explicit stats.
    pub fn global() -> Arc<SourceStats> {
        INSTANCE.clone()
    }

    pub fn source_started(&self) {
        self.count_sources_external.fetch_add(1, Ordering::SeqCst);
    }

    pub fn source_stopped(&self) {
        self.count_sources_external.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_sources(&self) -> i64 {
        self.count_sources_external.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let stats = SourceStats::new();
        stats.source_started();
        stats.source_started();
        stats.source_stopped();
        assert_eq!(stats.active_sources(), 1);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&SourceStats::global(), &SourceStats::global()));
    }
}
