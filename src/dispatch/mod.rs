/// Dispatch Module
///
/// - frame_context.rs: Per-frame work lists, owned by the host
/// - dispatcher.rs: Records reset/upload/accumulate commands and submits them
///

pub mod dispatcher;
pub mod frame_context;

pub use dispatcher::LatticeDispatcher;
pub use frame_context::FrameContext;

/// What one dispatch stage did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub targets_processed: u32,
    /// Queued targets that were gone or no longer valid
    pub targets_skipped: u32,
    /// Targets excluded this stage and marked faulted
    pub targets_faulted: u32,
    /// Missing or degenerate lattices
    pub lattices_skipped: u32,
    pub dispatches: u32,
}

impl DispatchReport {
    pub fn merge(&mut self, other: &DispatchReport) {
        self.targets_processed += other.targets_processed;
        self.targets_skipped += other.targets_skipped;
        self.targets_faulted += other.targets_faulted;
        self.lattices_skipped += other.lattices_skipped;
        self.dispatches += other.dispatches;
    }

    pub fn is_idle(&self) -> bool {
        *self == DispatchReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counters() {
        let mut total = DispatchReport {
            targets_processed: 2,
            dispatches: 5,
            ..Default::default()
        };
        total.merge(&DispatchReport {
            targets_processed: 1,
            lattices_skipped: 1,
            dispatches: 2,
            ..Default::default()
        });
        assert_eq!(total.targets_processed, 3);
        assert_eq!(total.lattices_skipped, 1);
        assert_eq!(total.dispatches, 7);
        assert!(!total.is_idle());
        assert!(DispatchReport::default().is_idle());
    }
}
