//! Per-frame work lists
//!
//! Owned by the host and passed into every dispatch stage, so no queue state
//! outlives the frame that produced it.

use crate::target::TargetId;
use rustc_hash::FxHashSet;

/// Targets queued for this frame's dispatch stages
#[derive(Debug, Default)]
pub struct FrameContext {
    frame: u64,

    /// Pre-skinning work, in enqueue order
    targets: Vec<TargetId>,
    queued: FxHashSet<TargetId>,

    /// Post-skinning work for skinned targets, in enqueue order
    skinned: Vec<TargetId>,
    queued_skinned: FxHashSet<TargetId>,
}

impl FrameContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the frame counter
    pub fn begin_frame(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Queue a target; false if it is already queued
    pub fn push_target(&mut self, id: TargetId) -> bool {
        if !self.queued.insert(id) {
            return false;
        }
        self.targets.push(id);
        true
    }

    /// Queue a skinned target for the post-skinning stage
    pub fn push_skinned(&mut self, id: TargetId) -> bool {
        if !self.queued_skinned.insert(id) {
            return false;
        }
        self.skinned.push(id);
        true
    }

    pub fn is_queued(&self, id: TargetId) -> bool {
        self.queued.contains(&id)
    }

    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn skinned_targets(&self) -> &[TargetId] {
        &self.skinned
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.skinned.is_empty()
    }

    /// Drain the pre-skinning list
    pub fn take_targets(&mut self) -> Vec<TargetId> {
        self.queued.clear();
        std::mem::take(&mut self.targets)
    }

    /// Drain the post-skinning list
    pub fn take_skinned(&mut self) -> Vec<TargetId> {
        self.queued_skinned.clear();
        std::mem::take(&mut self.skinned)
    }

    pub fn clear(&mut self) {
        self.take_targets();
        self.take_skinned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_rejected_until_drained() {
        let mut ctx = FrameContext::new();
        assert!(ctx.push_target(TargetId(1)));
        assert!(ctx.push_target(TargetId(2)));
        assert!(!ctx.push_target(TargetId(1)));
        assert_eq!(ctx.targets(), &[TargetId(1), TargetId(2)]);

        assert_eq!(ctx.take_targets(), vec![TargetId(1), TargetId(2)]);
        assert!(ctx.targets().is_empty());
        assert!(ctx.push_target(TargetId(1)));
    }

    #[test]
    fn test_lists_drain_independently() {
        let mut ctx = FrameContext::new();
        ctx.push_target(TargetId(3));
        ctx.push_skinned(TargetId(3));

        ctx.take_targets();
        assert!(!ctx.is_empty());
        assert_eq!(ctx.skinned_targets(), &[TargetId(3)]);
        assert!(!ctx.push_skinned(TargetId(3)));

        ctx.clear();
        assert!(ctx.is_empty());
        assert_eq!(ctx.begin_frame(), 1);
    }
}
