//! Scene registries for lattices and deformation targets
//!
//! Ids are never reused, so a stale id held by a frame context simply stops
//! resolving once its object is removed.

use crate::lattice::{Lattice, LatticeId};
use crate::target::{
    deactivate_target, AnyTarget, DeformationTarget, SkinnedDeformationTarget, TargetId,
};
use std::collections::BTreeMap;

/// All lattices and targets known to the lattice system
#[derive(Debug, Default)]
pub struct DeformScene {
    lattices: BTreeMap<LatticeId, Lattice>,
    targets: BTreeMap<TargetId, AnyTarget>,
    next_lattice: u64,
    next_target: u64,
}

impl DeformScene {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Lattices
    // ------------------------------------------------------------------

    pub fn add_lattice(&mut self, lattice: Lattice) -> LatticeId {
        self.next_lattice += 1;
        let id = LatticeId(self.next_lattice);
        self.lattices.insert(id, lattice);
        id
    }

    /// Remove a lattice; targets still listing it skip it from then on
    pub fn remove_lattice(&mut self, id: LatticeId) -> Option<Lattice> {
        self.lattices.remove(&id)
    }

    pub fn lattice(&self, id: LatticeId) -> Option<&Lattice> {
        self.lattices.get(&id)
    }

    pub fn lattice_mut(&mut self, id: LatticeId) -> Option<&mut Lattice> {
        self.lattices.get_mut(&id)
    }

    pub fn lattice_ids(&self) -> impl Iterator<Item = LatticeId> + '_ {
        self.lattices.keys().copied()
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    pub fn add_target(&mut self, target: impl Into<AnyTarget>) -> TargetId {
        self.next_target += 1;
        let id = TargetId(self.next_target);
        self.targets.insert(id, target.into());
        id
    }

    /// Remove a target, restoring its original mesh and releasing its buffers
    pub fn remove_target(&mut self, id: TargetId) -> Option<AnyTarget> {
        let mut target = self.targets.remove(&id)?;
        deactivate_target(&mut target);
        Some(target)
    }

    pub fn target(&self, id: TargetId) -> Option<&AnyTarget> {
        self.targets.get(&id)
    }

    pub fn target_mut(&mut self, id: TargetId) -> Option<&mut AnyTarget> {
        self.targets.get_mut(&id)
    }

    pub fn target_ids(&self) -> Vec<TargetId> {
        self.targets.keys().copied().collect()
    }

    pub fn targets_mut(&mut self) -> impl Iterator<Item = (TargetId, &mut AnyTarget)> + '_ {
        self.targets.iter_mut().map(|(id, target)| (*id, target))
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    // ------------------------------------------------------------------
    // Attachment
    // ------------------------------------------------------------------

    /// Append a lattice to a target's pre-skinning list
    pub fn attach_lattice(&mut self, target: TargetId, lattice: LatticeId) -> bool {
        if !self.lattices.contains_key(&lattice) {
            return false;
        }
        match self.targets.get_mut(&target) {
            Some(entry) => {
                entry.core_mut().lattices.push(lattice);
                true
            }
            None => false,
        }
    }

    /// Append a lattice to a skinned target's post-skinning list
    pub fn attach_skinned_lattice(&mut self, target: TargetId, lattice: LatticeId) -> bool {
        if !self.lattices.contains_key(&lattice) {
            return false;
        }
        match self.targets.get_mut(&target) {
            Some(AnyTarget::Skinned(skinned)) => {
                skinned.skinned_lattices_mut().push(lattice);
                true
            }
            _ => false,
        }
    }

    /// Remove every occurrence of a lattice from a target's lists
    pub fn detach_lattice(&mut self, target: TargetId, lattice: LatticeId) -> bool {
        let Some(entry) = self.targets.get_mut(&target) else {
            return false;
        };
        let before = entry.core().lattices.len();
        entry.core_mut().lattices.retain(|id| *id != lattice);
        let mut removed = entry.core().lattices.len() != before;

        if let AnyTarget::Skinned(skinned) = entry {
            let before = skinned.skinned_lattices().len();
            skinned.skinned_lattices_mut().retain(|id| *id != lattice);
            removed |= skinned.skinned_lattices().len() != before;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::create_lattice;
    use crate::target::{create_target_core, MeshSlot, MeshTarget};
    use glam::Mat4;

    #[test]
    fn test_ids_are_not_reused() {
        let mut scene = DeformScene::new();
        let a = scene.add_lattice(create_lattice("A", Mat4::IDENTITY));
        scene.remove_lattice(a);
        let b = scene.add_lattice(create_lattice("B", Mat4::IDENTITY));
        assert_ne!(a, b);
        assert!(scene.lattice(a).is_none());
    }

    #[test]
    fn test_attach_and_detach_keep_order() {
        let mut scene = DeformScene::new();
        let a = scene.add_lattice(create_lattice("A", Mat4::IDENTITY));
        let b = scene.add_lattice(create_lattice("B", Mat4::IDENTITY));
        let target =
            scene.add_target(MeshTarget::new(create_target_core("T"), MeshSlot::default()));

        assert!(scene.attach_lattice(target, b));
        assert!(scene.attach_lattice(target, a));
        assert!(!scene.attach_skinned_lattice(target, a));
        assert!(!scene.attach_lattice(TargetId(99), a));
        assert_eq!(scene.target(target).expect("target").core().lattices, vec![b, a]);

        assert!(scene.detach_lattice(target, b));
        assert!(!scene.detach_lattice(target, b));
        assert_eq!(scene.target(target).expect("target").core().lattices, vec![a]);
    }
}
