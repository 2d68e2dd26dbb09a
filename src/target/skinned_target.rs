//! Target bound to a skinned mesh renderer
//!
//! `lattices` deform the bind-pose working mesh before skinning;
//! `skinned_lattices` deform the skinning output afterwards, in root-bone
//! space.

use super::target_data::{SkinnedVertexBuffer, TargetCore, TargetKind};
use super::{DeformationTarget, SkinnedDeformationTarget, SkinnedMeshBinding};
use crate::gpu::BufferId;
use crate::lattice::LatticeId;
use crate::mesh::Mesh;
use crate::transform::skinned_local_to_world;
use glam::Mat4;
use std::sync::Arc;

/// Skinned renderer deformed by lattices before and after skinning
pub struct SkinnedMeshTarget {
    core: TargetCore,
    skinned_lattices: Vec<LatticeId>,
    binding: Box<dyn SkinnedMeshBinding>,

    /// Re-acquired on every enqueue; never trusted across frames
    skinned_buffer: Option<SkinnedVertexBuffer>,
    skinned_local_to_world: Mat4,
}

impl SkinnedMeshTarget {
    pub fn new(core: TargetCore, binding: impl SkinnedMeshBinding + 'static) -> Self {
        let skinned_local_to_world = core.local_to_world;
        Self {
            core,
            skinned_lattices: Vec::new(),
            binding: Box::new(binding),
            skinned_buffer: None,
            skinned_local_to_world,
        }
    }

    pub fn skinned_lattices_mut(&mut self) -> &mut Vec<LatticeId> {
        &mut self.skinned_lattices
    }

    /// Release a skinning output handle through the target's device
    fn release_skinned_handle(&self, buffer: BufferId) {
        if let Some(buffers) = self.core.buffers.as_ref() {
            buffers.device().release_buffer(buffer);
        }
    }
}

impl DeformationTarget for SkinnedMeshTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Skinned
    }

    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        &mut self.core
    }

    fn current_mesh(&self) -> Option<Arc<Mesh>> {
        self.binding.shared_mesh()
    }

    fn bind_mesh(&mut self, mesh: Option<Arc<Mesh>>) {
        self.binding.set_shared_mesh(mesh)
    }

    fn as_skinned(&self) -> Option<&dyn SkinnedDeformationTarget> {
        Some(self)
    }

    fn as_skinned_mut(&mut self) -> Option<&mut dyn SkinnedDeformationTarget> {
        Some(self)
    }
}

impl SkinnedDeformationTarget for SkinnedMeshTarget {
    fn refresh_skinned_state(&mut self) -> bool {
        let previous = self.skinned_buffer.take();
        self.skinned_buffer = self.binding.skinned_vertex_buffer();

        // Every acquisition hands out a new reference; drop the last one
        if let Some(previous) = previous {
            let reacquired = self
                .skinned_buffer
                .as_ref()
                .is_some_and(|current| current.buffer == previous.buffer);
            if !reacquired {
                self.release_skinned_handle(previous.buffer);
            }
        }

        let root_bone = self.binding.root_bone();
        self.skinned_local_to_world =
            skinned_local_to_world(root_bone.as_ref(), self.core.local_to_world);

        log::trace!(
            "[Lattice] '{}' skinned buffer {:?}",
            self.core.name,
            self.skinned_buffer.as_ref().map(|b| b.buffer)
        );
        self.skinned_buffer.is_some()
    }

    fn clear_skinned_state(&mut self) {
        if let Some(previous) = self.skinned_buffer.take() {
            self.release_skinned_handle(previous.buffer);
        }
    }

    fn skinned_buffer(&self) -> Option<&SkinnedVertexBuffer> {
        self.skinned_buffer.as_ref()
    }

    fn skinned_local_to_world(&self) -> Mat4 {
        self.skinned_local_to_world
    }

    fn skinned_lattices(&self) -> &[LatticeId] {
        &self.skinned_lattices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::VertexLayout;
    use crate::target::{create_target_core, MeshBinding};
    use crate::transform::BonePose;
    use glam::{Quat, Vec3};

    /// Hands out a new skinning buffer on every request
    struct ScriptedSkin {
        mesh: Option<Arc<Mesh>>,
        buffers: Vec<BufferId>,
        root: Option<BonePose>,
    }

    impl MeshBinding for ScriptedSkin {
        fn shared_mesh(&self) -> Option<Arc<Mesh>> {
            self.mesh.clone()
        }

        fn set_shared_mesh(&mut self, mesh: Option<Arc<Mesh>>) {
            self.mesh = mesh;
        }
    }

    impl SkinnedMeshBinding for ScriptedSkin {
        fn skinned_vertex_buffer(&mut self) -> Option<SkinnedVertexBuffer> {
            if self.buffers.is_empty() {
                return None;
            }
            Some(SkinnedVertexBuffer {
                buffer: self.buffers.remove(0),
                layout: VertexLayout::default(),
                vertex_count: 0,
            })
        }

        fn root_bone(&self) -> Option<BonePose> {
            self.root
        }
    }

    #[test]
    fn test_refresh_reacquires_buffer_every_time() {
        let skin = ScriptedSkin {
            mesh: None,
            buffers: vec![BufferId(7), BufferId(9)],
            root: None,
        };
        let mut target = SkinnedMeshTarget::new(create_target_core("Hero"), skin);

        assert!(target.refresh_skinned_state());
        assert_eq!(target.skinned_buffer().map(|b| b.buffer), Some(BufferId(7)));
        assert!(target.refresh_skinned_state());
        assert_eq!(target.skinned_buffer().map(|b| b.buffer), Some(BufferId(9)));

        // Skinning produced nothing this time; the old handle must not linger
        assert!(!target.refresh_skinned_state());
        assert!(target.skinned_buffer().is_none());
    }

    #[test]
    fn test_root_bone_replaces_object_transform() {
        let pose = BonePose {
            position: Vec3::new(0.0, 1.5, 0.0),
            rotation: Quat::from_rotation_y(1.0),
        };
        let mut core = create_target_core("Hero");
        core.local_to_world = Mat4::from_scale(Vec3::splat(3.0));
        let skin = ScriptedSkin {
            mesh: None,
            buffers: Vec::new(),
            root: Some(pose),
        };
        let mut target = SkinnedMeshTarget::new(core, skin);
        target.refresh_skinned_state();

        let expected = Mat4::from_rotation_translation(pose.rotation, pose.position);
        assert!(target.skinned_local_to_world().abs_diff_eq(expected, 1e-6));
        assert_eq!(target.kind(), TargetKind::Skinned);
        assert!(target.as_skinned().is_some());
    }
}
