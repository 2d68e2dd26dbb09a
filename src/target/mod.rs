//! Deformation targets
//!
//! A target is a renderer-bound mesh plus the ordered lattices deforming it.
//! Variants share `TargetCore` and are driven through the
//! `DeformationTarget` capability trait; `AnyTarget` is the tagged form the
//! scene stores.

pub mod mesh_target;
pub mod skinned_target;
pub mod target_data;
pub mod target_operations;

pub use mesh_target::{MeshSlot, MeshTarget};
pub use skinned_target::SkinnedMeshTarget;
pub use target_data::{SkinnedVertexBuffer, TargetCore, TargetId, TargetKind, TargetState};
pub use target_operations::{
    activate_target, apply_mesh, create_target_core, deactivate_target, reset_mesh,
    sync_binding, target_is_valid,
};

use crate::lattice::LatticeId;
use crate::mesh::{Mesh, MeshBufferSet};
use crate::transform::BonePose;
use glam::Mat4;
use std::sync::Arc;

/// Renderer slot holding the mesh that gets drawn
pub trait MeshBinding: Send {
    fn shared_mesh(&self) -> Option<Arc<Mesh>>;
    fn set_shared_mesh(&mut self, mesh: Option<Arc<Mesh>>);
}

/// Skinned renderer: a mesh slot plus the skinning output
pub trait SkinnedMeshBinding: MeshBinding {
    /// The buffer skinning wrote this frame; may change without notice
    fn skinned_vertex_buffer(&mut self) -> Option<SkinnedVertexBuffer>;

    /// Current world pose of the skeleton's root bone
    fn root_bone(&self) -> Option<BonePose>;
}

/// Capabilities the dispatcher and lifecycle hooks need from a target
pub trait DeformationTarget {
    fn kind(&self) -> TargetKind;
    fn core(&self) -> &TargetCore;
    fn core_mut(&mut self) -> &mut TargetCore;

    /// Mesh the renderer currently draws
    fn current_mesh(&self) -> Option<Arc<Mesh>>;

    /// Point the renderer at a mesh
    fn bind_mesh(&mut self, mesh: Option<Arc<Mesh>>);

    fn name(&self) -> &str {
        &self.core().name
    }

    fn local_to_world(&self) -> Mat4 {
        self.core().local_to_world
    }

    fn buffers(&self) -> Option<&MeshBufferSet> {
        self.core().buffers.as_ref()
    }

    /// Active with both buffers alive
    fn is_valid(&self) -> bool {
        target_is_valid(self.core())
    }

    fn as_skinned(&self) -> Option<&dyn SkinnedDeformationTarget> {
        None
    }

    fn as_skinned_mut(&mut self) -> Option<&mut dyn SkinnedDeformationTarget> {
        None
    }
}

/// Extra capabilities of a skin-deformed target
pub trait SkinnedDeformationTarget: DeformationTarget {
    /// Re-acquire the skinning output, releasing the previous handle, and
    /// recompute the root-bone transform
    ///
    /// Returns whether a skinned buffer is available this frame.
    fn refresh_skinned_state(&mut self) -> bool;

    /// Release and forget the skinning output handle
    fn clear_skinned_state(&mut self);

    fn skinned_buffer(&self) -> Option<&SkinnedVertexBuffer>;

    /// Transform applied to skinned vertices when mapping into lattice space
    fn skinned_local_to_world(&self) -> Mat4;

    /// Lattices applied to the skinned output, in order
    fn skinned_lattices(&self) -> &[LatticeId];
}

/// Tagged target as stored by the scene
pub enum AnyTarget {
    Mesh(MeshTarget),
    Skinned(SkinnedMeshTarget),
}

impl AnyTarget {
    pub fn as_target(&self) -> &dyn DeformationTarget {
        match self {
            AnyTarget::Mesh(target) => target,
            AnyTarget::Skinned(target) => target,
        }
    }

    pub fn as_target_mut(&mut self) -> &mut dyn DeformationTarget {
        match self {
            AnyTarget::Mesh(target) => target,
            AnyTarget::Skinned(target) => target,
        }
    }
}

impl From<MeshTarget> for AnyTarget {
    fn from(target: MeshTarget) -> Self {
        AnyTarget::Mesh(target)
    }
}

impl From<SkinnedMeshTarget> for AnyTarget {
    fn from(target: SkinnedMeshTarget) -> Self {
        AnyTarget::Skinned(target)
    }
}

impl DeformationTarget for AnyTarget {
    fn kind(&self) -> TargetKind {
        self.as_target().kind()
    }

    fn core(&self) -> &TargetCore {
        self.as_target().core()
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        self.as_target_mut().core_mut()
    }

    fn current_mesh(&self) -> Option<Arc<Mesh>> {
        self.as_target().current_mesh()
    }

    fn bind_mesh(&mut self, mesh: Option<Arc<Mesh>>) {
        self.as_target_mut().bind_mesh(mesh)
    }

    fn as_skinned(&self) -> Option<&dyn SkinnedDeformationTarget> {
        match self {
            AnyTarget::Mesh(_) => None,
            AnyTarget::Skinned(target) => Some(target),
        }
    }

    fn as_skinned_mut(&mut self) -> Option<&mut dyn SkinnedDeformationTarget> {
        match self {
            AnyTarget::Mesh(_) => None,
            AnyTarget::Skinned(target) => Some(target),
        }
    }
}

impl std::fmt::Debug for AnyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyTarget")
            .field("kind", &self.kind())
            .field("core", self.core())
            .finish()
    }
}
