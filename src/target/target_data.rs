//! Target data structures - Pure DOP
//!
//! NO METHODS. Just data.

use crate::error::TargetFault;
use crate::gpu::BufferId;
use crate::lattice::LatticeId;
use crate::mesh::{Mesh, MeshBufferSet, VertexLayout};
use glam::Mat4;
use std::sync::Arc;

/// Stable identifier of a registered target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Which renderer a target deforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Mesh,
    Skinned,
}

/// Lifecycle state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Never activated
    Uninitialized,
    /// Buffers allocated; eligible for dispatch
    Active,
    /// Setup failed; excluded until re-activated
    Faulted(TargetFault),
    /// Deactivated; buffers released and original mesh restored
    Inactive,
}

/// State shared by every target variant
#[derive(Debug)]
pub struct TargetCore {
    pub name: String,

    /// Lattices applied in order; later ones compose on earlier output
    pub lattices: Vec<LatticeId>,

    /// Tricubic sampling instead of trilinear
    pub high_quality: bool,

    /// Owning object's transform
    pub local_to_world: Mat4,

    /// Undeformed source mesh; taken from the renderer when unset
    pub target_mesh: Option<Arc<Mesh>>,

    /// Present while the target is active
    pub buffers: Option<MeshBufferSet>,

    pub state: TargetState,
}

/// Output buffer written by the skinning system this frame
#[derive(Debug, Clone, PartialEq)]
pub struct SkinnedVertexBuffer {
    pub buffer: BufferId,
    pub layout: VertexLayout,
    pub vertex_count: u32,
}
