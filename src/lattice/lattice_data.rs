//! Lattice data structures - Pure DOP
//!
//! NO METHODS. Just data.
//! All grid math happens in lattice_operations.rs. Fields are crate-private
//! so the handle count can only change through `resize_lattice`.

use glam::{IVec3, Mat4, Vec3};

/// Stable identifier of a lattice inside a `DeformScene`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LatticeId(pub u64);

/// One control point of the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeHandle {
    /// Grid coordinates of this handle
    pub coords: IVec3,
    /// Displacement from the handle's rest position
    pub offset: Vec3,
}

/// 3D grid of control points, stored x-fastest
#[derive(Debug, Clone)]
pub struct LatticeGrid {
    /// Handles per axis, every component >= 2
    pub(crate) resolution: IVec3,

    /// resolution.x * resolution.y * resolution.z handles
    pub(crate) handles: Vec<LatticeHandle>,

    /// Flattened offsets handed to the upload buffer
    pub(crate) offsets: Vec<Vec3>,

    /// Set when a handle offset changed since the last export
    pub(crate) offsets_dirty: bool,
}

/// A lattice placed in the world
#[derive(Debug, Clone)]
pub struct Lattice {
    pub name: String,

    /// Maps the lattice's unit cube into world space
    pub local_to_world: Mat4,

    pub grid: LatticeGrid,
}
