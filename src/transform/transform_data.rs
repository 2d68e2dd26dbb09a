//! Transform data structures - Pure DOP
//!
//! NO METHODS. Just data.

use glam::{Mat4, Quat, Vec3};

/// Matrix pair handed to one accumulate dispatch
///
/// `object_to_lattice` maps the target's object space into the lattice unit
/// cube; `lattice_to_object` is its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeTransformPair {
    pub object_to_lattice: Mat4,
    pub lattice_to_object: Mat4,
}

/// World pose of a skeleton's root bone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    pub position: Vec3,
    pub rotation: Quat,
}
