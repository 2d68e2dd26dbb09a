//! Lattice operations - grid construction, handle accessors and export
//!
//! Handle indices are `x + rx * y + rx * ry * z`. Indices outside the grid
//! are programming errors and panic; the `checked_*` variants return `None`
//! instead.

use super::lattice_data::{Lattice, LatticeGrid, LatticeHandle};
use crate::constants::lattice::{DEFAULT_RESOLUTION, MAX_RESOLUTION, MIN_RESOLUTION};
use glam::{IVec3, Mat4, Vec3};

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Create a grid at the given resolution with every handle at rest
pub fn create_lattice_grid(resolution: IVec3) -> LatticeGrid {
    let mut grid = LatticeGrid {
        resolution: IVec3::splat(MIN_RESOLUTION),
        handles: Vec::new(),
        offsets: Vec::new(),
        offsets_dirty: true,
    };
    resize_lattice(&mut grid, resolution);
    grid
}

/// Create a named lattice with the default 2x2x2 grid
pub fn create_lattice(name: impl Into<String>, local_to_world: Mat4) -> Lattice {
    Lattice {
        name: name.into(),
        local_to_world,
        grid: create_lattice_grid(IVec3::from_array(DEFAULT_RESOLUTION)),
    }
}

/// Clamp every axis into the supported resolution range
pub fn clamp_resolution(resolution: IVec3) -> IVec3 {
    resolution.clamp(IVec3::splat(MIN_RESOLUTION), IVec3::splat(MAX_RESOLUTION))
}

/// Handles in a grid of this resolution, without intermediate overflow
pub fn resolution_handle_count(resolution: IVec3) -> usize {
    let resolution = clamp_resolution(resolution);
    resolution.x as usize * resolution.y as usize * resolution.z as usize
}

/// Rebuild the grid at a new resolution
///
/// Destructive: every prior displacement is discarded. Axes outside the
/// supported range are clamped rather than rejected.
pub fn resize_lattice(grid: &mut LatticeGrid, resolution: IVec3) {
    let resolution = clamp_resolution(resolution);
    let count = resolution_handle_count(resolution);

    grid.resolution = resolution;
    grid.handles.clear();
    grid.handles.reserve(count);

    for z in 0..resolution.z {
        for y in 0..resolution.y {
            for x in 0..resolution.x {
                grid.handles.push(LatticeHandle {
                    coords: IVec3::new(x, y, z),
                    offset: Vec3::ZERO,
                });
            }
        }
    }

    grid.offsets.clear();
    grid.offsets_dirty = true;

    log::debug!(
        "[Lattice] Resized grid to {}x{}x{} ({} handles)",
        resolution.x,
        resolution.y,
        resolution.z,
        count
    );
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn lattice_resolution(grid: &LatticeGrid) -> IVec3 {
    grid.resolution
}

pub fn handle_count(grid: &LatticeGrid) -> usize {
    grid.handles.len()
}

pub fn lattice_handles(grid: &LatticeGrid) -> &[LatticeHandle] {
    &grid.handles
}

/// Flat index of a handle, or `None` when any axis is out of range
pub fn checked_handle_index(grid: &LatticeGrid, x: i32, y: i32, z: i32) -> Option<usize> {
    let r = grid.resolution;
    if x < 0 || y < 0 || z < 0 || x >= r.x || y >= r.y || z >= r.z {
        return None;
    }
    Some((x + r.x * y + r.x * r.y * z) as usize)
}

/// Flat index of a handle
///
/// # Panics
/// When any axis is outside `[0, resolution)`.
pub fn handle_index(grid: &LatticeGrid, x: i32, y: i32, z: i32) -> usize {
    match checked_handle_index(grid, x, y, z) {
        Some(index) => index,
        None => panic!(
            "lattice handle ({}, {}, {}) out of range for resolution {:?}",
            x, y, z, grid.resolution
        ),
    }
}

/// Rest position of a handle in the lattice's unit cube
pub fn base_position(grid: &LatticeGrid, x: i32, y: i32, z: i32) -> Vec3 {
    let cells = (grid.resolution - IVec3::ONE).as_vec3();
    Vec3::new(x as f32, y as f32, z as f32) / cells
}

// ============================================================================
// HANDLE ACCESS
// ============================================================================

/// Displacement of a handle from its rest position
pub fn handle_offset(grid: &LatticeGrid, x: i32, y: i32, z: i32) -> Vec3 {
    grid.handles[handle_index(grid, x, y, z)].offset
}

pub fn checked_handle_offset(grid: &LatticeGrid, x: i32, y: i32, z: i32) -> Option<Vec3> {
    checked_handle_index(grid, x, y, z).map(|index| grid.handles[index].offset)
}

pub fn set_handle_offset(grid: &mut LatticeGrid, x: i32, y: i32, z: i32, offset: Vec3) {
    let index = handle_index(grid, x, y, z);
    grid.handles[index].offset = offset;
    grid.offsets_dirty = true;
}

/// Handle position including its current displacement
pub fn handle_position(grid: &LatticeGrid, x: i32, y: i32, z: i32) -> Vec3 {
    base_position(grid, x, y, z) + handle_offset(grid, x, y, z)
}

/// Move a handle to an absolute position in the lattice's local space
pub fn set_handle_position(grid: &mut LatticeGrid, x: i32, y: i32, z: i32, position: Vec3) {
    let offset = position - base_position(grid, x, y, z);
    set_handle_offset(grid, x, y, z, offset);
}

/// Return every handle to its rest position
pub fn reset_handle_offsets(grid: &mut LatticeGrid) {
    for handle in &mut grid.handles {
        handle.offset = Vec3::ZERO;
    }
    grid.offsets_dirty = true;
}

// ============================================================================
// EXPORT
// ============================================================================

/// Flattened offsets in handle order, ready for upload
///
/// The cache is rebuilt when the handle count changed and refreshed in place
/// when an offset was edited; otherwise the previous export is reused.
pub fn export_offsets(grid: &mut LatticeGrid) -> &[Vec3] {
    if grid.offsets.len() != grid.handles.len() {
        grid.offsets.clear();
        grid.offsets.extend(grid.handles.iter().map(|h| h.offset));
    } else if grid.offsets_dirty {
        for (cached, handle) in grid.offsets.iter_mut().zip(&grid.handles) {
            *cached = handle.offset;
        }
    }
    grid.offsets_dirty = false;
    &grid.offsets
}

// ============================================================================
// PLACEMENT
// ============================================================================

/// World-to-local matrix of a placed lattice
pub fn lattice_world_to_local(lattice: &Lattice) -> Mat4 {
    lattice.local_to_world.inverse()
}
