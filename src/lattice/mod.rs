/// Lattice Module - Data-Oriented Programming (DOP) style
///
/// - lattice_data.rs: Pure data structures with NO methods
/// - lattice_operations.rs: Pure functions that operate on data
///

pub mod lattice_data;
pub mod lattice_operations;

// Re-export data structures
pub use lattice_data::{Lattice, LatticeGrid, LatticeHandle, LatticeId};

// Re-export all operations
pub use lattice_operations::{
    // Construction
    clamp_resolution,
    resolution_handle_count,
    create_lattice,
    create_lattice_grid,
    resize_lattice,

    // Queries
    base_position,
    checked_handle_index,
    handle_count,
    handle_index,
    lattice_handles,
    lattice_resolution,

    // Handle access
    checked_handle_offset,
    handle_offset,
    handle_position,
    reset_handle_offsets,
    set_handle_offset,
    set_handle_position,

    // Export
    export_offsets,

    // Placement
    lattice_world_to_local,
};
