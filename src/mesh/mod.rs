/// Mesh Module - Data-Oriented Programming (DOP) style
///
/// - mesh_data.rs: Pure data structures with NO methods
/// - mesh_operations.rs: Pure functions that operate on data
/// - buffer_set.rs: Device-resident working and snapshot buffers of one mesh
///

pub mod buffer_set;
pub mod mesh_data;
pub mod mesh_operations;

// Re-export data structures
pub use mesh_data::{
    Mesh, MeshInfo, VertexAttribute, VertexAttributeDescriptor, VertexFormat, VertexLayout,
};

// Re-export the buffer set
pub use buffer_set::MeshBufferSet;

// Re-export all operations
pub use mesh_operations::{
    // Layout
    find_attribute,
    format_size,
    layout_info,
    mesh_info,
    STRETCH_ATTRIBUTE,

    // Construction
    build_mesh,
    duplicate_for_runtime,

    // Vertex access
    read_normals,
    read_positions,
    read_stretch,
};
