//! Shared constants for the lattice deformation engine.

/// Lattice grid limits
pub mod lattice {
    /// Minimum control points per axis (one interpolation cell)
    pub const MIN_RESOLUTION: i32 = 2;

    /// Maximum control points per axis; keeps flat handle indices within i32
    pub const MAX_RESOLUTION: i32 = 1024;

    /// Default grid resolution for newly authored lattices
    pub const DEFAULT_RESOLUTION: [i32; 3] = [2, 2, 2];

    /// Default capacity of the shared upload buffer, in control points
    pub const DEFAULT_MAX_HANDLES: u32 = 1024;

    /// Bytes per uploaded control point (three packed f32)
    pub const HANDLE_STRIDE_BYTES: u64 = 3 * std::mem::size_of::<f32>() as u64;
}

/// Kernel constants shared with `lattice_deform.wgsl`
pub mod kernel {
    /// Marks a vertex channel that is not present in the buffer
    pub const NO_ATTRIBUTE: u32 = u32::MAX;

    /// Workgroup size baked into the WGSL entry points
    pub const WGSL_WORKGROUP_SIZE: u32 = 64;

    /// Default group size reported by the host reference device
    pub const DEFAULT_WORKGROUP_SIZE: u32 = 64;

    /// Tolerance used when testing whether a vertex lies inside the lattice
    pub const VOLUME_EPSILON: f32 = 1e-4;

    /// Step for the central-difference Jacobian, in lattice space
    pub const DERIVATIVE_STEP: f32 = 1e-3;

    /// Vectors shorter than this are not renormalized
    pub const MIN_VECTOR_LENGTH: f32 = 1e-8;
}

/// Vertex layout constants
pub mod vertex {
    /// Neutral stretch/squish factor written at setup
    pub const NEUTRAL_STRETCH: [f32; 2] = [1.0, 1.0];

    /// UV channel that carries the stretch factor pair
    pub const STRETCH_UV_CHANNEL: u8 = 3;

    /// Required alignment of every attribute offset and the stride
    pub const ATTRIBUTE_ALIGNMENT: u32 = 4;

    /// Suffix appended to the name of a runtime working mesh
    pub const WORKING_MESH_SUFFIX: &str = " (Lattice)";
}
