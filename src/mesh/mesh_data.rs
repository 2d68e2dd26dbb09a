//! Mesh data structures - Pure DOP
//!
//! NO METHODS. Just data.
//! Interleaved vertex data plus the layout needed to find each attribute.

use crate::gpu::BufferId;

/// Vertex channels a mesh may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttribute {
    Position,
    Normal,
    Tangent,
    Color,
    TexCoord(u8),
}

/// Storage format of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Unorm8x4,
}

/// Where one attribute lives inside a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttributeDescriptor {
    pub attribute: VertexAttribute,
    pub format: VertexFormat,
    /// Byte offset from the start of the vertex
    pub offset: u32,
}

/// Interleaved layout of a single vertex stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexLayout {
    /// Bytes per vertex
    pub stride: u32,
    pub attributes: Vec<VertexAttributeDescriptor>,
}

/// Mesh asset as seen by the renderer
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub vertex_count: u32,
    pub layout: VertexLayout,

    /// vertex_count * layout.stride bytes
    pub vertex_data: Vec<u8>,
    pub indices: Vec<u32>,

    /// Host copy of the vertex data may be read
    pub readable: bool,

    /// Created at runtime; never persisted with the scene
    pub runtime_only: bool,

    /// Device buffer the renderer draws from, when one exists
    pub vertex_buffer: Option<BufferId>,
}

/// Layout metadata consumed by every kernel stage
///
/// Absent channels carry `NO_ATTRIBUTE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshInfo {
    pub vertex_count: u32,
    pub buffer_stride: u32,
    pub position_offset: u32,
    pub normal_offset: u32,
    pub tangent_offset: u32,
    pub stretch_offset: u32,
}
