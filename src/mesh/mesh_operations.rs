//! Mesh operations - layout queries, runtime duplication and vertex access
//!
//! Vertex bytes are little-endian f32 throughout, matching what the kernel
//! reads through `bitcast<f32>`.

use super::mesh_data::{
    Mesh, MeshInfo, VertexAttribute, VertexAttributeDescriptor, VertexFormat, VertexLayout,
};
use crate::constants::kernel::NO_ATTRIBUTE;
use crate::constants::vertex::{
    ATTRIBUTE_ALIGNMENT, NEUTRAL_STRETCH, STRETCH_UV_CHANNEL, WORKING_MESH_SUFFIX,
};
use crate::error::{DeformError, DeformResult};
use glam::{Vec2, Vec3, Vec4};

/// The UV channel that carries stretch factors
pub const STRETCH_ATTRIBUTE: VertexAttribute = VertexAttribute::TexCoord(STRETCH_UV_CHANNEL);

// ============================================================================
// LAYOUT QUERIES
// ============================================================================

pub fn format_size(format: VertexFormat) -> u32 {
    match format {
        VertexFormat::Float32x2 => 8,
        VertexFormat::Float32x3 => 12,
        VertexFormat::Float32x4 => 16,
        VertexFormat::Unorm8x4 => 4,
    }
}

pub fn find_attribute(
    layout: &VertexLayout,
    attribute: VertexAttribute,
) -> Option<&VertexAttributeDescriptor> {
    layout.attributes.iter().find(|a| a.attribute == attribute)
}

/// Check one optional channel and return its offset or `NO_ATTRIBUTE`
fn channel_offset(
    name: &str,
    layout: &VertexLayout,
    attribute: VertexAttribute,
    format: VertexFormat,
) -> DeformResult<u32> {
    let Some(descriptor) = find_attribute(layout, attribute) else {
        return Ok(NO_ATTRIBUTE);
    };

    if descriptor.format != format {
        return Err(DeformError::UnsupportedFormat {
            name: name.to_string(),
            attribute,
            format: descriptor.format,
        });
    }

    if descriptor.offset % ATTRIBUTE_ALIGNMENT != 0
        || descriptor.offset + format_size(format) > layout.stride
    {
        return Err(DeformError::MisalignedAttribute {
            name: name.to_string(),
            attribute,
            offset: descriptor.offset,
            stride: layout.stride,
        });
    }

    Ok(descriptor.offset)
}

/// Validate a vertex layout and extract the offsets the kernel needs
///
/// Position is required; normal, tangent and stretch are optional.
pub fn layout_info(name: &str, layout: &VertexLayout, vertex_count: u32) -> DeformResult<MeshInfo> {
    if layout.stride == 0 || layout.stride % ATTRIBUTE_ALIGNMENT != 0 {
        return Err(DeformError::MisalignedAttribute {
            name: name.to_string(),
            attribute: VertexAttribute::Position,
            offset: 0,
            stride: layout.stride,
        });
    }

    let position_offset = channel_offset(
        name,
        layout,
        VertexAttribute::Position,
        VertexFormat::Float32x3,
    )?;
    if position_offset == NO_ATTRIBUTE {
        return Err(DeformError::MissingAttribute {
            name: name.to_string(),
            attribute: VertexAttribute::Position,
        });
    }

    Ok(MeshInfo {
        vertex_count,
        buffer_stride: layout.stride,
        position_offset,
        normal_offset: channel_offset(
            name,
            layout,
            VertexAttribute::Normal,
            VertexFormat::Float32x3,
        )?,
        tangent_offset: channel_offset(
            name,
            layout,
            VertexAttribute::Tangent,
            VertexFormat::Float32x4,
        )?,
        stretch_offset: channel_offset(name, layout, STRETCH_ATTRIBUTE, VertexFormat::Float32x2)?,
    })
}

pub fn mesh_info(mesh: &Mesh) -> DeformResult<MeshInfo> {
    let info = layout_info(&mesh.name, &mesh.layout, mesh.vertex_count)?;
    let expected = mesh.vertex_count as usize * mesh.layout.stride as usize;
    if mesh.vertex_data.len() != expected {
        return Err(DeformError::VertexDataSize {
            name: mesh.name.clone(),
            expected,
            actual: mesh.vertex_data.len(),
        });
    }
    Ok(info)
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Build a readable interleaved mesh (position, then optional normal and tangent)
pub fn build_mesh(
    name: impl Into<String>,
    positions: &[Vec3],
    normals: Option<&[Vec3]>,
    tangents: Option<&[Vec4]>,
) -> Mesh {
    let mut attributes = vec![VertexAttributeDescriptor {
        attribute: VertexAttribute::Position,
        format: VertexFormat::Float32x3,
        offset: 0,
    }];
    let mut stride = 12;

    if normals.is_some() {
        attributes.push(VertexAttributeDescriptor {
            attribute: VertexAttribute::Normal,
            format: VertexFormat::Float32x3,
            offset: stride,
        });
        stride += 12;
    }
    if tangents.is_some() {
        attributes.push(VertexAttributeDescriptor {
            attribute: VertexAttribute::Tangent,
            format: VertexFormat::Float32x4,
            offset: stride,
        });
        stride += 16;
    }

    let mut vertex_data = Vec::with_capacity(positions.len() * stride as usize);
    for (i, position) in positions.iter().enumerate() {
        vertex_data.extend_from_slice(bytemuck::bytes_of(position));
        if let Some(normals) = normals {
            let normal = normals.get(i).copied().unwrap_or(Vec3::Z);
            vertex_data.extend_from_slice(bytemuck::bytes_of(&normal));
        }
        if let Some(tangents) = tangents {
            let tangent = tangents.get(i).copied().unwrap_or(Vec4::new(1.0, 0.0, 0.0, 1.0));
            vertex_data.extend_from_slice(bytemuck::bytes_of(&tangent));
        }
    }

    Mesh {
        name: name.into(),
        vertex_count: positions.len() as u32,
        layout: VertexLayout { stride, attributes },
        vertex_data,
        indices: Vec::new(),
        readable: true,
        runtime_only: false,
        vertex_buffer: None,
    }
}

/// Copy a source mesh into a runtime-only working mesh
///
/// The copy gains a stretch channel when the source has none, and every
/// vertex's stretch pair is set to neutral.
pub fn duplicate_for_runtime(source: &Mesh) -> DeformResult<Mesh> {
    if !source.readable {
        return Err(DeformError::UnreadableMesh {
            name: source.name.clone(),
        });
    }

    let old_stride = source.layout.stride as usize;
    let expected = source.vertex_count as usize * old_stride;
    if source.vertex_data.len() != expected {
        return Err(DeformError::VertexDataSize {
            name: source.name.clone(),
            expected,
            actual: source.vertex_data.len(),
        });
    }

    let mut layout = source.layout.clone();
    let (stride, stretch_offset, vertex_data) = match find_attribute(&layout, STRETCH_ATTRIBUTE) {
        Some(existing) if existing.format == VertexFormat::Float32x2 => {
            (layout.stride, existing.offset, source.vertex_data.clone())
        }
        Some(existing) => {
            return Err(DeformError::UnsupportedFormat {
                name: source.name.clone(),
                attribute: STRETCH_ATTRIBUTE,
                format: existing.format,
            });
        }
        None => {
            let offset = layout.stride;
            let stride = layout.stride + format_size(VertexFormat::Float32x2);
            layout.attributes.push(VertexAttributeDescriptor {
                attribute: STRETCH_ATTRIBUTE,
                format: VertexFormat::Float32x2,
                offset,
            });

            let mut data = Vec::with_capacity(source.vertex_count as usize * stride as usize);
            for vertex in source.vertex_data.chunks_exact(old_stride.max(1)) {
                data.extend_from_slice(vertex);
                data.extend_from_slice(bytemuck::bytes_of(&NEUTRAL_STRETCH));
            }
            (stride, offset, data)
        }
    };
    layout.stride = stride;

    let mut working = Mesh {
        name: format!("{}{}", source.name, WORKING_MESH_SUFFIX),
        vertex_count: source.vertex_count,
        layout,
        vertex_data,
        indices: source.indices.clone(),
        readable: true,
        runtime_only: true,
        vertex_buffer: None,
    };

    for vertex in 0..working.vertex_count {
        write_vec2(
            &mut working.vertex_data,
            stride,
            vertex,
            stretch_offset,
            Vec2::from_array(NEUTRAL_STRETCH),
        );
    }

    Ok(working)
}

// ============================================================================
// VERTEX ACCESS
// ============================================================================

#[inline]
fn byte_index(stride: u32, vertex: u32, offset: u32) -> usize {
    vertex as usize * stride as usize + offset as usize
}

#[inline]
pub fn read_f32(bytes: &[u8], at: usize) -> f32 {
    bytemuck::pod_read_unaligned(&bytes[at..at + 4])
}

#[inline]
pub fn write_f32(bytes: &mut [u8], at: usize, value: f32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn read_vec2(bytes: &[u8], stride: u32, vertex: u32, offset: u32) -> Vec2 {
    let at = byte_index(stride, vertex, offset);
    Vec2::from_array(bytemuck::pod_read_unaligned(&bytes[at..at + 8]))
}

pub fn write_vec2(bytes: &mut [u8], stride: u32, vertex: u32, offset: u32, value: Vec2) {
    let at = byte_index(stride, vertex, offset);
    bytes[at..at + 8].copy_from_slice(bytemuck::bytes_of(&value.to_array()));
}

pub fn read_vec3(bytes: &[u8], stride: u32, vertex: u32, offset: u32) -> Vec3 {
    let at = byte_index(stride, vertex, offset);
    Vec3::from_array(bytemuck::pod_read_unaligned(&bytes[at..at + 12]))
}

pub fn write_vec3(bytes: &mut [u8], stride: u32, vertex: u32, offset: u32, value: Vec3) {
    let at = byte_index(stride, vertex, offset);
    bytes[at..at + 12].copy_from_slice(bytemuck::bytes_of(&value.to_array()));
}

pub fn read_vec4(bytes: &[u8], stride: u32, vertex: u32, offset: u32) -> Vec4 {
    let at = byte_index(stride, vertex, offset);
    Vec4::from_array(bytemuck::pod_read_unaligned(&bytes[at..at + 16]))
}

pub fn write_vec4(bytes: &mut [u8], stride: u32, vertex: u32, offset: u32, value: Vec4) {
    let at = byte_index(stride, vertex, offset);
    bytes[at..at + 16].copy_from_slice(bytemuck::bytes_of(&value.to_array()));
}

/// Decode every position of a vertex stream
pub fn read_positions(bytes: &[u8], info: &MeshInfo) -> Vec<Vec3> {
    (0..info.vertex_count)
        .map(|v| read_vec3(bytes, info.buffer_stride, v, info.position_offset))
        .collect()
}

/// Decode every normal, or an empty list when the stream has none
pub fn read_normals(bytes: &[u8], info: &MeshInfo) -> Vec<Vec3> {
    if info.normal_offset == NO_ATTRIBUTE {
        return Vec::new();
    }
    (0..info.vertex_count)
        .map(|v| read_vec3(bytes, info.buffer_stride, v, info.normal_offset))
        .collect()
}

/// Decode every stretch pair, or an empty list when the stream has none
pub fn read_stretch(bytes: &[u8], info: &MeshInfo) -> Vec<Vec2> {
    if info.stretch_offset == NO_ATTRIBUTE {
        return Vec::new();
    }
    (0..info.vertex_count)
        .map(|v| read_vec2(bytes, info.buffer_stride, v, info.stretch_offset))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        build_mesh(
            "Quad",
            &[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 0.0)],
            Some(&[Vec3::Z; 4]),
            Some(&[Vec4::new(1.0, 0.0, 0.0, 1.0); 4]),
        )
    }

    #[test]
    fn test_build_mesh_layout() {
        let mesh = quad();
        let info = mesh_info(&mesh).expect("quad layout should be valid");
        assert_eq!(info.buffer_stride, 40);
        assert_eq!(info.position_offset, 0);
        assert_eq!(info.normal_offset, 12);
        assert_eq!(info.tangent_offset, 24);
        assert_eq!(info.stretch_offset, NO_ATTRIBUTE);
        assert_eq!(read_positions(&mesh.vertex_data, &info)[3], Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_duplicate_appends_neutral_stretch() {
        let source = quad();
        let working = duplicate_for_runtime(&source).expect("readable mesh should duplicate");

        assert_eq!(working.name, "Quad (Lattice)");
        assert!(working.runtime_only);
        assert_eq!(working.layout.stride, 48);

        let info = mesh_info(&working).expect("working layout should be valid");
        assert_eq!(info.stretch_offset, 40);
        assert!(read_stretch(&working.vertex_data, &info)
            .iter()
            .all(|s| *s == Vec2::ONE));
        assert_eq!(
            read_positions(&working.vertex_data, &info),
            read_positions(&source.vertex_data, &mesh_info(&source).expect("valid"))
        );
    }

    #[test]
    fn test_duplicate_resets_existing_stretch_channel() {
        let mut source = duplicate_for_runtime(&quad()).expect("readable mesh should duplicate");
        let info = mesh_info(&source).expect("valid");
        write_vec2(
            &mut source.vertex_data,
            info.buffer_stride,
            2,
            info.stretch_offset,
            Vec2::new(3.0, 0.5),
        );

        let working = duplicate_for_runtime(&source).expect("readable mesh should duplicate");
        assert_eq!(working.layout.stride, source.layout.stride);
        assert!(read_stretch(&working.vertex_data, &info)
            .iter()
            .all(|s| *s == Vec2::ONE));
    }

    #[test]
    fn test_unreadable_mesh_is_rejected() {
        let mut source = quad();
        source.readable = false;
        assert!(matches!(
            duplicate_for_runtime(&source),
            Err(DeformError::UnreadableMesh { .. })
        ));
    }

    #[test]
    fn test_layout_requires_aligned_position() {
        let layout = VertexLayout {
            stride: 16,
            attributes: vec![VertexAttributeDescriptor {
                attribute: VertexAttribute::Position,
                format: VertexFormat::Float32x3,
                offset: 2,
            }],
        };
        assert!(matches!(
            layout_info("Bad", &layout, 1),
            Err(DeformError::MisalignedAttribute { .. })
        ));

        let no_position = VertexLayout {
            stride: 8,
            attributes: Vec::new(),
        };
        assert!(matches!(
            layout_info("Empty", &no_position, 1),
            Err(DeformError::MissingAttribute { .. })
        ));
    }
}
