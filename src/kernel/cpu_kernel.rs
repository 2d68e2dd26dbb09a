//! Host reference implementation of the deformation kernel
//!
//! Mirrors `lattice_deform.wgsl` stage for stage. Used by `CpuDevice` and as
//! the ground truth the GPU kernel is checked against.

use super::{KernelFeature, KernelParams, KernelStage};
use crate::constants::kernel::{DERIVATIVE_STEP, MIN_VECTOR_LENGTH, VOLUME_EPSILON};
use crate::mesh::mesh_operations::{
    read_vec2, read_vec3, read_vec4, write_vec2, write_vec3, write_vec4,
};
use glam::{IVec3, Mat3, Vec3, Vec4};
use rayon::prelude::*;

/// Execute one kernel stage over raw vertex buffers
///
/// `lattice` holds the uploaded handle offsets; only the accumulate stage
/// reads it.
pub fn run_stage(
    stage: KernelStage,
    feature: KernelFeature,
    params: &KernelParams,
    vertex_buffer: &mut [u8],
    original_buffer: &mut [u8],
    lattice: &[Vec3],
) {
    let bytes = (params.vertex_bytes() as usize)
        .min(vertex_buffer.len())
        .min(original_buffer.len());

    match stage {
        KernelStage::Initialize => {
            original_buffer[..bytes].copy_from_slice(&vertex_buffer[..bytes]);
        }
        KernelStage::Reset => {
            vertex_buffer[..bytes].copy_from_slice(&original_buffer[..bytes]);
        }
        KernelStage::Accumulate => accumulate(feature, params, vertex_buffer, lattice),
    }
}

/// Apply one lattice to every vertex in place
pub fn accumulate(
    feature: KernelFeature,
    params: &KernelParams,
    vertex_buffer: &mut [u8],
    lattice: &[Vec3],
) {
    let stride = params.buffer_stride as usize;
    let resolution = params.resolution();
    let needed = (resolution.x.max(0) * resolution.y.max(0) * resolution.z.max(0)) as usize;
    if stride == 0 || needed == 0 || lattice.len() < needed {
        log::warn!(
            "[Lattice Kernel] Skipping accumulate: {} offsets uploaded for resolution {:?}",
            lattice.len(),
            resolution
        );
        return;
    }

    let object_to_lattice = params.object_to_lattice();
    let lattice_to_object = params.lattice_to_object();
    let object_to_lattice3 = Mat3::from_mat4(object_to_lattice);
    let lattice_to_object3 = Mat3::from_mat4(lattice_to_object);

    vertex_buffer
        .par_chunks_mut(stride)
        .take(params.vertex_count as usize)
        .filter(|vertex| vertex.len() == stride)
        .for_each(|vertex| {
            let stride = params.buffer_stride;
            let position = read_vec3(vertex, stride, 0, params.position_offset);
            let local = object_to_lattice.transform_point3(position);

            let min = Vec3::splat(-VOLUME_EPSILON);
            let max = Vec3::splat(1.0 + VOLUME_EPSILON);
            if local.cmplt(min).any() || local.cmpgt(max).any() {
                return;
            }

            let sample = |p: Vec3| sample_offset(lattice, resolution, p, feature);
            let deformed = lattice_to_object.transform_point3(local + sample(local));
            write_vec3(vertex, stride, 0, params.position_offset, deformed);

            let jacobian =
                lattice_to_object3 * local_jacobian(&sample, local) * object_to_lattice3;

            let normal = KernelParams::has_channel(params.normal_offset)
                .then(|| read_vec3(vertex, stride, 0, params.normal_offset));
            let tangent = KernelParams::has_channel(params.tangent_offset)
                .then(|| read_vec4(vertex, stride, 0, params.tangent_offset));

            if let Some(stretch_offset) =
                Some(params.stretch_offset).filter(|o| KernelParams::has_channel(*o))
            {
                let (t, b) = surface_basis(normal, tangent);
                let gain = glam::Vec2::new((jacobian * t).length(), (jacobian * b).length());
                let stretch = read_vec2(vertex, stride, 0, stretch_offset);
                write_vec2(vertex, stride, 0, stretch_offset, stretch * gain);
            }

            if let Some(n) = normal {
                let transformed = transform_normal(jacobian, n);
                write_vec3(vertex, stride, 0, params.normal_offset, transformed);
            }

            if let Some(t) = tangent {
                let direction = safe_normalize(jacobian * t.truncate(), t.truncate());
                write_vec4(vertex, stride, 0, params.tangent_offset, direction.extend(t.w));
            }
        });
}

// ============================================================================
// SAMPLING
// ============================================================================

/// Offset of a handle, with indices clamped into the grid
#[inline]
pub fn handle_at(lattice: &[Vec3], resolution: IVec3, x: i32, y: i32, z: i32) -> Vec3 {
    let x = x.clamp(0, resolution.x - 1);
    let y = y.clamp(0, resolution.y - 1);
    let z = z.clamp(0, resolution.z - 1);
    lattice[(x + resolution.x * (y + resolution.y * z)) as usize]
}

/// Interpolated handle offset at a point of the unit cube
pub fn sample_offset(
    lattice: &[Vec3],
    resolution: IVec3,
    local: Vec3,
    feature: KernelFeature,
) -> Vec3 {
    let cells = (resolution - IVec3::ONE).as_vec3();
    let grid = local.clamp(Vec3::ZERO, Vec3::ONE) * cells;
    let base = grid
        .floor()
        .as_ivec3()
        .clamp(IVec3::ZERO, resolution - IVec3::splat(2));
    let t = grid - base.as_vec3();

    match feature {
        KernelFeature::Trilinear => {
            let mut result = Vec3::ZERO;
            for dz in 0..2 {
                for dy in 0..2 {
                    for dx in 0..2 {
                        let w = linear_weight(t.x, dx)
                            * linear_weight(t.y, dy)
                            * linear_weight(t.z, dz);
                        let corner = base + IVec3::new(dx, dy, dz);
                        result += w * handle_at(lattice, resolution, corner.x, corner.y, corner.z);
                    }
                }
            }
            result
        }
        KernelFeature::Tricubic => {
            let wx = catmull_rom_weights(t.x);
            let wy = catmull_rom_weights(t.y);
            let wz = catmull_rom_weights(t.z);
            let mut result = Vec3::ZERO;
            for dz in 0..4 {
                for dy in 0..4 {
                    for dx in 0..4 {
                        let w = wx[dx as usize] * wy[dy as usize] * wz[dz as usize];
                        result += w * handle_at(
                            lattice,
                            resolution,
                            base.x + dx - 1,
                            base.y + dy - 1,
                            base.z + dz - 1,
                        );
                    }
                }
            }
            result
        }
    }
}

#[inline]
fn linear_weight(t: f32, corner: i32) -> f32 {
    if corner == 1 {
        t
    } else {
        1.0 - t
    }
}

/// Catmull-Rom weights for the four samples around a cell
pub fn catmull_rom_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

// ============================================================================
// DIFFERENTIALS
// ============================================================================

/// Jacobian of `p + offset(p)` in lattice space, by central differences
pub fn local_jacobian(sample: &impl Fn(Vec3) -> Vec3, local: Vec3) -> Mat3 {
    let h = DERIVATIVE_STEP;
    let column =
        |axis: Vec3| axis + (sample(local + axis * h) - sample(local - axis * h)) / (2.0 * h);
    Mat3::from_cols(column(Vec3::X), column(Vec3::Y), column(Vec3::Z))
}

/// Transform a normal by the cofactor of the Jacobian
pub fn transform_normal(jacobian: Mat3, normal: Vec3) -> Vec3 {
    let (c0, c1, c2) = (jacobian.x_axis, jacobian.y_axis, jacobian.z_axis);
    let cofactor = Mat3::from_cols(c1.cross(c2), c2.cross(c0), c0.cross(c1));
    let sign = if c0.dot(c1.cross(c2)) < 0.0 { -1.0 } else { 1.0 };
    safe_normalize(cofactor * normal * sign, normal)
}

/// Tangent and bitangent directions used to measure stretch
pub fn surface_basis(normal: Option<Vec3>, tangent: Option<Vec4>) -> (Vec3, Vec3) {
    let n = safe_normalize(normal.unwrap_or(Vec3::Z), Vec3::Z);

    let helper_tangent = || {
        let helper = if n.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
        helper.cross(n).normalize()
    };

    let mut t = match tangent {
        Some(t) if t.truncate().length() > MIN_VECTOR_LENGTH => t.truncate().normalize(),
        _ => helper_tangent(),
    };
    let mut b = n.cross(t);
    if b.length() < MIN_VECTOR_LENGTH {
        t = helper_tangent();
        b = n.cross(t);
    }
    (t, b.normalize())
}

#[inline]
fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    let length = v.length();
    if length > MIN_VECTOR_LENGTH {
        v / length
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::mesh_operations::{
        build_mesh, duplicate_for_runtime, mesh_info, read_normals, read_positions, read_stretch,
    };
    use crate::transform::LatticeTransformPair;
    use glam::Mat4;

    fn unit_pair() -> LatticeTransformPair {
        LatticeTransformPair {
            object_to_lattice: Mat4::IDENTITY,
            lattice_to_object: Mat4::IDENTITY,
        }
    }

    /// 2x2x2 lattice with the +x face pushed by `push`
    fn face_lattice(push: Vec3) -> Vec<Vec3> {
        let mut offsets = vec![Vec3::ZERO; 8];
        for index in [1, 3, 5, 7] {
            offsets[index] = push;
        }
        offsets
    }

    #[test]
    fn test_trilinear_interpolates_face_push() {
        let lattice = face_lattice(Vec3::new(1.0, 0.0, 0.0));
        let resolution = IVec3::splat(2);
        let local = Vec3::new(0.25, 0.7, 0.1);
        let sampled = sample_offset(&lattice, resolution, local, KernelFeature::Trilinear);
        assert!(sampled.abs_diff_eq(Vec3::new(0.25, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn test_uniform_offset_is_pure_translation_for_both_features() {
        let resolution = IVec3::new(4, 3, 5);
        let lattice = vec![Vec3::new(0.1, -0.2, 0.3); 60];
        for feature in [KernelFeature::Trilinear, KernelFeature::Tricubic] {
            let sampled = sample_offset(&lattice, resolution, Vec3::new(0.33, 0.9, 0.05), feature);
            assert!(sampled.abs_diff_eq(Vec3::new(0.1, -0.2, 0.3), 1e-5));
        }
    }

    #[test]
    fn test_tricubic_differs_from_trilinear_on_curved_field() {
        let resolution = IVec3::splat(4);
        let mut lattice = vec![Vec3::ZERO; 64];
        lattice[1 + 4 * (1 + 4)] = Vec3::Y;
        let point = Vec3::new(0.45, 0.4, 0.4);
        let linear = sample_offset(&lattice, resolution, point, KernelFeature::Trilinear);
        let cubic = sample_offset(&lattice, resolution, point, KernelFeature::Tricubic);
        assert!((linear - cubic).length() > 1e-3);
    }

    #[test]
    fn test_catmull_rom_weights_partition_unity() {
        for t in [0.0, 0.2, 0.5, 0.9, 1.0] {
            let sum: f32 = catmull_rom_weights(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert_eq!(catmull_rom_weights(0.0), [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_accumulate_stretches_and_keeps_outside_vertices() {
        let source = build_mesh(
            "Strip",
            &[Vec3::new(0.5, 0.5, 0.5), Vec3::new(2.0, 0.5, 0.5)],
            Some(&[Vec3::Y, Vec3::Y]),
            Some(&[Vec4::new(1.0, 0.0, 0.0, 1.0); 2]),
        );
        let mut working = duplicate_for_runtime(&source).expect("readable mesh");
        let info = mesh_info(&working).expect("valid layout");
        let params = KernelParams::for_lattice(&info, &unit_pair(), IVec3::splat(2));

        accumulate(
            KernelFeature::Trilinear,
            &params,
            &mut working.vertex_data,
            &face_lattice(Vec3::new(1.0, 0.0, 0.0)),
        );

        let positions = read_positions(&working.vertex_data, &info);
        assert!(positions[0].abs_diff_eq(Vec3::new(1.0, 0.5, 0.5), 1e-5));
        assert_eq!(positions[1], Vec3::new(2.0, 0.5, 0.5));

        // x doubles, so the tangent direction stretches by 2 and the bitangent is unchanged
        let stretch = read_stretch(&working.vertex_data, &info);
        assert!((stretch[0].x - 2.0).abs() < 1e-3);
        assert!((stretch[0].y - 1.0).abs() < 1e-3);
        assert_eq!(stretch[1], glam::Vec2::ONE);

        let normals = read_normals(&working.vertex_data, &info);
        assert!(normals[0].abs_diff_eq(Vec3::Y, 1e-4));
    }

    #[test]
    fn test_shear_tilts_normals() {
        let jacobian = Mat3::from_cols(Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Z);
        let normal = transform_normal(jacobian, Vec3::Y);
        // surface y = 0 sheared along x keeps its normal; the x = 0 plane tilts
        assert!(normal.abs_diff_eq(Vec3::Y, 1e-6));
        let tilted = transform_normal(jacobian, Vec3::X);
        assert!(tilted.abs_diff_eq(Vec3::new(1.0, -1.0, 0.0).normalize(), 1e-6));
    }

    #[test]
    fn test_reset_and_initialize_copy_vertex_bytes() {
        let mesh = build_mesh("Tri", &[Vec3::X, Vec3::Y, Vec3::Z], None, None);
        let info = mesh_info(&mesh).expect("valid layout");
        let params = KernelParams::for_mesh(&info);

        let mut working = mesh.vertex_data.clone();
        let mut original = vec![0u8; working.len()];
        run_stage(
            KernelStage::Initialize,
            KernelFeature::Trilinear,
            &params,
            &mut working,
            &mut original,
            &[],
        );
        assert_eq!(original, working);

        working.iter_mut().for_each(|b| *b = 0xAB);
        run_stage(
            KernelStage::Reset,
            KernelFeature::Trilinear,
            &params,
            &mut working,
            &mut original,
            &[],
        );
        assert_eq!(working, mesh.vertex_data);
    }
}
