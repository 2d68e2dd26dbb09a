//! Deformation kernel contract
//!
//! Three callable stages share one parameter block:
//! 0. `Initialize` copies the working buffer into the original snapshot
//! 1. `Accumulate` applies one lattice on top of the current vertex data
//! 2. `Reset` copies the snapshot back over the working buffer
//!
//! The WGSL module and the host reference kernel implement the same math.

pub mod cpu_kernel;

use crate::constants::kernel::NO_ATTRIBUTE;
use crate::mesh::MeshInfo;
use crate::transform::LatticeTransformPair;
use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Mat4};
use static_assertions::const_assert_eq;

/// WGSL source of the deformation kernel
pub const LATTICE_KERNEL_WGSL: &str = include_str!("lattice_deform.wgsl");

/// Kernel stage, numbered as the compute contract defines them
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelStage {
    Initialize = 0,
    Accumulate = 1,
    Reset = 2,
}

/// Sampling feature switch for the accumulate stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelFeature {
    #[default]
    Trilinear,
    Tricubic,
}

impl KernelFeature {
    pub fn from_quality(high_quality: bool) -> Self {
        if high_quality {
            KernelFeature::Tricubic
        } else {
            KernelFeature::Trilinear
        }
    }

    /// Entry point name in `lattice_deform.wgsl`
    pub fn accumulate_entry_point(self) -> &'static str {
        match self {
            KernelFeature::Trilinear => "accumulate_trilinear",
            KernelFeature::Tricubic => "accumulate_tricubic",
        }
    }
}

impl KernelStage {
    pub fn entry_point(self, feature: KernelFeature) -> &'static str {
        match self {
            KernelStage::Initialize => "initialize",
            KernelStage::Accumulate => feature.accumulate_entry_point(),
            KernelStage::Reset => "reset",
        }
    }
}

/// Kernel parameter block
/// Must match `KernelParams` in lattice_deform.wgsl exactly
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    /// Object space to lattice unit cube (4x4, column-major)
    pub object_to_lattice: [[f32; 4]; 4],

    /// Lattice unit cube back to object space (4x4, column-major)
    pub lattice_to_object: [[f32; 4]; 4],

    /// Handles per axis
    pub lattice_resolution: [i32; 3],

    pub vertex_count: u32,
    pub buffer_stride: u32,
    pub position_offset: u32,
    pub normal_offset: u32,
    pub tangent_offset: u32,
    pub stretch_offset: u32,

    /// Padding to align to 16 bytes
    pub _padding: [u32; 3],
}

const_assert_eq!(std::mem::size_of::<KernelParams>(), 176);

impl KernelParams {
    /// Parameters for the copy stages, with identity transforms
    pub fn for_mesh(info: &MeshInfo) -> Self {
        Self {
            object_to_lattice: Mat4::IDENTITY.to_cols_array_2d(),
            lattice_to_object: Mat4::IDENTITY.to_cols_array_2d(),
            lattice_resolution: [0; 3],
            vertex_count: info.vertex_count,
            buffer_stride: info.buffer_stride,
            position_offset: info.position_offset,
            normal_offset: info.normal_offset,
            tangent_offset: info.tangent_offset,
            stretch_offset: info.stretch_offset,
            _padding: [0; 3],
        }
    }

    /// Parameters for one accumulate dispatch
    pub fn for_lattice(info: &MeshInfo, pair: &LatticeTransformPair, resolution: IVec3) -> Self {
        Self {
            object_to_lattice: pair.object_to_lattice.to_cols_array_2d(),
            lattice_to_object: pair.lattice_to_object.to_cols_array_2d(),
            lattice_resolution: resolution.to_array(),
            ..Self::for_mesh(info)
        }
    }

    pub fn object_to_lattice(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.object_to_lattice)
    }

    pub fn lattice_to_object(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.lattice_to_object)
    }

    pub fn resolution(&self) -> IVec3 {
        IVec3::from_array(self.lattice_resolution)
    }

    pub fn has_channel(offset: u32) -> bool {
        offset != NO_ATTRIBUTE
    }

    /// Bytes covered by `vertex_count` vertices
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_count as u64 * self.buffer_stride as u64
    }
}

/// Number of groups needed to cover every vertex
pub fn dispatch_group_count(vertex_count: u32, group_size: u32) -> u32 {
    vertex_count.div_ceil(group_size.max(1))
}
