// Lattice Deform - Data-Oriented Programming (DOP) Architecture
//
// Free-form lattice deformation of mesh vertex buffers on a compute device.
// - *_data modules hold plain data, *_operations modules hold the functions
// - Devices (wgpu or the host reference device) run one ordered command list
//   per dispatch stage
// - LatticeSystem ties the scene, dispatcher and lifecycle hooks together

// Constants module
pub mod constants;

// Core modules
pub mod config;
pub mod error;

// Data model
pub mod lattice;
pub mod mesh;
pub mod target;
pub mod transform;

// GPU and kernel
pub mod gpu;
pub mod kernel;

// Frame processing
pub mod dispatch;
pub mod scene;
pub mod schedule;
pub mod system;

pub use config::LatticeConfig;
pub use dispatch::{DispatchReport, FrameContext, LatticeDispatcher};
pub use error::{DeformError, DeformResult, OptionExt, TargetFault};
pub use gpu::{BufferId, BufferRole, CommandList, ComputeDevice, CpuDevice};
#[cfg(feature = "wgpu-backend")]
pub use gpu::WgpuDevice;
pub use kernel::{KernelFeature, KernelParams, KernelStage, LATTICE_KERNEL_WGSL};
pub use lattice::{Lattice, LatticeGrid, LatticeHandle, LatticeId};
pub use mesh::{Mesh, MeshBufferSet, MeshInfo, VertexAttribute, VertexFormat, VertexLayout};
pub use scene::DeformScene;
pub use schedule::{
    install_lattice_stages, uninstall_lattice_stages, FrameSchedule, LatticeHost, StageLabel,
};
pub use system::LatticeSystem;
pub use target::{
    AnyTarget, DeformationTarget, MeshBinding, MeshSlot, MeshTarget, SkinnedDeformationTarget,
    SkinnedMeshBinding, SkinnedMeshTarget, SkinnedVertexBuffer, TargetId, TargetKind, TargetState,
};
pub use transform::{BonePose, LatticeTransformPair};
