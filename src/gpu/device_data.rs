//! Compute device data structures - Pure DOP
//!
//! NO METHODS. Just data.
//! Handles and recorded commands shared by every device backend.

use crate::kernel::{KernelFeature, KernelParams, KernelStage};

/// Opaque handle to a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// What a buffer is used for; selects its usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Working vertex data, read by the renderer
    Vertex,
    /// Original vertex data restored before every frame
    Snapshot,
    /// Shared upload area for lattice handle offsets
    LatticeUpload,
}

/// One recorded kernel invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelDispatch {
    pub stage: KernelStage,
    pub feature: KernelFeature,
    pub params: KernelParams,
    pub vertex_buffer: BufferId,
    pub original_buffer: BufferId,
    /// Shared upload buffer; only the accumulate stage reads it
    pub lattice_buffer: Option<BufferId>,
    /// Groups along x
    pub groups: u32,
}

/// Ordered device work
#[derive(Debug, Clone, PartialEq)]
pub enum DeformCommand {
    /// Upload bytes into a buffer, ordered with the surrounding dispatches
    WriteBuffer {
        dst: BufferId,
        offset: u64,
        data: Vec<u8>,
    },
    Dispatch(KernelDispatch),
}

/// Commands submitted together; execution order equals list order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandList {
    pub label: String,
    pub commands: Vec<DeformCommand>,
}
