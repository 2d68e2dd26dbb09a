//! Compute devices
//!
//! The dispatcher records `CommandList`s and hands them to a `ComputeDevice`.
//! `CpuDevice` runs them with the host reference kernel; `WgpuDevice` encodes
//! them into a single ordered wgpu submission.

pub mod cpu_device;
pub mod device_data;
#[cfg(feature = "wgpu-backend")]
pub mod error_recovery;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_device;

pub use cpu_device::CpuDevice;
pub use device_data::{BufferId, BufferRole, CommandList, DeformCommand, KernelDispatch};
#[cfg(feature = "wgpu-backend")]
pub use error_recovery::DeviceLossMonitor;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_device::WgpuDevice;

use crate::error::DeformResult;
use crate::kernel::KernelStage;

/// A device able to hold vertex buffers and run the deformation kernel
pub trait ComputeDevice: Send + Sync {
    /// Backend name for diagnostics
    fn name(&self) -> &str;

    /// Allocate a zeroed buffer
    fn create_buffer(&self, label: &str, role: BufferRole, size: u64) -> DeformResult<BufferId>;

    /// Upload bytes immediately, outside any command list
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> DeformResult<()>;

    /// Blocking readback of the whole buffer
    fn read_buffer(&self, id: BufferId) -> DeformResult<Vec<u8>>;

    /// Free a buffer; returns false when it was already gone
    fn release_buffer(&self, id: BufferId) -> bool;

    fn is_buffer_alive(&self, id: BufferId) -> bool;

    fn buffer_size(&self, id: BufferId) -> Option<u64>;

    /// Threads per group the kernel runs with for a stage
    fn preferred_group_size(&self, stage: KernelStage) -> u32;

    /// Execute a command list in order
    fn submit(&self, commands: CommandList) -> DeformResult<()>;

    /// The device context is gone; every buffer is invalid
    fn is_lost(&self) -> bool;
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn write_buffer(&mut self, dst: BufferId, offset: u64, data: Vec<u8>) {
        self.commands.push(DeformCommand::WriteBuffer { dst, offset, data });
    }

    pub fn dispatch(&mut self, dispatch: KernelDispatch) {
        self.commands.push(DeformCommand::Dispatch(dispatch));
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeformCommand::Dispatch(_)))
            .count()
    }
}
