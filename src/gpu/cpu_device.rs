//! Host reference device
//!
//! Buffers live in host memory and dispatches run the reference kernel.
//! Used headless and in tests; behaves like the GPU backend, including
//! context loss.

use super::device_data::{BufferId, BufferRole, CommandList, DeformCommand, KernelDispatch};
use super::ComputeDevice;
use crate::config::LatticeConfig;
use crate::constants::lattice::HANDLE_STRIDE_BYTES;
use crate::error::{DeformError, DeformResult, OptionExt};
use crate::kernel::{cpu_kernel, KernelStage};
use crate::mesh::mesh_operations::read_f32;
use glam::Vec3;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct HostBuffer {
    label: String,
    role: BufferRole,
    data: Vec<u8>,
}

/// Compute device backed by host memory
pub struct CpuDevice {
    buffers: Mutex<FxHashMap<BufferId, HostBuffer>>,
    next_id: AtomicU64,
    group_size: u32,
    lost: AtomicBool,
    submissions: AtomicU64,
}

impl CpuDevice {
    pub fn new(group_size: u32) -> Self {
        Self {
            buffers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            group_size: group_size.max(1),
            lost: AtomicBool::new(false),
            submissions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &LatticeConfig) -> Self {
        Self::new(config.workgroup_size)
    }

    /// Drop every buffer and refuse further work, as a lost GPU context would
    pub fn lose_context(&self) {
        let dropped = {
            let mut buffers = self.buffers.lock();
            let count = buffers.len();
            buffers.clear();
            count
        };
        self.lost.store(true, Ordering::Release);
        log::warn!("[Cpu Device] Context lost, {} buffers dropped", dropped);
    }

    /// Accept work again after a context loss
    pub fn restore_context(&self) {
        self.lost.store(false, Ordering::Release);
        log::info!("[Cpu Device] Context restored");
    }

    /// Number of command lists executed so far
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Number of buffers currently allocated
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Label and role of a live buffer
    pub fn buffer_info(&self, id: BufferId) -> Option<(String, BufferRole)> {
        self.buffers
            .lock()
            .get(&id)
            .map(|buffer| (buffer.label.clone(), buffer.role))
    }

    fn ensure_alive(&self) -> DeformResult<()> {
        if self.is_lost() {
            Err(DeformError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn run_dispatch(
        buffers: &mut FxHashMap<BufferId, HostBuffer>,
        dispatch: &KernelDispatch,
    ) -> DeformResult<()> {
        // Pull the buffers out so the kernel can borrow them independently
        let mut vertex = buffers
            .remove(&dispatch.vertex_buffer)
            .ok_or_deform(|| DeformError::BufferNotFound(dispatch.vertex_buffer))?;

        let mut original = match buffers.remove(&dispatch.original_buffer) {
            Some(original) => original,
            None => {
                buffers.insert(dispatch.vertex_buffer, vertex);
                return Err(DeformError::BufferNotFound(dispatch.original_buffer));
            }
        };

        let lattice: Vec<Vec3> = if dispatch.stage == KernelStage::Accumulate {
            match dispatch.lattice_buffer.and_then(|id| buffers.get(&id)) {
                Some(upload) => upload
                    .data
                    .chunks_exact(HANDLE_STRIDE_BYTES as usize)
                    .map(|h| Vec3::new(read_f32(h, 0), read_f32(h, 4), read_f32(h, 8)))
                    .collect(),
                None => {
                    buffers.insert(dispatch.vertex_buffer, vertex);
                    buffers.insert(dispatch.original_buffer, original);
                    return Err(DeformError::BufferNotFound(
                        dispatch.lattice_buffer.unwrap_or(BufferId(0)),
                    ));
                }
            }
        } else {
            Vec::new()
        };

        cpu_kernel::run_stage(
            dispatch.stage,
            dispatch.feature,
            &dispatch.params,
            &mut vertex.data,
            &mut original.data,
            &lattice,
        );

        buffers.insert(dispatch.vertex_buffer, vertex);
        buffers.insert(dispatch.original_buffer, original);
        Ok(())
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::from_config(&LatticeConfig::default())
    }
}

fn write_into(buffer: &mut HostBuffer, id: BufferId, offset: u64, data: &[u8]) -> DeformResult<()> {
    let size = buffer.data.len() as u64;
    let end = offset + data.len() as u64;
    if end > size {
        return Err(DeformError::BufferOverflow {
            id,
            offset,
            len: data.len() as u64,
            size,
        });
    }
    buffer.data[offset as usize..end as usize].copy_from_slice(data);
    Ok(())
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_buffer(&self, label: &str, role: BufferRole, size: u64) -> DeformResult<BufferId> {
        self.ensure_alive()?;
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock().insert(
            id,
            HostBuffer {
                label: label.to_string(),
                role,
                data: vec![0; size as usize],
            },
        );
        log::trace!(
            "[Cpu Device] Created {:?} buffer '{}' ({} bytes) as {:?}",
            role,
            label,
            size,
            id
        );
        Ok(id)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> DeformResult<()> {
        self.ensure_alive()?;
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .get_mut(&id)
            .ok_or_deform(|| DeformError::BufferNotFound(id))?;
        write_into(buffer, id, offset, data)
    }

    fn read_buffer(&self, id: BufferId) -> DeformResult<Vec<u8>> {
        self.ensure_alive()?;
        self.buffers
            .lock()
            .get(&id)
            .map(|buffer| buffer.data.clone())
            .ok_or_deform(|| DeformError::BufferNotFound(id))
    }

    fn release_buffer(&self, id: BufferId) -> bool {
        self.buffers.lock().remove(&id).is_some()
    }

    fn is_buffer_alive(&self, id: BufferId) -> bool {
        !self.is_lost() && self.buffers.lock().contains_key(&id)
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.lock().get(&id).map(|buffer| buffer.data.len() as u64)
    }

    fn preferred_group_size(&self, _stage: KernelStage) -> u32 {
        self.group_size
    }

    fn submit(&self, commands: CommandList) -> DeformResult<()> {
        self.ensure_alive()?;
        let mut buffers = self.buffers.lock();

        for command in &commands.commands {
            let result = match command {
                DeformCommand::WriteBuffer { dst, offset, data } => match buffers.get_mut(dst) {
                    Some(buffer) => write_into(buffer, *dst, *offset, data),
                    None => Err(DeformError::BufferNotFound(*dst)),
                },
                DeformCommand::Dispatch(dispatch) => Self::run_dispatch(&mut buffers, dispatch),
            };

            // A command touching a freed buffer is skipped, like a GPU
            // validation error; the rest of the list still runs
            if let Err(e) = result {
                log::warn!("[Cpu Device] '{}': skipped command: {}", commands.label, e);
            }
        }

        self.submissions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelFeature, KernelParams};
    use crate::mesh::MeshInfo;

    fn info(vertex_count: u32) -> MeshInfo {
        MeshInfo {
            vertex_count,
            buffer_stride: 12,
            position_offset: 0,
            normal_offset: u32::MAX,
            tangent_offset: u32::MAX,
            stretch_offset: u32::MAX,
        }
    }

    #[test]
    fn test_buffers_are_zeroed_and_bounds_checked() {
        let device = CpuDevice::default();
        let id = device.create_buffer("Test", BufferRole::Vertex, 8).expect("create");
        assert_eq!(device.read_buffer(id).expect("read"), vec![0; 8]);

        device.write_buffer(id, 4, &[1, 2, 3, 4]).expect("write");
        assert_eq!(device.read_buffer(id).expect("read"), vec![0, 0, 0, 0, 1, 2, 3, 4]);

        let overflow = device.write_buffer(id, 6, &[0; 4]);
        assert!(matches!(overflow, Err(DeformError::BufferOverflow { size: 8, .. })));
    }

    #[test]
    fn test_release_reports_whether_buffer_existed() {
        let device = CpuDevice::default();
        let id = device.create_buffer("Test", BufferRole::Snapshot, 4).expect("create");
        assert!(device.is_buffer_alive(id));
        assert!(device.release_buffer(id));
        assert!(!device.release_buffer(id));
        assert!(!device.is_buffer_alive(id));
        assert!(matches!(device.read_buffer(id), Err(DeformError::BufferNotFound(_))));
    }

    #[test]
    fn test_submit_runs_commands_in_order() {
        let device = CpuDevice::default();
        let vertex = device.create_buffer("Vertex", BufferRole::Vertex, 12).expect("create");
        let original = device.create_buffer("Original", BufferRole::Snapshot, 12).expect("create");
        let upload = device.create_buffer("Upload", BufferRole::LatticeUpload, 96).expect("create");

        let params = KernelParams::for_mesh(&info(1));
        let copy = |stage| {
            DeformCommand::Dispatch(KernelDispatch {
                stage,
                feature: KernelFeature::Trilinear,
                params,
                vertex_buffer: vertex,
                original_buffer: original,
                lattice_buffer: Some(upload),
                groups: 1,
            })
        };

        let mut list = CommandList::new("Ordering");
        list.write_buffer(vertex, 0, bytemuck::bytes_of(&[1.0f32, 2.0, 3.0]).to_vec());
        list.commands.push(copy(KernelStage::Initialize));
        list.write_buffer(vertex, 0, vec![0; 12]);
        list.commands.push(copy(KernelStage::Reset));
        device.submit(list).expect("submit");

        let restored = device.read_buffer(vertex).expect("read");
        assert_eq!(restored, bytemuck::bytes_of(&[1.0f32, 2.0, 3.0]).to_vec());
        assert_eq!(device.submission_count(), 1);
    }

    #[test]
    fn test_lost_context_drops_buffers_and_rejects_work() {
        let device = CpuDevice::default();
        let id = device.create_buffer("Test", BufferRole::Vertex, 4).expect("create");
        device.lose_context();

        assert!(device.is_lost());
        assert_eq!(device.live_buffer_count(), 0);
        assert!(!device.release_buffer(id));
        assert!(matches!(device.submit(CommandList::new("Late")), Err(DeformError::DeviceLost)));
        assert!(matches!(
            device.create_buffer("Again", BufferRole::Vertex, 4),
            Err(DeformError::DeviceLost)
        ));

        device.restore_context();
        assert!(device.create_buffer("Again", BufferRole::Vertex, 4).is_ok());
    }
}
