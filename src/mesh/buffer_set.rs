//! Working and snapshot buffers of one deformed mesh
//!
//! The working buffer is what the renderer draws. The snapshot holds the
//! undeformed data and is copied back over the working buffer at the start
//! of every frame, so deformation never accumulates across frames.

use super::mesh_data::{Mesh, MeshInfo};
use super::mesh_operations::{duplicate_for_runtime, mesh_info};
use crate::error::{DeformError, DeformResult};
use crate::gpu::{BufferId, BufferRole, CommandList, ComputeDevice, KernelDispatch};
use crate::kernel::{dispatch_group_count, KernelFeature, KernelParams, KernelStage};
use std::sync::Arc;

/// Device buffers owned by an active target
///
/// Both buffers are released on `release` or drop.
pub struct MeshBufferSet {
    device: Arc<dyn ComputeDevice>,
    working_mesh: Option<Arc<Mesh>>,
    info: MeshInfo,
    vertex_buffer: Option<BufferId>,
    original_buffer: Option<BufferId>,
}

impl MeshBufferSet {
    /// Duplicate the source mesh and upload it as working and snapshot buffers
    ///
    /// Fails without leaving buffers behind when there is no source mesh, the
    /// source cannot be read, or its layout is unusable.
    pub fn initialize(
        device: Arc<dyn ComputeDevice>,
        target_name: &str,
        source: Option<&Arc<Mesh>>,
    ) -> DeformResult<Self> {
        let source = source.ok_or_else(|| DeformError::MissingSourceMesh {
            target: target_name.to_string(),
        })?;

        let mut working = duplicate_for_runtime(source)?;
        let info = mesh_info(&working)?;
        let size = working.vertex_data.len() as u64;

        // Buffers are owned by `set` from here, so an early return releases them
        let mut set = Self {
            device: device.clone(),
            working_mesh: None,
            info,
            vertex_buffer: None,
            original_buffer: None,
        };

        let vertex =
            device.create_buffer(&format!("{} Vertex", working.name), BufferRole::Vertex, size)?;
        set.vertex_buffer = Some(vertex);
        device.write_buffer(vertex, 0, &working.vertex_data)?;

        let original = device.create_buffer(
            &format!("{} Original", working.name),
            BufferRole::Snapshot,
            size,
        )?;
        set.original_buffer = Some(original);

        let mut commands = CommandList::new(format!("{} Initialize", working.name));
        commands.dispatch(set.stage_dispatch(KernelStage::Initialize, vertex, original));
        device.submit(commands)?;

        working.vertex_buffer = Some(vertex);
        log::debug!(
            "[Lattice Setup] '{}' ready: {} vertices, stride {}",
            working.name,
            info.vertex_count,
            info.buffer_stride
        );
        set.working_mesh = Some(Arc::new(working));
        Ok(set)
    }

    fn stage_dispatch(
        &self,
        stage: KernelStage,
        vertex: BufferId,
        original: BufferId,
    ) -> KernelDispatch {
        KernelDispatch {
            stage,
            feature: KernelFeature::default(),
            params: KernelParams::for_mesh(&self.info),
            vertex_buffer: vertex,
            original_buffer: original,
            lattice_buffer: None,
            groups: dispatch_group_count(
                self.info.vertex_count,
                self.device.preferred_group_size(stage),
            ),
        }
    }

    /// Both buffers are allocated and alive on the device
    pub fn is_valid(&self) -> bool {
        match (self.vertex_buffer, self.original_buffer) {
            (Some(vertex), Some(original)) => {
                self.device.is_buffer_alive(vertex) && self.device.is_buffer_alive(original)
            }
            _ => false,
        }
    }

    /// The reset dispatch for this set, if it is still allocated
    pub fn reset_command(&self) -> Option<KernelDispatch> {
        match (self.vertex_buffer, self.original_buffer) {
            (Some(vertex), Some(original)) => {
                Some(self.stage_dispatch(KernelStage::Reset, vertex, original))
            }
            _ => None,
        }
    }

    /// Copy the snapshot back over the working buffer right away
    pub fn reset(&self) -> DeformResult<()> {
        let Some(dispatch) = self.reset_command() else {
            return Ok(());
        };
        let mut commands = CommandList::new("Mesh Reset");
        commands.dispatch(dispatch);
        self.device.submit(commands)
    }

    /// Free both device buffers and forget the working mesh
    ///
    /// Returns whether anything was released; calling it again is a no-op.
    pub fn release(&mut self) -> bool {
        let mut released = false;
        if let Some(vertex) = self.vertex_buffer.take() {
            self.device.release_buffer(vertex);
            released = true;
        }
        if let Some(original) = self.original_buffer.take() {
            self.device.release_buffer(original);
            released = true;
        }
        if let Some(mesh) = self.working_mesh.take() {
            log::debug!("[Lattice Setup] Released buffers of '{}'", mesh.name);
        }
        released
    }

    /// Runtime copy the renderer should draw while deformation is active
    pub fn working_mesh(&self) -> Option<&Arc<Mesh>> {
        self.working_mesh.as_ref()
    }

    pub fn info(&self) -> &MeshInfo {
        &self.info
    }

    pub fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertex_buffer
    }

    pub fn original_buffer(&self) -> Option<BufferId> {
        self.original_buffer
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    /// Blocking readback of the working vertex data
    pub fn read_working(&self) -> DeformResult<Vec<u8>> {
        let vertex = self
            .vertex_buffer
            .ok_or(DeformError::BufferNotFound(BufferId(0)))?;
        self.device.read_buffer(vertex)
    }

    /// Blocking readback of the snapshot
    pub fn read_original(&self) -> DeformResult<Vec<u8>> {
        let original = self
            .original_buffer
            .ok_or(DeformError::BufferNotFound(BufferId(0)))?;
        self.device.read_buffer(original)
    }
}

impl Drop for MeshBufferSet {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for MeshBufferSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshBufferSet")
            .field("device", &self.device.name())
            .field("info", &self.info)
            .field("vertex_buffer", &self.vertex_buffer)
            .field("original_buffer", &self.original_buffer)
            .finish()
    }
}
