//! wgpu compute backend
//!
//! Every command list becomes one encoder and one queue submission. Uploads
//! and parameter blocks are packed into a single staging buffer and copied
//! into place inside the encoder right before the dispatch that reads them,
//! so the shared lattice upload buffer can be rewritten between dispatches.

use super::device_data::{BufferId, BufferRole, CommandList, DeformCommand, KernelDispatch};
use super::error_recovery::{DeviceLossMonitor, GpuResultExt};
use super::ComputeDevice;
use crate::constants::kernel::WGSL_WORKGROUP_SIZE;
use crate::error::{DeformError, DeformResult, OptionExt};
use crate::kernel::{KernelFeature, KernelParams, KernelStage, LATTICE_KERNEL_WGSL};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wgpu::util::DeviceExt;

const PARAMS_SIZE: u64 = std::mem::size_of::<KernelParams>() as u64;

struct GpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    /// Size requested by the caller; the allocation may be padded
    size: u64,
    role: BufferRole,
    /// Owned by another system; never destroyed here
    imported: bool,
}

/// The four kernel entry points
struct KernelPipelines {
    initialize: wgpu::ComputePipeline,
    reset: wgpu::ComputePipeline,
    accumulate_trilinear: wgpu::ComputePipeline,
    accumulate_tricubic: wgpu::ComputePipeline,
}

impl KernelPipelines {
    fn select(&self, stage: KernelStage, feature: KernelFeature) -> &wgpu::ComputePipeline {
        match (stage, feature) {
            (KernelStage::Initialize, _) => &self.initialize,
            (KernelStage::Reset, _) => &self.reset,
            (KernelStage::Accumulate, KernelFeature::Trilinear) => &self.accumulate_trilinear,
            (KernelStage::Accumulate, KernelFeature::Tricubic) => &self.accumulate_tricubic,
        }
    }
}

/// Compute device running the WGSL deformation kernel
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: KernelPipelines,
    params_buffer: wgpu::Buffer,
    /// Bound in place of the upload buffer for the copy stages
    empty_lattice: wgpu::Buffer,
    buffers: Mutex<FxHashMap<BufferId, GpuBuffer>>,
    next_id: AtomicU64,
    monitor: DeviceLossMonitor,
}

#[inline]
fn align4(size: u64) -> u64 {
    (size + wgpu::COPY_BUFFER_ALIGNMENT - 1) & !(wgpu::COPY_BUFFER_ALIGNMENT - 1)
}

fn usage_for(role: BufferRole) -> wgpu::BufferUsages {
    match role {
        BufferRole::Vertex => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        }
        BufferRole::Snapshot | BufferRole::LatticeUpload => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        }
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl WgpuDevice {
    /// Build the kernel pipelines on an existing device
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> DeformResult<Self> {
        let monitor = DeviceLossMonitor::install(&device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Lattice Deform Kernel"),
            source: wgpu::ShaderSource::Wgsl(LATTICE_KERNEL_WGSL.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Lattice Deform Bind Group Layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, false),
                storage_entry(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(PARAMS_SIZE),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Lattice Deform Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |stage: KernelStage, feature: KernelFeature| {
            let entry_point = stage.entry_point(feature);
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
            })
        };

        let pipelines = KernelPipelines {
            initialize: pipeline(KernelStage::Initialize, KernelFeature::Trilinear),
            reset: pipeline(KernelStage::Reset, KernelFeature::Trilinear),
            accumulate_trilinear: pipeline(KernelStage::Accumulate, KernelFeature::Trilinear),
            accumulate_tricubic: pipeline(KernelStage::Accumulate, KernelFeature::Tricubic),
        };

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Lattice Kernel Params"),
            size: PARAMS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let empty_lattice = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Lattice Upload Placeholder"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        log::info!("[Wgpu Device] Lattice kernel pipelines created");

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipelines,
            params_buffer,
            empty_lattice,
            buffers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            monitor,
        })
    }

    /// Create a device without a surface
    pub fn new_headless() -> DeformResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_deform(|| DeformError::GpuOperationFailed {
            operation: "request_adapter".to_string(),
            error: "no compatible adapter".to_string(),
        })?;

        log::info!("[Wgpu Device] Using adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Lattice Deform Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .gpu_context("request_device")?;

        Self::new(Arc::new(device), Arc::new(queue))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn loss_monitor(&self) -> &DeviceLossMonitor {
        &self.monitor
    }

    /// Register a buffer owned by another system, such as skinning output
    ///
    /// The buffer needs STORAGE usage. Releasing the id only forgets it.
    pub fn import_buffer(&self, buffer: Arc<wgpu::Buffer>, role: BufferRole) -> BufferId {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let size = buffer.size();
        self.buffers.lock().insert(
            id,
            GpuBuffer {
                buffer,
                size,
                role,
                imported: true,
            },
        );
        id
    }

    /// The wgpu buffer behind an id, for binding as a vertex stream
    pub fn raw_buffer(&self, id: BufferId) -> Option<Arc<wgpu::Buffer>> {
        self.buffers.lock().get(&id).map(|b| b.buffer.clone())
    }

    fn encode_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &FxHashMap<BufferId, GpuBuffer>,
        staging: &wgpu::Buffer,
        params_offset: u64,
        dispatch: &KernelDispatch,
    ) -> DeformResult<()> {
        let vertex = buffers
            .get(&dispatch.vertex_buffer)
            .ok_or_deform(|| DeformError::BufferNotFound(dispatch.vertex_buffer))?;
        let original = buffers
            .get(&dispatch.original_buffer)
            .ok_or_deform(|| DeformError::BufferNotFound(dispatch.original_buffer))?;
        let lattice: &wgpu::Buffer = match dispatch.lattice_buffer {
            Some(id) => buffers
                .get(&id)
                .ok_or_deform(|| DeformError::BufferNotFound(id))?
                .buffer
                .as_ref(),
            None => &self.empty_lattice,
        };

        encoder.copy_buffer_to_buffer(staging, params_offset, &self.params_buffer, 0, PARAMS_SIZE);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lattice Deform Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: vertex.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: original.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: lattice.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.stage.entry_point(dispatch.feature)),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(self.pipelines.select(dispatch.stage, dispatch.feature));
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(dispatch.groups, 1, 1);
        Ok(())
    }
}

impl ComputeDevice for WgpuDevice {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&self, label: &str, role: BufferRole, size: u64) -> DeformResult<BufferId> {
        self.monitor.ensure_alive()?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: align4(size.max(wgpu::COPY_BUFFER_ALIGNMENT)),
            usage: usage_for(role),
            mapped_at_creation: false,
        });

        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock().insert(
            id,
            GpuBuffer {
                buffer: Arc::new(buffer),
                size,
                role,
                imported: false,
            },
        );
        log::trace!("[Wgpu Device] Created {:?} buffer '{}' ({} bytes)", role, label, size);
        Ok(id)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> DeformResult<()> {
        self.monitor.ensure_alive()?;
        let buffers = self.buffers.lock();
        let target = buffers.get(&id).ok_or_deform(|| DeformError::BufferNotFound(id))?;
        if offset + data.len() as u64 > target.size || offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(DeformError::BufferOverflow {
                id,
                offset,
                len: data.len() as u64,
                size: target.size,
            });
        }

        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&target.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align4(data.len() as u64) as usize, 0);
            self.queue.write_buffer(&target.buffer, offset, &padded);
        }
        Ok(())
    }

    fn read_buffer(&self, id: BufferId) -> DeformResult<Vec<u8>> {
        self.monitor.ensure_alive()?;
        let (source, size) = {
            let buffers = self.buffers.lock();
            let entry = buffers.get(&id).ok_or_deform(|| DeformError::BufferNotFound(id))?;
            (entry.buffer.clone(), entry.size)
        };
        let padded = align4(size.max(wgpu::COPY_BUFFER_ALIGNMENT));

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Lattice Readback"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Lattice Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source, 0, &readback, 0, padded.min(source.size()));
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .gpu_context("readback channel")?
            .gpu_context("map_async")?;

        let data = {
            let mapped = slice.get_mapped_range();
            mapped[..size as usize].to_vec()
        };
        readback.unmap();
        Ok(data)
    }

    fn release_buffer(&self, id: BufferId) -> bool {
        match self.buffers.lock().remove(&id) {
            Some(entry) => {
                if !entry.imported {
                    entry.buffer.destroy();
                }
                log::trace!("[Wgpu Device] Released {:?} buffer {:?}", entry.role, id);
                true
            }
            None => false,
        }
    }

    fn is_buffer_alive(&self, id: BufferId) -> bool {
        !self.monitor.is_device_lost() && self.buffers.lock().contains_key(&id)
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.lock().get(&id).map(|b| b.size)
    }

    fn preferred_group_size(&self, _stage: KernelStage) -> u32 {
        WGSL_WORKGROUP_SIZE
    }

    fn submit(&self, commands: CommandList) -> DeformResult<()> {
        self.monitor.ensure_alive()?;
        if commands.is_empty() {
            return Ok(());
        }

        // Pack every upload and parameter block, in command order
        let mut staging_data: Vec<u8> = Vec::new();
        let mut staged_offsets = Vec::with_capacity(commands.commands.len());
        for command in &commands.commands {
            let offset = staging_data.len() as u64;
            match command {
                DeformCommand::WriteBuffer { data, .. } => staging_data.extend_from_slice(data),
                DeformCommand::Dispatch(dispatch) => {
                    staging_data.extend_from_slice(bytemuck::bytes_of(&dispatch.params))
                }
            }
            staging_data.resize(align4(staging_data.len() as u64) as usize, 0);
            staged_offsets.push(offset);
        }

        let staging = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Lattice Command Staging"),
                contents: &staging_data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(commands.label.as_str()),
            });

        {
            let buffers = self.buffers.lock();
            for (command, &staged) in commands.commands.iter().zip(&staged_offsets) {
                let result = match command {
                    DeformCommand::WriteBuffer { dst, offset, data } => match buffers.get(dst) {
                        Some(target) => {
                            let len = align4(data.len() as u64);
                            if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
                                || offset + len > target.buffer.size()
                            {
                                Err(DeformError::BufferOverflow {
                                    id: *dst,
                                    offset: *offset,
                                    len,
                                    size: target.size,
                                })
                            } else {
                                if len > 0 {
                                    encoder.copy_buffer_to_buffer(
                                        &staging,
                                        staged,
                                        &target.buffer,
                                        *offset,
                                        len,
                                    );
                                }
                                Ok(())
                            }
                        }
                        None => Err(DeformError::BufferNotFound(*dst)),
                    },
                    DeformCommand::Dispatch(dispatch) => {
                        self.encode_dispatch(&mut encoder, &buffers, &staging, staged, dispatch)
                    }
                };

                if let Err(e) = result {
                    log::warn!("[Wgpu Device] '{}': skipped command: {}", commands.label, e);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.monitor.record_success();
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.monitor.is_device_lost()
    }
}

impl Drop for WgpuDevice {
    fn drop(&mut self) {
        for (_, entry) in self.buffers.lock().drain() {
            if !entry.imported {
                entry.buffer.destroy();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_rounds_up_to_copy_alignment() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(12), 12);
        assert_eq!(align4(14), 16);
    }

    #[test]
    fn test_vertex_buffers_can_be_drawn_and_copied() {
        let usage = usage_for(BufferRole::Vertex);
        assert!(usage.contains(wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE));
        assert!(usage.contains(wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST));
        assert!(!usage_for(BufferRole::LatticeUpload).contains(wgpu::BufferUsages::VERTEX));
    }

    #[test]
    fn test_params_fit_a_uniform_binding() {
        assert_eq!(PARAMS_SIZE % 16, 0);
    }
}
