//! Lattice dispatcher
//!
//! Drains a `FrameContext` into one ordered command list per stage:
//! for every target a reset, then for every lattice an upload into the shared
//! buffer followed by the accumulate dispatch that reads it. The upload buffer
//! is reused across lattices; that only works because each write is ordered
//! right before its dispatch in the same list.

use super::frame_context::FrameContext;
use super::DispatchReport;
use crate::config::LatticeConfig;
use crate::constants::lattice::HANDLE_STRIDE_BYTES;
use crate::error::{DeformError, DeformResult, TargetFault};
use crate::gpu::{BufferId, BufferRole, CommandList, ComputeDevice, KernelDispatch};
use crate::kernel::{dispatch_group_count, KernelFeature, KernelParams, KernelStage};
use crate::lattice::{
    export_offsets, handle_count, lattice_resolution, lattice_world_to_local, LatticeId,
};
use crate::mesh::{layout_info, MeshInfo};
use crate::scene::DeformScene;
use crate::target::{
    AnyTarget, DeformationTarget, SkinnedDeformationTarget, SkinnedVertexBuffer, TargetId,
    TargetState,
};
use crate::transform::lattice_transform_pair;
use glam::Mat4;
use std::sync::Arc;

/// Buffers and transform shared by every lattice applied to one target
struct AccumulatePass {
    info: MeshInfo,
    vertex: BufferId,
    original: BufferId,
    upload: BufferId,
    local_to_world: Mat4,
    feature: KernelFeature,
}

/// Skinning output of one target, copied out of the scene
struct SkinnedPass {
    name: String,
    output: SkinnedVertexBuffer,
    original: BufferId,
    local_to_world: Mat4,
    feature: KernelFeature,
    lattices: Vec<LatticeId>,
}

/// Records and submits the per-frame deformation work
pub struct LatticeDispatcher {
    device: Arc<dyn ComputeDevice>,
    upload_buffer: Option<BufferId>,
    max_handles: usize,
    log_frame_stats: bool,
}

impl LatticeDispatcher {
    /// Create a dispatcher; call `initialize` before the first frame
    pub fn new(device: Arc<dyn ComputeDevice>, config: &LatticeConfig) -> Self {
        Self {
            device,
            upload_buffer: None,
            max_handles: config.max_handles as usize,
            log_frame_stats: config.log_frame_stats,
        }
    }

    /// Allocate the shared upload buffer if it is missing
    pub fn initialize(&mut self) -> DeformResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if let Some(stale) = self.upload_buffer.take() {
            self.device.release_buffer(stale);
        }

        let size = self.max_handles as u64 * HANDLE_STRIDE_BYTES;
        let upload = self
            .device
            .create_buffer("Lattice Upload", BufferRole::LatticeUpload, size)?;
        self.upload_buffer = Some(upload);
        log::info!(
            "[Lattice Dispatch] Upload buffer ready on {} device ({} handles)",
            self.device.name(),
            self.max_handles
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.upload_buffer
            .is_some_and(|upload| self.device.is_buffer_alive(upload))
    }

    /// Release the upload buffer; safe to call repeatedly
    pub fn shutdown(&mut self) -> bool {
        match self.upload_buffer.take() {
            Some(upload) => {
                self.device.release_buffer(upload);
                log::info!("[Lattice Dispatch] Upload buffer released");
                true
            }
            None => false,
        }
    }

    /// Handles one lattice may have
    pub fn capacity(&self) -> usize {
        self.max_handles
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    pub fn upload_buffer(&self) -> Option<BufferId> {
        self.upload_buffer
    }

    /// Queue a target for this frame
    ///
    /// Invalid targets and repeats within the frame are ignored. Skinned
    /// targets re-acquire their skinning output here, every time.
    pub fn enqueue(&self, ctx: &mut FrameContext, scene: &mut DeformScene, id: TargetId) -> bool {
        let Some(target) = scene.target_mut(id) else {
            return false;
        };
        if !target.is_valid() {
            log::trace!("[Lattice Dispatch] '{}' is not active, not queued", target.name());
            return false;
        }
        if !ctx.push_target(id) {
            return false;
        }

        if let Some(skinned) = target.as_skinned_mut() {
            if skinned.refresh_skinned_state() {
                ctx.push_skinned(id);
            }
        }
        true
    }

    /// Reset and deform every queued target's working buffer
    ///
    /// Runs before skinning, so skinned targets feed their deformed bind pose
    /// into the skinning stage.
    pub fn run_pre_skinning(
        &mut self,
        ctx: &mut FrameContext,
        scene: &mut DeformScene,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if ctx.targets().is_empty() {
            return report;
        }
        let Some(upload) = self.live_upload_buffer() else {
            return report;
        };

        let mut commands = CommandList::new("Lattice");
        for id in ctx.take_targets() {
            let Some(target) = scene.target(id) else {
                report.targets_skipped += 1;
                continue;
            };
            if !target.is_valid() {
                report.targets_skipped += 1;
                continue;
            }
            let Some((buffers, reset)) = target
                .buffers()
                .and_then(|buffers| buffers.reset_command().map(|reset| (buffers, reset)))
            else {
                report.targets_skipped += 1;
                continue;
            };

            let pass = AccumulatePass {
                info: *buffers.info(),
                vertex: reset.vertex_buffer,
                original: reset.original_buffer,
                upload,
                local_to_world: target.local_to_world(),
                feature: KernelFeature::from_quality(target.core().high_quality),
            };
            let lattices = target.core().lattices.clone();

            if let Err(e) = self.check_capacity(scene, &lattices) {
                Self::fault_target(scene, id, e);
                report.targets_faulted += 1;
                continue;
            }

            commands.dispatch(reset);
            report.dispatches += 1;
            self.record_lattices(&mut commands, scene, &lattices, &pass, &mut report);
            report.targets_processed += 1;
        }

        self.submit(commands, "pre-skinning", &report);
        report
    }

    /// Deform the skinning output of queued skinned targets
    ///
    /// The skinning stage rewrote these buffers this frame, so there is no
    /// reset; transforms use the root-bone-relative space.
    pub fn run_post_skinning(
        &mut self,
        ctx: &mut FrameContext,
        scene: &mut DeformScene,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if ctx.skinned_targets().is_empty() {
            return report;
        }
        let Some(upload) = self.live_upload_buffer() else {
            return report;
        };

        let mut commands = CommandList::new("Skinned Lattice");
        for id in ctx.take_skinned() {
            let gathered = scene.target(id).and_then(|target| self.skinned_pass_inputs(target));
            let Some(gathered) = gathered else {
                report.targets_skipped += 1;
                continue;
            };
            let SkinnedPass {
                name,
                output,
                original,
                local_to_world,
                feature,
                lattices,
            } = gathered;
            if lattices.is_empty() {
                continue;
            }

            let info = match layout_info(&name, &output.layout, output.vertex_count) {
                Ok(info) => info,
                Err(e) => {
                    Self::fault_target(scene, id, e);
                    report.targets_faulted += 1;
                    continue;
                }
            };
            if let Err(e) = self.check_capacity(scene, &lattices) {
                Self::fault_target(scene, id, e);
                report.targets_faulted += 1;
                continue;
            }

            let pass = AccumulatePass {
                info,
                vertex: output.buffer,
                original,
                upload,
                local_to_world,
                feature,
            };
            self.record_lattices(&mut commands, scene, &lattices, &pass, &mut report);
            report.targets_processed += 1;
        }

        self.submit(commands, "post-skinning", &report);
        report
    }

    /// Both stages back to back, for hosts without a skinning stage
    pub fn run_frame(&mut self, ctx: &mut FrameContext, scene: &mut DeformScene) -> DispatchReport {
        let mut report = self.run_pre_skinning(ctx, scene);
        report.merge(&self.run_post_skinning(ctx, scene));
        report
    }

    fn live_upload_buffer(&self) -> Option<BufferId> {
        self.upload_buffer
            .filter(|upload| self.device.is_buffer_alive(*upload))
    }

    /// Owned inputs of a post-skinning pass, if the target can take one
    fn skinned_pass_inputs(&self, target: &AnyTarget) -> Option<SkinnedPass> {
        if !target.is_valid() {
            return None;
        }
        let skinned = target.as_skinned()?;
        let original = target.buffers()?.original_buffer()?;
        let output = skinned.skinned_buffer()?.clone();
        if !self.device.is_buffer_alive(output.buffer) {
            return None;
        }
        Some(SkinnedPass {
            name: target.name().to_string(),
            output,
            original,
            local_to_world: skinned.skinned_local_to_world(),
            feature: KernelFeature::from_quality(target.core().high_quality),
            lattices: skinned.skinned_lattices().to_vec(),
        })
    }

    /// Every lattice must fit the shared upload buffer
    fn check_capacity(&self, scene: &DeformScene, lattices: &[LatticeId]) -> DeformResult<()> {
        for id in lattices {
            let Some(lattice) = scene.lattice(*id) else {
                continue;
            };
            let handles = handle_count(&lattice.grid);
            if handles > self.max_handles {
                return Err(DeformError::HandleCapacityExceeded {
                    handles,
                    capacity: self.max_handles,
                });
            }
        }
        Ok(())
    }

    /// Exclude a target until it is activated again; logged once
    fn fault_target(scene: &mut DeformScene, id: TargetId, error: DeformError) {
        let Some(target) = scene.target_mut(id) else {
            return;
        };
        let fault: TargetFault = error.target_fault();
        log::error!(
            "[Lattice Dispatch] '{}' excluded from deformation: {}",
            target.name(),
            error
        );
        target.core_mut().state = TargetState::Faulted(fault);
    }

    fn record_lattices(
        &self,
        commands: &mut CommandList,
        scene: &mut DeformScene,
        lattices: &[LatticeId],
        pass: &AccumulatePass,
        report: &mut DispatchReport,
    ) {
        let groups = dispatch_group_count(
            pass.info.vertex_count,
            self.device.preferred_group_size(KernelStage::Accumulate),
        );

        for id in lattices {
            let Some(lattice) = scene.lattice_mut(*id) else {
                report.lattices_skipped += 1;
                continue;
            };
            if lattice.local_to_world.determinant() == 0.0 {
                log::trace!("[Lattice Dispatch] Lattice '{}' is degenerate, skipped", lattice.name);
                report.lattices_skipped += 1;
                continue;
            }

            let pair = lattice_transform_pair(lattice_world_to_local(lattice), pass.local_to_world);
            if !pair.object_to_lattice.is_finite() || !pair.lattice_to_object.is_finite() {
                log::trace!(
                    "[Lattice Dispatch] '{}' has no inverse placement, skipped",
                    lattice.name
                );
                report.lattices_skipped += 1;
                continue;
            }
            let resolution = lattice_resolution(&lattice.grid);
            let data = bytemuck::cast_slice(export_offsets(&mut lattice.grid)).to_vec();

            commands.write_buffer(pass.upload, 0, data);
            commands.dispatch(KernelDispatch {
                stage: KernelStage::Accumulate,
                feature: pass.feature,
                params: KernelParams::for_lattice(&pass.info, &pair, resolution),
                vertex_buffer: pass.vertex,
                original_buffer: pass.original,
                lattice_buffer: Some(pass.upload),
                groups,
            });
            report.dispatches += 1;
        }
    }

    fn submit(&self, commands: CommandList, stage: &str, report: &DispatchReport) {
        if commands.is_empty() {
            return;
        }
        if let Err(e) = self.device.submit(commands) {
            log::error!("[Lattice Dispatch] {} submission failed: {}", stage, e);
            return;
        }
        if self.log_frame_stats {
            log::debug!(
                "[Lattice Dispatch] {}: {} targets, {} skipped, {} dispatches",
                stage,
                report.targets_processed,
                report.targets_skipped,
                report.dispatches
            );
        }
    }
}

impl Drop for LatticeDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
