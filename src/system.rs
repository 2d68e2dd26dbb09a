//! Lattice system facade
//!
//! Owns the device, dispatcher and scene, and exposes the lifecycle hooks a
//! host calls around activation, saving, edit-mode transitions and device
//! loss. Hooks never return setup errors: those end up as target faults.

use crate::config::LatticeConfig;
use crate::dispatch::{DispatchReport, FrameContext, LatticeDispatcher};
use crate::error::{DeformError, DeformResult};
use crate::gpu::{ComputeDevice, CpuDevice};
use crate::scene::DeformScene;
use crate::target::{
    activate_target, apply_mesh, create_target_core, deactivate_target, reset_mesh, sync_binding,
    DeformationTarget, TargetCore, TargetId, TargetState,
};
use std::sync::Arc;

/// Device, dispatcher and scene driven together
pub struct LatticeSystem {
    device: Arc<dyn ComputeDevice>,
    config: LatticeConfig,
    dispatcher: LatticeDispatcher,
    scene: DeformScene,

    /// Set once the device is lost; cleared by `replace_device`
    context_lost: bool,
    /// Targets that were active when the device was lost
    suspended: Vec<TargetId>,
}

impl LatticeSystem {
    pub fn new(device: Arc<dyn ComputeDevice>, config: LatticeConfig) -> DeformResult<Self> {
        config.validate()?;
        let mut dispatcher = LatticeDispatcher::new(device.clone(), &config);
        dispatcher.initialize()?;

        log::info!("[Lattice System] Started on {} device", device.name());
        Ok(Self {
            device,
            config,
            dispatcher,
            scene: DeformScene::new(),
            context_lost: false,
            suspended: Vec::new(),
        })
    }

    /// System backed by the host reference device
    pub fn with_cpu_device(config: LatticeConfig) -> DeformResult<Self> {
        let device = Arc::new(CpuDevice::from_config(&config));
        Self::new(device, config)
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    pub fn config(&self) -> &LatticeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &LatticeDispatcher {
        &self.dispatcher
    }

    pub fn scene(&self) -> &DeformScene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut DeformScene {
        &mut self.scene
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    /// Target core using the configured default quality
    pub fn new_target_core(&self, name: impl Into<String>) -> TargetCore {
        let mut core = create_target_core(name);
        core.high_quality = self.config.default_high_quality;
        core
    }

    // ------------------------------------------------------------------
    // Target lifecycle
    // ------------------------------------------------------------------

    /// Set up a target and show its deformed mesh
    pub fn on_become_active(&mut self, id: TargetId) -> Option<TargetState> {
        let target = self.scene.target_mut(id)?;
        Some(activate_target(target.as_target_mut(), &self.device))
    }

    /// Restore a target's original mesh and release its buffers
    pub fn on_become_inactive(&mut self, id: TargetId) -> bool {
        match self.scene.target_mut(id) {
            Some(target) => deactivate_target(target.as_target_mut()),
            None => false,
        }
    }

    /// Queue a target that is about to be drawn this frame
    pub fn on_will_render(&mut self, ctx: &mut FrameContext, id: TargetId) -> bool {
        if self.context_lost {
            return false;
        }
        self.dispatcher.enqueue(ctx, &mut self.scene, id)
    }

    /// Re-apply deformed meshes the renderer was pointed away from
    pub fn sync_bindings(&mut self) -> usize {
        let mut rebound = 0;
        for (_, target) in self.scene.targets_mut() {
            if target.is_valid() && sync_binding(target.as_target_mut()) {
                rebound += 1;
            }
        }
        rebound
    }

    /// Show the deformed mesh on every active target
    pub fn apply_all_meshes(&mut self) {
        for (_, target) in self.scene.targets_mut() {
            if target.is_valid() {
                apply_mesh(target.as_target_mut());
            }
        }
    }

    /// Show the original mesh on every active target
    pub fn reset_all_meshes(&mut self) {
        for (_, target) in self.scene.targets_mut() {
            if target.core().state == TargetState::Active {
                reset_mesh(target.as_target_mut());
            }
        }
    }

    /// Persisted scenes must never reference the runtime copies
    pub fn on_scene_saving(&mut self) {
        log::debug!("[Lattice System] Scene saving, restoring original meshes");
        self.reset_all_meshes();
    }

    pub fn on_scene_saved(&mut self) {
        self.apply_all_meshes();
    }

    /// Restore every mesh and drop the shared upload buffer
    pub fn on_exiting_edit_mode(&mut self, ctx: &mut FrameContext) {
        self.reset_all_meshes();
        self.dispatcher.shutdown();
        ctx.clear();
    }

    pub fn on_entered_edit_mode(&mut self) -> DeformResult<()> {
        self.dispatcher.initialize()?;
        self.apply_all_meshes();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Device loss
    // ------------------------------------------------------------------

    /// Tear everything down after the device was lost
    ///
    /// Active targets get their original meshes back and are remembered for
    /// `replace_device`.
    pub fn on_context_lost(&mut self, ctx: &mut FrameContext) {
        ctx.clear();
        if self.context_lost {
            return;
        }
        log::warn!(
            "[Lattice System] {} device lost, suspending {} targets",
            self.device.name(),
            self.scene.target_count()
        );

        let mut suspended = Vec::new();
        for (id, target) in self.scene.targets_mut() {
            if target.core().state == TargetState::Active {
                suspended.push(id);
            }
            deactivate_target(target.as_target_mut());
        }
        self.suspended = suspended;
        self.dispatcher.shutdown();
        self.context_lost = true;
    }

    /// Continue on a new device, re-activating suspended targets
    ///
    /// Returns how many targets came back active.
    pub fn replace_device(&mut self, device: Arc<dyn ComputeDevice>) -> DeformResult<usize> {
        let mut dispatcher = LatticeDispatcher::new(device.clone(), &self.config);
        dispatcher.initialize()?;
        self.dispatcher = dispatcher;
        self.device = device;
        self.context_lost = false;

        let mut restored = 0;
        for id in std::mem::take(&mut self.suspended) {
            if self.on_become_active(id) == Some(TargetState::Active) {
                restored += 1;
            }
        }
        log::info!(
            "[Lattice System] Resumed on {} device, {} targets restored",
            self.device.name(),
            restored
        );
        Ok(restored)
    }

    /// Returns false once the device is gone; the first call after loss
    /// tears down and reports the loss
    fn ensure_device(&mut self, ctx: &mut FrameContext) -> DeformResult<bool> {
        if !self.device.is_lost() && !self.context_lost {
            return Ok(true);
        }
        if self.context_lost {
            ctx.clear();
            return Ok(false);
        }
        self.on_context_lost(ctx);
        Err(DeformError::DeviceLost)
    }

    // ------------------------------------------------------------------
    // Frame stages
    // ------------------------------------------------------------------

    pub fn run_pre_skinning(&mut self, ctx: &mut FrameContext) -> DeformResult<DispatchReport> {
        if !self.ensure_device(ctx)? {
            return Ok(DispatchReport::default());
        }
        Ok(self.dispatcher.run_pre_skinning(ctx, &mut self.scene))
    }

    pub fn run_post_skinning(&mut self, ctx: &mut FrameContext) -> DeformResult<DispatchReport> {
        if !self.ensure_device(ctx)? {
            return Ok(DispatchReport::default());
        }
        Ok(self.dispatcher.run_post_skinning(ctx, &mut self.scene))
    }

    /// Both stages, for hosts without a skinning stage
    pub fn run_frame(&mut self, ctx: &mut FrameContext) -> DeformResult<DispatchReport> {
        if !self.ensure_device(ctx)? {
            return Ok(DispatchReport::default());
        }
        Ok(self.dispatcher.run_frame(ctx, &mut self.scene))
    }

    /// Release every target buffer and the upload buffer
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        let mut released = 0;
        for (_, target) in self.scene.targets_mut() {
            if deactivate_target(target.as_target_mut()) {
                released += 1;
            }
        }
        let upload = self.dispatcher.shutdown();
        if released > 0 || upload {
            log::info!("[Lattice System] Shut down, {} targets released", released);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{create_lattice, set_handle_offset, LatticeId};
    use crate::mesh::{build_mesh, read_positions, Mesh};
    use crate::target::{MeshSlot, MeshTarget};
    use glam::{Mat4, Vec3};

    struct Fixture {
        cpu: Arc<CpuDevice>,
        system: LatticeSystem,
        ctx: FrameContext,
        slot: MeshSlot,
        source: Arc<Mesh>,
        target: TargetId,
    }

    fn push_lattice(system: &mut LatticeSystem) -> LatticeId {
        let mut lattice = create_lattice("Push", Mat4::IDENTITY);
        for (y, z) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            set_handle_offset(&mut lattice.grid, 1, y, z, Vec3::X);
        }
        system.scene_mut().add_lattice(lattice)
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let cpu = Arc::new(CpuDevice::default());
        let mut system = LatticeSystem::new(cpu.clone(), LatticeConfig::default()).expect("system");

        let source = Arc::new(build_mesh("Point", &[Vec3::new(1.0, 0.0, 0.0)], None, None));
        let slot = MeshSlot::new(Some(source.clone()));
        let core = system.new_target_core("Point");
        let target = system.scene_mut().add_target(MeshTarget::new(core, slot.clone()));
        let lattice = push_lattice(&mut system);
        system.scene_mut().attach_lattice(target, lattice);

        Fixture {
            cpu,
            system,
            ctx: FrameContext::new(),
            slot,
            source,
            target,
        }
    }

    fn working_position(f: &Fixture) -> Vec3 {
        let buffers = f.system.scene().target(f.target).and_then(|t| t.buffers()).expect("buffers");
        read_positions(&buffers.read_working().expect("read"), buffers.info())[0]
    }

    #[test]
    fn test_frame_deforms_active_target() {
        let mut f = fixture();
        assert_eq!(f.system.on_become_active(f.target), Some(TargetState::Active));
        assert!(f.slot.get().expect("bound").runtime_only);

        assert!(f.system.on_will_render(&mut f.ctx, f.target));
        let report = f.system.run_frame(&mut f.ctx).expect("frame");
        assert_eq!(report.targets_processed, 1);
        assert!(working_position(&f).abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn test_scene_save_round_trip_restores_bindings() {
        let mut f = fixture();
        f.system.on_become_active(f.target);

        f.system.on_scene_saving();
        assert!(Arc::ptr_eq(&f.slot.get().expect("bound"), &f.source));
        f.system.on_scene_saved();
        assert!(f.slot.get().expect("bound").runtime_only);
    }

    #[test]
    fn test_sync_bindings_reapplies_swapped_meshes() {
        let mut f = fixture();
        f.system.on_become_active(f.target);
        assert_eq!(f.system.sync_bindings(), 0);

        f.slot.set(Some(f.source.clone()));
        assert_eq!(f.system.sync_bindings(), 1);
        assert!(f.slot.get().expect("bound").runtime_only);
    }

    #[test]
    fn test_edit_mode_transitions_drop_and_restore_upload_buffer() {
        let mut f = fixture();
        f.system.on_become_active(f.target);
        f.system.on_will_render(&mut f.ctx, f.target);

        f.system.on_exiting_edit_mode(&mut f.ctx);
        assert!(f.ctx.is_empty());
        assert!(!f.system.dispatcher().is_initialized());
        assert!(Arc::ptr_eq(&f.slot.get().expect("bound"), &f.source));

        f.system.on_entered_edit_mode().expect("reinitialize");
        assert!(f.system.dispatcher().is_initialized());
        assert!(f.slot.get().expect("bound").runtime_only);
    }

    #[test]
    fn test_device_loss_suspends_and_replacement_resumes() {
        let mut f = fixture();
        f.system.on_become_active(f.target);
        f.system.on_will_render(&mut f.ctx, f.target);

        f.cpu.lose_context();
        assert!(matches!(f.system.run_frame(&mut f.ctx), Err(DeformError::DeviceLost)));
        assert!(f.system.is_context_lost());
        assert!(f.ctx.is_empty());
        assert!(Arc::ptr_eq(&f.slot.get().expect("bound"), &f.source));

        // Reported once; later frames idle quietly
        assert!(f.system.run_frame(&mut f.ctx).expect("idle").is_idle());
        assert!(!f.system.on_will_render(&mut f.ctx, f.target));

        let replacement = Arc::new(CpuDevice::default());
        assert_eq!(f.system.replace_device(replacement).expect("resume"), 1);
        assert!(f.system.on_will_render(&mut f.ctx, f.target));
        f.system.run_frame(&mut f.ctx).expect("frame");
        assert!(working_position(&f).abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut f = fixture();
        f.system.on_become_active(f.target);
        assert_eq!(f.cpu.live_buffer_count(), 3);

        f.system.shutdown();
        assert_eq!(f.cpu.live_buffer_count(), 0);
        assert!(Arc::ptr_eq(&f.slot.get().expect("bound"), &f.source));
        f.system.shutdown();
        assert_eq!(f.cpu.live_buffer_count(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = LatticeConfig {
            max_handles: 4,
            ..LatticeConfig::default()
        };
        assert!(matches!(
            LatticeSystem::with_cpu_device(config),
            Err(DeformError::InvalidConfig { .. })
        ));
    }
}
