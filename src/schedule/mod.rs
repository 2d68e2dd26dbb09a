//! Frame Schedule
//!
//! Ordered, named per-frame stages over a host value. The lattice stages
//! are placed around the host's skinning stage: pre-skinning deformation
//! must see the bind pose, post-skinning deformation must see this frame's
//! skinning output, and both must finish before rendering.

use crate::dispatch::FrameContext;
use crate::error::{DeformError, DeformResult};
use crate::system::LatticeSystem;
use std::time::{Duration, Instant};

/// Stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageLabel {
    EarlyUpdate,
    Update,
    LateUpdate,
    /// Lattices applied to the bind pose
    LatticeDeform,
    /// Host skinning; writes the skinned vertex buffers
    SkinnedMeshes,
    /// Lattices applied to the skinning output
    SkinnedLatticeDeform,
    Render,
    Custom(&'static str),
}

/// Callback run once per frame
pub type StageFn<H> = Box<dyn FnMut(&mut H) -> DeformResult<()> + Send>;

struct Stage<H> {
    label: StageLabel,
    run: StageFn<H>,
}

/// Result of one `run_frame`
#[derive(Debug, Default)]
pub struct FrameExecutionReport {
    pub executed_stages: Vec<(StageLabel, Duration)>,
    pub failed_stages: Vec<(StageLabel, String)>,
    pub total_frame_time: Duration,
}

impl FrameExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed_stages.is_empty()
    }
}

/// Ordered list of stages executed every frame
pub struct FrameSchedule<H> {
    stages: Vec<Stage<H>>,
    frame: u64,
}

impl<H> Default for FrameSchedule<H> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            frame: 0,
        }
    }
}

impl<H> FrameSchedule<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage at the end of the frame
    pub fn push_stage<F>(&mut self, label: StageLabel, run: F)
    where
        F: FnMut(&mut H) -> DeformResult<()> + Send + 'static,
    {
        self.stages.push(Stage {
            label,
            run: Box::new(run),
        });
    }

    /// Insert a stage immediately before `anchor`
    pub fn insert_before<F>(
        &mut self,
        anchor: StageLabel,
        label: StageLabel,
        run: F,
    ) -> DeformResult<()>
    where
        F: FnMut(&mut H) -> DeformResult<()> + Send + 'static,
    {
        let index = self.position(anchor).ok_or(DeformError::MissingStage(anchor))?;
        self.stages.insert(
            index,
            Stage {
                label,
                run: Box::new(run),
            },
        );
        Ok(())
    }

    /// Insert a stage immediately after `anchor`
    pub fn insert_after<F>(
        &mut self,
        anchor: StageLabel,
        label: StageLabel,
        run: F,
    ) -> DeformResult<()>
    where
        F: FnMut(&mut H) -> DeformResult<()> + Send + 'static,
    {
        let index = self.position(anchor).ok_or(DeformError::MissingStage(anchor))?;
        self.stages.insert(
            index + 1,
            Stage {
                label,
                run: Box::new(run),
            },
        );
        Ok(())
    }

    /// Remove every stage with this label; returns how many were removed
    pub fn remove_stage(&mut self, label: StageLabel) -> usize {
        let before = self.stages.len();
        self.stages.retain(|stage| stage.label != label);
        before - self.stages.len()
    }

    pub fn contains(&self, label: StageLabel) -> bool {
        self.position(label).is_some()
    }

    pub fn labels(&self) -> Vec<StageLabel> {
        self.stages.iter().map(|stage| stage.label).collect()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    fn position(&self, label: StageLabel) -> Option<usize> {
        self.stages.iter().position(|stage| stage.label == label)
    }

    /// Run every stage in order
    ///
    /// A failing stage is logged and recorded; later stages still run.
    pub fn run_frame(&mut self, host: &mut H) -> FrameExecutionReport {
        let frame_start = Instant::now();
        let mut report = FrameExecutionReport::default();
        self.frame += 1;

        for stage in &mut self.stages {
            let stage_start = Instant::now();
            match (stage.run)(host) {
                Ok(()) => report
                    .executed_stages
                    .push((stage.label, stage_start.elapsed())),
                Err(e) => {
                    log::error!(
                        "[Frame Schedule] Stage {:?} failed in frame {}: {}",
                        stage.label,
                        self.frame,
                        e
                    );
                    report.failed_stages.push((stage.label, e.to_string()));
                }
            }
        }

        report.total_frame_time = frame_start.elapsed();
        report
    }
}

/// Host that owns a lattice system and its frame context
pub trait LatticeHost {
    fn lattice_parts(&mut self) -> (&mut LatticeSystem, &mut FrameContext);
}

/// Place the lattice stages around the host's skinning stage
///
/// Calling it again once installed changes nothing.
pub fn install_lattice_stages<H>(schedule: &mut FrameSchedule<H>) -> DeformResult<()>
where
    H: LatticeHost + 'static,
{
    if !schedule.contains(StageLabel::SkinnedMeshes) {
        return Err(DeformError::MissingStage(StageLabel::SkinnedMeshes));
    }

    if !schedule.contains(StageLabel::LatticeDeform) {
        schedule.insert_before(
            StageLabel::SkinnedMeshes,
            StageLabel::LatticeDeform,
            |host: &mut H| {
                let (system, ctx) = host.lattice_parts();
                system.run_pre_skinning(ctx).map(|_| ())
            },
        )?;
    }
    if !schedule.contains(StageLabel::SkinnedLatticeDeform) {
        schedule.insert_after(
            StageLabel::SkinnedMeshes,
            StageLabel::SkinnedLatticeDeform,
            |host: &mut H| {
                let (system, ctx) = host.lattice_parts();
                system.run_post_skinning(ctx).map(|_| ())
            },
        )?;
    }

    log::debug!("[Frame Schedule] Lattice stages installed: {:?}", schedule.labels());
    Ok(())
}

/// Remove both lattice stages; returns whether anything was removed
pub fn uninstall_lattice_stages<H>(schedule: &mut FrameSchedule<H>) -> bool {
    let removed = schedule.remove_stage(StageLabel::LatticeDeform)
        + schedule.remove_stage(StageLabel::SkinnedLatticeDeform);
    removed > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LatticeConfig;
    use crate::gpu::CpuDevice;
    use crate::lattice::{create_lattice, set_handle_offset};
    use crate::mesh::{build_mesh, read_positions};
    use crate::target::{create_target_core, DeformationTarget, MeshSlot, MeshTarget, TargetId};
    use glam::{Mat4, Vec3};
    use std::sync::Arc;

    #[derive(Default)]
    struct Trace {
        calls: Vec<&'static str>,
    }

    #[test]
    fn test_stages_run_in_order_and_failures_do_not_stop_the_frame() {
        let mut schedule = FrameSchedule::<Trace>::new();
        schedule.push_stage(StageLabel::Update, |t: &mut Trace| {
            t.calls.push("update");
            Ok(())
        });
        schedule.push_stage(StageLabel::Render, |t: &mut Trace| {
            t.calls.push("render");
            Ok(())
        });
        schedule
            .insert_after(StageLabel::Update, StageLabel::Custom("broken"), |t: &mut Trace| {
                t.calls.push("broken");
                Err(DeformError::DeviceLost)
            })
            .expect("anchor exists");

        let mut trace = Trace::default();
        let report = schedule.run_frame(&mut trace);
        assert_eq!(trace.calls, vec!["update", "broken", "render"]);
        assert_eq!(report.executed_stages.len(), 2);
        assert_eq!(report.failed_stages[0].0, StageLabel::Custom("broken"));
        assert!(!report.is_success());
        assert_eq!(schedule.frame_index(), 1);
    }

    #[test]
    fn test_missing_anchor_is_an_error() {
        let mut schedule = FrameSchedule::<Trace>::new();
        let result =
            schedule.insert_before(StageLabel::Render, StageLabel::Update, |_: &mut Trace| Ok(()));
        assert!(matches!(result, Err(DeformError::MissingStage(StageLabel::Render))));
    }

    struct Game {
        system: LatticeSystem,
        ctx: FrameContext,
        target: TargetId,
        skinning_ran: bool,
    }

    impl LatticeHost for Game {
        fn lattice_parts(&mut self) -> (&mut LatticeSystem, &mut FrameContext) {
            (&mut self.system, &mut self.ctx)
        }
    }

    fn game() -> Game {
        let device = Arc::new(CpuDevice::default());
        let mut system = LatticeSystem::new(device, LatticeConfig::default()).expect("system");

        let mesh = Arc::new(build_mesh("Point", &[Vec3::new(1.0, 0.0, 0.0)], None, None));
        let target = system
            .scene_mut()
            .add_target(MeshTarget::new(create_target_core("Point"), MeshSlot::new(Some(mesh))));
        let mut lattice = create_lattice("Push", Mat4::IDENTITY);
        for (y, z) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            set_handle_offset(&mut lattice.grid, 1, y, z, Vec3::X);
        }
        let lattice = system.scene_mut().add_lattice(lattice);
        system.scene_mut().attach_lattice(target, lattice);
        system.on_become_active(target);

        Game {
            system,
            ctx: FrameContext::new(),
            target,
            skinning_ran: false,
        }
    }

    fn skinning_schedule() -> FrameSchedule<Game> {
        let mut schedule = FrameSchedule::new();
        schedule.push_stage(StageLabel::LateUpdate, |game: &mut Game| {
            let target = game.target;
            game.system.on_will_render(&mut game.ctx, target);
            Ok(())
        });
        schedule.push_stage(StageLabel::SkinnedMeshes, |game: &mut Game| {
            game.skinning_ran = true;
            Ok(())
        });
        schedule.push_stage(StageLabel::Render, |_: &mut Game| Ok(()));
        schedule
    }

    #[test]
    fn test_install_is_idempotent_and_brackets_skinning() {
        let mut schedule = skinning_schedule();
        install_lattice_stages(&mut schedule).expect("install");
        install_lattice_stages(&mut schedule).expect("reinstall");
        assert_eq!(
            schedule.labels(),
            vec![
                StageLabel::LateUpdate,
                StageLabel::LatticeDeform,
                StageLabel::SkinnedMeshes,
                StageLabel::SkinnedLatticeDeform,
                StageLabel::Render,
            ]
        );

        assert!(uninstall_lattice_stages(&mut schedule));
        assert!(!uninstall_lattice_stages(&mut schedule));
        assert!(!schedule.contains(StageLabel::LatticeDeform));
    }

    #[test]
    fn test_install_requires_skinning_stage() {
        let mut schedule = FrameSchedule::<Game>::new();
        assert!(matches!(
            install_lattice_stages(&mut schedule),
            Err(DeformError::MissingStage(StageLabel::SkinnedMeshes))
        ));
    }

    #[test]
    fn test_installed_stages_deform_queued_targets() {
        let mut schedule = skinning_schedule();
        install_lattice_stages(&mut schedule).expect("install");

        let mut game = game();
        let report = schedule.run_frame(&mut game);
        assert!(report.is_success());
        assert!(game.skinning_ran);
        assert!(game.ctx.is_empty());

        let target = game.system.scene().target(game.target).expect("target");
        let buffers = target.buffers().expect("buffers");
        let moved = read_positions(&buffers.read_working().expect("read"), buffers.info());
        assert!(moved[0].abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
    }
}
