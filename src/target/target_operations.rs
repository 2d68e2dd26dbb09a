//! Target lifecycle operations
//!
//! Setup failures never escape these functions: they are logged once and
//! recorded as a `TargetFault`, which keeps the target out of every frame
//! until it is activated again.

use super::target_data::{TargetCore, TargetState};
use super::DeformationTarget;
use crate::error::DeformError;
use crate::gpu::ComputeDevice;
use crate::mesh::MeshBufferSet;
use glam::Mat4;
use std::sync::Arc;

pub fn create_target_core(name: impl Into<String>) -> TargetCore {
    TargetCore {
        name: name.into(),
        lattices: Vec::new(),
        high_quality: false,
        local_to_world: Mat4::IDENTITY,
        target_mesh: None,
        buffers: None,
        state: TargetState::Uninitialized,
    }
}

/// Active with both device buffers alive
pub fn target_is_valid(core: &TargetCore) -> bool {
    core.state == TargetState::Active
        && core.buffers.as_ref().is_some_and(|buffers| buffers.is_valid())
}

/// Set up buffers and show the deformed mesh
///
/// Re-activating a faulted or inactive target retries setup from scratch.
pub fn activate_target(
    target: &mut dyn DeformationTarget,
    device: &Arc<dyn ComputeDevice>,
) -> TargetState {
    if target.is_valid() {
        apply_mesh(target);
        return TargetState::Active;
    }

    if let Some(mut stale) = target.core_mut().buffers.take() {
        stale.release();
    }

    // The renderer may still show our own runtime copy; never adopt that
    let source = target
        .core()
        .target_mesh
        .clone()
        .or_else(|| target.current_mesh().filter(|mesh| !mesh.runtime_only));
    if target.core().target_mesh.is_none() {
        target.core_mut().target_mesh = source.clone();
    }

    let name = target.name().to_string();
    match MeshBufferSet::initialize(device.clone(), &name, source.as_ref()) {
        Ok(buffers) => {
            let core = target.core_mut();
            core.buffers = Some(buffers);
            core.state = TargetState::Active;
            apply_mesh(target);
            log::info!("[Lattice Setup] '{}' active", name);
        }
        Err(e) => {
            let fault = e.target_fault();
            match &e {
                DeformError::MissingSourceMesh { .. } => {
                    log::warn!("[Lattice Setup] Cannot initialise '{}': {}", name, e)
                }
                _ => log::error!("[Lattice Setup] Cannot initialise '{}': {}", name, e),
            }
            target.core_mut().state = TargetState::Faulted(fault);
        }
    }

    target.core().state
}

/// Restore the original mesh and release the buffers
///
/// Returns whether any buffer was released; repeated calls are no-ops.
pub fn deactivate_target(target: &mut dyn DeformationTarget) -> bool {
    reset_mesh(target);

    // The skinning handle is released through the buffer set's device
    if let Some(skinned) = target.as_skinned_mut() {
        skinned.clear_skinned_state();
    }
    let released = match target.core_mut().buffers.take() {
        Some(mut buffers) => buffers.release(),
        None => false,
    };

    let core = target.core_mut();
    if core.state != TargetState::Uninitialized {
        core.state = TargetState::Inactive;
    }
    if released {
        log::debug!("[Lattice Setup] '{}' inactive", core.name);
    }
    released
}

/// Point the renderer at the deformed working mesh
pub fn apply_mesh(target: &mut dyn DeformationTarget) {
    let working = target
        .buffers()
        .and_then(|buffers| buffers.working_mesh())
        .cloned();
    if let Some(working) = working {
        target.bind_mesh(Some(working));
    }
}

/// Point the renderer back at the undeformed source mesh
pub fn reset_mesh(target: &mut dyn DeformationTarget) {
    if let Some(source) = target.core().target_mesh.clone() {
        target.bind_mesh(Some(source));
    }
}

/// Re-apply the working mesh if the renderer was pointed elsewhere
///
/// Returns whether the binding was changed.
pub fn sync_binding(target: &mut dyn DeformationTarget) -> bool {
    let Some(working) = target
        .buffers()
        .and_then(|buffers| buffers.working_mesh())
        .cloned()
    else {
        return false;
    };

    let bound = target
        .current_mesh()
        .is_some_and(|current| Arc::ptr_eq(&current, &working));
    if !bound {
        target.bind_mesh(Some(working));
    }
    !bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TargetFault;
    use crate::gpu::CpuDevice;
    use crate::mesh::{build_mesh, Mesh};
    use crate::target::{MeshSlot, MeshTarget};
    use glam::Vec3;

    fn device() -> (Arc<CpuDevice>, Arc<dyn ComputeDevice>) {
        let cpu = Arc::new(CpuDevice::default());
        let device: Arc<dyn ComputeDevice> = cpu.clone();
        (cpu, device)
    }

    fn triangle(readable: bool) -> Arc<Mesh> {
        let mut mesh = build_mesh("Tri", &[Vec3::ZERO, Vec3::X, Vec3::Y], None, None);
        mesh.readable = readable;
        Arc::new(mesh)
    }

    #[test]
    fn test_activation_binds_working_copy_and_deactivation_restores() {
        let (cpu, device) = device();
        let source = triangle(true);
        let slot = MeshSlot::new(Some(source.clone()));
        let mut target = MeshTarget::new(create_target_core("Tri"), slot.clone());

        assert_eq!(activate_target(&mut target, &device), TargetState::Active);
        assert!(target.is_valid());
        let bound = slot.get().expect("bound mesh");
        assert!(bound.runtime_only);
        assert!(Arc::ptr_eq(&target.core().target_mesh.clone().expect("source"), &source));

        assert!(deactivate_target(&mut target));
        assert!(Arc::ptr_eq(&slot.get().expect("restored"), &source));
        assert_eq!(target.core().state, TargetState::Inactive);
        assert_eq!(cpu.live_buffer_count(), 0);

        // Releasing twice is a no-op
        assert!(!deactivate_target(&mut target));
        assert!(Arc::ptr_eq(&slot.get().expect("restored"), &source));
    }

    #[test]
    fn test_unreadable_source_faults_and_keeps_original() {
        let (cpu, device) = device();
        let source = triangle(false);
        let slot = MeshSlot::new(Some(source.clone()));
        let mut target = MeshTarget::new(create_target_core("Locked"), slot.clone());

        let state = activate_target(&mut target, &device);
        assert_eq!(state, TargetState::Faulted(TargetFault::UnreadableMesh));
        assert!(!target.is_valid());
        assert!(Arc::ptr_eq(&slot.get().expect("kept"), &source));
        assert_eq!(cpu.live_buffer_count(), 0);
    }

    #[test]
    fn test_missing_mesh_faults() {
        let (_cpu, device) = device();
        let mut target = MeshTarget::new(create_target_core("Empty"), MeshSlot::default());
        assert_eq!(
            activate_target(&mut target, &device),
            TargetState::Faulted(TargetFault::MissingSourceMesh)
        );
    }

    #[test]
    fn test_reactivation_does_not_adopt_runtime_copy() {
        let (_cpu, device) = device();
        let source = triangle(true);
        let slot = MeshSlot::new(Some(source.clone()));
        let mut target = MeshTarget::new(create_target_core("Tri"), slot.clone());

        activate_target(&mut target, &device);
        // Simulate losing the buffers while the renderer still shows the copy
        target.core_mut().buffers = None;
        assert!(slot.get().expect("bound").runtime_only);

        assert_eq!(activate_target(&mut target, &device), TargetState::Active);
        let working = slot.get().expect("bound");
        assert_eq!(working.name, "Tri (Lattice)");
        assert!(Arc::ptr_eq(&target.core().target_mesh.clone().expect("source"), &source));
    }

    #[test]
    fn test_sync_rebinds_swapped_mesh() {
        let (_cpu, device) = device();
        let slot = MeshSlot::new(Some(triangle(true)));
        let mut target = MeshTarget::new(create_target_core("Tri"), slot.clone());
        activate_target(&mut target, &device);

        assert!(!sync_binding(&mut target));
        slot.set(Some(triangle(true)));
        assert!(sync_binding(&mut target));
        assert!(slot.get().expect("bound").runtime_only);
    }
}
