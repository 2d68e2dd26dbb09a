//! Target bound to a plain mesh renderer

use super::target_data::{TargetCore, TargetKind};
use super::{DeformationTarget, MeshBinding};
use crate::mesh::Mesh;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, cloneable renderer mesh slot
///
/// Clones observe the same slot, so the host renderer can keep one half
/// while the target owns the other.
#[derive(Debug, Clone, Default)]
pub struct MeshSlot(Arc<Mutex<Option<Arc<Mesh>>>>);

impl MeshSlot {
    pub fn new(mesh: Option<Arc<Mesh>>) -> Self {
        Self(Arc::new(Mutex::new(mesh)))
    }

    pub fn get(&self) -> Option<Arc<Mesh>> {
        self.0.lock().clone()
    }

    pub fn set(&self, mesh: Option<Arc<Mesh>>) {
        *self.0.lock() = mesh;
    }
}

impl MeshBinding for MeshSlot {
    fn shared_mesh(&self) -> Option<Arc<Mesh>> {
        self.get()
    }

    fn set_shared_mesh(&mut self, mesh: Option<Arc<Mesh>>) {
        self.set(mesh)
    }
}

/// Mesh renderer deformed by lattices
pub struct MeshTarget {
    core: TargetCore,
    binding: Box<dyn MeshBinding>,
}

impl MeshTarget {
    pub fn new(core: TargetCore, binding: impl MeshBinding + 'static) -> Self {
        Self {
            core,
            binding: Box::new(binding),
        }
    }
}

impl DeformationTarget for MeshTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Mesh
    }

    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        &mut self.core
    }

    fn current_mesh(&self) -> Option<Arc<Mesh>> {
        self.binding.shared_mesh()
    }

    fn bind_mesh(&mut self, mesh: Option<Arc<Mesh>>) {
        self.binding.set_shared_mesh(mesh)
    }
}
