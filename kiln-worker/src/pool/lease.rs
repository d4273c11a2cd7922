//! Scoped VM lease
//!
//! A [`VmLease`] owns one acquisition and releases it exactly once: either
//! explicitly through [`VmLease::release`] or, on any other exit path
//! including a panic, when it is dropped.

use kiln_core::domain::vm::{GroupId, VmHandle};
use std::sync::Arc;
use tracing::warn;

use super::{PoolError, VmManager};

pub struct VmLease {
    manager: Arc<dyn VmManager>,
    vm: VmHandle,
    released: bool,
}

impl VmLease {
    /// Acquires a VM of `group` and wraps it in a lease
    pub async fn acquire(
        manager: Arc<dyn VmManager>,
        group: GroupId,
        holder: &str,
    ) -> Result<Self, PoolError> {
        let vm = manager.acquire(group, holder).await?;
        Ok(Self::new(manager, vm))
    }

    /// Takes ownership of an already acquired VM
    pub fn new(manager: Arc<dyn VmManager>, vm: VmHandle) -> Self {
        Self {
            manager,
            vm,
            released: false,
        }
    }

    pub fn vm(&self) -> &VmHandle {
        &self.vm
    }

    /// Asks the pool to health-check the VM before leasing it again
    pub fn flag_for_check(&self) {
        self.manager.flag_for_check(&self.vm.name);
    }

    /// Returns the VM to the pool
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.manager.release(&self.vm);
    }
}

impl Drop for VmLease {
    fn drop(&mut self) {
        if !self.released {
            warn!("VM {} released on drop", self.vm.name);
            self.release_once();
        }
    }
}

impl std::fmt::Debug for VmLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmLease")
            .field("vm", &self.vm)
            .field("released", &self.released)
            .finish()
    }
}
