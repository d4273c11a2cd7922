//! Builder VM pool
//!
//! The pool is the only arbiter of lease state: a VM is handed to at most one
//! worker at a time. Provisioning and health checking of the machines
//! themselves happen elsewhere; this layer only leases and reclaims them.

mod lease;

pub use lease::VmLease;

use async_trait::async_trait;
use kiln_core::domain::vm::{GroupId, VmHandle};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;

/// Pool errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Every machine of the group is leased or awaiting a health check.
    /// Retryable by the dispatcher.
    #[error("No VM available in group {group}")]
    NoVmAvailable { group: GroupId },

    #[error("Unknown builder group {0}")]
    UnknownGroup(GroupId),
}

/// Service trait for leasing builder VMs
#[async_trait]
pub trait VmManager: Send + Sync {
    /// Leases a free VM of `group` to `holder`
    ///
    /// Waits up to the pool's acquire timeout before giving up with
    /// [`PoolError::NoVmAvailable`].
    async fn acquire(&self, group: GroupId, holder: &str) -> Result<VmHandle, PoolError>;

    /// Returns the VM of `vm`'s acquisition to the pool
    ///
    /// Only the acquisition identified by `vm.lease_id` is ended. Releasing
    /// twice, or releasing a handle whose VM has since been leased to someone
    /// else, changes nothing and returns `false`.
    fn release(&self, vm: &VmHandle) -> bool;

    /// Marks a VM as suspicious so it is not handed out again before a
    /// health check recycles it
    fn flag_for_check(&self, vm_name: &str);
}

#[derive(Debug)]
struct Slot {
    vm: VmHandle,
    leased: bool,
    needs_check: bool,
}

impl Slot {
    fn is_free(&self) -> bool {
        !self.leased && !self.needs_check
    }
}

/// In-process VM pool built from the configured inventory
pub struct InMemoryVmPool {
    slots: Mutex<Vec<Slot>>,
    groups: HashSet<GroupId>,
    acquire_timeout: Duration,
    released: Notify,
    next_lease_id: AtomicU64,
}

impl InMemoryVmPool {
    /// Creates a pool holding every VM of `config`, all of them free
    pub fn new(config: &PoolConfig, acquire_timeout: Duration) -> Self {
        let slots = config
            .vms
            .iter()
            .map(|spec| Slot {
                vm: VmHandle::new(&spec.name, &spec.address, spec.group),
                leased: false,
                needs_check: false,
            })
            .collect();

        let groups = config
            .groups
            .iter()
            .map(|g| g.id)
            .chain(config.vms.iter().map(|vm| vm.group))
            .collect();

        Self {
            slots: Mutex::new(slots),
            groups,
            acquire_timeout,
            released: Notify::new(),
            next_lease_id: AtomicU64::new(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_acquire(&self, group: GroupId, holder: &str) -> Option<VmHandle> {
        let mut slots = self.slots();
        let slot = slots.iter_mut().find(|s| s.vm.group == group && s.is_free())?;
        slot.leased = true;
        slot.vm.holder = Some(holder.to_string());
        slot.vm.lease_id = self.next_lease_id.fetch_add(1, Ordering::Relaxed);
        Some(slot.vm.clone())
    }

    /// Clears the health-check flag of a VM, making it available again
    pub fn recycle(&self, vm_name: &str) -> bool {
        let recycled = {
            let mut slots = self.slots();
            match slots.iter_mut().find(|s| s.vm.name == vm_name) {
                Some(slot) if slot.needs_check => {
                    slot.needs_check = false;
                    true
                }
                _ => false,
            }
        };

        if recycled {
            info!("VM {} recycled", vm_name);
            self.released.notify_waiters();
        }
        recycled
    }

    /// Number of VMs of `group` that can be acquired right now
    pub fn free_count(&self, group: GroupId) -> usize {
        self.slots()
            .iter()
            .filter(|s| s.vm.group == group && s.is_free())
            .count()
    }

    /// Number of VMs currently leased, across all groups
    pub fn leased_count(&self) -> usize {
        self.slots().iter().filter(|s| s.leased).count()
    }
}

#[async_trait]
impl VmManager for InMemoryVmPool {
    async fn acquire(&self, group: GroupId, holder: &str) -> Result<VmHandle, PoolError> {
        if !self.groups.contains(&group) {
            return Err(PoolError::UnknownGroup(group));
        }

        // A timeout too large to represent means waiting without a deadline
        let deadline = Instant::now().checked_add(self.acquire_timeout);

        loop {
            // Register interest before looking, so a release racing with the
            // scan is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(vm) = self.try_acquire(group, holder) {
                debug!("VM {} ({}) leased to {}", vm.name, vm.address, holder);
                return Ok(vm);
            }

            let Some(deadline) = deadline else {
                notified.await;
                continue;
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::NoVmAvailable { group });
            }

            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Err(PoolError::NoVmAvailable { group });
            }
        }
    }

    fn release(&self, vm: &VmHandle) -> bool {
        let released = {
            let mut slots = self.slots();
            match slots.iter_mut().find(|s| s.vm.name == vm.name) {
                Some(slot) if slot.leased && slot.vm.lease_id == vm.lease_id => {
                    slot.leased = false;
                    slot.vm.holder = None;
                    slot.vm.lease_id = 0;
                    true
                }
                Some(slot) if slot.leased => {
                    warn!(
                        "Stale release of VM {} (lease {}), now held by {:?} (lease {}); ignoring",
                        vm.name, vm.lease_id, slot.vm.holder, slot.vm.lease_id
                    );
                    false
                }
                Some(_) => {
                    debug!("VM {} released twice, ignoring", vm.name);
                    false
                }
                None => {
                    warn!("Release of unknown VM {}", vm.name);
                    false
                }
            }
        };

        if released {
            debug!("VM {} returned to the pool", vm.name);
            self.released.notify_waiters();
        }
        released
    }

    fn flag_for_check(&self, vm_name: &str) {
        let mut slots = self.slots();
        if let Some(slot) = slots.iter_mut().find(|s| s.vm.name == vm_name) {
            warn!("VM {} flagged for health check", vm_name);
            slot.needs_check = true;
        }
    }
}
