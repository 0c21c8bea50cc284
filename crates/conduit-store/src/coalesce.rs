use std::sync::atomic::{AtomicBool, Ordering};

use crate::event::ResourceKind;

/// Limits reloads to one in flight per resource kind
///
/// Requests that arrive while a reload runs collapse into a single
/// follow-up pass, so a burst of writes costs at most two reloads.
#[derive(Debug, Default)]
pub(crate) struct ReloadCoalescer {
    slots: [Slot; ResourceKind::COUNT],
}

#[derive(Debug, Default)]
struct Slot {
    running: AtomicBool,
    pending: AtomicBool,
}

impl ReloadCoalescer {
    /// Record a reload request
    ///
    /// Returns `true` when the caller now owns the slot and must run the
    /// reload loop; `false` when a running reload will pick it up.
    pub fn request(&self, kind: ResourceKind) -> bool {
        let slot = &self.slots[kind.index()];
        slot.pending.store(true, Ordering::SeqCst);
        slot.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Consume the pending flag before starting a reload pass
    pub fn start_pass(&self, kind: ResourceKind) {
        self.slots[kind.index()].pending.store(false, Ordering::SeqCst);
    }

    /// Release the slot after a pass
    ///
    /// Returns `true` when another request arrived during the pass and the
    /// caller reacquired the slot to run it.
    pub fn finish_pass(&self, kind: ResourceKind) -> bool {
        let slot = &self.slots[kind.index()];
        slot.running.store(false, Ordering::SeqCst);

        slot.pending.load(Ordering::SeqCst)
            && slot
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}
