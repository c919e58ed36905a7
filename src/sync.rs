use std::time::Instant;

use crossbeam_channel::Receiver;

use crate::block::{BlockChange, ChangeOrigin};
use crate::error::Result;
use crate::layout::{effect, Location, Slot, SlotKind};
use crate::patch::{Patch, PatchEvent};
use crate::transport::Link;

pub type Completion = Box<dyn FnOnce(&Patch) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// A request for the slot was just sent.
    Requested(Slot),
    /// The request for the slot is already outstanding.
    Waiting(Slot),
    Complete,
    Detached,
}

/// Drives one patch to completeness, one outstanding request at a time.
pub struct PatchSync {
    attached: bool,
    on_complete: Option<Completion>,
}

impl std::fmt::Debug for PatchSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchSync")
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

impl PatchSync {
    pub fn attach(on_complete: impl FnOnce(&Patch) + Send + 'static) -> Self {
        Self {
            attached: true,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.on_complete = None;
    }

    /// Request the first absent slot, or fire completion once nothing is absent.
    pub fn advance(&mut self, patch: &mut Patch, now: Instant, link: &mut Link) -> Result<SyncState> {
        if !self.attached {
            return Ok(SyncState::Detached);
        }
        match patch.first_missing() {
            Some(slot) => {
                if patch.load_slot(slot, now, link)? {
                    Ok(SyncState::Requested(slot))
                } else {
                    Ok(SyncState::Waiting(slot))
                }
            }
            None => {
                self.attached = false;
                log::info!("{:?}: patch complete", patch.location());
                if let Some(on_complete) = self.on_complete.take() {
                    on_complete(patch);
                }
                Ok(SyncState::Complete)
            }
        }
    }
}

/// Send a local edit to the device and mark it synced.
///
/// Only genuine edits that actually differ from the device are sent. Changing
/// an effect's type re-reads the rest of that effect block, since the other
/// bytes mean something else under the new type.
pub fn transmit_edit(patch: &mut Patch, slot: Slot, change: &BlockChange, now: Instant, link: &mut Link) -> Result<bool> {
    if change.origin != ChangeOrigin::Edit {
        return Ok(false);
    }
    let Some(block) = patch.block(slot) else {
        return Ok(false);
    };
    if !block.has_changed(change.offset, change.length) {
        return Ok(false);
    }

    let end = (change.offset + change.length).min(block.len());
    let data = block.current()[change.offset..end].to_vec();
    let address = patch.slot_address(slot).add(change.offset)?;
    link.send_data(address, &data)?;
    patch.mark_synced(slot, change.offset, data.len())?;

    if let SlotKind::Effect(kind) = slot.kind() {
        if change.offset <= effect::TYPE.offset && effect::TYPE.offset < end {
            log::debug!("{:?} type changed, re-reading parameters", slot);
            // a read still in flight describes the previous type
            patch.cancel_request(patch.slot_address(slot).add(effect::TYPE.end())?);
            patch.load_range(slot, effect::TYPE.end(), kind.type_dependent_len(), now, link)?;
        }
    }
    Ok(true)
}

/// A patch with its event subscription and optional fetch in progress.
#[derive(Debug)]
pub struct TrackedPatch {
    pub patch: Patch,
    events: Receiver<PatchEvent>,
    sync: Option<PatchSync>,
    live: bool,
}

impl TrackedPatch {
    /// `live` patches echo local edits to the device as they happen.
    pub fn new(location: Location, live: bool) -> Self {
        let mut patch = Patch::new(location);
        let events = patch.subscribe();
        Self {
            patch,
            events,
            sync: None,
            live,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.as_ref().is_some_and(PatchSync::is_attached)
    }

    /// Start fetching all absent slots, replacing any fetch in progress.
    pub fn start_sync(&mut self, sync: PatchSync, now: Instant, link: &mut Link) -> Result<SyncState> {
        let sync = self.sync.insert(sync);
        sync.advance(&mut self.patch, now, link)
    }

    pub fn stop_sync(&mut self) {
        if let Some(sync) = self.sync.as_mut() {
            sync.detach();
        }
        self.sync = None;
    }

    /// Handle queued patch events. Returns true when a fetch completed.
    pub fn pump(&mut self, now: Instant, link: &mut Link) -> Result<bool> {
        let mut completed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                PatchEvent::Changed { slot, change } if self.live => {
                    transmit_edit(&mut self.patch, slot, &change, now, link)?;
                }
                PatchEvent::Changed { .. } => {}
                PatchEvent::SlotCreated(_) | PatchEvent::Cleared(_) => {
                    if let Some(sync) = self.sync.as_mut() {
                        if sync.advance(&mut self.patch, now, link)? == SyncState::Complete {
                            completed = true;
                            self.sync = None;
                        }
                    }
                }
            }
        }
        Ok(completed)
    }
}
