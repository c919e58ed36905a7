use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::address::Address;
use crate::block::{BlockChange, ParameterBlock};
use crate::error::{Error, Result};
use crate::field::{Field, TextField};
use crate::layout::{common, Location, Slot, SlotCategory, SLOT_COUNT};
use crate::notify::Notifier;
use crate::transport::Link;

/// Notification fanned out by a [`Patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchEvent {
    /// A previously absent slot now holds a block.
    SlotCreated(Slot),
    /// Bytes of an existing block changed.
    Changed { slot: Slot, change: BlockChange },
    /// Every slot of the category was dropped.
    Cleared(SlotCategory),
}

/// The one request this patch is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub address: Address,
    pub length: u32,
    pub sent_at: Instant,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct Patch {
    location: Location,
    slots: Vec<Option<ParameterBlock>>,
    listeners: Notifier<PatchEvent>,
    pending: Option<PendingRequest>,
}

impl Clone for Patch {
    fn clone(&self) -> Self {
        Self {
            location: self.location,
            slots: self.slots.clone(),
            listeners: Notifier::default(),
            pending: None,
        }
    }
}

impl Patch {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            slots: (0..SLOT_COUNT).map(|_| None).collect(),
            listeners: Notifier::default(),
            pending: None,
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn slot_address(&self, slot: Slot) -> Address {
        self.location.slot_address(slot)
    }

    pub fn block(&self, slot: Slot) -> Option<&ParameterBlock> {
        self.slots[slot.index()].as_ref()
    }

    /// Present blocks in iteration order.
    pub fn blocks(&self) -> impl Iterator<Item = (Slot, &ParameterBlock)> {
        Slot::ALL
            .iter()
            .filter_map(move |&slot| self.block(slot).map(|block| (slot, block)))
    }

    pub fn subscribe(&mut self) -> Receiver<PatchEvent> {
        self.listeners.subscribe()
    }

    pub fn subscribe_block(&mut self, slot: Slot) -> Option<Receiver<BlockChange>> {
        self.slots[slot.index()].as_mut().map(|block| block.subscribe())
    }

    pub fn pending_request(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Route an authoritative write into the matching block.
    ///
    /// A full first chunk for an absent slot creates the block; writes into a
    /// present block are forwarded to it, including writes addressed through
    /// the second selector of a long block.
    pub fn update_parameters(&mut self, address: Address, data: &[u8]) -> Result<()> {
        if address.location() != self.location.bytes() {
            return Err(Error::address(address, "address belongs to another patch"));
        }
        let selector = address.selector();
        if let Some(slot) = Slot::from_selector(selector) {
            let index = slot.index();
            if self.slots[index].is_none()
                && address.to_bytes()[3] == 0
                && data.len() >= slot.min_size()
            {
                let block = ParameterBlock::with_data(address, slot.size(), data)?;
                self.slots[index] = Some(block);
                self.answered(address);
                log::debug!("{:?}: {:?} loaded", self.location, slot);
                self.listeners.notify(PatchEvent::SlotCreated(slot));
                return Ok(());
            }
        }

        let slot = Slot::covering(selector)
            .ok_or_else(|| Error::address(address, "address not recognized"))?;
        let block = self.slots[slot.index()]
            .as_mut()
            .ok_or_else(|| Error::address(address, "address not recognized"))?;
        let change = block.update_parameters(address, data)?;
        self.answered(address);
        self.listeners.notify(PatchEvent::Changed { slot, change });
        Ok(())
    }

    // rejected replies keep the memo so the request is retried
    fn answered(&mut self, address: Address) {
        if self
            .pending
            .is_some_and(|pending| pending.address == address)
        {
            self.pending = None;
        }
    }

    /// Forget the outstanding request for `address` so it can be sent again.
    pub fn cancel_request(&mut self, address: Address) {
        self.answered(address);
    }

    pub fn clear_parameters(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.pending = None;
        for category in SlotCategory::ALL {
            self.listeners.notify(PatchEvent::Cleared(category));
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// First absent slot in iteration order.
    pub fn first_missing(&self) -> Option<Slot> {
        Slot::ALL
            .iter()
            .copied()
            .find(|slot| self.slots[slot.index()].is_none())
    }

    pub fn copy_from(&mut self, other: &Patch) -> Result<()> {
        if !other.is_complete() {
            return Err(Error::IncompletePatch);
        }
        for (slot, block) in other.blocks() {
            self.update_parameters(self.slot_address(slot), block.current())?;
        }
        Ok(())
    }

    pub fn is_equal_to(&self, other: &Patch) -> bool {
        self.slots
            .iter()
            .zip(other.slots.iter())
            .all(|pair| match pair {
                (None, None) => true,
                (Some(a), Some(b)) => a.is_equal_to(b),
                _ => false,
            })
    }

    pub fn name(&self) -> Option<String> {
        self.block(Slot::Common)
            .and_then(|block| block.text(&common::NAME).ok())
    }

    fn block_mut(&mut self, slot: Slot) -> Result<&mut ParameterBlock> {
        let address = self.slot_address(slot);
        self.slots[slot.index()]
            .as_mut()
            .ok_or_else(|| Error::address(address, "slot not loaded"))
    }

    fn changed(&mut self, slot: Slot, change: BlockChange) -> BlockChange {
        self.listeners.notify(PatchEvent::Changed { slot, change });
        change
    }

    pub fn value(&self, slot: Slot, field: &Field) -> Result<i32> {
        match self.block(slot) {
            Some(block) => block.value(field),
            None => Err(Error::address(self.slot_address(slot), "slot not loaded")),
        }
    }

    pub fn set_value(&mut self, slot: Slot, field: &Field, value: i32) -> Result<BlockChange> {
        let change = self.block_mut(slot)?.set_value(field, value)?;
        Ok(self.changed(slot, change))
    }

    pub fn set_text(&mut self, slot: Slot, field: &TextField, text: &str) -> Result<BlockChange> {
        let change = self.block_mut(slot)?.set_text(field, text)?;
        Ok(self.changed(slot, change))
    }

    pub fn update_value(&mut self, slot: Slot, field: &Field, value: i32) -> Result<BlockChange> {
        let change = self.block_mut(slot)?.update_value(field, value)?;
        Ok(self.changed(slot, change))
    }

    pub fn update_raw_value(&mut self, slot: Slot, field: &Field, raw: u32) -> Result<BlockChange> {
        let change = self.block_mut(slot)?.update_raw_value(field, raw)?;
        Ok(self.changed(slot, change))
    }

    pub fn mark_synced(&mut self, slot: Slot, offset: usize, length: usize) -> Result<()> {
        self.block_mut(slot)?.mark_synced(offset, length);
        Ok(())
    }

    /// Send RQ1 unless the outstanding request already targets `address`.
    ///
    /// Returns whether a request went out.
    pub fn request(&mut self, address: Address, length: u32, now: Instant, link: &mut Link) -> Result<bool> {
        if self
            .pending
            .is_some_and(|pending| pending.address == address)
        {
            return Ok(false);
        }
        link.request(address, length)?;
        self.pending = Some(PendingRequest {
            address,
            length,
            sent_at: now,
            attempts: 1,
        });
        Ok(true)
    }

    pub fn load_slot(&mut self, slot: Slot, now: Instant, link: &mut Link) -> Result<bool> {
        self.request(self.slot_address(slot), slot.size() as u32, now, link)
    }

    /// Request `length` bytes of `slot` starting at `offset`.
    pub fn load_range(&mut self, slot: Slot, offset: usize, length: usize, now: Instant, link: &mut Link) -> Result<bool> {
        let address = self.slot_address(slot).add(offset)?;
        self.request(address, length as u32, now, link)
    }

    /// Request the first absent slot, if any.
    pub fn load_missing(&mut self, now: Instant, link: &mut Link) -> Result<Option<Slot>> {
        match self.first_missing() {
            Some(slot) => {
                self.load_slot(slot, now, link)?;
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }

    /// Re-send a request that went unanswered for `timeout`.
    ///
    /// After `retries` re-sends the request is dropped and `Error::Timeout`
    /// returned.
    pub fn retry_pending(&mut self, now: Instant, timeout: Duration, retries: u32, link: &mut Link) -> Result<bool> {
        let Some(mut pending) = self.pending else {
            return Ok(false);
        };
        if now.duration_since(pending.sent_at) < timeout {
            return Ok(false);
        }
        if pending.attempts > retries {
            self.pending = None;
            return Err(Error::Timeout {
                address: pending.address,
                attempts: pending.attempts,
            });
        }
        log::warn!(
            "{:?}: no reply for {}, retrying (attempt {})",
            self.location,
            pending.address,
            pending.attempts + 1
        );
        link.request(pending.address, pending.length)?;
        pending.sent_at = now;
        pending.attempts += 1;
        self.pending = Some(pending);
        Ok(true)
    }

    fn transmit(&mut self, slot: Slot, link: &mut Link) -> Result<()> {
        let address = self.slot_address(slot);
        let block = self.block_mut(slot)?;
        link.send_data(address, block.current())?;
        let len = block.len();
        block.mark_synced(0, len);
        Ok(())
    }

    /// Write every block to the device.
    pub fn save_parameters(&mut self, link: &mut Link) -> Result<()> {
        if !self.is_complete() {
            return Err(Error::IncompletePatch);
        }
        for slot in Slot::ALL {
            self.transmit(slot, link)?;
        }
        Ok(())
    }

    /// Write only blocks with unsynced edits. Returns how many were sent.
    pub fn save_modified_parameters(&mut self, link: &mut Link) -> Result<usize> {
        let modified: Vec<Slot> = self
            .blocks()
            .filter(|(_, block)| block.has_any_changed())
            .map(|(slot, _)| slot)
            .collect();
        for &slot in &modified {
            self.transmit(slot, link)?;
        }
        Ok(modified.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::layout::tone;
    use crate::protocol::Message;

    /// Synthetic payload for `slot`: every byte distinct per slot, all 7-bit.
    pub(crate) fn payload(slot: Slot) -> Vec<u8> {
        (0..slot.size())
            .map(|i| ((i + slot.index() * 3) % 0x60) as u8)
            .collect()
    }

    pub(crate) fn complete_patch(location: Location) -> Patch {
        let mut patch = Patch::new(location);
        for slot in Slot::ALL {
            patch
                .update_parameters(patch.slot_address(slot), &payload(slot))
                .unwrap();
        }
        patch
    }

    #[test]
    fn test_routes_tone_payload() {
        let mut patch = Patch::new(Location::Temporary);
        let events = patch.subscribe();
        let address = patch.slot_address(Slot::Tone(1));

        patch.update_parameters(address, &payload(Slot::Tone(1))).unwrap();

        assert!(patch.block(Slot::Tone(1)).is_some());
        assert_eq!(patch.blocks().count(), 1);
        assert!(!patch.is_complete());
        assert_eq!(events.try_recv().ok(), Some(PatchEvent::SlotCreated(Slot::Tone(1))));
    }

    #[test]
    fn test_all_slots_complete_patch() {
        let patch = complete_patch(Location::Temporary);
        assert!(patch.is_complete());
        assert_eq!(patch.first_missing(), None);
    }

    #[test]
    fn test_partial_write_without_block_is_rejected() {
        let mut patch = Patch::new(Location::Temporary);
        let address = patch.slot_address(Slot::Tone(2)).add(4).unwrap();
        assert!(matches!(
            patch.update_parameters(address, &[1, 2]),
            Err(Error::Address { .. })
        ));

        let short = &payload(Slot::Common)[..4];
        assert!(patch.update_parameters(patch.slot_address(Slot::Common), short).is_err());
        assert!(patch.block(Slot::Common).is_none());
    }

    #[test]
    fn test_unknown_selector_and_location() {
        let mut patch = Patch::new(Location::Temporary);
        let unknown = Address::from_bytes(0x10, 0x00, 0x30, 0x00).unwrap();
        assert!(patch.update_parameters(unknown, &[0; 4]).is_err());

        let user = Address::from_bytes(0x20, 0x00, 0x00, 0x00).unwrap();
        assert!(patch.update_parameters(user, &payload(Slot::Common)).is_err());
    }

    #[test]
    fn test_effect_split_across_selectors() {
        let mut patch = Patch::new(Location::Temporary);
        let base = patch.slot_address(Slot::Flanger);
        let data = payload(Slot::Flanger);

        patch.update_parameters(base, &data[..0x80]).unwrap();
        let second = Address::from_bytes(0x10, 0x00, 0x07, 0x00).unwrap();
        patch.update_parameters(second, &data[0x80..]).unwrap();

        let block = patch.block(Slot::Flanger).unwrap();
        assert_eq!(block.current(), &data[..]);
        assert!(!block.has_any_changed());
    }

    #[test]
    fn test_clear_notifies_per_category() {
        let mut patch = complete_patch(Location::Temporary);
        let events = patch.subscribe();
        patch.clear_parameters();
        let cleared: Vec<PatchEvent> = events.try_iter().collect();
        assert_eq!(cleared.len(), SlotCategory::ALL.len());
        assert_eq!(patch.blocks().count(), 0);
    }

    #[test]
    fn test_copy_from_requires_complete_source() {
        let mut target = Patch::new(Location::Temporary);
        let mut source = Patch::new(Location::user(2, 5).unwrap());
        source
            .update_parameters(source.slot_address(Slot::Common), &payload(Slot::Common))
            .unwrap();
        assert!(matches!(target.copy_from(&source), Err(Error::IncompletePatch)));

        let source = complete_patch(Location::user(2, 5).unwrap());
        target.copy_from(&source).unwrap();
        assert!(target.is_complete());
        assert!(target.is_equal_to(&source));
        assert_eq!(target.location(), Location::Temporary);
    }

    #[test]
    fn test_is_equal_to_detects_edits() {
        let a = complete_patch(Location::Temporary);
        let mut b = a.clone();
        assert!(a.is_equal_to(&b));
        b.set_value(Slot::Tone(3), &tone::FILTER_CUTOFF, 1).unwrap();
        assert!(!a.is_equal_to(&b));
        assert!(!a.is_equal_to(&Patch::new(Location::Temporary)));
    }

    #[test]
    fn test_request_dedup_memo() {
        let mut patch = Patch::new(Location::Temporary);
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let now = Instant::now();
        let mut link = Link::new(0x10, &mut sent);

        assert!(patch.load_slot(Slot::Common, now, &mut link).unwrap());
        assert!(!patch.load_slot(Slot::Common, now, &mut link).unwrap());
        assert!(patch.load_slot(Slot::Tone(1), now, &mut link).unwrap());
        drop(link);
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            Message::parse(&sent[1]),
            Message::DataRequest { length: 0x38, .. }
        ));
    }

    #[test]
    fn test_load_missing_walks_slots() {
        let mut patch = Patch::new(Location::Temporary);
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let now = Instant::now();
        let mut link = Link::new(0x10, &mut sent);

        assert_eq!(patch.load_missing(now, &mut link).unwrap(), Some(Slot::Common));
        patch
            .update_parameters(patch.slot_address(Slot::Common), &payload(Slot::Common))
            .unwrap();
        assert_eq!(patch.load_missing(now, &mut link).unwrap(), Some(Slot::Tone(1)));

        let mut full = complete_patch(Location::Temporary);
        assert_eq!(full.load_missing(now, &mut link).unwrap(), None);
        drop(link);
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_block_subscription() {
        let mut patch = complete_patch(Location::Temporary);
        assert!(Patch::new(Location::Temporary).subscribe_block(Slot::Common).is_none());
        let rx = patch.subscribe_block(Slot::Tone(1)).unwrap();
        patch.set_value(Slot::Tone(1), &tone::AMP_LEVEL, 12).unwrap();
        patch.set_value(Slot::Tone(2), &tone::AMP_LEVEL, 12).unwrap();
        let seen: Vec<BlockChange> = rx.try_iter().collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].offset, tone::AMP_LEVEL.offset);
    }

    #[test]
    fn test_reply_clears_memo() {
        let mut patch = Patch::new(Location::Temporary);
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let now = Instant::now();
        let mut link = Link::new(0x10, &mut sent);

        patch.load_slot(Slot::Common, now, &mut link).unwrap();
        patch
            .update_parameters(patch.slot_address(Slot::Common), &payload(Slot::Common))
            .unwrap();
        assert!(patch.pending_request().is_none());
    }

    #[test]
    fn test_rejected_reply_keeps_memo() {
        let mut patch = Patch::new(Location::Temporary);
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let now = Instant::now();
        let mut link = Link::new(0x10, &mut sent);

        patch.load_slot(Slot::Common, now, &mut link).unwrap();
        let address = patch.slot_address(Slot::Common);
        assert!(patch.update_parameters(address, &[0x20; 4]).is_err());
        assert_eq!(patch.pending_request().map(|p| p.address), Some(address));

        patch.cancel_request(address);
        assert!(patch.pending_request().is_none());
    }

    #[test]
    fn test_retry_then_timeout() {
        let mut patch = Patch::new(Location::Temporary);
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let start = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut link = Link::new(0x10, &mut sent);

        patch.load_slot(Slot::Common, start, &mut link).unwrap();
        assert!(!patch.retry_pending(start, timeout, 1, &mut link).unwrap());
        let later = start + timeout;
        assert!(patch.retry_pending(later, timeout, 1, &mut link).unwrap());
        let much_later = later + timeout;
        assert!(matches!(
            patch.retry_pending(much_later, timeout, 1, &mut link),
            Err(Error::Timeout { attempts: 2, .. })
        ));
        assert!(patch.pending_request().is_none());
        drop(link);
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_save_parameters() {
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let mut incomplete = Patch::new(Location::Temporary);
        {
            let mut link = Link::new(0x10, &mut sent);
            assert!(matches!(
                incomplete.save_parameters(&mut link),
                Err(Error::IncompletePatch)
            ));
        }
        assert!(sent.is_empty());

        let mut patch = complete_patch(Location::user(0, 1).unwrap());
        let mut link = Link::new(0x10, &mut sent);
        patch.save_parameters(&mut link).unwrap();
        drop(link);
        assert_eq!(sent.len(), SLOT_COUNT);
        match Message::parse(&sent[0]) {
            Message::DataSet { address, data, .. } => {
                assert_eq!(address.to_bytes(), [0x20, 0x01, 0x00, 0x00]);
                assert_eq!(data, payload(Slot::Common));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_save_modified_parameters() {
        let mut patch = complete_patch(Location::Temporary);
        patch.set_value(Slot::Tone(2), &tone::AMP_LEVEL, 7).unwrap();
        patch.set_value(Slot::Reverb, &crate::layout::effect::parameter(3), -5).unwrap();

        let mut sent: Vec<Vec<u8>> = Vec::new();
        let mut link = Link::new(0x10, &mut sent);
        assert_eq!(patch.save_modified_parameters(&mut link).unwrap(), 2);
        assert_eq!(patch.save_modified_parameters(&mut link).unwrap(), 0);
        drop(link);
        assert_eq!(sent.len(), 2);
    }
}
