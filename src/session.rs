//! One editing session against one device.
//!
//! All model mutation happens here, one inbound message at a time. Callers
//! feed raw MIDI in with [`Session::handle_raw`] and call [`Session::tick`]
//! periodically so unanswered requests are retried.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::address::Address;
use crate::block::BlockChange;
use crate::config::EditorConfig;
use crate::control;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::layout::{common, DeviceCommand, Location, Slot};
use crate::notify::Notifier;
use crate::patch::Patch;
use crate::protocol::{Message, Mismatch};
use crate::sync::{PatchSync, SyncState, TrackedPatch};
use crate::transport::{Link, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceIdentified { device_id: u8, revision: [u8; 4] },
    /// Every slot of the patch at this location is now loaded.
    SyncComplete(Location),
    /// The device switched patches; the temporary patch is being re-read.
    ProgramChanged { program: u8 },
    /// Inbound SysEx that looked like ours but failed verification.
    Mismatch(Mismatch),
}

pub struct Session<T: Transport> {
    transport: T,
    device_id: u8,
    channel: u8,
    timeout: Duration,
    retries: u32,
    temporary: TrackedPatch,
    user: BTreeMap<Location, TrackedPatch>,
    listeners: Notifier<SessionEvent>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: &EditorConfig) -> Self {
        Self {
            transport,
            device_id: config.device_id,
            channel: config.device_channel,
            timeout: config.request_timeout(),
            retries: config.request_retries,
            temporary: TrackedPatch::new(Location::Temporary, true),
            user: BTreeMap::new(),
            listeners: Notifier::default(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        self.listeners.subscribe()
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn temporary(&self) -> &Patch {
        &self.temporary.patch
    }

    pub fn user_patch(&self, bank: u8, index: u8) -> Option<&Patch> {
        let location = Location::user(bank, index).ok()?;
        self.user.get(&location).map(|tracked| &tracked.patch)
    }

    /// Broadcast an identity request; the reply sets the device id.
    pub fn identify(&mut self) -> Result<()> {
        Link::new(self.device_id, &mut self.transport).identify()
    }

    pub fn handle_raw(&mut self, raw: &[u8], now: Instant) -> Result<()> {
        self.handle_message(Message::parse(raw), now)
    }

    /// Apply one inbound message to the model.
    ///
    /// Bad inbound data is logged and dropped; only failures to send come
    /// back as errors.
    pub fn handle_message(&mut self, message: Message, now: Instant) -> Result<()> {
        match message {
            Message::IdentityReply {
                device_id,
                revision,
            } => {
                log::info!("device identified: id {:#04X}, revision {:02X?}", device_id, revision);
                self.device_id = device_id;
                self.listeners.notify(SessionEvent::DeviceIdentified {
                    device_id,
                    revision,
                });
            }
            Message::DataSet { address, data, .. } => {
                if let Some(command) = DeviceCommand::from_address(address) {
                    log::info!("device command {:?}, re-reading temporary patch", command);
                    self.restart_temporary(now)?;
                } else {
                    self.route_data(address, &data);
                }
            }
            Message::ProgramChange { channel, program } if channel == self.channel => {
                log::info!("program change to {}", program);
                self.listeners.notify(SessionEvent::ProgramChanged { program });
                self.restart_temporary(now)?;
            }
            Message::ControlChange {
                channel,
                controller,
                value,
            } if channel == self.channel => {
                if let Err(e) = control::apply(&mut self.temporary.patch, controller, value) {
                    log::warn!("control {} = {} not applied: {}", controller, value, e);
                }
            }
            Message::Unrecognized {
                raw,
                mismatch: Some(mismatch),
            } => {
                log::warn!("dropping {:?} message ({} bytes)", mismatch, raw.len());
                self.listeners.notify(SessionEvent::Mismatch(mismatch));
            }
            _ => {}
        }
        self.pump(now)
    }

    fn route_data(&mut self, address: Address, data: &[u8]) {
        let target = match Location::from_bytes(address.location()) {
            Some(Location::Temporary) => Some(&mut self.temporary),
            Some(location) => self.user.get_mut(&location),
            None => None,
        };
        let Some(tracked) = target else {
            log::debug!("ignoring DT1 for untracked address {}", address);
            return;
        };
        if let Err(e) = tracked.patch.update_parameters(address, data) {
            log::warn!("DT1 {} rejected: {}", address, e);
        }
    }

    fn restart_temporary(&mut self, now: Instant) -> Result<()> {
        self.temporary.patch.clear_parameters();
        let mut link = Link::new(self.device_id, &mut self.transport);
        self.temporary
            .start_sync(PatchSync::attach(|_| {}), now, &mut link)?;
        Ok(())
    }

    /// Drain patch events: echo live edits and advance running fetches.
    pub fn pump(&mut self, now: Instant) -> Result<()> {
        let mut link = Link::new(self.device_id, &mut self.transport);
        let tracked = std::iter::once(&mut self.temporary).chain(self.user.values_mut());
        for tracked in tracked {
            if tracked.pump(now, &mut link)? {
                self.listeners
                    .notify(SessionEvent::SyncComplete(tracked.patch.location()));
            }
        }
        Ok(())
    }

    /// Retry overdue requests.
    ///
    /// A request that stays unanswered through every retry is abandoned, the
    /// fetch for that patch stops, and the timeout is returned.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let mut link = Link::new(self.device_id, &mut self.transport);
        let mut timed_out = None;
        let tracked = std::iter::once(&mut self.temporary).chain(self.user.values_mut());
        for tracked in tracked {
            match tracked.patch.retry_pending(now, self.timeout, self.retries, &mut link) {
                Ok(_) => {}
                Err(e @ Error::Timeout { .. }) => {
                    log::warn!("{:?}: {}", tracked.patch.location(), e);
                    tracked.stop_sync();
                    timed_out.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match timed_out {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn started(&mut self, location: Location, state: SyncState) -> SyncState {
        if state == SyncState::Complete {
            self.listeners.notify(SessionEvent::SyncComplete(location));
        }
        state
    }

    /// Load every absent slot of the temporary patch.
    pub fn fetch_temporary(
        &mut self,
        on_complete: impl FnOnce(&Patch) + Send + 'static,
        now: Instant,
    ) -> Result<SyncState> {
        let mut link = Link::new(self.device_id, &mut self.transport);
        let state = self
            .temporary
            .start_sync(PatchSync::attach(on_complete), now, &mut link)?;
        Ok(self.started(Location::Temporary, state))
    }

    /// Load every absent slot of a stored user patch.
    pub fn fetch_user(
        &mut self,
        bank: u8,
        index: u8,
        on_complete: impl FnOnce(&Patch) + Send + 'static,
        now: Instant,
    ) -> Result<SyncState> {
        let location = Location::user(bank, index)?;
        let mut link = Link::new(self.device_id, &mut self.transport);
        let tracked = self
            .user
            .entry(location)
            .or_insert_with(|| TrackedPatch::new(location, false));
        let state = tracked.start_sync(PatchSync::attach(on_complete), now, &mut link)?;
        Ok(self.started(location, state))
    }

    /// Edit a field of the temporary patch; the change goes out immediately.
    pub fn edit(&mut self, slot: Slot, field: &Field, value: i32, now: Instant) -> Result<BlockChange> {
        let change = self.temporary.patch.set_value(slot, field, value)?;
        self.pump(now)?;
        Ok(change)
    }

    pub fn edit_name(&mut self, name: &str, now: Instant) -> Result<BlockChange> {
        let change = self
            .temporary
            .patch
            .set_text(Slot::Common, &common::NAME, name)?;
        self.pump(now)?;
        Ok(change)
    }

    /// Replace the temporary patch model with `source`. Nothing is sent;
    /// follow with [`Session::save_temporary`] to play it on the device.
    pub fn load_temporary_from(&mut self, source: &Patch, now: Instant) -> Result<()> {
        self.temporary.patch.copy_from(source)?;
        self.pump(now)
    }

    /// Send the whole temporary patch to the device.
    pub fn save_temporary(&mut self) -> Result<()> {
        let mut link = Link::new(self.device_id, &mut self.transport);
        self.temporary.patch.save_parameters(&mut link)
    }

    /// Send only the temporary blocks with unsent edits.
    pub fn save_temporary_modified(&mut self) -> Result<usize> {
        let mut link = Link::new(self.device_id, &mut self.transport);
        self.temporary.patch.save_modified_parameters(&mut link)
    }

    /// Store `source` into a user memory on the device.
    pub fn write_user(&mut self, bank: u8, index: u8, source: &Patch) -> Result<()> {
        let location = Location::user(bank, index)?;
        let mut link = Link::new(self.device_id, &mut self.transport);
        let tracked = self
            .user
            .entry(location)
            .or_insert_with(|| TrackedPatch::new(location, false));
        tracked.patch.copy_from(source)?;
        tracked.patch.save_parameters(&mut link)?;
        log::info!("wrote {:?} to {:?}", source.name(), location);
        Ok(())
    }
}
