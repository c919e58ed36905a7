//! Drives a full `Session` against a simulated device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gaiaedit::config::EditorConfig;
use gaiaedit::layout::{effect, tone, Location, Slot, MAX_CHUNK};
use gaiaedit::protocol::{self, Message};
use gaiaedit::{Address, Result, Session, SessionEvent, Transport};

/// Answers every RQ1 with exactly the requested bytes, split into DT1s of at
/// most 128 bytes like the hardware does. Replies queue up until drained.
struct FakeDevice {
    memory: Vec<Vec<u8>>,
    requests: Vec<(Address, u32)>,
    writes: Vec<(Address, Vec<u8>)>,
    replies: VecDeque<Vec<u8>>,
}

fn slot_bytes(slot: Slot) -> Vec<u8> {
    (0..slot.size())
        .map(|i| ((i * 7 + slot.index() * 5) % 0x50) as u8)
        .collect()
}

impl FakeDevice {
    fn new() -> Self {
        Self {
            memory: Slot::ALL.iter().map(|&slot| slot_bytes(slot)).collect(),
            requests: Vec::new(),
            writes: Vec::new(),
            replies: VecDeque::new(),
        }
    }

    fn locate(address: Address) -> Option<(Slot, usize)> {
        let location = Location::from_bytes(address.location())?;
        let slot = Slot::covering(address.selector())?;
        let offset = location.slot_address(slot).offset_of(address).ok()?;
        Some((slot, offset as usize))
    }

    fn reply(&mut self, address: Address, length: u32) {
        let Some((slot, start)) = Self::locate(address) else {
            return;
        };
        let base = address.value() - start as u32;
        let end = (start + length as usize).min(slot.size());
        let block = &self.memory[slot.index()];
        let mut at = start;
        while at < end {
            let chunk_end = (at + MAX_CHUNK).min(end);
            let chunk_address = Address::from_value(base + at as u32).unwrap();
            self.replies
                .push_back(protocol::data_set(0x10, chunk_address, &block[at..chunk_end]));
            at = chunk_end;
        }
    }

    fn store(&mut self, address: Address, data: &[u8]) {
        if let Some((slot, offset)) = Self::locate(address) {
            self.memory[slot.index()][offset..offset + data.len()].copy_from_slice(data);
        }
    }
}

impl Transport for FakeDevice {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        match Message::parse(message) {
            Message::DataRequest { address, length, .. } => {
                self.requests.push((address, length));
                self.reply(address, length);
            }
            Message::DataSet { address, data, .. } => {
                self.store(address, &data);
                self.writes.push((address, data));
            }
            _ => {}
        }
        Ok(())
    }
}

fn drain(session: &mut Session<FakeDevice>, now: Instant) {
    while let Some(reply) = session.transport_mut().replies.pop_front() {
        session.handle_raw(&reply, now).unwrap();
    }
}

fn fetched_session() -> Session<FakeDevice> {
    let mut session = Session::new(FakeDevice::new(), &EditorConfig::default());
    let now = Instant::now();
    session.fetch_temporary(|_| {}, now).unwrap();
    drain(&mut session, now);
    assert!(session.temporary().is_complete());
    session
}

#[test]
fn completion_fires_once_after_every_slot() {
    let mut session = Session::new(FakeDevice::new(), &EditorConfig::default());
    let events = session.subscribe();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let now = Instant::now();

    session
        .fetch_temporary(
            move |patch| {
                assert!(patch.is_complete());
                counter.fetch_add(1, Ordering::SeqCst);
            },
            now,
        )
        .unwrap();
    drain(&mut session, now);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let requests = &session.transport().requests;
    assert_eq!(requests.len(), Slot::ALL.len());
    for (slot, (address, length)) in Slot::ALL.iter().zip(requests) {
        assert_eq!(*address, Location::Temporary.slot_address(*slot));
        assert_eq!(*length as usize, slot.size());
    }

    for (slot, block) in session.temporary().blocks() {
        assert_eq!(block.current(), &slot_bytes(slot)[..]);
        assert!(!block.has_any_changed());
    }
    let complete: Vec<SessionEvent> = events.try_iter().collect();
    assert_eq!(complete, vec![SessionEvent::SyncComplete(Location::Temporary)]);
}

#[test]
fn edits_are_echoed_to_the_device() {
    let mut session = fetched_session();
    let now = Instant::now();
    session.transport_mut().writes.clear();

    session.edit(Slot::Tone(3), &tone::FILTER_RESONANCE, 100, now).unwrap();
    let writes = &session.transport().writes;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0.to_bytes(), [0x10, 0x00, 0x03, 0x0F]);
    assert_eq!(writes[0].1, vec![100]);

    assert_eq!(session.save_temporary_modified().unwrap(), 0);
}

#[test]
fn effect_type_change_rereads_parameters() {
    let mut session = fetched_session();
    let now = Instant::now();
    let requests_before = session.transport().requests.len();

    session.transport_mut().memory[Slot::Reverb.index()][5] = 0x33;
    session.edit(Slot::Reverb, &effect::TYPE, 1, now).unwrap();

    let requests = &session.transport().requests;
    assert_eq!(requests.len(), requests_before + 1);
    let (address, length) = requests[requests.len() - 1];
    assert_eq!(address.to_bytes(), [0x10, 0x00, 0x0A, 0x01]);
    assert_eq!(length, 0x80);

    drain(&mut session, now);
    let reverb = session.temporary().block(Slot::Reverb).unwrap();
    assert_eq!(reverb.current()[0], 1);
    assert_eq!(reverb.current()[5], 0x33);
    assert!(!reverb.has_any_changed());
}

#[test]
fn program_change_refetches_whole_patch() {
    let mut session = fetched_session();
    let events = session.subscribe();
    let now = Instant::now();

    let change = Message::ProgramChange {
        channel: 0,
        program: 9,
    };
    session.handle_message(change, now).unwrap();
    assert!(!session.temporary().is_complete());
    drain(&mut session, now);

    assert!(session.temporary().is_complete());
    assert_eq!(session.transport().requests.len(), Slot::ALL.len() * 2);
    let seen: Vec<SessionEvent> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            SessionEvent::ProgramChanged { program: 9 },
            SessionEvent::SyncComplete(Location::Temporary),
        ]
    );
}

#[test]
fn user_patch_store_and_fetch() {
    let mut session = fetched_session();
    let now = Instant::now();
    session.edit_name("Stored Lead", now).unwrap();
    let source = session.temporary().clone();
    session.transport_mut().writes.clear();

    session.write_user(4, 2, &source).unwrap();
    let writes = &session.transport().writes;
    assert_eq!(writes.len(), Slot::ALL.len());
    assert!(writes.iter().all(|(address, _)| address.location() == (0x20, 34)));
    assert!(session.user_patch(4, 2).unwrap().is_equal_to(&source));

    let events = session.subscribe();
    session.fetch_user(1, 0, |_| {}, now).unwrap();
    drain(&mut session, now);
    let fetched = session.user_patch(1, 0).unwrap();
    assert!(fetched.is_complete());
    // the device stores one memory image, so every user location reads back the same bytes
    assert_eq!(fetched.name().as_deref(), Some("Stored Lead"));
    let seen: Vec<SessionEvent> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![SessionEvent::SyncComplete(Location::User { bank: 1, index: 0 })]
    );
}
