//! Reader for the device's USB backup dump.
//!
//! A dump is a fixed header followed by 64 patch records, bank-major. Inside a
//! record every parameter is stored in as few bits as its range needs, packed
//! MSB-first with no regard for byte boundaries. Unpacking yields the same
//! per-slot byte arrays a DT1 from the device would carry.

use std::path::Path;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::layout::{
    Location, Slot, SlotKind, ARPEGGIO_COMMON_SIZE, ARPEGGIO_PATTERN_SIZE, BANK_COUNT,
    COMMON_SIZE, EFFECT_SIZE, PATCHES_PER_BANK, SLOT_COUNT, TONE_SIZE,
};
use crate::patch::Patch;

pub const HEADER: [u8; HEADER_SIZE] = [
    0x00, 0x00, 0x00, 0x2C, b'S', b'V', b'D', b'2',
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    b'P', b'A', b'T', b'a', b'G', b'A', b'I', b'0',
    0x00, 0x00, 0x00, 0x30, 0x00, 0x00, 0xE2, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x03, 0x88,
];
pub const HEADER_SIZE: usize = 0x30;
pub const RECORD_SIZE: usize = 0x388;
pub const PATCH_COUNT: usize = (BANK_COUNT * PATCHES_PER_BANK) as usize;
pub const FILE_SIZE: usize = HEADER_SIZE + PATCH_COUNT * RECORD_SIZE;

// Bit widths, one per output byte.
const COMMON_WIDTHS: [u8; COMMON_SIZE] = [
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, // name
    7, 3, 3, 4, 4, 3, 3, 3, 7, 3, 3, 5, 5, 3,
    3, 3, 3, 3, 3, 3, // tone switch/select
    3, 3, 3, 7, 4, 3, 3, 3,
];

const TONE_WIDTHS: [u8; TONE_SIZE] = [
    3, 3, 3, 6, 7, 7, 7, 7, 7, 7,
    3, 3, 7, 5, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 3, 7,
    3, 5, 7, 3, 7, 7, 7, 7, 3, 7,
    3, 5, 3, 7, 7, 7, 7, 7, 7, 3,
    3, 3, 7, 7, 3, 3,
];

const EFFECT_WIDTHS: [u8; EFFECT_SIZE] = nibble_widths(5);

const ARPEGGIO_WIDTHS: [u8; ARPEGGIO_COMMON_SIZE] = [4, 4, 4, 3, 7, 7, 4, 3];

const PATTERN_WIDTHS: [u8; ARPEGGIO_PATTERN_SIZE] = nibble_widths(7);

/// A leading field of `first` bits followed by nibbles.
const fn nibble_widths<const N: usize>(first: u8) -> [u8; N] {
    let mut widths = [4u8; N];
    widths[0] = first;
    widths
}

// Added back after extraction, as (offset, bias).
const COMMON_BIASES: &[(usize, u8)] = &[(0x16, 60)];
const TONE_BIASES: &[(usize, u8)] = &[(0x03, 32), (0x04, 14), (0x0D, 54)];
const ARPEGGIO_BIASES: &[(usize, u8)] = &[(0x03, 61), (0x06, 1)];

/// Byte offset of each slot's packed region, in slot order.
const SLOT_OFFSETS: [usize; SLOT_COUNT] = [
    0x000, 0x018, 0x041, 0x06A, 0x093, 0x0D4, 0x115, 0x156, 0x197, 0x19C, 0x1AD, 0x1BE, 0x1CF,
    0x1E0, 0x1F1, 0x202, 0x213, 0x224, 0x235, 0x246, 0x257, 0x268, 0x279, 0x28A, 0x29B,
];

fn tables(kind: SlotKind) -> (&'static [u8], &'static [(usize, u8)]) {
    match kind {
        SlotKind::Common => (&COMMON_WIDTHS, COMMON_BIASES),
        SlotKind::Tone => (&TONE_WIDTHS, TONE_BIASES),
        SlotKind::Effect(_) => (&EFFECT_WIDTHS, &[]),
        SlotKind::ArpeggioCommon => (&ARPEGGIO_WIDTHS, ARPEGGIO_BIASES),
        SlotKind::ArpeggioPattern => (&PATTERN_WIDTHS, &[]),
    }
}

/// MSB-first bit cursor over a record.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8], byte_offset: usize) -> Self {
        Self {
            data,
            bit: byte_offset * 8,
        }
    }

    /// Read up to 8 bits; a field spans at most two bytes.
    fn read(&mut self, width: u8) -> u8 {
        let byte = self.bit / 8;
        let shift = self.bit % 8;
        let hi = self.data.get(byte).copied().unwrap_or(0) as u16;
        let lo = self.data.get(byte + 1).copied().unwrap_or(0) as u16;
        let word = (hi << 8) | lo;
        let mask = (1u16 << width) - 1;
        self.bit += width as usize;
        ((word >> (16 - shift - width as usize)) & mask) as u8
    }
}

fn unpack_slot(record: &[u8], slot: Slot) -> Vec<u8> {
    let (widths, biases) = tables(slot.kind());
    let mut reader = BitReader::new(record, SLOT_OFFSETS[slot.index()]);
    let mut bytes: Vec<u8> = widths.iter().map(|&width| reader.read(width)).collect();
    for &(offset, bias) in biases {
        bytes[offset] = bytes[offset].saturating_add(bias).min(0x7F);
    }
    bytes
}

fn unpack_at(record: &[u8], location: Location) -> Result<Vec<(Address, Vec<u8>)>> {
    if record.len() < RECORD_SIZE {
        return Err(Error::Format(format!(
            "patch record is {} bytes, expected {}",
            record.len(),
            RECORD_SIZE
        )));
    }
    Ok(Slot::ALL
        .iter()
        .map(|&slot| (location.slot_address(slot), unpack_slot(record, slot)))
        .collect())
}

/// Unpack one record into `(address, bytes)` pairs for the temporary patch.
pub fn unpack_record(record: &[u8]) -> Result<Vec<(Address, Vec<u8>)>> {
    unpack_at(record, Location::Temporary)
}

fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < FILE_SIZE {
        return Err(Error::Format(format!(
            "dump is {} bytes, expected {}",
            data.len(),
            FILE_SIZE
        )));
    }
    if data[..HEADER_SIZE] != HEADER {
        return Err(Error::Format("not a patch dump: header mismatch".into()));
    }
    Ok(())
}

fn record(data: &[u8], n: usize) -> &[u8] {
    let start = HEADER_SIZE + n * RECORD_SIZE;
    &data[start..start + RECORD_SIZE]
}

fn build_patch(data: &[u8], location: Location, n: usize) -> Result<Patch> {
    let mut patch = Patch::new(location);
    for (address, bytes) in unpack_at(record(data, n), location)? {
        patch.update_parameters(address, &bytes)?;
    }
    Ok(patch)
}

/// Read a single user patch out of a dump.
pub fn read_patch(data: &[u8], bank: u8, index: u8) -> Result<Patch> {
    check_header(data)?;
    let location = Location::user(bank, index)?;
    let n = (bank * PATCHES_PER_BANK + index) as usize;
    build_patch(data, location, n)
}

/// All 64 user patches, bank-major.
pub fn unpack_file(data: &[u8]) -> Result<Vec<Patch>> {
    check_header(data)?;
    let mut patches = Vec::with_capacity(PATCH_COUNT);
    for bank in 0..BANK_COUNT {
        for index in 0..PATCHES_PER_BANK {
            let n = (bank * PATCHES_PER_BANK + index) as usize;
            patches.push(build_patch(data, Location::User { bank, index }, n)?);
        }
    }
    log::info!("unpacked {} patches from dump", patches.len());
    Ok(patches)
}

pub fn read_file(path: &Path) -> Result<Vec<Patch>> {
    let data = std::fs::read(path)?;
    unpack_file(&data)
}
