use crossbeam_channel::Receiver;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::field::{Field, TextField};
use crate::notify::Notifier;

/// Who caused a change to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Local edit not yet known to the device.
    Edit,
    /// Authoritative data from the device or a file.
    Device,
    /// Echo of a hardware control; the device already has the value.
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChange {
    pub offset: usize,
    pub length: usize,
    pub origin: ChangeOrigin,
}

/// A fixed-length block of 7-bit parameter bytes.
///
/// `current` holds the value as edited, `synced` the last value known to match
/// the device. A byte range is "changed" while the two differ.
#[derive(Debug)]
pub struct ParameterBlock {
    address: Address,
    current: Vec<u8>,
    synced: Vec<u8>,
    listeners: Notifier<BlockChange>,
}

impl Clone for ParameterBlock {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            current: self.current.clone(),
            synced: self.synced.clone(),
            listeners: Notifier::default(),
        }
    }
}

fn check_data(data: &[u8]) -> Result<()> {
    match data.iter().find(|&&b| b > 0x7F) {
        Some(&b) => Err(Error::ValueRange {
            value: b as i32,
            min: 0,
            max: 0x7F,
        }),
        None => Ok(()),
    }
}

impl ParameterBlock {
    pub fn new(address: Address, size: usize) -> Result<Self> {
        if address.to_bytes()[3] != 0 {
            return Err(Error::address(address, "block base must have a zero low byte"));
        }
        Ok(Self {
            address,
            current: vec![0; size],
            synced: vec![0; size],
            listeners: Notifier::default(),
        })
    }

    /// Create a block whose leading bytes are already in sync with `data`.
    pub fn with_data(address: Address, size: usize, data: &[u8]) -> Result<Self> {
        let mut block = Self::new(address, size)?;
        block.check_range(0, data.len())?;
        check_data(data)?;
        block.current[..data.len()].copy_from_slice(data);
        block.synced[..data.len()].copy_from_slice(data);
        Ok(block)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn current(&self) -> &[u8] {
        &self.current
    }

    pub fn synced(&self) -> &[u8] {
        &self.synced
    }

    pub fn subscribe(&mut self) -> Receiver<BlockChange> {
        self.listeners.subscribe()
    }

    fn check_range(&self, offset: usize, length: usize) -> Result<()> {
        if offset + length > self.len() {
            let address = self.address.add(offset).unwrap_or(self.address);
            return Err(Error::address(address, "range exceeds block length"));
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8], in_sync: bool, origin: ChangeOrigin) -> BlockChange {
        let end = offset + bytes.len();
        self.current[offset..end].copy_from_slice(bytes);
        if in_sync {
            self.synced[offset..end].copy_from_slice(bytes);
        }
        let change = BlockChange {
            offset,
            length: bytes.len(),
            origin,
        };
        self.listeners.notify(change);
        change
    }

    pub fn value(&self, field: &Field) -> Result<i32> {
        self.check_range(field.offset, field.len())?;
        Ok(field.decode(&self.current))
    }

    pub fn raw_value(&self, field: &Field) -> Result<u32> {
        self.check_range(field.offset, field.len())?;
        Ok(field.decode_raw(&self.current))
    }

    pub fn text(&self, field: &TextField) -> Result<String> {
        self.check_range(field.offset, field.len)?;
        Ok(field.decode(&self.current))
    }

    /// Local edit: range-checked, written to `current` only.
    pub fn set_value(&mut self, field: &Field, value: i32) -> Result<BlockChange> {
        self.check_range(field.offset, field.len())?;
        let bytes = field.encode(value)?;
        Ok(self.write(field.offset, &bytes, false, ChangeOrigin::Edit))
    }

    pub fn set_text(&mut self, field: &TextField, text: &str) -> Result<BlockChange> {
        self.check_range(field.offset, field.len)?;
        let bytes = field.encode(text)?;
        Ok(self.write(field.offset, &bytes, false, ChangeOrigin::Edit))
    }

    /// Edit the device already knows about: written to both arrays.
    pub fn update_value(&mut self, field: &Field, value: i32) -> Result<BlockChange> {
        self.check_range(field.offset, field.len())?;
        let bytes = field.encode(value)?;
        Ok(self.write(field.offset, &bytes, true, ChangeOrigin::Control))
    }

    pub fn update_raw_value(&mut self, field: &Field, raw: u32) -> Result<BlockChange> {
        self.check_range(field.offset, field.len())?;
        let bytes = field.encode_raw(raw)?;
        Ok(self.write(field.offset, &bytes, true, ChangeOrigin::Control))
    }

    /// Authoritative write addressed by device address.
    pub fn update_parameters(&mut self, address: Address, data: &[u8]) -> Result<BlockChange> {
        let offset = self.address.offset_of(address)?;
        if offset < 0 {
            return Err(Error::address(address, "address lies before block start"));
        }
        let offset = offset as usize;
        if offset + data.len() > self.len() {
            return Err(Error::address(address, "write exceeds block length"));
        }
        check_data(data)?;
        Ok(self.write(offset, data, true, ChangeOrigin::Device))
    }

    pub fn has_changed(&self, offset: usize, length: usize) -> bool {
        let end = (offset + length).min(self.len());
        let start = offset.min(end);
        self.current[start..end] != self.synced[start..end]
    }

    pub fn has_any_changed(&self) -> bool {
        self.current != self.synced
    }

    /// Smallest `(offset, length)` covering every changed byte.
    pub fn changed_range(&self) -> Option<(usize, usize)> {
        let differs = |i: &usize| self.current[*i] != self.synced[*i];
        let first = (0..self.len()).find(differs)?;
        let last = (0..self.len()).rev().find(differs)?;
        Some((first, last - first + 1))
    }

    /// Record that the device now holds `current` over the given range.
    pub fn mark_synced(&mut self, offset: usize, length: usize) {
        let end = (offset + length).min(self.len());
        let start = offset.min(end);
        let (current, synced) = (&self.current, &mut self.synced);
        synced[start..end].copy_from_slice(&current[start..end]);
    }

    pub fn is_equal_to(&self, other: &ParameterBlock) -> bool {
        self.address.fuzzy_eq(other.address) && self.current == other.current
    }
}
