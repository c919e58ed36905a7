//! Patch files: an 8-byte magic followed by tagged, length-prefixed chunks.
//!
//! Each `PAT` chunk carries one slot's raw block bytes. Chunks with other tags
//! are skipped by length so newer files still load.

use std::path::Path;

use crate::error::{Error, Result};
use crate::layout::Slot;
use crate::patch::Patch;

pub const MAGIC: &[u8; 8] = b"GAIATOOL";
const PATCH_TAG: &[u8; 3] = b"PAT";
const CHUNK_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchChunk {
    /// Third address byte of the slot.
    pub selector: u8,
    pub data: Vec<u8>,
}

/// Serialize every present slot in iteration order.
pub fn encode(patch: &Patch) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    for (slot, block) in patch.blocks() {
        out.extend_from_slice(PATCH_TAG);
        out.push(slot.selector());
        out.extend_from_slice(&(block.len() as u32).to_le_bytes());
        out.extend_from_slice(block.current());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<PatchChunk>> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::Format("not a patch file: bad magic".into()));
    }
    let mut chunks = Vec::new();
    let mut rest = &bytes[MAGIC.len()..];
    while !rest.is_empty() {
        if rest.len() < CHUNK_HEADER_LEN {
            return Err(Error::Format("truncated chunk header".into()));
        }
        let (header, body) = rest.split_at(CHUNK_HEADER_LEN);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if body.len() < len {
            return Err(Error::Format(format!(
                "chunk declares {} bytes, {} remain",
                len,
                body.len()
            )));
        }
        let (data, tail) = body.split_at(len);
        if &header[..3] == PATCH_TAG {
            chunks.push(PatchChunk {
                selector: header[3],
                data: data.to_vec(),
            });
        } else {
            log::debug!("skipping unknown chunk {:02X?}", &header[..3]);
        }
        rest = tail;
    }
    Ok(chunks)
}

fn validate(chunk: &PatchChunk) -> Result<Slot> {
    let slot = Slot::from_selector(chunk.selector)
        .ok_or_else(|| Error::Format(format!("unknown slot selector {:#04X}", chunk.selector)))?;
    if chunk.data.len() < slot.min_size() || chunk.data.len() > slot.size() {
        return Err(Error::Format(format!(
            "{:?} chunk is {} bytes, expected {}..={}",
            slot,
            chunk.data.len(),
            slot.min_size(),
            slot.size()
        )));
    }
    if chunk.data.iter().any(|&b| b > 0x7F) {
        return Err(Error::Format(format!("{:?} chunk has non 7-bit data", slot)));
    }
    Ok(slot)
}

/// Replace the patch contents with `chunks`.
///
/// All chunks are checked before the patch is touched, so a bad file leaves
/// it as it was.
pub fn apply(patch: &mut Patch, chunks: &[PatchChunk]) -> Result<()> {
    let slots = chunks.iter().map(validate).collect::<Result<Vec<Slot>>>()?;
    patch.clear_parameters();
    for (slot, chunk) in slots.into_iter().zip(chunks) {
        patch.update_parameters(patch.slot_address(slot), &chunk.data)?;
    }
    Ok(())
}

pub fn load(path: &Path, patch: &mut Patch) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let chunks = decode(&bytes)?;
    apply(patch, &chunks)?;
    log::info!("loaded {} slots from {}", chunks.len(), path.display());
    Ok(())
}

pub fn save(path: &Path, patch: &Patch) -> Result<()> {
    std::fs::write(path, encode(patch))?;
    log::info!("saved {:?} to {}", patch.location(), path.display());
    Ok(())
}
