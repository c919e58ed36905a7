//! Address layout of the synthesizer's patch memory.
//!
//! ```text
//! 10 00 ss oo   temporary patch
//! 20 nn ss oo   user patch, nn = bank * 8 + index
//! 01 00 00 cc   panel commands reported by the device
//! ```
//!
//! `ss` selects the parameter block (slot) and `oo` is the byte offset inside
//! it. Effect blocks are longer than 127 bytes, so they occupy two adjacent
//! selector values.

use crate::address::Address;
use crate::error::{Error, Result};

pub const TEMPORARY_LOCATION: (u8, u8) = (0x10, 0x00);
pub const USER_DOMAIN: u8 = 0x20;
pub const COMMAND_LOCATION: (u8, u8) = (0x01, 0x00);

pub const BANK_COUNT: u8 = 8;
pub const PATCHES_PER_BANK: u8 = 8;

pub const COMMON_SIZE: usize = 0x28;
pub const TONE_SIZE: usize = 0x38;
pub const EFFECT_SIZE: usize = 0x81;
pub const ARPEGGIO_COMMON_SIZE: usize = 0x08;
pub const ARPEGGIO_PATTERN_SIZE: usize = 0x21;

/// Largest data chunk the device puts in a single DT1.
pub const MAX_CHUNK: usize = 0x80;

pub const TONE_COUNT: u8 = 3;
pub const PATTERN_COUNT: u8 = 16;
pub const SLOT_COUNT: usize = 25;

/// Where a patch lives on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    Temporary,
    User { bank: u8, index: u8 },
}

impl Location {
    pub fn user(bank: u8, index: u8) -> Result<Self> {
        for value in [bank, index] {
            if value >= BANK_COUNT {
                return Err(Error::ValueRange {
                    value: value as i32,
                    min: 0,
                    max: BANK_COUNT as i32 - 1,
                });
            }
        }
        Ok(Location::User { bank, index })
    }

    pub fn bytes(self) -> (u8, u8) {
        match self {
            Location::Temporary => TEMPORARY_LOCATION,
            Location::User { bank, index } => (USER_DOMAIN, bank * PATCHES_PER_BANK + index),
        }
    }

    pub fn from_bytes(bytes: (u8, u8)) -> Option<Self> {
        match bytes {
            TEMPORARY_LOCATION => Some(Location::Temporary),
            (USER_DOMAIN, n) if n < BANK_COUNT * PATCHES_PER_BANK => Some(Location::User {
                bank: n / PATCHES_PER_BANK,
                index: n % PATCHES_PER_BANK,
            }),
            _ => None,
        }
    }

    pub fn slot_address(self, slot: Slot) -> Address {
        Address::from_parts(self.bytes(), slot.selector())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Distortion,
    Flanger,
    Delay,
    Reverb,
}

impl EffectKind {
    /// Bytes after the type selector whose meaning depends on the type.
    pub const fn type_dependent_len(self) -> usize {
        EFFECT_SIZE - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Common,
    Tone,
    Effect(EffectKind),
    ArpeggioCommon,
    ArpeggioPattern,
}

impl SlotKind {
    pub const fn size(self) -> usize {
        match self {
            SlotKind::Common => COMMON_SIZE,
            SlotKind::Tone => TONE_SIZE,
            SlotKind::Effect(_) => EFFECT_SIZE,
            SlotKind::ArpeggioCommon => ARPEGGIO_COMMON_SIZE,
            SlotKind::ArpeggioPattern => ARPEGGIO_PATTERN_SIZE,
        }
    }

    /// Smallest first chunk that may create the block.
    pub const fn min_size(self) -> usize {
        let size = self.size();
        if size > MAX_CHUNK {
            MAX_CHUNK
        } else {
            size
        }
    }

    /// Number of selector values the block occupies on the wire.
    pub const fn span(self) -> u8 {
        ((self.size() + 0x7F) / 0x80) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotCategory {
    Common,
    Tone,
    Effect,
    Arpeggio,
}

impl SlotCategory {
    pub const ALL: [SlotCategory; 4] = [
        SlotCategory::Common,
        SlotCategory::Tone,
        SlotCategory::Effect,
        SlotCategory::Arpeggio,
    ];
}

/// One of the 25 parameter blocks of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Common,
    /// Tone 1..=3
    Tone(u8),
    Distortion,
    Flanger,
    Delay,
    Reverb,
    ArpeggioCommon,
    /// Arpeggio pattern 1..=16
    ArpeggioPattern(u8),
}

impl Slot {
    /// Fixed iteration order; loading follows this order.
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::Common,
        Slot::Tone(1),
        Slot::Tone(2),
        Slot::Tone(3),
        Slot::Distortion,
        Slot::Flanger,
        Slot::Delay,
        Slot::Reverb,
        Slot::ArpeggioCommon,
        Slot::ArpeggioPattern(1),
        Slot::ArpeggioPattern(2),
        Slot::ArpeggioPattern(3),
        Slot::ArpeggioPattern(4),
        Slot::ArpeggioPattern(5),
        Slot::ArpeggioPattern(6),
        Slot::ArpeggioPattern(7),
        Slot::ArpeggioPattern(8),
        Slot::ArpeggioPattern(9),
        Slot::ArpeggioPattern(10),
        Slot::ArpeggioPattern(11),
        Slot::ArpeggioPattern(12),
        Slot::ArpeggioPattern(13),
        Slot::ArpeggioPattern(14),
        Slot::ArpeggioPattern(15),
        Slot::ArpeggioPattern(16),
    ];

    pub fn index(self) -> usize {
        match self {
            Slot::Common => 0,
            Slot::Tone(n) => n as usize,
            Slot::Distortion => 4,
            Slot::Flanger => 5,
            Slot::Delay => 6,
            Slot::Reverb => 7,
            Slot::ArpeggioCommon => 8,
            Slot::ArpeggioPattern(n) => 8 + n as usize,
        }
    }

    /// Third address byte of the block's base address.
    pub fn selector(self) -> u8 {
        match self {
            Slot::Common => 0x00,
            Slot::Tone(n) => n,
            Slot::Distortion => 0x04,
            Slot::Flanger => 0x06,
            Slot::Delay => 0x08,
            Slot::Reverb => 0x0A,
            Slot::ArpeggioCommon => 0x0C,
            Slot::ArpeggioPattern(n) => 0x0C + n,
        }
    }

    /// Slot whose base selector is exactly `selector`.
    pub fn from_selector(selector: u8) -> Option<Slot> {
        Slot::ALL.iter().copied().find(|s| s.selector() == selector)
    }

    /// Slot occupying `selector`, including the second selector of long blocks.
    pub fn covering(selector: u8) -> Option<Slot> {
        Slot::ALL.iter().copied().find(|s| {
            let base = s.selector();
            selector >= base && selector < base + s.kind().span()
        })
    }

    pub fn kind(self) -> SlotKind {
        match self {
            Slot::Common => SlotKind::Common,
            Slot::Tone(_) => SlotKind::Tone,
            Slot::Distortion => SlotKind::Effect(EffectKind::Distortion),
            Slot::Flanger => SlotKind::Effect(EffectKind::Flanger),
            Slot::Delay => SlotKind::Effect(EffectKind::Delay),
            Slot::Reverb => SlotKind::Effect(EffectKind::Reverb),
            Slot::ArpeggioCommon => SlotKind::ArpeggioCommon,
            Slot::ArpeggioPattern(_) => SlotKind::ArpeggioPattern,
        }
    }

    pub fn size(self) -> usize {
        self.kind().size()
    }

    pub fn min_size(self) -> usize {
        self.kind().min_size()
    }

    pub fn category(self) -> SlotCategory {
        match self.kind() {
            SlotKind::Common => SlotCategory::Common,
            SlotKind::Tone => SlotCategory::Tone,
            SlotKind::Effect(_) => SlotCategory::Effect,
            SlotKind::ArpeggioCommon | SlotKind::ArpeggioPattern => SlotCategory::Arpeggio,
        }
    }
}

/// Panel commands the device reports, each wiping the temporary patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    InitPatch,
    Manual,
    ToneCopy,
}

impl DeviceCommand {
    pub fn from_address(address: Address) -> Option<Self> {
        let [b1, b2, b3, b4] = address.to_bytes();
        if (b1, b2) != COMMAND_LOCATION || b3 != 0 {
            return None;
        }
        match b4 {
            0x00 => Some(DeviceCommand::InitPatch),
            0x01 => Some(DeviceCommand::Manual),
            0x02 => Some(DeviceCommand::ToneCopy),
            _ => None,
        }
    }
}

/// Patch common block.
pub mod common {
    use crate::field::{Field, TextField};

    pub const NAME: TextField = TextField::new(0x00, 12);
    pub const LEVEL: Field = Field::u7(0x0C);
    pub const TEMPO: Field = Field::u16(0x0D).range(5, 300);
    pub const ARPEGGIO_SWITCH: Field = Field::u7(0x11).range(0, 1);
    pub const PORTAMENTO_SWITCH: Field = Field::u7(0x13).range(0, 1);
    pub const PORTAMENTO_TIME: Field = Field::u7(0x14);
    pub const MONO_SWITCH: Field = Field::u7(0x15).range(0, 1);
    pub const OCTAVE_SHIFT: Field = Field::s7(0x16).range(-3, 3);
    pub const BEND_RANGE_UP: Field = Field::u7(0x17).range(0, 24);
    pub const BEND_RANGE_DOWN: Field = Field::u7(0x18).range(0, 24);
    pub const RING_SWITCH: Field = Field::u7(0x20).range(0, 2);
    pub const LEGATO_SWITCH: Field = Field::u7(0x21).range(0, 1);
    pub const PORTAMENTO_MODE: Field = Field::u7(0x22).range(0, 1);
    pub const ANALOG_FEEL: Field = Field::u7(0x23);
    pub const D_BEAM_ASSIGN: Field = Field::u7(0x24).range(0, 15);
    pub const D_BEAM_POLARITY: Field = Field::u7(0x25).range(0, 1);

    /// On/off switch of tone 1..=3. Panics outside that range.
    pub const fn tone_switch(tone: u8) -> Field {
        assert!(tone >= 1 && tone <= super::TONE_COUNT, "tone number is 1-based");
        Field::u7(0x1A + 2 * (tone as usize - 1)).range(0, 1)
    }

    /// Whether panel knob moves apply to tone 1..=3. Panics outside that range.
    pub const fn tone_select(tone: u8) -> Field {
        assert!(tone >= 1 && tone <= super::TONE_COUNT, "tone number is 1-based");
        Field::u7(0x1B + 2 * (tone as usize - 1)).range(0, 1)
    }
}

/// Tone block (oscillator, filter, amp, LFOs).
pub mod tone {
    use crate::field::Field;

    pub const OSC_WAVE: Field = Field::u7(0x00).range(0, 6);
    pub const OSC_WAVE_VARIATION: Field = Field::u7(0x01).range(0, 2);
    pub const OSC_PITCH: Field = Field::s7(0x03).range(-24, 24);
    pub const OSC_DETUNE: Field = Field::s7(0x04).range(-50, 50);
    pub const OSC_PWM_DEPTH: Field = Field::u7(0x05);
    pub const OSC_PULSE_WIDTH: Field = Field::u7(0x06);
    pub const PITCH_ENV_ATTACK: Field = Field::u7(0x07);
    pub const PITCH_ENV_DECAY: Field = Field::u7(0x08);
    pub const PITCH_ENV_DEPTH: Field = Field::s7(0x09).range(-63, 63);
    pub const FILTER_MODE: Field = Field::u7(0x0A).range(0, 7);
    pub const FILTER_SLOPE: Field = Field::u7(0x0B).range(0, 1);
    pub const FILTER_CUTOFF: Field = Field::u7(0x0C);
    pub const FILTER_KEYFOLLOW: Field = Field::s7(0x0D).range(-10, 10);
    pub const FILTER_ENV_VELOCITY: Field = Field::s7(0x0E).range(-63, 63);
    pub const FILTER_RESONANCE: Field = Field::u7(0x0F);
    pub const FILTER_ENV_ATTACK: Field = Field::u7(0x10);
    pub const FILTER_ENV_DECAY: Field = Field::u7(0x11);
    pub const FILTER_ENV_SUSTAIN: Field = Field::u7(0x12);
    pub const FILTER_ENV_RELEASE: Field = Field::u7(0x13);
    pub const FILTER_ENV_DEPTH: Field = Field::s7(0x14).range(-63, 63);
    pub const AMP_LEVEL: Field = Field::u7(0x15);
    pub const AMP_VELOCITY: Field = Field::s7(0x16).range(-63, 63);
    pub const AMP_ENV_ATTACK: Field = Field::u7(0x17);
    pub const AMP_ENV_DECAY: Field = Field::u7(0x18);
    pub const AMP_ENV_SUSTAIN: Field = Field::u7(0x19);
    pub const AMP_ENV_RELEASE: Field = Field::u7(0x1A);
    pub const AMP_PAN: Field = Field::s7(0x1B);
    pub const LFO_SHAPE: Field = Field::u7(0x1C).range(0, 5);
    pub const LFO_RATE: Field = Field::u7(0x1D);
    pub const LFO_TEMPO_SYNC: Field = Field::u7(0x1E).range(0, 1);
    pub const LFO_SYNC_NOTE: Field = Field::u7(0x1F).range(0, 19);
    pub const LFO_FADE_TIME: Field = Field::u7(0x20);
    pub const LFO_KEY_TRIGGER: Field = Field::u7(0x21).range(0, 1);
    pub const LFO_PITCH_DEPTH: Field = Field::s7(0x22).range(-63, 63);
    pub const LFO_FILTER_DEPTH: Field = Field::s7(0x23).range(-63, 63);
    pub const LFO_AMP_DEPTH: Field = Field::s7(0x24).range(-63, 63);
    pub const LFO_PAN_DEPTH: Field = Field::s7(0x25).range(-63, 63);
    pub const MOD_LFO_SHAPE: Field = Field::u7(0x26).range(0, 5);
    pub const MOD_LFO_RATE: Field = Field::u7(0x27);
    pub const MOD_LFO_TEMPO_SYNC: Field = Field::u7(0x28).range(0, 1);
    pub const MOD_LFO_SYNC_NOTE: Field = Field::u7(0x29).range(0, 19);
    pub const MOD_LFO_PITCH_DEPTH: Field = Field::s7(0x2B).range(-63, 63);
    pub const MOD_LFO_FILTER_DEPTH: Field = Field::s7(0x2C).range(-63, 63);
    pub const MOD_LFO_AMP_DEPTH: Field = Field::s7(0x2D).range(-63, 63);
    pub const MOD_LFO_PAN_DEPTH: Field = Field::s7(0x2E).range(-63, 63);
    pub const CUTOFF_AFTERTOUCH: Field = Field::s7(0x2F).range(-63, 63);
    pub const LEVEL_AFTERTOUCH: Field = Field::s7(0x30).range(-63, 63);
    pub const WAVE_GAIN: Field = Field::u7(0x33).range(0, 3);
    pub const SUPER_SAW_DETUNE: Field = Field::u7(0x34);
    pub const MOD_LFO_RATE_CONTROL: Field = Field::s7(0x35).range(-63, 63);
}

/// Effect blocks: a type selector followed by 32 type-dependent parameters.
pub mod effect {
    use crate::field::Field;

    pub const TYPE: Field = Field::u7(0x00);
    pub const PARAMETER_COUNT: usize = 32;

    /// Parameter 1..=32. Panics outside that range.
    pub const fn parameter(n: usize) -> Field {
        assert!(n >= 1 && n <= PARAMETER_COUNT, "effect parameter number is 1-based");
        Field::s16(0x01 + 4 * (n - 1)).range(-20000, 20000)
    }
}

/// Arpeggio common block.
pub mod arpeggio {
    use crate::field::Field;

    pub const GRID: Field = Field::u7(0x00).range(0, 8);
    pub const DURATION: Field = Field::u7(0x01).range(0, 9);
    pub const MOTIF: Field = Field::u7(0x02).range(0, 11);
    pub const OCTAVE_RANGE: Field = Field::s7(0x03).range(-3, 3);
    pub const ACCENT_RATE: Field = Field::u7(0x04).range(0, 100);
    pub const VELOCITY: Field = Field::u7(0x05);
    pub const END_STEP: Field = Field::u7(0x06).range(1, 16);
}

/// Arpeggio pattern blocks.
pub mod pattern {
    use crate::field::Field;

    pub const ORIGINAL_NOTE: Field = Field::u7(0x00);
    pub const STEP_COUNT: usize = 16;
    pub const TIE: i32 = 128;

    /// Step 1..=16: 0 = off, 1..=127 velocity, 128 = tie. Panics outside 1..=16.
    pub const fn step(n: usize) -> Field {
        assert!(n >= 1 && n <= STEP_COUNT, "step number is 1-based");
        Field::u8(0x01 + 2 * (n - 1)).range(0, 128)
    }
}
