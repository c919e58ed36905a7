use crate::block::BlockChange;
use crate::error::Result;
use crate::field::Field;
use crate::layout::{common, tone, Slot, TONE_COUNT};
use crate::patch::Patch;

/// Stored OSC pitch (raw 40..=88, i.e. -24..=+24) for each knob position.
/// Flat around the centre so the detent reads as zero.
pub const PITCH_CURVE: [u8; 128] = [
    40, 40, 41, 41, 42, 42, 42, 43, 43, 44, 44, 44, 45, 45, 45, 46,
    46, 47, 47, 47, 48, 48, 49, 49, 49, 50, 50, 51, 51, 51, 52, 52,
    52, 53, 53, 54, 54, 54, 55, 55, 56, 56, 56, 57, 57, 58, 58, 58,
    59, 59, 59, 60, 60, 61, 61, 61, 62, 62, 63, 63, 64, 64, 64, 64,
    64, 64, 64, 64, 65, 65, 66, 66, 67, 67, 67, 68, 68, 69, 69, 69,
    70, 70, 70, 71, 71, 72, 72, 72, 73, 73, 74, 74, 74, 75, 75, 76,
    76, 76, 77, 77, 77, 78, 78, 79, 79, 79, 80, 80, 81, 81, 81, 82,
    82, 83, 83, 83, 84, 84, 84, 85, 85, 86, 86, 86, 87, 87, 88, 88,
];

/// Stored OSC detune (raw 14..=114, i.e. -50..=+50).
pub const DETUNE_CURVE: [u8; 128] = [
    14, 15, 16, 16, 17, 18, 19, 20, 20, 21, 22, 23, 24, 24, 25, 26,
    27, 28, 28, 29, 30, 31, 32, 32, 33, 34, 35, 36, 36, 37, 38, 39,
    40, 41, 41, 42, 43, 44, 45, 45, 46, 47, 48, 49, 49, 50, 51, 52,
    53, 53, 54, 55, 56, 57, 57, 58, 59, 60, 61, 61, 62, 63, 64, 64,
    64, 64, 65, 66, 67, 67, 68, 69, 70, 71, 71, 72, 73, 74, 75, 75,
    76, 77, 78, 79, 79, 80, 81, 82, 83, 83, 84, 85, 86, 87, 87, 88,
    89, 90, 91, 92, 92, 93, 94, 95, 96, 96, 97, 98, 99, 100, 100, 101,
    102, 103, 104, 104, 105, 106, 107, 108, 108, 109, 110, 111, 112, 112, 113, 114,
];

/// LFO sync note index (0..=19) when tempo sync is on.
pub const TEMPO_SYNC_CURVE: [u8; 128] = [
    0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 2, 2, 2,
    2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4,
    5, 5, 5, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6, 7, 7, 7,
    7, 7, 7, 7, 8, 8, 8, 8, 8, 8, 9, 9, 9, 9, 9, 9,
    10, 10, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11, 11, 12, 12, 12,
    12, 12, 12, 12, 13, 13, 13, 13, 13, 13, 14, 14, 14, 14, 14, 14,
    15, 15, 15, 15, 15, 15, 15, 16, 16, 16, 16, 16, 16, 17, 17, 17,
    17, 17, 17, 17, 18, 18, 18, 18, 18, 18, 19, 19, 19, 19, 19, 19,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// Controller value used as the raw value, clamped to the field.
    Linear,
    Table(&'static [u8; 128]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelControl {
    pub controller: u8,
    pub field: Field,
    pub curve: Curve,
}

impl PanelControl {
    const fn new(controller: u8, field: Field, curve: Curve) -> Self {
        Self {
            controller,
            field,
            curve,
        }
    }

    /// Raw stored value for a controller position.
    pub fn raw_value(&self, value: u8) -> u32 {
        let value = value & 0x7F;
        match self.curve {
            Curve::Table(table) => table[value as usize] as u32,
            Curve::Linear => {
                let lo = (self.field.min + self.field.bias).max(0);
                let hi = self.field.max + self.field.bias;
                (value as i32).clamp(lo, hi) as u32
            }
        }
    }
}

pub const CONTROLS: [PanelControl; 11] = [
    PanelControl::new(16, tone::OSC_PITCH, Curve::Table(&PITCH_CURVE)),
    PanelControl::new(17, tone::OSC_DETUNE, Curve::Table(&DETUNE_CURVE)),
    PanelControl::new(18, tone::OSC_PULSE_WIDTH, Curve::Linear),
    PanelControl::new(19, tone::OSC_PWM_DEPTH, Curve::Linear),
    PanelControl::new(74, tone::FILTER_CUTOFF, Curve::Linear),
    PanelControl::new(71, tone::FILTER_RESONANCE, Curve::Linear),
    PanelControl::new(20, tone::FILTER_ENV_DEPTH, Curve::Linear),
    PanelControl::new(73, tone::AMP_ENV_ATTACK, Curve::Linear),
    PanelControl::new(75, tone::AMP_ENV_DECAY, Curve::Linear),
    PanelControl::new(21, tone::LFO_RATE, Curve::Linear),
    PanelControl::new(22, tone::LFO_SYNC_NOTE, Curve::Table(&TEMPO_SYNC_CURVE)),
];

pub fn lookup(controller: u8) -> Option<&'static PanelControl> {
    CONTROLS.iter().find(|control| control.controller == controller)
}

/// Tones the panel currently edits, according to the common block.
pub fn selected_tones(patch: &Patch) -> Vec<u8> {
    let Some(block) = patch.block(Slot::Common) else {
        return Vec::new();
    };
    (1..=TONE_COUNT)
        .filter(|&n| block.value(&common::tone_select(n)).is_ok_and(|v| v == 1))
        .collect()
}

/// Mirror a control change into every selected tone. The device already
/// applied it, so writes are in sync and nothing goes back out.
///
/// Returns the changes applied, empty when the controller is not a panel control.
pub fn apply(patch: &mut Patch, controller: u8, value: u8) -> Result<Vec<(Slot, BlockChange)>> {
    let Some(control) = lookup(controller) else {
        return Ok(Vec::new());
    };
    let raw = control.raw_value(value);
    let mut changes = Vec::new();
    for n in selected_tones(patch) {
        let slot = Slot::Tone(n);
        if patch.block(slot).is_none() {
            continue;
        }
        let change = patch.update_raw_value(slot, &control.field, raw)?;
        changes.push((slot, change));
    }
    Ok(changes)
}
