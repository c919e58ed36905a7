pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const MANUFACTURER_ID: u8 = 0x41;
pub const MODEL_ID: [u8; 3] = [0x00, 0x00, 0x41];

// Commands
pub const CMD_RQ1: u8 = 0x11;
pub const CMD_DT1: u8 = 0x12;

// Universal non-realtime identity sub-protocol
pub const UNIVERSAL_NON_REALTIME: u8 = 0x7E;
pub const BROADCAST_ID: u8 = 0x7F;
pub const GENERAL_INFORMATION: u8 = 0x06;
pub const IDENTITY_REQUEST: u8 = 0x01;
pub const IDENTITY_REPLY: u8 = 0x02;
pub const FAMILY_CODE: [u8; 2] = [0x41, 0x02];
pub const FAMILY_NUMBER: [u8; 2] = [0x00, 0x00];

pub const ACTIVE_SENSING: u8 = 0xFE;

use crate::address::{self, Address};

/// Why a byte sequence that looked like one of our messages was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    Truncated,
    Malformed,
    Manufacturer,
    Model,
    Family,
    Checksum,
}

/// One inbound or outbound MIDI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    IdentityRequest {
        device_id: u8,
    },
    IdentityReply {
        device_id: u8,
        revision: [u8; 4],
    },
    /// RQ1: ask the device for `length` bytes at `address`.
    DataRequest {
        device_id: u8,
        address: Address,
        length: u32,
    },
    /// DT1: data for `address`.
    DataSet {
        device_id: u8,
        address: Address,
        data: Vec<u8>,
    },
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    /// 14-bit bend, 0x2000 = centre.
    PitchBend {
        channel: u8,
        value: u16,
    },
    ActiveSensing,
    Unrecognized {
        raw: Vec<u8>,
        mismatch: Option<Mismatch>,
    },
}

/// Roland checksum: the value that brings the sum of `bytes` to a multiple of 128.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    ((0x80 - sum % 0x80) % 0x80) as u8
}

fn roland_frame(device_id: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(body.len() + 9);
    msg.extend_from_slice(&[SYSEX_START, MANUFACTURER_ID, device_id & 0x7F]);
    msg.extend_from_slice(&MODEL_ID);
    msg.push(command);
    msg.extend_from_slice(body);
    msg.push(checksum(body));
    msg.push(SYSEX_END);
    msg
}

pub fn identity_request(device_id: u8) -> Vec<u8> {
    vec![
        SYSEX_START,
        UNIVERSAL_NON_REALTIME,
        device_id & 0x7F,
        GENERAL_INFORMATION,
        IDENTITY_REQUEST,
        SYSEX_END,
    ]
}

pub fn data_request(device_id: u8, address: Address, length: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&address.to_bytes());
    body.extend_from_slice(&address::to_digits(length));
    roland_frame(device_id, CMD_RQ1, &body)
}

pub fn data_set(device_id: u8, address: Address, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + data.len());
    body.extend_from_slice(&address.to_bytes());
    body.extend(data.iter().map(|&b| b & 0x7F));
    roland_frame(device_id, CMD_DT1, &body)
}

fn unrecognized(raw: &[u8], mismatch: Option<Mismatch>) -> Message {
    Message::Unrecognized {
        raw: raw.to_vec(),
        mismatch,
    }
}

impl Message {
    /// Classify one complete MIDI message.
    ///
    /// Never fails: anything that is not understood comes back as
    /// `Unrecognized`, with a `Mismatch` when it resembled a device message.
    pub fn parse(raw: &[u8]) -> Message {
        let Some(&status) = raw.first() else {
            return unrecognized(raw, None);
        };

        if status == SYSEX_START {
            return Self::parse_sysex(raw);
        }
        if status == ACTIVE_SENSING {
            return Message::ActiveSensing;
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 if raw.len() >= 3 => Message::NoteOff {
                channel,
                key: raw[1],
                velocity: raw[2],
            },
            // Note On with velocity 0 is treated as Note Off
            0x90 if raw.len() >= 3 && raw[2] == 0 => Message::NoteOff {
                channel,
                key: raw[1],
                velocity: 0,
            },
            0x90 if raw.len() >= 3 => Message::NoteOn {
                channel,
                key: raw[1],
                velocity: raw[2],
            },
            0xB0 if raw.len() >= 3 => Message::ControlChange {
                channel,
                controller: raw[1],
                value: raw[2],
            },
            0xC0 if raw.len() >= 2 => Message::ProgramChange {
                channel,
                program: raw[1],
            },
            0xE0 if raw.len() >= 3 => Message::PitchBend {
                channel,
                value: (raw[1] & 0x7F) as u16 | ((raw[2] & 0x7F) as u16) << 7,
            },
            _ => unrecognized(raw, None),
        }
    }

    fn parse_sysex(raw: &[u8]) -> Message {
        if raw.len() < 4 || raw[raw.len() - 1] != SYSEX_END {
            return unrecognized(raw, Some(Mismatch::Truncated));
        }
        match raw[1] {
            UNIVERSAL_NON_REALTIME => Self::parse_identity(raw),
            MANUFACTURER_ID => Self::parse_roland(raw),
            _ => unrecognized(raw, Some(Mismatch::Manufacturer)),
        }
    }

    fn parse_identity(raw: &[u8]) -> Message {
        if raw.len() < 6 || raw[3] != GENERAL_INFORMATION {
            return unrecognized(raw, None);
        }
        let device_id = raw[2];
        match raw[4] {
            IDENTITY_REQUEST if raw.len() == 6 => Message::IdentityRequest { device_id },
            IDENTITY_REPLY => {
                if raw.len() != 15 {
                    return unrecognized(raw, Some(Mismatch::Truncated));
                }
                if raw[5] != MANUFACTURER_ID {
                    return unrecognized(raw, Some(Mismatch::Manufacturer));
                }
                if raw[6..8] != FAMILY_CODE || raw[8..10] != FAMILY_NUMBER {
                    return unrecognized(raw, Some(Mismatch::Family));
                }
                let mut revision = [0u8; 4];
                revision.copy_from_slice(&raw[10..14]);
                Message::IdentityReply {
                    device_id,
                    revision,
                }
            }
            _ => unrecognized(raw, None),
        }
    }

    fn parse_roland(raw: &[u8]) -> Message {
        // F0 41 dev m1 m2 m3 cmd <address x4> ... sum F7
        if raw.len() < 13 {
            return unrecognized(raw, Some(Mismatch::Truncated));
        }
        if raw[3..6] != MODEL_ID {
            return unrecognized(raw, Some(Mismatch::Model));
        }
        let device_id = raw[2];
        let command = raw[6];
        let body = &raw[7..raw.len() - 1];
        if body.iter().any(|&b| b > 0x7F) {
            return unrecognized(raw, Some(Mismatch::Malformed));
        }
        let sum: u32 = body.iter().map(|&b| b as u32).sum();
        if sum % 0x80 != 0 {
            return unrecognized(raw, Some(Mismatch::Checksum));
        }
        let payload = &body[..body.len() - 1];
        let Ok(address) = Address::from_slice(&payload[..4]) else {
            return unrecognized(raw, Some(Mismatch::Malformed));
        };

        match command {
            CMD_DT1 if payload.len() > 4 => Message::DataSet {
                device_id,
                address,
                data: payload[4..].to_vec(),
            },
            CMD_RQ1 if payload.len() == 8 => {
                let mut digits = [0u8; 4];
                digits.copy_from_slice(&payload[4..8]);
                Message::DataRequest {
                    device_id,
                    address,
                    length: address::from_digits(digits),
                }
            }
            CMD_DT1 | CMD_RQ1 => unrecognized(raw, Some(Mismatch::Truncated)),
            _ => unrecognized(raw, None),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::IdentityRequest { device_id } => identity_request(*device_id),
            Message::IdentityReply {
                device_id,
                revision,
            } => {
                let mut msg = vec![
                    SYSEX_START,
                    UNIVERSAL_NON_REALTIME,
                    *device_id,
                    GENERAL_INFORMATION,
                    IDENTITY_REPLY,
                    MANUFACTURER_ID,
                ];
                msg.extend_from_slice(&FAMILY_CODE);
                msg.extend_from_slice(&FAMILY_NUMBER);
                msg.extend_from_slice(revision);
                msg.push(SYSEX_END);
                msg
            }
            Message::DataRequest {
                device_id,
                address,
                length,
            } => data_request(*device_id, *address, *length),
            Message::DataSet {
                device_id,
                address,
                data,
            } => data_set(*device_id, *address, data),
            Message::NoteOn {
                channel,
                key,
                velocity,
            } => vec![0x90 | (channel & 0x0F), *key, *velocity],
            Message::NoteOff {
                channel,
                key,
                velocity,
            } => vec![0x80 | (channel & 0x0F), *key, *velocity],
            Message::ProgramChange { channel, program } => vec![0xC0 | (channel & 0x0F), *program],
            Message::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0F), *controller, *value],
            Message::PitchBend { channel, value } => vec![
                0xE0 | (channel & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            Message::ActiveSensing => vec![ACTIVE_SENSING],
            Message::Unrecognized { raw, .. } => raw.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone1() -> Address {
        Address::from_bytes(0x10, 0x00, 0x01, 0x00).unwrap()
    }

    #[test]
    fn test_checksum_known_vector() {
        // address 40 41 22, data 01
        assert_eq!(checksum(&[0x40, 0x41, 0x22, 0x01]), 0x5C);
        assert_eq!(checksum(&[0x00, 0x00, 0x00, 0x00]), 0x00);
    }

    #[test]
    fn test_data_set_frame() {
        let msg = data_set(0x10, tone1(), &[0x05, 0x7F]);
        assert_eq!(
            msg,
            vec![0xF0, 0x41, 0x10, 0x00, 0x00, 0x41, 0x12, 0x10, 0x00, 0x01, 0x00, 0x05, 0x7F, 0x6B, 0xF7]
        );
        let body = &msg[7..msg.len() - 1];
        assert_eq!(body.iter().map(|&b| b as u32).sum::<u32>() % 128, 0);
    }

    #[test]
    fn test_data_request_length_digits() {
        let address = Address::from_bytes(0x10, 0x00, 0x04, 0x00).unwrap();
        let msg = data_request(0x10, address, 0x81);
        assert_eq!(&msg[11..15], &[0x00, 0x00, 0x01, 0x01]);
        let body = &msg[7..msg.len() - 1];
        assert_eq!(body.iter().map(|&b| b as u32).sum::<u32>() % 128, 0);

        assert_eq!(
            Message::parse(&msg),
            Message::DataRequest {
                device_id: 0x10,
                address,
                length: 0x81
            }
        );
    }

    #[test]
    fn test_parse_data_set() {
        let msg = data_set(0x11, tone1(), &[1, 2, 3]);
        assert_eq!(
            Message::parse(&msg),
            Message::DataSet {
                device_id: 0x11,
                address: tone1(),
                data: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_flipped_byte_is_checksum_mismatch() {
        let mut msg = data_set(0x10, tone1(), &[0x20, 0x30, 0x40]);
        msg[12] ^= 0x01;
        assert!(matches!(
            Message::parse(&msg),
            Message::Unrecognized {
                mismatch: Some(Mismatch::Checksum),
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_model_and_truncation() {
        let mut msg = data_set(0x10, tone1(), &[0x20]);
        msg[5] = 0x42;
        assert!(matches!(
            Message::parse(&msg),
            Message::Unrecognized {
                mismatch: Some(Mismatch::Model),
                ..
            }
        ));

        let msg = data_set(0x10, tone1(), &[0x20]);
        assert!(matches!(
            Message::parse(&msg[..msg.len() - 1]),
            Message::Unrecognized {
                mismatch: Some(Mismatch::Truncated),
                ..
            }
        ));
    }

    #[test]
    fn test_identity_reply() {
        let reply = Message::IdentityReply {
            device_id: 0x10,
            revision: [0, 1, 0, 0],
        };
        let bytes = reply.encode();
        assert_eq!(bytes.len(), 15);
        assert_eq!(Message::parse(&bytes), reply);

        let mut other_family = bytes.clone();
        other_family[6] = 0x39;
        assert!(matches!(
            Message::parse(&other_family),
            Message::Unrecognized {
                mismatch: Some(Mismatch::Family),
                ..
            }
        ));
    }

    #[test]
    fn test_identity_request() {
        let bytes = identity_request(BROADCAST_ID);
        assert_eq!(bytes, vec![0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]);
        assert_eq!(
            Message::parse(&bytes),
            Message::IdentityRequest { device_id: 0x7F }
        );
    }

    #[test]
    fn test_channel_voice_pass_through() {
        assert_eq!(
            Message::parse(&[0x92, 60, 100]),
            Message::NoteOn {
                channel: 2,
                key: 60,
                velocity: 100
            }
        );
        assert_eq!(
            Message::parse(&[0x90, 60, 0]),
            Message::NoteOff {
                channel: 0,
                key: 60,
                velocity: 0
            }
        );
        assert_eq!(
            Message::parse(&[0xC0, 5]),
            Message::ProgramChange {
                channel: 0,
                program: 5
            }
        );
        assert_eq!(
            Message::parse(&[0xB1, 74, 64]),
            Message::ControlChange {
                channel: 1,
                controller: 74,
                value: 64
            }
        );
        let bend = Message::PitchBend {
            channel: 0,
            value: 0x2000,
        };
        assert_eq!(Message::parse(&bend.encode()), bend);
        assert_eq!(Message::parse(&[0xFE]), Message::ActiveSensing);
        assert!(matches!(
            Message::parse(&[0xF8]),
            Message::Unrecognized { mismatch: None, .. }
        ));
    }
}
