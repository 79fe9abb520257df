//! `ShadeCommand` encoding: translates a typed command into the on-wire
//! payload the shade command service hands to the outbound manager
//! (design §4.3).
//!
//! Multi-position commands pack sub-records of the form
//! `[sub-len][opcode][kind-byte][value-lo][value-hi]`; every other command
//! carries a single fixed-shape body. Every body is prefixed with the
//! wire-encoded destination address (`Address::to_wire`) except
//! `BeaconIssue`, which rides the separate `BeaconReq` record with no
//! address at all.

use crate::address::Address;
use crate::error::GatewayError;
use crate::protocol::RecordType;

/// Which motor a position setting targets, for shades with more than one
/// moving rail (e.g. top-down/bottom-up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailKind {
    Primary,
    Secondary,
    Vane,
}

impl RailKind {
    fn kind_byte(self) -> u8 {
        match self {
            RailKind::Primary => 0,
            RailKind::Secondary => 1,
            RailKind::Vane => 2,
        }
    }
}

const OPCODE_SET_POSITION: u8 = 0x01;
const OPCODE_CONTROLLER_BUTTON: u8 = 0x02;

/// One rail's target position, 0-100 percent closed (or an opaque
/// co-processor unit for vane tilt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSetting {
    pub rail: RailKind,
    pub value: u16,
}

impl PositionSetting {
    fn push_sub_record(&self, out: &mut Vec<u8>) {
        let value = self.value.to_le_bytes();
        out.push(3); // sub-len: opcode + kind-byte + value is 4 bytes total, 3 follow the length
        out.push(OPCODE_SET_POSITION);
        out.push(self.rail.kind_byte());
        out.push(value[0]);
        out.push(value[1]);
    }
}

/// A single scene controller button binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerButton {
    pub button_index: u8,
    pub scene_id: u8,
    pub hold_to_stop: bool,
}

impl ControllerButton {
    fn push_sub_record(&self, out: &mut Vec<u8>) {
        let value: u16 = self.scene_id as u16 | ((self.hold_to_stop as u16) << 8);
        let value = value.to_le_bytes();
        out.push(3);
        out.push(OPCODE_CONTROLLER_BUTTON);
        out.push(self.button_index);
        out.push(value[0]);
        out.push(value[1]);
    }
}

/// Reset command bit layout: `bit0` clear schedules, `bit1` clear groups,
/// `bit2` factory defaults, `bit3..7` reserved and must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetMask(u8);

impl ResetMask {
    const RESERVED: u8 = 0b1111_1000;

    pub const CLEAR_SCHEDULES: u8 = 0b0000_0001;
    pub const CLEAR_GROUPS: u8 = 0b0000_0010;
    pub const FACTORY_DEFAULTS: u8 = 0b0000_0100;

    /// Construct a mask, rejecting any reserved bit so a caller can't
    /// encode an undefined reset.
    pub fn new(bits: u8) -> Result<Self, GatewayError> {
        if bits & Self::RESERVED != 0 {
            return Err(GatewayError::ReservedResetBit { mask: bits });
        }
        Ok(ResetMask(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// A command directed at one shade or scene controller (design §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum ShadeCommand {
    SetPositions { address: Address, positions: Vec<PositionSetting> },
    /// 1-28 scene IDs, enforced at construction via [`ShadeCommand::execute_scene`].
    ExecuteScene { address: Address, scene_ids: Vec<u8> },
    GroupAssign { address: Address, current_bitmap: [u8; 32], group_id: u8, assign: bool },
    Raw { address: Address, bytes: Vec<u8> },
    SceneControllerProgram { address: Address, buttons: Vec<ControllerButton> },
    Reset { address: Address, mask: ResetMask },
    /// Relay a downloaded co-processor firmware image on to a shade that
    /// needs it, distinct from the host/co-processor self-update (§4.7).
    FirmwareChunk { address: Address, chunk_index: u16, payload: Vec<u8> },
    BatteryQuery { address: Address },
    /// Mark a freshly discovered device as claimed, so it drops out of
    /// subsequent discovery passes (design §4.3).
    SetDiscoveredFlag { address: Address },
}

impl ShadeCommand {
    pub fn execute_scene(address: Address, scene_ids: Vec<u8>) -> Result<Self, GatewayError> {
        if scene_ids.is_empty() || scene_ids.len() > 28 {
            return Err(GatewayError::ReservedResetBit { mask: scene_ids.len() as u8 });
        }
        Ok(ShadeCommand::ExecuteScene { address, scene_ids })
    }

    pub fn address(&self) -> Address {
        match self {
            ShadeCommand::SetPositions { address, .. }
            | ShadeCommand::ExecuteScene { address, .. }
            | ShadeCommand::GroupAssign { address, .. }
            | ShadeCommand::Raw { address, .. }
            | ShadeCommand::SceneControllerProgram { address, .. }
            | ShadeCommand::Reset { address, .. }
            | ShadeCommand::FirmwareChunk { address, .. }
            | ShadeCommand::BatteryQuery { address, .. }
            | ShadeCommand::SetDiscoveredFlag { address, .. } => *address,
        }
    }

    /// Build the outer record type and wire body for this command.
    pub fn encode(&self) -> (RecordType, Vec<u8>) {
        match self {
            ShadeCommand::SetPositions { address, positions } => {
                let mut body = address.to_wire();
                for p in positions {
                    p.push_sub_record(&mut body);
                }
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::ExecuteScene { address, scene_ids } => {
                let mut body = address.to_wire();
                body.push(0x03); // scene-execute opcode
                body.extend_from_slice(scene_ids);
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::GroupAssign { address, current_bitmap, group_id, assign } => {
                let mut bitmap = *current_bitmap;
                let byte = (*group_id / 8) as usize;
                let bit = 1u8 << (*group_id % 8);
                if *assign {
                    bitmap[byte] |= bit;
                } else {
                    bitmap[byte] &= !bit;
                }
                let mut body = address.to_wire();
                body.extend_from_slice(&bitmap);
                (RecordType::GroupSetReq, body)
            }
            ShadeCommand::Raw { address, bytes } => {
                let mut body = address.to_wire();
                body.extend_from_slice(bytes);
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::SceneControllerProgram { address, buttons } => {
                let mut body = address.to_wire();
                for button in buttons {
                    button.push_sub_record(&mut body);
                }
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::Reset { address, mask } => {
                let mut body = address.to_wire();
                body.push(0x04); // reset opcode
                body.push(mask.bits());
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::FirmwareChunk { address, chunk_index, payload } => {
                let mut body = address.to_wire();
                body.push(0x05); // firmware-chunk opcode
                body.extend_from_slice(&chunk_index.to_le_bytes());
                body.extend_from_slice(payload);
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::BatteryQuery { address } => {
                let mut body = address.to_wire();
                body.push(0x06); // battery-query opcode
                (RecordType::ShadeDataReq, body)
            }
            ShadeCommand::SetDiscoveredFlag { address } => {
                let mut body = address.to_wire();
                body.push(0x07); // set-discovered-flag opcode
                (RecordType::ShadeDataReq, body)
            }
        }
    }

    /// Settle-window tick count after serial acknowledgment (design §4.3):
    /// 9 ticks for single-shade battery queries, 5 for everything else.
    pub fn settle_ticks(&self) -> u32 {
        match self {
            ShadeCommand::BatteryQuery { .. } => 9,
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_mask_rejects_reserved_bits() {
        assert!(ResetMask::new(0b0000_0111).is_ok());
        assert!(matches!(ResetMask::new(0b0000_1000), Err(GatewayError::ReservedResetBit { mask: 8 })));
    }

    #[test]
    fn execute_scene_rejects_out_of_range_counts() {
        assert!(ShadeCommand::execute_scene(Address::None, vec![]).is_err());
        assert!(ShadeCommand::execute_scene(Address::None, vec![1; 28]).is_ok());
        assert!(ShadeCommand::execute_scene(Address::None, vec![1; 29]).is_err());
    }

    #[test]
    fn set_positions_encodes_one_sub_record_per_rail() {
        let cmd = ShadeCommand::SetPositions {
            address: Address::DeviceId(7),
            positions: vec![
                PositionSetting { rail: RailKind::Primary, value: 50 },
                PositionSetting { rail: RailKind::Vane, value: 10 },
            ],
        };
        let (record_type, body) = cmd.encode();
        assert_eq!(record_type, RecordType::ShadeDataReq);
        // tag(1) + device id(2) + two 5-byte sub-records
        assert_eq!(body.len(), 3 + 5 + 5);
        assert_eq!(&body[0..3], &[1, 7, 0]);
        assert_eq!(&body[3..8], &[3, OPCODE_SET_POSITION, 0, 50, 0]);
        assert_eq!(&body[8..13], &[3, OPCODE_SET_POSITION, 2, 10, 0]);
    }

    #[test]
    fn group_assign_sets_and_clears_single_bit() {
        let cmd = ShadeCommand::GroupAssign {
            address: Address::DeviceId(1),
            current_bitmap: [0u8; 32],
            group_id: 9,
            assign: true,
        };
        let (record_type, body) = cmd.encode();
        assert_eq!(record_type, RecordType::GroupSetReq);
        let bitmap = &body[3..];
        assert_eq!(bitmap[1], 0b0000_0010);

        let cmd = ShadeCommand::GroupAssign {
            address: Address::DeviceId(1),
            current_bitmap: [0xFFu8; 32],
            group_id: 9,
            assign: false,
        };
        let (_, body) = cmd.encode();
        assert_eq!(body[3 + 1], 0b1111_1101);
    }
}
