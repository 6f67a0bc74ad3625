//! Maple peripheral bus: frame-based DMA request/response state machine for
//! controllers, keyboards, and the two auxiliary device kinds the original
//! hardware wires through the same vtable (`purupuru` rumble packs, VMUs).
//!
//! Address packing keeps unit 0 (the controller itself) at `0x20` and units
//! 1-5 (expansion slots) one-hot in the low five bits, with port in bits
//! 6-7 — this lets `pack`/`unpack` stay a pure bit-twiddle with no lookup
//! table.

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_MAPLE_COMPLETION_DELAY: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapleCommand {
    DeviceInfo,
    GetCondition,
    Nop,
}

impl MapleCommand {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MapleCommand::DeviceInfo),
            0x09 => Some(MapleCommand::GetCondition),
            0x00 => Some(MapleCommand::Nop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapleResponseCode {
    DeviceInfo,
    DataTransfer,
    None,
}

impl MapleResponseCode {
    fn code(self) -> u8 {
        match self {
            MapleResponseCode::DeviceInfo => 0x05,
            MapleResponseCode::DataTransfer => 0x08,
            MapleResponseCode::None => 0xff,
        }
    }
}

/// Packs `(port, unit)` into the 8-bit wire address.
pub fn pack(port: u8, unit: u8) -> u8 {
    let low = if unit == 0 { 0x20 } else { 1 << (unit - 1) };
    ((port & 0x3) << 6) | low
}

/// Recovers `(port, unit)` from a wire address produced by `pack`.
pub fn unpack(addr: u8) -> (u8, u8) {
    let port = (addr >> 6) & 0x3;
    let low = addr & 0x3f;
    let unit = if low == 0x20 {
        0
    } else {
        (low.trailing_zeros() as u8) + 1
    };
    (port, unit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapleDeviceKind {
    Controller,
    Keyboard,
    Purupuru,
    Vmu,
}

impl MapleDeviceKind {
    fn function_mask(self) -> u32 {
        match self {
            MapleDeviceKind::Controller => 0x0100_0000,
            MapleDeviceKind::Keyboard => 0x0000_0040,
            MapleDeviceKind::Purupuru => 0x0001_0000,
            MapleDeviceKind::Vmu => 0x0000_0002,
        }
    }

    fn device_name(self) -> &'static [u8; 30] {
        match self {
            MapleDeviceKind::Controller => b"Dreamcast Controller          ",
            MapleDeviceKind::Keyboard => b"Dreamcast Keyboard            ",
            MapleDeviceKind::Purupuru => b"Puru Puru Pack                ",
            MapleDeviceKind::Vmu => b"Visual Memory                 ",
        }
    }
}

pub struct MapleDevice {
    pub kind: MapleDeviceKind,
    pub plugged_in: bool,
}

/// Controller face-button/axis snapshot, the `GETCOND` payload for
/// `MapleDeviceKind::Controller`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerState {
    pub buttons: u16,
    pub trigger_l: u8,
    pub trigger_r: u8,
    pub axes: [u8; 4],
}

pub struct MapleBus {
    ports: [[Option<MapleDevice>; 6]; 4],
    completion_delay: u64,
}

impl MapleBus {
    pub fn new() -> Self {
        MapleBus::with_completion_delay(DEFAULT_MAPLE_COMPLETION_DELAY)
    }

    pub fn with_completion_delay(completion_delay: u64) -> Self {
        MapleBus { ports: Default::default(), completion_delay }
    }

    pub fn plug_in(&mut self, port: u8, unit: u8, kind: MapleDeviceKind) {
        self.ports[port as usize][unit as usize] = Some(MapleDevice { kind, plugged_in: true });
    }

    fn device(&self, port: u8, unit: u8) -> Option<&MapleDevice> {
        self.ports.get(port as usize)?.get(unit as usize)?.as_ref()
    }

    /// Handles one frame's command triplet, returning `(response_code,
    /// payload)`. `controller_state` supplies live input for `GETCOND`
    /// against a `Controller` device; ignored for other device kinds.
    pub fn handle_frame(
        &self,
        command_code: u8,
        maple_addr: u8,
        controller_state: &ControllerState,
    ) -> CoreResult<(MapleResponseCode, Vec<u8>)> {
        let (port, unit) = unpack(maple_addr);
        let command = MapleCommand::from_code(command_code)
            .ok_or_else(|| CoreError::Protocol(format!("unknown maple command code {command_code:#x}")))?;

        let device = match self.device(port, unit) {
            Some(d) if d.plugged_in => d,
            _ => return Ok((MapleResponseCode::None, Vec::new())),
        };

        match command {
            MapleCommand::Nop => Ok((MapleResponseCode::None, Vec::new())),
            MapleCommand::DeviceInfo => Ok((MapleResponseCode::DeviceInfo, device_info_blob(device.kind))),
            MapleCommand::GetCondition => match device.kind {
                MapleDeviceKind::Controller => Ok((MapleResponseCode::DataTransfer, controller_payload(controller_state))),
                MapleDeviceKind::Keyboard => Ok((MapleResponseCode::DataTransfer, keyboard_payload())),
                MapleDeviceKind::Purupuru | MapleDeviceKind::Vmu => Ok((MapleResponseCode::DataTransfer, Vec::new())),
            },
        }
    }

    /// Delay, in scheduler cycles, before the single DMA-complete interrupt
    /// fires after an entire frame list finishes processing. The caller
    /// schedules the actual event on its `Clock`.
    pub fn completion_delay(&self) -> u64 {
        self.completion_delay
    }
}

impl Default for MapleBus {
    fn default() -> Self {
        Self::new()
    }
}

fn device_info_blob(kind: MapleDeviceKind) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 12 + 30 + 60 + 2 + 2);
    out.extend_from_slice(&kind.function_mask().to_le_bytes());
    out.extend_from_slice(&[0u8; 12]); // function_data[3]
    out.push(0); // area code
    out.push(0); // connector direction
    out.extend_from_slice(kind.device_name());
    out.extend_from_slice(&[0u8; 60]); // license string
    out.extend_from_slice(&0x01f4u16.to_le_bytes()); // standby power
    out.extend_from_slice(&0x01f4u16.to_le_bytes()); // max power
    out
}

fn controller_payload(state: &ControllerState) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2 + 2 + 4);
    out.extend_from_slice(&MapleDeviceKind::Controller.function_mask().to_le_bytes());
    out.extend_from_slice(&state.buttons.to_le_bytes());
    out.push(state.trigger_l);
    out.push(state.trigger_r);
    out.extend_from_slice(&state.axes);
    out
}

fn keyboard_payload() -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 1 + 1 + 6);
    out.extend_from_slice(&MapleDeviceKind::Keyboard.function_mask().to_le_bytes());
    out.push(0); // modifiers
    out.push(0); // LEDs
    out.extend_from_slice(&[0u8; 6]); // 6-key rollover
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_for_every_port_and_unit() {
        for port in 0..4u8 {
            for unit in 0..6u8 {
                let addr = pack(port, unit);
                assert_eq!(unpack(addr), (port, unit), "port={port} unit={unit}");
            }
        }
    }

    #[test]
    fn devinfo_for_plugged_controller_reports_function_mask() {
        let mut bus = MapleBus::new();
        bus.plug_in(0, 0, MapleDeviceKind::Controller);
        let (code, payload) = bus.handle_frame(0x01, pack(0, 0), &ControllerState::default()).unwrap();
        assert_eq!(code, MapleResponseCode::DeviceInfo);
        assert_eq!(&payload[0..4], &0x0100_0000u32.to_le_bytes());
        let standby = u16::from_le_bytes([payload[payload.len() - 4], payload[payload.len() - 3]]);
        let max_power = u16::from_le_bytes([payload[payload.len() - 2], payload[payload.len() - 1]]);
        assert_eq!(standby, 0x01f4);
        assert_eq!(max_power, 0x01f4);
    }

    #[test]
    fn devinfo_for_unplugged_expansion_slot_is_none() {
        let mut bus = MapleBus::new();
        bus.plug_in(0, 0, MapleDeviceKind::Controller);
        let (code, payload) = bus.handle_frame(0x01, pack(0, 1), &ControllerState::default()).unwrap();
        assert_eq!(code, MapleResponseCode::None);
        assert!(payload.is_empty());
    }

    #[test]
    fn getcond_on_controller_reports_live_state() {
        let mut bus = MapleBus::new();
        bus.plug_in(0, 0, MapleDeviceKind::Controller);
        let state = ControllerState { buttons: 0x1234, trigger_l: 10, trigger_r: 20, axes: [1, 2, 3, 4] };
        let (code, payload) = bus.handle_frame(0x09, pack(0, 0), &state).unwrap();
        assert_eq!(code, MapleResponseCode::DataTransfer);
        assert_eq!(&payload[4..6], &0x1234u16.to_le_bytes());
        assert_eq!(payload[6], 10);
        assert_eq!(payload[7], 20);
    }

    #[test]
    fn unknown_command_is_a_protocol_error() {
        let bus = MapleBus::new();
        let err = bus.handle_frame(0x7f, pack(0, 0), &ControllerState::default());
        assert!(matches!(err, Err(CoreError::Protocol(_))));
    }
}
