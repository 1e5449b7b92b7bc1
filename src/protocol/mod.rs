//! Binary framing shared by the analyzer firmware and the host.
//!
//! A frame is `[0x5A][len:u16][type:u8][payload][crc32:u32]`, with every
//! multi-byte field in the host's native byte order. `len` covers the whole
//! frame and the CRC covers everything before it.

pub mod bits;
pub mod frame;
pub mod packet;

pub use bits::{CodecError, Decoder, Encoder, WireValue};
pub use frame::{
    Decoded, EncodeError, FRAME_OVERHEAD, FrameStatus, HEADER, HEADER_SIZE, MAX_PACKET_FRAME,
    decode, encode,
};
pub use packet::{
    ATTENUATOR_MAX, Datapoint, DeviceInfo, FIRMWARE_CHUNK_SIZE, FirmwarePacket, ManualControl,
    ManualStatus, Payload, ReferenceSettings, SweepSettings, Temperatures,
};

/// Type tag carried in byte 3 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    None = 0,
    Datapoint = 1,
    SweepSettings = 2,
    Status = 3,
    ManualControl = 4,
    DeviceInfo = 5,
    FirmwarePacket = 6,
    Ack = 7,
    ClearFlash = 8,
    PerformFirmwareUpdate = 9,
    Nack = 10,
    Reference = 11,
}

impl PacketType {
    pub fn has_payload(self) -> bool {
        !matches!(
            self,
            PacketType::None
                | PacketType::Ack
                | PacketType::Nack
                | PacketType::ClearFlash
                | PacketType::PerformFirmwareUpdate
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        Ok(match tag {
            0 => PacketType::None,
            1 => PacketType::Datapoint,
            2 => PacketType::SweepSettings,
            3 => PacketType::Status,
            4 => PacketType::ManualControl,
            5 => PacketType::DeviceInfo,
            6 => PacketType::FirmwarePacket,
            7 => PacketType::Ack,
            8 => PacketType::ClearFlash,
            9 => PacketType::PerformFirmwareUpdate,
            10 => PacketType::Nack,
            11 => PacketType::Reference,
            other => return Err(other),
        })
    }
}

/// A decoded packet: the type tag together with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Packet {
    #[default]
    None,
    Datapoint(Datapoint),
    SweepSettings(SweepSettings),
    Status(ManualStatus),
    ManualControl(ManualControl),
    DeviceInfo(DeviceInfo),
    FirmwarePacket(FirmwarePacket),
    Ack,
    ClearFlash,
    PerformFirmwareUpdate,
    Nack,
    Reference(ReferenceSettings),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::None => PacketType::None,
            Packet::Datapoint(_) => PacketType::Datapoint,
            Packet::SweepSettings(_) => PacketType::SweepSettings,
            Packet::Status(_) => PacketType::Status,
            Packet::ManualControl(_) => PacketType::ManualControl,
            Packet::DeviceInfo(_) => PacketType::DeviceInfo,
            Packet::FirmwarePacket(_) => PacketType::FirmwarePacket,
            Packet::Ack => PacketType::Ack,
            Packet::ClearFlash => PacketType::ClearFlash,
            Packet::PerformFirmwareUpdate => PacketType::PerformFirmwareUpdate,
            Packet::Nack => PacketType::Nack,
            Packet::Reference(_) => PacketType::Reference,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Packet::None)
    }
}
