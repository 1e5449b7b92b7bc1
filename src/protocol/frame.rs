use log::{debug, trace, warn};
use thiserror::Error;

use super::bits::{CodecError, WireValue};
use super::packet::{
    Datapoint, DeviceInfo, FirmwarePacket, ManualControl, ManualStatus, Payload,
    ReferenceSettings, SweepSettings,
};
use super::{Packet, PacketType};

/// Sentinel marking a possible frame start.
pub const HEADER: u8 = 0x5A;
/// Sentinel, length and type tag.
pub const HEADER_SIZE: usize = 4;
pub const CRC_SIZE: usize = 4;
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CRC_SIZE;
/// Largest frame any packet type produces (a firmware chunk).
pub const MAX_PACKET_FRAME: usize = FRAME_OVERHEAD + FirmwarePacket::WIRE_SIZE;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("destination holds {capacity} bytes, frame needs {needed}")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("payload: {0}")]
    Payload(#[from] CodecError),
    #[error("frame of {0} bytes does not fit the 16-bit length field")]
    FrameTooLarge(usize),
}

/// Why a [`decode`] call produced (or did not produce) a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Valid,
    /// No sentinel in the buffer, everything scanned is noise.
    NoFrame,
    /// A frame starts here but has not fully arrived.
    Incomplete,
    BadCrc,
    /// Declared length is shorter than an empty frame.
    BadLength(u16),
    /// CRC matched but the type tag is not known.
    UnknownType(u8),
    /// CRC matched but the payload is too short for its type.
    BadPayload(PacketType),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub packet: Packet,
    /// Bytes the caller should drop from the front of its buffer.
    pub consumed: usize,
    pub status: FrameStatus,
}

impl Decoded {
    fn nothing(consumed: usize, status: FrameStatus) -> Self {
        Self {
            packet: Packet::None,
            consumed,
            status,
        }
    }
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Scans `buf` for the next frame.
///
/// Noise before a sentinel is always consumed. An incomplete frame stops
/// `consumed` at its sentinel so the caller keeps it and appends more bytes.
/// A CRC failure consumes the sentinel only, so a real frame that starts
/// inside the rejected region is still found on the next call.
pub fn decode(buf: &[u8]) -> Decoded {
    let Some(start) = buf.iter().position(|&b| b == HEADER) else {
        if !buf.is_empty() {
            trace!("no sentinel in {} bytes", buf.len());
        }
        return Decoded::nothing(buf.len(), FrameStatus::NoFrame);
    };
    let frame = &buf[start..];
    if frame.len() < HEADER_SIZE {
        return Decoded::nothing(start, FrameStatus::Incomplete);
    }

    let length = u16::read_ne(&frame[1..3]);
    let len = length as usize;
    if len < FRAME_OVERHEAD {
        debug!("sentinel at {start} declares impossible length {length}");
        return Decoded::nothing(start + 1, FrameStatus::BadLength(length));
    }
    if frame.len() < len {
        trace!("frame at {start}: have {} of {len} bytes", frame.len());
        return Decoded::nothing(start, FrameStatus::Incomplete);
    }

    let body = &frame[..len - CRC_SIZE];
    let received = u32::read_ne(&frame[len - CRC_SIZE..len]);
    let computed = crc32(body);
    if received != computed {
        debug!("crc mismatch at {start}: received={received:#010X}, computed={computed:#010X}");
        return Decoded::nothing(start + 1, FrameStatus::BadCrc);
    }

    let consumed = start + len;
    let tag = frame[3];
    let Ok(ty) = PacketType::try_from(tag) else {
        warn!("dropping valid frame with unknown type tag {tag}");
        return Decoded::nothing(consumed, FrameStatus::UnknownType(tag));
    };
    match decode_payload(ty, &body[HEADER_SIZE..]) {
        Ok(packet) => Decoded {
            packet,
            consumed,
            status: FrameStatus::Valid,
        },
        Err(e) => {
            warn!("dropping {ty:?} frame: {e}");
            Decoded::nothing(consumed, FrameStatus::BadPayload(ty))
        }
    }
}

/// Writes `packet` as a complete frame into `dest` and returns the frame size.
pub fn encode(packet: &Packet, dest: &mut [u8]) -> Result<usize, EncodeError> {
    if dest.len() < FRAME_OVERHEAD {
        return Err(EncodeError::BufferTooSmall {
            needed: FRAME_OVERHEAD,
            capacity: dest.len(),
        });
    }
    let payload_end = dest.len() - CRC_SIZE;
    let payload_size = encode_payload(packet, &mut dest[HEADER_SIZE..payload_end])?;
    let size = payload_size + FRAME_OVERHEAD;
    if size > dest.len() {
        return Err(EncodeError::BufferTooSmall {
            needed: size,
            capacity: dest.len(),
        });
    }
    let length = u16::try_from(size).map_err(|_| EncodeError::FrameTooLarge(size))?;

    dest[0] = HEADER;
    length.write_ne(&mut dest[1..3]);
    dest[3] = packet.packet_type() as u8;
    let crc = crc32(&dest[..size - CRC_SIZE]);
    crc.write_ne(&mut dest[size - CRC_SIZE..size]);
    Ok(size)
}

fn decode_payload(ty: PacketType, payload: &[u8]) -> Result<Packet, CodecError> {
    Ok(match ty {
        PacketType::Datapoint => Packet::Datapoint(Datapoint::decode_from(payload)?),
        PacketType::SweepSettings => Packet::SweepSettings(SweepSettings::decode_from(payload)?),
        PacketType::Reference => Packet::Reference(ReferenceSettings::decode_from(payload)?),
        PacketType::DeviceInfo => Packet::DeviceInfo(DeviceInfo::decode_from(payload)?),
        PacketType::Status => Packet::Status(ManualStatus::decode_from(payload)?),
        PacketType::ManualControl => Packet::ManualControl(ManualControl::decode_from(payload)?),
        PacketType::FirmwarePacket => Packet::FirmwarePacket(FirmwarePacket::decode_from(payload)?),
        PacketType::Ack => Packet::Ack,
        PacketType::Nack => Packet::Nack,
        PacketType::ClearFlash => Packet::ClearFlash,
        PacketType::PerformFirmwareUpdate => Packet::PerformFirmwareUpdate,
        PacketType::None => Packet::None,
    })
}

fn encode_payload(packet: &Packet, buf: &mut [u8]) -> Result<usize, CodecError> {
    match packet {
        Packet::Datapoint(p) => p.encode_into(buf),
        Packet::SweepSettings(p) => p.encode_into(buf),
        Packet::Reference(p) => p.encode_into(buf),
        Packet::DeviceInfo(p) => p.encode_into(buf),
        Packet::Status(p) => p.encode_into(buf),
        Packet::ManualControl(p) => p.encode_into(buf),
        Packet::FirmwarePacket(p) => p.encode_into(buf),
        Packet::None
        | Packet::Ack
        | Packet::Nack
        | Packet::ClearFlash
        | Packet::PerformFirmwareUpdate => Ok(0),
    }
}
