//! Host and firmware link for a two-port vector network analyzer.
//!
//! [`protocol`] holds the byte-exact framing and packet codecs, [`link`]
//! reassembles packets from a byte stream, and [`device`] drives a request /
//! acknowledge session over any `Read + Write` transport.

pub mod device;
pub mod link;
pub mod protocol;
pub mod stats;

pub use device::Device;
pub use link::{LinkError, Receiver};
pub use protocol::{Packet, PacketType, decode, encode};
