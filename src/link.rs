use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{EncodeError, FrameStatus, Packet, PacketType, decode};
use crate::stats::Stats;

/// Consecutive corrupt frames tolerated before the link is reported lost.
pub const DEFAULT_MAX_CRC_FAILURES: u32 = 10;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("lost sync: {0} consecutive corrupt frames")]
    Desync(u32),
    #[error("device rejected {0:?}")]
    Nack(PacketType),
}

/// Reassembles packets from transport reads of any size.
///
/// Owns the receive buffer, so appending and decoding are serialized by
/// `&mut self`.
#[derive(Debug)]
pub struct Receiver {
    buf: Vec<u8>,
    stats: Stats,
    failures: u32,
    max_failures: u32,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CRC_FAILURES)
    }
}

impl Receiver {
    /// `max_failures == 0` never reports desync.
    pub fn new(max_failures: u32) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            stats: Stats::new(),
            failures: 0,
            max_failures,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.stats.add_bytes(bytes.len());
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Next complete packet, or `None` when more bytes are needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, LinkError> {
        loop {
            let d = decode(&self.buf);
            self.stats.record(d.status, d.consumed);
            self.buf.drain(..d.consumed);

            match d.status {
                FrameStatus::Valid => {
                    self.failures = 0;
                    if d.packet.is_none() {
                        continue;
                    }
                    return Ok(Some(d.packet));
                }
                FrameStatus::BadCrc | FrameStatus::BadLength(_) => {
                    self.failures += 1;
                    if self.max_failures > 0 && self.failures >= self.max_failures {
                        let n = self.failures;
                        self.failures = 0;
                        warn!("{n} consecutive corrupt frames, link looks lost");
                        return Err(LinkError::Desync(n));
                    }
                }
                FrameStatus::UnknownType(_) | FrameStatus::BadPayload(_) => {}
                FrameStatus::NoFrame | FrameStatus::Incomplete => {
                    if d.consumed > 0 {
                        debug!("discarded {} bytes of line noise", d.consumed);
                    }
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HEADER, MAX_PACKET_FRAME, ReferenceSettings, SweepSettings, encode};
    use proptest::prelude::*;

    fn frame_of(packet: &Packet) -> Vec<u8> {
        let mut buf = [0u8; MAX_PACKET_FRAME];
        let n = encode(packet, &mut buf).unwrap();
        buf[..n].to_vec()
    }

    fn drain(rx: &mut Receiver) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some(p) = rx.next_packet().unwrap() {
            out.push(p);
        }
        out
    }

    fn sample(i: u16) -> Packet {
        if i % 3 == 0 {
            Packet::Ack
        } else if i % 3 == 1 {
            Packet::SweepSettings(SweepSettings {
                f_start: i as u64,
                f_stop: 1_000_000 + i as u64,
                points: i,
                if_bandwidth: 10,
                cdbm_excitation: -(i as i16),
            })
        } else {
            Packet::Reference(ReferenceSettings {
                ext_ref_output_freq: i as u32,
                automatic_switch: i % 2 == 0,
                use_external_ref: true,
            })
        }
    }

    #[test]
    fn byte_at_a_time() {
        let mut rx = Receiver::default();
        let frame = frame_of(&sample(1));
        for &b in &frame[..frame.len() - 1] {
            rx.extend(&[b]);
            assert_eq!(rx.next_packet().unwrap(), None);
        }
        rx.extend(&frame[frame.len() - 1..]);
        assert_eq!(rx.next_packet().unwrap(), Some(sample(1)));
        assert_eq!(rx.buffered(), 0);
        assert_eq!(rx.stats().frames, 1);
    }

    #[test]
    fn noise_is_dropped_partial_kept() {
        let mut rx = Receiver::default();
        let frame = frame_of(&sample(2));
        rx.extend(&[1, 2, 3]);
        rx.extend(&frame[..10]);
        assert_eq!(rx.next_packet().unwrap(), None);
        assert_eq!(rx.buffered(), 10);
        assert_eq!(rx.stats().noise, 3);
        rx.extend(&frame[10..]);
        assert_eq!(drain(&mut rx), vec![sample(2)]);
    }

    #[test]
    fn corrupt_frame_then_good_frame() {
        let mut rx = Receiver::default();
        let mut bad = frame_of(&sample(1));
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        rx.extend(&bad);
        rx.extend(&frame_of(&sample(2)));
        assert_eq!(drain(&mut rx), vec![sample(2)]);
        assert_eq!(rx.stats().bad, 1);
    }

    #[test]
    fn persistent_corruption_reports_desync() {
        let mut rx = Receiver::new(3);
        let mut bad = frame_of(&Packet::Ack);
        bad[7] ^= 0x01;
        for _ in 0..3 {
            rx.extend(&bad);
        }
        let mut result = Ok(None);
        for _ in 0..10 {
            result = rx.next_packet();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(LinkError::Desync(3))));
    }

    #[test]
    fn valid_frame_resets_failure_count() {
        let mut rx = Receiver::new(2);
        let mut bad = vec![HEADER];
        bad.extend_from_slice(&2u16.to_ne_bytes());
        bad.push(0);
        rx.extend(&bad);
        rx.extend(&frame_of(&Packet::Ack));
        rx.extend(&bad);
        rx.extend(&frame_of(&Packet::Nack));
        assert_eq!(drain(&mut rx), vec![Packet::Ack, Packet::Nack]);
    }

    #[test]
    fn none_frames_are_skipped() {
        let mut rx = Receiver::default();
        rx.extend(&frame_of(&Packet::None));
        rx.extend(&frame_of(&Packet::Ack));
        assert_eq!(drain(&mut rx), vec![Packet::Ack]);
        assert_eq!(rx.stats().frames, 2);
    }

    proptest! {
        #[test]
        fn fragmentation_does_not_change_packets(
            ids in prop::collection::vec(0u16..500, 1..12),
            noise in prop::collection::vec(any::<u8>().prop_filter("sentinel", |b| *b != HEADER), 0..6),
            cuts in prop::collection::vec(1usize..40, 1..64),
        ) {
            let mut stream = Vec::new();
            for &i in &ids {
                stream.extend_from_slice(&noise);
                stream.extend_from_slice(&frame_of(&sample(i)));
            }

            let mut rx = Receiver::new(0);
            let mut got = Vec::new();
            let mut pos = 0;
            let mut k = 0;
            while pos < stream.len() {
                let n = cuts[k % cuts.len()].min(stream.len() - pos);
                rx.extend(&stream[pos..pos + n]);
                pos += n;
                k += 1;
                got.extend(drain(&mut rx));
            }

            let expected: Vec<Packet> = ids.iter().map(|&i| sample(i)).collect();
            prop_assert_eq!(got, expected);
            prop_assert_eq!(rx.buffered(), 0);
        }
    }
}
