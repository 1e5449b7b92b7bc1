use log::{debug, info, trace};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::link::{LinkError, Receiver};
use crate::protocol::{
    DeviceInfo, FIRMWARE_CHUNK_SIZE, FirmwarePacket, MAX_PACKET_FRAME, ManualControl, Packet,
    PacketType, ReferenceSettings, SweepSettings, encode,
};

const READ_CHUNK: usize = 512;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_ERASE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Host side of a link to one analyzer over any byte pipe.
pub struct Device<T> {
    port: T,
    rx: Receiver,
    tx_buf: [u8; MAX_PACKET_FRAME],
    read_buf: [u8; READ_CHUNK],
    last_info: Option<DeviceInfo>,
    ack_timeout: Duration,
    erase_timeout: Duration,
}

impl<T: Read + Write> Device<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            rx: Receiver::default(),
            tx_buf: [0; MAX_PACKET_FRAME],
            read_buf: [0; READ_CHUNK],
            last_info: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            erase_timeout: DEFAULT_ERASE_TIMEOUT,
        }
    }

    pub fn with_receiver(mut self, rx: Receiver) -> Self {
        self.rx = rx;
        self
    }

    pub fn with_timeouts(mut self, ack: Duration, erase: Duration) -> Self {
        self.ack_timeout = ack;
        self.erase_timeout = erase;
        self
    }

    pub fn receiver(&self) -> &Receiver {
        &self.rx
    }

    pub fn receiver_mut(&mut self) -> &mut Receiver {
        &mut self.rx
    }

    /// Most recent `DeviceInfo` seen on the link.
    pub fn last_info(&self) -> Option<&DeviceInfo> {
        self.last_info.as_ref()
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    pub fn send(&mut self, packet: &Packet) -> Result<(), LinkError> {
        let n = encode(packet, &mut self.tx_buf)?;
        self.port.write_all(&self.tx_buf[..n])?;
        self.port.flush()?;
        trace!("sent {:?} ({n} bytes)", packet.packet_type());
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Packet>, LinkError> {
        if let Some(p) = self.rx.next_packet()? {
            self.note(&p);
            return Ok(Some(p));
        }
        match self.port.read(&mut self.read_buf) {
            Ok(0) => {
                thread::sleep(Duration::from_millis(1));
                Ok(None)
            }
            Ok(n) => {
                self.rx.extend(&self.read_buf[..n]);
                let p = self.rx.next_packet()?;
                if let Some(p) = &p {
                    self.note(p);
                }
                Ok(p)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn note(&mut self, packet: &Packet) {
        if let Packet::DeviceInfo(info) = packet {
            self.last_info = Some(*info);
        }
    }

    /// Receives until `f` accepts a packet. Everything else is dropped.
    pub fn wait_for<R>(
        &mut self,
        timeout: Duration,
        mut f: impl FnMut(&Packet) -> Option<R>,
    ) -> Result<R, LinkError> {
        let start = Instant::now();
        loop {
            if let Some(p) = self.poll()? {
                if let Some(r) = f(&p) {
                    return Ok(r);
                }
                trace!("ignoring {:?} while waiting", p.packet_type());
            }
            if start.elapsed() >= timeout {
                return Err(LinkError::Timeout(timeout));
            }
        }
    }

    pub fn recv(&mut self, timeout: Duration) -> Result<Packet, LinkError> {
        self.wait_for(timeout, |p| Some(*p))
    }

    fn expect_ack(&mut self, request: PacketType, timeout: Duration) -> Result<(), LinkError> {
        let acked = self.wait_for(timeout, |p| match p {
            Packet::Ack => Some(true),
            Packet::Nack => Some(false),
            _ => None,
        })?;
        if acked {
            Ok(())
        } else {
            Err(LinkError::Nack(request))
        }
    }

    fn request(&mut self, packet: &Packet, timeout: Duration) -> Result<(), LinkError> {
        self.send(packet)?;
        self.expect_ack(packet.packet_type(), timeout)
    }

    pub fn configure_sweep(&mut self, settings: SweepSettings) -> Result<(), LinkError> {
        info!(
            "sweep {}..{} Hz, {} points, ifbw {} Hz, {:.2} dBm",
            settings.f_start,
            settings.f_stop,
            settings.points,
            settings.if_bandwidth,
            settings.excitation_dbm()
        );
        self.request(&Packet::SweepSettings(settings), self.ack_timeout)
    }

    pub fn set_manual(&mut self, control: ManualControl) -> Result<(), LinkError> {
        debug!("manual control {control:?}");
        self.request(&Packet::ManualControl(control), self.ack_timeout)
    }

    pub fn set_reference(&mut self, reference: ReferenceSettings) -> Result<(), LinkError> {
        debug!("reference {reference:?}");
        self.request(&Packet::Reference(reference), self.ack_timeout)
    }

    pub fn wait_for_info(&mut self, timeout: Duration) -> Result<DeviceInfo, LinkError> {
        self.wait_for(timeout, |p| match p {
            Packet::DeviceInfo(info) => Some(*info),
            _ => None,
        })
    }

    /// Erases flash, streams `image` in acked chunks from address 0, then
    /// asks the device to boot it. The last chunk is padded with 0xFF.
    /// `progress` gets (bytes sent, total) after every chunk.
    pub fn update_firmware(
        &mut self,
        image: &[u8],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(), LinkError> {
        info!("erasing flash for {} byte image", image.len());
        self.send(&Packet::ClearFlash)?;
        self.expect_ack(PacketType::ClearFlash, self.erase_timeout)?;

        let mut sent = 0;
        for chunk in image.chunks(FIRMWARE_CHUNK_SIZE) {
            let mut packet = FirmwarePacket {
                address: sent as u32,
                data: [0xFF; FIRMWARE_CHUNK_SIZE],
            };
            packet.data[..chunk.len()].copy_from_slice(chunk);
            self.request(&Packet::FirmwarePacket(packet), self.ack_timeout)?;
            sent += chunk.len();
            progress(sent, image.len());
        }

        info!("image transferred, triggering update");
        self.request(&Packet::PerformFirmwareUpdate, self.ack_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Datapoint, Temperatures};
    use std::collections::VecDeque;

    type Reply = Box<dyn FnMut(&Packet) -> Vec<Packet>>;

    /// Plays the analyzer: decodes what the host writes and queues replies,
    /// handing them back a few bytes per read.
    struct FakeAnalyzer {
        inbox: Receiver,
        outgoing: VecDeque<u8>,
        reply: Reply,
        seen: Vec<Packet>,
    }

    impl FakeAnalyzer {
        fn new(reply: impl FnMut(&Packet) -> Vec<Packet> + 'static) -> Self {
            Self {
                inbox: Receiver::new(0),
                outgoing: VecDeque::new(),
                reply: Box::new(reply),
                seen: Vec::new(),
            }
        }

        fn acking() -> Self {
            Self::new(|_| vec![Packet::Ack])
        }

        fn queue(&mut self, packet: &Packet) {
            let mut buf = [0u8; MAX_PACKET_FRAME];
            let n = encode(packet, &mut buf).unwrap();
            self.outgoing.extend(&buf[..n]);
        }
    }

    impl Write for FakeAnalyzer {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.inbox.extend(bytes);
            while let Some(p) = self.inbox.next_packet().unwrap() {
                for r in (self.reply)(&p) {
                    self.queue(&r);
                }
                self.seen.push(p);
            }
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Read for FakeAnalyzer {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            if self.outgoing.is_empty() {
                return Err(ErrorKind::TimedOut.into());
            }
            let n = out.len().min(self.outgoing.len()).min(7);
            for b in out.iter_mut().take(n) {
                *b = self.outgoing.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    fn quick<T: Read + Write>(dev: Device<T>) -> Device<T> {
        dev.with_timeouts(Duration::from_millis(50), Duration::from_millis(50))
    }

    fn settings() -> SweepSettings {
        SweepSettings {
            f_start: 1_000_000,
            f_stop: 6_000_000_000,
            points: 201,
            if_bandwidth: 1000,
            cdbm_excitation: -1000,
        }
    }

    #[test]
    fn configure_sweep_is_acked() {
        let mut dev = Device::new(FakeAnalyzer::acking());
        dev.configure_sweep(settings()).unwrap();
        let fake = dev.into_inner();
        assert_eq!(fake.seen, vec![Packet::SweepSettings(settings())]);
    }

    #[test]
    fn nack_is_an_error() {
        let mut dev = Device::new(FakeAnalyzer::new(|_| vec![Packet::Nack]));
        let err = dev.set_reference(ReferenceSettings::default()).unwrap_err();
        assert!(matches!(err, LinkError::Nack(PacketType::Reference)));
    }

    #[test]
    fn silence_times_out() {
        let mut dev = quick(Device::new(FakeAnalyzer::new(|_| Vec::new())));
        let err = dev.set_manual(ManualControl::default()).unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));
    }

    #[test]
    fn ack_found_behind_streamed_data() {
        let mut dev = Device::new(FakeAnalyzer::new(|p| match p {
            Packet::SweepSettings(_) => vec![
                Packet::Datapoint(Datapoint::default()),
                Packet::Status(Default::default()),
                Packet::Ack,
            ],
            _ => Vec::new(),
        }));
        dev.configure_sweep(settings()).unwrap();
    }

    #[test]
    fn info_after_noise_updates_last_info() {
        let info = DeviceInfo {
            fw_major: 0,
            fw_minor: 3,
            hw_revision: b'B',
            fpga_configured: true,
            temperatures: Temperatures {
                source: 40,
                lo1: 41,
                mcu: 35,
            },
            ..Default::default()
        };
        let mut fake = FakeAnalyzer::acking();
        fake.outgoing.extend([0x00, 0x13, 0x37, 0xFF]);
        fake.queue(&Packet::Datapoint(Datapoint {
            point: 7,
            ..Default::default()
        }));
        fake.queue(&Packet::DeviceInfo(info));

        let mut dev = quick(Device::new(fake));
        assert!(dev.last_info().is_none());
        assert_eq!(dev.wait_for_info(Duration::from_millis(500)).unwrap(), info);
        assert_eq!(dev.last_info(), Some(&info));
        assert_eq!(dev.receiver().stats().noise, 4);
    }

    #[test]
    fn recv_preserves_order() {
        let mut fake = FakeAnalyzer::acking();
        for point in 0..5u16 {
            fake.queue(&Packet::Datapoint(Datapoint {
                point,
                frequency: settings().point_frequency(point),
                ..Default::default()
            }));
        }
        let mut dev = quick(Device::new(fake));
        for point in 0..5u16 {
            match dev.recv(Duration::from_millis(500)).unwrap() {
                Packet::Datapoint(d) => {
                    assert_eq!(d.point, point);
                    assert_eq!(d.frequency, settings().point_frequency(point));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(
            dev.recv(Duration::from_millis(20)),
            Err(LinkError::Timeout(_))
        ));
    }

    #[test]
    fn firmware_update_sequence() {
        let image: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let mut dev = Device::new(FakeAnalyzer::acking());
        let mut steps = Vec::new();
        dev.update_firmware(&image, |sent, total| steps.push((sent, total)))
            .unwrap();
        assert_eq!(steps, vec![(256, 600), (512, 600), (600, 600)]);

        let seen = dev.into_inner().seen;
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], Packet::ClearFlash);
        assert_eq!(seen[4], Packet::PerformFirmwareUpdate);
        let chunks: Vec<FirmwarePacket> = seen[1..4]
            .iter()
            .map(|p| match p {
                Packet::FirmwarePacket(f) => *f,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(chunks[0].address, 0);
        assert_eq!(chunks[1].address, 256);
        assert_eq!(chunks[2].address, 512);
        assert_eq!(&chunks[1].data[..], &image[256..512]);
        assert_eq!(&chunks[2].data[..88], &image[512..]);
        assert!(chunks[2].data[88..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn firmware_stops_on_nack() {
        let mut dev = quick(Device::new(FakeAnalyzer::new(|p| match p {
            Packet::FirmwarePacket(f) if f.address == 256 => vec![Packet::Nack],
            _ => vec![Packet::Ack],
        })));
        let image = [0u8; 1024];
        let err = dev.update_firmware(&image, |_, _| {}).unwrap_err();
        assert!(matches!(err, LinkError::Nack(PacketType::FirmwarePacket)));

        let seen = dev.into_inner().seen;
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains(&Packet::PerformFirmwareUpdate));
    }
}
