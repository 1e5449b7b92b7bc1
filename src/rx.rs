use anyhow::{Context, Result};
use log::{info, warn};
use std::time::Duration;

use vna_link::protocol::{DeviceInfo, Packet};
use vna_link::LinkError;

use crate::cli::{InfoOpts, MonitorOpts};
use crate::port::open_device;

pub fn run(opts: MonitorOpts) -> Result<()> {
    let mut dev = open_device(&opts.ser, &opts.link)?;
    info!("monitoring {}", opts.ser.dev);

    loop {
        match dev.recv(Duration::from_secs(1)) {
            Ok(packet) => println!("{}", describe(&packet)),
            Err(LinkError::Timeout(_)) => {}
            Err(LinkError::Desync(n)) => {
                warn!("{n} corrupt frames in a row, is the device still connected?");
            }
            Err(e) => return Err(e).context("receive"),
        }
        dev.receiver_mut().stats_mut().maybe_log(opts.stats);
    }
}

pub fn info(opts: InfoOpts) -> Result<()> {
    let mut dev = open_device(&opts.ser, &opts.link)?;
    let info = dev
        .wait_for_info(Duration::from_millis(opts.wait_ms))
        .context("waiting for device info")?;
    println!("{}", describe_info(&info));
    Ok(())
}

pub fn describe_info(i: &DeviceInfo) -> String {
    format!(
        "firmware {}.{} hw rev {} | fpga={} ext_ref avail={} used={} | locked src={} lo1={} | adc_overload={} | temp src={}°C lo1={}°C mcu={}°C",
        i.fw_major,
        i.fw_minor,
        i.hw_revision as char,
        i.fpga_configured,
        i.ext_ref_available,
        i.ext_ref_in_use,
        i.source_locked,
        i.lo1_locked,
        i.adc_overload,
        i.temperatures.source,
        i.temperatures.lo1,
        i.temperatures.mcu
    )
}

/// One-line human readable form of a packet.
pub fn describe(packet: &Packet) -> String {
    match packet {
        Packet::Datapoint(d) => format!(
            "DATA #{} {} Hz S11={:+.4}{:+.4}j S21={:+.4}{:+.4}j S12={:+.4}{:+.4}j S22={:+.4}{:+.4}j",
            d.point,
            d.frequency,
            d.real_s11,
            d.imag_s11,
            d.real_s21,
            d.imag_s21,
            d.real_s12,
            d.imag_s12,
            d.real_s22,
            d.imag_s22
        ),
        Packet::SweepSettings(s) => format!(
            "SWEEP {}..{} Hz points={} ifbw={} Hz power={:.2} dBm",
            s.f_start,
            s.f_stop,
            s.points,
            s.if_bandwidth,
            s.excitation_dbm()
        ),
        Packet::Status(s) => format!(
            "STATUS p1[{},{}] {:+.3}{:+.3}j p2[{},{}] {:+.3}{:+.3}j ref[{},{}] {:+.3}{:+.3}j temp src={} lo={} locked src={} lo={}",
            s.port1min,
            s.port1max,
            s.port1real,
            s.port1imag,
            s.port2min,
            s.port2max,
            s.port2real,
            s.port2imag,
            s.refmin,
            s.refmax,
            s.refreal,
            s.refimag,
            s.temp_source,
            s.temp_lo,
            s.source_locked,
            s.lo_locked
        ),
        Packet::DeviceInfo(i) => format!("INFO {}", describe_info(i)),
        Packet::Reference(r) => format!(
            "REFERENCE out={} Hz auto={} external={}",
            r.ext_ref_output_freq, r.automatic_switch, r.use_external_ref
        ),
        Packet::FirmwarePacket(f) => format!("FIRMWARE chunk @ {:#010X}", f.address),
        other => format!("{:?}", other.packet_type()).to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vna_link::protocol::{Datapoint, ReferenceSettings};

    #[test]
    fn describes_packets() {
        let d = Packet::Datapoint(Datapoint {
            frequency: 1_000_000,
            point: 4,
            real_s11: 0.5,
            ..Default::default()
        });
        assert!(describe(&d).starts_with("DATA #4 1000000 Hz S11=+0.5000"));
        assert_eq!(describe(&Packet::Ack), "ACK");
        assert_eq!(describe(&Packet::ClearFlash), "CLEARFLASH");
        let r = Packet::Reference(ReferenceSettings {
            ext_ref_output_freq: 10_000_000,
            automatic_switch: true,
            use_external_ref: false,
        });
        assert_eq!(
            describe(&r),
            "REFERENCE out=10000000 Hz auto=true external=false"
        );
    }
}
