use anyhow::{anyhow, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use vna_link::protocol::{ATTENUATOR_MAX, ManualControl, ReferenceSettings, SweepSettings};

#[derive(Parser, Debug, Clone)]
#[command(name = "vna-link", about = "Talk to a VNA over its framed serial link")]
pub struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Print every packet the device sends
    Monitor(MonitorOpts),
    /// Wait for a device info packet and print it
    Info(InfoOpts),
    /// Configure a sweep and print the measured points as CSV
    Sweep(SweepOpts),
    /// Configure the 10 MHz reference input/output
    Reference(ReferenceOpts),
    /// Drive the RF hardware directly and print status readings
    Manual(ManualOpts),
    /// Flash a firmware image
    Firmware(FirmwareOpts),
    /// Decode a captured byte stream offline
    Dump(DumpOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyACM0")]
    pub dev: String,
    /// Baud rate (ignored by USB CDC devices)
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
    /// Read timeout of a single port read in milliseconds
    #[arg(long, default_value_t = 100)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct LinkOpts {
    /// Consecutive corrupt frames before the link is reported lost (0 = never)
    #[arg(long, default_value_t = vna_link::link::DEFAULT_MAX_CRC_FAILURES)]
    pub max_crc_failures: u32,
    /// How long to wait for ACK/NACK in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub ack_timeout_ms: u64,
}

impl LinkOpts {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MonitorOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// Stats print interval in seconds
    #[arg(long, default_value_t = 1.0)]
    pub stats: f64,
}

#[derive(Args, Debug, Clone)]
pub struct InfoOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// How long to wait for the device to report, in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub wait_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SweepOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// Start frequency (Hz, k/M/G suffix allowed)
    #[arg(long, default_value = "1M", value_parser = parse_frequency)]
    pub start: u64,
    /// Stop frequency (Hz, k/M/G suffix allowed)
    #[arg(long, default_value = "6G", value_parser = parse_frequency)]
    pub stop: u64,
    /// Number of points
    #[arg(long, default_value_t = 201)]
    pub points: u16,
    /// IF bandwidth (Hz, k/M/G suffix allowed)
    #[arg(long, default_value = "1k", value_parser = parse_frequency)]
    pub ifbw: u64,
    /// Excitation power in dBm
    #[arg(long, default_value_t = -10.0, allow_negative_numbers = true)]
    pub power: f64,
    /// Sweeps to print before exiting (0 = run until interrupted)
    #[arg(long, default_value_t = 1)]
    pub count: u32,
}

impl SweepOpts {
    pub fn settings(&self) -> anyhow::Result<SweepSettings> {
        if self.points == 0 {
            bail!("a sweep needs at least one point");
        }
        if self.stop < self.start {
            bail!("stop frequency below start frequency");
        }
        Ok(SweepSettings {
            f_start: self.start,
            f_stop: self.stop,
            points: self.points,
            if_bandwidth: u32::try_from(self.ifbw).map_err(|_| anyhow!("ifbw out of range"))?,
            cdbm_excitation: cdbm_from_dbm(self.power)?,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ReferenceOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// Reference output frequency, 0 turns the output off
    #[arg(long, default_value = "0", value_parser = parse_frequency)]
    pub out_freq: u64,
    /// Switch to an external reference automatically when one is detected
    #[arg(long, default_value_t = false)]
    pub auto: bool,
    /// Force the external reference input
    #[arg(long, default_value_t = false)]
    pub external: bool,
}

impl ReferenceOpts {
    pub fn settings(&self) -> anyhow::Result<ReferenceSettings> {
        Ok(ReferenceSettings {
            ext_ref_output_freq: u32::try_from(self.out_freq)
                .map_err(|_| anyhow!("reference output frequency out of range"))?,
            automatic_switch: self.auto,
            use_external_ref: self.external,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ManualOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// Source frequency; above 25 MHz the highband synthesizer is used
    #[arg(long, default_value = "1G", value_parser = parse_frequency)]
    pub source: u64,
    /// Source power setting (0..3)
    #[arg(long, default_value_t = 3)]
    pub power: u8,
    /// Highband lowpass filter selection (0..3)
    #[arg(long, default_value_t = 0)]
    pub lowpass: u8,
    /// LO1 frequency
    #[arg(long, default_value = "1060.1M", value_parser = parse_frequency)]
    pub lo1: u64,
    /// LO2 frequency
    #[arg(long, default_value = "59.85M", value_parser = parse_frequency)]
    pub lo2: u64,
    /// Attenuator steps (0..127, 0.25 dB each)
    #[arg(long, default_value_t = 0)]
    pub attenuator: u8,
    /// Enable the source amplifier
    #[arg(long, default_value_t = false)]
    pub amplifier: bool,
    /// Route the source to port 2 instead of port 1
    #[arg(long, default_value_t = false)]
    pub port2: bool,
    /// Samples per reading
    #[arg(long, default_value_t = 131_072)]
    pub samples: u32,
    /// Status readings to print before exiting
    #[arg(long, default_value_t = 10)]
    pub reads: u32,
}

/// Below this the lowband source drives the output.
pub const BAND_SWITCH_FREQUENCY: u64 = 25_000_000;

impl ManualOpts {
    pub fn control(&self) -> anyhow::Result<ManualControl> {
        if self.power > 3 || self.lowpass > 3 {
            bail!("power and lowpass settings are 0..3");
        }
        if self.attenuator > ATTENUATOR_MAX {
            bail!("attenuator is 0..{ATTENUATOR_MAX}");
        }
        let highband = self.source >= BAND_SWITCH_FREQUENCY;
        Ok(ManualControl {
            source_high_ce: highband,
            source_high_rfen: highband,
            source_high_power: self.power,
            source_high_lowpass: self.lowpass,
            source_high_frequency: if highband { self.source } else { 0 },
            source_low_en: !highband,
            source_low_power: self.power,
            source_low_frequency: if highband {
                0
            } else {
                // below the band switch, always fits
                self.source as u32
            },
            attenuator: self.attenuator,
            source_highband: highband,
            amplifier_en: self.amplifier,
            port_switch: self.port2,
            lo1_ce: true,
            lo1_rfen: true,
            lo1_frequency: self.lo1,
            lo2_en: true,
            lo2_frequency: u32::try_from(self.lo2).map_err(|_| anyhow!("LO2 out of range"))?,
            port1_en: true,
            port2_en: true,
            ref_en: true,
            samples: self.samples,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct FirmwareOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// Raw firmware image
    #[arg(long)]
    pub file: PathBuf,
    /// How long the flash erase may take, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub erase_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct DumpOpts {
    /// File holding raw bytes captured from the link
    #[arg(long)]
    pub file: PathBuf,
}

/// Parses "1500000", "1.5M", "2G", "10k" into Hz.
pub fn parse_frequency(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let (num, mult) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1e3),
        Some('M') => (&s[..s.len() - 1], 1e6),
        Some('G' | 'g') => (&s[..s.len() - 1], 1e9),
        _ => (s, 1.0),
    };
    let value: f64 = num
        .parse()
        .map_err(|_| anyhow!("frequency must be a number with optional k/M/G suffix"))?;
    let hz = (value * mult).round();
    if !hz.is_finite() || hz < 0.0 || hz > u64::MAX as f64 {
        bail!("frequency out of range");
    }
    Ok(hz as u64)
}

/// dBm to the wire's 1/100 dBm.
pub fn cdbm_from_dbm(dbm: f64) -> anyhow::Result<i16> {
    let cdbm = (dbm * 100.0).round();
    if !cdbm.is_finite() || cdbm < i16::MIN as f64 || cdbm > i16::MAX as f64 {
        bail!("power {dbm} dBm out of range");
    }
    Ok(cdbm as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies() {
        assert_eq!(parse_frequency("1500000").unwrap(), 1_500_000);
        assert_eq!(parse_frequency("1.5M").unwrap(), 1_500_000);
        assert_eq!(parse_frequency("6G").unwrap(), 6_000_000_000);
        assert_eq!(parse_frequency("10k").unwrap(), 10_000);
        assert_eq!(parse_frequency("1060.1M").unwrap(), 1_060_100_000);
        assert!(parse_frequency("fast").is_err());
        assert!(parse_frequency("-1M").is_err());
    }

    #[test]
    fn power() {
        assert_eq!(cdbm_from_dbm(-10.0).unwrap(), -1000);
        assert_eq!(cdbm_from_dbm(0.125).unwrap(), 13);
        assert!(cdbm_from_dbm(400.0).is_err());
    }

    #[test]
    fn sweep_args() {
        let cli = Cli::parse_from([
            "vna-link", "sweep", "--start", "1M", "--stop", "6G", "--points", "201", "--ifbw",
            "1k", "--power", "-10",
        ]);
        let Cmd::Sweep(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };
        assert_eq!(
            opts.settings().unwrap(),
            SweepSettings {
                f_start: 1_000_000,
                f_stop: 6_000_000_000,
                points: 201,
                if_bandwidth: 1000,
                cdbm_excitation: -1000,
            }
        );
    }

    #[test]
    fn manual_band_selection() {
        let cli = Cli::parse_from(["vna-link", "manual", "--source", "10M"]);
        let Cmd::Manual(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };
        let c = opts.control().unwrap();
        assert!(c.source_low_en);
        assert!(!c.source_highband);
        assert_eq!(c.source_low_frequency, 10_000_000);
        assert_eq!(c.lo2_frequency, 59_850_000);

        let cli = Cli::parse_from(["vna-link", "manual", "--attenuator", "200"]);
        let Cmd::Manual(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };
        assert!(opts.control().is_err());
    }
}
