use super::bits::{CodecError, Decoder, Encoder, WireValue};

/// Bytes of image data carried by one [`FirmwarePacket`].
pub const FIRMWARE_CHUNK_SIZE: usize = 256;

/// Encode/decode pair for one payload shape. Field order and bit widths are
/// the wire contract and must match the firmware exactly.
pub trait Payload: Sized {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError>;
    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError>;

    /// Writes the payload into `buf` and returns its size in bytes.
    fn encode_into(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut e = Encoder::new(buf);
        self.encode(&mut e)?;
        Ok(e.size())
    }

    fn decode_from(buf: &[u8]) -> Result<Self, CodecError> {
        Self::decode(&mut Decoder::new(buf))
    }
}

/// One swept frequency point, both excitation directions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Datapoint {
    pub real_s11: f32,
    pub imag_s11: f32,
    pub real_s21: f32,
    pub imag_s21: f32,
    pub real_s12: f32,
    pub imag_s12: f32,
    pub real_s22: f32,
    pub imag_s22: f32,
    pub frequency: u64,
    pub point: u16,
}

impl Payload for Datapoint {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.add_value(self.real_s11)?;
        e.add_value(self.imag_s11)?;
        e.add_value(self.real_s21)?;
        e.add_value(self.imag_s21)?;
        e.add_value(self.real_s12)?;
        e.add_value(self.imag_s12)?;
        e.add_value(self.real_s22)?;
        e.add_value(self.imag_s22)?;
        e.add_value(self.frequency)?;
        e.add_value(self.point)
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            real_s11: d.get_value()?,
            imag_s11: d.get_value()?,
            real_s21: d.get_value()?,
            imag_s21: d.get_value()?,
            real_s12: d.get_value()?,
            imag_s12: d.get_value()?,
            real_s22: d.get_value()?,
            imag_s22: d.get_value()?,
            frequency: d.get_value()?,
            point: d.get_value()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepSettings {
    pub f_start: u64,
    pub f_stop: u64,
    pub points: u16,
    pub if_bandwidth: u32,
    /// Excitation power in 1/100 dBm.
    pub cdbm_excitation: i16,
}

impl SweepSettings {
    /// Frequency of point `index`, linearly spaced between start and stop.
    pub fn point_frequency(&self, index: u16) -> u64 {
        if self.points <= 1 {
            return self.f_start;
        }
        let span = self.f_stop as i128 - self.f_start as i128;
        let offset = span * index as i128 / (self.points as i128 - 1);
        (self.f_start as i128 + offset) as u64
    }

    pub fn excitation_dbm(&self) -> f64 {
        self.cdbm_excitation as f64 / 100.0
    }
}

impl Payload for SweepSettings {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.add_value(self.f_start)?;
        e.add_value(self.f_stop)?;
        e.add_value(self.points)?;
        e.add_value(self.if_bandwidth)?;
        e.add_value(self.cdbm_excitation)
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            f_start: d.get_value()?,
            f_stop: d.get_value()?,
            points: d.get_value()?,
            if_bandwidth: d.get_value()?,
            cdbm_excitation: d.get_value()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceSettings {
    /// Frequency driven on the reference output, 0 disables it.
    pub ext_ref_output_freq: u32,
    pub automatic_switch: bool,
    pub use_external_ref: bool,
}

impl Payload for ReferenceSettings {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.add_value(self.ext_ref_output_freq)?;
        e.add_flag(self.automatic_switch)?;
        e.add_flag(self.use_external_ref)
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            ext_ref_output_freq: d.get_value()?,
            automatic_switch: d.get_flag()?,
            use_external_ref: d.get_flag()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Temperatures {
    pub source: u8,
    pub lo1: u8,
    pub mcu: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub fw_major: u16,
    pub fw_minor: u16,
    /// ASCII revision letter.
    pub hw_revision: u8,
    pub ext_ref_available: bool,
    pub ext_ref_in_use: bool,
    pub fpga_configured: bool,
    pub source_locked: bool,
    pub lo1_locked: bool,
    pub adc_overload: bool,
    pub temperatures: Temperatures,
}

impl Payload for DeviceInfo {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.add_value(self.fw_major)?;
        e.add_value(self.fw_minor)?;
        e.add_value(self.hw_revision)?;
        e.add_flag(self.ext_ref_available)?;
        e.add_flag(self.ext_ref_in_use)?;
        e.add_flag(self.fpga_configured)?;
        e.add_flag(self.source_locked)?;
        e.add_flag(self.lo1_locked)?;
        e.add_flag(self.adc_overload)?;
        e.add_value(self.temperatures.source)?;
        e.add_value(self.temperatures.lo1)?;
        e.add_value(self.temperatures.mcu)
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            fw_major: d.get_value()?,
            fw_minor: d.get_value()?,
            hw_revision: d.get_value()?,
            ext_ref_available: d.get_flag()?,
            ext_ref_in_use: d.get_flag()?,
            fpga_configured: d.get_flag()?,
            source_locked: d.get_flag()?,
            lo1_locked: d.get_flag()?,
            adc_overload: d.get_flag()?,
            temperatures: Temperatures {
                source: d.get_value()?,
                lo1: d.get_value()?,
                mcu: d.get_value()?,
            },
        })
    }
}

/// Raw sampler readings reported in manual mode.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualStatus {
    pub port1min: i16,
    pub port1max: i16,
    pub port2min: i16,
    pub port2max: i16,
    pub refmin: i16,
    pub refmax: i16,
    pub port1real: f32,
    pub port1imag: f32,
    pub port2real: f32,
    pub port2imag: f32,
    pub refreal: f32,
    pub refimag: f32,
    pub temp_source: u8,
    pub temp_lo: u8,
    pub source_locked: bool,
    pub lo_locked: bool,
}

impl Payload for ManualStatus {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.add_value(self.port1min)?;
        e.add_value(self.port1max)?;
        e.add_value(self.port2min)?;
        e.add_value(self.port2max)?;
        e.add_value(self.refmin)?;
        e.add_value(self.refmax)?;
        e.add_value(self.port1real)?;
        e.add_value(self.port1imag)?;
        e.add_value(self.port2real)?;
        e.add_value(self.port2imag)?;
        e.add_value(self.refreal)?;
        e.add_value(self.refimag)?;
        e.add_value(self.temp_source)?;
        e.add_value(self.temp_lo)?;
        e.add_flag(self.source_locked)?;
        e.add_flag(self.lo_locked)
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            port1min: d.get_value()?,
            port1max: d.get_value()?,
            port2min: d.get_value()?,
            port2max: d.get_value()?,
            refmin: d.get_value()?,
            refmax: d.get_value()?,
            port1real: d.get_value()?,
            port1imag: d.get_value()?,
            port2real: d.get_value()?,
            port2imag: d.get_value()?,
            refreal: d.get_value()?,
            refimag: d.get_value()?,
            temp_source: d.get_value()?,
            temp_lo: d.get_value()?,
            source_locked: d.get_flag()?,
            lo_locked: d.get_flag()?,
        })
    }
}

pub const SOURCE_POWER_BITS: u8 = 2;
pub const LOWPASS_BITS: u8 = 2;
pub const ATTENUATOR_BITS: u8 = 7;
pub const ATTENUATOR_MAX: u8 = (1 << ATTENUATOR_BITS) - 1;

/// Direct hardware state for manual mode. Multi-bit fields only keep their
/// low `*_BITS` bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManualControl {
    // highband source
    pub source_high_ce: bool,
    pub source_high_rfen: bool,
    pub source_high_power: u8,
    pub source_high_lowpass: u8,
    pub source_high_frequency: u64,
    // lowband source
    pub source_low_en: bool,
    pub source_low_power: u8,
    pub source_low_frequency: u32,
    // source signal path
    pub attenuator: u8,
    pub source_highband: bool,
    pub amplifier_en: bool,
    pub port_switch: bool,
    pub lo1_ce: bool,
    pub lo1_rfen: bool,
    pub lo1_frequency: u64,
    pub lo2_en: bool,
    pub lo2_frequency: u32,
    // acquisition
    pub port1_en: bool,
    pub port2_en: bool,
    pub ref_en: bool,
    pub samples: u32,
}

impl Payload for ManualControl {
    fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.add_flag(self.source_high_ce)?;
        e.add_flag(self.source_high_rfen)?;
        e.add_bits(self.source_high_power, SOURCE_POWER_BITS)?;
        e.add_bits(self.source_high_lowpass, LOWPASS_BITS)?;
        e.add_value(self.source_high_frequency)?;
        e.add_flag(self.source_low_en)?;
        e.add_bits(self.source_low_power, SOURCE_POWER_BITS)?;
        e.add_value(self.source_low_frequency)?;
        e.add_bits(self.attenuator, ATTENUATOR_BITS)?;
        e.add_flag(self.source_highband)?;
        e.add_flag(self.amplifier_en)?;
        e.add_flag(self.port_switch)?;
        e.add_flag(self.lo1_ce)?;
        e.add_flag(self.lo1_rfen)?;
        e.add_value(self.lo1_frequency)?;
        e.add_flag(self.lo2_en)?;
        e.add_value(self.lo2_frequency)?;
        e.add_flag(self.port1_en)?;
        e.add_flag(self.port2_en)?;
        e.add_flag(self.ref_en)?;
        e.add_value(self.samples)
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            source_high_ce: d.get_flag()?,
            source_high_rfen: d.get_flag()?,
            source_high_power: d.get_bits(SOURCE_POWER_BITS)?,
            source_high_lowpass: d.get_bits(LOWPASS_BITS)?,
            source_high_frequency: d.get_value()?,
            source_low_en: d.get_flag()?,
            source_low_power: d.get_bits(SOURCE_POWER_BITS)?,
            source_low_frequency: d.get_value()?,
            attenuator: d.get_bits(ATTENUATOR_BITS)?,
            source_highband: d.get_flag()?,
            amplifier_en: d.get_flag()?,
            port_switch: d.get_flag()?,
            lo1_ce: d.get_flag()?,
            lo1_rfen: d.get_flag()?,
            lo1_frequency: d.get_value()?,
            lo2_en: d.get_flag()?,
            lo2_frequency: d.get_value()?,
            port1_en: d.get_flag()?,
            port2_en: d.get_flag()?,
            ref_en: d.get_flag()?,
            samples: d.get_value()?,
        })
    }
}

/// One chunk of a firmware image, written to flash at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwarePacket {
    pub address: u32,
    pub data: [u8; FIRMWARE_CHUNK_SIZE],
}

impl Default for FirmwarePacket {
    fn default() -> Self {
        Self {
            address: 0,
            data: [0; FIRMWARE_CHUNK_SIZE],
        }
    }
}

impl FirmwarePacket {
    pub const WIRE_SIZE: usize = 4 + FIRMWARE_CHUNK_SIZE;

    // Plain copy, no bit cursor: this is the bulk path.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(CodecError::Overflow {
                needed: Self::WIRE_SIZE,
                remaining: buf.len(),
            });
        }
        self.address.write_ne(&mut buf[..4]);
        buf[4..Self::WIRE_SIZE].copy_from_slice(&self.data);
        Ok(Self::WIRE_SIZE)
    }

    pub fn decode_from(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(CodecError::Truncated {
                needed: Self::WIRE_SIZE,
                remaining: buf.len(),
            });
        }
        let mut data = [0u8; FIRMWARE_CHUNK_SIZE];
        data.copy_from_slice(&buf[4..Self::WIRE_SIZE]);
        Ok(Self {
            address: u32::read_ne(&buf[..4]),
            data,
        })
    }
}
