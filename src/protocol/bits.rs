use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("bit field width {0} out of range (0..=7)")]
    BitWidth(u8),
    #[error("buffer overflow: need {needed} bytes, {remaining} left")]
    Overflow { needed: usize, remaining: usize },
    #[error("payload truncated: need {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
}

/// Fixed-width value copied verbatim in the host's native byte order.
pub trait WireValue: Sized + Copy {
    const WIDTH: usize;
    fn write_ne(self, out: &mut [u8]);
    fn read_ne(src: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($t:ty),* $(,)?) => {$(
        impl WireValue for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();
            fn write_ne(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_ne_bytes());
            }
            fn read_ne(src: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&src[..Self::WIDTH]);
                <$t>::from_ne_bytes(raw)
            }
        }
    )*};
}

impl_wire_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

fn low_mask(bits: u8) -> u8 {
    ((1u16 << bits) - 1) as u8
}

/// Appends values and sub-byte fields into a fixed-capacity buffer.
pub struct Encoder<'a> {
    buf: &'a mut [u8],
    used: usize,
    bitpos: u8,
}

impl<'a> Encoder<'a> {
    /// Zeroes `buf`; `add_bits` ORs into existing content.
    pub fn new(buf: &'a mut [u8]) -> Self {
        buf.fill(0);
        Self {
            buf,
            used: 0,
            bitpos: 0,
        }
    }

    pub fn add_value<T: WireValue>(&mut self, value: T) -> Result<(), CodecError> {
        let start = if self.bitpos != 0 {
            self.used + 1
        } else {
            self.used
        };
        let remaining = self.buf.len().saturating_sub(start);
        if remaining < T::WIDTH {
            return Err(CodecError::Overflow {
                needed: T::WIDTH,
                remaining,
            });
        }
        value.write_ne(&mut self.buf[start..]);
        self.bitpos = 0;
        self.used = start + T::WIDTH;
        Ok(())
    }

    /// Packs the low `bits` bits of `value`, LSB first, spilling into the
    /// next byte when the current one is full.
    pub fn add_bits(&mut self, value: u8, bits: u8) -> Result<(), CodecError> {
        if bits >= 8 {
            return Err(CodecError::BitWidth(bits));
        }
        if self.used >= self.buf.len() {
            return Err(CodecError::Overflow {
                needed: 1,
                remaining: 0,
            });
        }
        let value = value & low_mask(bits);
        let end = self.bitpos + bits;
        if end > 8 && self.used + 1 >= self.buf.len() {
            return Err(CodecError::Overflow {
                needed: 2,
                remaining: self.buf.len() - self.used,
            });
        }

        self.buf[self.used] |= value << self.bitpos;
        if end > 8 {
            let spill = end - 8;
            self.used += 1;
            self.buf[self.used] = value >> (bits - spill);
            self.bitpos = spill;
        } else if end == 8 {
            self.bitpos = 0;
            self.used += 1;
        } else {
            self.bitpos = end;
        }
        Ok(())
    }

    pub fn add_flag(&mut self, flag: bool) -> Result<(), CodecError> {
        self.add_bits(flag as u8, 1)
    }

    /// Bytes written so far; a partially filled byte counts as used.
    pub fn size(&self) -> usize {
        if self.bitpos == 0 {
            self.used
        } else {
            self.used + 1
        }
    }
}

/// Reads values and bit fields back in the order an [`Encoder`] wrote them.
pub struct Decoder<'a> {
    buf: &'a [u8],
    used: usize,
    bitpos: u8,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            used: 0,
            bitpos: 0,
        }
    }

    pub fn get_value<T: WireValue>(&mut self) -> Result<T, CodecError> {
        let start = if self.bitpos != 0 {
            self.used + 1
        } else {
            self.used
        };
        let remaining = self.buf.len().saturating_sub(start);
        if remaining < T::WIDTH {
            return Err(CodecError::Truncated {
                needed: T::WIDTH,
                remaining,
            });
        }
        let value = T::read_ne(&self.buf[start..]);
        self.bitpos = 0;
        self.used = start + T::WIDTH;
        Ok(value)
    }

    pub fn get_bits(&mut self, bits: u8) -> Result<u8, CodecError> {
        if bits >= 8 {
            return Err(CodecError::BitWidth(bits));
        }
        let end = self.bitpos + bits;
        let needed = if end > 8 { 2 } else { 1 };
        let remaining = self.buf.len().saturating_sub(self.used);
        if remaining < needed {
            return Err(CodecError::Truncated { needed, remaining });
        }

        let mask = low_mask(bits);
        let mut value = (self.buf[self.used] >> self.bitpos) & mask;
        if end > 8 {
            let spill = end - 8;
            self.used += 1;
            value |= (self.buf[self.used] << (bits - spill)) & mask;
            self.bitpos = spill;
        } else if end == 8 {
            self.bitpos = 0;
            self.used += 1;
        } else {
            self.bitpos = end;
        }
        Ok(value)
    }

    pub fn get_flag(&mut self) -> Result<bool, CodecError> {
        Ok(self.get_bits(1)? != 0)
    }
}
