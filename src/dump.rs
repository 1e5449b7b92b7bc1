use anyhow::{Context, Result};
use log::{info, warn};

use vna_link::link::DEFAULT_MAX_CRC_FAILURES;
use vna_link::protocol::Packet;
use vna_link::{LinkError, Receiver};

use crate::cli::DumpOpts;
use crate::rx::describe;

pub fn run(opts: DumpOpts) -> Result<()> {
    let bytes =
        std::fs::read(&opts.file).with_context(|| format!("reading {}", opts.file.display()))?;
    let rx = decode_capture(&bytes, |packet| println!("{}", describe(packet)))?;
    if rx.buffered() > 0 {
        warn!("{} trailing bytes form an incomplete frame", rx.buffered());
    }
    info!("{}", rx.stats().summary());
    Ok(())
}

/// Feeds a whole capture through a receiver, handing every packet to `out`.
/// Runs of corrupt frames are logged and decoding carries on.
fn decode_capture(bytes: &[u8], mut out: impl FnMut(&Packet)) -> Result<Receiver> {
    let mut rx = Receiver::new(DEFAULT_MAX_CRC_FAILURES);
    rx.extend(bytes);

    loop {
        match rx.next_packet() {
            Ok(Some(packet)) => out(&packet),
            Ok(None) => break,
            Err(LinkError::Desync(n)) => warn!("{n} corrupt frames in a row"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(rx)
}
