use anyhow::{Context, Result, bail};
use log::info;
use std::time::Duration;

use crate::cli::FirmwareOpts;
use crate::port::open_device;

pub fn run(opts: FirmwareOpts) -> Result<()> {
    let image = std::fs::read(&opts.file)
        .with_context(|| format!("reading {}", opts.file.display()))?;
    if image.is_empty() {
        bail!("{} is empty", opts.file.display());
    }

    let mut dev = open_device(&opts.ser, &opts.link)?.with_timeouts(
        opts.link.ack_timeout(),
        Duration::from_millis(opts.erase_timeout_ms),
    );

    let mut last_pct = 0;
    dev.update_firmware(&image, |sent, total| {
        let pct = sent * 100 / total;
        if pct >= last_pct + 10 || sent == total {
            info!("firmware {pct}% ({sent}/{total} bytes)");
            last_pct = pct;
        }
    })
    .context("firmware update")?;
    info!("update triggered, the device reboots into the new image");
    Ok(())
}
