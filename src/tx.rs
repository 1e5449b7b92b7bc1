use anyhow::{Context, Result};
use log::info;
use std::time::Duration;

use vna_link::protocol::Packet;

use crate::cli::{ManualOpts, ReferenceOpts, SweepOpts};
use crate::port::open_device;
use crate::rx::describe;

const DATA_TIMEOUT: Duration = Duration::from_secs(5);

pub fn sweep(opts: SweepOpts) -> Result<()> {
    let settings = opts.settings()?;
    let mut dev = open_device(&opts.ser, &opts.link)?;
    dev.configure_sweep(settings).context("configure sweep")?;

    if opts.count == 0 {
        info!("streaming until interrupted");
    }
    println!("sweep,point,frequency,s11_re,s11_im,s21_re,s21_im,s12_re,s12_im,s22_re,s22_im");
    let mut tracker = SweepTracker::new(settings.points);
    while opts.count == 0 || tracker.completed() < opts.count {
        let d = dev
            .wait_for(DATA_TIMEOUT, |p| match p {
                Packet::Datapoint(d) => Some(*d),
                _ => None,
            })
            .context("waiting for datapoints")?;
        let sweep = tracker.place(d.point);
        if opts.count != 0 && sweep >= opts.count {
            break;
        }
        println!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            sweep,
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
        );
    }
    info!("{}", dev.receiver().stats().summary());
    Ok(())
}

/// Splits the datapoint stream into sweeps.
///
/// A sweep ends at its last configured point, or when the point index
/// falls back, which covers a device that clamps the point count.
struct SweepTracker {
    points: u16,
    last: Option<u16>,
    sweep: u32,
}

impl SweepTracker {
    fn new(points: u16) -> Self {
        Self {
            points,
            last: None,
            sweep: 0,
        }
    }

    /// Index of the sweep `point` belongs to.
    fn place(&mut self, point: u16) -> u32 {
        if let Some(last) = self.last
            && point <= last
        {
            self.sweep += 1;
        }
        let current = self.sweep;
        if u32::from(point) + 1 >= u32::from(self.points) {
            self.sweep += 1;
            self.last = None;
        } else {
            self.last = Some(point);
        }
        current
    }

    fn completed(&self) -> u32 {
        self.sweep
    }
}

pub fn reference(opts: ReferenceOpts) -> Result<()> {
    let settings = opts.settings()?;
    let mut dev = open_device(&opts.ser, &opts.link)?;
    dev.set_reference(settings).context("configure reference")?;
    info!("reference configured");
    Ok(())
}

pub fn manual(opts: ManualOpts) -> Result<()> {
    let control = opts.control()?;
    let mut dev = open_device(&opts.ser, &opts.link)?;
    dev.set_manual(control).context("manual control")?;

    for _ in 0..opts.reads {
        let status = dev
            .wait_for(DATA_TIMEOUT, |p| match p {
                Packet::Status(s) => Some(Packet::Status(*s)),
                _ => None,
            })
            .context("waiting for status")?;
        println!("{}", describe(&status));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_complete_sweeps() {
        let mut t = SweepTracker::new(3);
        let idx: Vec<u32> = [0, 1, 2, 0, 1, 2].iter().map(|&p| t.place(p)).collect();
        assert_eq!(idx, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(t.completed(), 2);
    }

    #[test]
    fn highest_point_index_does_not_overflow() {
        let mut t = SweepTracker::new(201);
        assert_eq!(t.place(u16::MAX), 0);
        assert_eq!(t.completed(), 1);

        let mut t = SweepTracker::new(u16::MAX);
        assert_eq!(t.place(u16::MAX - 1), 0);
        assert_eq!(t.completed(), 1);
    }

    #[test]
    fn clamped_sweep_ends_when_index_wraps() {
        let mut t = SweepTracker::new(60_000);
        for p in 0..4501 {
            assert_eq!(t.place(p), 0);
        }
        assert_eq!(t.completed(), 0);
        assert_eq!(t.place(0), 1);
        assert_eq!(t.completed(), 1);
        assert_eq!(t.place(1), 1);
    }

    #[test]
    fn single_point_sweeps() {
        let mut t = SweepTracker::new(1);
        assert_eq!(t.place(0), 0);
        assert_eq!(t.place(0), 1);
        assert_eq!(t.completed(), 2);
    }
}
