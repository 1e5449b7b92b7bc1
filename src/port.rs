use anyhow::Result;
use log::info;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::time::Duration;

use vna_link::{Device, Receiver};

use crate::cli::{LinkOpts, SerialOpts};

pub fn open_port(opts: &SerialOpts) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(&opts.dev, opts.baud)
        .timeout(Duration::from_millis(opts.timeout_ms))
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if opts.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        });

    builder
        .open()
        .map_err(|e| anyhow::anyhow!("open {}: {}", opts.dev, e))
}

pub fn open_device(ser: &SerialOpts, link: &LinkOpts) -> Result<Device<Box<dyn SerialPort>>> {
    let port = open_port(ser)?;
    info!("connected to {} at {} baud", ser.dev, ser.baud);
    Ok(Device::new(port)
        .with_receiver(Receiver::new(link.max_crc_failures))
        .with_timeouts(link.ack_timeout(), vna_link::device::DEFAULT_ERASE_TIMEOUT))
}
