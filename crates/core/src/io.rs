//! Port I/O boundary between the CPU core and the devices of a machine.
//!
//! The core never talks to the host directly. `IN`/`OUT` instructions go
//! through a [`PortIo`] implementation supplied by the system that owns the
//! CPU; reading from a port may block until the device has a byte ready.

use crate::logging::{log, LogCategory, LogLevel};

/// Conventional I/O base of the first serial port (COM1)
pub const COM1_PORT: u16 = 0x03F8;

/// Byte-wide port I/O
pub trait PortIo {
    /// Read a byte from `port`
    fn port_in8(&mut self, port: u16) -> u8;

    /// Write a byte to `port`
    fn port_out8(&mut self, port: u16, value: u8);
}

/// Ports with nothing attached: reads return 0 and writes are dropped
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPorts;

impl PortIo for NullPorts {
    fn port_in8(&mut self, port: u16) -> u8 {
        log(LogCategory::IO, LogLevel::Trace, || {
            format!("IO: read from unconnected port {:04X}", port)
        });
        0
    }

    fn port_out8(&mut self, port: u16, value: u8) {
        log(LogCategory::IO, LogLevel::Trace, || {
            format!(
                "IO: write {:02X} to unconnected port {:04X} dropped",
                value, port
            )
        });
    }
}

impl<P: PortIo + ?Sized> PortIo for &mut P {
    fn port_in8(&mut self, port: u16) -> u8 {
        (**self).port_in8(port)
    }

    fn port_out8(&mut self, port: u16, value: u8) {
        (**self).port_out8(port, value)
    }
}
