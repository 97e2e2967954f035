//! Serial console on COM1
//!
//! A byte written to the data port goes straight to the host writer, and a
//! read blocks until the host reader has a byte. There are no line status or
//! interrupt registers: programs just `IN`/`OUT` on 0x3F8.

use px86_core::io::{PortIo, COM1_PORT};
use px86_core::logging::{log, LogCategory, LogLevel};
use std::io::{self, ErrorKind, Read, Stdin, Stdout, Write};

/// Serial console wired to the process's stdin and stdout
pub type StdioConsole = SerialConsole<Stdin, Stdout>;

/// Port I/O with a byte stream behind the COM1 data port
pub struct SerialConsole<R, W> {
    reader: R,
    writer: W,
    port: u16,
}

impl StdioConsole {
    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

impl<R: Read, W: Write> SerialConsole<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            port: COM1_PORT,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Next input byte; end of input reads as 0
    fn receive(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return 0,
                Ok(_) => return byte[0],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log(LogCategory::IO, LogLevel::Error, || {
                        format!("Serial: read failed: {}", e)
                    });
                    return 0;
                }
            }
        }
    }

    fn transmit(&mut self, value: u8) {
        if let Err(e) = self
            .writer
            .write_all(&[value])
            .and_then(|_| self.writer.flush())
        {
            log(LogCategory::IO, LogLevel::Error, || {
                format!("Serial: write failed: {}", e)
            });
        }
    }
}

impl<R: Read, W: Write> PortIo for SerialConsole<R, W> {
    fn port_in8(&mut self, port: u16) -> u8 {
        if port != self.port {
            log(LogCategory::IO, LogLevel::Debug, || {
                format!("IO: read from unmapped port {:04X}", port)
            });
            return 0;
        }

        let value = self.receive();
        log(LogCategory::IO, LogLevel::Trace, || {
            format!("Serial: IN {:04X} -> {:02X}", port, value)
        });
        value
    }

    fn port_out8(&mut self, port: u16, value: u8) {
        if port != self.port {
            log(LogCategory::IO, LogLevel::Debug, || {
                format!("IO: write {:02X} to unmapped port {:04X} ignored", value, port)
            });
            return;
        }

        log(LogCategory::IO, LogLevel::Trace, || {
            format!("Serial: OUT {:04X} <- {:02X}", port, value)
        });
        self.transmit(value);
    }
}
