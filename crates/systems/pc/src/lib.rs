//! Boot-sector PC
//!
//! A flat-memory machine around the i386 subset core. A raw binary image is
//! copied to the load address (0x7C00 by default) and executed from there
//! until it returns to address 0. The only device is a serial console on
//! COM1 (port 0x3F8).

mod config;
mod cpu;
mod serial;

use px86_core::{
    cpu_i386::{CpuError, ExitReason},
    logging::{log, LogCategory, LogLevel},
    MountPointInfo, System,
};
use serde::de::Error as _;
use serde_json::Value;
use std::io::{Read, Stdin, Stdout, Write};
use thiserror::Error;

pub use config::MachineConfig;
pub use cpu::{CpuRegisters, MemoryRun, PcCpu};
pub use serial::{SerialConsole, StdioConsole};

/// Mount point for the raw program image
pub const BINARY_MOUNT_POINT: &str = "Binary";

#[derive(Debug, Error)]
pub enum PcError {
    #[error(transparent)]
    Cpu(#[from] CpuError),
    #[error("No binary image loaded")]
    NoImage,
    #[error("Image of {len} bytes does not fit in memory (capacity {capacity} bytes)")]
    ImageTooLarge { len: usize, capacity: usize },
    #[error("Invalid mount point: {0}")]
    InvalidMountPoint(String),
}

/// PC system state
pub struct PcSystem<R = Stdin, W = Stdout> {
    config: MachineConfig,
    cpu: PcCpu,
    serial: SerialConsole<R, W>,
    /// Mounted image, kept so a reset can reload it
    image: Option<Vec<u8>>,
}

impl PcSystem<Stdin, Stdout> {
    /// Create a PC whose serial console is the process's stdin/stdout
    pub fn with_stdio(config: MachineConfig) -> Self {
        Self::new(config, SerialConsole::stdio())
    }
}

impl<R: Read, W: Write> PcSystem<R, W> {
    pub fn new(config: MachineConfig, serial: SerialConsole<R, W>) -> Self {
        let cpu = PcCpu::new(&config);
        Self {
            config,
            cpu,
            serial,
            image: None,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn cpu(&self) -> &PcCpu {
        &self.cpu
    }

    pub fn serial(&self) -> &SerialConsole<R, W> {
        &self.serial
    }

    /// Register snapshot for the dump
    pub fn registers(&self) -> CpuRegisters {
        self.cpu.get_registers()
    }

    /// Execute a single instruction of the mounted image
    pub fn step(&mut self) -> Result<(), PcError> {
        if self.image.is_none() {
            return Err(PcError::NoImage);
        }
        Ok(self.cpu.step(&mut self.serial)?)
    }

    /// Copy the image to the load address and restore the boot state
    fn load_image(&mut self, data: &[u8]) -> Result<(), PcError> {
        let capacity = self.config.image_capacity();
        if data.len() > capacity {
            return Err(PcError::ImageTooLarge {
                len: data.len(),
                capacity,
            });
        }

        self.image = Some(data.to_vec());
        self.reset();

        log(LogCategory::Bus, LogLevel::Info, || {
            format!(
                "PC: loaded {}-byte image at {:08X}",
                data.len(),
                self.config.load_address
            )
        });
        Ok(())
    }
}

impl<R: Read, W: Write> System for PcSystem<R, W> {
    type Error = PcError;

    fn reset(&mut self) {
        self.cpu.reset(&self.config);

        let memory = self.cpu.memory_mut();
        memory.clear();
        if let Some(image) = &self.image {
            // Image size was checked when it was mounted
            if let Err(e) = memory.load(self.config.load_address, image) {
                log(LogCategory::Bus, LogLevel::Error, || {
                    format!("PC: failed to reload image: {}", e)
                });
            }
        }
    }

    fn run(&mut self) -> Result<ExitReason, Self::Error> {
        if self.image.is_none() {
            return Err(PcError::NoImage);
        }
        Ok(self.cpu.run(&mut self.serial)?)
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "version": 1,
            "system": "pc",
            "config": self.config,
            "registers": self.cpu.get_registers(),
            "memory": self.cpu.memory_runs(),
        })
    }

    /// Restore registers and guest memory. Either part may be absent; nothing
    /// changes unless the whole state is valid.
    fn load_state(&mut self, state: &Value) -> Result<(), serde_json::Error> {
        let regs: Option<CpuRegisters> = match state.get("registers") {
            Some(regs) => Some(serde_json::from_value(regs.clone())?),
            None => None,
        };
        if let Some(memory) = state.get("memory") {
            let runs: Vec<MemoryRun> = serde_json::from_value(memory.clone())?;
            self.cpu
                .restore_memory(&runs)
                .map_err(serde_json::Error::custom)?;
        }
        if let Some(regs) = regs {
            self.cpu.set_registers(&regs);
        }
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![MountPointInfo {
            id: BINARY_MOUNT_POINT.to_string(),
            name: "Boot Image".to_string(),
            extensions: vec!["bin".to_string(), "img".to_string()],
            required: true,
        }]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        match mount_point_id {
            BINARY_MOUNT_POINT => self.load_image(data),
            _ => Err(PcError::InvalidMountPoint(mount_point_id.to_string())),
        }
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        match mount_point_id {
            BINARY_MOUNT_POINT => {
                self.image = None;
                self.reset();
                Ok(())
            }
            _ => Err(PcError::InvalidMountPoint(mount_point_id.to_string())),
        }
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        match mount_point_id {
            BINARY_MOUNT_POINT => self.image.is_some(),
            _ => false,
        }
    }
}
