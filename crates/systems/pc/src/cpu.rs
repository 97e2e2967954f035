//! PC CPU wrapper
//!
//! Owns the i386 core together with its opcode table and applies the boot
//! state from the machine configuration.

use crate::MachineConfig;
use px86_core::cpu_i386::{
    CpuError, CpuI386, Eflags, ExitReason, FlatMemory, OpcodeTable, REGISTER_COUNT,
    REGISTER_NAMES,
};
use px86_core::io::PortIo;
use std::fmt;

/// PC CPU wrapper
pub struct PcCpu {
    cpu: CpuI386,
    table: OpcodeTable,
}

impl PcCpu {
    /// Create a CPU with zeroed memory in the configured boot state
    pub fn new(config: &MachineConfig) -> Self {
        Self {
            cpu: CpuI386::new(config.memory_size, config.initial_eip, config.initial_esp),
            table: OpcodeTable::new(),
        }
    }

    /// Restore the boot state (memory is left alone)
    pub fn reset(&mut self, config: &MachineConfig) {
        self.cpu.reset(config.initial_eip, config.initial_esp);
    }

    /// Execute one instruction
    pub fn step(&mut self, ports: &mut dyn PortIo) -> Result<(), CpuError> {
        self.cpu.step(&self.table, ports)
    }

    /// Execute until the end of the program, EIP leaving memory, or a fault
    pub fn run(&mut self, ports: &mut dyn PortIo) -> Result<ExitReason, CpuError> {
        self.cpu.run(&self.table, ports)
    }

    pub fn memory(&self) -> &FlatMemory {
        &self.cpu.memory
    }

    pub fn memory_mut(&mut self) -> &mut FlatMemory {
        &mut self.cpu.memory
    }

    /// Get CPU register state for the dump and save states
    pub fn get_registers(&self) -> CpuRegisters {
        CpuRegisters {
            registers: self.cpu.registers,
            eip: self.cpu.eip,
            eflags: self.cpu.eflags.0,
        }
    }

    /// Set CPU register state (for loading save states)
    pub fn set_registers(&mut self, regs: &CpuRegisters) {
        self.cpu.registers = regs.registers;
        self.cpu.eip = regs.eip;
        self.cpu.eflags = Eflags(regs.eflags);
    }

    /// Non-zero stretches of guest memory
    pub fn memory_runs(&self) -> Vec<MemoryRun> {
        let mut runs: Vec<MemoryRun> = Vec::new();
        for (addr, &byte) in self.cpu.memory.as_slice().iter().enumerate() {
            if byte == 0 {
                continue;
            }
            match runs.last_mut() {
                Some(run) if run.address as usize + run.bytes.len() == addr => {
                    run.bytes.push(byte);
                }
                _ => runs.push(MemoryRun {
                    address: addr as u32,
                    bytes: vec![byte],
                }),
            }
        }
        runs
    }

    /// Replace guest memory with `runs`, zero elsewhere. On error memory is untouched.
    pub fn restore_memory(&mut self, runs: &[MemoryRun]) -> Result<(), CpuError> {
        let mut memory = FlatMemory::new(self.cpu.memory.len());
        for run in runs {
            memory.load(run.address, &run.bytes)?;
        }
        self.cpu.memory = memory;
        Ok(())
    }
}

/// Contiguous non-zero bytes of guest memory, as stored in save states
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryRun {
    pub address: u32,
    pub bytes: Vec<u8>,
}

/// CPU register state for the dump and save/load
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CpuRegisters {
    /// EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI
    pub registers: [u32; REGISTER_COUNT],
    pub eip: u32,
    pub eflags: u32,
}

/// One `NAME = xxxxxxxx` line per general purpose register, then EIP
impl fmt::Display for CpuRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in REGISTER_NAMES.iter().zip(self.registers.iter()) {
            writeln!(f, "{} = {:08x}", name, value)?;
        }
        write!(f, "EIP = {:08x}", self.eip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use px86_core::cpu_i386::{EAX, ESP};
    use px86_core::io::NullPorts;

    #[test]
    fn test_cpu_initialization() {
        let cpu = PcCpu::new(&MachineConfig::default());
        let regs = cpu.get_registers();

        assert_eq!(regs.eip, 0x7C00);
        assert_eq!(regs.registers[ESP], 0x7C00);
        assert_eq!(regs.eflags, 0);
        assert_eq!(cpu.memory().len(), 1024 * 1024);
    }

    #[test]
    fn test_register_save_load() {
        let config = MachineConfig::default();
        let mut cpu = PcCpu::new(&config);
        cpu.memory_mut()
            .load(0x7C00, &[0xB8, 0x2A, 0x00, 0x00, 0x00])
            .unwrap();
        cpu.step(&mut NullPorts).unwrap();

        let regs = cpu.get_registers();
        assert_eq!(regs.registers[EAX], 0x2A);
        assert_eq!(regs.eip, 0x7C05);

        cpu.reset(&config);
        assert_eq!(cpu.get_registers().registers[EAX], 0);

        cpu.set_registers(&regs);
        assert_eq!(cpu.get_registers(), regs);
    }

    #[test]
    fn test_memory_runs_skip_zero_bytes() {
        let mut cpu = PcCpu::new(&MachineConfig::default());
        cpu.memory_mut().load(0x10, &[1, 2, 0, 3]).unwrap();
        cpu.memory_mut().write8(0xFFFFF, 9).unwrap();

        assert_eq!(
            cpu.memory_runs(),
            vec![
                MemoryRun { address: 0x10, bytes: vec![1, 2] },
                MemoryRun { address: 0x13, bytes: vec![3] },
                MemoryRun { address: 0xFFFFF, bytes: vec![9] },
            ]
        );
    }

    #[test]
    fn test_restore_memory() {
        let mut cpu = PcCpu::new(&MachineConfig::default());
        cpu.memory_mut().write8(0x500, 0xEE).unwrap();

        let runs = vec![MemoryRun { address: 0x7C00, bytes: vec![0xB8, 0x2A] }];
        cpu.restore_memory(&runs).unwrap();
        assert_eq!(cpu.memory().read8(0x500).unwrap(), 0);
        assert_eq!(cpu.memory_runs(), runs);

        // A run past the end is rejected and leaves memory as it was
        let bad = vec![
            MemoryRun { address: 0x10, bytes: vec![1] },
            MemoryRun { address: 0xFFFFF, bytes: vec![1, 2] },
        ];
        assert!(matches!(
            cpu.restore_memory(&bad),
            Err(CpuError::OutOfBounds { .. })
        ));
        assert_eq!(cpu.memory_runs(), runs);
    }

    #[test]
    fn test_register_dump_format() {
        let regs = CpuRegisters {
            registers: [0x2A, 0, 0, 0, 0x7C00, 0, 0, 0xFFFF_FFFF],
            eip: 0,
            eflags: 0,
        };
        let dump = regs.to_string();
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(
            lines,
            vec![
                "EAX = 0000002a",
                "ECX = 00000000",
                "EDX = 00000000",
                "EBX = 00000000",
                "ESP = 00007c00",
                "EBP = 00000000",
                "ESI = 00000000",
                "EDI = ffffffff",
                "EIP = 00000000",
            ]
        );
    }
}
