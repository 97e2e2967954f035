//! 32-bit x86 interpreter core
//!
//! A teaching-grade subset of the i386 instruction set running in a flat
//! address space: no segmentation, paging, interrupts or 0F-prefixed
//! opcodes. The CPU owns its registers, EFLAGS, EIP and a [`FlatMemory`].
//! Instructions are dispatched through an [`OpcodeTable`] built once and
//! shared read-only, and port I/O goes through a [`PortIo`] supplied by the
//! machine.
//!
//! Execution ends normally when EIP becomes 0 after an instruction. Programs
//! loaded at 0x7C00 return to address 0 from their outermost `RET`, so 0 is
//! used as the end-of-program sentinel.

mod flags;
mod instructions;
mod memory;
mod modrm;

#[cfg(test)]
mod tests;

pub use flags::{Eflags, FLAG_CF, FLAG_OF, FLAG_SF, FLAG_ZF};
pub use instructions::{Group83, GroupFf, Handler, OpcodeTable};
pub use memory::{FlatMemory, BOOT_LOAD_ADDRESS, DEFAULT_MEMORY_SIZE};
pub use modrm::{Displacement, ModRm, Operand};

use crate::io::PortIo;
use crate::logging::{log, LogCategory, LogLevel};
use thiserror::Error;

/// Number of general purpose registers
pub const REGISTER_COUNT: usize = 8;

// General purpose register indices, in encoding order
pub const EAX: usize = 0;
pub const ECX: usize = 1;
pub const EDX: usize = 2;
pub const EBX: usize = 3;
pub const ESP: usize = 4;
pub const EBP: usize = 5;
pub const ESI: usize = 6;
pub const EDI: usize = 7;

/// Register names, indexed like [`CpuI386::registers`]
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] =
    ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI"];

// 8-bit register indices: 0-3 are the low bytes of EAX..EBX, 4-7 the high bytes
pub const AL: usize = 0;
pub const CL: usize = 1;
pub const DL: usize = 2;
pub const BL: usize = 3;
pub const AH: usize = 4;
pub const CH: usize = 5;
pub const DH: usize = 6;
pub const BH: usize = 7;

/// Fatal conditions raised while executing guest code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    /// No handler for the opcode, or for the sub-opcode of a group opcode
    #[error("Not Implemented: {} at EIP={eip:08X}", describe_opcode(.opcode, .sub_opcode))]
    UnimplementedOpcode {
        opcode: u8,
        sub_opcode: Option<u8>,
        eip: u32,
    },
    /// ModR/M form the decoder does not support (SIB addressing)
    #[error("Not Implemented: ModRM mod={mod_bits} rm={rm} at EIP={eip:08X}")]
    UnsupportedAddressingMode { mod_bits: u8, rm: u8, eip: u32 },
    /// Memory access past the end of guest memory
    #[error("Memory access out of bounds: {address:08X} (memory size {size:#X})")]
    OutOfBounds { address: u32, size: u32 },
}

fn describe_opcode(opcode: &u8, sub_opcode: &Option<u8>) -> String {
    match sub_opcode {
        Some(sub) => format!("{:02X} /{}", opcode, sub),
        None => format!("{:02X}", opcode),
    }
}

/// Why [`CpuI386::run`] stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExitReason {
    /// EIP became 0 after an instruction
    EndOfProgram,
    /// EIP left the memory buffer
    EipOutOfRange,
}

/// i386 subset CPU state and execution engine
#[derive(Debug, Clone)]
pub struct CpuI386 {
    /// General purpose registers, indexed by `EAX`..`EDI`
    pub registers: [u32; REGISTER_COUNT],
    pub eflags: Eflags,
    /// Address of the next byte to fetch
    pub eip: u32,
    pub memory: FlatMemory,

    /// EIP of the instruction being executed, for diagnostics
    instruction_start: u32,
}

impl CpuI386 {
    /// Create a CPU with `memory_size` bytes of zeroed memory
    pub fn new(memory_size: usize, eip: u32, esp: u32) -> Self {
        Self::with_memory(FlatMemory::new(memory_size), eip, esp)
    }

    /// Create a CPU around existing memory
    pub fn with_memory(memory: FlatMemory, eip: u32, esp: u32) -> Self {
        let mut registers = [0; REGISTER_COUNT];
        registers[ESP] = esp;
        Self {
            registers,
            eflags: Eflags::default(),
            eip,
            memory,
            instruction_start: eip,
        }
    }

    /// Reset registers, flags and EIP (memory is preserved)
    pub fn reset(&mut self, eip: u32, esp: u32) {
        self.registers = [0; REGISTER_COUNT];
        self.registers[ESP] = esp;
        self.eflags = Eflags::default();
        self.eip = eip;
        self.instruction_start = eip;
    }

    /// Byte at EIP + `offset`
    #[inline]
    pub fn read_code8(&self, offset: u32) -> Result<u8, CpuError> {
        self.memory.read8(self.eip.wrapping_add(offset))
    }

    /// Sign-extended byte at EIP + `offset`
    #[inline]
    pub fn read_signed_code8(&self, offset: u32) -> Result<i32, CpuError> {
        Ok(self.read_code8(offset)? as i8 as i32)
    }

    /// Little-endian dword at EIP + `offset`
    #[inline]
    pub fn read_code32(&self, offset: u32) -> Result<u32, CpuError> {
        self.memory.read32(self.eip.wrapping_add(offset))
    }

    #[inline]
    pub fn read_signed_code32(&self, offset: u32) -> Result<i32, CpuError> {
        Ok(self.read_code32(offset)? as i32)
    }

    #[inline]
    pub fn read_register32(&self, index: usize) -> u32 {
        debug_assert!(index < REGISTER_COUNT, "Invalid register index: {}", index);
        self.registers[index]
    }

    #[inline]
    pub fn write_register32(&mut self, index: usize, value: u32) {
        debug_assert!(index < REGISTER_COUNT, "Invalid register index: {}", index);
        self.registers[index] = value;
    }

    /// Read AL, CL, DL, BL (0-3) or AH, CH, DH, BH (4-7)
    #[inline]
    pub fn read_register8(&self, index: usize) -> u8 {
        debug_assert!(index < 8, "Invalid 8-bit register index: {}", index);
        if index < 4 {
            (self.registers[index] & 0xFF) as u8
        } else {
            ((self.registers[index - 4] >> 8) & 0xFF) as u8
        }
    }

    /// Write AL, CL, DL, BL (0-3) or AH, CH, DH, BH (4-7)
    #[inline]
    pub fn write_register8(&mut self, index: usize, value: u8) {
        debug_assert!(index < 8, "Invalid 8-bit register index: {}", index);
        if index < 4 {
            let r = &mut self.registers[index];
            *r = (*r & 0xFFFF_FF00) | value as u32;
        } else {
            let r = &mut self.registers[index - 4];
            *r = (*r & 0xFFFF_00FF) | ((value as u32) << 8);
        }
    }

    #[inline]
    pub fn read_memory8(&self, addr: u32) -> Result<u8, CpuError> {
        self.memory.read8(addr)
    }

    #[inline]
    pub fn read_memory32(&self, addr: u32) -> Result<u32, CpuError> {
        self.memory.read32(addr)
    }

    #[inline]
    pub fn write_memory8(&mut self, addr: u32, value: u8) -> Result<(), CpuError> {
        self.memory.write8(addr, value)
    }

    #[inline]
    pub fn write_memory32(&mut self, addr: u32, value: u32) -> Result<(), CpuError> {
        self.memory.write32(addr, value)
    }

    /// Push a dword onto the stack
    pub fn push32(&mut self, value: u32) -> Result<(), CpuError> {
        let address = self.read_register32(ESP).wrapping_sub(4);
        self.write_register32(ESP, address);
        self.write_memory32(address, value)
    }

    /// Pop a dword from the stack
    pub fn pop32(&mut self) -> Result<u32, CpuError> {
        let address = self.read_register32(ESP);
        let value = self.read_memory32(address)?;
        self.write_register32(ESP, address.wrapping_add(4));
        Ok(value)
    }

    pub fn is_carry(&self) -> bool {
        self.eflags.is_carry()
    }

    pub fn is_zero(&self) -> bool {
        self.eflags.is_zero()
    }

    pub fn is_sign(&self) -> bool {
        self.eflags.is_sign()
    }

    pub fn is_overflow(&self) -> bool {
        self.eflags.is_overflow()
    }

    /// Set CF/ZF/SF/OF as for `v1 - v2`
    #[inline]
    pub fn update_flags_for_subtraction(&mut self, v1: u32, v2: u32) {
        self.eflags.update_for_subtraction(v1, v2);
    }

    /// EIP of the instruction currently (or last) executed
    pub fn instruction_start(&self) -> u32 {
        self.instruction_start
    }

    pub(crate) fn unsupported_addressing(&self, mod_bits: u8, rm: u8) -> CpuError {
        log(LogCategory::Stubs, LogLevel::Error, || {
            format!(
                "CPU: unsupported ModRM mod={} rm={} at EIP={:08X}",
                mod_bits, rm, self.instruction_start
            )
        });
        CpuError::UnsupportedAddressingMode {
            mod_bits,
            rm,
            eip: self.instruction_start,
        }
    }

    pub(crate) fn unimplemented(&self, opcode: u8, sub_opcode: Option<u8>) -> CpuError {
        log(LogCategory::Stubs, LogLevel::Error, || {
            format!(
                "CPU: not implemented {} at EIP={:08X}",
                describe_opcode(&opcode, &sub_opcode),
                self.instruction_start
            )
        });
        CpuError::UnimplementedOpcode {
            opcode,
            sub_opcode,
            eip: self.instruction_start,
        }
    }

    /// Execute one instruction.
    ///
    /// On error EIP and the registers hold whatever the failing handler had
    /// written so far; for an unknown opcode EIP is left on the opcode byte.
    pub fn step(&mut self, table: &OpcodeTable, ports: &mut dyn PortIo) -> Result<(), CpuError> {
        self.instruction_start = self.eip;
        let opcode = self.read_code8(0)?;

        log(LogCategory::CPU, LogLevel::Trace, || {
            format!("EIP = {:X}, Code = {:02X}", self.eip, opcode)
        });

        match table.get(opcode) {
            Some(handler) => handler(self, ports),
            None => Err(self.unimplemented(opcode, None)),
        }
    }

    /// Run until EIP becomes 0, leaves memory, or an instruction faults
    pub fn run(
        &mut self,
        table: &OpcodeTable,
        ports: &mut dyn PortIo,
    ) -> Result<ExitReason, CpuError> {
        while self.memory.contains(self.eip) {
            self.step(table, ports)?;

            if self.eip == 0 {
                log(LogCategory::CPU, LogLevel::Info, || {
                    "CPU: end of program".to_string()
                });
                return Ok(ExitReason::EndOfProgram);
            }
        }

        log(LogCategory::CPU, LogLevel::Warn, || {
            format!("CPU: EIP {:08X} outside of memory, stopping", self.eip)
        });
        Ok(ExitReason::EipOutOfRange)
    }
}
