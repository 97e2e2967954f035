//! ModR/M operand decoding
//!
//! Decoding consumes the ModR/M byte, an optional SIB byte and an optional
//! displacement from the instruction stream. [`ModRm::decode`] does not move
//! EIP itself; it returns the address of the first byte after the operand
//! bytes and the handler stores it. Immediates that follow the operand are
//! read from there.
//!
//! The `reg` field always names a register. The `rm` field names a register
//! only in mod=11; otherwise it selects a memory effective address.

use super::memory::FlatMemory;
use super::{CpuError, CpuI386};

/// Displacement following the ModR/M (and SIB) byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Displacement {
    None,
    /// Sign-extended 8-bit displacement (mod=01)
    Disp8(i8),
    /// 32-bit displacement (mod=10, or the absolute address of mod=00 rm=101)
    Disp32(u32),
}

/// A decoded ModR/M byte plus its trailing addressing bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    /// Addressing mode, bits 7-6
    pub mod_bits: u8,
    /// Register index or group sub-opcode, bits 5-3
    pub reg: u8,
    /// Register index or memory form, bits 2-0
    pub rm: u8,
    /// SIB byte, present when mod != 11 and rm == 100
    pub sib: Option<u8>,
    pub disp: Displacement,
}

/// Where an r/m operand lives once resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(usize),
    Memory(u32),
}

impl ModRm {
    /// Split a ModR/M byte into (mod, reg, rm)
    #[inline]
    pub fn split(byte: u8) -> (u8, u8, u8) {
        let mod_bits = (byte >> 6) & 0x03; // Bits 7-6
        let reg = (byte >> 3) & 0x07; // Bits 5-3
        let rm = byte & 0x07; // Bits 2-0
        (mod_bits, reg, rm)
    }

    /// Decode the operand bytes starting at `at`.
    ///
    /// Returns the descriptor and the address just past the last byte
    /// consumed.
    pub fn decode(memory: &FlatMemory, at: u32) -> Result<(Self, u32), CpuError> {
        let (mod_bits, reg, rm) = Self::split(memory.read8(at)?);
        let mut next = at.wrapping_add(1);

        let sib = if mod_bits != 0b11 && rm == 0b100 {
            let sib = memory.read8(next)?;
            next = next.wrapping_add(1);
            Some(sib)
        } else {
            None
        };

        let disp = match (mod_bits, rm) {
            (0b00, 0b101) | (0b10, _) => {
                let disp = memory.read32(next)?;
                next = next.wrapping_add(4);
                Displacement::Disp32(disp)
            }
            (0b01, _) => {
                let disp = memory.read8(next)? as i8;
                next = next.wrapping_add(1);
                Displacement::Disp8(disp)
            }
            _ => Displacement::None,
        };

        Ok((
            Self {
                mod_bits,
                reg,
                rm,
                sib,
                disp,
            },
            next,
        ))
    }

    /// Register-direct form (mod=11)
    #[inline]
    pub fn is_register(&self) -> bool {
        self.mod_bits == 0b11
    }

    /// Resolve the r/m field against the current register file
    pub fn operand(&self, cpu: &CpuI386) -> Result<Operand, CpuError> {
        if self.is_register() {
            Ok(Operand::Register(self.rm as usize))
        } else {
            self.effective_address(cpu).map(Operand::Memory)
        }
    }

    /// Compute the memory effective address of a mod=00/01/10 operand.
    ///
    /// SIB-based forms (rm=100) are not supported.
    pub fn effective_address(&self, cpu: &CpuI386) -> Result<u32, CpuError> {
        if self.is_register() || self.rm == 0b100 {
            return Err(cpu.unsupported_addressing(self.mod_bits, self.rm));
        }

        let base = || cpu.read_register32(self.rm as usize);
        let address = match (self.mod_bits, self.disp) {
            // [disp32]
            (0b00, Displacement::Disp32(disp)) => disp,
            // [reg]
            (0b00, _) => base(),
            // [reg + disp8]
            (0b01, Displacement::Disp8(disp)) => base().wrapping_add(disp as i32 as u32),
            // [reg + disp32]
            (0b10, Displacement::Disp32(disp)) => base().wrapping_add(disp),
            _ => return Err(cpu.unsupported_addressing(self.mod_bits, self.rm)),
        };
        Ok(address)
    }
}

impl CpuI386 {
    /// Decode the ModR/M operand at EIP and move EIP past it
    pub(crate) fn fetch_modrm(&mut self) -> Result<ModRm, CpuError> {
        let (modrm, next) = ModRm::decode(&self.memory, self.eip)?;
        self.eip = next;
        Ok(modrm)
    }

    /// Read the 32-bit r/m operand
    pub fn get_rm32(&self, modrm: &ModRm) -> Result<u32, CpuError> {
        match modrm.operand(self)? {
            Operand::Register(index) => Ok(self.read_register32(index)),
            Operand::Memory(addr) => self.read_memory32(addr),
        }
    }

    /// Write the 32-bit r/m operand
    pub fn set_rm32(&mut self, modrm: &ModRm, value: u32) -> Result<(), CpuError> {
        match modrm.operand(self)? {
            Operand::Register(index) => {
                self.write_register32(index, value);
                Ok(())
            }
            Operand::Memory(addr) => self.write_memory32(addr, value),
        }
    }

    /// Read the register selected by the reg field
    #[inline]
    pub fn get_r32(&self, modrm: &ModRm) -> u32 {
        self.read_register32(modrm.reg as usize)
    }

    /// Write the register selected by the reg field
    #[inline]
    pub fn set_r32(&mut self, modrm: &ModRm, value: u32) {
        self.write_register32(modrm.reg as usize, value);
    }
}
