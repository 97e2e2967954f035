//! EFLAGS handling
//!
//! Only CF, ZF, SF and OF carry meaning in this core; every other bit of the
//! register is stored but never interpreted.

use serde::{Deserialize, Serialize};

// Flag bit positions in EFLAGS
pub const FLAG_CF: u32 = 0x0001; // Carry Flag
pub const FLAG_ZF: u32 = 0x0040; // Zero Flag
pub const FLAG_SF: u32 = 0x0080; // Sign Flag
pub const FLAG_OF: u32 = 0x0800; // Overflow Flag

/// The EFLAGS register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eflags(pub u32);

impl Eflags {
    #[inline]
    fn set(&mut self, flag: u32, value: bool) {
        if value {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    #[inline]
    fn get(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn is_carry(&self) -> bool {
        self.get(FLAG_CF)
    }

    pub fn is_zero(&self) -> bool {
        self.get(FLAG_ZF)
    }

    pub fn is_sign(&self) -> bool {
        self.get(FLAG_SF)
    }

    pub fn is_overflow(&self) -> bool {
        self.get(FLAG_OF)
    }

    pub fn set_carry(&mut self, value: bool) {
        self.set(FLAG_CF, value);
    }

    pub fn set_zero(&mut self, value: bool) {
        self.set(FLAG_ZF, value);
    }

    pub fn set_sign(&mut self, value: bool) {
        self.set(FLAG_SF, value);
    }

    pub fn set_overflow(&mut self, value: bool) {
        self.set(FLAG_OF, value);
    }

    /// Signed "less than" condition (SF != OF)
    pub fn is_less(&self) -> bool {
        self.is_sign() != self.is_overflow()
    }

    /// Signed "less or equal" condition (ZF || SF != OF)
    pub fn is_less_or_equal(&self) -> bool {
        self.is_zero() || self.is_less()
    }

    /// Update CF/ZF/SF/OF for `v1 - v2`.
    ///
    /// The subtraction is carried out in 64 bits so the borrow out of bit 31
    /// lands in bit 32. ZF looks at the whole 64-bit result, which can only be
    /// zero when the operands are equal.
    pub fn update_for_subtraction(&mut self, v1: u32, v2: u32) {
        let result = (v1 as u64).wrapping_sub(v2 as u64);

        let sign1 = v1 >> 31;
        let sign2 = v2 >> 31;
        let sign_r = ((result >> 31) & 1) as u32;

        self.set_carry((result >> 32) & 1 != 0);
        self.set_zero(result == 0);
        self.set_sign(sign_r != 0);
        self.set_overflow(sign1 != sign2 && sign1 != sign_r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let mut flags = Eflags::default();
        flags.set_carry(true);
        flags.set_zero(true);
        flags.set_sign(true);
        flags.set_overflow(true);
        assert_eq!(flags.0, 0x0001 | 0x0040 | 0x0080 | 0x0800);

        flags.set_zero(false);
        assert_eq!(flags.0, 0x0001 | 0x0080 | 0x0800);
        assert!(!flags.is_zero());
    }

    #[test]
    fn test_unused_bits_preserved() {
        let mut flags = Eflags(0xFFFF_0000);
        flags.update_for_subtraction(1, 1);
        assert_eq!(flags.0 & 0xFFFF_0000, 0xFFFF_0000);
    }

    #[test]
    fn test_condition_helpers() {
        let mut flags = Eflags::default();
        assert!(!flags.is_less());
        assert!(!flags.is_less_or_equal());

        flags.set_sign(true);
        assert!(flags.is_less());

        flags.set_overflow(true);
        assert!(!flags.is_less());
        assert!(!flags.is_less_or_equal());

        flags.set_zero(true);
        assert!(flags.is_less_or_equal());
    }
}
