//! # Memory-Mapped Register Access
//!
//! [`RegisterIo`] is the seam between a peripheral driver and its register
//! block. Offsets are byte offsets from the block base; multi-byte accesses
//! use the platform's native byte order.

use crate::{HalError, HalResult, PhysAddr};

/// A bit-field inside an 8-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Byte offset of the register
    pub offset: usize,
    /// Mask of the field bits, in register position
    pub mask: u8,
    /// Position of the lowest field bit
    pub shift: u8,
}

impl Field {
    /// Create a field from a register offset and an in-place mask
    pub const fn new(offset: usize, mask: u8) -> Self {
        Self {
            offset,
            mask,
            shift: mask.trailing_zeros() as u8,
        }
    }

    /// Extract the field value from a raw register value
    #[inline]
    pub const fn extract(self, reg: u8) -> u8 {
        (reg & self.mask) >> self.shift
    }

    /// Replace the field inside a raw register value
    #[inline]
    pub const fn insert(self, reg: u8, value: u8) -> u8 {
        (reg & !self.mask) | (value.wrapping_shl(self.shift as u32) & self.mask)
    }
}

/// Sized access to a block of device registers
pub trait RegisterIo {
    /// Base address of the register block
    fn base(&self) -> PhysAddr;

    /// Read an 8-bit register
    fn read8(&self, offset: usize) -> u8;

    /// Write an 8-bit register
    fn write8(&self, offset: usize, value: u8);

    /// Read a 16-bit register
    fn read16(&self, offset: usize) -> u16;

    /// Write a 16-bit register
    fn write16(&self, offset: usize, value: u16);

    /// Read a 32-bit register
    fn read32(&self, offset: usize) -> u32;

    /// Write a 32-bit register
    fn write32(&self, offset: usize, value: u32);

    /// Read a bit-field of an 8-bit register
    fn read_field(&self, field: Field) -> u8 {
        field.extract(self.read8(field.offset))
    }

    /// Read-modify-write a bit-field of an 8-bit register
    fn write_field(&self, field: Field, value: u8) {
        let reg = self.read8(field.offset);
        self.write8(field.offset, field.insert(reg, value));
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn base(&self) -> PhysAddr {
        (**self).base()
    }

    fn read8(&self, offset: usize) -> u8 {
        (**self).read8(offset)
    }

    fn write8(&self, offset: usize, value: u8) {
        (**self).write8(offset, value)
    }

    fn read16(&self, offset: usize) -> u16 {
        (**self).read16(offset)
    }

    fn write16(&self, offset: usize, value: u16) {
        (**self).write16(offset, value)
    }

    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Volatile register block at a fixed physical address
#[derive(Debug)]
pub struct Mmio {
    base: PhysAddr,
}

impl Mmio {
    /// Bind a register block
    ///
    /// # Safety
    ///
    /// `base` must be identity-mapped device memory covering every offset
    /// the driver touches, and nothing else may alias it as normal memory
    /// while this value is alive.
    pub unsafe fn new(base: PhysAddr) -> HalResult<Self> {
        if !base.is_aligned(4) {
            return Err(HalError::InvalidAddress);
        }
        Ok(Self { base })
    }

    #[inline]
    fn ptr<T>(&self, offset: usize) -> *mut T {
        (self.base.as_usize() + offset) as *mut T
    }
}

impl RegisterIo for Mmio {
    fn base(&self) -> PhysAddr {
        self.base
    }

    fn read8(&self, offset: usize) -> u8 {
        // SAFETY: the caller of `Mmio::new` vouched for the mapping
        unsafe { core::ptr::read_volatile(self.ptr::<u8>(offset)) }
    }

    fn write8(&self, offset: usize, value: u8) {
        // SAFETY: see `read8`
        unsafe { core::ptr::write_volatile(self.ptr::<u8>(offset), value) }
    }

    fn read16(&self, offset: usize) -> u16 {
        // SAFETY: see `read8`
        unsafe { core::ptr::read_volatile(self.ptr::<u16>(offset)) }
    }

    fn write16(&self, offset: usize, value: u16) {
        // SAFETY: see `read8`
        unsafe { core::ptr::write_volatile(self.ptr::<u16>(offset), value) }
    }

    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: see `read8`
        unsafe { core::ptr::read_volatile(self.ptr::<u32>(offset)) }
    }

    fn write32(&self, offset: usize, value: u32) {
        // SAFETY: see `read8`
        unsafe { core::ptr::write_volatile(self.ptr::<u32>(offset), value) }
    }
}
