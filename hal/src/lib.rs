//! # CoreMMC HAL - Hardware Abstraction Layer
//!
//! This crate defines the primitives the CoreMMC driver needs from the
//! platform: sized register access at an offset from a device base,
//! 8-bit bit-field helpers and a wrapping tick source for deadlines.
//!
//! ## Design Philosophy
//!
//! The HAL is designed to be:
//! - **Minimal**: Only exposes what a memory-mapped peripheral driver needs
//! - **Safe**: Encapsulates all volatile pointer access behind [`Mmio`]
//! - **Replaceable**: Drivers are generic over [`RegisterIo`], so a
//!   simulated device can stand in for silicon

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod mmio;
pub mod timer;

pub use mmio::{Field, Mmio, RegisterIo};
pub use timer::{Deadline, StepClock, TickSource};

use core::fmt;

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Address is invalid or not aligned
    InvalidAddress,
    /// Operation timed out
    Timeout,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::InvalidAddress => write!(f, "Invalid or misaligned address"),
            HalError::Timeout => write!(f, "Operation timed out"),
        }
    }
}

/// Physical address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

static_assertions::assert_eq_size!(PhysAddr, u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Get the address as a pointer-sized integer
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Add a byte offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
