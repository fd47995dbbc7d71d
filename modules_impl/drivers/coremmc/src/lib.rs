//! # CoreMMC eMMC Host-Controller Driver
//!
//! Driver for the CoreMMC soft IP core and the eMMC device on its bus.
//!
//! ## Features
//! - Device bring-up: identification, bus widening, high-speed switch
//! - Blocking single-block reads and writes with deadline-bounded polling
//! - Interrupt-driven single and multi-block transfers
//! - Extended CSD access through the reserved sector [`EXT_CSD_SECTOR`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        CoreMmc<R>                        │
//! │  device: init, blocking I/O   transfer: non-blocking API │
//! ├──────────────────────────────┬───────────────────────────┤
//! │  interface: command/reply    │  isr: interrupt state     │
//! │                              │  machine                  │
//! ├──────────────────────────────┴───────────────────────────┤
//! │         regs (register map)   command (MMC protocol)     │
//! ├──────────────────────────────────────────────────────────┤
//! │     coremmc-hal: RegisterIo (Mmio | sim), Deadline        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! Bring the device up once with [`CoreMmc::init`], wire
//! [`CoreMmc::on_interrupt`] to the controller's interrupt line and use
//! either the blocking calls or the non-blocking ones polled through
//! [`CoreMmc::status`]. Data for non-blocking transfers moves through the
//! controller FIFO, by CPU or by DMA.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod command;
pub mod config;
pub mod error;
pub mod ext_csd;
pub mod interface;
pub mod isr;
pub mod regs;
pub mod transfer;

mod device;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
mod tests;

pub use config::Params;
pub use device::{BusWidth, CoreMmc, DeviceInfo};
pub use error::{MmcError, MmcResult, TransferStatus};
pub use ext_csd::ExtCsd;
pub use isr::IsrState;
pub use transfer::{TransferKind, TransferRequest, TransferSnapshot};

/// Sector and block size in bytes
pub const BLOCK_SIZE: usize = 512;

/// 32-bit FIFO words per block
pub const BLOCK_WORDS: usize = BLOCK_SIZE / 4;

/// One block as FIFO words
pub type Block = [u32; BLOCK_WORDS];

/// Reserved sector number that addresses the Extended CSD register
pub const EXT_CSD_SECTOR: u32 = 0xFFFF_FFFF;

static_assertions::const_assert_eq!(BLOCK_WORDS, 128);
