//! # CoreMMC Register Map
//!
//! Offsets are byte offsets from the controller base. Every register is
//! 8 bits wide except the FIFO ports, the data-timeout register, the block
//! length register and the 16-bit multi-block count.
//!
//! The interrupt status, mask and clear registers come in three tiers
//! (command, single-block, multi-block) laid out in consecutive bytes, so a
//! 32-bit access at the command-tier offset covers all three. The mask
//! registers are enables: a set bit lets the source interrupt, zero masks
//! it.

use bitflags::bitflags;
use coremmc_hal::Field;

// =============================================================================
// OFFSETS
// =============================================================================

/// Status Register
pub const SR: usize = 0x00;
/// Version Register
pub const VR: usize = 0x01;
/// Major Version Register (revision 3 cores only)
pub const VR_MAJ: usize = 0x02;
/// Minor Version Register (revision 3 cores only)
pub const VR_MIN: usize = 0x03;
/// Command Register 0, opcode
pub const CR0: usize = 0x04;
/// Command Register 1, argument bits 31:24
pub const CR1: usize = 0x08;
/// Command Register 2, argument bits 23:16
pub const CR2: usize = 0x09;
/// Command Register 3, argument bits 15:8
pub const CR3: usize = 0x0A;
/// Command Register 4, argument bits 7:0. Writing it sends the command.
pub const CR4: usize = 0x0B;
/// Response Register 0
pub const RR0: usize = 0x10;
/// Response Register 1, first byte of the response payload
pub const RR1: usize = 0x14;
/// Response Register 12
pub const RR12: usize = 0x1F;
/// Response Register 13
pub const RR13: usize = 0x20;
/// Response Register 15, last response byte
pub const RR15: usize = 0x22;
/// Write Data Register (FIFO write port)
pub const WDR: usize = 0x24;
/// Read Data Register (FIFO read port)
pub const RDR: usize = 0x28;
/// Interrupt Mask Register
pub const IMR: usize = 0x2C;
/// Block Interrupt Mask Register
pub const BIMR: usize = 0x2D;
/// Multi-Block Interrupt Mask Register
pub const MBIMR: usize = 0x2E;
/// Interrupt Status Register
pub const ISR: usize = 0x30;
/// Block Interrupt Status Register
pub const BISR: usize = 0x31;
/// Multi-Block Interrupt Status Register
pub const MBISR: usize = 0x32;
/// Interrupt Clear Register
pub const ICR: usize = 0x34;
/// Block Interrupt Clear Register
pub const BICR: usize = 0x35;
/// Multi-Block Interrupt Clear Register
pub const MBICR: usize = 0x36;
/// Control Register
pub const CTRL: usize = 0x38;
/// Block Control and Status Register
pub const BCSR: usize = 0x39;
/// Multi-Block Control and Status Register
pub const MBCSR: usize = 0x3A;
/// Response Timeout Register
pub const RSPTO: usize = 0x3C;
/// Data Timeout Register (32-bit)
pub const DATATO: usize = 0x40;
/// Block Length Register (fixed at 512)
pub const BLOCK_LEN: usize = 0x44;
/// Data Control Register, bus width
pub const DCTRL: usize = 0x48;
/// Clock Divider Register
pub const CLKR: usize = 0x4C;
/// Multi-Block Count Register (16-bit)
pub const MBCOUNT: usize = 0x50;

static_assertions::const_assert_eq!(BIMR, IMR + 1);
static_assertions::const_assert_eq!(MBIMR, IMR + 2);
static_assertions::const_assert_eq!(MBISR, ISR + 2);
static_assertions::const_assert_eq!(MBICR, ICR + 2);
static_assertions::const_assert!(IMR % 4 == 0 && ISR % 4 == 0 && ICR % 4 == 0);

/// Write to the clear registers to acknowledge every source at once
pub const CLEAR_ALL: u8 = 0xFF;
/// 32-bit form of [`CLEAR_ALL`] covering all three tiers
pub const CLEAR_ALL_32: u32 = 0xFFFF_FFFF;

// =============================================================================
// VERSION REGISTER FIELDS
// =============================================================================

/// Hardware revision number
pub const VR_REV: Field = Field::new(VR, 0x03);
/// Synthesised MMC data width
pub const VR_MMCDW: Field = Field::new(VR, 0x0C);
/// Synthesised FIFO depth
pub const VR_MMCFD: Field = Field::new(VR, 0x30);

/// The only revision whose register map this driver speaks
pub const SUPPORTED_REVISION: u8 = 3;

// =============================================================================
// BIT LAYOUTS
// =============================================================================

bitflags! {
    /// Status Register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// CRC error on received data
        const CRC_ERROR = 0x01;
        /// Buffer under-run
        const BUFFER_UNDERRUN = 0x02;
        /// Buffer over-run
        const BUFFER_OVERRUN = 0x04;
        /// Read FIFO empty
        const READ_FIFO_EMPTY = 0x08;
        /// Write FIFO empty
        const WRITE_FIFO_EMPTY = 0x10;
        /// Read FIFO full
        const READ_FIFO_FULL = 0x20;
        /// Write FIFO full
        const WRITE_FIFO_FULL = 0x40;
        /// Read data register empty
        const READ_DATA_EMPTY = 0x80;
    }
}

bitflags! {
    /// Control Register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u8 {
        /// Software reset
        const SOFT_RESET = 0x01;
        /// Slave reset
        const SLAVE_RESET = 0x02;
        /// Clock output enable
        const CLOCK_OUT_ENABLE = 0x04;
        /// Core idle
        const IDLE = 0x08;
        /// Force command line low
        const FORCE_CMD_LOW = 0x10;
        /// Reset both FIFOs (self-clearing)
        const RESET_FIFO = 0x20;
        /// Device busy
        const DEVICE_BUSY = 0x80;
    }
}

bitflags! {
    /// Command-tier interrupt bits (ISR, IMR, ICR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdIrq: u8 {
        /// FIFO under-run
        const UNDERRUN = 0x01;
        /// FIFO over-run
        const OVERRUN = 0x02;
        /// Command sent
        const CMD_SENT = 0x04;
        /// Response received
        const RESPONSE = 0x08;
        /// Transmit bit error
        const TX_BIT_ERROR = 0x10;
        /// Stop bit error
        const STOP_BIT_ERROR = 0x20;
        /// Start bit error, nothing came back from the device
        const START_BIT_ERROR = 0x40;
        /// User error, FIFO not filled or drained in time
        const USER_ERROR = 0x80;

        /// Sources that end a blocking response wait
        const RESPONSE_WAIT = Self::RESPONSE.bits()
            | Self::TX_BIT_ERROR.bits()
            | Self::STOP_BIT_ERROR.bits()
            | Self::START_BIT_ERROR.bits();
        /// Error sources
        const ERRORS = Self::USER_ERROR.bits()
            | Self::START_BIT_ERROR.bits()
            | Self::STOP_BIT_ERROR.bits()
            | Self::TX_BIT_ERROR.bits()
            | Self::OVERRUN.bits()
            | Self::UNDERRUN.bits();
        /// Error sources checked after a blocking read
        const READ_ERRORS = Self::ERRORS.bits() & !Self::UNDERRUN.bits();
    }
}

bitflags! {
    /// Single-block interrupt bits (BISR, BIMR, BICR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockIrq: u8 {
        /// Block write done
        const WRITE_DONE = 0x01;
        /// Block read done
        const READ_DONE = 0x02;
        /// Data CRC error
        const CRC_ERROR = 0x04;
        /// Read timeout
        const READ_TIMEOUT = 0x08;
        /// Read stop bit error
        const READ_STOP_ERROR = 0x10;
        /// CRC status token error
        const CRC_STATUS_ERROR = 0x20;
        /// Write busy timeout
        const WRITE_BUSY_TIMEOUT = 0x40;
        /// Write FIFO timeout
        const FIFO_TIMEOUT = 0x80;

        /// Error sources
        const ERRORS = Self::FIFO_TIMEOUT.bits()
            | Self::WRITE_BUSY_TIMEOUT.bits()
            | Self::CRC_STATUS_ERROR.bits()
            | Self::READ_STOP_ERROR.bits()
            | Self::READ_TIMEOUT.bits()
            | Self::CRC_ERROR.bits();
        /// Errors that fail a blocking single-block write
        const WRITE_CRC_ERRORS = Self::CRC_STATUS_ERROR.bits() | Self::CRC_ERROR.bits();
    }
}

bitflags! {
    /// Multi-block interrupt bits (MBISR, MBIMR, MBICR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MultiIrq: u8 {
        /// Multi-block write done
        const WRITE_DONE = 0x01;
        /// Multi-block read done
        const READ_DONE = 0x02;
        /// Data CRC error
        const CRC_ERROR = 0x04;
        /// Read timeout
        const READ_TIMEOUT = 0x08;
        /// Read stop bit error
        const READ_STOP_ERROR = 0x10;
        /// CRC status token error
        const CRC_STATUS_ERROR = 0x20;
        /// Write busy timeout
        const WRITE_BUSY_TIMEOUT = 0x40;
        /// Write FIFO timeout
        const FIFO_TIMEOUT = 0x80;

        /// Error sources
        const ERRORS = Self::FIFO_TIMEOUT.bits()
            | Self::WRITE_BUSY_TIMEOUT.bits()
            | Self::CRC_STATUS_ERROR.bits()
            | Self::READ_STOP_ERROR.bits()
            | Self::READ_TIMEOUT.bits()
            | Self::CRC_ERROR.bits();
    }
}

bitflags! {
    /// Single-block control and status (BCSR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockControl: u8 {
        /// Start a block write from the FIFO
        const WRITE_START = 0x01;
        /// Start a block read into the FIFO
        const READ_START = 0x02;
        /// Block done
        const DONE = 0x04;
        /// Block CRC error
        const CRC_ERROR = 0x08;
        /// Write CRC status token
        const WRITE_STATUS = 0xF0;
    }
}

bitflags! {
    /// Multi-block control and status (MBCSR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MultiBlockControl: u8 {
        /// Start a multi-block write from the FIFO
        const WRITE_START = 0x01;
        /// Start a multi-block read into the FIFO
        const READ_START = 0x02;
        /// Multi-block done
        const DONE = 0x04;
        /// Multi-block CRC error
        const CRC_ERROR = 0x08;
    }
}

bitflags! {
    /// All three interrupt tiers as returned by a 32-bit read at [`ISR`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        /// Command-tier byte
        const CMD = 0x0000_00FF;
        /// Single-block byte
        const BLOCK = 0x0000_FF00;
        /// Multi-block byte
        const MULTI = 0x00FF_0000;
    }
}

impl IrqFlags {
    /// Assemble from the three tiers
    pub const fn from_parts(cmd: CmdIrq, block: BlockIrq, multi: MultiIrq) -> Self {
        Self::from_bits_retain(
            cmd.bits() as u32 | (block.bits() as u32) << 8 | (multi.bits() as u32) << 16,
        )
    }

    /// Command-tier bits
    pub const fn cmd(self) -> CmdIrq {
        CmdIrq::from_bits_retain(self.bits() as u8)
    }

    /// Single-block bits
    pub const fn block(self) -> BlockIrq {
        BlockIrq::from_bits_retain((self.bits() >> 8) as u8)
    }

    /// Multi-block bits
    pub const fn multi(self) -> MultiIrq {
        MultiIrq::from_bits_retain((self.bits() >> 16) as u8)
    }

    /// Any error bit in any tier
    pub const fn has_error(self) -> bool {
        self.cmd().intersects(CmdIrq::ERRORS)
            || self.block().intersects(BlockIrq::ERRORS)
            || self.multi().intersects(MultiIrq::ERRORS)
    }

    /// A write-FIFO timeout in either block tier
    pub const fn fifo_timeout(self) -> bool {
        self.block().contains(BlockIrq::FIFO_TIMEOUT) || self.multi().contains(MultiIrq::FIFO_TIMEOUT)
    }

    /// Command went out, the start bit never came back and no response
    /// was latched: the device is silent
    pub const fn no_response(self) -> bool {
        let seen = self.cmd().bits()
            & (CmdIrq::START_BIT_ERROR.bits() | CmdIrq::RESPONSE.bits() | CmdIrq::CMD_SENT.bits());
        seen == CmdIrq::CMD_SENT.bits() | CmdIrq::START_BIT_ERROR.bits()
    }
}

/// Error pattern across all three tiers
pub const ALL_ERRORS: u32 = IrqFlags::from_parts(CmdIrq::ERRORS, BlockIrq::ERRORS, MultiIrq::ERRORS).bits();

static_assertions::const_assert_eq!(ALL_ERRORS, 0x00FC_FCF3);

// =============================================================================
// INTERRUPT ENABLE MASKS
// =============================================================================

/// IMR while a non-blocking transfer runs: everything but command-sent
pub const IMR_TRANSFER: u8 = CmdIrq::all().bits() & !CmdIrq::CMD_SENT.bits();
/// BIMR for a single-block read: everything but write-done
pub const BIMR_SINGLE_READ: u8 = BlockIrq::all().bits() & !BlockIrq::WRITE_DONE.bits();
/// BIMR for a single-block write: everything but read-done
pub const BIMR_SINGLE_WRITE: u8 = BlockIrq::all().bits() & !BlockIrq::READ_DONE.bits();
/// MBIMR for a multi-block read: everything but write-done
pub const MBIMR_MULTI_READ: u8 = MultiIrq::all().bits() & !MultiIrq::WRITE_DONE.bits();
/// MBIMR for a multi-block write: everything but read-done
pub const MBIMR_MULTI_WRITE: u8 = MultiIrq::all().bits() & !MultiIrq::READ_DONE.bits();

/// Written as 32 bits at [`IMR`] to mask every tier
pub const MASK_ALL_32: u32 = 0;
