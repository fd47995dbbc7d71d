//! # Extended CSD

use crate::{Block, BLOCK_SIZE};

/// Extended CSD field offsets
pub mod ext_csd {
    /// SEC_COUNT (4 bytes, little endian)
    pub const SEC_COUNT: usize = 212;
    /// CARD_TYPE
    pub const CARD_TYPE: usize = 196;
    /// EXT_CSD_REV
    pub const EXT_CSD_REV: usize = 192;
    /// HS_TIMING
    pub const HS_TIMING: usize = 185;
    /// BUS_WIDTH
    pub const BUS_WIDTH: usize = 183;
}

/// Extended CSD as read through the FIFO
///
/// Byte `n` of the register is byte `n % 4` of word `n / 4`, counting from
/// the least significant end, matching the order the FIFO streams it.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtCsd {
    /// Raw FIFO words
    pub words: Block,
}

impl ExtCsd {
    /// Wrap a block read with SEND_EXT_CSD
    pub const fn from_words(words: Block) -> Self {
        Self { words }
    }

    /// Single register byte
    pub const fn byte(&self, offset: usize) -> u8 {
        (self.words[offset / 4] >> ((offset % 4) * 8)) as u8
    }

    /// Get sector count (device capacity in 512-byte sectors)
    pub const fn sector_count(&self) -> u32 {
        u32::from_le_bytes([
            self.byte(ext_csd::SEC_COUNT),
            self.byte(ext_csd::SEC_COUNT + 1),
            self.byte(ext_csd::SEC_COUNT + 2),
            self.byte(ext_csd::SEC_COUNT + 3),
        ])
    }

    /// Get device capacity in bytes
    pub const fn capacity_bytes(&self) -> u64 {
        self.sector_count() as u64 * BLOCK_SIZE as u64
    }

    /// Get Extended CSD revision
    pub const fn ext_csd_rev(&self) -> u8 {
        self.byte(ext_csd::EXT_CSD_REV)
    }

    /// Get card type (supported speed modes)
    pub const fn card_type(&self) -> u8 {
        self.byte(ext_csd::CARD_TYPE)
    }

    /// Get current bus width setting
    pub const fn bus_width(&self) -> u8 {
        self.byte(ext_csd::BUS_WIDTH)
    }

    /// Get HS timing setting
    pub const fn hs_timing(&self) -> u8 {
        self.byte(ext_csd::HS_TIMING)
    }
}

impl core::fmt::Debug for ExtCsd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExtCsd")
            .field("sector_count", &self.sector_count())
            .field("ext_csd_rev", &self.ext_csd_rev())
            .field("card_type", &self.card_type())
            .field("bus_width", &self.bus_width())
            .field("hs_timing", &self.hs_timing())
            .finish()
    }
}
