//! # eMMC Commands and Responses

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Relative card address assigned by this host, in argument position
pub const RCA_ARG: u32 = 0x0001_FFFF;

/// Stuff bits for commands that ignore their argument
pub const STUFF_BITS: u32 = 0x0000_FFFF;

/// SEND_OP_COND argument: sector access mode, 1.70-1.95V window
pub const OP_COND_ARG: u32 = 0x4000_0080;

/// SWITCH write-byte argument for the BUS_WIDTH field, without the value
pub const SWITCH_BUS_WIDTH_ARG: u32 = 0x03B7_0000;

/// SWITCH write-byte argument setting HS_TIMING to high speed
pub const SWITCH_HS_TIMING_ARG: u32 = 0x03B9_0100;

/// SWITCH argument selecting `width` as the device bus width
pub const fn switch_bus_width(width: u8) -> u32 {
    SWITCH_BUS_WIDTH_ARG | ((width as u32) << 8)
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Response classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// No response
    None,
    /// Card status
    R1,
    /// Card status, busy on DAT0 afterwards
    R1b,
    /// CID or CSD, 136 bits
    R2,
    /// OCR
    R3,
    /// Fast I/O
    R4,
    /// Interrupt request
    R5,
}

/// MMC commands issued by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// CMD0: Reset to idle
    GoIdleState = 0,
    /// CMD1: Send operating conditions
    SendOpCond = 1,
    /// CMD2: All send CID
    AllSendCid = 2,
    /// CMD3: Set relative address
    SetRelativeAddr = 3,
    /// CMD4: Set DSR
    SetDsr = 4,
    /// CMD6: Switch an Extended CSD byte
    Switch = 6,
    /// CMD7: Select/deselect card
    SelectCard = 7,
    /// CMD8: Send Extended CSD
    SendExtCsd = 8,
    /// CMD9: Send CSD
    SendCsd = 9,
    /// CMD10: Send CID
    SendCid = 10,
    /// CMD12: Stop transmission
    StopTransmission = 12,
    /// CMD13: Send status
    SendStatus = 13,
    /// CMD15: Go inactive state
    GoInactiveState = 15,
    /// CMD17: Read single block
    ReadSingleBlock = 17,
    /// CMD18: Read multiple blocks
    ReadMultipleBlock = 18,
    /// CMD23: Set block count
    SetBlockCount = 23,
    /// CMD24: Write single block
    WriteBlock = 24,
    /// CMD25: Write multiple blocks
    WriteMultipleBlock = 25,
    /// CMD39: Fast I/O
    FastIo = 39,
    /// CMD40: Go IRQ state
    GoIrqState = 40,
}

impl Command {
    /// Command index as written to CR0
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Expected response class
    pub const fn response(self) -> ResponseClass {
        match self {
            Command::GoIdleState | Command::SetDsr | Command::GoInactiveState => ResponseClass::None,
            Command::SendOpCond => ResponseClass::R3,
            Command::AllSendCid | Command::SendCsd | Command::SendCid => ResponseClass::R2,
            Command::Switch | Command::StopTransmission => ResponseClass::R1b,
            Command::FastIo => ResponseClass::R4,
            Command::GoIrqState => ResponseClass::R5,
            Command::SetRelativeAddr
            | Command::SelectCard
            | Command::SendExtCsd
            | Command::SendStatus
            | Command::ReadSingleBlock
            | Command::ReadMultipleBlock
            | Command::SetBlockCount
            | Command::WriteBlock
            | Command::WriteMultipleBlock => ResponseClass::R1,
        }
    }

    /// Does the response carry a card-status word
    pub const fn has_card_status(self) -> bool {
        matches!(self.response(), ResponseClass::R1 | ResponseClass::R1b)
    }
}

// =============================================================================
// CARD STATUS
// =============================================================================

/// Card status (R1 response), JEDEC bit positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardStatus(pub u32);

impl CardStatus {
    /// Address out of range
    pub const OUT_OF_RANGE: u32 = 1 << 31;
    /// Misaligned address
    pub const ADDRESS_MISALIGN: u32 = 1 << 30;
    /// Block length error
    pub const BLOCK_LEN_ERROR: u32 = 1 << 29;
    /// Erase sequence error
    pub const ERASE_SEQ_ERROR: u32 = 1 << 28;
    /// Erase parameter error
    pub const ERASE_PARAM: u32 = 1 << 27;
    /// Write protect violation
    pub const WP_VIOLATION: u32 = 1 << 26;
    /// Card is locked
    pub const CARD_IS_LOCKED: u32 = 1 << 25;
    /// Lock/unlock failed
    pub const LOCK_UNLOCK_FAILED: u32 = 1 << 24;
    /// Command CRC error
    pub const COM_CRC_ERROR: u32 = 1 << 23;
    /// Illegal command
    pub const ILLEGAL_COMMAND: u32 = 1 << 22;
    /// Card ECC failed
    pub const CARD_ECC_FAILED: u32 = 1 << 21;
    /// Card controller error
    pub const CC_ERROR: u32 = 1 << 20;
    /// General error
    pub const ERROR: u32 = 1 << 19;
    /// Stream read underrun
    pub const UNDERRUN: u32 = 1 << 18;
    /// Stream write overrun
    pub const OVERRUN: u32 = 1 << 17;
    /// CSD overwrite
    pub const CSD_OVERWRITE: u32 = 1 << 16;
    /// Write protect erase skip
    pub const WP_ERASE_SKIP: u32 = 1 << 15;
    /// Erase reset
    pub const ERASE_RESET: u32 = 1 << 13;
    /// Current state field
    pub const CURRENT_STATE: u32 = 0xF << 9;
    /// Ready for data
    pub const READY_FOR_DATA: u32 = 1 << 8;
    /// Switch error
    pub const SWITCH_ERROR: u32 = 1 << 7;
    /// Urgent background operations
    pub const URGENT_BKOPS: u32 = 1 << 6;
    /// Application command
    pub const APP_CMD: u32 = 1 << 5;

    /// Bits that fail a command. A locked card still answers.
    pub const ERROR_MASK: u32 = Self::SWITCH_ERROR
        | Self::WP_ERASE_SKIP
        | Self::ERASE_RESET
        | Self::COM_CRC_ERROR
        | Self::ILLEGAL_COMMAND
        | Self::CARD_ECC_FAILED
        | Self::CC_ERROR
        | Self::ERROR
        | Self::UNDERRUN
        | Self::OVERRUN
        | Self::CSD_OVERWRITE
        | Self::OUT_OF_RANGE
        | Self::ADDRESS_MISALIGN
        | Self::BLOCK_LEN_ERROR
        | Self::ERASE_SEQ_ERROR
        | Self::ERASE_PARAM
        | Self::WP_VIOLATION
        | Self::LOCK_UNLOCK_FAILED;

    /// Decode the raw 32-bit RR1 value
    ///
    /// The controller latches response bytes most significant first, so on
    /// a little-endian hart the native read returns the status byte-swapped.
    pub const fn from_response(raw: u32) -> Self {
        Self(u32::from_be_bytes(raw.to_ne_bytes()))
    }

    /// Encode as the controller would latch it
    pub const fn to_response(self) -> u32 {
        u32::from_ne_bytes(self.0.to_be_bytes())
    }

    /// Ready for data
    pub const fn ready_for_data(&self) -> bool {
        (self.0 & Self::READY_FOR_DATA) != 0
    }

    /// Device state latched with this response
    pub const fn current_state(&self) -> CardState {
        CardState::from_status(self.0)
    }

    /// Any bit of [`ERROR_MASK`](Self::ERROR_MASK) set
    pub const fn has_error(&self) -> bool {
        (self.0 & Self::ERROR_MASK) != 0
    }
}

/// Device state machine position, R1 bits 12:9
///
/// Codes 11 to 15 are reserved in the eMMC state table and decode as
/// [`CardState::Reserved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CardState {
    /// After CMD0
    Idle = 0,
    /// Operating conditions accepted
    Ready = 1,
    /// CID sent, waiting for an RCA
    Identification = 2,
    /// Addressed but not selected
    Standby = 3,
    /// Selected, accepting data commands
    Transfer = 4,
    /// Sending read data
    SendingData = 5,
    /// Receiving write data
    ReceivingData = 6,
    /// Committing written data
    Programming = 7,
    /// Deselected while programming
    Disconnect = 8,
    /// Bus testing (CMD19/CMD14)
    BusTest = 9,
    /// Sleep (CMD5)
    Sleep = 10,
    /// Reserved code
    Reserved = 15,
}

const STATE_SHIFT: u32 = 9;

const STATE_TABLE: [CardState; 11] = [
    CardState::Idle,
    CardState::Ready,
    CardState::Identification,
    CardState::Standby,
    CardState::Transfer,
    CardState::SendingData,
    CardState::ReceivingData,
    CardState::Programming,
    CardState::Disconnect,
    CardState::BusTest,
    CardState::Sleep,
];

impl CardState {
    /// Extract from an R1 status word
    pub const fn from_status(status: u32) -> Self {
        let code = ((status & CardStatus::CURRENT_STATE) >> STATE_SHIFT) as usize;
        if code < STATE_TABLE.len() {
            STATE_TABLE[code]
        } else {
            CardState::Reserved
        }
    }

    /// Positioned in the CURRENT_STATE field
    pub const fn status_bits(self) -> u32 {
        (self as u32) << STATE_SHIFT
    }
}

// =============================================================================
// OPERATING CONDITIONS
// =============================================================================

/// Access mode reported in the OCR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessMode {
    /// Byte addressing (devices up to 2 GB)
    Byte = 0,
    /// Sector addressing
    Sector = 2,
    /// Reserved encoding
    Reserved = 0xFF,
}

/// Top byte of the OCR (R3), as latched in RR1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ocr(pub u8);

impl Ocr {
    /// Power-up routine finished
    pub const POWERED_UP: u8 = 0x80;
    /// Access mode field
    pub const ACCESS_MODE: u8 = 0x60;

    /// The device has left its power-up busy period
    pub const fn powered_up(&self) -> bool {
        (self.0 & Self::POWERED_UP) != 0
    }

    /// Addressing mode the device operates in
    pub const fn access_mode(&self) -> AccessMode {
        match (self.0 & Self::ACCESS_MODE) >> 5 {
            0 => AccessMode::Byte,
            2 => AccessMode::Sector,
            _ => AccessMode::Reserved,
        }
    }
}
