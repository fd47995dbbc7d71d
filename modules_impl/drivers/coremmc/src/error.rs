//! # Driver Errors and Transfer Status

use core::fmt;

use coremmc_hal::HalError;

/// Result type for driver operations
pub type MmcResult<T> = Result<T, MmcError>;

/// CoreMMC driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcError {
    // Initialisation
    /// Version register reports a core revision this driver cannot drive
    UnsupportedHwRevision,
    /// GO_IDLE_STATE failed
    ResetErr,
    /// SEND_OP_COND failed
    OpCondErr,
    /// Device does not use sector addressing
    UnsupportedAccessMode,
    /// ALL_SEND_CID failed
    CidRespErr,
    /// SET_RELATIVE_ADDR failed
    RcaError,
    /// CSD reports a sector size other than 512 bytes
    UnsupportedSectorSize,
    /// Selecting the card or switching the bus width failed
    DwidthErr,
    /// High-speed switch failed or did not take effect
    ClkDivErr,

    // Blocking transfers
    /// Device did not return to a ready state
    TransferFail,
    /// CRC or interrupt error bits after a block transfer
    CrcErr,
    /// Control error bits after a block read
    ReadCtrlErr,

    // Interrupt-driven transfers
    /// Single-block write chain failed
    SbwFail,
    /// Multi-block write chain failed
    MbwFail,
    /// Single-block or Extended CSD read chain failed
    SbrFail,
    /// Multi-block read chain failed
    MbrFail,
    /// Write FIFO timeout
    TimeoutFail,
    /// Device did not answer a command
    NoResponseFail,
    /// FIFO was not filled or drained in time
    UserErrorFail,
    /// Any other interrupt error
    OtherFail,
    /// Transfer outlived its tick budget
    AppTimeoutFail,
    /// Interrupt arrived with no transfer in flight
    IntStatusFail,

    // Driver contract
    /// A blocking poll ran past its deadline
    DeadlineExpired,
    /// A non-blocking transfer is still in flight
    TransferInFlight,
}

impl MmcError {
    /// Legacy numeric status code, where one exists
    pub const fn code(self) -> Option<u8> {
        let code = match self {
            MmcError::TransferFail => 0,
            MmcError::DwidthErr => 3,
            MmcError::RcaError => 4,
            MmcError::CidRespErr => 5,
            MmcError::OpCondErr => 6,
            MmcError::ResetErr => 7,
            MmcError::CrcErr => 8,
            MmcError::ReadCtrlErr => 10,
            MmcError::ClkDivErr => 11,
            MmcError::MbwFail => 13,
            MmcError::MbrFail => 15,
            MmcError::SbwFail => 16,
            MmcError::SbrFail => 17,
            MmcError::AppTimeoutFail => 18,
            MmcError::IntStatusFail => 19,
            MmcError::UserErrorFail => 20,
            MmcError::OtherFail => 21,
            MmcError::TimeoutFail => 22,
            MmcError::UnsupportedHwRevision => 23,
            MmcError::NoResponseFail => 24,
            MmcError::UnsupportedAccessMode
            | MmcError::UnsupportedSectorSize
            | MmcError::DeadlineExpired
            | MmcError::TransferInFlight => return None,
        };
        Some(code)
    }

    /// Every variant, in declaration order
    pub(crate) const ALL: [MmcError; 24] = [
        MmcError::UnsupportedHwRevision,
        MmcError::ResetErr,
        MmcError::OpCondErr,
        MmcError::UnsupportedAccessMode,
        MmcError::CidRespErr,
        MmcError::RcaError,
        MmcError::UnsupportedSectorSize,
        MmcError::DwidthErr,
        MmcError::ClkDivErr,
        MmcError::TransferFail,
        MmcError::CrcErr,
        MmcError::ReadCtrlErr,
        MmcError::SbwFail,
        MmcError::MbwFail,
        MmcError::SbrFail,
        MmcError::MbrFail,
        MmcError::TimeoutFail,
        MmcError::NoResponseFail,
        MmcError::UserErrorFail,
        MmcError::OtherFail,
        MmcError::AppTimeoutFail,
        MmcError::IntStatusFail,
        MmcError::DeadlineExpired,
        MmcError::TransferInFlight,
    ];

    pub(crate) fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl From<HalError> for MmcError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Timeout => MmcError::DeadlineExpired,
            HalError::InvalidAddress => MmcError::OtherFail,
        }
    }
}

impl fmt::Display for MmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmcError::UnsupportedHwRevision => write!(f, "Unsupported CoreMMC revision"),
            MmcError::ResetErr => write!(f, "Device reset failed"),
            MmcError::OpCondErr => write!(f, "Operating condition negotiation failed"),
            MmcError::UnsupportedAccessMode => write!(f, "Device is not sector addressed"),
            MmcError::CidRespErr => write!(f, "No CID response"),
            MmcError::RcaError => write!(f, "Relative address assignment failed"),
            MmcError::UnsupportedSectorSize => write!(f, "Sector size is not 512 bytes"),
            MmcError::DwidthErr => write!(f, "Bus width switch failed"),
            MmcError::ClkDivErr => write!(f, "High-speed switch failed"),
            MmcError::TransferFail => write!(f, "Transfer failed"),
            MmcError::CrcErr => write!(f, "CRC error"),
            MmcError::ReadCtrlErr => write!(f, "Read control error"),
            MmcError::SbwFail => write!(f, "Single-block write failed"),
            MmcError::MbwFail => write!(f, "Multi-block write failed"),
            MmcError::SbrFail => write!(f, "Single-block read failed"),
            MmcError::MbrFail => write!(f, "Multi-block read failed"),
            MmcError::TimeoutFail => write!(f, "FIFO timeout"),
            MmcError::NoResponseFail => write!(f, "Device not responding"),
            MmcError::UserErrorFail => write!(f, "FIFO not serviced in time"),
            MmcError::OtherFail => write!(f, "Controller error"),
            MmcError::AppTimeoutFail => write!(f, "Transfer timed out"),
            MmcError::IntStatusFail => write!(f, "Unexpected interrupt"),
            MmcError::DeadlineExpired => write!(f, "Deadline expired"),
            MmcError::TransferInFlight => write!(f, "Transfer already in flight"),
        }
    }
}

/// Outcome of the current non-blocking transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// No transfer started since initialisation
    Idle,
    /// Transfer in flight
    Processing,
    /// Last transfer completed
    Complete,
    /// Last transfer failed
    Failed(MmcError),
}

impl TransferStatus {
    /// Still waiting on the hardware
    pub const fn is_processing(self) -> bool {
        matches!(self, TransferStatus::Processing)
    }

    pub(crate) const fn encode(self) -> u32 {
        match self {
            TransferStatus::Idle => 0,
            TransferStatus::Processing => 1,
            TransferStatus::Complete => 2,
            TransferStatus::Failed(err) => 0x100 | err as u32,
        }
    }

    pub(crate) fn decode(raw: u32) -> Self {
        match raw {
            0 => TransferStatus::Idle,
            1 => TransferStatus::Processing,
            2 => TransferStatus::Complete,
            _ => TransferStatus::Failed(MmcError::from_index(raw as u8).unwrap_or(MmcError::OtherFail)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_codes() {
        assert_eq!(MmcError::TransferFail.code(), Some(0));
        assert_eq!(MmcError::UnsupportedHwRevision.code(), Some(23));
        assert_eq!(MmcError::NoResponseFail.code(), Some(24));
        assert_eq!(MmcError::TransferInFlight.code(), None);
    }

    #[test]
    fn test_hal_error_conversion() {
        assert_eq!(MmcError::from(HalError::Timeout), MmcError::DeadlineExpired);
    }

    #[test]
    fn test_transfer_status() {
        assert!(TransferStatus::Processing.is_processing());
        assert!(!TransferStatus::Idle.is_processing());
        assert!(!TransferStatus::Failed(MmcError::AppTimeoutFail).is_processing());
    }

    #[test]
    fn test_status_encoding() {
        for (index, err) in MmcError::ALL.iter().enumerate() {
            assert_eq!(*err as usize, index);
            let status = TransferStatus::Failed(*err);
            assert_eq!(TransferStatus::decode(status.encode()), status);
        }
        assert_eq!(TransferStatus::decode(TransferStatus::Processing.encode()), TransferStatus::Processing);
        assert_eq!(TransferStatus::decode(TransferStatus::Idle.encode()), TransferStatus::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(MmcError::AppTimeoutFail.to_string(), "Transfer timed out");
    }
}
