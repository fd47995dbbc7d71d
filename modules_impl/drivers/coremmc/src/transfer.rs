//! # Non-blocking Transfers
//!
//! A transfer is started from task context and then driven entirely by
//! [`CoreMmc::on_interrupt`]. The caller moves data through the FIFO
//! itself (or points a DMA engine at [`CoreMmc::fifo_write_address`] /
//! [`CoreMmc::fifo_read_address`]) and polls [`CoreMmc::status`].
//!
//! The interrupt path owns the transfer context. What the caller can see
//! is published through atomics, so polling never contends with the
//! interrupt handler for a lock.

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use coremmc_hal::{timer, RegisterIo};
use log::{debug, warn};

use crate::command::{Command, RCA_ARG};
use crate::device::CoreMmc;
use crate::error::{MmcError, MmcResult, TransferStatus};
use crate::interface::{send_command, CommandCheck};
use crate::isr::IsrState;
use crate::regs;
use crate::EXT_CSD_SECTOR;

/// Kind of non-blocking transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferKind {
    /// One block from the FIFO to the device
    SingleWrite = 1,
    /// Several blocks from the FIFO to the device
    MultiWrite = 2,
    /// One block from the device into the FIFO
    SingleRead = 3,
    /// Several blocks from the device into the FIFO
    MultiRead = 4,
    /// The Extended CSD register into the FIFO
    ExtCsdRead = 5,
}

impl TransferKind {
    /// Failure reported when a step of this chain goes wrong
    pub const fn failure(self) -> MmcError {
        match self {
            TransferKind::SingleWrite => MmcError::SbwFail,
            TransferKind::MultiWrite => MmcError::MbwFail,
            TransferKind::SingleRead | TransferKind::ExtCsdRead => MmcError::SbrFail,
            TransferKind::MultiRead => MmcError::MbrFail,
        }
    }

    /// Data flows from the device
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            TransferKind::SingleRead | TransferKind::MultiRead | TransferKind::ExtCsdRead
        )
    }

    const fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(TransferKind::SingleWrite),
            2 => Some(TransferKind::MultiWrite),
            3 => Some(TransferKind::SingleRead),
            4 => Some(TransferKind::MultiRead),
            5 => Some(TransferKind::ExtCsdRead),
            _ => None,
        }
    }
}

/// Parameters of a started transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Transfer kind
    pub kind: TransferKind,
    /// First sector
    pub first_block: u32,
    /// Number of 512-byte blocks
    pub block_count: u16,
    /// Tick at which the transfer started
    pub start_tick: u32,
    /// Tick budget before the transfer is abandoned
    pub timeout_ticks: u32,
}

impl TransferRequest {
    /// Budget exceeded at tick `now`
    pub const fn overran(&self, now: u32) -> bool {
        timer::elapsed(self.start_tick, now) > self.timeout_ticks
    }
}

/// Point-in-time view of the transfer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSnapshot {
    /// Most recently started transfer
    pub request: Option<TransferRequest>,
    /// State machine position
    pub state: IsrState,
    /// Outcome so far
    pub outcome: TransferStatus,
    /// Error recorded while stopping an aborted transfer
    pub pending_error: Option<MmcError>,
}

/// Interrupt-side transfer context
#[derive(Debug)]
pub(crate) struct TransferContext {
    pub(crate) request: Option<TransferRequest>,
    pub(crate) state: IsrState,
    pub(crate) pending_error: Option<MmcError>,
}

impl TransferContext {
    pub(crate) const fn new() -> Self {
        Self {
            request: None,
            state: IsrState::Idle,
            pending_error: None,
        }
    }
}

/// Caller-visible transfer state
#[derive(Debug)]
pub(crate) struct Published {
    kind: AtomicU8,
    first_block: AtomicU32,
    block_count: AtomicU16,
    start_tick: AtomicU32,
    timeout_ticks: AtomicU32,
    state: AtomicU8,
    pending: AtomicU8,
    outcome: AtomicU32,
}

const NO_PENDING: u8 = 0xFF;

impl Published {
    pub(crate) const fn new() -> Self {
        Self {
            kind: AtomicU8::new(0),
            first_block: AtomicU32::new(0),
            block_count: AtomicU16::new(0),
            start_tick: AtomicU32::new(0),
            timeout_ticks: AtomicU32::new(0),
            state: AtomicU8::new(IsrState::Idle.encode()),
            pending: AtomicU8::new(NO_PENDING),
            outcome: AtomicU32::new(0),
        }
    }

    pub(crate) fn outcome(&self) -> TransferStatus {
        TransferStatus::decode(self.outcome.load(Ordering::Acquire))
    }

    fn request(&self) -> Option<TransferRequest> {
        let kind = TransferKind::from_u8(self.kind.load(Ordering::Relaxed))?;
        Some(TransferRequest {
            kind,
            first_block: self.first_block.load(Ordering::Relaxed),
            block_count: self.block_count.load(Ordering::Relaxed),
            start_tick: self.start_tick.load(Ordering::Relaxed),
            timeout_ticks: self.timeout_ticks.load(Ordering::Relaxed),
        })
    }

    fn begin(&self, request: &TransferRequest) {
        self.kind.store(request.kind as u8, Ordering::Relaxed);
        self.first_block.store(request.first_block, Ordering::Relaxed);
        self.block_count.store(request.block_count, Ordering::Relaxed);
        self.start_tick.store(request.start_tick, Ordering::Relaxed);
        self.timeout_ticks.store(request.timeout_ticks, Ordering::Relaxed);
        self.set_state(IsrState::start(request.kind));
        self.set_pending(None);
        self.outcome
            .store(TransferStatus::Processing.encode(), Ordering::Release);
    }

    pub(crate) fn set_state(&self, state: IsrState) {
        self.state.store(state.encode(), Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, err: Option<MmcError>) {
        let raw = err.map_or(NO_PENDING, |err| err as u8);
        self.pending.store(raw, Ordering::Relaxed);
    }

    /// Publish a final outcome unless one is already recorded
    pub(crate) fn finish(&self, outcome: TransferStatus) -> TransferStatus {
        match self.outcome.compare_exchange(
            TransferStatus::Processing.encode(),
            outcome.encode(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => outcome,
            Err(actual) => TransferStatus::decode(actual),
        }
    }

    pub(crate) fn force(&self, outcome: TransferStatus) {
        self.outcome.store(outcome.encode(), Ordering::Release);
    }

    fn snapshot(&self) -> TransferSnapshot {
        let outcome = self.outcome();
        TransferSnapshot {
            request: self.request(),
            state: IsrState::decode(self.state.load(Ordering::Relaxed)),
            outcome,
            pending_error: MmcError::from_index(self.pending.load(Ordering::Relaxed)),
        }
    }
}

impl<R: RegisterIo> CoreMmc<R> {
    /// Start writing the block in the FIFO to `sector`
    ///
    /// The FIFO must already hold the block's 128 words, or be fed before
    /// the controller's FIFO timeout expires.
    pub fn single_block_write_nb(&self, sector: u32, now: u32, timeout_ticks: u32) -> MmcResult<TransferStatus> {
        self.start_transfer(TransferKind::SingleWrite, sector, 1, now, timeout_ticks)
    }

    /// Start reading `sector` into the FIFO
    ///
    /// [`EXT_CSD_SECTOR`] reads the Extended CSD register instead.
    pub fn single_block_read_nb(&self, sector: u32, now: u32, timeout_ticks: u32) -> MmcResult<TransferStatus> {
        let kind = if sector == EXT_CSD_SECTOR {
            TransferKind::ExtCsdRead
        } else {
            TransferKind::SingleRead
        };
        self.start_transfer(kind, sector, 1, now, timeout_ticks)
    }

    /// Start writing `block_count` blocks from the FIFO at `first_block`
    pub fn multi_block_write(
        &self,
        first_block: u32,
        block_count: u16,
        now: u32,
        timeout_ticks: u32,
    ) -> MmcResult<TransferStatus> {
        self.start_transfer(TransferKind::MultiWrite, first_block, block_count, now, timeout_ticks)
    }

    /// Start reading `block_count` blocks at `first_block` into the FIFO
    pub fn multi_block_read(
        &self,
        first_block: u32,
        block_count: u16,
        now: u32,
        timeout_ticks: u32,
    ) -> MmcResult<TransferStatus> {
        self.start_transfer(TransferKind::MultiRead, first_block, block_count, now, timeout_ticks)
    }

    fn start_transfer(
        &self,
        kind: TransferKind,
        first_block: u32,
        block_count: u16,
        now: u32,
        timeout_ticks: u32,
    ) -> MmcResult<TransferStatus> {
        self.assert_initialized();
        assert!(timeout_ticks != 0, "coremmc: zero transfer timeout");
        assert!(block_count != 0, "coremmc: zero block count");
        assert!(
            block_count <= self.info().fifo_blocks(),
            "coremmc: {} blocks exceed the {}-block FIFO",
            block_count,
            self.info().fifo_blocks()
        );

        let request = TransferRequest {
            kind,
            first_block,
            block_count,
            start_tick: now,
            timeout_ticks,
        };

        // The interrupt line is live while a transfer is in flight, so the
        // rejection must not touch the context lock.
        if self.published.outcome().is_processing() {
            warn!("coremmc: {:?} rejected, transfer in flight", kind);
            return Err(MmcError::TransferInFlight);
        }

        // Every source is masked from here until IMR is rewritten below.
        {
            let mut ctx = self.transfer.lock();
            if self.published.outcome().is_processing() {
                warn!("coremmc: {:?} rejected, transfer in flight", kind);
                return Err(MmcError::TransferInFlight);
            }
            *ctx = TransferContext {
                request: Some(request),
                state: IsrState::start(kind),
                pending_error: None,
            };
            self.published.begin(&request);
        }

        self.regs.write32(regs::ICR, regs::CLEAR_ALL_32);
        if kind.is_read() {
            self.regs.write16(regs::MBCOUNT, block_count);
        }
        self.regs.write8(regs::IMR, regs::IMR_TRANSFER);
        send_command(&self.regs, RCA_ARG, Command::SendStatus, CommandCheck::Interrupt)?;

        debug!(
            "coremmc: {:?} started at sector {:#x}, {} block(s)",
            kind, first_block, block_count
        );
        Ok(TransferStatus::Processing)
    }

    /// Outcome of the current transfer at tick `now`
    ///
    /// A transfer still in flight past its budget is abandoned here: every
    /// interrupt source is masked and the outcome becomes
    /// `Failed(AppTimeoutFail)`. Later polls keep the sources masked.
    pub fn status(&self, now: u32) -> TransferStatus {
        let outcome = self.published.outcome();
        let overran = self.published.request().is_some_and(|req| req.overran(now));

        match outcome {
            TransferStatus::Processing if overran => {
                self.mask_and_clear();
                let timed_out = TransferStatus::Failed(MmcError::AppTimeoutFail);
                let outcome = self.published.finish(timed_out);
                if outcome == timed_out {
                    if let Some(mut ctx) = self.transfer.try_lock() {
                        ctx.state = IsrState::Error;
                    }
                    self.published.set_state(IsrState::Error);
                    warn!("coremmc: transfer abandoned after {} ticks", self.published.timeout_ticks.load(Ordering::Relaxed));
                }
                outcome
            }
            TransferStatus::Failed(MmcError::AppTimeoutFail) if overran => {
                self.mask_and_clear();
                outcome
            }
            _ => outcome,
        }
    }

    /// Current transfer slot contents
    pub fn snapshot(&self) -> TransferSnapshot {
        self.published.snapshot()
    }

    fn mask_and_clear(&self) {
        self.regs.write32(regs::IMR, regs::MASK_ALL_32);
        self.regs.write32(regs::ICR, regs::CLEAR_ALL_32);
    }
}
