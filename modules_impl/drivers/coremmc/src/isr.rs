//! # Interrupt State Machine
//!
//! Every non-blocking transfer is a chain of command checkpoints advanced
//! one interrupt at a time:
//!
//! ```text
//! CheckStatus (CMD13) -> [CheckBlockCount (CMD23)] -> CheckDataCommand -> AwaitDone
//!                                                     (CMD24/25/17/18/8)
//! ```
//!
//! Any error bit in the interrupt status diverts the chain into
//! `StopTransmission`, which waits for the device to settle back in the
//! transfer state before landing in `Error` with the recorded code.
//!
//! [`step`] is a pure transition function; [`CoreMmc::on_interrupt`]
//! gathers the inputs from the hardware and applies the resulting actions.

use coremmc_hal::RegisterIo;
use heapless::Vec;
use log::{debug, trace, warn};

use crate::command::{CardState, CardStatus, Command, RCA_ARG, STUFF_BITS};
use crate::device::CoreMmc;
use crate::error::{MmcError, TransferStatus};
use crate::interface::{send_command, CommandCheck};
use crate::regs::{self, BlockControl, BlockIrq, CmdIrq, IrqFlags, MultiBlockControl, MultiIrq, Status};
use crate::transfer::{TransferKind, TransferRequest};

// =============================================================================
// STATES
// =============================================================================

/// Position inside a single-block chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SingleStep {
    /// Waiting for the SEND_STATUS reply
    CheckStatus = 0,
    /// Waiting for the data command reply
    CheckDataCommand = 2,
    /// Waiting for the block-done interrupt
    AwaitDone = 3,
}

/// Position inside a multi-block chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MultiStep {
    /// Waiting for the SEND_STATUS reply
    CheckStatus = 0,
    /// Waiting for the SET_BLOCK_COUNT reply
    CheckBlockCount = 1,
    /// Waiting for the data command reply
    CheckDataCommand = 2,
    /// Waiting for the multi-block-done interrupt
    AwaitDone = 3,
}

impl SingleStep {
    const fn from_u8(val: u8) -> Self {
        match val {
            0 => SingleStep::CheckStatus,
            2 => SingleStep::CheckDataCommand,
            _ => SingleStep::AwaitDone,
        }
    }
}

impl MultiStep {
    const fn from_u8(val: u8) -> Self {
        match val {
            0 => MultiStep::CheckStatus,
            1 => MultiStep::CheckBlockCount,
            2 => MultiStep::CheckDataCommand,
            _ => MultiStep::AwaitDone,
        }
    }
}

/// Interrupt state machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrState {
    /// Single-block write chain
    SingleWrite(SingleStep),
    /// Multi-block write chain
    MultiWrite(MultiStep),
    /// Single-block read chain
    SingleRead(SingleStep),
    /// Multi-block read chain
    MultiRead(MultiStep),
    /// Extended CSD read chain
    ExtCsdRead(SingleStep),
    /// Aborting: waiting for the device to return to the transfer state
    StopTransmission,
    /// Last transfer completed
    Idle,
    /// Last transfer failed
    Error,
}

impl IsrState {
    /// First state of the chain for `kind`
    pub const fn start(kind: TransferKind) -> Self {
        match kind {
            TransferKind::SingleWrite => IsrState::SingleWrite(SingleStep::CheckStatus),
            TransferKind::MultiWrite => IsrState::MultiWrite(MultiStep::CheckStatus),
            TransferKind::SingleRead => IsrState::SingleRead(SingleStep::CheckStatus),
            TransferKind::MultiRead => IsrState::MultiRead(MultiStep::CheckStatus),
            TransferKind::ExtCsdRead => IsrState::ExtCsdRead(SingleStep::CheckStatus),
        }
    }

    /// No further interrupts are expected
    pub const fn is_terminal(self) -> bool {
        matches!(self, IsrState::Idle | IsrState::Error)
    }

    pub(crate) const fn encode(self) -> u8 {
        match self {
            IsrState::Idle => 0,
            IsrState::Error => 1,
            IsrState::StopTransmission => 2,
            IsrState::SingleWrite(step) => 0x10 | step as u8,
            IsrState::MultiWrite(step) => 0x20 | step as u8,
            IsrState::SingleRead(step) => 0x30 | step as u8,
            IsrState::MultiRead(step) => 0x40 | step as u8,
            IsrState::ExtCsdRead(step) => 0x50 | step as u8,
        }
    }

    pub(crate) const fn decode(raw: u8) -> Self {
        let single = SingleStep::from_u8(raw & 0xF);
        let multi = MultiStep::from_u8(raw & 0xF);
        match raw >> 4 {
            1 => IsrState::SingleWrite(single),
            2 => IsrState::MultiWrite(multi),
            3 => IsrState::SingleRead(single),
            4 => IsrState::MultiRead(multi),
            5 => IsrState::ExtCsdRead(single),
            _ => match raw {
                0 => IsrState::Idle,
                2 => IsrState::StopTransmission,
                _ => IsrState::Error,
            },
        }
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Hardware state captured at interrupt entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqEvent {
    /// All three interrupt status tiers
    pub flags: IrqFlags,
    /// Card status latched by the most recent R1 reply
    pub card: CardStatus,
    /// Read FIFO holds no data
    pub read_fifo_empty: bool,
}

/// Register work requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send a command; the reply arrives as the next interrupt
    Send(Command, u32),
    /// Program the multi-block count register
    SetBlockCount(u16),
    /// Enable single-block interrupt sources
    EnableBlockIrqs(u8),
    /// Enable multi-block interrupt sources
    EnableMultiIrqs(u8),
    /// Start a single-block write from the FIFO
    StartBlockWrite,
    /// Start a single-block read into the FIFO
    StartBlockRead,
    /// Start a multi-block write from the FIFO
    StartMultiWrite,
    /// Start a multi-block read into the FIFO
    StartMultiRead,
    /// Mask every interrupt source
    MaskAll,
}

/// Result of one state machine step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after this interrupt
    pub next: IsrState,
    /// Register work, in order
    pub actions: Vec<Action, 3>,
    /// Final outcome, when the transfer ends here
    pub outcome: Option<TransferStatus>,
    /// Error recorded for the abort path
    pub pending: Option<MmcError>,
}

impl Transition {
    fn to(next: IsrState) -> Self {
        Self {
            next,
            actions: Vec::new(),
            outcome: None,
            pending: None,
        }
    }

    fn with(mut self, action: Action) -> Self {
        let pushed = self.actions.push(action);
        debug_assert!(pushed.is_ok(), "transition action list overflow");
        self
    }

    fn poll_status(state: IsrState) -> Self {
        Self::to(state).with(Action::Send(Command::SendStatus, RCA_ARG))
    }

    fn complete() -> Self {
        let mut t = Self::to(IsrState::Idle).with(Action::MaskAll);
        t.outcome = Some(TransferStatus::Complete);
        t
    }

    fn fail(err: MmcError) -> Self {
        let mut t = Self::to(IsrState::Error).with(Action::MaskAll);
        t.outcome = Some(TransferStatus::Failed(err));
        t
    }

    fn abort(flags: IrqFlags) -> Self {
        let mut t = Self::poll_status(IsrState::StopTransmission);
        t.pending = Some(classify(flags));
        t
    }

    fn done_if(done: bool, err: MmcError) -> Self {
        if done {
            Self::complete()
        } else {
            Self::fail(err)
        }
    }
}

/// Map interrupt error bits to a failure code
pub const fn classify(flags: IrqFlags) -> MmcError {
    if flags.cmd().contains(CmdIrq::USER_ERROR) {
        MmcError::UserErrorFail
    } else if flags.fifo_timeout() {
        MmcError::TimeoutFail
    } else if flags.no_response() {
        MmcError::NoResponseFail
    } else {
        MmcError::OtherFail
    }
}

/// SEND_STATUS checkpoint shared by every chain
fn checkpoint(state: IsrState, card: CardStatus, err: MmcError, proceed: Transition) -> Transition {
    if !card.ready_for_data() || card.current_state() != CardState::Transfer {
        Transition::poll_status(state)
    } else if card.has_error() {
        Transition::fail(err)
    } else {
        proceed
    }
}

/// Advance the state machine by one interrupt
pub fn step(
    state: IsrState,
    event: &IrqEvent,
    request: &TransferRequest,
    pending: Option<MmcError>,
) -> Transition {
    match state {
        IsrState::Idle | IsrState::Error => Transition::fail(MmcError::IntStatusFail),
        _ if event.flags.has_error() => Transition::abort(event.flags),
        IsrState::SingleWrite(step) => single_write(step, event, request),
        IsrState::MultiWrite(step) => multi_write(step, event, request),
        IsrState::SingleRead(step) => single_read(step, event, request, false),
        IsrState::ExtCsdRead(step) => single_read(step, event, request, true),
        IsrState::MultiRead(step) => multi_read(step, event, request),
        IsrState::StopTransmission => stop_transmission(event, pending),
    }
}

fn single_write(step: SingleStep, event: &IrqEvent, request: &TransferRequest) -> Transition {
    let err = request.kind.failure();
    match step {
        SingleStep::CheckStatus => checkpoint(
            IsrState::SingleWrite(step),
            event.card,
            err,
            Transition::to(IsrState::SingleWrite(SingleStep::CheckDataCommand))
                .with(Action::Send(Command::WriteBlock, request.first_block)),
        ),
        SingleStep::CheckDataCommand if event.card.has_error() => Transition::fail(err),
        SingleStep::CheckDataCommand => Transition::to(IsrState::SingleWrite(SingleStep::AwaitDone))
            .with(Action::EnableBlockIrqs(regs::BIMR_SINGLE_WRITE))
            .with(Action::StartBlockWrite),
        SingleStep::AwaitDone => Transition::done_if(event.flags.block().contains(BlockIrq::WRITE_DONE), err),
    }
}

fn multi_write(step: MultiStep, event: &IrqEvent, request: &TransferRequest) -> Transition {
    let err = request.kind.failure();
    match step {
        MultiStep::CheckStatus => checkpoint(
            IsrState::MultiWrite(step),
            event.card,
            err,
            Transition::to(IsrState::MultiWrite(MultiStep::CheckBlockCount))
                .with(Action::Send(Command::SetBlockCount, request.block_count as u32)),
        ),
        MultiStep::CheckBlockCount if event.card.has_error() => Transition::fail(err),
        MultiStep::CheckBlockCount if !event.card.ready_for_data() => {
            Transition::poll_status(IsrState::MultiWrite(step))
        }
        MultiStep::CheckBlockCount => Transition::to(IsrState::MultiWrite(MultiStep::CheckDataCommand))
            .with(Action::SetBlockCount(request.block_count))
            .with(Action::Send(Command::WriteMultipleBlock, request.first_block)),
        MultiStep::CheckDataCommand if event.card.has_error() => Transition::fail(err),
        MultiStep::CheckDataCommand => Transition::to(IsrState::MultiWrite(MultiStep::AwaitDone))
            .with(Action::EnableMultiIrqs(regs::MBIMR_MULTI_WRITE))
            .with(Action::StartMultiWrite),
        MultiStep::AwaitDone => Transition::done_if(event.flags.multi().contains(MultiIrq::WRITE_DONE), err),
    }
}

fn single_read(step: SingleStep, event: &IrqEvent, request: &TransferRequest, ext_csd: bool) -> Transition {
    let err = request.kind.failure();
    let chain = |step| {
        if ext_csd {
            IsrState::ExtCsdRead(step)
        } else {
            IsrState::SingleRead(step)
        }
    };
    let data_command = if ext_csd {
        Action::Send(Command::SendExtCsd, 0)
    } else {
        Action::Send(Command::ReadSingleBlock, request.first_block)
    };
    match step {
        SingleStep::CheckStatus => checkpoint(
            chain(step),
            event.card,
            err,
            Transition::to(chain(SingleStep::CheckDataCommand))
                .with(Action::EnableBlockIrqs(regs::BIMR_SINGLE_READ))
                .with(Action::StartBlockRead)
                .with(data_command),
        ),
        SingleStep::CheckDataCommand if event.card.has_error() => Transition::fail(err),
        SingleStep::CheckDataCommand => Transition::to(chain(SingleStep::AwaitDone)),
        SingleStep::AwaitDone => Transition::done_if(event.flags.block().contains(BlockIrq::READ_DONE), err),
    }
}

fn multi_read(step: MultiStep, event: &IrqEvent, request: &TransferRequest) -> Transition {
    let err = request.kind.failure();
    match step {
        MultiStep::CheckStatus => checkpoint(
            IsrState::MultiRead(step),
            event.card,
            err,
            Transition::to(IsrState::MultiRead(MultiStep::CheckBlockCount))
                .with(Action::Send(Command::SetBlockCount, request.block_count as u32)),
        ),
        MultiStep::CheckBlockCount if event.card.has_error() => Transition::fail(err),
        MultiStep::CheckBlockCount if !event.card.ready_for_data() => {
            Transition::poll_status(IsrState::MultiRead(step))
        }
        // stale data would be read back as the first block
        MultiStep::CheckBlockCount if !event.read_fifo_empty => Transition::fail(err),
        MultiStep::CheckBlockCount => Transition::to(IsrState::MultiRead(MultiStep::CheckDataCommand))
            .with(Action::EnableMultiIrqs(regs::MBIMR_MULTI_READ))
            .with(Action::StartMultiRead)
            .with(Action::Send(Command::ReadMultipleBlock, request.first_block)),
        MultiStep::CheckDataCommand if event.card.has_error() => Transition::fail(err),
        MultiStep::CheckDataCommand => Transition::to(IsrState::MultiRead(MultiStep::AwaitDone)),
        MultiStep::AwaitDone => Transition::done_if(event.flags.multi().contains(MultiIrq::READ_DONE), err),
    }
}

fn stop_transmission(event: &IrqEvent, pending: Option<MmcError>) -> Transition {
    if !event.card.ready_for_data() || event.card.has_error() {
        Transition::poll_status(IsrState::StopTransmission)
    } else if event.card.current_state() != CardState::Transfer {
        Transition::to(IsrState::StopTransmission).with(Action::Send(Command::StopTransmission, STUFF_BITS))
    } else {
        Transition::fail(pending.unwrap_or(MmcError::OtherFail))
    }
}

// =============================================================================
// INTERRUPT ENTRY
// =============================================================================

impl<R: RegisterIo> CoreMmc<R> {
    /// CoreMMC interrupt handler
    ///
    /// The platform wires this to the controller's interrupt line. Each
    /// call acknowledges every pending source and advances the in-flight
    /// transfer by one step.
    pub fn on_interrupt(&self) {
        let flags = IrqFlags::from_bits_retain(self.regs.read32(regs::ISR));
        self.regs.write32(regs::ICR, regs::CLEAR_ALL_32);
        let event = IrqEvent {
            flags,
            card: CardStatus::from_response(self.regs.read32(regs::RR1)),
            read_fifo_empty: Status::from_bits_retain(self.regs.read8(regs::SR)).contains(Status::READ_FIFO_EMPTY),
        };

        let mut ctx = self.transfer.lock();
        let outcome = self.published.outcome();
        let active = match ctx.request {
            Some(request) if outcome.is_processing() && !ctx.state.is_terminal() => Some(request),
            _ => None,
        };
        let Some(request) = active else {
            // nothing in flight: the driver no longer knows what the core is doing
            self.regs.write32(regs::IMR, regs::MASK_ALL_32);
            ctx.state = IsrState::Error;
            self.published.set_state(IsrState::Error);
            // A completed transfer is reported failed too: an interrupt after
            // completion means the core's state is no longer known. Earlier
            // failures are kept.
            if matches!(outcome, TransferStatus::Idle | TransferStatus::Complete) {
                self.published.force(TransferStatus::Failed(MmcError::IntStatusFail));
            }
            warn!("coremmc: interrupt {:#08x} with no transfer in flight", flags.bits());
            return;
        };

        let transition = step(ctx.state, &event, &request, ctx.pending_error);
        trace!(
            "coremmc: isr {:?} -> {:?} flags={:#08x} card={:#010x}",
            ctx.state,
            transition.next,
            flags.bits(),
            event.card.0
        );

        for action in transition.actions.iter().copied() {
            self.apply(action);
        }

        if let Some(err) = transition.pending {
            debug!("coremmc: aborting {:?} transfer: {}", request.kind, err);
            ctx.pending_error = Some(err);
            self.published.set_pending(Some(err));
        }
        ctx.state = transition.next;
        self.published.set_state(transition.next);
        if let Some(outcome) = transition.outcome {
            if let TransferStatus::Failed(err) = outcome {
                debug!("coremmc: {:?} transfer failed: {} (status {:?})", request.kind, err, err.code());
            }
            self.published.finish(outcome);
        }
    }

    fn apply(&self, action: Action) {
        match action {
            Action::Send(cmd, arg) => {
                if let Err(err) = send_command(&self.regs, arg, cmd, CommandCheck::Interrupt) {
                    warn!("coremmc: CMD{} not sent: {}", cmd.index(), err);
                }
            }
            Action::SetBlockCount(count) => self.regs.write16(regs::MBCOUNT, count),
            Action::EnableBlockIrqs(mask) => self.regs.write8(regs::BIMR, mask),
            Action::EnableMultiIrqs(mask) => self.regs.write8(regs::MBIMR, mask),
            Action::StartBlockWrite => self.set_block_control(BlockControl::WRITE_START),
            Action::StartBlockRead => self.set_block_control(BlockControl::READ_START),
            Action::StartMultiWrite => self.set_multi_block_control(MultiBlockControl::WRITE_START),
            Action::StartMultiRead => self.set_multi_block_control(MultiBlockControl::READ_START),
            Action::MaskAll => self.regs.write32(regs::IMR, regs::MASK_ALL_32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::MultiIrq;

    fn request(kind: TransferKind, count: u16) -> TransferRequest {
        TransferRequest {
            kind,
            first_block: 0x40,
            block_count: count,
            start_tick: 0,
            timeout_ticks: 1_000,
        }
    }

    fn reply(state: CardState, ready: bool) -> IrqEvent {
        let mut bits = state.status_bits();
        if ready {
            bits |= CardStatus::READY_FOR_DATA;
        }
        IrqEvent {
            flags: IrqFlags::from_parts(CmdIrq::CMD_SENT | CmdIrq::RESPONSE, BlockIrq::empty(), MultiIrq::empty()),
            card: CardStatus(bits),
            read_fifo_empty: true,
        }
    }

    fn done(block: BlockIrq, multi: MultiIrq) -> IrqEvent {
        IrqEvent {
            flags: IrqFlags::from_parts(CmdIrq::empty(), block, multi),
            card: CardStatus(CardState::Transfer.status_bits() | CardStatus::READY_FOR_DATA),
            read_fifo_empty: true,
        }
    }

    fn run(mut state: IsrState, req: &TransferRequest, events: &[IrqEvent]) -> (IsrState, std::vec::Vec<Action>, Option<TransferStatus>) {
        let mut actions = std::vec::Vec::new();
        let mut outcome = None;
        let mut pending = None;
        for event in events {
            let t = step(state, event, req, pending);
            actions.extend(t.actions.iter().copied());
            pending = t.pending.or(pending);
            outcome = t.outcome.or(outcome);
            state = t.next;
        }
        (state, actions, outcome)
    }

    #[test]
    fn test_single_write_chain() {
        let req = request(TransferKind::SingleWrite, 1);
        let ready = reply(CardState::Transfer, true);
        let (state, actions, outcome) = run(
            IsrState::start(req.kind),
            &req,
            &[ready, ready, done(BlockIrq::WRITE_DONE, MultiIrq::empty())],
        );
        assert_eq!(state, IsrState::Idle);
        assert_eq!(outcome, Some(TransferStatus::Complete));
        assert_eq!(
            actions,
            [
                Action::Send(Command::WriteBlock, 0x40),
                Action::EnableBlockIrqs(regs::BIMR_SINGLE_WRITE),
                Action::StartBlockWrite,
                Action::MaskAll,
            ]
        );
    }

    #[test]
    fn test_multi_read_chain() {
        let req = request(TransferKind::MultiRead, 4);
        let ready = reply(CardState::Transfer, true);
        let (state, actions, outcome) = run(
            IsrState::start(req.kind),
            &req,
            &[ready, ready, ready, done(BlockIrq::empty(), MultiIrq::READ_DONE)],
        );
        assert_eq!(state, IsrState::Idle);
        assert_eq!(outcome, Some(TransferStatus::Complete));
        assert_eq!(actions[0], Action::Send(Command::SetBlockCount, 4));
        assert_eq!(actions[3], Action::Send(Command::ReadMultipleBlock, 0x40));
    }

    #[test]
    fn test_ext_csd_chain_uses_send_ext_csd() {
        let req = request(TransferKind::ExtCsdRead, 1);
        let t = step(IsrState::start(req.kind), &reply(CardState::Transfer, true), &req, None);
        assert_eq!(t.next, IsrState::ExtCsdRead(SingleStep::CheckDataCommand));
        assert_eq!(t.actions.last(), Some(&Action::Send(Command::SendExtCsd, 0)));
    }

    #[test]
    fn test_checkpoint_polls_until_ready() {
        let req = request(TransferKind::MultiWrite, 2);
        let start = IsrState::start(req.kind);

        let busy = step(start, &reply(CardState::Transfer, false), &req, None);
        assert_eq!(busy.next, start);
        assert_eq!(busy.actions.as_slice(), &[Action::Send(Command::SendStatus, RCA_ARG)]);

        let programming = step(start, &reply(CardState::Programming, true), &req, None);
        assert_eq!(programming.next, start);
        assert_eq!(programming.outcome, None);
    }

    #[test]
    fn test_card_error_fails_with_chain_code() {
        let req = request(TransferKind::SingleRead, 1);
        let mut event = reply(CardState::Transfer, true);
        event.card.0 |= CardStatus::OUT_OF_RANGE;
        let t = step(IsrState::start(req.kind), &event, &req, None);
        assert_eq!(t.next, IsrState::Error);
        assert_eq!(t.outcome, Some(TransferStatus::Failed(MmcError::SbrFail)));
        assert_eq!(t.actions.as_slice(), &[Action::MaskAll]);
    }

    #[test]
    fn test_missing_done_bit_fails() {
        let req = request(TransferKind::MultiWrite, 2);
        let t = step(IsrState::MultiWrite(MultiStep::AwaitDone), &reply(CardState::Transfer, true), &req, None);
        assert_eq!(t.outcome, Some(TransferStatus::Failed(MmcError::MbwFail)));
    }

    #[test]
    fn test_failure_code_follows_request_kind() {
        let mut rejected = reply(CardState::Transfer, true);
        rejected.card.0 |= CardStatus::ADDRESS_MISALIGN;
        for (kind, state) in [
            (TransferKind::SingleWrite, IsrState::SingleWrite(SingleStep::CheckDataCommand)),
            (TransferKind::ExtCsdRead, IsrState::ExtCsdRead(SingleStep::CheckDataCommand)),
            (TransferKind::MultiRead, IsrState::MultiRead(MultiStep::CheckDataCommand)),
        ] {
            let req = request(kind, 2);
            let t = step(state, &rejected, &req, None);
            assert_eq!(t.outcome, Some(TransferStatus::Failed(kind.failure())), "{:?}", kind);
        }
    }

    #[test]
    fn test_error_path_through_stop_transmission() {
        let req = request(TransferKind::SingleWrite, 1);
        let timeout = done(BlockIrq::FIFO_TIMEOUT, MultiIrq::empty());
        let (state, actions, outcome) = run(
            IsrState::SingleWrite(SingleStep::AwaitDone),
            &req,
            &[timeout, reply(CardState::ReceivingData, true), reply(CardState::Transfer, true)],
        );
        assert_eq!(state, IsrState::Error);
        assert_eq!(outcome, Some(TransferStatus::Failed(MmcError::TimeoutFail)));
        assert_eq!(
            actions,
            [
                Action::Send(Command::SendStatus, RCA_ARG),
                Action::Send(Command::StopTransmission, STUFF_BITS),
                Action::MaskAll,
            ]
        );
    }

    #[test]
    fn test_classify_priority() {
        let silent = IrqFlags::from_parts(CmdIrq::CMD_SENT | CmdIrq::START_BIT_ERROR, BlockIrq::empty(), MultiIrq::empty());
        assert_eq!(classify(silent), MmcError::NoResponseFail);

        let both = IrqFlags::from_parts(CmdIrq::USER_ERROR, BlockIrq::FIFO_TIMEOUT, MultiIrq::empty());
        assert_eq!(classify(both), MmcError::UserErrorFail);

        let multi_timeout = IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::empty(), MultiIrq::FIFO_TIMEOUT);
        assert_eq!(classify(multi_timeout), MmcError::TimeoutFail);

        let crc = IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::CRC_ERROR, MultiIrq::empty());
        assert_eq!(classify(crc), MmcError::OtherFail);
    }

    #[test]
    fn test_terminal_states_reject_interrupts() {
        let req = request(TransferKind::SingleRead, 1);
        let t = step(IsrState::Idle, &reply(CardState::Transfer, true), &req, None);
        assert_eq!(t.next, IsrState::Error);
        assert_eq!(t.outcome, Some(TransferStatus::Failed(MmcError::IntStatusFail)));
    }

    #[test]
    fn test_state_encoding() {
        let states = [
            IsrState::Idle,
            IsrState::Error,
            IsrState::StopTransmission,
            IsrState::SingleWrite(SingleStep::AwaitDone),
            IsrState::MultiWrite(MultiStep::CheckBlockCount),
            IsrState::SingleRead(SingleStep::CheckDataCommand),
            IsrState::MultiRead(MultiStep::CheckStatus),
            IsrState::ExtCsdRead(SingleStep::CheckStatus),
        ];
        for state in states {
            assert_eq!(IsrState::decode(state.encode()), state);
        }
    }
}
