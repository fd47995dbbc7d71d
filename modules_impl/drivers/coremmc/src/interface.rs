//! # Command Interface
//!
//! Issues one command to the controller and interprets the reply. The
//! blocking helpers here poll the interrupt status register directly; the
//! interrupt-driven path only uses [`send_command`] with
//! [`CommandCheck::Interrupt`] and lets the state machine see the reply.

use coremmc_hal::{Deadline, RegisterIo};

use crate::command::{CardStatus, Command, ResponseClass, RCA_ARG};
use crate::error::{MmcError, MmcResult};
use crate::regs::{self, CmdIrq, IrqFlags};

/// How [`send_command`] confirms the command left the controller
#[derive(Debug, Clone, Copy)]
pub enum CommandCheck<'a> {
    /// Spin on the command-sent flag until the deadline
    Poll(&'a Deadline<'a>),
    /// The interrupt handler will see the command-sent flag
    Interrupt,
    /// No confirmation
    None,
}

/// A reply that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Device answered and is ready for data
    Ready,
    /// Device answered but is still busy
    Busy,
}

/// Write `cmd` and `arg` to the command registers
///
/// The argument goes out most significant byte first; the final write to
/// CR4 starts transmission.
pub fn send_command<R: RegisterIo + ?Sized>(
    regs: &R,
    arg: u32,
    cmd: Command,
    check: CommandCheck<'_>,
) -> MmcResult<()> {
    let [b3, b2, b1, b0] = arg.to_be_bytes();
    regs.write8(regs::CR0, cmd.index());
    regs.write8(regs::CR1, b3);
    regs.write8(regs::CR2, b2);
    regs.write8(regs::CR3, b1);
    regs.write8(regs::CR4, b0);

    match check {
        CommandCheck::Poll(deadline) => {
            while !CmdIrq::from_bits_retain(regs.read8(regs::ISR)).contains(CmdIrq::CMD_SENT) {
                deadline.check()?;
                core::hint::spin_loop();
            }
        }
        CommandCheck::Interrupt | CommandCheck::None => {}
    }
    Ok(())
}

/// Classify an R1 card-status word
pub const fn parse_r1(status: CardStatus) -> MmcResult<Reply> {
    if status.has_error() {
        Err(MmcError::TransferFail)
    } else if status.ready_for_data() {
        Ok(Reply::Ready)
    } else {
        Ok(Reply::Busy)
    }
}

/// Send a command and wait for its reply
///
/// Interrupt flags are cleared before the command is sent and again once
/// the reply has been read. A reply that never arrives, an R1 status
/// with error bits, or a transmit fault on a command without a response is
/// `Err(TransferFail)`.
pub fn issue_command<R: RegisterIo + ?Sized>(
    regs: &R,
    arg: u32,
    cmd: Command,
    deadline: &Deadline<'_>,
) -> MmcResult<Reply> {
    regs.write32(regs::ICR, regs::CLEAR_ALL_32);
    let reply = exchange(regs, arg, cmd, deadline);
    regs.write32(regs::ICR, regs::CLEAR_ALL_32);

    log::trace!("coremmc: CMD{} arg={:#010x} -> {:?}", cmd.index(), arg, reply);
    reply
}

fn exchange<R: RegisterIo + ?Sized>(
    regs: &R,
    arg: u32,
    cmd: Command,
    deadline: &Deadline<'_>,
) -> MmcResult<Reply> {
    send_command(regs, arg, cmd, CommandCheck::Poll(deadline))?;

    if cmd.response() == ResponseClass::None {
        // nothing comes back; only a transmit fault can be seen
        let sent = CmdIrq::from_bits_retain(regs.read8(regs::ISR));
        if sent.contains(CmdIrq::TX_BIT_ERROR) {
            return Err(MmcError::TransferFail);
        }
        return Ok(Reply::Ready);
    }

    let flags = loop {
        let flags = IrqFlags::from_bits_retain(regs.read32(regs::ISR));
        if flags.cmd().intersects(CmdIrq::RESPONSE_WAIT) || flags.has_error() {
            break flags;
        }
        deadline.check()?;
        core::hint::spin_loop();
    };

    if !flags.cmd().contains(CmdIrq::RESPONSE) {
        return Err(MmcError::TransferFail);
    }
    if !cmd.has_card_status() {
        return Ok(Reply::Ready);
    }
    parse_r1(CardStatus::from_response(regs.read32(regs::RR1)))
}

/// Poll SEND_STATUS until the device reports ready for data
pub fn wait_ready<R: RegisterIo + ?Sized>(regs: &R, deadline: &Deadline<'_>) -> MmcResult<()> {
    loop {
        match issue_command(regs, RCA_ARG, Command::SendStatus, deadline)? {
            Reply::Ready => return Ok(()),
            Reply::Busy => deadline.check()?,
        }
    }
}
