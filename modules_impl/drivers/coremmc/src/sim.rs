//! # Simulated CoreMMC
//!
//! A register-level model of the controller with a single eMMC device on
//! its bus. Commands execute the moment CR4 is written: the command-sent
//! and response-received flags rise together and the response registers
//! are filled in the controller's byte order.
//!
//! Data timing follows the hardware closely enough for the driver's
//! ordering assumptions to matter:
//! - a write completes once the start bit is set *and* the FIFO holds every
//!   block of it, raising the write-done bit immediately;
//! - a read pushes its data into the read FIFO when the command executes
//!   (if the read start bit was set first), but the read-done bit only
//!   rises after the response has been acknowledged through ICR.
//!
//! Faults are one-shot: card-status error bits on one reply, controller
//! error flags in place of one command, or error flags riding on the next
//! data-done bit.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use coremmc_hal::{PhysAddr, RegisterIo};
use spin::Mutex;

use crate::command::{CardState, CardStatus};
use crate::ext_csd::ext_csd;
use crate::regs::{self, BlockControl, BlockIrq, CmdIrq, Control, IrqFlags, MultiBlockControl, MultiIrq, Status};
use crate::{Block, BLOCK_SIZE, BLOCK_WORDS};

/// Base address reported by the simulation
pub const SIM_BASE: PhysAddr = PhysAddr::new(0x6001_0000);

/// Sector count programmed into a fresh device's Extended CSD
pub const SIM_SECTOR_COUNT: u32 = 0x0076_8000;

const REG_SPAN: usize = 0x54;

// Version register: revision 3, 8-bit data width, largest FIFO
const RESET_VR: u8 = 0x3B;

/// eMMC device model
#[derive(Debug)]
pub struct SimCard {
    /// Current card state
    pub state: CardState,
    /// Written sectors; unwritten sectors read back as zeros
    pub sectors: BTreeMap<u32, Block>,
    /// Extended CSD register
    pub ext_csd: [u8; BLOCK_SIZE],
    /// SEND_OP_COND replies still reporting power-up in progress
    pub op_cond_polls: u32,
    /// OCR access mode field
    pub access_mode: u8,
    /// log2 of the sector size reported in the CSD
    pub csd_sector_shift: u8,
    /// R1 replies still reporting not ready for data
    pub busy_polls: u32,
    /// Busy replies added by each SWITCH
    pub switch_busy_polls: u32,
    /// Leave HS_TIMING untouched when the host switches it
    pub ignore_hs_timing: bool,
    /// Error bits for the next reply to the given command index
    pub fail_next: Option<(u8, u32)>,
}

impl SimCard {
    /// A healthy, powered-down device
    pub fn new() -> Self {
        let mut ext = [0u8; BLOCK_SIZE];
        ext[ext_csd::SEC_COUNT..ext_csd::SEC_COUNT + 4].copy_from_slice(&SIM_SECTOR_COUNT.to_le_bytes());
        ext[ext_csd::EXT_CSD_REV] = 8;
        ext[ext_csd::CARD_TYPE] = 0x57;
        Self {
            state: CardState::Idle,
            sectors: BTreeMap::new(),
            ext_csd: ext,
            op_cond_polls: 2,
            access_mode: 2,
            csd_sector_shift: 9,
            busy_polls: 0,
            switch_busy_polls: 2,
            ignore_hs_timing: false,
            fail_next: None,
        }
    }

    /// Program SEC_COUNT
    pub fn set_sector_count(&mut self, count: u32) {
        self.ext_csd[ext_csd::SEC_COUNT..ext_csd::SEC_COUNT + 4].copy_from_slice(&count.to_le_bytes());
    }

    fn status(&mut self, index: u8) -> CardStatus {
        let mut bits = self.state.status_bits();
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
        } else {
            bits |= CardStatus::READY_FOR_DATA;
        }
        if let Some((target, err)) = self.fail_next {
            if target == index {
                bits |= err;
                self.fail_next = None;
            }
        }
        CardStatus(bits)
    }

    fn ext_csd_words(&self) -> Block {
        words_from_bytes(&self.ext_csd)
    }
}

impl Default for SimCard {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    first: u32,
    blocks: u32,
    multi: bool,
    started: bool,
}

#[derive(Debug)]
struct SimState {
    regs: [u8; REG_SPAN],
    card: SimCard,
    write_fifo: VecDeque<u32>,
    read_fifo: VecDeque<u32>,
    pending_write: Option<PendingWrite>,
    read_armed: bool,
    multi_read_armed: bool,
    deferred: IrqFlags,
    wdr_writes: usize,
    commands: Vec<(u8, u32)>,
    silent: bool,
    stalled: bool,
    command_fault: Option<(u8, CmdIrq)>,
    data_fault: IrqFlags,
}

/// Simulated controller implementing [`RegisterIo`]
#[derive(Debug)]
pub struct SimController {
    state: Mutex<SimState>,
}

impl SimController {
    /// Controller out of reset with a fresh device attached
    pub fn new() -> Self {
        let mut regs = [0u8; REG_SPAN];
        regs[regs::VR] = RESET_VR;
        regs[regs::VR_MAJ] = 3;
        regs[regs::VR_MIN] = 1;
        regs[regs::BLOCK_LEN..regs::BLOCK_LEN + 4].copy_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
        Self {
            state: Mutex::new(SimState {
                regs,
                card: SimCard::new(),
                write_fifo: VecDeque::new(),
                read_fifo: VecDeque::new(),
                pending_write: None,
                read_armed: false,
                multi_read_armed: false,
                deferred: IrqFlags::empty(),
                wdr_writes: 0,
                commands: Vec::new(),
                silent: false,
                stalled: false,
                command_fault: None,
                data_fault: IrqFlags::empty(),
            }),
        }
    }

    /// Inspect or reconfigure the attached device
    pub fn card_mut<T>(&self, f: impl FnOnce(&mut SimCard) -> T) -> T {
        f(&mut self.state.lock().card)
    }

    /// Override the version register
    pub fn set_version(&self, vr: u8) {
        self.state.lock().regs[regs::VR] = vr;
    }

    /// Device stops answering: commands go out, start bits never come back
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Controller stops reacting to commands at all
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// The next `index` command latches `flags` with command-sent and is
    /// otherwise dropped
    pub fn fail_command(&self, index: u8, flags: CmdIrq) {
        self.state.lock().command_fault = Some((index, flags));
    }

    /// Raise `flags` alongside the next data-done bit
    pub fn corrupt_next_data(&self, flags: IrqFlags) {
        self.state.lock().data_fault = flags;
    }

    /// Raise interrupt status bits as the hardware would
    pub fn raise(&self, flags: IrqFlags) {
        self.state.lock().raise(flags);
    }

    /// Would the interrupt line be asserted
    pub fn irq_pending(&self) -> bool {
        let state = self.state.lock();
        (0..3).any(|tier| state.regs[regs::ISR + tier] & state.regs[regs::IMR + tier] != 0)
    }

    /// Every command sent, as (index, argument)
    pub fn commands(&self) -> Vec<(u8, u32)> {
        self.state.lock().commands.clone()
    }

    /// Number of 32-bit writes to the FIFO write port
    pub fn wdr_writes(&self) -> usize {
        self.state.lock().wdr_writes
    }

    /// Contents of a sector
    pub fn sector(&self, sector: u32) -> Block {
        self.state.lock().card.sectors.get(&sector).copied().unwrap_or([0; BLOCK_WORDS])
    }

    /// Words waiting in the read FIFO
    pub fn read_fifo_len(&self) -> usize {
        self.state.lock().read_fifo.len()
    }
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn raise(&mut self, flags: IrqFlags) {
        let bits = flags.bits().to_le_bytes();
        for (tier, bits) in bits.iter().take(3).enumerate() {
            self.regs[regs::ISR + tier] |= bits;
        }
    }

    fn byte(&self, offset: usize) -> u8 {
        if offset == regs::SR {
            let mut sr = Status::empty();
            if self.read_fifo.is_empty() {
                sr |= Status::READ_FIFO_EMPTY | Status::READ_DATA_EMPTY;
            }
            if self.write_fifo.is_empty() {
                sr |= Status::WRITE_FIFO_EMPTY;
            }
            return sr.bits();
        }
        self.regs[offset]
    }

    fn clear(&mut self, tier: usize, bits: u8) {
        self.regs[regs::ISR + tier] &= !bits;
    }

    /// `done` plus any injected data fault
    fn data_done(&mut self, done: IrqFlags) -> IrqFlags {
        done | core::mem::replace(&mut self.data_fault, IrqFlags::empty())
    }

    fn acknowledge(&mut self) {
        let deferred = core::mem::replace(&mut self.deferred, IrqFlags::empty());
        self.raise(deferred);
    }

    fn store8(&mut self, offset: usize, value: u8) {
        match offset {
            regs::CR4 => {
                self.regs[offset] = value;
                self.execute();
            }
            regs::ICR | regs::BICR | regs::MBICR => {
                self.clear(offset - regs::ICR, value);
                self.acknowledge();
            }
            regs::CTRL => {
                let ctrl = Control::from_bits_retain(value);
                if ctrl.contains(Control::RESET_FIFO) {
                    self.write_fifo.clear();
                    self.read_fifo.clear();
                }
                self.regs[offset] = (ctrl - Control::RESET_FIFO).bits();
            }
            regs::BCSR => {
                let bcsr = BlockControl::from_bits_retain(value);
                if bcsr.contains(BlockControl::READ_START) {
                    self.read_armed = true;
                }
                if bcsr.contains(BlockControl::WRITE_START) {
                    self.start_write(false);
                }
                self.regs[offset] = (bcsr - BlockControl::READ_START - BlockControl::WRITE_START).bits();
            }
            regs::MBCSR => {
                let mbcsr = MultiBlockControl::from_bits_retain(value);
                if mbcsr.contains(MultiBlockControl::READ_START) {
                    self.multi_read_armed = true;
                }
                if mbcsr.contains(MultiBlockControl::WRITE_START) {
                    self.start_write(true);
                }
                self.regs[offset] =
                    (mbcsr - MultiBlockControl::READ_START - MultiBlockControl::WRITE_START).bits();
            }
            _ => self.regs[offset] = value,
        }
    }

    fn start_write(&mut self, multi: bool) {
        if let Some(pending) = self.pending_write.as_mut() {
            if pending.multi == multi {
                pending.started = true;
            }
        }
        self.try_commit();
    }

    fn try_commit(&mut self) {
        let Some(pending) = self.pending_write else {
            return;
        };
        let needed = pending.blocks as usize * BLOCK_WORDS;
        if !pending.started || self.write_fifo.len() < needed {
            return;
        }
        for n in 0..pending.blocks {
            let mut block = [0u32; BLOCK_WORDS];
            for word in block.iter_mut() {
                *word = self.write_fifo.pop_front().unwrap_or(0);
            }
            self.card.sectors.insert(pending.first.wrapping_add(n), block);
        }
        self.pending_write = None;
        let done = if pending.multi {
            IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::empty(), MultiIrq::WRITE_DONE)
        } else {
            IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::WRITE_DONE, MultiIrq::empty())
        };
        let done = self.data_done(done);
        self.raise(done);
    }

    fn respond_r1(&mut self, index: u8) -> CardStatus {
        let status = self.card.status(index);
        self.regs[regs::RR1..regs::RR1 + 4].copy_from_slice(&status.0.to_be_bytes());
        self.raise(IrqFlags::from_parts(CmdIrq::CMD_SENT | CmdIrq::RESPONSE, BlockIrq::empty(), MultiIrq::empty()));
        status
    }

    fn respond_bytes(&mut self, bytes: &[u8]) {
        self.regs[regs::RR1..regs::RR1 + bytes.len()].copy_from_slice(bytes);
        self.raise(IrqFlags::from_parts(CmdIrq::CMD_SENT | CmdIrq::RESPONSE, BlockIrq::empty(), MultiIrq::empty()));
    }

    fn multi_count(&self) -> u32 {
        u16::from_le_bytes([self.regs[regs::MBCOUNT], self.regs[regs::MBCOUNT + 1]]) as u32
    }

    fn sector(&self, sector: u32) -> Block {
        self.card.sectors.get(&sector).copied().unwrap_or([0; BLOCK_WORDS])
    }

    fn execute(&mut self) {
        let index = self.regs[regs::CR0];
        let arg = u32::from_be_bytes([
            self.regs[regs::CR1],
            self.regs[regs::CR2],
            self.regs[regs::CR3],
            self.regs[regs::CR4],
        ]);
        self.commands.push((index, arg));

        if self.stalled {
            return;
        }
        if let Some((target, flags)) = self.command_fault {
            if target == index {
                self.command_fault = None;
                self.raise(IrqFlags::from_parts(CmdIrq::CMD_SENT | flags, BlockIrq::empty(), MultiIrq::empty()));
                return;
            }
        }
        if self.silent {
            self.raise(IrqFlags::from_parts(
                CmdIrq::CMD_SENT | CmdIrq::START_BIT_ERROR,
                BlockIrq::empty(),
                MultiIrq::empty(),
            ));
            return;
        }

        match index {
            // GO_IDLE_STATE, SET_DSR, GO_INACTIVE_STATE
            0 | 4 | 15 => {
                if index == 0 {
                    self.card.state = CardState::Idle;
                }
                self.raise(IrqFlags::from_parts(CmdIrq::CMD_SENT, BlockIrq::empty(), MultiIrq::empty()));
            }
            // SEND_OP_COND
            1 => {
                let mut ocr = (self.card.access_mode & 0x3) << 5;
                if self.card.op_cond_polls > 0 {
                    self.card.op_cond_polls -= 1;
                } else {
                    ocr |= 0x80;
                    self.card.state = CardState::Ready;
                }
                self.respond_bytes(&[ocr, 0xFF, 0x80, 0x80]);
            }
            // ALL_SEND_CID
            2 => {
                self.card.state = CardState::Identification;
                self.respond_bytes(&[0x15, 0x01, 0x00, b'C', b'M', b'M', b'C', b'S']);
            }
            // SET_RELATIVE_ADDR
            3 => {
                self.respond_r1(index);
                self.card.state = CardState::Standby;
            }
            // SWITCH
            6 => {
                let access = (arg >> 24) & 0x3;
                let field = ((arg >> 16) & 0xFF) as usize;
                let value = ((arg >> 8) & 0xFF) as u8;
                if access == 3 && !(field == ext_csd::HS_TIMING && self.card.ignore_hs_timing) {
                    self.card.ext_csd[field] = value;
                }
                self.card.busy_polls += self.card.switch_busy_polls;
                self.respond_r1(index);
            }
            // SELECT_CARD
            7 => {
                self.respond_r1(index);
                self.card.state = CardState::Transfer;
            }
            // SEND_EXT_CSD
            8 => {
                let status = self.respond_r1(index);
                if self.read_armed && !status.has_error() {
                    let words = self.card.ext_csd_words();
                    self.read_fifo.extend(words.iter().copied());
                    let done = self.data_done(IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::READ_DONE, MultiIrq::empty()));
                    self.deferred |= done;
                    self.read_armed = false;
                }
            }
            // SEND_CSD
            9 => {
                let mut bytes = [0u8; 15];
                let shift = self.card.csd_sector_shift;
                bytes[regs::RR12 - regs::RR1] = (shift >> 2) & 0x3;
                bytes[regs::RR13 - regs::RR1] = (shift & 0x3) << 6;
                self.respond_bytes(&bytes);
            }
            // STOP_TRANSMISSION
            12 => {
                self.respond_r1(index);
                self.card.state = CardState::Transfer;
            }
            // READ_SINGLE_BLOCK
            17 => {
                let status = self.respond_r1(index);
                if self.read_armed && !status.has_error() {
                    let block = self.sector(arg);
                    self.read_fifo.extend(block.iter().copied());
                    let done = self.data_done(IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::READ_DONE, MultiIrq::empty()));
                    self.deferred |= done;
                    self.read_armed = false;
                }
            }
            // READ_MULTIPLE_BLOCK
            18 => {
                let status = self.respond_r1(index);
                if self.multi_read_armed && !status.has_error() {
                    for n in 0..self.multi_count() {
                        let block = self.sector(arg.wrapping_add(n));
                        self.read_fifo.extend(block.iter().copied());
                    }
                    let done = self.data_done(IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::empty(), MultiIrq::READ_DONE));
                    self.deferred |= done;
                    self.multi_read_armed = false;
                }
            }
            // WRITE_BLOCK, WRITE_MULTIPLE_BLOCK
            24 | 25 => {
                let status = self.respond_r1(index);
                if !status.has_error() {
                    let multi = index == 25;
                    let blocks = if multi { self.multi_count() } else { 1 };
                    self.pending_write = Some(PendingWrite {
                        first: arg,
                        blocks,
                        multi,
                        started: false,
                    });
                }
            }
            // SEND_STATUS, SET_BLOCK_COUNT
            _ => {
                if ![13, 23].contains(&index) {
                    self.card.fail_next = Some((index, CardStatus::ILLEGAL_COMMAND));
                }
                self.respond_r1(index);
            }
        }
    }
}

fn words_from_bytes(bytes: &[u8; BLOCK_SIZE]) -> Block {
    let mut words = [0u32; BLOCK_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

impl RegisterIo for SimController {
    fn base(&self) -> PhysAddr {
        SIM_BASE
    }

    fn read8(&self, offset: usize) -> u8 {
        self.state.lock().byte(offset)
    }

    fn write8(&self, offset: usize, value: u8) {
        self.state.lock().store8(offset, value);
    }

    fn read16(&self, offset: usize) -> u16 {
        let state = self.state.lock();
        u16::from_le_bytes([state.byte(offset), state.byte(offset + 1)])
    }

    fn write16(&self, offset: usize, value: u16) {
        let mut state = self.state.lock();
        let [lo, hi] = value.to_le_bytes();
        state.regs[offset] = lo;
        state.regs[offset + 1] = hi;
    }

    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock();
        if offset == regs::RDR {
            return state.read_fifo.pop_front().unwrap_or(0);
        }
        u32::from_le_bytes([
            state.byte(offset),
            state.byte(offset + 1),
            state.byte(offset + 2),
            state.byte(offset + 3),
        ])
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        match offset {
            regs::WDR => {
                state.write_fifo.push_back(value);
                state.wdr_writes += 1;
                state.try_commit();
            }
            regs::ICR => {
                for (tier, bits) in value.to_le_bytes().iter().take(3).enumerate() {
                    state.clear(tier, *bits);
                }
                state.acknowledge();
            }
            _ => state.regs[offset..offset + 4].copy_from_slice(&value.to_le_bytes()),
        }
    }
}
