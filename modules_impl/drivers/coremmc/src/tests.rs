//! End-to-end scenarios against the simulated controller

use coremmc_hal::{Deadline, RegisterIo, StepClock};

use crate::command::CardStatus;
use crate::regs::{self, BlockIrq, CmdIrq, IrqFlags, MultiIrq};
use crate::sim::{SimController, SIM_SECTOR_COUNT};
use crate::*;

fn bring_up_with(sim: SimController, params: &Params) -> (CoreMmc<SimController>, MmcResult<()>) {
    let clock = StepClock::new(0, 1);
    let mut mmc = CoreMmc::new(sim);
    let result = mmc.init(params, &Deadline::new(&clock, 100_000));
    (mmc, result)
}

fn bring_up() -> CoreMmc<SimController> {
    let (mmc, result) = bring_up_with(SimController::new(), &Params::new());
    result.unwrap();
    mmc
}

/// Deliver interrupts until the line drops
fn service(mmc: &CoreMmc<SimController>) -> usize {
    let mut delivered = 0;
    while mmc.regs().irq_pending() {
        mmc.on_interrupt();
        delivered += 1;
        assert!(delivered < 64, "interrupt storm");
    }
    delivered
}

fn pattern(seed: u32) -> Block {
    let mut block = [0u32; BLOCK_WORDS];
    for (n, word) in block.iter_mut().enumerate() {
        *word = seed.rotate_left(n as u32 % 32) ^ n as u32;
    }
    block
}

fn masked(mmc: &CoreMmc<SimController>) -> bool {
    mmc.regs().read32(regs::IMR) == regs::MASK_ALL_32
}

#[test]
fn test_status_idle_after_init() {
    let mmc = bring_up();
    assert_eq!(mmc.status(0), TransferStatus::Idle);
    let snap = mmc.snapshot();
    assert_eq!(snap.request, None);
    assert_eq!(snap.state, IsrState::Idle);
    assert!(masked(&mmc));
}

#[test]
fn test_nb_single_block_round_trip() {
    let mmc = bring_up();
    let block = pattern(0xDEAD_BEEF);

    mmc.init_fifo();
    mmc.fifo_push(&block);
    assert_eq!(mmc.single_block_write_nb(7, 10, 1_000), Ok(TransferStatus::Processing));
    assert_eq!(mmc.status(11), TransferStatus::Processing);
    assert!(service(&mmc) >= 3);
    assert_eq!(mmc.status(12), TransferStatus::Complete);
    assert_eq!(mmc.regs().sector(7), block);
    assert!(masked(&mmc));

    mmc.init_fifo();
    assert_eq!(mmc.single_block_read_nb(7, 20, 1_000), Ok(TransferStatus::Processing));
    service(&mmc);
    assert_eq!(mmc.status(21), TransferStatus::Complete);
    let mut back = [0u32; BLOCK_WORDS];
    mmc.fifo_pop(&mut back);
    assert_eq!(back, block);
    assert_eq!(mmc.snapshot().state, IsrState::Idle);
}

#[test]
fn test_nb_multi_block_round_trip() {
    let mmc = bring_up();

    for count in [2u16, 5, mmc.info().fifo_blocks()] {
        let first = 0x100 * count as u32;
        let blocks: Vec<Block> = (0..count as u32).map(|n| pattern(first + n)).collect();

        mmc.init_fifo();
        for block in &blocks {
            mmc.fifo_push(block);
        }
        assert_eq!(mmc.multi_block_write(first, count, 0, 1_000), Ok(TransferStatus::Processing));
        service(&mmc);
        assert_eq!(mmc.status(1), TransferStatus::Complete, "write of {} blocks", count);
        for (n, block) in blocks.iter().enumerate() {
            assert_eq!(&mmc.regs().sector(first + n as u32), block);
        }

        mmc.init_fifo();
        assert_eq!(mmc.multi_block_read(first, count, 0, 1_000), Ok(TransferStatus::Processing));
        service(&mmc);
        assert_eq!(mmc.status(1), TransferStatus::Complete, "read of {} blocks", count);
        let mut back = vec![0u32; count as usize * BLOCK_WORDS];
        mmc.fifo_pop(&mut back);
        for (chunk, block) in back.chunks_exact(BLOCK_WORDS).zip(&blocks) {
            assert_eq!(chunk, &block[..]);
        }
        assert!(masked(&mmc));
    }
}

#[test]
fn test_blocking_write_feeds_one_block() {
    let mmc = bring_up();
    let clock = StepClock::new(0, 1);
    let before = mmc.regs().wdr_writes();
    mmc.single_block_write(&pattern(3), 9, &Deadline::new(&clock, 10_000))
        .unwrap();
    assert_eq!(mmc.regs().wdr_writes() - before, BLOCK_WORDS);
    assert_eq!(mmc.regs().read32(regs::ISR), 0);
}

#[test]
fn test_nb_ext_csd_read() {
    let mmc = bring_up();
    let issued = mmc.regs().commands().len();

    mmc.init_fifo();
    mmc.single_block_read_nb(EXT_CSD_SECTOR, 0, 1_000).unwrap();
    assert_eq!(mmc.snapshot().request.map(|req| req.kind), Some(TransferKind::ExtCsdRead));
    service(&mmc);
    assert_eq!(mmc.status(1), TransferStatus::Complete);

    let commands = mmc.regs().commands();
    let sent = &commands[issued..];
    assert!(sent.contains(&(8, 0)));
    assert!(sent.iter().all(|&(index, _)| index != 17));

    let mut words = [0u32; BLOCK_WORDS];
    mmc.fifo_pop(&mut words);
    assert_eq!(ExtCsd::from_words(words).sector_count(), SIM_SECTOR_COUNT);
}

#[test]
fn test_fifo_timeout_aborts_transfer() {
    let mmc = bring_up();
    mmc.init_fifo();
    // FIFO left empty: the write never completes on its own
    mmc.single_block_write_nb(3, 0, 1_000).unwrap();
    service(&mmc);
    assert_eq!(mmc.status(1), TransferStatus::Processing);
    assert_eq!(mmc.snapshot().state, IsrState::SingleWrite(isr::SingleStep::AwaitDone));

    mmc.regs()
        .raise(IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::FIFO_TIMEOUT, MultiIrq::empty()));
    service(&mmc);

    assert_eq!(mmc.status(2), TransferStatus::Failed(MmcError::TimeoutFail));
    let snap = mmc.snapshot();
    assert_eq!(snap.state, IsrState::Error);
    assert_eq!(snap.pending_error, Some(MmcError::TimeoutFail));
    assert!(masked(&mmc));
}

#[test]
fn test_card_error_fails_chain() {
    let mmc = bring_up();
    mmc.regs()
        .card_mut(|card| card.fail_next = Some((24, CardStatus::ADDRESS_MISALIGN)));
    mmc.init_fifo();
    mmc.fifo_push(&pattern(1));
    mmc.single_block_write_nb(5, 0, 1_000).unwrap();
    service(&mmc);
    assert_eq!(mmc.status(1), TransferStatus::Failed(MmcError::SbwFail));
    assert_eq!(mmc.regs().sector(5), [0; BLOCK_WORDS]);
}

#[test]
fn test_multi_read_rejects_stale_fifo() {
    let mmc = bring_up();
    mmc.init_fifo();
    mmc.single_block_read_nb(0, 0, 1_000).unwrap();
    service(&mmc);
    assert_eq!(mmc.status(1), TransferStatus::Complete);
    assert_eq!(mmc.regs().read_fifo_len(), BLOCK_WORDS);

    // previous block still sitting in the read FIFO
    mmc.multi_block_read(0, 2, 2, 1_000).unwrap();
    service(&mmc);
    assert_eq!(mmc.status(3), TransferStatus::Failed(MmcError::MbrFail));
}

#[test]
fn test_application_timeout() {
    let mmc = bring_up();
    mmc.init_fifo();
    mmc.single_block_write_nb(3, 100, 50).unwrap();
    service(&mmc);

    assert_eq!(mmc.status(150), TransferStatus::Processing);
    assert_eq!(mmc.status(151), TransferStatus::Failed(MmcError::AppTimeoutFail));
    assert!(masked(&mmc));
    assert_eq!(mmc.snapshot().state, IsrState::Error);

    mmc.regs().write8(regs::IMR, regs::IMR_TRANSFER);
    assert_eq!(mmc.status(200), TransferStatus::Failed(MmcError::AppTimeoutFail));
    assert!(masked(&mmc));

    // a late interrupt does not rewrite the outcome
    mmc.on_interrupt();
    assert_eq!(mmc.status(201), TransferStatus::Failed(MmcError::AppTimeoutFail));
}

#[test]
fn test_completed_transfer_never_times_out() {
    let mmc = bring_up();
    mmc.init_fifo();
    mmc.fifo_push(&pattern(8));
    mmc.single_block_write_nb(8, 0, 10).unwrap();
    service(&mmc);
    assert_eq!(mmc.status(5), TransferStatus::Complete);
    assert_eq!(mmc.status(10_000), TransferStatus::Complete);
}

#[test]
fn test_blocking_write_crc_status_error() {
    let mmc = bring_up();
    mmc.regs()
        .corrupt_next_data(IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::CRC_STATUS_ERROR, MultiIrq::empty()));
    let clock = StepClock::new(0, 1);
    assert_eq!(
        mmc.single_block_write(&pattern(4), 4, &Deadline::new(&clock, 10_000)),
        Err(MmcError::CrcErr)
    );
    assert_eq!(mmc.regs().read32(regs::ISR), 0);

    // the next write goes through
    mmc.single_block_write(&pattern(4), 4, &Deadline::new(&clock, 10_000))
        .unwrap();
}

#[test]
fn test_blocking_read_data_crc_error() {
    let mmc = bring_up();
    mmc.regs()
        .corrupt_next_data(IrqFlags::from_parts(CmdIrq::empty(), BlockIrq::CRC_ERROR, MultiIrq::empty()));
    let clock = StepClock::new(0, 1);
    let mut block = [0u32; BLOCK_WORDS];
    assert_eq!(
        mmc.single_block_read(&mut block, 0, &Deadline::new(&clock, 10_000)),
        Err(MmcError::CrcErr)
    );
    assert_eq!(mmc.regs().read32(regs::ISR), 0);
}

#[test]
fn test_blocking_read_controller_error() {
    let mmc = bring_up();
    mmc.regs()
        .corrupt_next_data(IrqFlags::from_parts(CmdIrq::OVERRUN, BlockIrq::empty(), MultiIrq::empty()));
    let clock = StepClock::new(0, 1);
    let mut block = [0u32; BLOCK_WORDS];
    assert_eq!(
        mmc.single_block_read(&mut block, 0, &Deadline::new(&clock, 10_000)),
        Err(MmcError::ReadCtrlErr)
    );
}

#[test]
fn test_second_transfer_rejected() {
    let mmc = bring_up();
    mmc.init_fifo();
    mmc.single_block_write_nb(3, 0, 1_000).unwrap();

    assert_eq!(mmc.single_block_read_nb(4, 0, 1_000), Err(MmcError::TransferInFlight));
    assert_eq!(mmc.multi_block_write(4, 2, 0, 1_000), Err(MmcError::TransferInFlight));
    let clock = StepClock::new(0, 1);
    let mut block = [0u32; BLOCK_WORDS];
    assert_eq!(
        mmc.single_block_read(&mut block, 4, &Deadline::new(&clock, 1_000)),
        Err(MmcError::TransferInFlight)
    );

    let snap = mmc.snapshot();
    assert_eq!(snap.request.map(|req| req.first_block), Some(3));
    assert_eq!(snap.outcome, TransferStatus::Processing);
}

#[test]
fn test_rejection_leaves_context_lock_alone() {
    let mmc = bring_up();
    mmc.init_fifo();
    mmc.fifo_push(&pattern(5));
    mmc.single_block_write_nb(5, 0, 1_000).unwrap();
    assert!(mmc.regs().irq_pending());

    // the interrupt handler owns the context while the line is live
    let held = mmc.transfer.lock();
    assert_eq!(mmc.single_block_read_nb(6, 1, 1_000), Err(MmcError::TransferInFlight));
    assert_eq!(mmc.multi_block_read(6, 2, 1, 1_000), Err(MmcError::TransferInFlight));
    assert_eq!(mmc.status(2), TransferStatus::Processing);
    drop(held);

    service(&mmc);
    assert_eq!(mmc.status(3), TransferStatus::Complete);
    assert_eq!(mmc.regs().sector(5), pattern(5));
}

#[test]
fn test_interrupt_after_completion_fails_transfer() {
    let mmc = bring_up();
    mmc.init_fifo();
    mmc.fifo_push(&pattern(2));
    mmc.single_block_write_nb(2, 0, 1_000).unwrap();
    service(&mmc);
    assert_eq!(mmc.status(1), TransferStatus::Complete);

    mmc.on_interrupt();
    assert_eq!(mmc.status(2), TransferStatus::Failed(MmcError::IntStatusFail));
    assert_eq!(mmc.snapshot().state, IsrState::Error);
    assert!(masked(&mmc));
}

#[test]
fn test_spurious_interrupt() {
    let mmc = bring_up();
    mmc.on_interrupt();
    assert_eq!(mmc.status(0), TransferStatus::Failed(MmcError::IntStatusFail));
    assert_eq!(mmc.snapshot().state, IsrState::Error);
    assert!(masked(&mmc));
}

#[test]
#[should_panic]
fn test_oversized_transfer_panics() {
    let mmc = bring_up();
    let too_many = mmc.info().fifo_blocks() + 1;
    let _ = mmc.multi_block_read(0, too_many, 0, 1_000);
}

#[test]
#[should_panic]
fn test_zero_timeout_panics() {
    let mmc = bring_up();
    let _ = mmc.single_block_read_nb(0, 0, 0);
}

#[test]
fn test_init_with_custom_divider() {
    let sim = SimController::new();
    sim.card_mut(|card| card.set_sector_count(0x0123_4567));
    let (mmc, result) = bring_up_with(sim, &Params::with_clock_divider(4));
    assert_eq!(result, Ok(()));
    assert_eq!(mmc.sector_count(), 0x0123_4567);
    assert_eq!(mmc.info().clk_rate_div, 4);
    assert_eq!(mmc.regs().read8(regs::CLKR), 4);
    assert_eq!(mmc.regs().read32(regs::DATATO), Params::MAX_DATA_TIMEOUT);
}

#[test]
fn test_init_rejects_hw_revision() {
    let sim = SimController::new();
    sim.set_version(0x3A);
    let (mmc, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::UnsupportedHwRevision));
    assert!(!mmc.is_initialized());
    assert!(mmc.regs().commands().is_empty());
}

#[test]
fn test_init_requires_high_speed() {
    let sim = SimController::new();
    sim.card_mut(|card| card.ignore_hs_timing = true);
    let (mmc, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::ClkDivErr));
    assert!(!mmc.is_initialized());
}

#[test]
fn test_init_rejects_byte_addressing() {
    let sim = SimController::new();
    sim.card_mut(|card| card.access_mode = 0);
    let (_, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::UnsupportedAccessMode));
}

#[test]
fn test_init_rejects_sector_size() {
    let sim = SimController::new();
    sim.card_mut(|card| card.csd_sector_shift = 12);
    let (_, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::UnsupportedSectorSize));
}

#[test]
fn test_init_silent_device() {
    let sim = SimController::new();
    sim.set_silent(true);
    let (mmc, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::OpCondErr));
    assert_eq!(mmc.regs().read32(regs::ISR), 0);
}

#[test]
fn test_init_stalled_controller() {
    let sim = SimController::new();
    sim.set_stalled(true);
    let clock = StepClock::new(0, 1);
    let mut mmc = CoreMmc::new(sim);
    let result = mmc.init(&Params::new(), &Deadline::new(&clock, 500));
    assert_eq!(result, Err(MmcError::DeadlineExpired));
}

#[test]
fn test_init_reset_fault() {
    let sim = SimController::new();
    sim.fail_command(0, CmdIrq::TX_BIT_ERROR);
    let (mmc, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::ResetErr));
    assert_eq!(mmc.regs().commands(), vec![(0, 0)]);
}

#[test]
fn test_init_cid_not_answered() {
    let sim = SimController::new();
    sim.fail_command(2, CmdIrq::START_BIT_ERROR);
    let (mmc, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::CidRespErr));
    assert_eq!(mmc.regs().commands().last().map(|&(index, _)| index), Some(2));
}

#[test]
fn test_init_rca_rejected() {
    let sim = SimController::new();
    sim.card_mut(|card| card.fail_next = Some((3, CardStatus::COM_CRC_ERROR)));
    let (mmc, result) = bring_up_with(sim, &Params::new());
    assert_eq!(result, Err(MmcError::RcaError));
    assert!(!mmc.is_initialized());
}

#[test]
fn test_init_bus_width_errors() {
    // SELECT_CARD, then the bus-width SWITCH
    for (index, err) in [(7, CardStatus::ERROR), (6, CardStatus::SWITCH_ERROR)] {
        let sim = SimController::new();
        sim.card_mut(|card| card.fail_next = Some((index, err)));
        let (mmc, result) = bring_up_with(sim, &Params::new());
        assert_eq!(result, Err(MmcError::DwidthErr), "CMD{}", index);
        assert_eq!(mmc.regs().commands().last().map(|&(index, _)| index), Some(index));
    }
}
