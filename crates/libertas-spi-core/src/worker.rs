//! Link worker
//!
//! One thread per card owns the SPU once the card is up. It sleeps on the
//! wake signal; every wake-up reads the host interrupt status once and runs
//! the branches whose bits are set, always in the same order. A failing
//! branch is logged and the remaining ones still run.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_utils::atomic::AtomicCell;

use crate::bus::{ChipSelect, SpiBus};
use crate::error::{Error, Result};
use crate::host::Upcalls;
use crate::queue::{align4, Direction, QueuedPacket, TransferQueues};
use crate::regs::{
    HostIntStatus, CMD_BUF_SIZE, CMD_RDWRPORT, DATA_RDWRPORT, HOST_INT_STATUS, SCRATCH_1,
    SCRATCH_2, SCRATCH_3,
};
use crate::signal::{WakeSignal, WakeWaiter};
use crate::spu::Spu;

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "lbs_spi_thread";

/// Worker life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Asleep on the wake signal
    WaitingForWork,
    /// Running a dispatch cycle
    Dispatching,
    /// Shutdown observed, leaving the loop
    Terminating,
    /// Thread has exited and handed the SPU back
    Terminated,
}

/// Dispatch branches, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Command response from the card
    CmdUpload,
    /// Data frame from the card
    RxUpload,
    /// Card took the previous command and can accept another
    CmdDownload,
    /// Card can accept a data frame
    TxDownload,
    /// Card raised an event
    CardEvent,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Branch::CmdUpload => "c2h_cmd",
            Branch::RxUpload => "c2h_data",
            Branch::CmdDownload => "h2c_cmd",
            Branch::TxDownload => "h2c_data",
            Branch::CardEvent => "e2h",
        };
        f.write_str(name)
    }
}

/// What one dispatch cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Host interrupt status read at the start of the cycle
    pub status: Option<HostIntStatus>,
    /// Branches that ran, in order
    pub ran: Vec<Branch>,
    /// Branches that ran and failed
    pub failed: Vec<Branch>,
}

pub(crate) struct WorkerShared {
    run: AtomicCell<bool>,
    state: AtomicCell<WorkerState>,
}

/// The dispatch loop and the resources it owns
pub struct LinkWorker<B, C, U: ?Sized> {
    spu: Spu<B, C>,
    queues: Arc<TransferQueues>,
    upcalls: Arc<U>,
    shared: Arc<WorkerShared>,
    waiter: WakeWaiter,
    cmd_buffer: Vec<u8>,
}

impl<B, C, U> LinkWorker<B, C, U>
where
    B: SpiBus + 'static,
    C: ChipSelect + 'static,
    U: Upcalls + ?Sized + 'static,
{
    pub(crate) fn new(
        spu: Spu<B, C>,
        queues: Arc<TransferQueues>,
        upcalls: Arc<U>,
        waiter: WakeWaiter,
    ) -> Result<Self> {
        let mut cmd_buffer = Vec::new();
        cmd_buffer
            .try_reserve_exact(CMD_BUF_SIZE)
            .map_err(|_| Error::OutOfMemory)?;
        cmd_buffer.resize(CMD_BUF_SIZE, 0);

        Ok(Self {
            spu,
            queues,
            upcalls,
            shared: Arc::new(WorkerShared {
                run: AtomicCell::new(true),
                state: AtomicCell::new(WorkerState::WaitingForWork),
            }),
            waiter,
            cmd_buffer,
        })
    }

    /// Start the worker thread
    pub(crate) fn spawn(self, wake: WakeSignal) -> Result<WorkerHandle<B, C>> {
        let shared = self.shared.clone();
        let join = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || self.run())
            .map_err(Error::WorkerSpawn)?;
        Ok(WorkerHandle {
            shared,
            wake,
            join,
        })
    }

    fn run(mut self) -> Spu<B, C> {
        log::debug!("worker: started");
        loop {
            self.shared.state.store(WorkerState::WaitingForWork);
            self.waiter.wait();
            if !self.shared.run.load() {
                self.shared.state.store(WorkerState::Terminating);
                break;
            }
            self.shared.state.store(WorkerState::Dispatching);
            self.dispatch_cycle();
        }
        log::debug!("worker: terminating");
        self.shared.state.store(WorkerState::Terminated);
        self.spu
    }

    /// Read the host interrupt status and service every pending source
    pub fn dispatch_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let status = match self.spu.read_u16(HOST_INT_STATUS) {
            Ok(bits) => HostIntStatus::from_bits_truncate(bits),
            Err(e) => {
                log::error!("worker: I/O error reading host interrupt status: {}", e);
                return report;
            }
        };
        report.status = Some(status);
        log::trace!("worker: host interrupt status {:?}", status);

        if status.contains(HostIntStatus::CMD_UPLOAD_RDY) {
            let result = self.c2h_cmd();
            report.record(Branch::CmdUpload, result);
        }
        if status.contains(HostIntStatus::RX_UPLOAD_RDY) {
            let result = self.c2h_data();
            report.record(Branch::RxUpload, result);
        }
        if status.contains(HostIntStatus::CMD_DOWNLOAD_RDY) {
            self.upcalls
                .notify_prior_transfer_complete(Direction::Command);
            let result = self.h2c_next(Direction::Command);
            report.record(Branch::CmdDownload, result);
        }
        if status.contains(HostIntStatus::TX_DOWNLOAD_RDY) {
            let result = self.h2c_next(Direction::Data);
            report.record(Branch::TxDownload, result);
        }
        if status.contains(HostIntStatus::CARD_EVENT) {
            let result = self.e2h();
            report.record(Branch::CardEvent, result);
        }

        report
    }

    /// Length of the next upload, checked against the command buffer
    fn upload_len(&mut self, reg: u16) -> Result<usize> {
        let len = usize::from(self.spu.read_u16(reg)?);
        if len == 0 {
            return Err(Error::ProtocolViolation(
                "card has no data for host".into(),
            ));
        }
        if len > CMD_BUF_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "upload of {} bytes, but maximum is {}",
                len, CMD_BUF_SIZE
            )));
        }
        Ok(len)
    }

    /// Move a command response from the card to the host
    fn c2h_cmd(&mut self) -> Result<()> {
        let len = self.upload_len(SCRATCH_2)?;
        let buf = &mut self.cmd_buffer[..align4(len)];
        self.spu.read(CMD_RDWRPORT, buf)?;
        self.upcalls.deliver_command_response(&buf[..len])
    }

    /// Move a data frame from the card to the host
    fn c2h_data(&mut self) -> Result<()> {
        let len = self.upload_len(SCRATCH_1)?;
        let mut frame = Vec::new();
        frame
            .try_reserve_exact(align4(len))
            .map_err(|_| Error::OutOfMemory)?;
        frame.resize(align4(len), 0);
        self.spu.read(DATA_RDWRPORT, &mut frame)?;
        frame.truncate(len);
        self.upcalls.deliver_received_packet(frame)
    }

    /// Send the head of a queue, if there is one
    fn h2c_next(&mut self, direction: Direction) -> Result<()> {
        match self.queues.dequeue_head(direction) {
            Some(packet) => self.h2c(packet),
            None => Ok(()),
        }
    }

    /// Move a command or data frame from the host to the card
    fn h2c(&mut self, packet: QueuedPacket) -> Result<()> {
        let port = match packet.direction() {
            Direction::Command => CMD_RDWRPORT,
            Direction::Data => DATA_RDWRPORT,
        };
        log::trace!(
            "worker: sending {} packet ({} bytes)",
            packet.direction(),
            packet.len()
        );
        self.spu.write(port, packet.as_bytes())
    }

    /// Inform the host about a card event
    fn e2h(&mut self) -> Result<()> {
        let cause = self.spu.read_u32(SCRATCH_3)?;
        self.upcalls.deliver_event((cause & 0xff) as u8);
        Ok(())
    }
}

impl CycleReport {
    fn record(&mut self, branch: Branch, result: Result<()>) {
        self.ran.push(branch);
        if let Err(e) = result {
            log::error!("worker: {}: {}", branch, e);
            self.failed.push(branch);
        }
    }
}

/// Controller side of a running worker
pub struct WorkerHandle<B, C> {
    shared: Arc<WorkerShared>,
    wake: WakeSignal,
    join: JoinHandle<Spu<B, C>>,
}

impl<B, C> WorkerHandle<B, C> {
    /// Current worker state
    pub fn state(&self) -> WorkerState {
        self.shared.state.load()
    }

    /// Ask the worker to stop and wait until it has
    ///
    /// Returns the SPU the worker owned, or `None` if the thread panicked.
    pub fn terminate(self) -> Option<Spu<B, C>> {
        self.shared.run.store(false);
        self.wake.post();
        match self.join.join() {
            Ok(spu) => Some(spu),
            Err(_) => {
                log::error!("worker: thread panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::wake_pair;
    use crate::spu::SpuTiming;
    use crate::testutil::{MockBus, MockCard, MockCs};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        responses: Mutex<Vec<Vec<u8>>>,
        frames: Mutex<Vec<Vec<u8>>>,
        completions: Mutex<Vec<Direction>>,
        events: Mutex<Vec<u8>>,
        reject_frames: bool,
    }

    impl Upcalls for Recorder {
        fn deliver_command_response(&self, response: &[u8]) -> Result<()> {
            self.responses.lock().unwrap().push(response.to_vec());
            Ok(())
        }

        fn deliver_received_packet(&self, frame: Vec<u8>) -> Result<()> {
            if self.reject_frames {
                return Err(Error::OutOfMemory);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        fn notify_prior_transfer_complete(&self, direction: Direction) {
            self.completions.lock().unwrap().push(direction);
        }

        fn deliver_event(&self, cause: u8) {
            self.events.lock().unwrap().push(cause);
        }
    }

    struct Fixture {
        card: MockCard,
        queues: Arc<TransferQueues>,
        upcalls: Arc<Recorder>,
        worker: LinkWorker<MockBus, MockCs, Recorder>,
        wake: WakeSignal,
    }

    fn fixture(upcalls: Recorder) -> Fixture {
        let card = MockCard::new();
        let spu = Spu::new(card.bus(), card.cs(), SpuTiming::default());
        let queues = Arc::new(TransferQueues::new());
        let upcalls = Arc::new(upcalls);
        let (waiter, wake) = wake_pair();
        let worker = LinkWorker::new(spu, queues.clone(), upcalls.clone(), waiter).unwrap();
        Fixture {
            card,
            queues,
            upcalls,
            worker,
            wake,
        }
    }

    fn enqueue(queues: &TransferQueues, direction: Direction, bytes: &[u8]) {
        queues
            .enqueue(QueuedPacket::new(direction, bytes).unwrap())
            .unwrap();
    }

    #[test]
    fn test_branches_independent_when_cmd_upload_fails() {
        let mut fx = fixture(Recorder::default());
        {
            let mut st = fx.card.state();
            st.set_reg(HOST_INT_STATUS, HostIntStatus::all().bits().into());
            st.set_reg(SCRATCH_2, 0); // no response: protocol violation
            st.set_reg(SCRATCH_1, 3);
            st.push_port(DATA_RDWRPORT, &[1, 2, 3, 0]);
            st.set_reg(SCRATCH_3, 0x1234);
        }
        enqueue(&fx.queues, Direction::Command, &[0xc0, 0xde]);
        enqueue(&fx.queues, Direction::Data, &[0xda, 0x7a, 0x01]);

        let report = fx.worker.dispatch_cycle();
        assert_eq!(
            report.ran,
            vec![
                Branch::CmdUpload,
                Branch::RxUpload,
                Branch::CmdDownload,
                Branch::TxDownload,
                Branch::CardEvent
            ]
        );
        assert_eq!(report.failed, vec![Branch::CmdUpload]);

        assert!(fx.upcalls.responses.lock().unwrap().is_empty());
        assert_eq!(*fx.upcalls.frames.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(
            *fx.upcalls.completions.lock().unwrap(),
            vec![Direction::Command]
        );
        assert_eq!(*fx.upcalls.events.lock().unwrap(), vec![0x34]);

        let st = fx.card.state();
        assert_eq!(st.writes_to(CMD_RDWRPORT), vec![vec![0xc0, 0xde, 0, 0]]);
        assert_eq!(st.writes_to(DATA_RDWRPORT), vec![vec![0xda, 0x7a, 0x01, 0]]);
        assert_eq!(st.reads_of(CMD_RDWRPORT), 0);
        assert!(fx.queues.is_empty());
    }

    #[test]
    fn test_only_set_bits_run() {
        let mut fx = fixture(Recorder::default());
        fx.card
            .state()
            .set_reg(HOST_INT_STATUS, HostIntStatus::CARD_EVENT.bits().into());
        enqueue(&fx.queues, Direction::Command, &[1]);

        let report = fx.worker.dispatch_cycle();
        assert_eq!(report.ran, vec![Branch::CardEvent]);
        let st = fx.card.state();
        assert_eq!(st.reads_of(SCRATCH_2), 0);
        assert_eq!(st.reads_of(SCRATCH_1), 0);
        assert!(st.writes_to(CMD_RDWRPORT).is_empty());
        assert_eq!(fx.queues.len(Direction::Command), 1);
    }

    #[test]
    fn test_command_response_trimmed_to_length() {
        let mut fx = fixture(Recorder::default());
        {
            let mut st = fx.card.state();
            st.set_reg(HOST_INT_STATUS, HostIntStatus::CMD_UPLOAD_RDY.bits().into());
            st.set_reg(SCRATCH_2, 5);
            st.push_port(CMD_RDWRPORT, &[1, 2, 3, 4, 5, 0xee, 0xee, 0xee]);
        }
        let report = fx.worker.dispatch_cycle();
        assert!(report.failed.is_empty());
        assert_eq!(
            *fx.upcalls.responses.lock().unwrap(),
            vec![vec![1, 2, 3, 4, 5]]
        );
        // align4(5) bytes came off the port
        let st = fx.card.state();
        assert_eq!(st.port_data[&CMD_RDWRPORT].len(), 0);
    }

    #[test]
    fn test_oversized_upload_rejected() {
        let mut fx = fixture(Recorder::default());
        {
            let mut st = fx.card.state();
            st.set_reg(HOST_INT_STATUS, HostIntStatus::RX_UPLOAD_RDY.bits().into());
            st.set_reg(SCRATCH_1, (CMD_BUF_SIZE + 4) as u32);
        }
        let report = fx.worker.dispatch_cycle();
        assert_eq!(report.failed, vec![Branch::RxUpload]);
        assert_eq!(fx.card.state().reads_of(DATA_RDWRPORT), 0);
        assert!(fx.upcalls.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejected_frame_does_not_stop_cycle() {
        let mut fx = fixture(Recorder {
            reject_frames: true,
            ..Recorder::default()
        });
        {
            let mut st = fx.card.state();
            let bits = HostIntStatus::RX_UPLOAD_RDY | HostIntStatus::CARD_EVENT;
            st.set_reg(HOST_INT_STATUS, bits.bits().into());
            st.set_reg(SCRATCH_1, 4);
            st.set_reg(SCRATCH_3, 0x7);
        }
        let report = fx.worker.dispatch_cycle();
        assert_eq!(report.failed, vec![Branch::RxUpload]);
        assert_eq!(*fx.upcalls.events.lock().unwrap(), vec![0x7]);
    }

    #[test]
    fn test_command_fifo_order() {
        let mut fx = fixture(Recorder::default());
        fx.card
            .state()
            .set_reg(HOST_INT_STATUS, HostIntStatus::CMD_DOWNLOAD_RDY.bits().into());
        for i in 1..=3u8 {
            enqueue(&fx.queues, Direction::Command, &[i, i, i, i]);
        }
        for _ in 0..4 {
            fx.worker.dispatch_cycle();
        }
        let st = fx.card.state();
        assert_eq!(
            st.writes_to(CMD_RDWRPORT),
            vec![vec![1; 4], vec![2; 4], vec![3; 4]]
        );
        assert_eq!(fx.upcalls.completions.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_status_read_failure_skips_cycle() {
        let mut fx = fixture(Recorder::default());
        fx.card.state().fail_reads.insert(HOST_INT_STATUS);
        let report = fx.worker.dispatch_cycle();
        assert_eq!(report.status, None);
        assert!(report.ran.is_empty());
    }

    #[test]
    fn test_terminate_without_interrupt() {
        let fx = fixture(Recorder::default());
        let handle = fx.worker.spawn(fx.wake.clone()).unwrap();
        let spu = handle.terminate();
        assert!(spu.is_some());
        // No wake other than the shutdown one: the status register was never read
        assert_eq!(fx.card.state().reads_of(HOST_INT_STATUS), 0);
    }

    #[test]
    fn test_wake_runs_cycle_on_thread() {
        let fx = fixture(Recorder::default());
        fx.card
            .state()
            .set_reg(HOST_INT_STATUS, HostIntStatus::TX_DOWNLOAD_RDY.bits().into());
        let handle = fx.worker.spawn(fx.wake.clone()).unwrap();

        enqueue(&fx.queues, Direction::Data, &[9, 9]);
        fx.wake.post();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !fx.queues.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        handle.terminate().unwrap();
        assert_eq!(
            fx.card.state().writes_to(DATA_RDWRPORT),
            vec![vec![9, 9, 0, 0]]
        );
    }
}
