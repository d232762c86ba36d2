//! Per-device polling session.
//!
//! One session owns one device end to end: connect, subscribe, command
//! cycle, error recovery. It is the only writer of its device's slot in the
//! [`DeviceStateStore`]. The lifecycle is an explicit state machine
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Polling
//!       ^                                       |
//!       +------------- link failure ------------+
//! ```
//!
//! with no terminal state other than the global stop signal, which is honored
//! at every wait point. Reconnects repeat forever with capped exponential
//! backoff so a field deployment heals without operator intervention.

use crate::{
    log,
    logger::SampleLogger,
    profile::Profile,
    protocol::{decode_frame, read_command, FrameAssembler, FrameKind},
    store::DeviceStateStore,
    transport::{NotifyStream, Transport},
    types::{CellVoltages, DeviceConfig, PackStatus, Record},
    utils::timestamp_hms,
    Error, ErrorKind, Result,
};
use core::time::Duration;
use futures::StreamExt;
use pretty_hex::PrettyHex;
use tokio::{
    select,
    sync::watch,
    time::{sleep, sleep_until, Instant},
};

/// Session timing parameters
#[derive(Clone, Copy, Debug)]
pub struct Timings {
    /// Wait after a command before draining the assembler
    pub settle: Duration,
    /// Pause between poll cycles
    pub poll: Duration,
    /// Wait after subscribing before the first command
    pub subscribe_settle: Duration,
    /// First reconnect delay
    pub backoff_initial: Duration,
    /// Reconnect delay cap
    pub backoff_max: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            poll: Duration::from_secs(5),
            subscribe_settle: Duration::from_secs(1),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

enum SessionState {
    /// Link is down; reconnect after the delay
    Disconnected { delay: Duration },
    Connecting,
    Subscribed { notify: NotifyStream },
    Polling { notify: NotifyStream },
    Stopped,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Disconnected { .. } => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed { .. } => "subscribed",
            Self::Polling { .. } => "polling",
            Self::Stopped => "stopped",
        }
    }
}

/// Polling session for one configured device
pub struct DeviceSession<T> {
    config: DeviceConfig,
    profile: Profile,
    transport: T,
    store: DeviceStateStore,
    logger: SampleLogger,
    timings: Timings,
    stop: watch::Receiver<bool>,
    assembler: FrameAssembler,
    backoff: Duration,
    dropped_frames: u64,
    checksum_errors: u64,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(
        config: DeviceConfig,
        profile: Profile,
        transport: T,
        store: DeviceStateStore,
        logger: SampleLogger,
        timings: Timings,
        stop: watch::Receiver<bool>,
    ) -> Self {
        store.register(&config.name);
        let backoff = timings.backoff_initial;
        Self {
            config,
            profile,
            transport,
            store,
            logger,
            timings,
            stop,
            assembler: FrameAssembler::new(),
            backoff,
            dropped_frames: 0,
            checksum_errors: 0,
        }
    }

    /// Drive the session until the stop signal fires
    pub async fn run(mut self) {
        let mut state = SessionState::Connecting;
        loop {
            log::trace!("[{}] state: {}", self.config.name, state.name());
            state = match state {
                SessionState::Disconnected { delay } => {
                    if self.wait(delay).await {
                        SessionState::Connecting
                    } else {
                        SessionState::Stopped
                    }
                }
                SessionState::Connecting => self.connect().await,
                SessionState::Subscribed { notify } => self.settle_in(notify).await,
                SessionState::Polling { notify } => self.poll(notify).await,
                SessionState::Stopped => break,
            };
        }
        if let Err(error) = self.transport.disconnect().await {
            log::debug!("[{}] error while disconnecting: {error}", self.config.name);
        }
        self.store.update(&self.config.name, |state| {
            state.connected = false;
            state.status = "stopped".into();
        });
        log::info!("[{}] session stopped", self.config.name);
    }

    async fn connect(&mut self) -> SessionState {
        if self.stop_requested() {
            return SessionState::Stopped;
        }
        log::info!("[{}] connecting to {}", self.config.name, self.config.address);
        match self.open_link().await {
            Ok(notify) => {
                self.backoff = self.timings.backoff_initial;
                self.assembler = FrameAssembler::new();
                self.store.update(&self.config.name, |state| {
                    state.connected = true;
                    state.status.clear();
                });
                log::info!("[{}] connected", self.config.name);
                SessionState::Subscribed { notify }
            }
            Err(error) => self.link_failed(error).await,
        }
    }

    async fn open_link(&self) -> Result<NotifyStream> {
        self.transport.connect().await?;
        self.transport.subscribe().await
    }

    /// Mark the device disconnected and schedule the next attempt
    async fn link_failed(&mut self, error: Error) -> SessionState {
        log::warn!("[{}] link failure: {error}", self.config.name);
        let _ = self.transport.disconnect().await;
        self.store.update(&self.config.name, |state| {
            state.connected = false;
            state.status = format!("link failure: {error}");
        });
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(self.timings.backoff_max);
        SessionState::Disconnected { delay }
    }

    /// Give the device time to finish the subscription handshake
    async fn settle_in(&mut self, mut notify: NotifyStream) -> SessionState {
        match self.collect(&mut notify, self.timings.subscribe_settle).await {
            Ok(true) => SessionState::Polling { notify },
            Ok(false) => SessionState::Stopped,
            Err(error) => self.link_failed(error).await,
        }
    }

    async fn poll(&mut self, mut notify: NotifyStream) -> SessionState {
        match self.poll_cycle(&mut notify).await {
            Ok(true) => SessionState::Polling { notify },
            Ok(false) => SessionState::Stopped,
            Err(error) => self.link_failed(error).await,
        }
    }

    /// One command cycle; `Ok(false)` means the stop signal fired
    async fn poll_cycle(&mut self, notify: &mut NotifyStream) -> Result<bool> {
        if self.stop_requested() {
            return Ok(false);
        }

        self.transport
            .write_command(&read_command(FrameKind::CellVoltages))
            .await?;
        if !self.collect(notify, self.timings.settle).await? {
            return Ok(false);
        }
        self.drain();

        self.transport
            .write_command(&read_command(FrameKind::PackStatus))
            .await?;
        if !self.collect(notify, self.timings.settle).await? {
            return Ok(false);
        }
        self.drain();

        Ok(self.wait(self.timings.poll).await)
    }

    /// Buffer notify chunks until the window elapses; `Ok(false)` on stop
    async fn collect(&mut self, notify: &mut NotifyStream, window: Duration) -> Result<bool> {
        if self.stop_requested() {
            return Ok(false);
        }
        let deadline = Instant::now() + window;
        let Self {
            stop, assembler, ..
        } = self;
        loop {
            select! {
                _ = sleep_until(deadline) => return Ok(true),
                _ = stop.changed() => return Ok(false),
                chunk = notify.next() => match chunk {
                    Some(chunk) => assembler.extend(chunk),
                    None => return Err(Error::LostConnection),
                },
            }
        }
    }

    /// Interruptible sleep; false when the stop signal fired
    async fn wait(&mut self, delay: Duration) -> bool {
        if self.stop_requested() {
            return false;
        }
        select! {
            _ = sleep(delay) => true,
            _ = self.stop.changed() => false,
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Decode every complete buffered frame and publish the results.
    ///
    /// Malformed frames are dropped and the scan continues; checksum
    /// mismatches are counted separately for diagnostics.
    fn drain(&mut self) {
        while let Some(frame) = self.assembler.next_frame() {
            log::trace!("[{}] frame:", self.config.name);
            log::trace!("{:?}", frame.hex_dump());
            match decode_frame(&frame, &self.profile) {
                Ok(Record::CellVoltages(cells)) => self.publish_cells(cells),
                Ok(Record::PackStatus(pack)) => self.publish_pack(pack),
                Err(error) if error.kind() == ErrorKind::Integrity => {
                    self.checksum_errors += 1;
                    log::warn!(
                        "[{}] frame dropped ({} checksum errors): {error}",
                        self.config.name,
                        self.checksum_errors
                    );
                }
                Err(error) => {
                    self.dropped_frames += 1;
                    log::debug!(
                        "[{}] frame dropped ({} so far): {error}",
                        self.config.name,
                        self.dropped_frames
                    );
                }
            }
        }
    }

    fn publish_cells(&mut self, cells: CellVoltages) {
        let timestamp = timestamp_hms();
        if let Err(error) = self
            .logger
            .log(&self.config.name, &timestamp, &cells.voltages)
        {
            log::warn!("[{}] sample not persisted: {error}", self.config.name);
        }
        log::debug!(
            "[{}] cells: {:.3} V total over {} cells",
            self.config.name,
            cells.total,
            cells.voltages.len()
        );
        self.store.update(&self.config.name, |state| {
            state.cells = cells;
            state.last_update = timestamp;
        });
    }

    fn publish_pack(&mut self, pack: PackStatus) {
        log::debug!(
            "[{}] status: {:.2} V {:+.2} A SoC {}%",
            self.config.name,
            pack.voltage,
            pack.current,
            pack.soc
        );
        let timestamp = timestamp_hms();
        self.store.update(&self.config.name, |state| {
            state.pack = pack;
            state.last_update = timestamp;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{types::DeviceId, utils::checksum, LoggingToggle, Revision};
    use async_trait::async_trait;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };
    use tokio::{sync::mpsc, time::timeout};

    const EXAMPLE_CELLS: [u8; 15] = [
        0xdd, 0x04, 0x08, 0x00, 0x0c, 0xe4, 0x0c, 0xee, 0x0c, 0xdf, 0x0c, 0xe9, 0xff, 0xff, 0x77,
    ];

    fn status_frame(soc: u8) -> Vec<u8> {
        let mut payload = vec![0u8; 20];
        payload[0..2].copy_from_slice(&0x0529u16.to_be_bytes());
        payload[2..4].copy_from_slice(&(-125i16).to_be_bytes());
        payload[4..6].copy_from_slice(&5000u16.to_be_bytes());
        payload[6..8].copy_from_slice(&10000u16.to_be_bytes());
        payload[8..10].copy_from_slice(&42u16.to_be_bytes());
        payload[19] = soc;
        let mut frame = vec![0xdd, 0x03, payload.len() as u8, 0x00];
        frame.extend_from_slice(&payload);
        let [hi, lo] = checksum(&frame[2..]).to_be_bytes();
        frame.extend([hi, lo, 0x77]);
        frame
    }

    struct MockInner {
        connect_failures: AtomicUsize,
        connect_calls: AtomicUsize,
        writes: Mutex<Vec<u8>>,
        replies: Mutex<HashMap<u8, Vec<Vec<u8>>>>,
        notify_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    }

    #[derive(Clone)]
    struct MockTransport(Arc<MockInner>);

    impl MockTransport {
        fn new() -> Self {
            Self(Arc::new(MockInner {
                connect_failures: AtomicUsize::new(0),
                connect_calls: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                replies: Mutex::new(HashMap::new()),
                notify_tx: Mutex::new(None),
            }))
        }

        fn failing(failures: usize) -> Self {
            let transport = Self::new();
            transport
                .0
                .connect_failures
                .store(failures, Ordering::Relaxed);
            transport
        }

        fn reply(&self, register: u8, chunks: Vec<Vec<u8>>) {
            self.0.replies.lock().unwrap().insert(register, chunks);
        }

        fn connect_calls(&self) -> usize {
            self.0.connect_calls.load(Ordering::Relaxed)
        }

        fn writes(&self) -> Vec<u8> {
            self.0.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<()> {
            self.0.connect_calls.fetch_add(1, Ordering::Relaxed);
            let failures = self.0.connect_failures.load(Ordering::Relaxed);
            if failures > 0 {
                self.0.connect_failures.store(failures - 1, Ordering::Relaxed);
                return Err(Error::LostConnection);
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self) -> Result<NotifyStream> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.0.notify_tx.lock().unwrap() = Some(tx);
            Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })))
        }

        async fn write_command(&self, data: &[u8]) -> Result<()> {
            let register = data[2];
            self.0.writes.lock().unwrap().push(register);
            if let Some(chunks) = self.0.replies.lock().unwrap().get(&register) {
                if let Some(tx) = self.0.notify_tx.lock().unwrap().as_ref() {
                    for chunk in chunks {
                        let _ = tx.send(chunk.clone());
                    }
                }
            }
            Ok(())
        }
    }

    fn config(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.into(),
            address: DeviceId::Name(name.into()),
            revision: Revision::Gen1,
        }
    }

    fn timings() -> Timings {
        Timings {
            settle: Duration::from_millis(100),
            poll: Duration::from_secs(1),
            subscribe_settle: Duration::from_millis(100),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(4),
        }
    }

    fn spawn_session(
        transport: MockTransport,
        store: DeviceStateStore,
        logger: SampleLogger,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let session = DeviceSession::new(
            config("akku-1"),
            Revision::Gen1.profile(),
            transport,
            store,
            logger,
            timings(),
            stop_rx,
        );
        (stop_tx, tokio::spawn(session.run()))
    }

    fn null_logger() -> (tempfile::TempDir, SampleLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = SampleLogger::new(dir.path(), LoggingToggle::new(false));
        (dir, logger)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_marks_disconnected_and_retries() {
        let transport = MockTransport::failing(usize::MAX);
        let store = DeviceStateStore::new();
        let (_dir, logger) = null_logger();
        let (stop_tx, handle) = spawn_session(transport.clone(), store.clone(), logger);

        sleep(Duration::from_secs(30)).await;

        let state = store.get("akku-1").unwrap();
        assert!(!state.connected);
        assert!(state.status.contains("link failure"));
        // attempts at 0 s then after 0.5, 1, 2, 4, 4, ... seconds of backoff
        assert!(transport.connect_calls() >= 5);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_cycle_updates_snapshot_and_log() {
        let transport = MockTransport::new();
        // cell frame fragmented into two chunks, status frame whole
        transport.reply(
            0x04,
            vec![EXAMPLE_CELLS[..7].to_vec(), EXAMPLE_CELLS[7..].to_vec()],
        );
        transport.reply(0x03, vec![status_frame(76)]);

        let store = DeviceStateStore::new();
        let dir = tempfile::tempdir().unwrap();
        let logger = SampleLogger::new(dir.path(), LoggingToggle::new(true));
        let (stop_tx, handle) = spawn_session(transport.clone(), store.clone(), logger);

        sleep(Duration::from_secs(2)).await;

        let state = store.get("akku-1").unwrap();
        assert!(state.connected);
        assert_eq!(state.cells.voltages.len(), 4);
        assert!((state.cells.total - 13.210).abs() < 1e-3);
        assert_eq!(state.pack.soc, 76);
        assert!((state.pack.current + 1.25).abs() < 1e-3);
        assert_eq!(state.pack.cycle_count, 42);
        assert!(!state.last_update.is_empty());

        // commands alternate: cells first, status second
        let writes = transport.writes();
        assert!(writes.len() >= 2);
        assert_eq!(&writes[..2], &[0x04, 0x03]);

        // one CSV row per decoded cell frame
        let rows = std::fs::read_to_string(dir.path().join("akku-1.csv")).unwrap();
        let first = rows.lines().next().unwrap();
        assert!(first.ends_with(",3.300,3.310,3.295,3.305"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_skipped() {
        let transport = MockTransport::new();
        // garbage, an undersized candidate, then a valid frame
        transport.reply(
            0x04,
            vec![
                vec![0x01, 0x02],
                vec![0xdd, 0x77],
                EXAMPLE_CELLS.to_vec(),
            ],
        );

        let store = DeviceStateStore::new();
        let (_dir, logger) = null_logger();
        let (stop_tx, handle) = spawn_session(transport, store.clone(), logger);

        sleep(Duration::from_secs(1)).await;

        let state = store.get("akku-1").unwrap();
        assert_eq!(state.cells.voltages.len(), 4);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_wait_exits_promptly() {
        let transport = MockTransport::new();
        let store = DeviceStateStore::new();
        let (_dir, logger) = null_logger();
        let (stop_tx, handle) = spawn_session(transport.clone(), store.clone(), logger);

        // land inside the poll-interval sleep of the first cycle
        sleep(Duration::from_millis(400)).await;
        let writes_before = transport.writes().len();

        stop_tx.send(true).unwrap();
        timeout(Duration::from_millis(100), handle)
            .await
            .expect("session must stop within one settle interval")
            .unwrap();

        assert_eq!(transport.writes().len(), writes_before);
        let state = store.get("akku-1").unwrap();
        assert!(!state.connected);
        assert_eq!(state.status, "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_initial_failures() {
        let transport = MockTransport::failing(2);
        transport.reply(0x04, vec![EXAMPLE_CELLS.to_vec()]);

        let store = DeviceStateStore::new();
        let (_dir, logger) = null_logger();
        let (stop_tx, handle) = spawn_session(transport.clone(), store.clone(), logger);

        sleep(Duration::from_secs(5)).await;

        assert_eq!(transport.connect_calls(), 3);
        let state = store.get("akku-1").unwrap();
        assert!(state.connected);
        assert_eq!(state.cells.voltages.len(), 4);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
