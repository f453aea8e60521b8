//! Recorders standing in for the bus, GPIO lines, delays and clocks.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::bme280::{Delay, UserBuffer};
use crate::bus::{ClientFactory, RegisterBus};
use crate::driver::{Backend, HostConfig};
use crate::error::*;
use crate::gpio::{EdgeInput, GpioChip, OutputLine};
use crate::period::MonotonicClock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(u8, u8),
    Read(u8, usize),
    Led(u8),
    Delay(Duration),
    Export(u32),
    Free(u32),
}

#[derive(Debug, Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

fn nack() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "no acknowledgement from the i2c device")
}

pub struct MockBus {
    journal: Journal,
    registers: HashMap<u8, Vec<u8>>,
    failing_reads: HashSet<u8>,
    failing_writes: HashSet<u8>,
}

impl MockBus {
    pub fn new(journal: &Journal) -> MockBus {
        MockBus {
            journal: journal.clone(),
            registers: HashMap::new(),
            failing_reads: HashSet::new(),
            failing_writes: HashSet::new(),
        }
    }

    pub fn set(&mut self, register: u8, data: &[u8]) {
        self.registers.insert(register, data.to_vec());
    }

    pub fn fail_read(&mut self, register: u8) {
        self.failing_reads.insert(register);
    }

    pub fn fail_write(&mut self, register: u8) {
        self.failing_writes.insert(register);
    }
}

impl RegisterBus for MockBus {
    type Error = io::Error;

    fn write_byte(&mut self, register: u8, value: u8) -> io::Result<()> {
        if self.failing_writes.contains(&register) {
            return Err(nack());
        }
        self.journal.push(Event::Write(register, value));
        Ok(())
    }

    fn read_block(&mut self, register: u8, dst: &mut [u8]) -> io::Result<()> {
        if self.failing_reads.contains(&register) {
            return Err(nack());
        }
        self.journal.push(Event::Read(register, dst.len()));
        if let Some(data) = self.registers.get(&register) {
            let n = data.len().min(dst.len());
            dst[..n].copy_from_slice(&data[..n]);
        }
        Ok(())
    }
}

/// Register contents used by the happy-path scenarios.
pub fn sample_payload() -> Vec<u8> {
    let mut v = vec![0x11; 24];
    v.push(0x22);
    v.extend_from_slice(&[0x33; 7]);
    v.extend_from_slice(&[0x44; 8]);
    v
}

#[derive(Default)]
pub struct MockFactory {
    journal: Journal,
    registers: HashMap<u8, Vec<u8>>,
    fail: bool,
    pub opened: Arc<Mutex<Vec<(u8, u16)>>>,
}

impl MockFactory {
    pub fn new(journal: &Journal) -> MockFactory {
        MockFactory {
            journal: journal.clone(),
            ..Default::default()
        }
    }

    pub fn with_sample(journal: &Journal) -> MockFactory {
        let payload = sample_payload();
        let mut factory = MockFactory::new(journal);
        factory.registers.insert(0x88, payload[0..24].to_vec());
        factory.registers.insert(0xA1, payload[24..25].to_vec());
        factory.registers.insert(0xE1, payload[25..32].to_vec());
        factory.registers.insert(0xF7, payload[32..40].to_vec());
        factory
    }

    pub fn failing() -> MockFactory {
        MockFactory {
            fail: true,
            ..Default::default()
        }
    }
}

impl ClientFactory for MockFactory {
    type Client = MockBus;

    fn new_client(&self, bus: u8, address: u16) -> Result<MockBus> {
        if self.fail {
            return Err(Error::ClientAllocation {
                bus,
                address,
                source: Box::new(nack()),
            });
        }
        self.opened.lock().unwrap().push((bus, address));
        let mut client = MockBus::new(&self.journal);
        for (register, data) in self.registers.iter() {
            client.set(*register, data);
        }
        Ok(client)
    }
}

#[derive(Clone)]
pub struct MockLine {
    journal: Journal,
    pub fail: bool,
}

impl MockLine {
    pub fn new(journal: &Journal) -> MockLine {
        MockLine {
            journal: journal.clone(),
            fail: false,
        }
    }
}

impl OutputLine for MockLine {
    fn set_value(&mut self, value: u8) -> Result<()> {
        if self.fail {
            return Err(Error::Gpio(sysfs_gpio::Error::Unexpected("line is gone".into())));
        }
        self.journal.push(Event::Led(value));
        Ok(())
    }
}

pub struct MockDelay {
    journal: Journal,
}

impl MockDelay {
    pub fn new(journal: &Journal) -> MockDelay {
        MockDelay {
            journal: journal.clone(),
        }
    }
}

impl Delay for MockDelay {
    fn delay(&mut self, duration: Duration) {
        self.journal.push(Event::Delay(duration));
    }
}

/// A user buffer that always leaves `not_copied` bytes behind.
pub struct ShortUserBuffer {
    pub not_copied: usize,
}

impl UserBuffer for ShortUserBuffer {
    fn copy_to_user(&mut self, _data: &[u8]) -> usize {
        self.not_copied
    }
}

pub struct MockEdgeInput {
    edges: Receiver<()>,
    delivered: bool,
    handled: Arc<AtomicUsize>,
}

impl EdgeInput for MockEdgeInput {
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<bool> {
        // coming back for another edge means the last one was fully handled
        if self.delivered {
            self.delivered = false;
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
        match self.edges.recv_timeout(timeout) {
            Ok(()) => {
                self.delivered = true;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                Ok(false)
            }
        }
    }
}

/// GPIO chip that tracks which lines are claimed.
pub struct MockGpio {
    journal: Journal,
    exported: Mutex<HashSet<u32>>,
    failing: Option<u32>,
    edges: Mutex<Option<Sender<()>>>,
    handled: Arc<AtomicUsize>,
}

impl MockGpio {
    pub fn new(journal: &Journal) -> MockGpio {
        MockGpio {
            journal: journal.clone(),
            exported: Mutex::new(HashSet::new()),
            failing: None,
            edges: Mutex::new(None),
            handled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_on(journal: &Journal, line: u32) -> MockGpio {
        MockGpio {
            failing: Some(line),
            ..MockGpio::new(journal)
        }
    }

    pub fn exported(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.exported.lock().unwrap().iter().cloned().collect();
        lines.sort();
        lines
    }

    /// Delivers one falling edge to the subscribed input.
    pub fn press(&self) {
        if let Some(tx) = self.edges.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }

    /// Delivers one edge and waits until the handler is done with it.
    pub fn press_and_settle(&self) {
        let before = self.handled.load(Ordering::SeqCst);
        self.press();
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.handled.load(Ordering::SeqCst) == before {
            assert!(Instant::now() < deadline, "edge was never handled");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn export(&self, line: u32) -> Result<()> {
        if self.failing == Some(line) {
            return Err(Error::Gpio(sysfs_gpio::Error::Unexpected(format!("gpio {} busy", line))));
        }
        self.exported.lock().unwrap().insert(line);
        self.journal.push(Event::Export(line));
        Ok(())
    }
}

impl GpioChip for MockGpio {
    type Output = MockLine;
    type Input = MockEdgeInput;

    fn request_output(&self, line: u32) -> Result<MockLine> {
        self.export(line)?;
        Ok(MockLine::new(&self.journal))
    }

    fn request_falling_edge(&self, line: u32, _name: &str) -> Result<MockEdgeInput> {
        self.export(line)?;
        let (tx, rx) = channel();
        *self.edges.lock().unwrap() = Some(tx);
        Ok(MockEdgeInput {
            edges: rx,
            delivered: false,
            handled: self.handled.clone(),
        })
    }

    fn free(&self, line: u32) {
        if self.exported.lock().unwrap().remove(&line) {
            self.journal.push(Event::Free(line));
        }
    }
}

/// Lets a test keep looking at the chip a loaded driver owns.
pub struct SharedGpio(pub Arc<MockGpio>);

impl GpioChip for SharedGpio {
    type Output = MockLine;
    type Input = MockEdgeInput;

    fn request_output(&self, line: u32) -> Result<MockLine> {
        self.0.request_output(line)
    }

    fn request_falling_edge(&self, line: u32, name: &str) -> Result<MockEdgeInput> {
        self.0.request_falling_edge(line, name)
    }

    fn free(&self, line: u32) {
        self.0.free(line)
    }
}

pub type MockBackend = Backend<MockFactory, SharedGpio, MockClock, MockDelay>;

pub fn mock_backend(journal: &Journal, gpio: Arc<MockGpio>, clock: &MockClock) -> MockBackend {
    Backend {
        factory: MockFactory::with_sample(journal),
        gpio: SharedGpio(gpio),
        clock: clock.clone(),
        delay: MockDelay::new(journal),
    }
}

/// Host layout rooted in a temp dir.
pub fn mock_host(tmp: &TempDir) -> HostConfig {
    HostConfig {
        dev_dir: tmp.path().join("dev"),
        sysfs_dir: tmp.path().join("sys"),
        ..HostConfig::default()
    }
}

/// Monotonic clock under test control, in milliseconds.
#[derive(Debug, Default, Clone)]
pub struct MockClock(Arc<AtomicU64>);

impl MockClock {
    pub fn set_ms(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }
}

impl MonotonicClock for MockClock {
    fn now(&self) -> Result<Duration> {
        Ok(Duration::from_millis(self.0.load(Ordering::SeqCst)))
    }
}

/// Directory under the system temp dir, removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(tag: &str) -> TempDir {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let name = format!("bme280-{}-{}-{}", tag, std::process::id(), n);
        let path = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&path).unwrap();
        TempDir(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

thread_local! {
    static RECORDS: RefCell<Option<Vec<(Level, String)>>> = RefCell::new(None);
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS.with(|records| {
            if let Some(records) = records.borrow_mut().as_mut() {
                records.push((record.level(), record.args().to_string()));
            }
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

/// Runs `f` and returns what it logged on this thread.
pub fn capture<T, F: FnOnce() -> T>(f: F) -> (T, Vec<(Level, String)>) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
    RECORDS.with(|records| *records.borrow_mut() = Some(Vec::new()));
    let value = f();
    let records = RECORDS.with(|records| records.borrow_mut().take().unwrap_or_default());
    (value, records)
}

pub fn capture_logs<F: FnOnce()>(f: F) -> Vec<(Level, String)> {
    capture(f).1
}
