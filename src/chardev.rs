//! The `bme280` device node.
//!
//! The node is a Unix stream socket. A connection is one open of the
//! device: the server answers the connect with a status byte (0 = opened),
//! then each request is a little-endian `u32` buffer length and each reply
//! a little-endian `u32` count followed by that many payload bytes.
//! Closing the connection releases the device.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::bme280::{self, Delay};
use crate::bus::{BusSession, ClientFactory};
use crate::error::*;
use crate::gpio::{ActivityIndicator, OutputLine};

pub const DEVICE_NAME: &str = "bme280";

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const MAX_REQUEST: usize = 4096;

const OPEN_OK: u8 = 0;
const OPEN_FAILED: u8 = 1;

/// What a device node dispatches to.
pub trait FileOperations {
    type Handle;

    fn open(&mut self) -> Result<Self::Handle>;
    fn read(&mut self, handle: &mut Self::Handle, buf: &mut [u8]) -> usize;
    fn release(&mut self, handle: Self::Handle);
}

/// The sensor as a readable device: every open configures it, every read
/// returns one raw snapshot.
pub struct Bme280Device<F, L, D> {
    factory: F,
    bus: u8,
    address: u16,
    led: ActivityIndicator<L>,
    delay: D,
}

impl<F, L, D> Bme280Device<F, L, D>
where
    F: ClientFactory,
    L: OutputLine,
    D: Delay,
{
    pub fn new(factory: F, bus: u8, address: u16, led: L, delay: D) -> Bme280Device<F, L, D> {
        Bme280Device {
            factory,
            bus,
            address,
            led: ActivityIndicator::new(led),
            delay,
        }
    }
}

impl<F, L, D> FileOperations for Bme280Device<F, L, D>
where
    F: ClientFactory,
    L: OutputLine,
    D: Delay,
{
    type Handle = BusSession<F::Client>;

    fn open(&mut self) -> Result<BusSession<F::Client>> {
        info!("BME280: OPEN called");
        let mut session = BusSession::open(&self.factory, self.bus, self.address).map_err(|e| {
            error!("BME280: {}", e);
            e
        })?;
        if let Some(client) = session.client() {
            bme280::configure(client);
        }
        Ok(session)
    }

    fn read(&mut self, handle: &mut BusSession<F::Client>, buf: &mut [u8]) -> usize {
        match handle.client() {
            Some(client) => bme280::read_snapshot(client, &mut self.led, &mut self.delay, buf),
            None => {
                error!("BME280: read on a released handle");
                0
            }
        }
    }

    fn release(&mut self, mut handle: BusSession<F::Client>) {
        info!("BME280: RELEASE called");
        handle.close();
    }
}

/// A registered device node served on a background thread. Every
/// accepted connection gets its own handler thread; calls into the
/// operations are serialized.
pub struct DeviceNode {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceNode {
    pub fn register<O>(dir: &Path, ops: O) -> Result<DeviceNode>
    where
        O: FileOperations + Send + 'static,
    {
        fs::create_dir_all(dir)?;
        let path = dir.join(DEVICE_NAME);
        match fs::remove_file(&path) {
            Ok(()) => warn!("BME280: removed stale node {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(DEVICE_NAME.to_string())
                .spawn(move || serve(listener, ops, &stop))?
        };
        info!("BME280: device node at {}", path.display());

        Ok(DeviceNode {
            path,
            stop,
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops serving, closes open connections and removes the node. Safe
    /// to call more than once.
    pub fn unregister(&mut self) {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return,
        };
        self.stop.store(true, Ordering::Release);
        if thread.join().is_err() {
            error!("BME280: device node thread panicked");
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("BME280: failed to remove {}: {}", self.path.display(), e);
            }
        }
        info!("BME280: unregistered {}", self.path.display());
    }
}

impl Drop for DeviceNode {
    fn drop(&mut self) {
        self.unregister();
    }
}

type Connections = Arc<Mutex<HashMap<u64, UnixStream>>>;

fn lock<O>(ops: &Mutex<O>) -> MutexGuard<'_, O> {
    ops.lock().unwrap_or_else(PoisonError::into_inner)
}

fn serve<O>(listener: UnixListener, ops: O, stop: &AtomicBool)
where
    O: FileOperations + Send + 'static,
{
    let ops = Arc::new(Mutex::new(ops));
    let connections = Connections::default();
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 0u64;

    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => {
                handlers.retain(|handler| !handler.is_finished());
                let id = next_id;
                next_id += 1;
                match accept(&ops, &connections, id, stream) {
                    Ok(handler) => handlers.push(handler),
                    Err(e) => {
                        warn!("BME280: dropping connection: {}", e);
                        lock(&connections).remove(&id);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("BME280: accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    // every spawned handler registered its stream before it was spawned
    for stream in lock(&connections).values() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    for handler in handlers {
        if handler.join().is_err() {
            error!("BME280: connection handler panicked");
        }
    }
}

fn accept<O>(
    ops: &Arc<Mutex<O>>,
    connections: &Connections,
    id: u64,
    stream: UnixStream,
) -> io::Result<JoinHandle<()>>
where
    O: FileOperations + Send + 'static,
{
    stream.set_nonblocking(false)?;
    lock(connections).insert(id, stream.try_clone()?);

    let ops = ops.clone();
    let connections = connections.clone();
    thread::Builder::new()
        .name(format!("{}-{}", DEVICE_NAME, id))
        .spawn(move || {
            if let Err(e) = dispatch(&ops, stream) {
                warn!("BME280: connection ended: {}", e);
            }
            lock(&connections).remove(&id);
        })
}

fn dispatch<O: FileOperations>(ops: &Mutex<O>, mut stream: UnixStream) -> io::Result<()> {
    let opened = lock(ops).open();
    let mut handle = match opened {
        Ok(handle) => handle,
        Err(_) => return stream.write_all(&[OPEN_FAILED]),
    };
    let result = stream
        .write_all(&[OPEN_OK])
        .and_then(|_| serve_reads(ops, &mut handle, &mut stream));
    lock(ops).release(handle);
    result
}

fn serve_reads<O: FileOperations>(
    ops: &Mutex<O>,
    handle: &mut O::Handle,
    stream: &mut UnixStream,
) -> io::Result<()> {
    loop {
        let mut request = [0u8; 4];
        match stream.read_exact(&mut request) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let requested = (u32::from_le_bytes(request) as usize).min(MAX_REQUEST);
        let mut buf = vec![0u8; requested];
        let n = lock(ops).read(handle, &mut buf);
        stream.write_all(&(n as u32).to_le_bytes())?;
        stream.write_all(&buf[..n])?;
    }
}

/// Client side of a device node.
pub struct DeviceFile {
    stream: UnixStream,
}

impl DeviceFile {
    pub fn open(dir: &Path) -> Result<DeviceFile> {
        let mut stream = UnixStream::connect(dir.join(DEVICE_NAME))?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status)?;
        if status[0] != OPEN_OK {
            let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "device open failed");
            return Err(refused.into());
        }
        Ok(DeviceFile { stream })
    }
}

impl Read for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.write_all(&(buf.len() as u32).to_le_bytes())?;
        let mut count = [0u8; 4];
        self.stream.read_exact(&mut count)?;
        let n = u32::from_le_bytes(count) as usize;
        if n > buf.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "reply larger than request"));
        }
        self.stream.read_exact(&mut buf[..n])?;
        Ok(n)
    }
}
