//! Weather refresh loop: read the device, show the values, wait for the
//! period the button selected, repeat.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::error;

use crate::attr::read_period;
use crate::bme280::{Delay, DATA_SIZE};
use crate::chardev::DeviceFile;
use crate::error::*;
use crate::period::PERIOD_START_MS;
use crate::snapshot::{Measurements, Snapshot};

pub fn print_measurements<W: Write>(out: &mut W, m: &Measurements) -> Result<()> {
    writeln!(out, "Temperature: {:.2} C", m.temperature)?;
    writeln!(out, "Pressure: {:.2} hPa", m.pressure / 100.0)?;
    writeln!(out, "Humidity: {:.2} %", m.humidity)?;
    Ok(())
}

/// Reads one raw snapshot through the device node.
pub fn read_payload(dev_dir: &Path) -> Result<[u8; DATA_SIZE]> {
    let mut dev = DeviceFile::open(dev_dir)?;
    let mut payload = [0u8; DATA_SIZE];
    dev.read_exact(&mut payload)?;
    Ok(payload)
}

pub struct Watcher<D> {
    dev_dir: PathBuf,
    sysfs_dir: PathBuf,
    delay: D,
    period: Duration,
}

impl<D: Delay> Watcher<D> {
    pub fn new(dev_dir: &Path, sysfs_dir: &Path, delay: D) -> Watcher<D> {
        Watcher {
            dev_dir: dev_dir.to_path_buf(),
            sysfs_dir: sysfs_dir.to_path_buf(),
            delay,
            period: Duration::from_millis(PERIOD_START_MS as u64),
        }
    }

    /// One refresh. Returns how long to wait before the next one.
    pub fn update<W: Write>(&mut self, out: &mut W) -> Result<Duration> {
        let payload = read_payload(&self.dev_dir)?;
        let m = Snapshot::parse(&payload)?.measurements();
        let period_ms = read_period(&self.sysfs_dir)?;

        print_measurements(out, &m)?;
        writeln!(out, "Update each: {}s", period_ms as f64 / 1000.0)?;
        out.flush()?;

        self.period = Duration::from_millis(period_ms.max(0) as u64);
        Ok(self.period)
    }

    /// Refreshes `rounds` times, or forever with `None`. A failed refresh
    /// is logged and retried after the last known period.
    pub fn run<W: Write>(&mut self, out: &mut W, rounds: Option<usize>) {
        let mut done = 0;
        while rounds.map_or(true, |rounds| done < rounds) {
            if let Err(e) = self.update(out) {
                error!("BME280: refresh failed: {}", e);
            }
            self.delay.delay(self.period);
            done += 1;
        }
    }
}
