//! # bme280-station
//!
//! This crate exposes a BME280 sensor on Linux I2C as a readable device,
//! together with an activity LED and a button that cycles a measurement
//! period.
//!
//! Every read of the device returns 40 raw bytes: the calibration
//! registers 0x88 (24 bytes), 0xA1 (1 byte), 0xE1 (7 bytes) followed by
//! the measurement registers 0xF7 (8 bytes). Compensation is done by the
//! reader, see [`Snapshot`].
//!
//! # Examples
//! ```no_run
//! use std::io::Read;
//! use std::path::Path;
//! use bme280_station::{read_period, DeviceFile, Snapshot};
//!
//! let mut dev = DeviceFile::open(Path::new("/run/bme280")).unwrap();
//! let mut payload = [0u8; 40];
//! dev.read_exact(&mut payload).unwrap();
//! let m = Snapshot::parse(&payload).unwrap().measurements();
//! println!("{:.2} C {:.2} hPa {:.2} %", m.temperature, m.pressure / 100.0, m.humidity);
//! let next = read_period(Path::new("/run/bme280/kernel")).unwrap();
//! println!("next read in {} ms", next);
//! ```

mod attr;
mod bme280;
mod bus;
mod chardev;
mod driver;
mod error;
mod gpio;
mod period;
mod snapshot;
mod utils;
mod watch;

#[cfg(test)]
mod testing;

pub use attr::*;
pub use bme280::*;
pub use bus::*;
pub use chardev::*;
pub use driver::*;
pub use error::*;
pub use gpio::*;
pub use period::*;
pub use snapshot::*;
pub use watch::*;
