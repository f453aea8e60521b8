use std::time::Duration;

use log::{error, info, warn};

use crate::bus::RegisterBus;
use crate::gpio::{ActivityIndicator, OutputLine};

/// Size of the payload handed to userspace on every read.
pub const DATA_SIZE: usize = 40;

pub const BME280_CAL1_ADDRESS: u8 = 0x88;
pub const BME280_CAL2_ADDRESS: u8 = 0xA1;
pub const BME280_CAL3_ADDRESS: u8 = 0xE1;
pub const BME280_DATA_ADDRESS: u8 = 0xF7;
pub const BME280_CTRL_HUMIDITY: u8 = 0xF2;
pub const BME280_CTRL_MEAS: u8 = 0xF4;

/// One contiguous register range copied into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub register: u8,
    pub offset: usize,
    pub len: usize,
}

impl Window {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

pub const CAL1: Window = Window { register: BME280_CAL1_ADDRESS, offset: 0, len: 24 };
pub const CAL2: Window = Window { register: BME280_CAL2_ADDRESS, offset: 24, len: 1 };
pub const CAL3: Window = Window { register: BME280_CAL3_ADDRESS, offset: 25, len: 7 };
pub const MEASUREMENT: Window = Window { register: BME280_DATA_ADDRESS, offset: 32, len: 8 };

/// Payload layout in read order. Userspace parses by these offsets.
pub const SNAPSHOT_LAYOUT: [Window; 4] = [CAL1, CAL2, CAL3, MEASUREMENT];

/// ctrl_meas mode bits for a forced (single-shot) conversion.
pub const MODE_FORCED: u8 = 0b01;

/// Oversampling settings use the register encoding: 0 skips the channel,
/// 1..=5 select x1, x2, x4, x8, x16.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub oversampling_temperature: u8,
    pub oversampling_pressure: u8,
    pub oversampling_humidity: u8,
}

/// The only configuration the driver ever writes: 0xF2 = 0x02, 0xF4 = 0x49.
pub const CONFIG: Config = Config {
    oversampling_temperature: 2,
    oversampling_pressure: 2,
    oversampling_humidity: 2,
};

fn samples(oversampling: u8) -> u32 {
    match oversampling {
        0 => 0,
        n => 1 << (n.min(5) - 1),
    }
}

impl Config {
    pub fn ctrl_hum(&self) -> u8 {
        self.oversampling_humidity
    }

    pub fn ctrl_meas(&self) -> u8 {
        let osrs_t = self.oversampling_temperature << 5;
        let osrs_p = self.oversampling_pressure << 2;
        osrs_t | osrs_p | MODE_FORCED
    }

    /// Worst-case conversion time (datasheet appendix B).
    pub fn max_measurement_time(&self) -> Duration {
        let mut micros = 1250 + 2300 * samples(self.oversampling_temperature);
        if self.oversampling_pressure > 0 {
            micros += 2300 * samples(self.oversampling_pressure) + 575;
        }
        if self.oversampling_humidity > 0 {
            micros += 2300 * samples(self.oversampling_humidity) + 575;
        }
        Duration::from_micros(micros as u64)
    }
}

/// Blocking pause used to pace a read against the conversion time.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SleepDelay;

impl Delay for SleepDelay {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Destination of a read. Returns how many bytes could NOT be copied.
pub trait UserBuffer {
    fn copy_to_user(&mut self, data: &[u8]) -> usize;
}

impl UserBuffer for [u8] {
    fn copy_to_user(&mut self, data: &[u8]) -> usize {
        let n = self.len().min(data.len());
        self[..n].copy_from_slice(&data[..n]);
        data.len() - n
    }
}

/// Puts the sensor into the fixed oversampling mode. Failures are logged
/// and the remaining writes still go out.
pub fn configure<B: RegisterBus>(client: &mut B) {
    if let Err(e) = client.write_byte(BME280_CTRL_HUMIDITY, CONFIG.ctrl_hum()) {
        warn!("BME280: Failed to write: configuration Humidity Oversampling: {}", e);
    }
    // ctrl_hum only takes effect after a write to ctrl_meas
    if let Err(e) = client.write_byte(BME280_CTRL_MEAS, CONFIG.ctrl_meas()) {
        warn!("BME280: Failed to write: configuration Temp, Pres Oversampling + CTRL: {}", e);
    }
}

/// Reads calibration and measurement registers into `data`. A failed
/// window is left as it was.
pub fn read_windows<B: RegisterBus>(client: &mut B, data: &mut [u8; DATA_SIZE]) {
    for window in SNAPSHOT_LAYOUT.iter() {
        if let Err(e) = client.read_block(window.register, &mut data[window.range()]) {
            if window.register == BME280_DATA_ADDRESS {
                error!("BME280: read - failed read data from {:#04X}: {}", window.register, e);
            } else {
                error!("BME280: read - failed read cal from {:#04X}: {}", window.register, e);
            }
        }
    }
}

/// Takes one snapshot and copies it to `user`. Returns `DATA_SIZE`, or 0
/// if the copy was incomplete. The LED is lit for the whole call.
pub fn read_snapshot<B, L, D, U>(
    client: &mut B,
    led: &mut ActivityIndicator<L>,
    delay: &mut D,
    user: &mut U,
) -> usize
where
    B: RegisterBus,
    L: OutputLine,
    D: Delay,
    U: UserBuffer + ?Sized,
{
    let _lit = led.lit();
    let mut data = [0u8; DATA_SIZE];

    read_windows(client, &mut data);
    delay.delay(CONFIG.max_measurement_time());

    let not_copied = user.copy_to_user(&data);
    if not_copied > 0 {
        error!("BME280: `copy_to_user` failed not copied bytes: {}", not_copied);
        return 0;
    }
    info!("BME280: succeeded copy data to user space");
    DATA_SIZE
}
