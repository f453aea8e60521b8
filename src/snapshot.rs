//! Userspace side of the payload: splits a raw snapshot into calibration
//! words and ADC samples and turns them into physical units.

use crate::bme280::{CAL1, CAL2, CAL3, DATA_SIZE, MEASUREMENT};
use crate::error::*;
use crate::utils::*;

pub struct CompensationParams {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl CompensationParams {
    pub fn load(data: &[u8; DATA_SIZE]) -> CompensationParams {
        let cal1 = &data[CAL1.range()];
        let cal3 = &data[CAL3.range()];
        CompensationParams {
            t1: read_unsigned_short(cal1, 0),
            t2: read_signed_short(cal1, 2),
            t3: read_signed_short(cal1, 4),
            p1: read_unsigned_short(cal1, 6),
            p2: read_signed_short(cal1, 8),
            p3: read_signed_short(cal1, 10),
            p4: read_signed_short(cal1, 12),
            p5: read_signed_short(cal1, 14),
            p6: read_signed_short(cal1, 16),
            p7: read_signed_short(cal1, 18),
            p8: read_signed_short(cal1, 20),
            p9: read_signed_short(cal1, 22),
            h1: data[CAL2.offset],
            h2: read_signed_short(cal3, 0),
            h3: cal3[2],
            // 0xE4..0xE6 pack two 12-bit values around a shared nibble
            h4: ((cal3[3] as i8 as i16) << 4) | (cal3[4] & 0x0F) as i16,
            h5: ((cal3[5] as i8 as i16) << 4) | (cal3[4] >> 4) as i16,
            h6: cal3[6] as i8,
        }
    }

    pub fn fine_resolution_temp(&self, uncomp_t: u32) -> i32 {
        let uncomp_ = uncomp_t as i32;
        let t1_ = self.t1 as i32;
        let t2_ = self.t2 as i32;
        let t3_ = self.t3 as i32;

        let x1 = (((uncomp_ >> 3) - (t1_ << 1)) * t2_) >> 11;
        let x2 = (((((uncomp_ >> 4) - t1_) * ((uncomp_ >> 4) - t1_)) >> 12) * t3_) >> 14;
        x1 + x2
    }

    pub fn compensated_temp(&self, uncomp_t: u32) -> f32 {
        let tf = ((self.fine_resolution_temp(uncomp_t) * 5 + 128) >> 8) as f32;
        tf / 100.0
    }

    /// Pressure in Pa. Returns 0 for calibration that would divide by zero.
    pub fn compensated_pressure(&self, uncomp_p: u32, t_fine: i32) -> f64 {
        let mut x1 = t_fine as i64 - 128000;
        let mut x2 = x1 * x1 * self.p6 as i64;
        x2 += (x1 * self.p5 as i64) << 17;
        x2 += (self.p4 as i64) << 35;
        x1 = ((x1 * x1 * self.p3 as i64) >> 8) + ((x1 * self.p2 as i64) << 12);
        x1 = (((1i64 << 47) + x1) * self.p1 as i64) >> 33;
        if x1 == 0 {
            return 0.0;
        }

        let mut p = 1048576 - uncomp_p as i64;
        p = (((p << 31) - x2) * 3125) / x1;
        x1 = (self.p9 as i64 * (p >> 13) * (p >> 13)) >> 25;
        x2 = (self.p8 as i64 * p) >> 19;
        p = ((p + x1 + x2) >> 8) + ((self.p7 as i64) << 4);
        p as f64 / 256.0
    }

    /// Relative humidity in %, clamped to 0..=100.
    pub fn compensated_humidity(&self, uncomp_h: u32, t_fine: i32) -> f32 {
        let h1 = self.h1 as i64;
        let h2 = self.h2 as i64;
        let h3 = self.h3 as i64;
        let h4 = self.h4 as i64;
        let h5 = self.h5 as i64;
        let h6 = self.h6 as i64;

        let v = t_fine as i64 - 76800;
        let x1 = (((uncomp_h as i64) << 14) - (h4 << 20) - (h5 * v) + 16384) >> 15;
        let x2 = (((v * h6) >> 10) * (((v * h3) >> 11) + 32768)) >> 10;
        let x2 = (((x2 + 2097152) * h2) + 8192) >> 14;
        let mut h = x1 * x2;
        h -= ((((h >> 15) * (h >> 15)) >> 7) * h1) >> 4;
        let h = h.clamp(0, 419430400);
        (h >> 12) as f32 / 1024.0
    }
}

/// One decoded read of the device.
pub struct Snapshot {
    pub params: CompensationParams,
    pub raw_temperature: u32,
    pub raw_pressure: u32,
    pub raw_humidity: u32,
}

/// Physical values derived from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    pub temperature: f32,
    pub pressure: f64,
    pub humidity: f32,
}

impl Snapshot {
    pub fn parse(payload: &[u8]) -> Result<Snapshot> {
        let data: &[u8; DATA_SIZE] = payload
            .try_into()
            .map_err(|_| Error::ShortPayload(payload.len()))?;
        let meas = &data[MEASUREMENT.range()];
        Ok(Snapshot {
            params: CompensationParams::load(data),
            raw_pressure: read_adc20(meas, 0),
            raw_temperature: read_adc20(meas, 3),
            raw_humidity: ((meas[6] as u32) << 8) + meas[7] as u32,
        })
    }

    pub fn measurements(&self) -> Measurements {
        let t_fine = self.params.fine_resolution_temp(self.raw_temperature);
        Measurements {
            temperature: self.params.compensated_temp(self.raw_temperature),
            pressure: self.params.compensated_pressure(self.raw_pressure, t_fine),
            humidity: self.params.compensated_humidity(self.raw_humidity, t_fine),
        }
    }
}
