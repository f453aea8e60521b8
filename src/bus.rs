//! I2C plumbing: the register-level operations the driver needs and the
//! per-open client session.

use i2cdev::core::I2CDevice;
#[cfg(target_os = "linux")]
use i2cdev::linux::LinuxI2CDevice;
use log::info;

use crate::error::*;

/// Bus index the sensor is wired to.
pub const BME280_I2C_BUS: u8 = 1;

/// 7-bit address of the sensor (SDO tied low).
pub const BME280_I2C_ADDRESS: u16 = 0x76;

/// Register-level access used by the configurator and the snapshot reader.
/// Implemented for every `I2CDevice`; tests substitute a recorder.
pub trait RegisterBus {
    type Error: std::error::Error;

    fn write_byte(&mut self, register: u8, value: u8) -> std::result::Result<(), Self::Error>;

    /// Reads `dst.len()` consecutive registers starting at `register`.
    fn read_block(&mut self, register: u8, dst: &mut [u8]) -> std::result::Result<(), Self::Error>;
}

impl<T: I2CDevice> RegisterBus for T {
    type Error = T::Error;

    fn write_byte(&mut self, register: u8, value: u8) -> std::result::Result<(), T::Error> {
        self.smbus_write_byte_data(register, value)
    }

    fn read_block(&mut self, register: u8, dst: &mut [u8]) -> std::result::Result<(), T::Error> {
        let values = self.smbus_read_i2c_block_data(register, dst.len() as u8)?;
        let n = values.len().min(dst.len());
        dst[..n].copy_from_slice(&values[..n]);
        Ok(())
    }
}

/// Creates bus clients bound to a bus index and address.
pub trait ClientFactory {
    type Client: RegisterBus;

    fn new_client(&self, bus: u8, address: u16) -> Result<Self::Client>;
}

/// Opens `/dev/i2c-<bus>` through the kernel's i2c-dev interface.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxClientFactory;

#[cfg(target_os = "linux")]
impl ClientFactory for LinuxClientFactory {
    type Client = LinuxI2CDevice;

    fn new_client(&self, bus: u8, address: u16) -> Result<LinuxI2CDevice> {
        LinuxI2CDevice::new(format!("/dev/i2c-{}", bus), address).map_err(|e| {
            Error::ClientAllocation {
                bus,
                address,
                source: Box::new(e),
            }
        })
    }
}

/// One open of the device: owns the bus client until `close`.
pub struct BusSession<C> {
    client: Option<C>,
}

impl<C: RegisterBus> BusSession<C> {
    pub fn open<F>(factory: &F, bus: u8, address: u16) -> Result<BusSession<C>>
    where
        F: ClientFactory<Client = C>,
    {
        let client = factory.new_client(bus, address)?;
        Ok(BusSession {
            client: Some(client),
        })
    }

    pub fn client(&mut self) -> Option<&mut C> {
        self.client.as_mut()
    }

    /// Drops the client. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            info!("BME280: unregistering i2c client");
        }
    }
}
