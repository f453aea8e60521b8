//! GPIO lines: the activity LED and the period button.

use std::time::Duration;

use log::{error, info, warn};
#[cfg(target_os = "linux")]
use sysfs_gpio::{Direction, Edge, Pin, PinPoller};

use crate::error::*;

/// Default line of the period button.
pub const GPIO_BUTTON: u32 = 24;

/// Default line of the activity LED.
pub const GPIO_LED: u32 = 23;

/// Name under which the button edge subscription is registered.
pub const BUTTON_HANDLER_NAME: &str = "BME280_button_handler";

pub trait OutputLine {
    fn set_value(&mut self, value: u8) -> Result<()>;
}

pub trait EdgeInput {
    /// Blocks until a falling edge arrives or `timeout` passes. Returns
    /// `true` if an edge was seen.
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<bool>;
}

pub trait GpioChip {
    type Output: OutputLine + Clone + Send + 'static;
    type Input: EdgeInput + Send + 'static;

    /// Claims `line` as an output driven low.
    fn request_output(&self, line: u32) -> Result<Self::Output>;

    /// Claims `line` as an input subscribed to falling edges.
    fn request_falling_edge(&self, line: u32, name: &str) -> Result<Self::Input>;

    /// Gives `line` back. Freeing an unclaimed line is harmless.
    fn free(&self, line: u32);
}

/// GPIO access through `/sys/class/gpio`.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsGpio;

#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
pub struct SysfsOutput {
    pin: Pin,
}

#[cfg(target_os = "linux")]
impl OutputLine for SysfsOutput {
    fn set_value(&mut self, value: u8) -> Result<()> {
        Ok(self.pin.set_value(value)?)
    }
}

#[cfg(target_os = "linux")]
pub struct SysfsEdgeInput {
    poller: PinPoller,
}

#[cfg(target_os = "linux")]
impl EdgeInput for SysfsEdgeInput {
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<bool> {
        let value = self.poller.poll(timeout.as_millis() as isize)?;
        Ok(value.is_some())
    }
}

#[cfg(target_os = "linux")]
impl GpioChip for SysfsGpio {
    type Output = SysfsOutput;
    type Input = SysfsEdgeInput;

    fn request_output(&self, line: u32) -> Result<SysfsOutput> {
        let pin = Pin::new(line as u64);
        pin.export()?;
        pin.set_direction(Direction::Low)?;
        Ok(SysfsOutput { pin })
    }

    fn request_falling_edge(&self, line: u32, name: &str) -> Result<SysfsEdgeInput> {
        let pin = Pin::new(line as u64);
        pin.export()?;
        pin.set_direction(Direction::In)?;
        pin.set_edge(Edge::FallingEdge)?;
        let poller = pin.get_poller()?;
        info!("BME280: gpio {} subscribed to falling edges as {}", line, name);
        Ok(SysfsEdgeInput { poller })
    }

    fn free(&self, line: u32) {
        if let Err(e) = Pin::new(line as u64).unexport() {
            warn!("BME280: failed to unexport gpio {}: {}", line, e);
        }
    }
}

/// The LED lit while a snapshot is being taken. Keeps no state of its
/// own: every `on` must be followed by exactly one `off`.
pub struct ActivityIndicator<L> {
    line: L,
}

impl<L: OutputLine> ActivityIndicator<L> {
    pub fn new(line: L) -> ActivityIndicator<L> {
        ActivityIndicator { line }
    }

    pub fn on(&mut self) {
        if let Err(e) = self.line.set_value(1) {
            error!("BME280: failed to switch LED on: {}", e);
        }
    }

    pub fn off(&mut self) {
        if let Err(e) = self.line.set_value(0) {
            error!("BME280: failed to switch LED off: {}", e);
        }
    }

    /// Switches the LED on until the returned guard is dropped.
    pub fn lit(&mut self) -> Lit<'_, L> {
        self.on();
        Lit { indicator: self }
    }
}

pub struct Lit<'a, L: OutputLine> {
    indicator: &'a mut ActivityIndicator<L>,
}

impl<'a, L: OutputLine> Drop for Lit<'a, L> {
    fn drop(&mut self) {
        self.indicator.off();
    }
}
