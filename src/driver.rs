//! Load and unload of the whole driver.
//!
//! Loading claims, in order: the LED line, the button line, the device
//! node, the attribute object and the button edge handler. Each claim
//! registers how to give it back; a failed load and `unload` both give
//! everything back in reverse order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, trace, warn};

use crate::attr::{AttributeGroup, KObject, KOBJECT_NAME};
use crate::bme280::Delay;
#[cfg(target_os = "linux")]
use crate::bme280::SleepDelay;
use crate::bus::{ClientFactory, BME280_I2C_ADDRESS, BME280_I2C_BUS};
#[cfg(target_os = "linux")]
use crate::bus::LinuxClientFactory;
use crate::chardev::{Bme280Device, DeviceNode};
use crate::error::*;
use crate::gpio::{
    EdgeInput, GpioChip, OutputLine, BUTTON_HANDLER_NAME, GPIO_BUTTON, GPIO_LED,
};
#[cfg(target_os = "linux")]
use crate::gpio::SysfsGpio;
use crate::period::{IrqReturn, MonotonicClock, PeriodState};
#[cfg(target_os = "linux")]
use crate::period::SystemMonotonic;

const EDGE_POLL: Duration = Duration::from_millis(100);

/// Load-time parameters. Fixed once the driver is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleParams {
    pub gpio_button: u32,
    pub gpio_led: u32,
}

impl Default for ModuleParams {
    fn default() -> ModuleParams {
        ModuleParams {
            gpio_button: GPIO_BUTTON,
            gpio_led: GPIO_LED,
        }
    }
}

/// Where the driver finds the sensor and publishes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub bus: u8,
    pub address: u16,
    pub dev_dir: PathBuf,
    pub sysfs_dir: PathBuf,
}

impl Default for HostConfig {
    fn default() -> HostConfig {
        HostConfig {
            bus: BME280_I2C_BUS,
            address: BME280_I2C_ADDRESS,
            dev_dir: PathBuf::from("/run/bme280"),
            sysfs_dir: PathBuf::from("/run/bme280/kernel"),
        }
    }
}

/// Hardware access the driver is built on.
pub struct Backend<F, G, C, D> {
    pub factory: F,
    pub gpio: G,
    pub clock: C,
    pub delay: D,
}

#[cfg(target_os = "linux")]
impl Backend<LinuxClientFactory, SysfsGpio, SystemMonotonic, SleepDelay> {
    pub fn linux() -> Self {
        Backend {
            factory: LinuxClientFactory,
            gpio: SysfsGpio,
            clock: SystemMonotonic,
            delay: SleepDelay,
        }
    }
}

struct Registration {
    what: &'static str,
    release: Box<dyn FnOnce() + Send>,
}

/// Release actions, run last-registered first.
#[derive(Default)]
struct Registrations(Vec<Registration>);

impl Registrations {
    fn push<R: FnOnce() + Send + 'static>(&mut self, what: &'static str, release: R) {
        self.0.push(Registration {
            what,
            release: Box::new(release),
        });
    }

    fn unwind(&mut self) {
        while let Some(registration) = self.0.pop() {
            info!("BME280: releasing {}", registration.what);
            (registration.release)();
        }
    }
}

impl Drop for Registrations {
    fn drop(&mut self) {
        self.unwind();
    }
}

/// Runs the period state machine for every edge the button delivers.
struct EdgeHandler {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EdgeHandler {
    fn request<I, C>(
        mut input: I,
        clock: C,
        state: Arc<PeriodState>,
        kobj: Arc<KObject>,
    ) -> Result<EdgeHandler>
    where
        I: EdgeInput + Send + 'static,
        C: MonotonicClock + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(BUTTON_HANDLER_NAME.to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        match input.wait_for_edge(EDGE_POLL) {
                            Ok(true) => handle_edge(&clock, &state, &kobj),
                            Ok(false) => {}
                            Err(e) => {
                                error!("BME280: waiting for button failed: {}", e);
                                thread::sleep(EDGE_POLL);
                            }
                        }
                    }
                })?
        };
        Ok(EdgeHandler {
            stop,
            thread: Some(thread),
        })
    }

    fn free(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.store(true, Ordering::Release);
            if thread.join().is_err() {
                error!("BME280: button handler panicked");
            }
        }
    }
}

fn handle_edge<C: MonotonicClock>(clock: &C, state: &PeriodState, kobj: &KObject) {
    let now = match clock.now() {
        Ok(now) => now,
        Err(e) => {
            error!("BME280: can't read monotonic clock: {}", e);
            return;
        }
    };
    match state.on_edge(now) {
        IrqReturn::Handled => {
            info!("BME280: period is now {} ms", state.period_ms());
            if let Err(e) = kobj.refresh() {
                warn!("BME280: failed to publish period: {}", e);
            }
        }
        IrqReturn::None => trace!("BME280: button bounce ignored"),
    }
}

pub struct Driver {
    params: ModuleParams,
    state: Arc<PeriodState>,
    kobj: Arc<KObject>,
    registrations: Registrations,
}

impl Driver {
    pub fn load<F, G, C, D>(
        params: ModuleParams,
        host: &HostConfig,
        backend: Backend<F, G, C, D>,
    ) -> Result<Driver>
    where
        F: ClientFactory + Send + 'static,
        G: GpioChip + Send + Sync + 'static,
        C: MonotonicClock + Send + 'static,
        D: Delay + Send + 'static,
    {
        info!("BME280: Initializing device driver.");
        Driver::try_load(params, host, backend).map_err(|e| {
            error!("BME280: {}", e);
            e
        })
    }

    fn try_load<F, G, C, D>(
        params: ModuleParams,
        host: &HostConfig,
        backend: Backend<F, G, C, D>,
    ) -> Result<Driver>
    where
        F: ClientFactory + Send + 'static,
        G: GpioChip + Send + Sync + 'static,
        C: MonotonicClock + Send + 'static,
        D: Delay + Send + 'static,
    {
        let Backend {
            factory,
            gpio,
            clock,
            delay,
        } = backend;
        let gpio = Arc::new(gpio);
        let mut registrations = Registrations::default();

        let now = clock.now().map_err(Error::init("read monotonic clock"))?;
        let state = Arc::new(PeriodState::new(now));

        let led = gpio
            .request_output(params.gpio_led)
            .map_err(Error::init("request LED gpio"))?;
        {
            let gpio = gpio.clone();
            let mut led = led.clone();
            registrations.push("LED gpio", move || {
                if let Err(e) = led.set_value(0) {
                    warn!("BME280: failed to switch LED off: {}", e);
                }
                gpio.free(params.gpio_led);
            });
        }

        let button = gpio
            .request_falling_edge(params.gpio_button, BUTTON_HANDLER_NAME)
            .map_err(Error::init("request button gpio"))?;
        {
            let gpio = gpio.clone();
            registrations.push("button gpio", move || gpio.free(params.gpio_button));
        }

        let device = Bme280Device::new(factory, host.bus, host.address, led, delay);
        let mut node = DeviceNode::register(&host.dev_dir, device)
            .map_err(Error::init("register device node"))?;
        registrations.push("device node", move || node.unregister());

        let group = AttributeGroup::weather(state.clone());
        let kobj = KObject::create(&host.sysfs_dir, KOBJECT_NAME, group)
            .map_err(Error::init("create sysfs group"))?;
        let kobj = Arc::new(kobj);
        {
            let kobj = kobj.clone();
            registrations.push("sysfs group", move || kobj.remove());
        }

        let mut irq = EdgeHandler::request(button, clock, state.clone(), kobj.clone())
            .map_err(Error::init("request button handler"))?;
        registrations.push("button handler", move || irq.free());

        info!(
            "BME280: Initialized successfully (LED gpio {}, button gpio {})",
            params.gpio_led, params.gpio_button
        );
        Ok(Driver {
            params,
            state,
            kobj,
            registrations,
        })
    }

    pub fn params(&self) -> ModuleParams {
        self.params
    }

    pub fn period_ms(&self) -> i32 {
        self.state.period_ms()
    }

    pub fn button_pressed(&self) -> u32 {
        self.state.button_pressed()
    }

    /// Shows an attribute of the weather group.
    pub fn show(&self, attr: &str) -> Option<String> {
        self.kobj.show(attr)
    }

    pub fn unload(mut self) {
        warn!("BME280: Stopping device driver");
        self.registrations.unwind();
    }
}
