#[macro_use]
extern crate serde_derive;

use std::io;
use std::path::PathBuf;
use std::process;

use docopt::Docopt;
use log::{error, info};

use bme280_station::*;

const USAGE: &'static str = "
BME280 weather station driver

Usage:
  bme280 serve [options] [--gpioButton <n>] [--gpioLED <n>] [--bus <n>] [--address <addr>]
  bme280 read [options] [--raw]
  bme280 period [options]
  bme280 watch [options]
  bme280 (-h | --help)
  bme280 (-v | --version)

Options:
  -h --help            Show this help text.
  -v --version         Show version.
  --gpioButton <n>     GPIO line of the period button [default: 24].
  --gpioLED <n>        GPIO line of the activity LED [default: 23].
  --bus <n>            I2C bus number [default: 1].
  --address <addr>     I2C device address [default: 118] (=0x76).
  --dev-dir <dir>      Directory of the device node [default: /run/bme280].
  --sysfs-dir <dir>    Attribute files directory [default: /run/bme280/kernel].
  --raw                Print the raw payload instead of compensated values.
";

#[derive(Debug, Deserialize)]
struct Args {
    cmd_serve: bool,
    cmd_read: bool,
    cmd_period: bool,
    cmd_watch: bool,
    #[serde(rename = "flag_gpioButton")]
    flag_gpio_button: u32,
    #[serde(rename = "flag_gpioLED")]
    flag_gpio_led: u32,
    flag_bus: u8,
    flag_address: u16,
    flag_dev_dir: String,
    flag_sysfs_dir: String,
    flag_raw: bool,
    flag_version: bool,
}

impl Args {
    fn params(&self) -> ModuleParams {
        ModuleParams {
            gpio_button: self.flag_gpio_button,
            gpio_led: self.flag_gpio_led,
        }
    }

    fn host(&self) -> HostConfig {
        HostConfig {
            bus: self.flag_bus,
            address: self.flag_address,
            dev_dir: PathBuf::from(&self.flag_dev_dir),
            sysfs_dir: PathBuf::from(&self.flag_sysfs_dir),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    println!("This program can run only on Linux")
}

#[cfg(target_os = "linux")]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if args.flag_version {
        println!("bme280 {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = if args.cmd_serve {
        serve(&args)
    } else if args.cmd_read {
        read(&args)
    } else if args.cmd_watch {
        watch(&args);
        Ok(())
    } else {
        period(&args)
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

/// Loads the driver and keeps it loaded until SIGINT or SIGTERM.
#[cfg(target_os = "linux")]
fn serve(args: &Args) -> Result<()> {
    use nix::sys::signal::{SigSet, Signal};

    // block before any thread is spawned so that only sigwait sees them
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;

    let driver = Driver::load(args.params(), &args.host(), Backend::linux())?;
    let signal = signals.wait()?;
    info!("BME280: got {:?}, unloading", signal);
    driver.unload();
    Ok(())
}

fn read(args: &Args) -> Result<()> {
    let payload = read_payload(&args.host().dev_dir)?;

    if args.flag_raw {
        let hex: Vec<String> = payload.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{}", hex.join(" "));
        return Ok(());
    }

    let m = Snapshot::parse(&payload)?.measurements();
    print_measurements(&mut io::stdout(), &m)
}

fn period(args: &Args) -> Result<()> {
    let period = read_period(&args.host().sysfs_dir)?;
    println!("Update each: {}s", period as f64 / 1000.0);
    Ok(())
}

/// Refreshes the readings every `period_ms`, like the weather widget.
fn watch(args: &Args) {
    let host = args.host();
    let mut watcher = Watcher::new(&host.dev_dir, &host.sysfs_dir, SleepDelay);
    watcher.run(&mut io::stdout(), None);
}
