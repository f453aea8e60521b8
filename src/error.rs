#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("gpio error: {0}")]
    Gpio(#[from] sysfs_gpio::Error),

    #[error("system error: {0}")]
    Sys(#[from] nix::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("can't instantiate i2c client on bus {bus} at {address:#04x}")]
    ClientAllocation {
        bus: u8,
        address: u16,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to {step}")]
    Init {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("payload is {0} bytes, expected 40")]
    ShortPayload(usize),
}

impl Error {
    pub(crate) fn init(step: &'static str) -> impl FnOnce(Error) -> Error {
        move |source| Error::Init {
            step,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
