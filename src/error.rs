use std::result::Result;
use thiserror::Error;

pub type TrexResult<T> = Result<T, TrexError>;

#[derive(Error, Debug)]
pub enum TrexError {
    #[error("No game controller found after {0} attempts")]
    NoInputConnected(u32),

    #[error("Game controller disconnected")]
    InputDisconnected,
    #[error("Servo controller cannot be initialized: {0}")]
    ServoBusInitFailed(String),
    #[error("PiJuice initialization failed: {0}")]
    PowerInitFailed(String),
    #[error("PiJuice communication error: {0}")]
    PowerReadFailed(String),
    #[error("Program terminated")]
    ProgramTerminated,
    #[error("Timer misuse: {0}")]
    TimerMisuse(&'static str),

    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("I2C error")]
    I2cError(#[from] rppal::i2c::Error),
    #[error("GPIO error")]
    GpioError(#[from] rppal::gpio::Error),
    #[error("Toml deserialization error")]
    TomlError(#[from] toml::de::Error),
    #[error("Toml serialization error")]
    TomlSerError(#[from] toml::ser::Error),
}

impl TrexError {
    /// True for the control-flow signal raised by SHUTDOWN and SIGINT/SIGTERM,
    /// which unwinds the foreground loop without being a failure.
    pub fn is_termination(&self) -> bool {
        matches!(self, TrexError::ProgramTerminated)
    }
}
