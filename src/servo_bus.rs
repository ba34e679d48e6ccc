use std::sync::{Arc, Mutex};

use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use tracing::*;

use crate::error::{TrexError, TrexResult};

/// 16 channel PWM servo controller surface.
///
/// The real implementation talks to a PCA9685 based servo board over I²C;
/// the stub records writes so desktop runs and tests work without hardware.
pub trait ServoBus: Send {
    /// Pulse length in milliseconds for the lower servo limit, all channels.
    fn set_low_limit(&mut self, ms: f64) -> TrexResult<()>;
    /// Pulse length in milliseconds for the upper servo limit, all channels.
    fn set_high_limit(&mut self, ms: f64) -> TrexResult<()>;
    fn output_enable(&mut self) -> TrexResult<()>;
    fn output_disable(&mut self) -> TrexResult<()>;
    fn sleep(&mut self) -> TrexResult<()>;
    fn wake(&mut self) -> TrexResult<()>;
    /// Moves a servo to `position` on a scale of 0 to `steps` between the
    /// low and high pulse limits.
    fn move_servo(&mut self, channel: u8, position: f64, steps: u16) -> TrexResult<()>;
}

const PCA9685_ADDRESS: u16 = 0x40;
const PCA9685_MODE1: u8 = 0x00;
const PCA9685_MODE2: u8 = 0x01;
const PCA9685_PRESCALE: u8 = 0xFE;
const PCA9685_LED0_ON_L: u8 = 0x06;
const PCA9685_INTERNAL_FREQ: f64 = 25_000_000.0;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_AUTO_INCREMENT: u8 = 0x20;

/// Output-enable pin of the servo board, active low.
const OE_GPIO: u8 = 4;

const PWM_FREQUENCY_HZ: f64 = 50.0;
const PWM_PERIOD_MS: f64 = 1000.0 / PWM_FREQUENCY_HZ;

pub struct Pca9685ServoBus {
    i2c: I2c,
    output_enable_pin: OutputPin,
    low_limit_ms: f64,
    high_limit_ms: f64,
}

impl Pca9685ServoBus {
    pub fn open() -> TrexResult<Self> {
        let mut i2c =
            I2c::new().map_err(|error| TrexError::ServoBusInitFailed(error.to_string()))?;
        i2c.set_slave_address(PCA9685_ADDRESS)
            .map_err(|error| TrexError::ServoBusInitFailed(error.to_string()))?;
        let output_enable_pin = Gpio::new()
            .and_then(|gpio| gpio.get(OE_GPIO))
            .map_err(|error| TrexError::ServoBusInitFailed(error.to_string()))?
            .into_output();

        let mut bus = Pca9685ServoBus {
            i2c,
            output_enable_pin,
            low_limit_ms: 1.0,
            high_limit_ms: 2.0,
        };
        bus.initialize()
            .map_err(|error| TrexError::ServoBusInitFailed(error.to_string()))?;
        info!("PCA9685 servo controller initialized at 0x{:02x}", PCA9685_ADDRESS);
        Ok(bus)
    }

    fn initialize(&mut self) -> TrexResult<()> {
        // prescaler can only be changed while the oscillator is asleep
        self.i2c
            .smbus_write_byte(PCA9685_MODE1, MODE1_SLEEP)?;
        let prescale =
            (PCA9685_INTERNAL_FREQ / (4096.0 * PWM_FREQUENCY_HZ)).round() as u8 - 1;
        self.i2c.smbus_write_byte(PCA9685_PRESCALE, prescale)?;
        self.i2c
            .smbus_write_byte(PCA9685_MODE1, MODE1_AUTO_INCREMENT)?;
        // totem pole outputs
        self.i2c.smbus_write_byte(PCA9685_MODE2, 0x04)?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        Ok(())
    }
}

impl ServoBus for Pca9685ServoBus {
    fn set_low_limit(&mut self, ms: f64) -> TrexResult<()> {
        self.low_limit_ms = ms;
        Ok(())
    }

    fn set_high_limit(&mut self, ms: f64) -> TrexResult<()> {
        self.high_limit_ms = ms;
        Ok(())
    }

    fn output_enable(&mut self) -> TrexResult<()> {
        self.output_enable_pin.set_low();
        Ok(())
    }

    fn output_disable(&mut self) -> TrexResult<()> {
        self.output_enable_pin.set_high();
        Ok(())
    }

    fn sleep(&mut self) -> TrexResult<()> {
        let mode = self.i2c.smbus_read_byte(PCA9685_MODE1)?;
        self.i2c
            .smbus_write_byte(PCA9685_MODE1, mode | MODE1_SLEEP)?;
        Ok(())
    }

    fn wake(&mut self) -> TrexResult<()> {
        let mode = self.i2c.smbus_read_byte(PCA9685_MODE1)?;
        self.i2c
            .smbus_write_byte(PCA9685_MODE1, mode & !MODE1_SLEEP)?;
        Ok(())
    }

    fn move_servo(&mut self, channel: u8, position: f64, steps: u16) -> TrexResult<()> {
        let position = position.clamp(0.0, steps as f64);
        let pulse_ms =
            self.low_limit_ms + (self.high_limit_ms - self.low_limit_ms) * position / steps as f64;
        let off_ticks = ((pulse_ms / PWM_PERIOD_MS) * 4096.0).round() as u16;
        let off_ticks = off_ticks.min(4095);
        let register = PCA9685_LED0_ON_L + 4 * channel;
        self.i2c.block_write(
            register,
            &[0, 0, (off_ticks & 0xFF) as u8, (off_ticks >> 8) as u8],
        )?;
        Ok(())
    }
}

/// What the stub remembers about the bus, shared so tests can keep a handle
/// while the body owns the bus itself.
#[derive(Debug, Default, Clone)]
pub struct StubBusState {
    pub positions: [f64; 16],
    pub write_counts: [u64; 16],
    pub low_limit_ms: f64,
    pub high_limit_ms: f64,
    pub output_enabled: bool,
    pub sleeping: bool,
}

#[derive(Default)]
pub struct StubServoBus {
    state: Arc<Mutex<StubBusState>>,
}

impl StubServoBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_handle(&self) -> Arc<Mutex<StubBusState>> {
        Arc::clone(&self.state)
    }
}

impl ServoBus for StubServoBus {
    fn set_low_limit(&mut self, ms: f64) -> TrexResult<()> {
        self.state.lock().unwrap().low_limit_ms = ms;
        Ok(())
    }

    fn set_high_limit(&mut self, ms: f64) -> TrexResult<()> {
        self.state.lock().unwrap().high_limit_ms = ms;
        Ok(())
    }

    fn output_enable(&mut self) -> TrexResult<()> {
        self.state.lock().unwrap().output_enabled = true;
        Ok(())
    }

    fn output_disable(&mut self) -> TrexResult<()> {
        self.state.lock().unwrap().output_enabled = false;
        Ok(())
    }

    fn sleep(&mut self) -> TrexResult<()> {
        self.state.lock().unwrap().sleeping = true;
        Ok(())
    }

    fn wake(&mut self) -> TrexResult<()> {
        self.state.lock().unwrap().sleeping = false;
        Ok(())
    }

    fn move_servo(&mut self, channel: u8, position: f64, _steps: u16) -> TrexResult<()> {
        let mut state = self.state.lock().unwrap();
        state.positions[channel as usize] = position;
        state.write_counts[channel as usize] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_records_moves_and_limits() {
        let mut bus = StubServoBus::new();
        let state = bus.state_handle();
        bus.set_low_limit(0.8).unwrap();
        bus.set_high_limit(2.3).unwrap();
        bus.output_enable().unwrap();
        bus.move_servo(3, 128.5, 180).unwrap();
        bus.move_servo(3, 90.0, 180).unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.low_limit_ms, 0.8);
        assert_eq!(state.high_limit_ms, 2.3);
        assert!(state.output_enabled);
        assert_eq!(state.positions[3], 90.0);
        assert_eq!(state.write_counts[3], 2);
    }

    #[test]
    fn stub_sleep_wake() {
        let mut bus = StubServoBus::new();
        let state = bus.state_handle();
        bus.sleep().unwrap();
        assert!(state.lock().unwrap().sleeping);
        bus.wake().unwrap();
        assert!(!state.lock().unwrap().sleeping);
    }
}
