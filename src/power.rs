use rppal::i2c::I2c;
use tracing::*;

use crate::error::{TrexError, TrexResult};

/// Battery and status peripheral surface.
///
/// The LED is written from the foreground only; the telemetry getters feed
/// the system report.
pub trait PowerStatus: Send {
    fn set_led(&mut self, red: u8, green: u8, blue: u8) -> TrexResult<()>;
    fn status(&mut self) -> TrexResult<String>;
    fn fault_status(&mut self) -> TrexResult<String>;
    /// Battery charge in percent.
    fn charge_level(&mut self) -> TrexResult<u8>;
    /// Battery temperature in degrees Celsius.
    fn battery_temperature(&mut self) -> TrexResult<i16>;
    /// Battery voltage in millivolts.
    fn battery_voltage(&mut self) -> TrexResult<u16>;
    /// Battery current in milliamps.
    fn battery_current(&mut self) -> TrexResult<i16>;
    fn io_voltage(&mut self) -> TrexResult<u16>;
    fn io_current(&mut self) -> TrexResult<i16>;
    fn firmware_version(&mut self) -> TrexResult<String>;
}

const PIJUICE_ADDRESS: u16 = 0x14;

const STATUS_CMD: u8 = 0x40;
const CHARGE_LEVEL_CMD: u8 = 0x41;
const FAULT_EVENT_CMD: u8 = 0x44;
const BATTERY_TEMPERATURE_CMD: u8 = 0x47;
const BATTERY_VOLTAGE_CMD: u8 = 0x49;
const BATTERY_CURRENT_CMD: u8 = 0x4B;
const IO_VOLTAGE_CMD: u8 = 0x4D;
const IO_CURRENT_CMD: u8 = 0x4F;
const LED_STATE_CMD: u8 = 0x66;
const FIRMWARE_VERSION_CMD: u8 = 0xFD;

/// Index of the user LED (D2) relative to `LED_STATE_CMD`.
const LED_D2: u8 = 1;

pub struct PiJuicePower {
    i2c: I2c,
}

impl PiJuicePower {
    pub fn open() -> TrexResult<Self> {
        let mut i2c = I2c::new().map_err(|error| TrexError::PowerInitFailed(error.to_string()))?;
        i2c.set_slave_address(PIJUICE_ADDRESS)
            .map_err(|error| TrexError::PowerInitFailed(error.to_string()))?;
        let mut power = PiJuicePower { i2c };
        // probe the device so a missing HAT fails at startup
        power
            .read_data(STATUS_CMD, 1)
            .map_err(|error| TrexError::PowerInitFailed(error.to_string()))?;
        info!("PiJuice initialized at 0x{:02x}", PIJUICE_ADDRESS);
        Ok(power)
    }

    fn read_data(&mut self, command: u8, length: usize) -> TrexResult<Vec<u8>> {
        let mut buffer = vec![0u8; length + 1];
        self.i2c.write_read(&[command], &mut buffer)?;
        let data = buffer[..length].to_vec();
        if checksum(&data) != buffer[length] {
            return Err(TrexError::PowerReadFailed(format!(
                "checksum mismatch on command 0x{command:02x}"
            )));
        }
        Ok(data)
    }

    fn write_data(&mut self, command: u8, data: &[u8]) -> TrexResult<()> {
        let mut frame = Vec::with_capacity(data.len() + 2);
        frame.push(command);
        frame.extend_from_slice(data);
        frame.push(checksum(data));
        self.i2c.write(&frame)?;
        Ok(())
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0xFF, |fcs, byte| fcs ^ byte)
}

fn signed_word(low: u8, high: u8) -> i16 {
    u16::from_le_bytes([low, high]) as i16
}

impl PowerStatus for PiJuicePower {
    fn set_led(&mut self, red: u8, green: u8, blue: u8) -> TrexResult<()> {
        self.write_data(LED_STATE_CMD + LED_D2, &[red, green, blue])
    }

    fn status(&mut self) -> TrexResult<String> {
        let data = self.read_data(STATUS_CMD, 1)?;
        let battery = match (data[0] >> 2) & 0x03 {
            0 => "NORMAL",
            1 => "CHARGING_FROM_IN",
            2 => "CHARGING_FROM_5V_IO",
            _ => "NOT_PRESENT",
        };
        let power_input = match (data[0] >> 4) & 0x03 {
            0 => "NOT_PRESENT",
            1 => "BAD",
            2 => "WEAK",
            _ => "PRESENT",
        };
        Ok(format!("battery: {battery}, power input: {power_input}"))
    }

    fn fault_status(&mut self) -> TrexResult<String> {
        let data = self.read_data(FAULT_EVENT_CMD, 1)?;
        if data[0] == 0 {
            Ok("NO_FAULT".to_owned())
        } else {
            Ok(format!("fault flags 0b{:08b}", data[0]))
        }
    }

    fn charge_level(&mut self) -> TrexResult<u8> {
        Ok(self.read_data(CHARGE_LEVEL_CMD, 1)?[0])
    }

    fn battery_temperature(&mut self) -> TrexResult<i16> {
        let data = self.read_data(BATTERY_TEMPERATURE_CMD, 2)?;
        Ok((data[0] as i8) as i16)
    }

    fn battery_voltage(&mut self) -> TrexResult<u16> {
        let data = self.read_data(BATTERY_VOLTAGE_CMD, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    fn battery_current(&mut self) -> TrexResult<i16> {
        let data = self.read_data(BATTERY_CURRENT_CMD, 2)?;
        Ok(signed_word(data[0], data[1]))
    }

    fn io_voltage(&mut self) -> TrexResult<u16> {
        let data = self.read_data(IO_VOLTAGE_CMD, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    fn io_current(&mut self) -> TrexResult<i16> {
        let data = self.read_data(IO_CURRENT_CMD, 2)?;
        Ok(signed_word(data[0], data[1]))
    }

    fn firmware_version(&mut self) -> TrexResult<String> {
        let data = self.read_data(FIRMWARE_VERSION_CMD, 2)?;
        Ok(format!("{}.{}", data[0] >> 4, data[0] & 0x0F))
    }
}

/// Desktop stand-in with plausible telemetry and a logged LED. The LED
/// state is shared so tests can keep a handle while the CPU owns the stub.
#[derive(Debug, Default)]
pub struct StubPower {
    led: std::sync::Arc<std::sync::Mutex<(u8, u8, u8)>>,
}

impl StubPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn led_handle(&self) -> std::sync::Arc<std::sync::Mutex<(u8, u8, u8)>> {
        std::sync::Arc::clone(&self.led)
    }
}

impl PowerStatus for StubPower {
    fn set_led(&mut self, red: u8, green: u8, blue: u8) -> TrexResult<()> {
        *self.led.lock().unwrap() = (red, green, blue);
        debug!("Stub LED set to ({red}, {green}, {blue})");
        Ok(())
    }

    fn status(&mut self) -> TrexResult<String> {
        Ok("battery: NORMAL, power input: PRESENT".to_owned())
    }

    fn fault_status(&mut self) -> TrexResult<String> {
        Ok("NO_FAULT".to_owned())
    }

    fn charge_level(&mut self) -> TrexResult<u8> {
        Ok(100)
    }

    fn battery_temperature(&mut self) -> TrexResult<i16> {
        Ok(25)
    }

    fn battery_voltage(&mut self) -> TrexResult<u16> {
        Ok(4100)
    }

    fn battery_current(&mut self) -> TrexResult<i16> {
        Ok(-120)
    }

    fn io_voltage(&mut self) -> TrexResult<u16> {
        Ok(5050)
    }

    fn io_current(&mut self) -> TrexResult<i16> {
        Ok(350)
    }

    fn firmware_version(&mut self) -> TrexResult<String> {
        Ok("1.4".to_owned())
    }
}
