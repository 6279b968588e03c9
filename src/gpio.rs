use std::collections::HashMap;

use crate::Error;

/// Direction of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Read from the pin
    Input,
    /// Drive the pin
    Output,
}

/// Logic level written to a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    ///
    Low,
    ///
    High,
}

impl From<bool> for Level {
    fn from(on: bool) -> Self {
        if on {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// General purpose I/O pins
pub trait Gpio: Send {
    /// Configure the direction of `pin`
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> crate::Result<()>;
    /// Drive `pin`, which must be configured as an output
    fn write_pin(&mut self, pin: u8, level: Level) -> crate::Result<()>;
}

/// Pin bank that remembers its configuration instead of driving hardware
#[derive(Debug, Default)]
pub struct RecordingGpio {
    modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, Level>,
    writes: Vec<(u8, Level)>,
}

impl RecordingGpio {
    /// Current direction of `pin`
    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    /// Last level written to `pin`
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.levels.get(&pin).copied()
    }

    /// Every write in order
    pub fn writes(&self) -> &[(u8, Level)] {
        &self.writes
    }
}

impl Gpio for RecordingGpio {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> crate::Result<()> {
        trace!("pin {} mode {:?}", pin, mode);
        self.modes.insert(pin, mode);
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, level: Level) -> crate::Result<()> {
        if self.mode(pin) != Some(PinMode::Output) {
            return Err(Error::Gpio {
                pin,
                reason: "pin is not configured as an output".to_string(),
            });
        }

        debug!("pin {} <- {:?}", pin, level);
        self.levels.insert(pin, level);
        self.writes.push((pin, level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_output_mode() {
        let mut gpio = RecordingGpio::default();
        assert!(gpio.write_pin(7, Level::High).is_err());

        gpio.set_pin_mode(7, PinMode::Input).unwrap();
        assert!(gpio.write_pin(7, Level::High).is_err());

        gpio.set_pin_mode(7, PinMode::Output).unwrap();
        gpio.write_pin(7, Level::High).unwrap();
        assert_eq!(gpio.level(7), Some(Level::High));
        assert_eq!(gpio.writes(), &[(7, Level::High)]);
    }

    #[test]
    fn level_from_bool() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
    }
}
