use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

/// One sample from a temperature/pressure/humidity sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature_c: f32,
    /// Pascal
    pub pressure_pa: f32,
    /// Relative humidity in percent
    pub humidity_pct: f32,
}

/// Sensor failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// Nothing answered on the bus
    #[error("no sensor attached")]
    NotAttached,
    /// The sensor answered but the sample is unusable
    #[error("failed to read sensor: {0}")]
    ReadFailed(String),
}

/// Environmental sensor driver
pub trait Sensor: Send {
    /// Probe and configure the sensor
    fn init(&mut self) -> Result<(), SensorError>;
    /// Take one sample
    fn read(&mut self) -> Result<Reading, SensorError>;
    /// Whether readings are generated rather than measured
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Sensor producing normally distributed readings around room conditions
#[derive(Debug)]
pub struct SimulatedSensor {
    temperature: Normal<f32>,
    pressure: Normal<f32>,
    humidity: Normal<f32>,
    rng: StdRng,
    initialized: bool,
}

impl SimulatedSensor {
    /// Sensor seeded from the operating system
    pub fn new() -> Result<Self, SensorError> {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Sensor with a fixed seed, producing the same readings on every run
    pub fn seeded(seed: u64) -> Result<Self, SensorError> {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Result<Self, SensorError> {
        let normal = |mean: f32, std_dev: f32| {
            Normal::new(mean, std_dev).map_err(|e| SensorError::ReadFailed(e.to_string()))
        };

        Ok(Self {
            temperature: normal(25.0, 7.0)?,
            pressure: normal(101_325.0, 500.0)?,
            humidity: normal(50.0, 7.0)?,
            rng,
            initialized: false,
        })
    }
}

impl Sensor for SimulatedSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        self.initialized = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.initialized {
            return Err(SensorError::NotAttached);
        }

        Ok(Reading {
            temperature_c: self.temperature.sample(&mut self.rng),
            pressure_pa: self.pressure.sample(&mut self.rng),
            humidity_pct: self.humidity.sample(&mut self.rng).max(0.0).min(100.0),
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_init() {
        let mut sensor = SimulatedSensor::seeded(1).unwrap();
        assert_eq!(sensor.read(), Err(SensorError::NotAttached));

        sensor.init().unwrap();
        assert!(sensor.read().is_ok());
    }

    #[test]
    fn humidity_stays_in_range() {
        let mut sensor = SimulatedSensor::seeded(7).unwrap();
        sensor.init().unwrap();

        for _ in 0..1000 {
            let reading = sensor.read().unwrap();
            assert!((0.0..=100.0).contains(&reading.humidity_pct));
        }
    }

    #[test]
    fn same_seed_same_readings() {
        let mut a = SimulatedSensor::seeded(42).unwrap();
        let mut b = SimulatedSensor::seeded(42).unwrap();
        a.init().unwrap();
        b.init().unwrap();

        assert_eq!(a.read(), b.read());
    }
}
