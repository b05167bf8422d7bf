//! Sensor readings
//!
//! [`SimulatedSensor`] models a bin that slowly fills, is occasionally
//! emptied by a collection round, and runs on a slowly draining battery.

use crate::protocol::SensorReading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of one reading per publish
pub trait SensorReader: Send {
    fn read(&mut self) -> SensorReading;
}

const TEMPERATURE_RANGE: (f64, f64) = (15.0, 40.0);
const TEMPERATURE_STEP: f64 = 0.5;
const BATTERY_DRAIN_PER_READING: f64 = 0.01;
const COLLECTION_THRESHOLD: f64 = 85.0;
const COLLECTION_PROBABILITY: f64 = 0.1;
/// Kilograms per litre of mixed waste
const WASTE_DENSITY: f64 = 0.5;

pub struct SimulatedSensor {
    capacity_liters: f64,
    fill_level: f64,
    temperature_c: f64,
    battery_level: f64,
    fill_rate: f64,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(capacity_liters: f64) -> Self {
        Self::from_rng(capacity_liters, StdRng::from_entropy())
    }

    /// Deterministic sequence for tests
    pub fn with_seed(capacity_liters: f64, seed: u64) -> Self {
        Self::from_rng(capacity_liters, StdRng::seed_from_u64(seed))
    }

    fn from_rng(capacity_liters: f64, mut rng: StdRng) -> Self {
        Self {
            capacity_liters,
            fill_level: rng.gen_range(10.0..40.0),
            temperature_c: rng.gen_range(20.0..30.0),
            battery_level: rng.gen_range(80.0..100.0),
            fill_rate: rng.gen_range(0.5..2.0),
            rng,
        }
    }

    pub fn fill_level(&self) -> f64 {
        self.fill_level
    }

    fn advance(&mut self) {
        self.fill_level = (self.fill_level + self.rng.gen_range(0.0..self.fill_rate)).min(100.0);

        let step = self.rng.gen_range(-TEMPERATURE_STEP..TEMPERATURE_STEP);
        self.temperature_c = (self.temperature_c + step).clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1);

        self.battery_level = (self.battery_level - BATTERY_DRAIN_PER_READING).max(0.0);

        if self.fill_level > COLLECTION_THRESHOLD && self.rng.gen_bool(COLLECTION_PROBABILITY) {
            tracing::info!(fill_level = self.fill_level, "Bin collected, fill level reset");
            self.fill_level = self.rng.gen_range(0.0..10.0);
        }
    }
}

impl SensorReader for SimulatedSensor {
    fn read(&mut self) -> SensorReading {
        self.advance();
        SensorReading {
            fill_level: self.fill_level,
            weight_kg: self.fill_level * self.capacity_liters / 100.0 * WASTE_DENSITY,
            temperature_c: self.temperature_c,
            battery_level: self.battery_level,
            signal_strength_dbm: self.rng.gen_range(-90..=-30),
        }
    }
}
