//! # Sensor Bus
//!
//! The daemon only ever sees this trait; the real BME280 driver lives
//! behind it on device builds. The simulated implementation keeps the
//! daemon runnable on a development machine with no hardware attached.

use async_trait::async_trait;

use nimbus_core::TelemetryReading;

/// Source of weather samples.
#[async_trait]
pub trait SensorBus: Send {
    /// Takes one sample. `None` means the bus had nothing usable this
    /// tick; the tick is skipped, not retried.
    async fn sample(&mut self) -> Option<TelemetryReading>;
}

/// Deterministic fake sensor with a slow drift, for development and demos.
pub struct SimulatedSensors {
    tick: u64,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        SimulatedSensors { tick: 0 }
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorBus for SimulatedSensors {
    async fn sample(&mut self) -> Option<TelemetryReading> {
        // Triangle waves with different periods so the three channels
        // drift independently.
        let swing = |period: u64, amplitude: f64| {
            let phase = self.tick % period;
            let half = period / 2;
            let steps = if phase < half { phase } else { period - phase };
            steps as f64 * amplitude
        };

        let reading = TelemetryReading {
            temperature_c: 18.0 + swing(120, 0.1),
            humidity_pct: 42.0 + swing(80, 0.3),
            pressure_pa: 101_100.0 + swing(200, 4.0),
        };
        self.tick += 1;
        Some(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_readings_are_always_valid() {
        let mut sensors = SimulatedSensors::new();
        for _ in 0..500 {
            let reading = sensors.sample().await.unwrap();
            reading.validate().unwrap();
            assert!(reading.temperature_c >= 18.0 && reading.temperature_c <= 25.0);
            assert!(reading.humidity_pct >= 42.0 && reading.humidity_pct <= 55.0);
        }
    }
}
