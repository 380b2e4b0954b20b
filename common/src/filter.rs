use std::{collections::VecDeque, num::NonZeroUsize};

use tokio::sync::mpsc;
use tracing::debug;

use crate::ports::{SensorReading, TemperatureSource};

const READING_CHANNEL_CAPACITY: usize = 32;

/// Fixed-count sliding window average.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: VecDeque<f64>,
    size: NonZeroUsize,
}

impl MovingAverage {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            window: VecDeque::with_capacity(size.get()),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    /// Pushes a reading and returns the window mean once the window is full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.window.len() == self.size.get() {
            self.window.pop_front();
        }
        self.window.push_back(value);

        if self.window.len() < self.size.get() {
            return None;
        }

        let sum: f64 = self.window.iter().sum();
        Some(sum / self.size.get() as f64)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Smooths another source through a [`MovingAverage`].
///
/// Each run starts with an empty window. Sensor errors are forwarded as-is and
/// never enter the window.
pub struct MovingAverageReader<S> {
    source: S,
    size: NonZeroUsize,
}

impl<S: TemperatureSource> MovingAverageReader<S> {
    pub fn new(source: S, size: NonZeroUsize) -> Self {
        Self { source, size }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: TemperatureSource> TemperatureSource for MovingAverageReader<S> {
    fn start(&mut self) -> mpsc::Receiver<SensorReading> {
        let mut raw = self.source.start();
        let (tx, rx) = mpsc::channel(READING_CHANNEL_CAPACITY);
        let mut average = MovingAverage::new(self.size);

        tokio::spawn(async move {
            while let Some(reading) = raw.recv().await {
                let smoothed = match reading {
                    Ok(temp) => match average.push(temp) {
                        Some(mean) => Ok(mean),
                        None => continue,
                    },
                    Err(err) => Err(err),
                };

                if tx.send(smoothed).await.is_err() {
                    debug!("smoothed reading receiver dropped");
                    break;
                }
            }
        });

        rx
    }

    fn stop(&mut self) {
        self.source.stop();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::ports::SensorError;

    fn window(size: usize) -> MovingAverage {
        MovingAverage::new(NonZeroUsize::new(size).unwrap())
    }

    fn run(size: usize, values: &[f64]) -> Vec<f64> {
        let mut average = window(size);
        values.iter().filter_map(|value| average.push(*value)).collect()
    }

    #[test]
    fn waits_for_full_window() {
        let mut average = window(3);
        assert_eq!(average.push(70.0), None);
        assert_eq!(average.push(71.0), None);
        assert_eq!(average.push(72.0), Some(71.0));
        assert_eq!(average.push(76.0), Some(73.0));
    }

    #[test]
    fn window_of_one_passes_values_through() {
        assert_eq!(run(1, &[68.0, 67.5, 90.0]), vec![68.0, 67.5, 90.0]);
    }

    #[test]
    fn divides_by_window_size_without_rounding() {
        assert_eq!(run(3, &[1.0, 0.0, 0.0]), vec![1.0 / 3.0]);
    }

    #[test]
    fn reset_empties_window() {
        let mut average = window(2);
        average.push(10.0);
        average.reset();
        assert_eq!(average.push(20.0), None);
        assert_eq!(average.push(30.0), Some(25.0));
    }

    proptest! {
        #[test]
        fn short_input_produces_nothing(
            size in 2usize..10,
            values in proptest::collection::vec(-50.0f64..150.0, 0..10),
        ) {
            prop_assume!(values.len() < size);
            prop_assert!(run(size, &values).is_empty());
        }

        #[test]
        fn each_output_is_mean_of_its_slice(
            size in 1usize..8,
            values in proptest::collection::vec(-50.0f64..150.0, 0..40),
        ) {
            let outputs = run(size, &values);
            let expected_len = if values.len() >= size { values.len() - size + 1 } else { 0 };
            prop_assert_eq!(outputs.len(), expected_len);

            for (index, output) in outputs.iter().enumerate() {
                let slice = &values[index..index + size];
                let mean = slice.iter().sum::<f64>() / size as f64;
                prop_assert!((output - mean).abs() < 1e-9, "window {index}: {output} vs {mean}");
            }
        }
    }

    struct ScriptedSource {
        readings: Vec<SensorReading>,
    }

    impl TemperatureSource for ScriptedSource {
        fn start(&mut self) -> mpsc::Receiver<SensorReading> {
            let (tx, rx) = mpsc::channel(self.readings.len().max(1));
            for reading in self.readings.drain(..) {
                tx.try_send(reading).unwrap();
            }
            rx
        }

        fn stop(&mut self) {}
    }

    #[tokio::test]
    async fn reader_smooths_and_forwards_errors() {
        let source = ScriptedSource {
            readings: vec![
                Ok(70.0),
                Err(SensorError::ReadFailed("checksum".to_string())),
                Ok(68.0),
                Ok(66.0),
            ],
        };
        let mut reader = MovingAverageReader::new(source, NonZeroUsize::new(2).unwrap());

        let mut rx = reader.start();
        let mut received = Vec::new();
        while let Some(reading) = rx.recv().await {
            received.push(reading);
        }

        assert_eq!(
            received,
            vec![
                Err(SensorError::ReadFailed("checksum".to_string())),
                Ok(69.0),
                Ok(67.0),
            ]
        );
    }

    #[tokio::test]
    async fn reader_completes_without_output_when_upstream_is_short() {
        let source = ScriptedSource {
            readings: vec![Ok(70.0), Ok(71.0)],
        };
        let mut reader = MovingAverageReader::new(source, NonZeroUsize::new(3).unwrap());

        let mut rx = reader.start();
        assert_eq!(rx.recv().await, None);
    }
}
