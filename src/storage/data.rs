use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Tags;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Timestamp not strictly increasing for series {0}")]
    NonIncreasingTimestamp(String),
    #[error("Invalid value at {0}: value must be finite")]
    NonFiniteValue(DateTime<Utc>),
}

/// Represents a single sample in a time series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    timestamp: DateTime<Utc>,
    value: f64,
}

impl DataPoint {
    /// Creates a new DataPoint with the given timestamp and value
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Validates the data point
    pub fn validate(&self) -> Result<(), DataError> {
        if !self.value.is_finite() {
            return Err(DataError::NonFiniteValue(self.timestamp));
        }
        Ok(())
    }
}

/// Represents a named series of samples ordered by time
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    name: String,
    tags: Tags,
    points: Vec<DataPoint>,
}

impl Series {
    /// Creates an empty series
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
            points: Vec::new(),
        }
    }

    /// Creates a series from points that are already ordered
    pub fn with_points(name: impl Into<String>, tags: Tags, points: Vec<DataPoint>) -> Self {
        Self {
            name: name.into(),
            tags,
            points,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Appends a point, rejecting timestamps that do not move forward
    pub fn push(&mut self, point: DataPoint) -> Result<(), DataError> {
        point.validate()?;
        if let Some(last) = self.points.last() {
            if point.timestamp() <= last.timestamp() {
                return Err(DataError::NonIncreasingTimestamp(self.name.clone()));
            }
        }
        self.points.push(point);
        Ok(())
    }

    /// Appends every point or none of them
    pub fn append(&mut self, points: &[DataPoint]) -> Result<(), DataError> {
        let mut last = self.points.last().map(|p| p.timestamp());
        for point in points {
            point.validate()?;
            if last.is_some_and(|last| point.timestamp() <= last) {
                return Err(DataError::NonIncreasingTimestamp(self.name.clone()));
            }
            last = Some(point.timestamp());
        }
        self.points.extend_from_slice(points);
        Ok(())
    }

    /// Returns a copy restricted to the inclusive time range
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Series {
        let points = self
            .points
            .iter()
            .filter(|p| p.timestamp() >= start && p.timestamp() <= end)
            .copied()
            .collect();
        Series::with_points(self.name.clone(), self.tags.clone(), points)
    }
}

/// The unit of data pushed between runtime nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    series: Vec<Series>,
}

impl Block {
    pub fn new(series: Vec<Series>) -> Self {
        Self { series }
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn into_series(self) -> Vec<Series> {
        self.series
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
