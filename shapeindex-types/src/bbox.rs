use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

/// Highest dimensionality a bounding box can carry.
pub const MAX_DIMENSIONS: usize = 3;

type Coords = SmallVec<[f64; MAX_DIMENSIONS]>;

/// Reasons a bounding box cannot be built from a pair of corners.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundsError {
    #[error("corner dimensions differ: low has {low}, high has {high}")]
    DimensionMismatch { low: usize, high: usize },
    #[error("bounding boxes need 1 to {MAX_DIMENSIONS} dimensions, got {0}")]
    UnsupportedDimension(usize),
    #[error("bounding box coordinates must be finite")]
    NonFinite,
}

/// An axis-aligned bounding box of 1, 2 or 3 dimensions.
///
/// The box is the indexing key handed to the tree engine. Corners are normalized on
/// construction so that `low[i] <= high[i]` holds on every axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    low: Coords,
    high: Coords,
}

impl BoundingBox {
    /// Create a bounding box from its two corners.
    ///
    /// # Examples
    ///
    /// ```
    /// use shapeindex_types::bbox::BoundingBox;
    ///
    /// // corners are swapped per axis when given in the wrong order
    /// let bbox = BoundingBox::new(&[3.0, 0.0], &[2.0, 1.0]).unwrap();
    /// assert_eq!(bbox.to_vec(), vec![2.0, 0.0, 3.0, 1.0]);
    /// ```
    pub fn new(low: &[f64], high: &[f64]) -> Result<Self, BoundsError> {
        if low.len() != high.len() {
            return Err(BoundsError::DimensionMismatch {
                low: low.len(),
                high: high.len(),
            });
        }
        if low.is_empty() || low.len() > MAX_DIMENSIONS {
            return Err(BoundsError::UnsupportedDimension(low.len()));
        }
        if !low.iter().chain(high.iter()).all(|v| v.is_finite()) {
            return Err(BoundsError::NonFinite);
        }

        let (low, high) = low
            .iter()
            .zip(high.iter())
            .map(|(&a, &b)| if a <= b { (a, b) } else { (b, a) })
            .unzip();

        Ok(Self { low, high })
    }

    /// A degenerate box covering a single point.
    pub fn from_point(coords: &[f64]) -> Result<Self, BoundsError> {
        Self::new(coords, coords)
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    /// Flatten into `[low..., high...]`.
    pub fn to_vec(&self) -> Vec<f64> {
        self.low.iter().chain(self.high.iter()).copied().collect()
    }

    /// Corners widened to three dimensions, unused axes set to 0.
    pub fn padded(&self) -> ([f64; MAX_DIMENSIONS], [f64; MAX_DIMENSIONS]) {
        let mut low = [0.0; MAX_DIMENSIONS];
        let mut high = [0.0; MAX_DIMENSIONS];
        low[..self.low.len()].copy_from_slice(&self.low);
        high[..self.high.len()].copy_from_slice(&self.high);
        (low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_corners() {
        let bbox = BoundingBox::new(&[1.0, 5.0], &[0.0, 2.0]).unwrap();
        assert_eq!(bbox.low(), &[0.0, 2.0]);
        assert_eq!(bbox.high(), &[1.0, 5.0]);
        assert_eq!(bbox.dimension(), 2);
    }

    #[test]
    fn test_rejects_bad_corners() {
        assert_eq!(
            BoundingBox::new(&[0.0], &[1.0, 1.0]),
            Err(BoundsError::DimensionMismatch { low: 1, high: 2 })
        );
        assert_eq!(
            BoundingBox::new(&[], &[]),
            Err(BoundsError::UnsupportedDimension(0))
        );
        assert_eq!(
            BoundingBox::new(&[0.0; 4], &[1.0; 4]),
            Err(BoundsError::UnsupportedDimension(4))
        );
        assert_eq!(
            BoundingBox::new(&[f64::NAN], &[1.0]),
            Err(BoundsError::NonFinite)
        );
    }

    #[test]
    fn test_serde_roundtrip_keeps_dimension() {
        let bbox = BoundingBox::new(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]).unwrap();
        let json = serde_json::to_string(&bbox).unwrap();
        let back: BoundingBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bbox);
        assert_eq!(back.dimension(), 3);
    }
}
