//! Sample accumulators for the two calibration modes.
//!
//! Both accumulators only ever grow by valid samples: a rejected sample is
//! reported as an error and leaves the accumulated state untouched.

use pitrac_cal_core::{CharucoBoard, CornerSet, FocalRange, PlanarView, Real};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum AccumulatorError {
    #[error("only {got} board correspondences, need at least {need}")]
    TooFewCorrespondences { got: usize, need: usize },
    #[error("focal length {focal_mm:.2} mm outside [{min_mm}, {max_mm}] mm")]
    FocalOutOfRange {
        focal_mm: Real,
        min_mm: Real,
        max_mm: Real,
    },
    #[error("no samples accumulated")]
    Empty,
    #[error("mean focal length {mean_mm:.2} mm outside [{min_mm}, {max_mm}] mm")]
    MeanOutOfRange {
        mean_mm: Real,
        min_mm: Real,
        max_mm: Real,
    },
}

/// One accepted intrinsic sample: matched board correspondences tagged with
/// the frame they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSample {
    pub frame_index: usize,
    pub view: PlanarView,
}

#[derive(Debug, Clone)]
pub struct CornerAccumulator {
    board: CharucoBoard,
    min_points: usize,
    samples: Vec<CaptureSample>,
}

impl CornerAccumulator {
    pub fn new(board: CharucoBoard, min_points: usize) -> Self {
        Self {
            board,
            min_points,
            samples: Vec::new(),
        }
    }

    /// Match `corners` against the board and keep them if enough points match.
    /// Returns the new sample count.
    pub fn push(
        &mut self,
        frame_index: usize,
        corners: &CornerSet,
    ) -> Result<usize, AccumulatorError> {
        let view = self.board.match_points(corners);
        if view.len() < self.min_points {
            return Err(AccumulatorError::TooFewCorrespondences {
                got: view.len(),
                need: self.min_points,
            });
        }
        self.samples.push(CaptureSample { frame_index, view });
        Ok(self.samples.len())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> &[CaptureSample] {
        &self.samples
    }

    /// Correspondence sets in capture order, as handed to the solver.
    pub fn views(&self) -> Vec<PlanarView> {
        self.samples.iter().map(|s| s.view.clone()).collect()
    }
}

/// Focal length samples (mm) with a running mean.
#[derive(Debug, Clone)]
pub struct FocalAccumulator {
    range: FocalRange,
    samples: Vec<Real>,
    mean: Real,
}

impl FocalAccumulator {
    pub fn new(range: FocalRange) -> Self {
        Self {
            range,
            samples: Vec::new(),
            mean: 0.0,
        }
    }

    /// Accept `focal_mm` if it is a plausible lens focal length.
    /// Returns the new sample count.
    pub fn push(&mut self, focal_mm: Real) -> Result<usize, AccumulatorError> {
        if !self.range.contains(focal_mm) {
            return Err(AccumulatorError::FocalOutOfRange {
                focal_mm,
                min_mm: self.range.min_mm,
                max_mm: self.range.max_mm,
            });
        }
        self.samples.push(focal_mm);
        self.mean += (focal_mm - self.mean) / self.samples.len() as Real;
        Ok(self.samples.len())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.mean = 0.0;
    }

    pub fn samples(&self) -> &[Real] {
        &self.samples
    }

    pub fn last(&self) -> Option<Real> {
        self.samples.last().copied()
    }

    /// Running mean, for live feedback.
    pub fn running_mean(&self) -> Option<Real> {
        (!self.samples.is_empty()).then_some(self.mean)
    }

    /// Mean of all samples, recomputed from scratch and re-validated against
    /// the focal range.
    pub fn final_mean(&self) -> Result<Real, AccumulatorError> {
        if self.samples.is_empty() {
            return Err(AccumulatorError::Empty);
        }
        let mean = self.samples.iter().sum::<Real>() / self.samples.len() as Real;
        if !self.range.contains(mean) {
            return Err(AccumulatorError::MeanOutOfRange {
                mean_mm: mean,
                min_mm: self.range.min_mm,
                max_mm: self.range.max_mm,
            });
        }
        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pitrac_cal_core::Pt2;

    fn corners(ids: &[u32]) -> CornerSet {
        let pixels = ids
            .iter()
            .map(|&id| Pt2::new(100.0 + id as f64, 200.0))
            .collect();
        CornerSet::new(ids.to_vec(), pixels).unwrap()
    }

    #[test]
    fn sparse_corner_sets_are_not_accumulated() {
        let mut acc = CornerAccumulator::new(CharucoBoard::default(), 4);
        assert_eq!(acc.push(0, &corners(&[0, 1, 2, 3])), Ok(1));
        assert_eq!(
            acc.push(1, &corners(&[0, 1, 2])),
            Err(AccumulatorError::TooFewCorrespondences { got: 3, need: 4 })
        );
        // Unknown ids do not count towards the minimum.
        assert!(acc.push(2, &corners(&[0, 1, 2, 90])).is_err());
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.samples()[0].frame_index, 0);

        acc.clear();
        assert!(acc.is_empty());
    }

    #[test]
    fn out_of_range_focal_is_a_no_op() {
        let mut acc = FocalAccumulator::new(FocalRange::default());
        acc.push(6.0).unwrap();
        acc.push(6.2).unwrap();
        let before_mean = acc.running_mean();

        for bad in [0.0, 1.99, 50.5, 300.0, -4.0] {
            assert!(matches!(
                acc.push(bad),
                Err(AccumulatorError::FocalOutOfRange { .. })
            ));
        }
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.running_mean(), before_mean);
        assert_eq!(acc.last(), Some(6.2));
    }

    #[test]
    fn running_mean_tracks_samples() {
        let mut acc = FocalAccumulator::new(FocalRange::default());
        assert_eq!(acc.running_mean(), None);
        for f in [5.8, 6.0, 6.1, 6.3] {
            acc.push(f).unwrap();
        }
        assert_relative_eq!(acc.running_mean().unwrap(), 6.05, epsilon = 1e-12);
        assert_relative_eq!(acc.final_mean().unwrap(), 6.05, epsilon = 1e-12);
    }

    #[test]
    fn final_mean_is_revalidated() {
        let narrow = FocalRange {
            min_mm: 5.0,
            max_mm: 7.0,
        };
        let acc = FocalAccumulator::new(narrow);
        assert_eq!(acc.final_mean(), Err(AccumulatorError::Empty));

        // Samples validated against a wider range, then checked against the
        // narrower one at finalization.
        let mut acc = FocalAccumulator::new(FocalRange::default());
        acc.push(8.0).unwrap();
        acc.range = narrow;
        assert!(matches!(
            acc.final_mean(),
            Err(AccumulatorError::MeanOutOfRange { .. })
        ));
    }
}
