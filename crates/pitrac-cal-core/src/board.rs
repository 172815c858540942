use serde::{Deserialize, Serialize};

use crate::{CornerSet, PlanarView, Pt2, Real};

/// ChArUco board layout: `cols x rows` squares, with corner ids numbering the
/// inner chessboard corners row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharucoBoard {
    pub cols: u32,
    pub rows: u32,
    pub square_mm: Real,
    pub marker_mm: Real,
}

impl Default for CharucoBoard {
    fn default() -> Self {
        Self {
            cols: 7,
            rows: 5,
            square_mm: 30.0,
            marker_mm: 22.5,
        }
    }
}

impl CharucoBoard {
    /// Number of inner corners (valid corner ids are `0..corner_count()`).
    pub fn corner_count(&self) -> u32 {
        self.cols.saturating_sub(1) * self.rows.saturating_sub(1)
    }

    /// Pattern-plane position of a corner id, millimeters.
    pub fn corner_position(&self, id: u32) -> Option<Pt2> {
        if id >= self.corner_count() {
            return None;
        }
        let per_row = self.cols - 1;
        let col = (id % per_row + 1) as Real;
        let row = (id / per_row + 1) as Real;
        Some(Pt2::new(col * self.square_mm, row * self.square_mm))
    }

    /// Pair detected corners with their pattern positions, skipping unknown ids.
    pub fn match_points(&self, corners: &CornerSet) -> PlanarView {
        let (board_points, pixel_points) = corners
            .ids
            .iter()
            .zip(&corners.pixels)
            .filter_map(|(&id, px)| self.corner_position(id).map(|bp| (bp, *px)))
            .unzip();
        PlanarView {
            board_points,
            pixel_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_board_has_24_inner_corners() {
        let board = CharucoBoard::default();
        assert_eq!(board.corner_count(), 24);
        assert_eq!(board.corner_position(0), Some(Pt2::new(30.0, 30.0)));
        assert_eq!(board.corner_position(6), Some(Pt2::new(30.0, 60.0)));
        assert_eq!(board.corner_position(23), Some(Pt2::new(180.0, 120.0)));
        assert_eq!(board.corner_position(24), None);
    }

    #[test]
    fn match_points_drops_unknown_ids() {
        let board = CharucoBoard::default();
        let corners = CornerSet::new(
            vec![0, 99, 5],
            vec![Pt2::new(10.0, 10.0), Pt2::new(20.0, 20.0), Pt2::new(30.0, 30.0)],
        )
        .unwrap();
        let view = board.match_points(&corners);
        assert_eq!(view.len(), 2);
        assert_eq!(view.board_points[1], Pt2::new(180.0, 30.0));
        assert_eq!(view.pixel_points[1], Pt2::new(30.0, 30.0));
    }
}
