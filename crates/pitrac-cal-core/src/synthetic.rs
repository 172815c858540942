//! Synthetic planar target helpers.
//!
//! Build a board, place it in front of a pinhole camera with Brown-Conrady
//! distortion and project it, producing the [`PlanarView`] / [`CornerSet`]
//! inputs the solver and the sessions consume.

use anyhow::{bail, Result};
use nalgebra::{Translation3, UnitQuaternion};

use crate::{
    BrownConrady5, CharucoBoard, CornerSet, FxFyCxCySkew, Iso3, PlanarView, Pt2, Pt3, Real, Vec2,
    Vec3,
};

/// Pinhole camera with distortion, enough to render synthetic detections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticCamera {
    pub intrinsics: FxFyCxCySkew,
    pub distortion: BrownConrady5,
}

impl SyntheticCamera {
    /// Project a camera-frame point to pixels. `None` behind the camera.
    pub fn project_point(&self, pc: &Pt3) -> Option<Pt2> {
        if pc.z <= Real::EPSILON {
            return None;
        }
        let n = Vec2::new(pc.x / pc.z, pc.y / pc.z);
        let d = self.distortion.distort(&n);
        let px = self.intrinsics.normalized_to_pixel(&d);
        Some(Pt2::new(px.x, px.y))
    }
}

/// A camera resembling the 6 mm lens on the IMX296 sensor, with mild barrel
/// distortion.
pub fn pitrac_like_camera() -> SyntheticCamera {
    SyntheticCamera {
        intrinsics: FxFyCxCySkew {
            fx: 1720.0,
            fy: 1718.0,
            cx: 728.0,
            cy: 544.0,
            skew: 0.0,
        },
        distortion: BrownConrady5 {
            k1: -0.12,
            k2: 0.05,
            k3: 0.0,
            p1: 0.001,
            p2: -0.0005,
            iters: 8,
        },
    }
}

/// Board corners as planar (Z=0) target points, ordered by corner id.
pub fn board_points(board: &CharucoBoard) -> Vec<Pt2> {
    (0..board.corner_count())
        .filter_map(|id| board.corner_position(id))
        .collect()
}

/// `n_views` board poses, each tilted about a different in-plane axis and
/// centered in front of the camera at `distance_mm`.
///
/// Tilt axes step by the golden angle so that no two board planes are
/// parallel; the closed-form intrinsics need that.
pub fn tilted_board_poses(board: &CharucoBoard, n_views: usize, distance_mm: Real) -> Vec<Iso3> {
    let half_w = board.cols as Real * board.square_mm / 2.0;
    let half_h = board.rows as Real * board.square_mm / 2.0;
    (0..n_views)
        .map(|i| {
            let tilt = 0.3 + 0.1 * (i % 3) as Real;
            let axis_angle = i as Real * 2.399_963;
            let roll = 0.1 * (i as Real).sin();
            let rotation = UnitQuaternion::from_euler_angles(
                tilt * axis_angle.cos(),
                tilt * axis_angle.sin(),
                roll,
            );
            // Keep the board center on the optical axis.
            let center = rotation * Vec3::new(half_w, half_h, 0.0);
            let translation = Vec3::new(-center.x, -center.y, distance_mm - center.z);
            Iso3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Like [`tilted_board_poses`], but the board centers step over a 5 x 3 grid
/// spanning ±0.2 x ±0.14 of `distance_mm`, so the corners reach the edges of
/// the frame where radial distortion is strongest.
pub fn covering_board_poses(board: &CharucoBoard, n_views: usize, distance_mm: Real) -> Vec<Iso3> {
    tilted_board_poses(board, n_views, distance_mm)
        .into_iter()
        .enumerate()
        .map(|(i, mut pose)| {
            let col = (i % 5) as Real;
            let row = ((i / 5) % 3) as Real;
            let offset = Vec3::new(
                (col / 2.0 - 1.0) * 0.2 * distance_mm,
                (row - 1.0) * 0.14 * distance_mm,
                0.0,
            );
            pose.translation.vector += offset;
            pose
        })
        .collect()
}

/// Project planar target points, failing if any point is behind the camera.
pub fn project_view(
    camera: &SyntheticCamera,
    cam_from_target: &Iso3,
    target_points: &[Pt2],
) -> Result<PlanarView> {
    let mut pixels = Vec::with_capacity(target_points.len());
    for (idx, pt) in target_points.iter().enumerate() {
        let pc = cam_from_target.transform_point(&Pt3::new(pt.x, pt.y, 0.0));
        let Some(uv) = camera.project_point(&pc) else {
            bail!("point {idx} not projectable (z={:.6})", pc.z);
        };
        pixels.push(uv);
    }
    PlanarView::new(target_points.to_vec(), pixels)
}

/// Render the detector output for one board pose: every corner id with its
/// projected pixel.
pub fn project_corner_set(
    camera: &SyntheticCamera,
    board: &CharucoBoard,
    cam_from_target: &Iso3,
) -> Result<CornerSet> {
    let view = project_view(camera, cam_from_target, &board_points(board))?;
    CornerSet::new((0..board.corner_count()).collect(), view.pixel_points)
}

/// Synthetic views of `board` in `n_views` tilted poses.
pub fn board_views(
    camera: &SyntheticCamera,
    board: &CharucoBoard,
    n_views: usize,
    distance_mm: Real,
) -> Result<Vec<PlanarView>> {
    let points = board_points(board);
    tilted_board_poses(board, n_views, distance_mm)
        .iter()
        .map(|pose| project_view(camera, pose, &points))
        .collect()
}

/// Synthetic views of `board` spread across the frame, see
/// [`covering_board_poses`].
pub fn covering_board_views(
    camera: &SyntheticCamera,
    board: &CharucoBoard,
    n_views: usize,
    distance_mm: Real,
) -> Result<Vec<PlanarView>> {
    let points = board_points(board);
    covering_board_poses(board, n_views, distance_mm)
        .iter()
        .map(|pose| project_view(camera, pose, &points))
        .collect()
}
