//! Reprojection of board views through an estimated camera.

use pitrac_cal_core::{BrownConrady5, FxFyCxCySkew, Iso3, PlanarView, Pt2, Pt3, Real, Vec2};

/// Project a board point (Z=0) seen from `pose` into distorted pixels.
pub fn project_board_point(
    intrinsics: &FxFyCxCySkew,
    distortion: &BrownConrady5,
    pose: &Iso3,
    board_point: &Pt2,
) -> Option<Pt2> {
    let pc = pose.transform_point(&Pt3::new(board_point.x, board_point.y, 0.0));
    if pc.z <= Real::EPSILON {
        return None;
    }
    let n = distortion.distort(&Vec2::new(pc.x / pc.z, pc.y / pc.z));
    Some(Pt2::from(intrinsics.normalized_to_pixel(&n)))
}

/// `sqrt(sum |e|^2 / N)` over every correspondence of every view, pixels.
///
/// Points that project behind the camera count with the distance to the
/// observed pixel from the principal point, so a wrong pose is never
/// rewarded. Returns `None` when `views` and `poses` are misaligned or empty.
pub fn rms_reprojection_error(
    intrinsics: &FxFyCxCySkew,
    distortion: &BrownConrady5,
    views: &[PlanarView],
    poses: &[Iso3],
) -> Option<Real> {
    if views.len() != poses.len() {
        return None;
    }
    let principal = Pt2::new(intrinsics.cx, intrinsics.cy);
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for (view, pose) in views.iter().zip(poses) {
        for (bp, observed) in view.board_points.iter().zip(&view.pixel_points) {
            let predicted =
                project_board_point(intrinsics, distortion, pose, bp).unwrap_or(principal);
            sum_sq += (predicted - *observed).norm_squared();
            count += 1;
        }
    }
    (count > 0).then(|| (sum_sq / count as Real).sqrt())
}
