//! Linear Brown-Conrady estimation from homography residuals.
//!
//! With `K` known, the residual between an observed pixel and the pixel
//! predicted by the view's homography, both taken to normalized coordinates,
//! is linear in `(k1, k2, k3, p1, p2)`. Stacking all points gives an
//! overdetermined system solved by SVD.
//!
//! Intended for small to moderate distortion; it is the only distortion
//! estimate this workspace produces.

use nalgebra::{DMatrix, DVector};
use pitrac_cal_core::{from_homogeneous, to_homogeneous, BrownConrady5, Mat3, Pt2, Real, Vec2};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DistortionFitError {
    #[error("need at least {need} points for distortion estimation, got {got}")]
    NotEnoughPoints { need: usize, got: usize },
    #[error("svd failed during distortion estimation")]
    SvdFailed,
    #[error("intrinsics matrix is not invertible")]
    IntrinsicsNotInvertible,
    #[error("degenerate configuration: all points near image center")]
    DegenerateConfiguration,
}

#[derive(Debug, Clone, Copy)]
pub struct DistortionFitOptions {
    /// Keep `p1 = p2 = 0`.
    pub fix_tangential: bool,
    /// Keep `k2 = 0`; points close to the axis cannot separate it from `k1`.
    pub fix_k2: bool,
    /// Keep `k3 = 0`; the r^6 term overfits easily.
    pub fix_k3: bool,
    /// Undistortion iterations of the returned model.
    pub iters: u32,
}

impl Default for DistortionFitOptions {
    fn default() -> Self {
        Self {
            fix_tangential: false,
            fix_k2: false,
            fix_k3: true,
            iters: 8,
        }
    }
}

impl DistortionFitOptions {
    fn n_params(&self) -> usize {
        let tangential = if self.fix_tangential { 0 } else { 2 };
        1 + usize::from(!self.fix_k2) + usize::from(!self.fix_k3) + tangential
    }
}

/// One view: its homography (estimated from the distorted pixels) and the
/// correspondences it was estimated from.
#[derive(Debug, Clone)]
pub struct DistortionView<'a> {
    pub homography: Mat3,
    pub board_points: &'a [Pt2],
    pub pixel_points: &'a [Pt2],
}

fn to_normalized(k_inv: &Mat3, pixel: &Pt2) -> Vec2 {
    from_homogeneous(&(k_inv * to_homogeneous(pixel))).coords
}

/// Estimate distortion for the camera `intrinsics` from several views.
pub fn estimate_distortion_from_homographies(
    intrinsics: &Mat3,
    views: &[DistortionView<'_>],
    opts: DistortionFitOptions,
) -> Result<BrownConrady5, DistortionFitError> {
    let total_points: usize = views.iter().map(|v| v.board_points.len()).sum();
    let n_params = opts.n_params();
    let min_points = n_params.div_ceil(2) + 2;
    if total_points < min_points {
        return Err(DistortionFitError::NotEnoughPoints {
            need: min_points,
            got: total_points,
        });
    }

    let k_inv = intrinsics
        .try_inverse()
        .ok_or(DistortionFitError::IntrinsicsNotInvertible)?;

    let mut a = DMatrix::<Real>::zeros(2 * total_points, n_params);
    let mut b = DVector::<Real>::zeros(2 * total_points);
    let mut max_r2: Real = 0.0;

    let mut row = 0;
    for view in views {
        for (board_pt, pixel_obs) in view.board_points.iter().zip(view.pixel_points) {
            let pixel_ideal = from_homogeneous(&(view.homography * to_homogeneous(board_pt)));
            let n_ideal = to_normalized(&k_inv, &pixel_ideal);
            let n_obs = to_normalized(&k_inv, pixel_obs);
            let residual = n_obs - n_ideal;

            let (x, y) = (n_ideal.x, n_ideal.y);
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            max_r2 = max_r2.max(r2);

            let mut col = 0;
            a[(row, col)] = x * r2;
            a[(row + 1, col)] = y * r2;
            col += 1;
            if !opts.fix_k2 {
                a[(row, col)] = x * r4;
                a[(row + 1, col)] = y * r4;
                col += 1;
            }
            if !opts.fix_k3 {
                let r6 = r4 * r2;
                a[(row, col)] = x * r6;
                a[(row + 1, col)] = y * r6;
                col += 1;
            }
            if !opts.fix_tangential {
                a[(row, col)] = 2.0 * x * y;
                a[(row + 1, col)] = r2 + 2.0 * y * y;
                col += 1;
                a[(row, col)] = r2 + 2.0 * x * x;
                a[(row + 1, col)] = 2.0 * x * y;
            }

            b[row] = residual.x;
            b[row + 1] = residual.y;
            row += 2;
        }
    }

    if max_r2 < 1e-6 {
        return Err(DistortionFitError::DegenerateConfiguration);
    }

    let x = a
        .svd(true, true)
        .solve(&b, 1e-10)
        .map_err(|_| DistortionFitError::SvdFailed)?;

    let mut coeffs = x.iter().copied();
    let mut next = || coeffs.next().unwrap_or(0.0);
    let k1 = next();
    let k2 = if opts.fix_k2 { 0.0 } else { next() };
    let k3 = if opts.fix_k3 { 0.0 } else { next() };
    let (p1, p2) = if opts.fix_tangential {
        (0.0, 0.0)
    } else {
        (next(), next())
    };

    Ok(BrownConrady5 {
        k1,
        k2,
        k3,
        p1,
        p2,
        iters: opts.iters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homography::dlt_homography;
    use approx::assert_relative_eq;
    use pitrac_cal_core::synthetic::{
        board_points, pitrac_like_camera, project_view, tilted_board_poses,
    };
    use pitrac_cal_core::CharucoBoard;

    #[test]
    fn exact_homographies_recover_coefficients() {
        let distorted = pitrac_like_camera();
        let mut pinhole = distorted;
        pinhole.distortion = BrownConrady5::zero(8);

        let board = CharucoBoard::default();
        let points = board_points(&board);
        let poses = tilted_board_poses(&board, 4, 350.0);

        let mut observed = Vec::new();
        let mut homographies = Vec::new();
        for pose in &poses {
            let ideal = project_view(&pinhole, pose, &points).unwrap();
            homographies.push(dlt_homography(&ideal.board_points, &ideal.pixel_points).unwrap());
            observed.push(project_view(&distorted, pose, &points).unwrap());
        }
        let views: Vec<DistortionView<'_>> = observed
            .iter()
            .zip(&homographies)
            .map(|(v, h)| DistortionView {
                homography: *h,
                board_points: &v.board_points,
                pixel_points: &v.pixel_points,
            })
            .collect();

        let est = estimate_distortion_from_homographies(
            &distorted.intrinsics.k_matrix(),
            &views,
            DistortionFitOptions::default(),
        )
        .unwrap();
        let gt = distorted.distortion;
        assert_relative_eq!(est.k1, gt.k1, epsilon = 1e-5);
        assert_relative_eq!(est.k2, gt.k2, epsilon = 1e-3);
        assert_relative_eq!(est.p1, gt.p1, epsilon = 1e-6);
        assert_relative_eq!(est.p2, gt.p2, epsilon = 1e-6);
        assert_eq!(est.k3, 0.0);
    }

    #[test]
    fn held_k2_stays_zero() {
        let cam = pitrac_like_camera();
        let board = CharucoBoard::default();
        let points = board_points(&board);
        let views: Vec<_> = tilted_board_poses(&board, 4, 350.0)
            .iter()
            .map(|pose| project_view(&cam, pose, &points).unwrap())
            .collect();
        let homographies: Vec<_> = views
            .iter()
            .map(|v| dlt_homography(&v.board_points, &v.pixel_points).unwrap())
            .collect();
        let dist_views: Vec<DistortionView<'_>> = views
            .iter()
            .zip(&homographies)
            .map(|(v, h)| DistortionView {
                homography: *h,
                board_points: &v.board_points,
                pixel_points: &v.pixel_points,
            })
            .collect();

        let opts = DistortionFitOptions {
            fix_k2: true,
            ..Default::default()
        };
        assert_eq!(opts.n_params(), 3);
        let est = estimate_distortion_from_homographies(
            &cam.intrinsics.k_matrix(),
            &dist_views,
            opts,
        )
        .unwrap();
        assert_eq!(est.k2, 0.0);
        assert_eq!(est.k3, 0.0);
        assert!(est.k1.is_finite());
    }

    #[test]
    fn rejects_empty_input() {
        let err =
            estimate_distortion_from_homographies(&Mat3::identity(), &[], Default::default())
                .unwrap_err();
        assert!(matches!(err, DistortionFitError::NotEnoughPoints { .. }));
    }
}
