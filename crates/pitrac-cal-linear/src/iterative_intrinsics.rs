//! Alternating linear estimation of intrinsics and distortion.
//!
//! Zhang on raw (distorted) pixels gives a biased `K`. Each iteration fits
//! distortion against the current `K`, undistorts the observations and
//! re-estimates `K` from the corrected homographies. One or two iterations
//! are usually enough.

use log::debug;
use pitrac_cal_core::{
    from_homogeneous, to_homogeneous, BrownConrady5, FxFyCxCySkew, Mat3, PlanarView, Pt2,
};
use thiserror::Error;

use crate::distortion_fit::{
    estimate_distortion_from_homographies, DistortionFitError, DistortionFitOptions,
    DistortionView,
};
use crate::homography::{dlt_homography, HomographyError};
use crate::zhang_intrinsics::{estimate_intrinsics_from_homographies, ZhangError};

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum IterativeIntrinsicsError {
    #[error("need at least 3 views, got {0}")]
    NotEnoughViews(usize),
    #[error("homography estimation failed: {0}")]
    Homography(#[from] HomographyError),
    #[error("zhang intrinsics failed: {0}")]
    Zhang(#[from] ZhangError),
    #[error("distortion estimation failed: {0}")]
    Distortion(#[from] DistortionFitError),
}

#[derive(Debug, Clone, Copy)]
pub struct IterativeIntrinsicsOptions {
    /// Distortion / K refinement rounds after the initial Zhang estimate.
    pub iterations: usize,
    pub distortion_opts: DistortionFitOptions,
    /// Force `skew = 0` after every `K` estimate.
    pub zero_skew: bool,
}

impl Default for IterativeIntrinsicsOptions {
    fn default() -> Self {
        Self {
            iterations: 2,
            distortion_opts: DistortionFitOptions::default(),
            zero_skew: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterativeIntrinsicsResult {
    pub intrinsics: FxFyCxCySkew,
    pub distortion: BrownConrady5,
    /// Homographies from the undistorted pixels of the final iteration.
    pub homographies: Vec<Mat3>,
}

/// Remove `distortion` from raw pixels under camera `k_mtx`.
pub fn undistort_pixels(
    k_mtx: &Mat3,
    k_inv: &Mat3,
    distortion: &BrownConrady5,
    pixels: &[Pt2],
) -> Vec<Pt2> {
    pixels
        .iter()
        .map(|p| {
            let n_dist = from_homogeneous(&(k_inv * to_homogeneous(p))).coords;
            let n_undist = distortion.undistort(&n_dist);
            from_homogeneous(&(k_mtx * to_homogeneous(&Pt2::from(n_undist))))
        })
        .collect()
}

fn homographies_of(views: &[PlanarView]) -> Result<Vec<Mat3>, HomographyError> {
    views
        .iter()
        .map(|v| dlt_homography(&v.board_points, &v.pixel_points))
        .collect()
}

fn intrinsics_from(hmtxs: &[Mat3], zero_skew: bool) -> Result<FxFyCxCySkew, ZhangError> {
    let mut k = estimate_intrinsics_from_homographies(hmtxs)?;
    if zero_skew {
        k.skew = 0.0;
    }
    Ok(k)
}

pub fn estimate_intrinsics_iterative(
    views: &[PlanarView],
    opts: IterativeIntrinsicsOptions,
) -> Result<IterativeIntrinsicsResult, IterativeIntrinsicsError> {
    if views.len() < 3 {
        return Err(IterativeIntrinsicsError::NotEnoughViews(views.len()));
    }

    let raw_homographies = homographies_of(views)?;
    let mut intrinsics = intrinsics_from(&raw_homographies, opts.zero_skew)?;
    let mut distortion = BrownConrady5::zero(opts.distortion_opts.iters);
    let mut homographies = raw_homographies.clone();
    debug!(
        "initial intrinsics: fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
    );

    for iter in 0..opts.iterations {
        let k_mtx = intrinsics.k_matrix();
        let k_inv = k_mtx
            .try_inverse()
            .ok_or(DistortionFitError::IntrinsicsNotInvertible)?;

        // Distortion is fitted against the raw observations, with homographies
        // from the previous round's corrected pixels.
        let fit_homographies = if iter == 0 {
            &raw_homographies
        } else {
            &homographies
        };
        let dist_views: Vec<DistortionView<'_>> = views
            .iter()
            .zip(fit_homographies)
            .map(|(v, h)| DistortionView {
                homography: *h,
                board_points: &v.board_points,
                pixel_points: &v.pixel_points,
            })
            .collect();
        distortion =
            estimate_distortion_from_homographies(&k_mtx, &dist_views, opts.distortion_opts)?;

        homographies = views
            .iter()
            .map(|v| {
                let undistorted = undistort_pixels(&k_mtx, &k_inv, &distortion, &v.pixel_points);
                dlt_homography(&v.board_points, &undistorted)
            })
            .collect::<Result<_, _>>()?;
        intrinsics = intrinsics_from(&homographies, opts.zero_skew)?;
        debug!(
            "iteration {}: fx={:.2} fy={:.2} k1={:.4} k2={:.4}",
            iter + 1,
            intrinsics.fx,
            intrinsics.fy,
            distortion.k1,
            distortion.k2
        );
    }

    Ok(IterativeIntrinsicsResult {
        intrinsics,
        distortion,
        homographies,
    })
}
