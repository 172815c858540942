use log::{debug, info, warn};
use pitrac_cal_core::{
    from_homogeneous, to_homogeneous, ImageSize, IntrinsicResult, Iso3, Mat3, PlanarView, Real,
};
use thiserror::Error;

use crate::iterative_intrinsics::{
    estimate_intrinsics_iterative, IterativeIntrinsicsError, IterativeIntrinsicsOptions,
};
use crate::planar_pose::estimate_planar_pose_from_h;
use crate::refine::{refine_planar_camera, RefineOptions};
use crate::reprojection::rms_reprojection_error;

/// Fewest correspondences a view needs to contribute a homography.
pub const MIN_POINTS_PER_VIEW: usize = 4;
/// Fewest usable views for a closed-form solve.
pub const MIN_VIEWS: usize = 3;
/// Below this squared normalized radius the observations cannot separate
/// `k2` from `k1`, and `k2` is held at zero.
pub const MIN_R2_FOR_K2: Real = 0.09;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("insufficient data: {got} usable views, need at least {need}")]
    InsufficientData { got: usize, need: usize },
    #[error(transparent)]
    Estimation(#[from] IterativeIntrinsicsError),
    #[error("pose recovery failed for view {0}")]
    PoseRecovery(usize),
    #[error("principal point ({cx:.1}, {cy:.1}) lies outside the {image_size} image")]
    PrincipalPointOutsideImage {
        cx: Real,
        cy: Real,
        image_size: ImageSize,
    },
}

impl SolveError {
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, SolveError::InsufficientData { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanarIntrinsicsOptions {
    /// Closed-form initialization. `k2` is always held there; the
    /// alternation cannot separate it from the homographies.
    pub init: IterativeIntrinsicsOptions,
    /// Evaluation budget of the reprojection refinement.
    pub patience: usize,
    /// Skip the reprojection refinement.
    pub closed_form_only: bool,
}

impl Default for PlanarIntrinsicsOptions {
    fn default() -> Self {
        Self {
            init: IterativeIntrinsicsOptions::default(),
            patience: RefineOptions::default().patience,
            closed_form_only: false,
        }
    }
}

/// Planar intrinsic solver: iterative Zhang + linear distortion, refined by
/// Levenberg-Marquardt on the pixel reprojection error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarIntrinsicsSolver {
    pub options: PlanarIntrinsicsOptions,
}

/// Largest squared normalized radius of the observations under `k_inv`.
fn max_normalized_r2(k_inv: &Mat3, views: &[PlanarView]) -> Real {
    views
        .iter()
        .flat_map(|v| &v.pixel_points)
        .map(|p| from_homogeneous(&(k_inv * to_homogeneous(p))).coords.norm_squared())
        .fold(0.0, Real::max)
}

impl PlanarIntrinsicsSolver {
    pub fn new(options: PlanarIntrinsicsOptions) -> Self {
        Self { options }
    }

    /// Solve for `K`, distortion and RMS error from accumulated board views.
    ///
    /// Views with fewer than [`MIN_POINTS_PER_VIEW`] points are ignored; fewer
    /// than [`MIN_VIEWS`] remaining views is [`SolveError::InsufficientData`].
    /// `k2` is only estimated when the observations reach [`MIN_R2_FOR_K2`].
    pub fn solve(
        &self,
        views: &[PlanarView],
        image_size: ImageSize,
    ) -> Result<IntrinsicResult, SolveError> {
        let usable: Vec<PlanarView> = views
            .iter()
            .filter(|v| v.len() >= MIN_POINTS_PER_VIEW)
            .cloned()
            .collect();
        if usable.len() < views.len() {
            debug!(
                "ignoring {} views with fewer than {} points",
                views.len() - usable.len(),
                MIN_POINTS_PER_VIEW
            );
        }
        if usable.len() < MIN_VIEWS {
            return Err(SolveError::InsufficientData {
                got: usable.len(),
                need: MIN_VIEWS,
            });
        }

        let mut init_opts = self.options.init;
        init_opts.distortion_opts.fix_k2 = true;
        let estimate = estimate_intrinsics_iterative(&usable, init_opts)?;
        let k_mtx = estimate.intrinsics.k_matrix();
        let poses = estimate
            .homographies
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                estimate_planar_pose_from_h(&k_mtx, h).ok_or(SolveError::PoseRecovery(idx))
            })
            .collect::<Result<Vec<Iso3>, _>>()?;

        let no_points = SolveError::InsufficientData {
            got: 0,
            need: MIN_VIEWS,
        };
        let mut k = estimate.intrinsics;
        let mut distortion = estimate.distortion;
        let mut rms_error = rms_reprojection_error(&k, &distortion, &usable, &poses)
            .ok_or(no_points)?;

        if !self.options.closed_form_only {
            let max_r2 = k_mtx
                .try_inverse()
                .map(|k_inv| max_normalized_r2(&k_inv, &usable))
                .unwrap_or(0.0);
            let opts = RefineOptions {
                fix_k2: max_r2 < MIN_R2_FOR_K2,
                patience: self.options.patience,
            };
            debug!(
                "closed form rms {:.4} px, max r^2 {:.3}, k2 {}",
                rms_error,
                max_r2,
                if opts.fix_k2 { "held" } else { "free" }
            );
            let refined = refine_planar_camera(&usable, &k, &distortion, &poses, opts);
            let refined_rms = refined.as_ref().and_then(|r| {
                rms_reprojection_error(&r.intrinsics, &r.distortion, &usable, &r.poses)
            });
            match (refined, refined_rms) {
                (Some(r), Some(rms)) if rms <= rms_error => {
                    k = r.intrinsics;
                    distortion = r.distortion;
                    rms_error = rms;
                }
                _ => warn!("reprojection refinement did not improve; keeping the closed form"),
            }
        }

        let inside = (0.0..=image_size.width as Real).contains(&k.cx)
            && (0.0..=image_size.height as Real).contains(&k.cy);
        if !image_size.is_empty() && !inside {
            return Err(SolveError::PrincipalPointOutsideImage {
                cx: k.cx,
                cy: k.cy,
                image_size,
            });
        }

        info!(
            "intrinsics solved from {} views: fx={:.2} fy={:.2} cx={:.2} cy={:.2} k1={:.4} k2={:.4}, rms {:.4} px",
            usable.len(),
            k.fx,
            k.fy,
            k.cx,
            k.cy,
            distortion.k1,
            distortion.k2,
            rms_error
        );

        Ok(IntrinsicResult {
            camera_matrix: k.k_matrix(),
            distortion: distortion.to_vector(),
            rms_error,
        })
    }
}
