//! Reprojection refinement of a closed-form planar calibration.
//!
//! Levenberg-Marquardt over `fx, fy, cx, cy`, the Brown-Conrady coefficients
//! `k1, k2, p1, p2` and one 6-DoF pose per view, minimizing pixel residuals.
//! Skew and `k3` stay at zero. `k2` can be held at its initial value when the
//! observations do not reach far enough from the optical axis to constrain it.
//!
//! The Jacobian is assembled by forward differences. A pose column only
//! touches the rows of its own view, so those are evaluated per view.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::{debug, warn};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Translation3, UnitQuaternion, Vector3};
use pitrac_cal_core::{BrownConrady5, FxFyCxCySkew, Iso3, PlanarView, Real};

use crate::reprojection::project_board_point;

const POSE_DIM: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct RefineOptions {
    /// Hold `k2` at its initial value.
    pub fix_k2: bool,
    /// Evaluation budget, in multiples of the parameter count.
    pub patience: usize,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            fix_k2: false,
            patience: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinedCamera {
    pub intrinsics: FxFyCxCySkew,
    pub distortion: BrownConrady5,
    pub poses: Vec<Iso3>,
    pub converged: bool,
    pub evaluations: usize,
}

struct ReprojectionProblem<'a> {
    views: &'a [PlanarView],
    /// Row offset of each view's residual block.
    offsets: Vec<usize>,
    rows: usize,
    fix_k2: bool,
    /// `k2` while it is held, and the undistortion iterations of the model.
    held: BrownConrady5,
    params: DVector<Real>,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(
        views: &'a [PlanarView],
        intrinsics: &FxFyCxCySkew,
        distortion: &BrownConrady5,
        poses: &[Iso3],
        fix_k2: bool,
    ) -> Self {
        let mut offsets = Vec::with_capacity(views.len());
        let mut rows = 0;
        for view in views {
            offsets.push(rows);
            rows += 2 * view.len();
        }

        let mut problem = Self {
            views,
            offsets,
            rows,
            fix_k2,
            held: *distortion,
            params: DVector::zeros(0),
        };
        let camera_dim = problem.camera_dim();
        let mut x = DVector::zeros(camera_dim + POSE_DIM * poses.len());
        x[0] = intrinsics.fx;
        x[1] = intrinsics.fy;
        x[2] = intrinsics.cx;
        x[3] = intrinsics.cy;
        x[4] = distortion.k1;
        let mut idx = 5;
        if !fix_k2 {
            x[idx] = distortion.k2;
            idx += 1;
        }
        x[idx] = distortion.p1;
        x[idx + 1] = distortion.p2;

        for (i, pose) in poses.iter().enumerate() {
            let base = camera_dim + POSE_DIM * i;
            let w = pose.rotation.scaled_axis();
            let t = pose.translation.vector;
            x.rows_mut(base, POSE_DIM)
                .copy_from_slice(&[w.x, w.y, w.z, t.x, t.y, t.z]);
        }
        problem.params = x;
        problem
    }

    fn camera_dim(&self) -> usize {
        if self.fix_k2 {
            7
        } else {
            8
        }
    }

    fn camera(&self, x: &DVector<Real>) -> (FxFyCxCySkew, BrownConrady5) {
        let intrinsics = FxFyCxCySkew {
            fx: x[0],
            fy: x[1],
            cx: x[2],
            cy: x[3],
            skew: 0.0,
        };
        let (k2, tangential) = if self.fix_k2 {
            (self.held.k2, 5)
        } else {
            (x[5], 6)
        };
        let distortion = BrownConrady5 {
            k1: x[4],
            k2,
            k3: 0.0,
            p1: x[tangential],
            p2: x[tangential + 1],
            iters: self.held.iters,
        };
        (intrinsics, distortion)
    }

    fn pose(&self, x: &DVector<Real>, view: usize) -> Iso3 {
        let base = self.camera_dim() + POSE_DIM * view;
        let w = Vector3::new(x[base], x[base + 1], x[base + 2]);
        let t = Vector3::new(x[base + 3], x[base + 4], x[base + 5]);
        Iso3::from_parts(Translation3::from(t), UnitQuaternion::from_scaled_axis(w))
    }

    /// Observed minus predicted pixels of one view; `false` if a point falls
    /// behind the camera.
    fn view_residuals(
        &self,
        intrinsics: &FxFyCxCySkew,
        distortion: &BrownConrady5,
        pose: &Iso3,
        view: usize,
        out: &mut [Real],
    ) -> bool {
        let v = &self.views[view];
        for (j, (bp, observed)) in v.board_points.iter().zip(&v.pixel_points).enumerate() {
            let Some(predicted) = project_board_point(intrinsics, distortion, pose, bp) else {
                return false;
            };
            out[2 * j] = observed.x - predicted.x;
            out[2 * j + 1] = observed.y - predicted.y;
        }
        true
    }

    fn residuals_at(&self, x: &DVector<Real>) -> Option<DVector<Real>> {
        let (intrinsics, distortion) = self.camera(x);
        let mut r = DVector::zeros(self.rows);
        for (view, &offset) in self.offsets.iter().enumerate() {
            let pose = self.pose(x, view);
            let rows = 2 * self.views[view].len();
            let block = &mut r.as_mut_slice()[offset..offset + rows];
            if !self.view_residuals(&intrinsics, &distortion, &pose, view, block) {
                return None;
            }
        }
        r.iter().all(|v| v.is_finite()).then_some(r)
    }
}

fn step(value: Real) -> Real {
    1e-6 * (1.0 + value.abs())
}

impl LeastSquaresProblem<Real, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        self.residuals_at(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let x = &self.params;
        let base = self.residuals_at(x)?;
        let mut jac = DMatrix::zeros(self.rows, x.len());

        // Camera columns touch every row.
        let camera_dim = self.camera_dim();
        for k in 0..camera_dim {
            let h = step(x[k]);
            let mut shifted = x.clone();
            shifted[k] += h;
            let r = self.residuals_at(&shifted)?;
            jac.set_column(k, &((r - &base) / h));
        }

        // Pose columns only touch their own view.
        let (intrinsics, distortion) = self.camera(x);
        for (view, &offset) in self.offsets.iter().enumerate() {
            let rows = 2 * self.views[view].len();
            let mut block = vec![0.0; rows];
            for p in 0..POSE_DIM {
                let k = camera_dim + POSE_DIM * view + p;
                let h = step(x[k]);
                let mut shifted = x.clone();
                shifted[k] += h;
                let pose = self.pose(&shifted, view);
                if !self.view_residuals(&intrinsics, &distortion, &pose, view, &mut block) {
                    return None;
                }
                for (row, value) in block.iter().enumerate() {
                    jac[(offset + row, k)] = (value - base[offset + row]) / h;
                }
            }
        }
        Some(jac)
    }
}

/// Refine `intrinsics`, `distortion` and `poses` (one per view) against the
/// observed pixels of `views`.
///
/// Returns `None` if the initial estimate already projects a point behind
/// its camera or `views` and `poses` are misaligned.
pub fn refine_planar_camera(
    views: &[PlanarView],
    intrinsics: &FxFyCxCySkew,
    distortion: &BrownConrady5,
    poses: &[Iso3],
    opts: RefineOptions,
) -> Option<RefinedCamera> {
    if views.is_empty() || views.len() != poses.len() {
        return None;
    }
    let problem = ReprojectionProblem::new(views, intrinsics, distortion, poses, opts.fix_k2);
    problem.residuals()?;

    let (problem, report) = LevenbergMarquardt::new()
        .with_patience(opts.patience.max(1))
        .minimize(problem);
    let converged = report.termination.was_successful();
    if converged {
        debug!(
            "refinement converged after {} evaluations ({:?})",
            report.number_of_evaluations, report.termination
        );
    } else {
        warn!(
            "refinement stopped after {} evaluations: {:?}",
            report.number_of_evaluations, report.termination
        );
    }

    let x = &problem.params;
    let (intrinsics, distortion) = problem.camera(x);
    let poses = (0..views.len()).map(|v| problem.pose(x, v)).collect();
    Some(RefinedCamera {
        intrinsics,
        distortion,
        poses,
        converged,
        evaluations: report.number_of_evaluations,
    })
}
