//! Zhang's closed-form intrinsics from plane homographies (no distortion).

use nalgebra::{DMatrix, SVector};
use pitrac_cal_core::{FxFyCxCySkew, Mat3, Real};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ZhangError {
    #[error("need at least 3 homographies, got {0}")]
    NotEnoughHomographies(usize),
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate configuration in intrinsics estimation")]
    Degenerate,
    #[error("invalid sign for lambda ({lambda}); check homographies")]
    InvalidScale { lambda: Real },
}

/// The 6-vector `v_ij(H)` from Zhang's paper.
fn v_ij(hmtx: &Mat3, i: usize, j: usize) -> SVector<Real, 6> {
    let hi = hmtx.column(i);
    let hj = hmtx.column(j);

    SVector::<Real, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Estimate `K` from three or more plane homographies.
pub fn estimate_intrinsics_from_homographies(hmtxs: &[Mat3]) -> Result<FxFyCxCySkew, ZhangError> {
    let m = hmtxs.len();
    if m < 3 {
        return Err(ZhangError::NotEnoughHomographies(m));
    }

    let mut vmtx = DMatrix::<Real>::zeros(2 * m, 6);
    for (k, hmtx) in hmtxs.iter().enumerate() {
        let v11 = v_ij(hmtx, 0, 0);
        let v22 = v_ij(hmtx, 1, 1);
        let v12 = v_ij(hmtx, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t.ok_or(ZhangError::SvdFailed)?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .ok_or(ZhangError::SvdFailed)?;
    let b = v_t.row(smallest);

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    let denom_rel = if denom_norm > 0.0 {
        denom.abs() / denom_norm
    } else {
        0.0
    };
    if denom_rel <= 1e-6 {
        return Err(ZhangError::Degenerate);
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return Err(ZhangError::InvalidScale { lambda });
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    Ok(FxFyCxCySkew {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
        skew: gamma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    fn synthetic_homography(kmtx: &Mat3, rot: Rotation3<Real>, t: Vector3<Real>) -> Mat3 {
        // For a Z=0 plane, H = K [r1 r2 t].
        let r = rot.matrix();
        let mut hmtx = Mat3::zeros();
        hmtx.set_column(0, &(kmtx * r.column(0)));
        hmtx.set_column(1, &(kmtx * r.column(1)));
        hmtx.set_column(2, &(kmtx * t));
        hmtx
    }

    #[test]
    fn recovers_k_from_exact_homographies() {
        let gt = FxFyCxCySkew {
            fx: 1720.0,
            fy: 1718.0,
            cx: 728.0,
            cy: 544.0,
            skew: 0.0,
        };
        let kmtx = gt.k_matrix();
        let hmts = vec![
            synthetic_homography(
                &kmtx,
                Rotation3::from_euler_angles(0.1, 0.0, 0.05),
                Vector3::new(0.1, -0.05, 1.0),
            ),
            synthetic_homography(
                &kmtx,
                Rotation3::from_euler_angles(-0.05, 0.15, -0.1),
                Vector3::new(-0.05, 0.1, 1.2),
            ),
            synthetic_homography(
                &kmtx,
                Rotation3::from_euler_angles(0.2, -0.1, 0.0),
                Vector3::new(0.0, 0.0, 0.9),
            ),
        ];

        let est = estimate_intrinsics_from_homographies(&hmts).unwrap();
        assert!((est.fx - gt.fx).abs() < 5.0, "fx mismatch: {}", est.fx);
        assert!((est.fy - gt.fy).abs() < 5.0, "fy mismatch: {}", est.fy);
        assert!((est.cx - gt.cx).abs() < 10.0, "cx mismatch: {}", est.cx);
        assert!((est.cy - gt.cy).abs() < 10.0, "cy mismatch: {}", est.cy);
        assert!(est.skew.abs() < 1e-3, "skew not ~0: {}", est.skew);
    }

    #[test]
    fn two_homographies_are_not_enough() {
        let h = Mat3::identity();
        assert_eq!(
            estimate_intrinsics_from_homographies(&[h, h]),
            Err(ZhangError::NotEnoughHomographies(2))
        );
    }
}
