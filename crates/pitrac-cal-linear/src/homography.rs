//! Homography estimation with the normalized Direct Linear Transform.
//!
//! `H` maps board points (Z=0 plane, millimeters) to pixels: `x' ~ H x`.

use nalgebra::DMatrix;
use pitrac_cal_core::{normalize_points_2d, Mat3, Pt2};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("board and image point counts differ ({board} vs {image})")]
    LengthMismatch { board: usize, image: usize },
    #[error("degenerate point configuration for normalization")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
}

/// Estimate `H` such that `x' ~ H x` using Hartley-normalized DLT.
///
/// The result is scaled so that `H[2,2] == 1` when possible.
pub fn dlt_homography(world: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
    let n = world.len();
    if image.len() != n {
        return Err(HomographyError::LengthMismatch {
            board: n,
            image: image.len(),
        });
    }
    if n < 4 {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let (world_n, t_w) = normalize_points_2d(world).ok_or(HomographyError::Degenerate)?;
    let (image_n, t_i) = normalize_points_2d(image).ok_or(HomographyError::Degenerate)?;

    // Pad to at least 9 rows so that the SVD yields a full V.
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);

    for (i, (pw, pi)) in world_n.iter().zip(image_n.iter()).enumerate() {
        let (x, y) = (pw.x, pw.y);
        let (u, v) = (pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .ok_or(HomographyError::SvdFailed)?;
    let h_vec = v_t.row(smallest);

    let mut h_mat = Mat3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            h_mat[(r, c)] = h_vec[3 * r + c];
        }
    }

    let t_i_inv = t_i.try_inverse().ok_or(HomographyError::Degenerate)?;
    h_mat = t_i_inv * h_mat * t_w;

    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }

    Ok(h_mat)
}
