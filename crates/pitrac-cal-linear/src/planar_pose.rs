//! Board pose from a plane homography and known intrinsics.

use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use pitrac_cal_core::{Iso3, Mat3, Vec3};

/// Decompose `H = K [r1 r2 t]` into the pose mapping board coordinates (Z=0)
/// into the camera frame. `None` if `K` is singular or the SVD fails.
pub fn estimate_planar_pose_from_h(kmtx: &Mat3, hmtx: &Mat3) -> Option<Iso3> {
    let k_inv = kmtx.try_inverse()?;

    let k_inv_h1 = k_inv * hmtx.column(0);
    let k_inv_h2 = k_inv * hmtx.column(1);
    let k_inv_h3 = k_inv * hmtx.column(2);

    // Average the two column norms for the scale.
    let mut lambda = 2.0 / (k_inv_h1.norm() + k_inv_h2.norm());
    // The board must end up in front of the camera.
    if k_inv_h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * k_inv_h1;
    let r2 = lambda * k_inv_h2;
    let r3 = r1.cross(&r2);
    let r_mat = Mat3::from_columns(&[r1, r2, r3]);

    // Closest rotation (polar decomposition).
    let svd = r_mat.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let t: Vec3 = lambda * k_inv_h3;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Some(Iso3::from_parts(Translation3::from(t), rot))
}
