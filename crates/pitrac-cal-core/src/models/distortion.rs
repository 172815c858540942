use serde::{Deserialize, Serialize};

use crate::{Real, Vec2};

/// Brown-Conrady radial/tangential distortion acting on normalized coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: Real,
    pub k2: Real,
    pub k3: Real,
    pub p1: Real,
    pub p2: Real,
    /// Fixed-point iterations used by [`BrownConrady5::undistort`].
    pub iters: u32,
}

impl BrownConrady5 {
    /// Distortion-free model.
    pub fn zero(iters: u32) -> Self {
        Self {
            iters,
            ..Self::default()
        }
    }

    /// Build from the 5-element `[k1, k2, p1, p2, k3]` vector layout.
    pub fn from_vector(v: [Real; 5]) -> Self {
        Self {
            k1: v[0],
            k2: v[1],
            p1: v[2],
            p2: v[3],
            k3: v[4],
            iters: 8,
        }
    }

    /// Coefficients in the 5-element `[k1, k2, p1, p2, k3]` layout used by the
    /// persisted configuration.
    pub fn to_vector(&self) -> [Real; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    fn distort_impl(&self, x: Real, y: Real) -> (Real, Real) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (x * radial + x_tan, y * radial + y_tan)
    }

    pub fn distort(&self, n_undist: &Vec2) -> Vec2 {
        let (xd, yd) = self.distort_impl(n_undist.x, n_undist.y);
        Vec2::new(xd, yd)
    }

    pub fn undistort(&self, n_dist: &Vec2) -> Vec2 {
        let mut x = n_dist.x;
        let mut y = n_dist.y;

        let iters = if self.iters == 0 { 8 } else { self.iters };
        for _ in 0..iters {
            let (xd, yd) = self.distort_impl(x, y);
            x -= xd - n_dist.x;
            y -= yd - n_dist.y;
        }
        Vec2::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn vector_layout_puts_k3_last() {
        let d = BrownConrady5::from_vector([-0.5, 0.34, -0.002, 0.0025, -0.135]);
        assert_eq!(d.k1, -0.5);
        assert_eq!(d.p1, -0.002);
        assert_eq!(d.k3, -0.135);
        assert_eq!(d.to_vector(), [-0.5, 0.34, -0.002, 0.0025, -0.135]);
    }

    #[test]
    fn undistort_inverts_mild_distortion() {
        let d = BrownConrady5 {
            k1: -0.12,
            k2: 0.03,
            k3: 0.0,
            p1: 0.001,
            p2: -0.0005,
            iters: 20,
        };
        let n = Vec2::new(0.21, -0.14);
        let back = d.undistort(&d.distort(&n));
        assert_relative_eq!(back.x, n.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, n.y, epsilon = 1e-9);
    }
}
