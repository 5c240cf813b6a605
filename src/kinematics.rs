use std::ops::{Add, Mul, Sub};

use num_traits::Inv;

/// Four-momentum in (E, px, py, pz) with the (+,-,-,-) metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FourMomentum {
    pub e: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

impl Add<FourMomentum> for FourMomentum {
    type Output = Self;
    fn add(self, rhs: FourMomentum) -> Self::Output {
        Self::Output {
            e: self.e + rhs.e,
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
        }
    }
}

impl Sub<FourMomentum> for FourMomentum {
    type Output = Self;
    fn sub(self, rhs: FourMomentum) -> Self::Output {
        Self::Output {
            e: self.e - rhs.e,
            px: self.px - rhs.px,
            py: self.py - rhs.py,
            pz: self.pz - rhs.pz,
        }
    }
}

impl Mul<f64> for FourMomentum {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Self::Output {
            e: self.e * rhs,
            px: self.px * rhs,
            py: self.py * rhs,
            pz: self.pz * rhs,
        }
    }
}

impl FourMomentum {
    /// Build from collider kinematics: transverse momentum, pseudorapidity,
    /// azimuth and a mass hypothesis.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let e = (px * px + py * py + pz * pz + mass * mass).sqrt();
        Self { e, px, py, pz }
    }

    pub fn spatial_squared(&self) -> f64 {
        self.px * self.px + self.py * self.py + self.pz * self.pz
    }

    pub fn spatial_norm(&self) -> f64 {
        self.spatial_squared().sqrt()
    }

    /// Invariant square E^2 - |p|^2.
    pub fn mag2(&self) -> f64 {
        self.e * self.e - self.spatial_squared()
    }

    /// Active Lorentz boost with velocity `b`. A vanishing boost vector is
    /// the identity, so the (gamma - 1)/b^2 factor is guarded.
    pub fn boost(&self, b: [f64; 3]) -> Self {
        let b2 = b[0] * b[0] + b[1] * b[1] + b[2] * b[2];
        if b2 < 1.0e-24 {
            return *self;
        }
        let gamma = (1.0 - b2).sqrt().inv();
        let bp = b[0] * self.px + b[1] * self.py + b[2] * self.pz;
        let gamma2 = (gamma - 1.0) / b2;
        let coef = gamma2 * bp + gamma * self.e;
        Self {
            e: gamma * (self.e + bp),
            px: self.px + coef * b[0],
            py: self.py + coef * b[1],
            pz: self.pz + coef * b[2],
        }
    }
}

/// Relative momentum of the pair in its own rest frame, k* = |p1* - p2*| / 2.
pub fn pair_kstar(p1: FourMomentum, p2: FourMomentum) -> f64 {
    let sum = p1 + p2;
    let b = [-sum.px / sum.e, -sum.py / sum.e, -sum.pz / sum.e];
    let rel = p1.boost(b) - p2.boost(b);
    0.5 * rel.spatial_norm()
}

/// Reduced pair four-momentum difference, with the mass-asymmetry term
/// projected out so that q_ij . (P_i + P_j) = 0.
fn reduced_qij(pi: FourMomentum, pj: FourMomentum) -> FourMomentum {
    let sum = pi + pj;
    let diff = pi - pj;
    let s = sum.mag2();
    if s.abs() < 1.0e-24 {
        return diff;
    }
    diff - sum * ((pi.mag2() - pj.mag2()) / s)
}

/// Invariant three-particle relative momentum,
/// Q3^2 = -(q12^2 + q23^2 + q31^2).
///
/// Symmetric under any permutation of the three particles: each q_ij only
/// changes sign under i <-> j and its invariant square is what enters.
pub fn q3(p1: FourMomentum, p2: FourMomentum, p3: FourMomentum) -> f64 {
    let q12 = reduced_qij(p1, p2);
    let q23 = reduced_qij(p2, p3);
    let q31 = reduced_qij(p3, p1);
    let q3_sq = -(q12.mag2() + q23.mag2() + q31.mag2());
    q3_sq.max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTON_MASS: f64 = 0.938272;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn four_momentum_on_shell() {
        let p = FourMomentum::from_pt_eta_phi_m(1.2, 0.4, 2.1, PROTON_MASS);
        assert!(approx_eq(p.mag2(), PROTON_MASS * PROTON_MASS, 1.0e-12));
    }

    #[test]
    fn boost_to_rest_frame_kills_momentum() {
        let p = FourMomentum::from_pt_eta_phi_m(2.0, -0.7, 0.3, PROTON_MASS);
        let b = [-p.px / p.e, -p.py / p.e, -p.pz / p.e];
        let rest = p.boost(b);
        assert!(rest.spatial_norm() < 1.0e-12);
        assert!(approx_eq(rest.e, PROTON_MASS, 1.0e-12));
    }

    #[test]
    fn kstar_symmetric_and_nonnegative() {
        let p1 = FourMomentum::from_pt_eta_phi_m(0.8, 0.2, 0.5, PROTON_MASS);
        let p2 = FourMomentum::from_pt_eta_phi_m(1.1, -0.3, 2.9, PROTON_MASS);
        let k12 = pair_kstar(p1, p2);
        let k21 = pair_kstar(p2, p1);
        assert!(k12 >= 0.0);
        assert!(approx_eq(k12, k21, 1.0e-12));
    }

    #[test]
    fn kstar_vanishes_for_comoving_particles() {
        let p1 = FourMomentum::from_pt_eta_phi_m(1.0, 0.5, 1.0, PROTON_MASS);
        let p2 = FourMomentum::from_pt_eta_phi_m(1.0, 0.5, 1.0, PROTON_MASS);
        assert!(pair_kstar(p1, p2) < 1.0e-12);
    }

    #[test]
    fn q3_permutation_invariant() {
        let p1 = FourMomentum::from_pt_eta_phi_m(0.7, 0.1, 0.4, PROTON_MASS);
        let p2 = FourMomentum::from_pt_eta_phi_m(1.3, -0.5, 2.2, PROTON_MASS);
        let p3 = FourMomentum::from_pt_eta_phi_m(2.1, 0.6, 4.8, PROTON_MASS);
        let reference = q3(p1, p2, p3);
        let orderings = [
            q3(p1, p3, p2),
            q3(p2, p1, p3),
            q3(p2, p3, p1),
            q3(p3, p1, p2),
            q3(p3, p2, p1),
        ];
        for value in orderings {
            assert!(approx_eq(reference, value, 1.0e-12));
        }
    }

    #[test]
    fn q3_nonnegative_and_zero_for_identical_momenta() {
        let p = FourMomentum::from_pt_eta_phi_m(1.0, 0.0, 1.0, PROTON_MASS);
        assert!(q3(p, p, p) >= 0.0);
        assert!(q3(p, p, p) < 1.0e-9);
    }

    #[test]
    fn q3_matches_pairwise_kstar_quadrature_for_equal_masses() {
        // For equal masses each q_ij reduces to the plain four-vector
        // difference, whose invariant square is -4 k*_ij^2.
        let p1 = FourMomentum::from_pt_eta_phi_m(0.9, 0.3, 0.7, PROTON_MASS);
        let p2 = FourMomentum::from_pt_eta_phi_m(1.2, -0.2, 1.9, PROTON_MASS);
        let p3 = FourMomentum::from_pt_eta_phi_m(0.6, 0.1, 3.6, PROTON_MASS);
        let expected = 2.0
            * (pair_kstar(p1, p2).powi(2)
                + pair_kstar(p2, p3).powi(2)
                + pair_kstar(p3, p1).powi(2))
            .sqrt();
        assert!(approx_eq(q3(p1, p2, p3), expected, 1.0e-10));
    }
}
