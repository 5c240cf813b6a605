//! Mixed-event background construction: collisions are pooled into
//! (vertex-z, multiplicity) bins, combined in windowed triples of distinct
//! collisions, and the full cross-product of their selected-particle pools
//! feeds the mixed-event accumulator.

use color_eyre::Report;
use itertools::iproduct;

use crate::close_pair::ClosePairRejection;
use crate::container::ThreeBodyContainer;
use crate::event::{Collision, McParticle, ParticleTable};
use crate::histogram::{Axis, AxisSpec, HistogramRegistry};
use crate::kinematics::{self, FourMomentum};
use crate::same_event::truth_for;
use crate::BinningSettings;

pub const PT_IN_TRIPLET_ME: &str = "TripletTaskQA/particlePtInTripletME";
pub const PHI_VS_DPHI_ME: &str = "TripletTaskQA/phiVsDphiME";
pub const KSTAR_MID_VS_LARGEST_ME: &str = "TripletTaskQA/kstarMidVsLargestME";
pub const KSTAR_SMALLEST_VS_LARGEST_ME: &str = "TripletTaskQA/kstarSmallestVsLargestME";

/// Coarse (vertex-z, multiplicity) binning pooling kinematically similar
/// collisions for mixing. Collisions falling outside either axis are not
/// eligible for mixing at all.
pub struct MixingBinning {
    vtx: Axis,
    mult: Axis,
}

impl MixingBinning {
    pub fn new(vtx_spec: &AxisSpec, mult_spec: &AxisSpec) -> Result<Self, Report> {
        Ok(Self {
            vtx: Axis::new(vtx_spec)?,
            mult: Axis::new(mult_spec)?,
        })
    }

    pub fn bin(&self, col: &Collision) -> Option<usize> {
        let iv = self.vtx.index(col.pos_z)?;
        let im = self.mult.index(f64::from(col.mult_ntr))?;
        Some(iv * self.mult.n_bins() + im)
    }

    pub fn n_bins(&self) -> usize {
        self.vtx.n_bins() * self.mult.n_bins()
    }
}

/// Strict upper-index triples (i, j, k) restricted to a sliding window of
/// `depth` consecutive entries, i.e. k - i < depth. Each combination of
/// three distinct entries appears at most once.
pub fn windowed_triples(n: usize, depth: usize) -> Vec<(usize, usize, usize)> {
    let mut out = Vec::new();
    if depth < 3 {
        return out;
    }
    for i in 0..n {
        let window_end = n.min(i + depth);
        for j in i + 1..window_end {
            for k in j + 1..window_end {
                out.push((i, j, k));
            }
        }
    }
    out
}

pub struct MixedEventProcessor {
    pub masses: [f64; 3],
    pub fork_q3_max: f64,
    pub cpr: Option<ClosePairRejection>,
}

impl MixedEventProcessor {
    pub fn book(&self, registry: &mut HistogramRegistry, binning: &BinningSettings) -> Result<(), Report> {
        let phi_axis = AxisSpec::Uniform {
            bins: 200,
            min: -6.4,
            max: 6.4,
        };
        let kstar_axis = AxisSpec::Uniform {
            bins: 400,
            min: 0.0,
            max: 4.0,
        };
        registry.add_sparse(
            PT_IN_TRIPLET_ME,
            &[&binning.pt, &binning.pt, &binning.pt, &binning.q3_wide],
        )?;
        registry.add_h2(PHI_VS_DPHI_ME, &phi_axis, &phi_axis)?;
        registry.add_h2(KSTAR_MID_VS_LARGEST_ME, &kstar_axis, &kstar_axis)?;
        registry.add_h2(KSTAR_SMALLEST_VS_LARGEST_ME, &kstar_axis, &kstar_axis)?;
        Ok(())
    }

    /// Process one triple of distinct collisions with a common magnetic
    /// field. Particles come from three different collisions, so no
    /// identity cleaning is needed.
    pub fn run(
        &self,
        cols: [&Collision; 3],
        pools: [&[usize]; 3],
        table: &ParticleTable<'_>,
        mc: Option<&[McParticle]>,
        cont: &mut ThreeBodyContainer,
        registry: &mut HistogramRegistry,
    ) {
        let mag_field = cols[0].mag_field;
        let mult = cols[0].mult_ntr;
        for (&a, &b, &c) in iproduct!(pools[0], pools[1], pools[2]) {
            let p1 = table.get(a);
            let p2 = table.get(b);
            let p3 = table.get(c);
            let v1 = FourMomentum::from_pt_eta_phi_m(p1.pt, p1.eta, p1.phi, self.masses[0]);
            let v2 = FourMomentum::from_pt_eta_phi_m(p2.pt, p2.eta, p2.phi, self.masses[1]);
            let v3 = FourMomentum::from_pt_eta_phi_m(p3.pt, p3.eta, p3.phi, self.masses[2]);
            let q3 = kinematics::q3(v1, v2, v3);

            if let Some(cpr) = &self.cpr {
                if cpr.is_close_pair(p1, p2, mag_field, q3, registry)
                    || cpr.is_close_pair(p2, p3, mag_field, q3, registry)
                    || cpr.is_close_pair(p1, p3, mag_field, q3, registry)
                {
                    continue;
                }
            }

            registry.fill_sparse(PT_IN_TRIPLET_ME, &[p1.pt, p2.pt, p3.pt, q3]);
            registry.fill2(PHI_VS_DPHI_ME, p1.phi, p1.phi - p2.phi);
            registry.fill2(PHI_VS_DPHI_ME, p2.phi, p2.phi - p3.phi);
            registry.fill2(PHI_VS_DPHI_ME, p3.phi, p3.phi - p1.phi);

            if q3 < self.fork_q3_max {
                let mut kstar = [
                    kinematics::pair_kstar(v1, v2),
                    kinematics::pair_kstar(v1, v3),
                    kinematics::pair_kstar(v2, v3),
                ];
                kstar.sort_by(f64::total_cmp);
                registry.fill2(KSTAR_MID_VS_LARGEST_ME, kstar[1], kstar[2]);
                registry.fill2(KSTAR_SMALLEST_VS_LARGEST_ME, kstar[0], kstar[2]);
            }

            let truth = match (
                truth_for(mc, p1),
                truth_for(mc, p2),
                truth_for(mc, p3),
            ) {
                (Some(t1), Some(t2), Some(t3)) => Some([t1, t2, t3]),
                _ => None,
            };
            cont.add_triplet(p1, p2, p3, mult, q3, truth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_triples_stay_inside_the_window() {
        let triples = windowed_triples(10, 5);
        for (i, j, k) in &triples {
            assert!(i < j && j < k);
            assert!(k - i < 5);
        }
        // No duplicates.
        let mut sorted = triples.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), triples.len());
    }

    #[test]
    fn full_window_covers_all_combinations() {
        // depth >= n reduces to plain C(n, 3).
        assert_eq!(windowed_triples(6, 6).len(), 20);
        assert_eq!(windowed_triples(6, 100).len(), 20);
    }

    #[test]
    fn small_windows_produce_nothing() {
        assert!(windowed_triples(10, 2).is_empty());
        assert!(windowed_triples(2, 5).is_empty());
    }

    #[test]
    fn binning_maps_each_collision_to_one_bin() {
        let vtx = AxisSpec::Variable {
            edges: vec![-10.0, -5.0, 0.0, 5.0, 10.0],
        };
        let mult = AxisSpec::Variable {
            edges: vec![0.0, 20.0, 40.0, 99999.0],
        };
        let binning = MixingBinning::new(&vtx, &mult).unwrap();
        let mut col = Collision {
            id: 0,
            pos_z: 1.0,
            mult_ntr: 25,
            mult_v0m: 50.0,
            sphericity: 1.0,
            mag_field: 0.5,
            bitmask_one: 0,
            bitmask_two: 0,
            bitmask_three: 0,
        };
        assert_eq!(binning.bin(&col), Some(2 * 3 + 1));
        col.pos_z = -20.0;
        assert_eq!(binning.bin(&col), None);
    }
}
