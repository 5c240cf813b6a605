//! Same-event triplet enumeration: strict upper-index 3-combinations of one
//! collision's selected-particle pool, close-pair rejection and identity
//! cleaning per sub-pair, then accumulation and QA.

use color_eyre::Report;
use itertools::Itertools;

use crate::cleaner::is_clean_pair;
use crate::close_pair::ClosePairRejection;
use crate::container::ThreeBodyContainer;
use crate::event::{Collision, McParticle, Particle, ParticleTable};
use crate::histogram::{AxisSpec, HistogramRegistry};
use crate::kinematics::{self, FourMomentum};
use crate::BinningSettings;

pub const PT_IN_TRIPLET_SE: &str = "TripletTaskQA/particlePtInTripletSE";
pub const PHI_VS_DPHI_SE: &str = "TripletTaskQA/phiVsDphiSE";
pub const PHI_BELOW_Q3: &str = "TripletTaskQA/phiBelowQ3";
pub const TRIPLETS_PER_EVENT_BELOW_14: &str = "TripletTaskQA/hTripletsPerEventBelow14";
pub const CENTRALITY_VS_Q3: &str = "TripletTaskQA/hCentrality";
pub const KSTAR_MID_VS_LARGEST_SE: &str = "TripletTaskQA/kstarMidVsLargestSE";
pub const KSTAR_SMALLEST_VS_LARGEST_SE: &str = "TripletTaskQA/kstarSmallestVsLargestSE";

/// Per-event count of triplets below this Q3 feeds the lambda-parameter
/// bookkeeping.
const Q3_TRIPLET_COUNT_MAX: f64 = 1.4;
/// Azimuth QA is restricted to the correlation-dominated region.
const Q3_PHI_QA_MAX: f64 = 0.8;

pub fn truth_for<'a>(mc: Option<&'a [McParticle]>, part: &Particle) -> Option<&'a McParticle> {
    mc.and_then(|table| part.mc_id.and_then(|id| table.get(id)))
}

pub struct SameEventProcessor {
    pub masses: [f64; 3],
    /// Maximum Q3 for the sorted-k* fork diagnostics.
    pub fork_q3_max: f64,
    pub cpr: Option<ClosePairRejection>,
}

impl SameEventProcessor {
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
        let centrality_axis = AxisSpec::Uniform {
            bins: 100,
            min: 0.0,
            max: 100.0,
        };
        let count_axis = AxisSpec::Uniform {
            bins: 10,
            min: 0.0,
            max: 10.0,
        };
        registry.add_sparse(
            PT_IN_TRIPLET_SE,
            &[&binning.pt, &binning.pt, &binning.pt, &binning.q3_wide],
        )?;
        registry.add_h2(PHI_VS_DPHI_SE, &phi_axis, &phi_axis)?;
        registry.add_h1(PHI_BELOW_Q3, &phi_axis)?;
        registry.add_h1(TRIPLETS_PER_EVENT_BELOW_14, &count_axis)?;
        registry.add_h2(CENTRALITY_VS_Q3, &centrality_axis, &binning.q3)?;
        registry.add_h2(KSTAR_MID_VS_LARGEST_SE, &kstar_axis, &kstar_axis)?;
        registry.add_h2(KSTAR_SMALLEST_VS_LARGEST_SE, &kstar_axis, &kstar_axis)?;
        Ok(())
    }

    /// Process one collision whose pool holds at least three candidates.
    /// Event-level bookkeeping for smaller pools stays with the caller.
    pub fn run(
        &self,
        col: &Collision,
        pool: &[usize],
        table: &ParticleTable<'_>,
        mc: Option<&[McParticle]>,
        cont: &mut ThreeBodyContainer,
        registry: &mut HistogramRegistry,
    ) {
        let mut triplets_below = 0u32;
        for (a, b, c) in pool.iter().copied().tuple_combinations() {
            let p1 = table.get(a);
            let p2 = table.get(b);
            let p3 = table.get(c);
            let v1 = FourMomentum::from_pt_eta_phi_m(p1.pt, p1.eta, p1.phi, self.masses[0]);
            let v2 = FourMomentum::from_pt_eta_phi_m(p2.pt, p2.eta, p2.phi, self.masses[1]);
            let v3 = FourMomentum::from_pt_eta_phi_m(p3.pt, p3.eta, p3.phi, self.masses[2]);
            let q3 = kinematics::q3(v1, v2, v3);

            if let Some(cpr) = &self.cpr {
                if cpr.is_close_pair(p1, p2, col.mag_field, q3, registry)
                    || cpr.is_close_pair(p2, p3, col.mag_field, q3, registry)
                    || cpr.is_close_pair(p1, p3, col.mag_field, q3, registry)
                {
                    continue;
                }
            }
            if !is_clean_pair(p1, p2) || !is_clean_pair(p2, p3) || !is_clean_pair(p1, p3) {
                continue;
            }

            registry.fill2(PHI_VS_DPHI_SE, p1.phi, p1.phi - p2.phi);
            registry.fill2(PHI_VS_DPHI_SE, p2.phi, p2.phi - p3.phi);
            registry.fill2(PHI_VS_DPHI_SE, p3.phi, p3.phi - p1.phi);

            if q3 < Q3_TRIPLET_COUNT_MAX {
                triplets_below += 1;
            }
            if q3 < Q3_PHI_QA_MAX {
                registry.fill1(PHI_BELOW_Q3, p1.phi);
                registry.fill1(PHI_BELOW_Q3, p2.phi);
                registry.fill1(PHI_BELOW_Q3, p3.phi);
            }

            registry.fill_sparse(PT_IN_TRIPLET_SE, &[p1.pt, p2.pt, p3.pt, q3]);
            let truth = match (
                truth_for(mc, p1),
                truth_for(mc, p2),
                truth_for(mc, p3),
            ) {
                (Some(t1), Some(t2), Some(t3)) => Some([t1, t2, t3]),
                _ => None,
            };
            cont.add_triplet(p1, p2, p3, col.mult_ntr, q3, truth);
            registry.fill2(CENTRALITY_VS_Q3, col.mult_v0m, q3);

            if q3 < self.fork_q3_max {
                let mut kstar = [
                    kinematics::pair_kstar(v1, v2),
                    kinematics::pair_kstar(v1, v3),
                    kinematics::pair_kstar(v2, v3),
                ];
                kstar.sort_by(f64::total_cmp);
                registry.fill2(KSTAR_MID_VS_LARGEST_SE, kstar[1], kstar[2]);
                registry.fill2(KSTAR_SMALLEST_VS_LARGEST_SE, kstar[0], kstar[2]);
            }
        }
        registry.fill1(TRIPLETS_PER_EVENT_BELOW_14, f64::from(triplets_below));
    }
}
