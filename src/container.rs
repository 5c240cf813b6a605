//! Correlation accumulators: structurally identical sinks for same-event
//! and mixed-event triplets, with an optional Monte Carlo truth part.
//! Write-only during a pass; serialized at job end.

use color_eyre::Report;
use serde::Serialize;

use crate::event::{McParticle, Particle};
use crate::histogram::{AxisSpec, Hist1, Hist2, HistSparse};
use crate::kinematics::{self, FourMomentum};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum EventKind {
    SameEvent,
    MixedEvent,
}

/// Truth-level part of a container: binned with the truth kinematics of the
/// matched generator particles, using the configured PDG hypothesis masses.
#[derive(Debug, Serialize)]
pub struct McTruthPart {
    pdg_codes: [i32; 3],
    masses: [f64; 3],
    q3: Hist1,
    q3_vs_mult: Hist2,
}

#[derive(Debug, Serialize)]
pub struct ThreeBodyContainer {
    kind: EventKind,
    masses: [f64; 3],
    q3: Hist1,
    q3_vs_mult: Hist2,
    /// High-resolution sorted-k* distribution for high-statistics analyses.
    kstar_3d: Option<HistSparse>,
    mc: Option<McTruthPart>,
}

pub struct ContainerConfig<'a> {
    pub q3_axis: &'a AxisSpec,
    pub mult_axis: &'a AxisSpec,
    /// Present when the three-dimensional sorted-k* histogram is requested.
    pub kstar_3d_axis: Option<&'a AxisSpec>,
    pub masses: [f64; 3],
    /// PDG codes and masses of the truth hypothesis, for MC runs.
    pub mc: Option<([i32; 3], [f64; 3])>,
}

impl ThreeBodyContainer {
    pub fn new(kind: EventKind, cfg: &ContainerConfig<'_>) -> Result<Self, Report> {
        let kstar_3d = match cfg.kstar_3d_axis {
            Some(axis) => Some(HistSparse::new(&[axis, axis, axis])?),
            None => None,
        };
        let mc = match cfg.mc {
            Some((pdg_codes, masses)) => Some(McTruthPart {
                pdg_codes,
                masses,
                q3: Hist1::new(cfg.q3_axis)?,
                q3_vs_mult: Hist2::new(cfg.q3_axis, cfg.mult_axis)?,
            }),
            None => None,
        };
        Ok(Self {
            kind,
            masses: cfg.masses,
            q3: Hist1::new(cfg.q3_axis)?,
            q3_vs_mult: Hist2::new(cfg.q3_axis, cfg.mult_axis)?,
            kstar_3d,
            mc,
        })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn has_mc(&self) -> bool {
        self.mc.is_some()
    }

    pub fn pdg_codes(&self) -> Option<[i32; 3]> {
        self.mc.as_ref().map(|mc| mc.pdg_codes)
    }

    /// Record one surviving triplet. Out-of-range Q3 lands in flow bins.
    pub fn add_triplet(
        &mut self,
        p1: &Particle,
        p2: &Particle,
        p3: &Particle,
        mult: i32,
        q3: f64,
        truth: Option<[&McParticle; 3]>,
    ) {
        self.q3.fill(q3);
        self.q3_vs_mult.fill(q3, f64::from(mult));
        if let Some(hist) = &mut self.kstar_3d {
            let v1 = FourMomentum::from_pt_eta_phi_m(p1.pt, p1.eta, p1.phi, self.masses[0]);
            let v2 = FourMomentum::from_pt_eta_phi_m(p2.pt, p2.eta, p2.phi, self.masses[1]);
            let v3 = FourMomentum::from_pt_eta_phi_m(p3.pt, p3.eta, p3.phi, self.masses[2]);
            let mut kstar = [
                kinematics::pair_kstar(v1, v2),
                kinematics::pair_kstar(v2, v3),
                kinematics::pair_kstar(v3, v1),
            ];
            kstar.sort_by(f64::total_cmp);
            hist.fill(&kstar);
        }
        if let (Some(mc), Some(truth)) = (&mut self.mc, truth) {
            let t1 = FourMomentum::from_pt_eta_phi_m(truth[0].pt, truth[0].eta, truth[0].phi, mc.masses[0]);
            let t2 = FourMomentum::from_pt_eta_phi_m(truth[1].pt, truth[1].eta, truth[1].phi, mc.masses[1]);
            let t3 = FourMomentum::from_pt_eta_phi_m(truth[2].pt, truth[2].eta, truth[2].phi, mc.masses[2]);
            let q3_truth = kinematics::q3(t1, t2, t3);
            mc.q3.fill(q3_truth);
            mc.q3_vs_mult.fill(q3_truth, f64::from(mult));
        }
    }

    pub fn entries(&self) -> u64 {
        self.q3.entries()
    }

    pub fn mc_entries(&self) -> u64 {
        self.mc.as_ref().map(|mc| mc.q3.entries()).unwrap_or(0)
    }

    pub fn entries_below(&self, q3_threshold: f64) -> f64 {
        self.q3.integral_below(q3_threshold)
    }

    pub fn q3_hist(&self) -> &Hist1 {
        &self.q3
    }

    pub fn q3_vs_mult_hist(&self) -> &Hist2 {
        &self.q3_vs_mult
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PART_TYPE_TRACK;

    const PROTON_MASS: f64 = 0.938272;

    fn particle(pt: f64, eta: f64, phi: f64) -> Particle {
        Particle {
            fd_collision_id: 0,
            index: 0,
            pt,
            eta,
            phi,
            temp_fit_var: 0.0,
            part_type: PART_TYPE_TRACK,
            pid_cut: 0,
            cut: 0,
            sign: 1,
            mc_id: None,
        }
    }

    fn config<'a>(axis: &'a AxisSpec, mult: &'a AxisSpec) -> ContainerConfig<'a> {
        ContainerConfig {
            q3_axis: axis,
            mult_axis: mult,
            kstar_3d_axis: None,
            masses: [PROTON_MASS; 3],
            mc: None,
        }
    }

    #[test]
    fn triplet_lands_in_the_right_bins() {
        let q3_axis = AxisSpec::Uniform {
            bins: 2000,
            min: 0.0,
            max: 8.0,
        };
        let mult_axis = AxisSpec::Variable {
            edges: vec![0.0, 20.0, 40.0, 60.0, 99999.0],
        };
        let mut cont =
            ThreeBodyContainer::new(EventKind::SameEvent, &config(&q3_axis, &mult_axis)).unwrap();
        let p = particle(1.0, 0.1, 0.5);
        cont.add_triplet(&p, &p, &p, 25, 0.35, None);
        assert_eq!(cont.entries(), 1);
        assert_eq!(cont.q3_hist().content_at(0.35), 1.0);
        assert_eq!(cont.q3_vs_mult_hist().content_at(0.35, 25.0), 1.0);
        assert_eq!(cont.q3_vs_mult_hist().content_at(0.35, 70.0), 0.0);
    }

    #[test]
    fn out_of_range_q3_is_not_an_error() {
        let q3_axis = AxisSpec::Uniform {
            bins: 100,
            min: 0.0,
            max: 2.0,
        };
        let mult_axis = AxisSpec::Uniform {
            bins: 1,
            min: 0.0,
            max: 1000.0,
        };
        let mut cont =
            ThreeBodyContainer::new(EventKind::MixedEvent, &config(&q3_axis, &mult_axis)).unwrap();
        let p = particle(1.0, 0.1, 0.5);
        cont.add_triplet(&p, &p, &p, 25, 5.0, None);
        assert_eq!(cont.entries(), 1);
        assert_eq!(cont.q3_hist().overflow(), 1.0);
    }

    #[test]
    fn mc_part_fills_with_truth_kinematics() {
        let q3_axis = AxisSpec::Uniform {
            bins: 2000,
            min: 0.0,
            max: 8.0,
        };
        let mult_axis = AxisSpec::Uniform {
            bins: 1,
            min: 0.0,
            max: 1000.0,
        };
        let mut cfg = config(&q3_axis, &mult_axis);
        cfg.mc = Some(([2212, 2212, 2212], [PROTON_MASS; 3]));
        let mut cont = ThreeBodyContainer::new(EventKind::SameEvent, &cfg).unwrap();
        let truth = McParticle {
            pt: 1.0,
            eta: 0.1,
            phi: 0.5,
            pdg_code: 2212,
        };
        let p = particle(1.05, 0.12, 0.48);
        cont.add_triplet(&p, &p, &p, 10, 0.4, Some([&truth, &truth, &truth]));
        assert_eq!(cont.entries(), 1);
        assert_eq!(cont.mc_entries(), 1);
    }
}
