//! Close-pair rejection: discard track pairs so close in (eta, phi*) space
//! that they are likely one physical trajectory reconstructed twice, or two
//! trajectories merged by detector resolution.
//!
//! Two formulas for the azimuthal separation are kept: the corrected one
//! wraps the difference into (-pi, pi], the legacy one compares the raw
//! difference. The legacy variant is retained only so that results remain
//! comparable with earlier productions; it is selected once at startup.

use std::f64::consts::PI;

use color_eyre::Report;
use serde::Deserialize;

use crate::event::Particle;
use crate::histogram::{AxisSpec, HistogramRegistry};

/// Reference radii of the tracking-detector pad rows, in cm.
pub const TPC_RADII_CM: [f64; 9] = [85.0, 105.0, 125.0, 145.0, 165.0, 185.0, 205.0, 225.0, 245.0];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub enum RadiiMode {
    /// Compare eta and phi as measured at the primary vertex.
    #[serde(rename = "at_vertex")]
    AtVertex,
    /// Compare eta and the phi* averaged over the reference radii.
    #[serde(rename = "averaged_phi")]
    AveragedPhi,
    /// Compare at every reference radius; close at any radius rejects.
    #[serde(rename = "at_given_radii")]
    AtGivenRadii,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub enum PhiStarFormula {
    #[serde(rename = "legacy")]
    Legacy,
    #[serde(rename = "corrected")]
    Corrected,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClosePairSettings {
    pub enabled: bool,
    pub formula: PhiStarFormula,
    pub radii_mode: RadiiMode,
    /// Radii at which phi* is evaluated for the averaged and per-radius
    /// modes.
    pub radii_cm: Vec<f64>,
    pub delta_eta_max: f64,
    pub delta_phi_max: f64,
    pub fill_qa: bool,
    pub plot_per_radius: bool,
    /// Pairs above this Q3 stay out of the QA plots.
    pub max_q3_in_plots: f64,
}

impl Default for ClosePairSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            formula: PhiStarFormula::Legacy,
            radii_mode: RadiiMode::AveragedPhi,
            radii_cm: TPC_RADII_CM.to_vec(),
            delta_eta_max: 0.01,
            delta_phi_max: 0.01,
            fill_qa: false,
            plot_per_radius: false,
            max_q3_in_plots: 8.0,
        }
    }
}

/// Whether the engine runs inside the same-event or the mixed-event pass;
/// only affects the QA histogram names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairContext {
    SameEvent,
    MixedEvent,
}

impl PairContext {
    fn suffix(self) -> &'static str {
        match self {
            PairContext::SameEvent => "SE",
            PairContext::MixedEvent => "ME",
        }
    }
}

pub struct ClosePairRejection {
    cfg: ClosePairSettings,
    context: PairContext,
}

fn wrap_to_pi(mut dphi: f64) -> f64 {
    dphi %= 2.0 * PI;
    if dphi > PI {
        dphi -= 2.0 * PI;
    } else if dphi < -PI {
        dphi += 2.0 * PI;
    }
    dphi
}

impl ClosePairRejection {
    pub fn new(
        cfg: ClosePairSettings,
        context: PairContext,
        registry: &mut HistogramRegistry,
    ) -> Result<Self, Report> {
        let engine = Self { cfg, context };
        if engine.cfg.fill_qa {
            let deta = AxisSpec::Uniform {
                bins: 200,
                min: -0.3,
                max: 0.3,
            };
            let dphi = deta.clone();
            let q3 = AxisSpec::Uniform {
                bins: 200,
                min: 0.0,
                max: engine.cfg.max_q3_in_plots,
            };
            registry.add_h2(&engine.qa_name(None), &deta, &dphi)?;
            registry.add_sparse(&engine.qa_q3_name(), &[&deta, &dphi, &q3])?;
            if engine.cfg.plot_per_radius {
                for i in 0..engine.cfg.radii_cm.len() {
                    registry.add_h2(&engine.qa_name(Some(i)), &deta, &dphi)?;
                }
            }
        }
        Ok(engine)
    }

    fn qa_name(&self, radius: Option<usize>) -> String {
        match radius {
            None => format!("CPR/DetaDphiStar{}", self.context.suffix()),
            Some(i) => format!("CPR/DetaDphiStar{}_Radius{}", self.context.suffix(), i),
        }
    }

    fn qa_q3_name(&self) -> String {
        format!("CPR/DetaDphiStarVsQ3{}", self.context.suffix())
    }

    /// Azimuth of the propagated trajectory at a given detector radius.
    /// Returns None when the track curls up before reaching the radius.
    fn phi_at_radius(part: &Particle, mag_field: f64, radius_cm: f64) -> Option<f64> {
        let arg = 0.3 * f64::from(part.sign) * mag_field * radius_cm * 0.01 / (2.0 * part.pt);
        if arg.abs() >= 1.0 {
            return None;
        }
        Some(part.phi - arg.asin())
    }

    fn delta_phi(&self, raw: f64) -> f64 {
        match self.cfg.formula {
            PhiStarFormula::Legacy => raw,
            PhiStarFormula::Corrected => wrap_to_pi(raw),
        }
    }

    fn is_below_thresholds(&self, deta: f64, dphi: f64) -> bool {
        deta.abs() < self.cfg.delta_eta_max && dphi.abs() < self.cfg.delta_phi_max
    }

    fn fill_qa(
        &self,
        registry: &mut HistogramRegistry,
        radius: Option<usize>,
        deta: f64,
        dphi: f64,
        q3: f64,
    ) {
        if !self.cfg.fill_qa || q3 > self.cfg.max_q3_in_plots {
            return;
        }
        match radius {
            None => {
                registry.fill2(&self.qa_name(None), deta, dphi);
                registry.fill_sparse(&self.qa_q3_name(), &[deta, dphi, q3]);
            }
            Some(i) => {
                if self.cfg.plot_per_radius {
                    registry.fill2(&self.qa_name(Some(i)), deta, dphi);
                }
            }
        }
    }

    /// Decide whether the pair is a split/merged-track artifact. Symmetric
    /// under swapping the two particles.
    pub fn is_close_pair(
        &self,
        p1: &Particle,
        p2: &Particle,
        mag_field: f64,
        q3: f64,
        registry: &mut HistogramRegistry,
    ) -> bool {
        let deta = p1.eta - p2.eta;
        match self.cfg.radii_mode {
            RadiiMode::AtVertex => {
                let dphi = self.delta_phi(p1.phi - p2.phi);
                self.fill_qa(registry, None, deta, dphi, q3);
                self.is_below_thresholds(deta, dphi)
            }
            RadiiMode::AveragedPhi => {
                let mut sum = 0.0;
                let mut evaluated = 0usize;
                for &radius in &self.cfg.radii_cm {
                    let phi1 = Self::phi_at_radius(p1, mag_field, radius);
                    let phi2 = Self::phi_at_radius(p2, mag_field, radius);
                    if let (Some(phi1), Some(phi2)) = (phi1, phi2) {
                        sum += self.delta_phi(phi1 - phi2);
                        evaluated += 1;
                    }
                }
                if evaluated == 0 {
                    return false;
                }
                let dphi_avg = sum / evaluated as f64;
                self.fill_qa(registry, None, deta, dphi_avg, q3);
                self.is_below_thresholds(deta, dphi_avg)
            }
            RadiiMode::AtGivenRadii => {
                let mut close = false;
                for (i, &radius) in self.cfg.radii_cm.iter().enumerate() {
                    let phi1 = Self::phi_at_radius(p1, mag_field, radius);
                    let phi2 = Self::phi_at_radius(p2, mag_field, radius);
                    if let (Some(phi1), Some(phi2)) = (phi1, phi2) {
                        let dphi = self.delta_phi(phi1 - phi2);
                        self.fill_qa(registry, Some(i), deta, dphi, q3);
                        if self.is_below_thresholds(deta, dphi) {
                            close = true;
                        }
                    }
                }
                close
            }
        }
    }
}
