//! Track-level selection: a pure predicate over one particle record and the
//! configured cuts. No side effects, no cross-collision state.

use serde::Deserialize;

use crate::event::{Particle, PART_TYPE_TRACK};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackSelectionSettings {
    /// Momentum threshold above which the TPC PID decision alone is no
    /// longer trusted and the combined TPC+TOF bit is required.
    pub pid_thr_mom: f64,
    pub tpc_pid_bit: u32,
    pub tpc_tof_pid_bit: u32,
    /// Required selection-bit pattern from the upstream cut producer.
    pub cut_bit: u32,
    pub pt_min: f64,
    pub pt_max: f64,
    pub dca_min: f64,
    pub dca_max: f64,
    /// Switches the DCA cut from the fixed window to |dca| <= a + b / pt.
    pub dca_cut_pt_dep: bool,
    pub dca_pt_dep_offset: f64,
    pub dca_pt_dep_slope: f64,
}

impl Default for TrackSelectionSettings {
    fn default() -> Self {
        Self {
            pid_thr_mom: 1.0,
            tpc_pid_bit: 16,
            tpc_tof_pid_bit: 8,
            cut_bit: 5542474,
            pt_min: 0.3,
            pt_max: 4.05,
            dca_min: -0.1,
            dca_max: 0.1,
            dca_cut_pt_dep: false,
            dca_pt_dep_offset: 0.004,
            dca_pt_dep_slope: 0.013,
        }
    }
}

fn check_bits(mask: u32, pattern: u32) -> bool {
    mask & pattern == pattern
}

impl TrackSelectionSettings {
    /// Momentum estimate used for the PID regime decision,
    /// pt * (e^eta + e^-eta) / 2 = pt * cosh(eta).
    fn momentum_proxy(part: &Particle) -> f64 {
        part.pt * (part.eta.exp() + (-part.eta).exp()) / 2.0
    }

    pub fn accepts(&self, part: &Particle) -> bool {
        if part.part_type != PART_TYPE_TRACK {
            return false;
        }
        let pid_bit = if Self::momentum_proxy(part) <= self.pid_thr_mom {
            self.tpc_pid_bit
        } else {
            self.tpc_tof_pid_bit
        };
        if !check_bits(part.pid_cut, pid_bit) {
            return false;
        }
        if !check_bits(part.cut, self.cut_bit) {
            return false;
        }
        if part.pt <= self.pt_min || part.pt >= self.pt_max {
            return false;
        }
        if self.dca_cut_pt_dep {
            part.temp_fit_var.abs() <= self.dca_pt_dep_offset + self.dca_pt_dep_slope / part.pt
        } else {
            part.temp_fit_var >= self.dca_min && part.temp_fit_var <= self.dca_max
        }
    }
}
