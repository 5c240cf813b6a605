//! Data model of the derived input tables: collisions, particle candidates
//! and Monte Carlo truth rows. All records are read-only once loaded; the
//! only mutable state on top of them is the per-run selected-particle cache.

use std::collections::HashMap;
use std::fs::File;

use color_eyre::{Help, Report};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::selection::TrackSelectionSettings;

/// Particle type tag for reconstructed tracks; other values (V0 daughters,
/// cascades, ...) are produced upstream but not analysed here.
pub const PART_TYPE_TRACK: u8 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particle {
    /// Owning collision.
    pub fd_collision_id: usize,
    /// Index within the owning collision; (fd_collision_id, index) is the
    /// stable track identity.
    pub index: usize,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    /// DCA-to-vertex proxy.
    pub temp_fit_var: f64,
    pub part_type: u8,
    /// PID decision bits, TPC-only detector response.
    pub pid_cut: u32,
    /// Track selection bits.
    pub cut: u32,
    pub sign: i8,
    /// Back-reference into the Monte Carlo truth table, when available.
    #[serde(default)]
    pub mc_id: Option<usize>,
}

impl Particle {
    pub fn same_track(&self, other: &Particle) -> bool {
        self.fd_collision_id == other.fd_collision_id && self.index == other.index
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collision {
    pub id: usize,
    pub pos_z: f64,
    /// Charged-track multiplicity estimator.
    pub mult_ntr: i32,
    /// Centrality estimator.
    pub mult_v0m: f64,
    #[serde(default = "default_sphericity")]
    pub sphericity: f64,
    /// Solenoid field in Tesla.
    pub mag_field: f64,
    /// Precomputed particle-content masks: which task configurations found
    /// at least one / two / three particles of interest in this collision.
    #[serde(default)]
    pub bitmask_one: u32,
    #[serde(default)]
    pub bitmask_two: u32,
    #[serde(default)]
    pub bitmask_three: u32,
}

fn default_sphericity() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McParticle {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub pdg_code: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSample {
    pub collisions: Vec<Collision>,
    pub particles: Vec<Particle>,
    #[serde(default)]
    pub mc_particles: Vec<McParticle>,
}

impl EventSample {
    pub fn from_file(filename: &str) -> Result<EventSample, Report> {
        let f = File::open(filename)
            .wrap_err_with(|| format!("Could not open event sample {}", filename))
            .suggestion("Does the path exist?")?;
        serde_yaml::from_reader(f)
            .wrap_err("Could not parse event sample")
            .suggestion("Is it a correct yaml file")
    }
}

/// Row-index view of the particle table grouped by owning collision.
pub struct ParticleTable<'a> {
    rows: &'a [Particle],
    by_collision: HashMap<usize, Vec<usize>>,
}

impl<'a> ParticleTable<'a> {
    pub fn new(rows: &'a [Particle]) -> Self {
        let mut by_collision: HashMap<usize, Vec<usize>> = HashMap::new();
        for (row, part) in rows.iter().enumerate() {
            by_collision.entry(part.fd_collision_id).or_default().push(row);
        }
        Self { rows, by_collision }
    }

    pub fn get(&self, row: usize) -> &'a Particle {
        &self.rows[row]
    }

    pub fn rows_for(&self, collision_id: usize) -> &[usize] {
        self.by_collision
            .get(&collision_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Per-run cache of selected-particle pools, keyed by collision id. Pool
/// membership is a pure function of the cuts and the particle attributes,
/// so one evaluation per collision serves the same-event pass and every
/// mixed-event triple touching that collision.
#[derive(Default)]
pub struct PoolCache {
    pools: HashMap<usize, Vec<usize>>,
}

impl PoolCache {
    pub fn ensure(
        &mut self,
        collision_id: usize,
        table: &ParticleTable<'_>,
        cuts: &TrackSelectionSettings,
    ) {
        self.pools.entry(collision_id).or_insert_with(|| {
            table
                .rows_for(collision_id)
                .iter()
                .copied()
                .filter(|&row| cuts.accepts(table.get(row)))
                .collect()
        });
    }

    pub fn get(&self, collision_id: usize) -> &[usize] {
        self.pools
            .get(&collision_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
