//! Per-run analysis context: owns the accumulators, the QA registry and the
//! selected-particle cache, and drives the same-event and mixed-event
//! passes over one event sample. Built fresh per run; nothing survives
//! between independent batches.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;

use color_eyre::{Help, Report};
use eyre::WrapErr;
use serde::Serialize;
use tabled::Tabled;

use crate::close_pair::{ClosePairRejection, PairContext};
use crate::container::{ContainerConfig, EventKind, ThreeBodyContainer};
use crate::event::{Collision, EventSample, ParticleTable, PoolCache};
use crate::histogram::{AxisSpec, HistogramRegistry};
use crate::mixed_event::{windowed_triples, MixedEventProcessor, MixingBinning};
use crate::same_event::SameEventProcessor;
use crate::{MixingSettings, Settings};

pub const SE_COLLISION_BINS: &str = "TripletTaskQA/hSECollisionBins";
pub const ME_COLLISION_BINS: &str = "TripletTaskQA/hMECollisionBins";
pub const SE_MULT_VS_GOOD_TRACKS: &str = "TripletTaskQA/hSEMultVsGoodTracks";
pub const TRACKS_PASSING_SELECTION: &str = "TripletTaskQA/hTracksPassingSelection";
pub const DCA_VS_PT_ALL: &str = "TrackQA/hDcaXyVsPtAll";
pub const DCA_VS_PT_TRIPLET_EVENTS: &str = "TrackQA/hDcaXyVsPtTripletEvents";
pub const PT_RESOLUTION: &str = "TrackMCQA/hPtResolution";

/// True when the collision's particle-content mask reports at least the
/// configured number of particles of interest for this cut configuration.
fn mask_accepts(col: &Collision, mixing: &MixingSettings) -> bool {
    let mask = match mixing.tracks_in_mixed_event {
        1 => col.bitmask_one,
        2 => col.bitmask_two,
        _ => col.bitmask_three,
    };
    mask & mixing.mask_bit == mixing.mask_bit
}

pub struct Analysis {
    settings: Settings,
    pub registry: HistogramRegistry,
    pub same_event: ThreeBodyContainer,
    pub mixed_event: ThreeBodyContainer,
    se_proc: SameEventProcessor,
    me_proc: MixedEventProcessor,
    col_binning: MixingBinning,
}

impl Analysis {
    pub fn new(settings: &Settings) -> Result<Self, Report> {
        settings.processing.validate(settings.mc.is_some())?;

        let mut registry = HistogramRegistry::new();
        let masses = [settings.kinematics.mass; 3];
        let binning = &settings.binning;

        let bins_axis = AxisSpec::Uniform {
            bins: 120,
            min: -0.5,
            max: 119.5,
        };
        let good_tracks_axis = AxisSpec::Uniform {
            bins: 100,
            min: 0.0,
            max: 100.0,
        };
        let n_tracks_axis = AxisSpec::Uniform {
            bins: 30,
            min: 0.0,
            max: 30.0,
        };
        registry.add_h1(SE_COLLISION_BINS, &bins_axis)?;
        registry.add_h1(ME_COLLISION_BINS, &bins_axis)?;
        registry.add_h2(SE_MULT_VS_GOOD_TRACKS, &binning.mult, &good_tracks_axis)?;
        registry.add_h1(TRACKS_PASSING_SELECTION, &n_tracks_axis)?;
        registry.add_h2(DCA_VS_PT_ALL, &binning.pt, &binning.temp_fit_var)?;
        registry.add_h2(DCA_VS_PT_TRIPLET_EVENTS, &binning.pt, &binning.temp_fit_var)?;
        if settings.processing.any_mc() {
            let gen_pt_axis = AxisSpec::Uniform {
                bins: 100,
                min: settings.track_selection.pt_min,
                max: settings.track_selection.pt_max,
            };
            let resolution_axis = AxisSpec::Uniform {
                bins: 300,
                min: -1.0,
                max: 1.0,
            };
            registry.add_h2(PT_RESOLUTION, &gen_pt_axis, &resolution_axis)?;
        }

        let mc_hypothesis = settings.mc.as_ref().map(|mc| (mc.pdg_codes, mc.masses));
        let kstar_3d_axis = binning.use_3d.then_some(&binning.kstar_3d);
        let same_event = ThreeBodyContainer::new(
            EventKind::SameEvent,
            &ContainerConfig {
                q3_axis: &binning.q3,
                mult_axis: &binning.mult,
                kstar_3d_axis,
                masses,
                mc: settings.processing.same_mc().then(|| mc_hypothesis).flatten(),
            },
        )?;
        let mixed_event = ThreeBodyContainer::new(
            EventKind::MixedEvent,
            &ContainerConfig {
                q3_axis: &binning.q3,
                mult_axis: &binning.mult,
                kstar_3d_axis,
                masses,
                mc: settings.processing.mixed_mc().then(|| mc_hypothesis).flatten(),
            },
        )?;

        let cpr_se = if settings.close_pair.enabled && settings.processing.any_same() {
            Some(ClosePairRejection::new(
                settings.close_pair.clone(),
                PairContext::SameEvent,
                &mut registry,
            )?)
        } else {
            None
        };
        let cpr_me = if settings.close_pair.enabled && settings.processing.any_mixed() {
            Some(ClosePairRejection::new(
                settings.close_pair.clone(),
                PairContext::MixedEvent,
                &mut registry,
            )?)
        } else {
            None
        };

        let se_proc = SameEventProcessor {
            masses,
            fork_q3_max: settings.kinematics.fork_q3_max,
            cpr: cpr_se,
        };
        se_proc.book(&mut registry, binning)?;
        let me_proc = MixedEventProcessor {
            masses,
            fork_q3_max: settings.kinematics.fork_q3_max,
            cpr: cpr_me,
        };
        me_proc.book(&mut registry, binning)?;

        let col_binning = MixingBinning::new(&binning.vtx, &binning.mult)?;

        Ok(Self {
            settings: settings.clone(),
            registry,
            same_event,
            mixed_event,
            se_proc,
            me_proc,
            col_binning,
        })
    }

    /// One full pass over the sample: same-event first, then mixing. The
    /// selected-particle pools are shared between the two passes.
    pub fn run(&mut self, sample: &EventSample) {
        let table = ParticleTable::new(&sample.particles);
        let mut cache = PoolCache::default();
        if self.settings.processing.any_same() {
            self.same_event_pass(sample, &table, &mut cache);
        }
        if self.settings.processing.any_mixed() {
            self.mixed_event_pass(sample, &table, &mut cache);
        }
    }

    fn same_event_pass(
        &mut self,
        sample: &EventSample,
        table: &ParticleTable<'_>,
        cache: &mut PoolCache,
    ) {
        let is_mc = self.settings.processing.same_mc();
        for col in &sample.collisions {
            if !self.settings.event_selection.accepts(col) {
                continue;
            }
            if let Some(bin) = self.col_binning.bin(col) {
                self.registry.fill1(SE_COLLISION_BINS, bin as f64);
            }
            cache.ensure(col.id, table, &self.settings.track_selection);
            let pool = cache.get(col.id);
            for &row in pool {
                let part = table.get(row);
                self.registry.fill2(DCA_VS_PT_ALL, part.pt, part.temp_fit_var);
                if is_mc {
                    if let Some(truth) =
                        crate::same_event::truth_for(Some(&sample.mc_particles), part)
                    {
                        self.registry.fill2(
                            PT_RESOLUTION,
                            truth.pt,
                            (part.pt - truth.pt) / truth.pt,
                        );
                    }
                }
            }
            self.registry
                .fill1(TRACKS_PASSING_SELECTION, pool.len() as f64);
            self.registry.fill2(
                SE_MULT_VS_GOOD_TRACKS,
                f64::from(col.mult_ntr),
                pool.len() as f64,
            );
            if pool.len() < 3 {
                continue;
            }
            for &row in pool {
                let part = table.get(row);
                self.registry
                    .fill2(DCA_VS_PT_TRIPLET_EVENTS, part.pt, part.temp_fit_var);
            }
            let mc = is_mc.then(|| sample.mc_particles.as_slice());
            self.se_proc
                .run(col, pool, table, mc, &mut self.same_event, &mut self.registry);
        }
    }

    fn mixed_event_pass(
        &mut self,
        sample: &EventSample,
        table: &ParticleTable<'_>,
        cache: &mut PoolCache,
    ) {
        let masked = self.settings.processing.mixed_masked();
        let is_mc = self.settings.processing.mixed_mc();
        let depth = self.settings.mixing.n_events_mix;

        // Pool eligible collisions per mixing bin, preserving input order so
        // that the mixing window stays deterministic.
        let mut bins: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (ci, col) in sample.collisions.iter().enumerate() {
            if !self.settings.event_selection.accepts(col) {
                continue;
            }
            if masked && !mask_accepts(col, &self.settings.mixing) {
                continue;
            }
            if let Some(bin) = self.col_binning.bin(col) {
                bins.entry(bin).or_default().push(ci);
            }
        }

        for (bin, cols_in_bin) in &bins {
            for (i, j, k) in windowed_triples(cols_in_bin.len(), depth) {
                let c1 = &sample.collisions[cols_in_bin[i]];
                let c2 = &sample.collisions[cols_in_bin[j]];
                let c3 = &sample.collisions[cols_in_bin[k]];
                self.registry.fill1(ME_COLLISION_BINS, *bin as f64);
                // Mixing across field polarities is physically invalid.
                if c1.mag_field != c2.mag_field || c2.mag_field != c3.mag_field {
                    continue;
                }
                cache.ensure(c1.id, table, &self.settings.track_selection);
                cache.ensure(c2.id, table, &self.settings.track_selection);
                cache.ensure(c3.id, table, &self.settings.track_selection);
                let pools = [cache.get(c1.id), cache.get(c2.id), cache.get(c3.id)];
                let mc = is_mc.then(|| sample.mc_particles.as_slice());
                self.me_proc.run(
                    [c1, c2, c3],
                    pools,
                    table,
                    mc,
                    &mut self.mixed_event,
                    &mut self.registry,
                );
            }
        }
    }

    pub fn write_results(&self, filename: &str) -> Result<(), Report> {
        #[derive(Serialize)]
        struct Results<'a> {
            same_event: &'a ThreeBodyContainer,
            mixed_event: &'a ThreeBodyContainer,
            qa: &'a HistogramRegistry,
        }
        let f = BufWriter::new(
            File::create(filename)
                .wrap_err_with(|| format!("Could not create results file {}", filename))
                .suggestion("Is the output directory writable?")?,
        );
        serde_yaml::to_writer(
            f,
            &Results {
                same_event: &self.same_event,
                mixed_event: &self.mixed_event,
                qa: &self.registry,
            },
        )
        .wrap_err("Could not serialize results")?;
        Ok(())
    }

    pub fn summary(&self) -> Vec<ContainerSummary> {
        let fork = self.settings.kinematics.fork_q3_max;
        [&self.same_event, &self.mixed_event]
            .iter()
            .map(|cont| ContainerSummary {
                container: format!("{:?}", cont.kind()),
                entries: format!("{}", cont.entries()),
                below_fork: format!("{:.0}", cont.entries_below(fork)),
                mc_entries: if cont.has_mc() {
                    format!("{}", cont.mc_entries())
                } else {
                    "N/A".to_string()
                },
            })
            .collect()
    }
}

#[derive(Tabled)]
pub struct ContainerSummary {
    pub container: String,
    pub entries: String,
    #[tabled(rename = "below fork Q3")]
    pub below_fork: String,
    #[tabled(rename = "MC entries")]
    pub mc_entries: String,
}
