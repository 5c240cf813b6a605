#![allow(dead_code)]
use crate::event::{Collision, Particle, PART_TYPE_TRACK};
use crate::Settings;

/// Partial YAML on top of the defaults; close-pair rejection is switched
/// off so that triplet counting stays purely combinatorial.
fn settings_without_cpr() -> Settings {
    serde_yaml::from_str(
        r#"
ClosePairRejection:
  enabled: false
"#,
    )
    .unwrap()
}

/// A track passing the default selection.
fn track(col: usize, index: usize, pt: f64, eta: f64, phi: f64) -> Particle {
    Particle {
        fd_collision_id: col,
        index,
        pt,
        eta,
        phi,
        temp_fit_var: 0.0,
        part_type: PART_TYPE_TRACK,
        pid_cut: 16 | 8,
        cut: 5542474,
        sign: 1,
        mc_id: None,
    }
}

fn collision(id: usize, pos_z: f64, mult_ntr: i32, mag_field: f64) -> Collision {
    Collision {
        id,
        pos_z,
        mult_ntr,
        mult_v0m: 50.0,
        sphericity: 1.0,
        mag_field,
        bitmask_one: 0,
        bitmask_two: 0,
        bitmask_three: 0,
    }
}

/// Six selected tracks spread out enough that no pair is close.
fn spread_tracks(col: usize) -> Vec<Particle> {
    (0..6)
        .map(|i| {
            track(
                col,
                i,
                0.5 + 0.3 * i as f64,
                -0.6 + 0.25 * i as f64,
                0.5 + 0.9 * i as f64,
            )
        })
        .collect()
}

#[cfg(test)]
mod same_event_pass {
    use super::*;
    use crate::analysis::{self, Analysis};
    use crate::event::{EventSample, McParticle};
    use crate::kinematics::{self, FourMomentum};
    use crate::same_event;

    #[test]
    fn candidate_count_is_binomial_in_the_pool_size() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let sample = EventSample {
            collisions: vec![collision(0, 1.0, 25, 0.5)],
            particles: spread_tracks(0),
            mc_particles: vec![],
        };
        analysis.run(&sample);
        // C(6, 3) candidate triplets, none rejected.
        assert_eq!(analysis.same_event.entries(), 20);
    }

    #[test]
    fn soft_triplet_lands_in_every_diagnostic() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let particles = vec![
            track(0, 0, 1.00, 0.02, 0.50),
            track(0, 1, 1.02, 0.00, 0.52),
            track(0, 2, 0.98, -0.02, 0.48),
        ];
        let m = settings.kinematics.mass;
        let v: Vec<FourMomentum> = particles
            .iter()
            .map(|p| FourMomentum::from_pt_eta_phi_m(p.pt, p.eta, p.phi, m))
            .collect();
        let q3 = kinematics::q3(v[0], v[1], v[2]);
        assert!(q3 < settings.kinematics.fork_q3_max);

        let sample = EventSample {
            collisions: vec![collision(0, 1.0, 25, 0.5)],
            particles,
            mc_particles: vec![],
        };
        analysis.run(&sample);

        assert_eq!(analysis.same_event.entries(), 1);
        assert_eq!(analysis.same_event.q3_hist().content_at(q3), 1.0);
        assert_eq!(
            analysis.same_event.q3_vs_mult_hist().content_at(q3, 25.0),
            1.0
        );
        // One processed event with exactly one triplet below Q3 = 1.4.
        let per_event = analysis
            .registry
            .h1(same_event::TRIPLETS_PER_EVENT_BELOW_14)
            .unwrap();
        assert_eq!(per_event.entries(), 1);
        assert_eq!(per_event.content_at(1.0), 1.0);
        // Below the fork threshold both sorted-k* views get one fill.
        assert_eq!(
            analysis
                .registry
                .h2(same_event::KSTAR_MID_VS_LARGEST_SE)
                .unwrap()
                .entries(),
            1
        );
        assert_eq!(
            analysis
                .registry
                .h2(same_event::KSTAR_SMALLEST_VS_LARGEST_SE)
                .unwrap()
                .entries(),
            1
        );
    }

    #[test]
    fn isotropy_cut_drops_jetty_events() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let mut col = collision(0, 1.0, 25, 0.5);
        col.sphericity = 0.3;
        let sample = EventSample {
            collisions: vec![col],
            particles: spread_tracks(0),
            mc_particles: vec![],
        };
        analysis.run(&sample);
        assert_eq!(analysis.same_event.entries(), 0);
        assert_eq!(
            analysis
                .registry
                .h1(analysis::SE_COLLISION_BINS)
                .unwrap()
                .entries(),
            0
        );
    }

    #[test]
    fn small_pools_only_feed_event_level_qa() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let sample = EventSample {
            collisions: vec![collision(0, 1.0, 25, 0.5)],
            particles: vec![track(0, 0, 1.0, 0.1, 0.5), track(0, 1, 1.5, -0.2, 2.0)],
            mc_particles: vec![],
        };
        analysis.run(&sample);
        assert_eq!(analysis.same_event.entries(), 0);
        let n_tracks = analysis
            .registry
            .h1(analysis::TRACKS_PASSING_SELECTION)
            .unwrap();
        assert_eq!(n_tracks.content_at(2.0), 1.0);
    }

    #[test]
    fn truth_part_fills_alongside_the_reconstructed_one() {
        let mut settings = settings_without_cpr();
        let extra: Settings = serde_yaml::from_str(
            r#"
Processing:
  same_event: false
  mixed_event: false
  same_event_mc: true
Mc:
  pdg_codes: [2212, 2212, 2212]
  masses: [0.938272, 0.938272, 0.938272]
"#,
        )
        .unwrap();
        settings.processing = extra.processing;
        settings.mc = extra.mc;

        let mut analysis = Analysis::new(&settings).unwrap();
        let mut particles = vec![
            track(0, 0, 1.00, 0.02, 0.50),
            track(0, 1, 1.02, 0.00, 0.52),
            track(0, 2, 0.98, -0.02, 0.48),
        ];
        let mc_particles: Vec<McParticle> = particles
            .iter()
            .map(|p| McParticle {
                pt: p.pt * 0.99,
                eta: p.eta,
                phi: p.phi,
                pdg_code: 2212,
            })
            .collect();
        for (i, p) in particles.iter_mut().enumerate() {
            p.mc_id = Some(i);
        }
        let sample = EventSample {
            collisions: vec![collision(0, 1.0, 25, 0.5)],
            particles,
            mc_particles,
        };
        analysis.run(&sample);
        assert_eq!(analysis.same_event.entries(), 1);
        assert_eq!(analysis.same_event.mc_entries(), 1);
        assert_eq!(analysis.same_event.pdg_codes(), Some([2212, 2212, 2212]));
    }
}

#[cfg(test)]
mod mixed_event_pass {
    use super::*;
    use crate::analysis::{self, Analysis};
    use crate::event::EventSample;

    /// One selected track per collision, all collisions in the same
    /// (vertex-z, multiplicity) bin.
    fn single_track_sample(fields: &[f64]) -> EventSample {
        let mut sample = EventSample::default();
        for (id, &field) in fields.iter().enumerate() {
            sample.collisions.push(collision(id, 1.0, 25, field));
            sample.particles.push(track(
                id,
                0,
                0.6 + 0.2 * id as f64,
                -0.5 + 0.2 * id as f64,
                0.3 + 1.1 * id as f64,
            ));
        }
        sample
    }

    #[test]
    fn triples_of_distinct_collisions_are_mixed() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let sample = single_track_sample(&[0.5, 0.5, 0.5, 0.5]);
        analysis.run(&sample);
        // C(4, 3) collision triples, one track from each.
        assert_eq!(analysis.mixed_event.entries(), 4);
        assert_eq!(analysis.same_event.entries(), 0);
    }

    #[test]
    fn mixing_window_caps_the_collision_span() {
        let mut settings = settings_without_cpr();
        settings.mixing.n_events_mix = 3;
        let mut analysis = Analysis::new(&settings).unwrap();
        let sample = single_track_sample(&[0.5; 5]);
        analysis.run(&sample);
        // Only consecutive windows of three: (0,1,2), (1,2,3), (2,3,4).
        assert_eq!(analysis.mixed_event.entries(), 3);
    }

    #[test]
    fn field_polarity_mismatch_skips_the_triple() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let sample = single_track_sample(&[0.5, 0.5, -0.5]);
        analysis.run(&sample);
        assert_eq!(analysis.mixed_event.entries(), 0);
        // The collision-bin QA still sees the candidate triple.
        assert_eq!(
            analysis
                .registry
                .h1(analysis::ME_COLLISION_BINS)
                .unwrap()
                .entries(),
            1
        );
    }

    #[test]
    fn collisions_in_different_bins_never_mix() {
        let settings = settings_without_cpr();
        let mut analysis = Analysis::new(&settings).unwrap();
        let mut sample = single_track_sample(&[0.5, 0.5, 0.5]);
        // Move one collision to another vertex-z bin.
        sample.collisions[2].pos_z = 7.5;
        analysis.run(&sample);
        assert_eq!(analysis.mixed_event.entries(), 0);
    }

    #[test]
    fn masked_mixing_only_pools_flagged_collisions() {
        let mut settings = settings_without_cpr();
        let extra: Settings = serde_yaml::from_str(
            r#"
Processing:
  same_event: false
  mixed_event: false
  mixed_event_masked: true
Mixing:
  tracks_in_mixed_event: 1
  mask_bit: 4
"#,
        )
        .unwrap();
        settings.processing = extra.processing;
        settings.mixing = extra.mixing;

        let mut analysis = Analysis::new(&settings).unwrap();
        let mut sample = single_track_sample(&[0.5, 0.5, 0.5, 0.5]);
        for col in sample.collisions.iter_mut().take(3) {
            col.bitmask_one = 4;
        }
        analysis.run(&sample);
        // Only the three flagged collisions are pooled.
        assert_eq!(analysis.mixed_event.entries(), 1);
    }
}

#[cfg(test)]
mod configuration {
    use super::*;
    use crate::analysis::Analysis;
    use crate::event::EventSample;

    #[test]
    fn plain_and_masked_processing_are_mutually_exclusive() {
        let settings: Settings = serde_yaml::from_str(
            r#"
Processing:
  same_event: true
  same_event_masked: true
"#,
        )
        .unwrap();
        assert!(Analysis::new(&settings).is_err());
    }

    #[test]
    fn mc_processing_requires_the_truth_hypothesis() {
        let settings: Settings = serde_yaml::from_str(
            r#"
Processing:
  same_event: false
  same_event_mc: true
"#,
        )
        .unwrap();
        assert!(Analysis::new(&settings).is_err());
    }

    #[test]
    fn partial_configuration_overrides_the_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r#"
TrackSelection:
  pt_max: 2.0
Mixing:
  n_events_mix: 7
"#,
        )
        .unwrap();
        assert_eq!(settings.mixing.n_events_mix, 7);
        assert_eq!(settings.track_selection.pt_max, 2.0);
        // Untouched sections keep their defaults.
        assert_eq!(settings.track_selection.cut_bit, 5542474);
        assert_eq!(settings.kinematics.fork_q3_max, 0.4);
        assert!(settings.close_pair.enabled);
    }

    #[test]
    fn tightened_selection_shrinks_the_pool() {
        let mut settings = settings_without_cpr();
        settings.track_selection.pt_max = 1.2;
        let mut analysis = Analysis::new(&settings).unwrap();
        let sample = EventSample {
            collisions: vec![collision(0, 1.0, 25, 0.5)],
            // Only three of the six spread tracks stay below pt = 1.2.
            particles: spread_tracks(0),
            mc_particles: vec![],
        };
        analysis.run(&sample);
        assert_eq!(analysis.same_event.entries(), 1);
    }
}
