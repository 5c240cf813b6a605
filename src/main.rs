mod analysis;
mod cleaner;
mod close_pair;
mod container;
mod event;
mod histogram;
mod kinematics;
mod mixed_event;
mod same_event;
mod selection;
mod tests;

use clap::{App, Arg, SubCommand};
use color_eyre::{Help, Report};
use colored::Colorize;
use eyre::{bail, WrapErr};
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufWriter;
use std::str::FromStr;
use std::time::Instant;
use tabled::{Style, Table};

use analysis::Analysis;
use close_pair::ClosePairSettings;
use event::{Collision, EventSample, Particle, PART_TYPE_TRACK};
use histogram::AxisSpec;
use kinematics::FourMomentum;
use selection::TrackSelectionSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub debug: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KinematicsSettings {
    /// Mass hypothesis assigned to every selected track, in GeV/c^2.
    pub mass: f64,
    /// Q3 below which the sorted-k* fork diagnostics are filled.
    pub fork_q3_max: f64,
}

impl Default for KinematicsSettings {
    fn default() -> Self {
        Self {
            mass: 0.938272,
            fork_q3_max: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventSelectionSettings {
    pub sphericity_min: f64,
    pub sphericity_max: f64,
}

impl Default for EventSelectionSettings {
    fn default() -> Self {
        Self {
            sphericity_min: 0.6,
            sphericity_max: 1.0,
        }
    }
}

impl EventSelectionSettings {
    pub fn accepts(&self, col: &Collision) -> bool {
        col.sphericity >= self.sphericity_min && col.sphericity <= self.sphericity_max
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixingSettings {
    /// Window depth: a collision is mixed with at most this many consecutive
    /// pool neighbours.
    pub n_events_mix: usize,
    /// Which particle-content mask to consult in masked mode (at least one,
    /// two or three particles of interest per collision).
    pub tracks_in_mixed_event: u8,
    /// Bit identifying this cut configuration inside the content masks.
    pub mask_bit: u32,
}

impl Default for MixingSettings {
    fn default() -> Self {
        Self {
            n_events_mix: 5,
            tracks_in_mixed_event: 1,
            mask_bit: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinningSettings {
    pub pt: AxisSpec,
    pub q3: AxisSpec,
    /// Coarser Q3 axis for the multi-dimensional QA fills.
    pub q3_wide: AxisSpec,
    pub kstar_3d: AxisSpec,
    pub mult: AxisSpec,
    pub vtx: AxisSpec,
    pub temp_fit_var: AxisSpec,
    /// Enables the three-dimensional sorted-k* accumulators.
    pub use_3d: bool,
}

impl Default for BinningSettings {
    fn default() -> Self {
        Self {
            pt: AxisSpec::Uniform {
                bins: 20,
                min: 0.5,
                max: 4.05,
            },
            q3: AxisSpec::Uniform {
                bins: 2000,
                min: 0.0,
                max: 8.0,
            },
            q3_wide: AxisSpec::Uniform {
                bins: 500,
                min: 0.0,
                max: 2.0,
            },
            kstar_3d: AxisSpec::Uniform {
                bins: 200,
                min: 0.0,
                max: 2.0,
            },
            mult: AxisSpec::Variable {
                edges: vec![0.0, 20.0, 40.0, 60.0, 80.0, 100.0, 200.0, 99999.0],
            },
            vtx: AxisSpec::Variable {
                edges: vec![
                    -10.0, -8.0, -6.0, -4.0, -2.0, 0.0, 2.0, 4.0, 6.0, 8.0, 10.0,
                ],
            },
            temp_fit_var: AxisSpec::Uniform {
                bins: 300,
                min: -0.15,
                max: 0.15,
            },
            use_3d: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub same_event: bool,
    pub mixed_event: bool,
    pub same_event_masked: bool,
    pub mixed_event_masked: bool,
    pub same_event_mc: bool,
    pub mixed_event_mc: bool,
    pub same_event_mc_masked: bool,
    pub mixed_event_mc_masked: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            same_event: true,
            mixed_event: true,
            same_event_masked: false,
            mixed_event_masked: false,
            same_event_mc: false,
            mixed_event_mc: false,
            same_event_mc_masked: false,
            mixed_event_mc_masked: false,
        }
    }
}

impl ProcessingSettings {
    /// The plain and masked variants of one pass consume the same triplets;
    /// running both would double-count.
    pub fn validate(&self, has_mc_section: bool) -> Result<(), Report> {
        if self.same_event && self.same_event_masked {
            bail!("Normal and masked same-event processing cannot be activated simultaneously");
        }
        if self.mixed_event && self.mixed_event_masked {
            bail!("Normal and masked mixed-event processing cannot be activated simultaneously");
        }
        if self.same_event_mc && self.same_event_mc_masked {
            bail!("Normal and masked same-event MC processing cannot be activated simultaneously");
        }
        if self.mixed_event_mc && self.mixed_event_mc_masked {
            bail!("Normal and masked mixed-event MC processing cannot be activated simultaneously");
        }
        if self.any_mc() && !has_mc_section {
            bail!("MC processing requires the Mc section of the configuration");
        }
        Ok(())
    }

    pub fn any_same(&self) -> bool {
        self.same_event || self.same_event_masked || self.same_mc()
    }

    pub fn any_mixed(&self) -> bool {
        self.mixed_event || self.mixed_event_masked || self.mixed_mc()
    }

    pub fn same_mc(&self) -> bool {
        self.same_event_mc || self.same_event_mc_masked
    }

    pub fn mixed_mc(&self) -> bool {
        self.mixed_event_mc || self.mixed_event_mc_masked
    }

    pub fn mixed_masked(&self) -> bool {
        self.mixed_event_masked || self.mixed_event_mc_masked
    }

    pub fn any_mc(&self) -> bool {
        self.same_mc() || self.mixed_mc()
    }
}

/// Truth hypothesis for MC runs. PDG codes and masses come in as data; no
/// particle-property lookup happens here.
#[derive(Debug, Clone, Deserialize)]
pub struct McSettings {
    pub pdg_codes: [i32; 3],
    pub masses: [f64; 3],
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "General")]
    pub general: GeneralSettings,
    #[serde(rename = "Kinematics")]
    pub kinematics: KinematicsSettings,
    #[serde(rename = "EventSelection")]
    pub event_selection: EventSelectionSettings,
    #[serde(rename = "TrackSelection")]
    pub track_selection: TrackSelectionSettings,
    #[serde(rename = "ClosePairRejection")]
    pub close_pair: ClosePairSettings,
    #[serde(rename = "Mixing")]
    pub mixing: MixingSettings,
    #[serde(rename = "Binning")]
    pub binning: BinningSettings,
    #[serde(rename = "Processing")]
    pub processing: ProcessingSettings,
    #[serde(rename = "Mc")]
    pub mc: Option<McSettings>,
}

impl Settings {
    pub fn from_file(filename: &str) -> Result<Settings, Report> {
        let f = File::open(filename)
            .wrap_err_with(|| format!("Could not open settings file {}", filename))
            .suggestion("Does the path exist?")?;
        serde_yaml::from_reader(f)
            .wrap_err("Could not parse settings file")
            .suggestion("Is it a correct yaml file")
    }
}

fn print_banner() {
    println!(
        "{}{}",
        format!(
            "{}",
            r#"
     __               _      _____     _      _      _
    / _|             | |    |_   _|   (_)    | |    | |
   | |_ ___ _ __ ___ | |_ ___ | |_ __ _ _ __ | | ___| |_
   |  _/ _ \ '_ ` _ \| __/ _ \| | '__| | '_ \| |/ _ \ __|
   | ||  __/ | | | | | || (_) | | |  | | |_) | |  __/ |_
   |_| \___|_| |_| |_|\__\___/\_/_|  |_| .__/|_|\___|\__|
                                       | |
    "#
        )
        .bold()
        .blue(),
        format!("{:>10}", env!("CARGO_PKG_VERSION")).green(),
    );
    println!();
}

/// Print the pair k* values and Q3 of one triplet given as nine numbers
/// (pt eta phi per particle).
fn inspect(settings: &Settings, point: &[f64]) {
    let m = settings.kinematics.mass;
    let v: Vec<FourMomentum> = point
        .chunks(3)
        .map(|c| FourMomentum::from_pt_eta_phi_m(c[0], c[1], c[2], m))
        .collect();
    let kstar = [
        kinematics::pair_kstar(v[0], v[1]),
        kinematics::pair_kstar(v[0], v[2]),
        kinematics::pair_kstar(v[1], v[2]),
    ];
    let q3 = kinematics::q3(v[0], v[1], v[2]);
    println!(
        "For mass hypothesis m = {} GeV and triplet (pt eta phi) = {:?}:",
        format!("{}", m).blue(),
        point,
    );
    println!(
        "> k*(12) = {} GeV, k*(13) = {} GeV, k*(23) = {} GeV",
        format!("{:+.16e}", kstar[0]).blue(),
        format!("{:+.16e}", kstar[1]).blue(),
        format!("{:+.16e}", kstar[2]).blue(),
    );
    println!("> Q3 = {} GeV", format!("{:+.16e}", q3).green());
}

/// Write a synthetic event sample whose tracks pass the default selection,
/// for exercising the pipeline without derived data at hand.
fn generate_sample(
    settings: &Settings,
    n_collisions: usize,
    mult: usize,
    seed: u64,
    filename: &str,
) -> Result<(), Report> {
    let cuts = &settings.track_selection;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut sample = EventSample::default();
    for id in 0..n_collisions {
        sample.collisions.push(Collision {
            id,
            pos_z: rng.gen_range(-10.0..10.0),
            mult_ntr: rng.gen_range(3..50),
            mult_v0m: rng.gen_range(0.0..100.0),
            sphericity: rng.gen_range(0.5..1.0),
            mag_field: 0.5,
            bitmask_one: 0,
            bitmask_two: 0,
            bitmask_three: 0,
        });
        for index in 0..mult {
            sample.particles.push(Particle {
                fd_collision_id: id,
                index,
                pt: rng.gen_range(cuts.pt_min + 0.1..cuts.pt_max - 0.5),
                eta: rng.gen_range(-0.8..0.8),
                phi: rng.gen_range(0.0..2.0 * PI),
                temp_fit_var: rng.gen_range(cuts.dca_min..cuts.dca_max),
                part_type: PART_TYPE_TRACK,
                pid_cut: cuts.tpc_pid_bit | cuts.tpc_tof_pid_bit,
                cut: cuts.cut_bit,
                sign: if rng.gen_bool(0.5) { 1 } else { -1 },
                mc_id: None,
            });
        }
    }
    let f = BufWriter::new(
        File::create(filename)
            .wrap_err_with(|| format!("Could not create sample file {}", filename))
            .suggestion("Is the output directory writable?")?,
    );
    serde_yaml::to_writer(f, &sample).wrap_err("Could not serialize event sample")?;
    println!(
        "Wrote {} collisions with {} tracks each to {}",
        format!("{}", n_collisions).blue(),
        format!("{}", mult).blue(),
        format!("{}", filename).green(),
    );
    Ok(())
}

fn run_analysis(settings: &Settings, event_file: &str, output: &str) -> Result<(), Report> {
    let sample = EventSample::from_file(event_file)?;
    if settings.general.debug > 0 {
        println!(
            "Loaded {} collisions, {} particle candidates, {} truth rows",
            format!("{}", sample.collisions.len()).blue(),
            format!("{}", sample.particles.len()).blue(),
            format!("{}", sample.mc_particles.len()).blue(),
        );
        println!();
    }

    let mut analysis = Analysis::new(settings)?;
    let now = Instant::now();
    analysis.run(&sample);
    let total_time = now.elapsed().as_secs_f64();
    analysis.write_results(output)?;

    println!(
        "{}",
        format!(
            "Processing completed after {} s, results written to {}.",
            format!("{:.2}", total_time).bold().blue(),
            format!("{}", output).bold().blue(),
        )
        .bold()
        .green()
    );
    println!();
    println!("{}", Table::new(analysis.summary()).with(Style::psql()).to_string());
    println!();
    Ok(())
}

fn main() -> Result<(), Report> {
    let matches = App::new("femtoTriplet")
        .version("0.1")
        .about("Three-particle femtoscopic correlation pipeline")
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config")
                .value_name("CONFIG_FILE")
                .default_value("./femtotriplet_config.yaml")
                .help("Set the configuration file"),
        )
        .arg(
            Arg::with_name("events")
                .short("e")
                .long("events")
                .value_name("EVENT_FILE")
                .default_value("./events.yaml")
                .help("Set the event sample to process"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("OUTPUT_FILE")
                .default_value("./results.yaml")
                .help("Set the results file"),
        )
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .value_name("LEVEL")
                .help("Set the debug level. Higher means more verbose."),
        )
        .subcommand(
            SubCommand::with_name("inspect")
                .about("Inspect the kinematics of a single triplet")
                .arg(
                    Arg::with_name("point")
                        .short("p")
                        .required(true)
                        .min_values(9)
                        .allow_hyphen_values(true)
                        .help("Nine numbers: pt eta phi for each of the three particles"),
                ),
        )
        .subcommand(
            SubCommand::with_name("gen")
                .about("Generate a synthetic event sample")
                .arg(
                    Arg::with_name("collisions")
                        .short("n")
                        .long("collisions")
                        .value_name("N")
                        .default_value("100")
                        .help("Number of collisions to generate"),
                )
                .arg(
                    Arg::with_name("mult")
                        .short("m")
                        .long("mult")
                        .value_name("MULT")
                        .default_value("5")
                        .help("Number of tracks per collision"),
                )
                .arg(
                    Arg::with_name("seed")
                        .short("s")
                        .long("seed")
                        .value_name("SEED")
                        .default_value("1"),
                ),
        )
        .get_matches();

    let mut settings: Settings = Settings::from_file(matches.value_of("config").unwrap())?;
    let event_file = matches.value_of("events").unwrap().to_string();
    let output_file = matches.value_of("output").unwrap().to_string();

    print_banner();

    if let Some(x) = matches.value_of("debug") {
        settings.general.debug = usize::from_str(x).unwrap();
    }
    if settings.general.debug > 0 {
        println!(
            "{}",
            format!("Debug mode enabled at level {}", settings.general.debug).red()
        );
        println!();
    }

    if let Some(matches) = matches.subcommand_matches("inspect") {
        let pt = matches
            .values_of("point")
            .unwrap()
            .map(|x| f64::from_str(x.trim_end_matches(',')).unwrap())
            .collect::<Vec<_>>();
        if pt.len() != 9 {
            bail!("Expected nine numbers: pt eta phi for each of the three particles");
        }
        inspect(&settings, &pt);
    } else if let Some(matches) = matches.subcommand_matches("gen") {
        let n_collisions: usize = matches.value_of("collisions").unwrap().parse().unwrap();
        let mult: usize = matches.value_of("mult").unwrap().parse().unwrap();
        let seed: u64 = matches.value_of("seed").unwrap().parse().unwrap();
        generate_sample(&settings, n_collisions, mult, seed, &event_file)?;
    } else {
        run_analysis(&settings, &event_file, &output_file)?;
    }
    Ok(())
}
