use std::path::{Path, PathBuf};
use std::process;

use amdrisk::legend::UNKNOWN_CODE;
use amdrisk::{
    format_risk, Config, ConvergenceMetric, Cutoff, Evidence, FactorGraph, Legend, RiskChange,
    RiskModel, RiskReport,
};
use clap::{Args, Parser, Subcommand};

const DEFAULT_LEGEND: &str = include_str!("../assets/legend.toml");
const DEFAULT_TARGET: &str = "ASMULTIMODALORRES_E1_C18";
/// Profile entry giving the baseline stage, used as cutoff when none is given.
const BASELINE_STAGE: &str = "stage_before";
/// Baseline visit (V0) features and their follow-up visit (V1) counterparts.
const V0_TO_V1: [(&str, &str); 5] = [
    ("age_E0", "age_E1"),
    ("bmi_E0", "bmi_E1_C1"),
    ("ls_smoker_E0", "ls_smoker_E1_C6"),
    ("diabetes_E0", "diabetes_E1_C3"),
    ("arterial_hypertension_E0", "arterial_hypertension_E1_C3"),
];

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    name = "amdrisk",
    about = "Estimate the risk of AMD progression from a patient profile",
    long_about = "Runs belief propagation on a factor graph linking patient features to the \
                  AMD outcome, with weights trained for a given stage cutoff."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Risk score of a patient profile
    Score {
        #[command(flatten)]
        model: ModelArgs,

        /// Also print the posterior distribution of every variable
        #[arg(long)]
        marginals: bool,
    },

    /// Risk of a profile before and after changing some features
    Simulate {
        #[command(flatten)]
        model: ModelArgs,

        /// Feature to change, with its new state code or label
        #[arg(long = "set", value_name = "FEATURE=STATE", required = true)]
        changes: Vec<String>,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Directory holding the InfluenceScores weight tables
    #[arg(long, value_name = "DIR")]
    weights_dir: PathBuf,

    /// Patient profile (.toml) with one `feature = state` entry per observed feature
    #[arg(long)]
    profile: PathBuf,

    /// Stage cutoff (0 to 3). Defaults to the baseline stage of the profile
    #[arg(long)]
    cutoff: Option<u8>,

    /// Fixed state the weight tables were trained with
    #[arg(long, default_value = "1")]
    fixed_state: u8,

    /// Name of the outcome variable
    #[arg(long, default_value = DEFAULT_TARGET)]
    target: String,

    /// State legend (.toml). Defaults to the built-in AMD legend
    #[arg(long)]
    legend: Option<PathBuf>,

    /// Convergence threshold of belief propagation
    #[arg(long, default_value = "1e-7")]
    precision: f64,

    /// Maximum number of belief propagation iterations
    #[arg(long, default_value = "1000")]
    max_iter: usize,

    /// Use the largest absolute message change as convergence error
    #[arg(long)]
    max_abs_error: bool,

    /// Fail on weights missing from the table instead of using 0
    #[arg(long)]
    strict_weights: bool,

    /// Use the V0 value of a feature for its V1 counterpart when the latter is not given
    #[arg(long)]
    carry_v0: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

/// Model, legend and profile resolved from the command line.
struct Session {
    model: RiskModel,
    legend: Legend,
    profile: Evidence,
    config: Config,
}

impl ModelArgs {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .with_precision(self.precision)
            .with_max_iter(self.max_iter);
        if self.max_abs_error {
            config = config.with_metric(ConvergenceMetric::MaxAbsDifference);
        }
        if self.strict_weights {
            config = config.strict_weights();
        }
        config
    }

    fn open(&self) -> CliResult<Session> {
        let mut profile = load_profile(&self.profile)?;
        if self.carry_v0 {
            carry_v0(&mut profile);
        }
        let cutoff = resolve_cutoff(self.cutoff, &profile)?;
        let model = RiskModel::load(&self.weights_dir, cutoff, self.fixed_state, &self.target)?;
        let mut legend = match &self.legend {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => toml::from_str::<Legend>(DEFAULT_LEGEND)?,
        };
        fit_to_model(model.graph(), &mut legend, &mut profile);
        Ok(Session {
            model,
            legend,
            profile,
            config: self.config(),
        })
    }
}

/// Cutoff given on the command line, or else the baseline stage of the profile.
fn resolve_cutoff(cutoff: Option<u8>, profile: &Evidence) -> CliResult<Cutoff> {
    match (cutoff, profile.get(BASELINE_STAGE)) {
        (Some(c), _) => Ok(Cutoff::try_from(c)?),
        (None, Some(stage)) => {
            let stage = u8::try_from(*stage)
                .map_err(|_| format!("invalid {} {} in the profile", BASELINE_STAGE, stage))?;
            Ok(Cutoff::try_from(stage)?)
        }
        (None, None) => Err(format!(
            "no --cutoff given and no {} in the profile",
            BASELINE_STAGE
        )
        .into()),
    }
}

/// Copies V0 values into the V1 features that are missing or unknown.
fn carry_v0(profile: &mut Evidence) {
    for (v0, v1) in V0_TO_V1 {
        let Some(&value) = profile.get(v0) else {
            continue;
        };
        if profile.get(v1).map_or(true, |&c| c == UNKNOWN_CODE) {
            log::debug!("{} set from {}", v1, v0);
            profile.insert(v1.to_owned(), value);
        }
    }
}

/// Drops the legend features absent from the model, and the baseline stage from the profile
/// when the model does not use it.
fn fit_to_model(graph: &FactorGraph, legend: &mut Legend, profile: &mut Evidence) {
    legend.retain(|f| {
        let known = graph.get_varid(f).is_ok();
        if !known {
            log::debug!("Feature {} of the legend is not in the model", f);
        }
        known
    });
    if graph.get_varid(BASELINE_STAGE).is_err() && profile.shift_remove(BASELINE_STAGE).is_some()
    {
        log::debug!("{} only selects the cutoff", BASELINE_STAGE);
    }
}

fn load_profile(path: &Path) -> CliResult<Evidence> {
    let profile: Evidence = toml::from_str(&std::fs::read_to_string(path)?)?;
    log::info!(
        "Loaded profile with {} entries from {}",
        profile.len(),
        path.display()
    );
    Ok(profile)
}

/// Parses `feature=state`, the state being a code or a label of the legend.
fn parse_change(change: &str, legend: &Legend) -> CliResult<(String, i64)> {
    let (feature, state) = change
        .split_once('=')
        .ok_or_else(|| format!("invalid change {:?}, expected FEATURE=STATE", change))?;
    let (feature, state) = (feature.trim(), state.trim());
    let code = match state.parse::<i64>() {
        Ok(code) => code,
        Err(_) => legend
            .code(feature, state)
            .ok_or_else(|| format!("unknown state {:?} for feature {}", state, feature))?,
    };
    Ok((feature.to_owned(), code))
}

fn print_report(report: &RiskReport, legend: &Legend, marginals: bool) {
    println!(
        "Risk of transitioning to stages {}: {}",
        report.cutoff,
        format_risk(report.score)
    );
    if !report.converged {
        println!(
            "  (not converged after {} iterations, error {:e})",
            report.iterations, report.error
        );
    }
    if marginals {
        for (name, distri) in report.marginals.iter() {
            let probs: Vec<String> = distri.iter().map(|p| format!("{:.4}", p)).collect();
            println!("  {:<40} {}", legend.display_name(name), probs.join(" "));
        }
    }
}

fn score_command(args: &ModelArgs, marginals: bool) -> CliResult<()> {
    let session = args.open()?;
    let report = session
        .model
        .calculate_risk(&session.profile, &session.legend, &session.config)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &session.legend, marginals);
    }
    Ok(())
}

fn simulate_command(args: &ModelArgs, changes: &[String]) -> CliResult<()> {
    let session = args.open()?;
    let changes = changes
        .iter()
        .map(|c| parse_change(c, &session.legend))
        .collect::<CliResult<Evidence>>()?;
    let outcome = session.model.simulate(
        &session.profile,
        &changes,
        &session.legend,
        &session.config,
    )?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    println!("Baseline:");
    print_report(&outcome.baseline, &session.legend, false);
    println!("After changes:");
    print_report(&outcome.scenario, &session.legend, false);
    let amount = format_risk(outcome.delta.abs());
    match outcome.change {
        RiskChange::Reduced => println!("This scenario reduces risk by {}.", amount),
        RiskChange::Increased => println!("This scenario increases risk by {}.", amount),
        RiskChange::Unchanged => println!("This scenario does not change the risk."),
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Score { model, marginals } => score_command(model, *marginals),
        Commands::Simulate { model, changes } => simulate_command(model, changes),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
