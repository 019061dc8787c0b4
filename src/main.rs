use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use fairta::{FairnessConfig, Instance, PNorm, RunFile, generate_instances, write_instances};

#[derive(Parser, Debug)]
#[command(name = "fairta")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve one instance and write its JSON result
    Solve(SolveArgs),
    /// Generate random instances
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct SolveArgs {
    /// Number of sources
    #[arg(short, long, default_value_t = 5)]
    sources: usize,

    /// Number of targets
    #[arg(short, long, default_value_t = 100)]
    targets: usize,

    /// Instance file name [default: instance_<sources>_<targets>_1.txt]
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Instance directory [default: ./data/instances/instance_<sources>_<targets>/]
    #[arg(long)]
    path: Option<PathBuf>,

    /// Norm order, an integer >= 2 or "inf" [default: 2]
    #[arg(short, long)]
    p_norm: Option<PNorm>,

    /// Fairness coefficient in [0, 1] [default: 0.5]
    #[arg(short, long)]
    fairness: Option<f64>,

    /// Time limit in seconds [default: 3600]
    #[arg(long)]
    time_limit: Option<f64>,

    /// Relative optimality gap [default: 0.001]
    #[arg(long)]
    gap: Option<f64>,

    /// Result directory [default: ./data/results/instance_<sources>_<targets>/]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// YAML run file; explicit flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(short, long, default_value_t = 5)]
    sources: usize,

    #[arg(short, long, default_value_t = 100)]
    targets: usize,

    /// Instances to generate, all sharing the same sources
    #[arg(long, default_value_t = 5)]
    count: usize,

    #[arg(short, long, default_value = "./data/instances")]
    dir: PathBuf,

    /// Seed for reproducible instances
    #[arg(long)]
    seed: Option<u64>,
}

impl SolveArgs {
    fn instance_dir(&self) -> String {
        format!("instance_{}_{}", self.sources, self.targets)
    }

    fn instance_file(&self) -> PathBuf {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_1.txt", self.instance_dir()));
        let dir = self
            .path
            .clone()
            .unwrap_or_else(|| Path::new("./data/instances").join(self.instance_dir()));
        dir.join(name)
    }

    fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| Path::new("./data/results").join(self.instance_dir()))
    }

    fn fairness_config(&self) -> Result<FairnessConfig, Box<dyn std::error::Error>> {
        let run = match &self.config {
            Some(path) => RunFile::from_file(path)?,
            None => RunFile::default(),
        };
        let p_norm = self.p_norm.or(run.p_norm).unwrap_or(PNorm::Finite(2));
        let fairness = self.fairness.or(run.fairness_coefficient).unwrap_or(0.5);

        let mut config = FairnessConfig::new(p_norm, fairness)?;
        if let Some(secs) = self.time_limit.or(run.time_limit_in_seconds) {
            config = config.with_time_limit(secs)?;
        }
        if let Some(gap) = self.gap.or(run.gap_tolerance) {
            config = config.with_gap_tolerance(gap)?;
        }
        Ok(config)
    }
}

/// `<stem>-p-<p>-fc-<fc * 100>.json`
fn result_file_name(instance_name: &str, config: &FairnessConfig) -> String {
    let stem = instance_name.split('.').next().unwrap_or(instance_name);
    format!(
        "{stem}-p-{}-fc-{}.json",
        config.p_norm(),
        (config.fairness_coefficient() * 100.0) as i64
    )
}

fn run_solve(args: &SolveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.fairness_config()?;
    let instance = Instance::from_file(&args.instance_file())?;
    let outcome = fairta::solve(&instance, &config)?;

    let output_dir = args.output_dir();
    fs::create_dir_all(&output_dir)?;
    let output_file = output_dir.join(result_file_name(&instance.name, &config));
    let json = serde_json::to_string_pretty(&outcome.to_result(&instance))?;
    fs::write(&output_file, json)?;

    info!("result written to {}", output_file.display());
    Ok(())
}

fn run_generate(args: &GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let instances = generate_instances(args.sources, args.targets, args.count, &mut rng);
    for path in write_instances(&args.dir, &instances)? {
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).init();

    match &cli.command {
        Command::Solve(args) => run_solve(args),
        Command::Generate(args) => run_generate(args),
    }
}
