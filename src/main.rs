use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use symequiv::experiments::{self, ExperimentRun, CATALOG};
use symequiv::proof::{LemmaProof, ProofCache};
use symequiv::scheduler::{ProofMode, SchedulerConfig, Status};
use symequiv::validation::SamplingConfig;

// --- Command Line Arguments ---

#[derive(Parser)]
#[command(name = "symequiv")]
#[command(about = "symequiv - compositional symbolic equivalence checker")]
#[command(version)]
#[command(subcommand_required = true)]
#[command(arg_required_else_help = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// CLI proof mode selection
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliMode {
    /// Symbolic proof only
    Symbolic,
    /// Random sampling only (never proves equivalence)
    Sampling,
    /// Symbolic proof, sampling when the solver gives up
    Fallback,
}

impl From<CliMode> for ProofMode {
    fn from(cli: CliMode) -> Self {
        match cli {
            CliMode::Symbolic => ProofMode::Symbolic,
            CliMode::Sampling => ProofMode::Sampling,
            CliMode::Fallback => ProofMode::SymbolicWithFallback,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in experiments
    List,
    /// Run an experiment's jobs
    Run {
        /// Experiment name (see `list`)
        experiment: String,
        /// Run only this job and the jobs whose overrides it uses
        #[arg(long)]
        job: Option<String>,

        // --- Budget ---
        /// Per-query solver timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// Wall-clock budget for the batch in seconds
        #[arg(long)]
        deadline: Option<u64>,
        /// Number of worker threads
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        // --- Proof mode ---
        /// How each job tries to reach a verdict
        #[arg(long, value_enum, default_value = "symbolic")]
        mode: CliMode,
        /// Random samples per job in sampling modes
        #[arg(long, default_value = "256")]
        samples: usize,
        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        // --- Output ---
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
        /// Enable verbose output
        #[arg(long, short)]
        verbose: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "symequiv=debug" } else { "symequiv=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn list() {
    println!("Experiments:");
    for (name, description, _) in CATALOG {
        println!("  {:<8} {}", name, description);
    }
}

fn print_summary(run: &ExperimentRun) {
    if !run.lemmas.is_empty() {
        println!("\n=== Lemmas ===");
        for (name, proof) in &run.lemmas {
            match proof {
                LemmaProof::Proved(lemma) => println!("{}: proved ({})", name, lemma.token()),
                LemmaProof::Refuted(model) => println!("{}: REFUTED at {:?}", name, model),
                LemmaProof::Undecided(reason) => println!("{}: undecided ({})", name, reason),
            }
        }
    }

    println!("\n=== Reports ===");
    for report in &run.batch.reports {
        println!("{}", report);
    }

    let batch = &run.batch;
    println!("\n=== Summary ===");
    println!("Jobs: {}", batch.reports.len());
    println!("Verified: {}", batch.count(Status::Verified));
    println!("Falsified: {}", batch.count(Status::Falsified));
    println!("Inconclusive: {}", batch.count(Status::Inconclusive));
    println!("Solver calls: {}", batch.solver_calls);
    println!("Time: {:.2?}", batch.elapsed);
}

fn print_json(run: &ExperimentRun) -> Result<(), serde_json::Error> {
    let lemmas: Vec<serde_json::Value> = run
        .lemmas
        .iter()
        .map(|(name, proof)| {
            let status = match proof {
                LemmaProof::Proved(_) => "proved",
                LemmaProof::Refuted(_) => "refuted",
                LemmaProof::Undecided(_) => "undecided",
            };
            serde_json::json!({ "name": name, "status": status })
        })
        .collect();
    let out = serde_json::json!({
        "lemmas": lemmas,
        "reports": run.batch.reports,
        "elapsed_ms": run.batch.elapsed.as_millis() as u64,
        "solver_calls": run.batch.solver_calls,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() {
    let args = Args::parse();

    match args.command {
        Commands::List => list(),
        Commands::Run {
            experiment,
            job,
            timeout,
            deadline,
            jobs,
            mode,
            samples,
            seed,
            json,
            verbose,
        } => {
            init_tracing(verbose);

            let Some(build) = experiments::find(&experiment) else {
                eprintln!("Unknown experiment: {} (try `symequiv list`)", experiment);
                std::process::exit(2);
            };
            let mut exp = match build() {
                Ok(exp) => exp,
                Err(e) => {
                    eprintln!("Error building experiment {}: {}", experiment, e);
                    std::process::exit(1);
                }
            };
            if let Some(job) = job {
                if exp.job(&job).is_none() {
                    eprintln!("Experiment {} has no job named {}", experiment, job);
                    std::process::exit(2);
                }
                exp = exp.only(&job);
            }

            let mut sampling = SamplingConfig::default().with_samples(samples);
            if let Some(seed) = seed {
                sampling = sampling.with_seed(seed);
            }
            let exp = exp.with_mode(mode.into()).with_sampling(sampling);

            let mut config = SchedulerConfig::default()
                .with_solver_timeout(Duration::from_secs(timeout))
                .with_deadline_option(deadline.map(Duration::from_secs));
            if let Some(n) = jobs {
                config = config.with_workers(n);
            }

            if !json {
                println!("Experiment: {}", exp.name);
                println!("Jobs: {}", exp.jobs.len());
                println!("Workers: {}", config.num_workers);
                println!("Solver timeout: {}s", timeout);
            }

            let run = match exp.run(Arc::new(ProofCache::new()), &config) {
                Ok(run) => run,
                Err(e) => {
                    eprintln!("Error scheduling experiment {}: {}", experiment, e);
                    std::process::exit(1);
                }
            };

            if json {
                if let Err(e) = print_json(&run) {
                    eprintln!("Error writing JSON: {}", e);
                    std::process::exit(1);
                }
            } else {
                print_summary(&run);
            }

            if run.batch.count(Status::Falsified) > 0 {
                std::process::exit(3);
            }
        }
    }
}
