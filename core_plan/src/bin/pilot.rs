use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use core_plan::{
    Dispatcher, Motifs, Movie, Planner, PlannerConfig, StateCache, ToyEngine, WeightedObjectives,
    Worker,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Autonomous game-playing movie search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the planner standalone, scoring everything in-process.
    Run(RunArgs),
    /// Serve score/improve requests as a worker process.
    Worker {
        /// Port to listen on.
        #[arg(long)]
        port: u16,
        /// Objective artifact to score with.
        #[arg(long)]
        objectives: PathBuf,
        /// Motif artifact for improvement strategies.
        #[arg(long)]
        motifs: PathBuf,
    },
    /// Run the planner as a coordinator over worker processes.
    Coordinate {
        #[command(flatten)]
        run: RunArgs,
        /// Worker ports on localhost, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        ports: Vec<u16>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Objective artifact.
    #[arg(long)]
    objectives: PathBuf,
    /// Motif artifact; rewritten with learned weights as planning runs.
    #[arg(long)]
    motifs: PathBuf,
    /// Existing movie to warm start from, replayed as a frozen prefix.
    #[arg(long)]
    movie: Option<PathBuf>,
    /// Planning rounds to run; unlimited when omitted.
    #[arg(long)]
    rounds: Option<u64>,
    /// JSON planner configuration; defaults apply for missing fields.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output path for movie and motif artifacts (extension added).
    #[arg(long, default_value = "pilot-out")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_planner(args, Vec::new()),
        Command::Coordinate { run, ports } => run_planner(run, ports),
        Command::Worker {
            port,
            objectives,
            motifs,
        } => {
            let objectives = WeightedObjectives::load_from_file(&objectives)
                .with_context(|| format!("loading objectives from {}", objectives.display()))?;
            let motifs = Motifs::load_from_file(&motifs)
                .with_context(|| format!("loading motifs from {}", motifs.display()))?;
            let config = PlannerConfig::default();
            let mut worker = Worker::new(
                ToyEngine::new(),
                StateCache::new(config.cache_limit, config.cache_slop),
                objectives,
                motifs,
            );
            worker.serve(port)?;
            Ok(())
        }
    }
}

fn run_planner(args: RunArgs, ports: Vec<u16>) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => PlannerConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PlannerConfig::default(),
    };
    let objectives = WeightedObjectives::load_from_file(&args.objectives)
        .with_context(|| format!("loading objectives from {}", args.objectives.display()))?;
    let motifs = Motifs::load_from_file(&args.motifs)
        .with_context(|| format!("loading motifs from {}", args.motifs.display()))?;

    let movie_path = args.out.with_extension("movie");
    let motifs_path = args.out.with_extension("motifs");
    let mut planner = Planner::new(
        config,
        ToyEngine::new(),
        objectives,
        motifs,
        Dispatcher::new(ports),
        movie_path,
        motifs_path,
    );

    if let Some(path) = &args.movie {
        let prefix = Movie::read_inputs_from_file(path)
            .with_context(|| format!("loading movie prefix from {}", path.display()))?;
        planner.warm_start(&prefix);
    }

    planner.run(args.rounds)
}
