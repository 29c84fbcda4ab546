//! Fleet coordination and recovery-learning engine.
//!
//! Runs agent tasks concurrently on a shared grid, arbitrates target cells
//! and learns recovery maneuvers per location in `.fleet/recovery_history.json`.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;

use fleet::core::advisor::recommend;
use fleet::core::types::{Pos, Strategy};
use fleet::execution::{TaskReport, TaskSpec};
use fleet::exit_codes;
use fleet::fleet::{Fleet, FleetReport};
use fleet::io::config::{FleetConfig, load_config};
use fleet::io::init::{FleetPaths, init_fleet};
use fleet::io::recovery_store::{Durability, RecoveryStore};
use fleet::io::telemetry::{EventSink, FanOut, JsonlSink, TracingSink};

#[derive(Parser)]
#[command(
    name = "fleet",
    version,
    about = "Fleet coordination and recovery-learning engine"
)]
struct Cli {
    /// Widen the default log filter (-v, -vv). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.fleet/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load and validate the config.
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run tasks concurrently until every loop reaches a terminal outcome.
    Run(RunArgs),
    /// Inspect or reset the recovery history.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Show the maneuver the advisor would pick for a stuck agent.
    Recommend {
        #[arg(long)]
        agent: String,
        /// Cell the agent is stuck on, as `x,y`.
        #[arg(long)]
        at: Pos,
        #[arg(long)]
        target: Pos,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Task as `<agent>=<x>,<y>`; repeat per agent.
    #[arg(long = "task", value_parser = parse_task, required = true)]
    tasks: Vec<(String, Pos)>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Event log path (defaults to `.fleet/events.jsonl`).
    #[arg(long)]
    events: Option<PathBuf>,
    /// Seed the advisor's tie-breaking.
    #[arg(long)]
    seed: Option<u64>,
    /// Print the full report as JSON instead of summary lines.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// Per-strategy summary, or one location's record with `--agent --at`.
    Show {
        #[arg(long, requires = "at")]
        agent: Option<String>,
        #[arg(long, requires = "agent")]
        at: Option<Pos>,
    },
    /// Delete every recorded experience.
    Clear,
}

fn parse_task(raw: &str) -> Result<(String, Pos), String> {
    let (agent, cell) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <agent>=<x>,<y>, got {raw:?}"))?;
    let agent = agent.trim();
    if agent.is_empty() {
        return Err(format!("missing agent id in {raw:?}"));
    }
    Ok((agent.to_string(), cell.parse()?))
}

fn main() {
    let cli = Cli::parse();
    fleet::logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = FleetPaths::new(std::env::current_dir().context("resolve working directory")?);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Validate { config } => cmd_validate(&paths, config),
        Command::Run(args) => cmd_run(&paths, args),
        Command::History { command } => match command {
            HistoryCommand::Show { agent, at } => cmd_history_show(&paths, agent.zip(at)),
            HistoryCommand::Clear => cmd_history_clear(&paths),
        },
        Command::Recommend {
            agent,
            at,
            target,
            seed,
        } => cmd_recommend(&paths, &agent, at, target, seed),
    }
}

fn cmd_init(paths: &FleetPaths, force: bool) -> Result<i32> {
    if init_fleet(&paths.root, force)? {
        println!("wrote {}", paths.config_path.display());
    } else {
        println!("exists {}", paths.config_path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(paths: &FleetPaths, config: Option<PathBuf>) -> Result<i32> {
    let path = config.unwrap_or_else(|| paths.config_path.clone());
    let cfg = load_config(&path)?;
    println!(
        "ok: {} agents={} grid_size={}",
        path.display(),
        cfg.world.agents.len(),
        cfg.world.grid_size
    );
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &FleetPaths, args: RunArgs) -> Result<i32> {
    let config_path = args.config.unwrap_or_else(|| paths.config_path.clone());
    let config = load_config(&config_path)?;
    let specs = task_specs(&config, &args.tasks)?;

    let store = Arc::new(RecoveryStore::open(paths.resolve(&config.store.path)));
    let events_path = args.events.unwrap_or_else(|| paths.events_path.clone());
    let events = FanOut::new(vec![
        Arc::new(TracingSink) as Arc<dyn EventSink>,
        Arc::new(JsonlSink::create(&events_path)?) as Arc<dyn EventSink>,
    ]);

    let mut builder = Fleet::builder(config)
        .with_store(store)
        .with_events(Arc::new(events));
    if let Some(seed) = args.seed {
        builder = builder.with_seed(seed);
    }
    let fleet = builder.build()?;

    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    let report = runtime.block_on(fleet.run(specs));

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize run report")?
        );
    } else {
        print_report(&report);
    }
    Ok(if report.all_completed() {
        exit_codes::OK
    } else {
        exit_codes::TASKS_FAILED
    })
}

/// Reject unknown agents, off-grid targets and duplicate agents before anything runs.
fn task_specs(config: &FleetConfig, tasks: &[(String, Pos)]) -> Result<Vec<TaskSpec>> {
    let size = config.world.grid_size;
    let mut seen = BTreeSet::new();
    let mut specs = Vec::with_capacity(tasks.len());
    for (agent, target) in tasks {
        if !config.world.agents.contains_key(agent) {
            let known: Vec<&String> = config.world.agents.keys().collect();
            bail!("unknown agent {agent}; configured: {known:?}");
        }
        if !((0..=size).contains(&target.x) && (0..=size).contains(&target.y)) {
            bail!("target {target} for {agent} is outside the 0..={size} grid");
        }
        if !seen.insert(agent.as_str()) {
            bail!("agent {agent} has more than one task");
        }
        specs.push(TaskSpec::new(agent.clone(), *target));
    }
    Ok(specs)
}

fn print_report(report: &FleetReport) {
    for task in &report.reports {
        println!("{}", task_line(task));
    }
    for realloc in &report.reallocations {
        println!(
            "reallocated: task={} target={} from={} to={}",
            realloc.task_id, realloc.target, realloc.from, realloc.to
        );
    }
    for note in &report.unreallocated {
        eprintln!("warning: not reallocated: {note}");
    }
    for (agent, stats) in report.agent_stats() {
        println!(
            "stats: agent={} tasks={} completed={} stuck={} recoveries={}/{}",
            agent,
            stats.tasks,
            stats.completed,
            stats.stuck_events,
            stats.recovery_successes,
            stats.recovery_attempts
        );
    }
}

fn task_line(task: &TaskReport) -> String {
    let strategies: Vec<&str> = task
        .recoveries
        .iter()
        .map(|step| step.strategy.as_str())
        .collect();
    format!(
        "task: id={} agent={} target={} outcome={} ticks={} clearance_attempts={} recoveries=[{}]",
        task.spec.task_id,
        task.agent(),
        task.spec.target,
        task.outcome.label(),
        task.ticks,
        task.clearance_attempts,
        strategies.join(",")
    )
}

fn open_store(paths: &FleetPaths) -> Result<RecoveryStore> {
    let config = load_config(&paths.config_path)?;
    let store = RecoveryStore::open(paths.resolve(&config.store.path));
    if !store.is_durable() {
        eprintln!("warning: recovery history unreadable; showing an empty store");
    }
    Ok(store)
}

fn cmd_history_show(paths: &FleetPaths, key: Option<(String, Pos)>) -> Result<i32> {
    let store = open_store(paths)?;
    match key {
        Some((agent, at)) => {
            let history = store.query(&agent, at);
            let names = |list: &[Strategy]| {
                list.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
            };
            println!("history: agent={agent} at={at}");
            println!("successes: [{}]", names(&history.successes));
            println!("failures: [{}]", names(&history.failures));
        }
        None => {
            println!("history: experiences={}", store.len());
            for (strategy, stats) in store.summary() {
                println!(
                    "strategy: {} successes={} failures={}",
                    strategy, stats.successes, stats.failures
                );
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_history_clear(paths: &FleetPaths) -> Result<i32> {
    let store = open_store(paths)?;
    let removed = store.len();
    if store.clear() == Durability::MemoryOnly {
        let location = store
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        bail!("could not persist cleared history to {location}");
    }
    println!("cleared {removed} experiences");
    Ok(exit_codes::OK)
}

fn cmd_recommend(
    paths: &FleetPaths,
    agent: &str,
    at: Pos,
    target: Pos,
    seed: Option<u64>,
) -> Result<i32> {
    let store = open_store(paths)?;
    let history = store.query(agent, at);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let advice = recommend(&history, at, target, &mut rng);
    println!(
        "{}",
        serde_json::to_string_pretty(&advice).context("serialize recommendation")?
    );
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["fleet", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_collects_tasks() {
        let cli = Cli::parse_from([
            "fleet", "-v", "run", "--task", "robot_1=7,9", "--task", "robot_2=6,9",
        ]);
        assert_eq!(cli.verbose, 1);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.tasks,
            vec![
                ("robot_1".to_string(), Pos::new(7, 9)),
                ("robot_2".to_string(), Pos::new(6, 9)),
            ]
        );
    }

    #[test]
    fn run_requires_a_task() {
        assert!(Cli::try_parse_from(["fleet", "run"]).is_err());
        assert!(Cli::try_parse_from(["fleet", "run", "--task", "robot_1"]).is_err());
        assert!(Cli::try_parse_from(["fleet", "run", "--task", "=1,2"]).is_err());
    }

    #[test]
    fn history_show_needs_both_key_parts() {
        assert!(Cli::try_parse_from(["fleet", "history", "show", "--agent", "robot_1"]).is_err());
        let cli = Cli::parse_from(["fleet", "history", "show", "--agent", "robot_1", "--at", "6,6"]);
        assert!(matches!(
            cli.command,
            Command::History {
                command: HistoryCommand::Show { at: Some(_), .. }
            }
        ));
    }

    #[test]
    fn task_specs_reject_unknown_and_duplicate_agents() {
        let config = FleetConfig::default();
        let ok = task_specs(&config, &[("robot_1".to_string(), Pos::new(7, 9))]).expect("specs");
        assert_eq!(ok[0].task_id, "task_robot_1_7_9");

        assert!(task_specs(&config, &[("ghost".to_string(), Pos::new(1, 1))]).is_err());
        assert!(task_specs(&config, &[("robot_1".to_string(), Pos::new(11, 1))]).is_err());
        let twice = [
            ("robot_1".to_string(), Pos::new(1, 1)),
            ("robot_1".to_string(), Pos::new(2, 2)),
        ];
        assert!(task_specs(&config, &twice).is_err());
    }
}
