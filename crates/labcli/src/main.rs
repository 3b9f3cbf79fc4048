// crates/labcli/src/main.rs

mod printer;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use labcore::{NodeSpec, ProtocolGraph, Resource, User, Value};
use labruntime::{
    FileRepository, Job, LabRuntime, ProcessLauncher, Queue, RepositoryExt, RunOptions,
    RuntimeConfig, TaskRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lab")]
#[command(about = "Lab workflow engine CLI", long_about = None)]
struct Cli {
    /// Directory holding experiments, jobs and process checkpoints
    #[arg(long, global = true, default_value = ".lab")]
    store: PathBuf,

    /// Runtime configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a protocol file as a new experiment and wait for it
    Run {
        /// Path to protocol JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Root input as name=<json>; may be repeated
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        #[arg(short, long)]
        title: Option<String>,
    },

    /// Check a protocol file, or lock a finished experiment
    Validate {
        /// Path to protocol JSON file
        #[arg(short, long, conflicts_with = "experiment")]
        file: Option<PathBuf>,

        /// Experiment to mark as validated
        #[arg(short, long)]
        experiment: Option<Uuid>,
    },

    /// List available task types
    Tasks,

    /// Create an example robot protocol
    Init {
        /// Output file path
        #[arg(short, long, default_value = "protocol.json")]
        output: PathBuf,
    },

    /// Create an experiment and queue it for the scheduler
    Submit {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long = "input")]
        inputs: Vec<String>,

        #[arg(short, long)]
        title: Option<String>,
    },

    /// Run the queue supervisor
    Scheduler {
        /// Drain the queue, wait for the workers, then exit
        #[arg(long)]
        once: bool,

        #[arg(long)]
        max_running: Option<usize>,

        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Show experiments and queued jobs
    Status {
        /// Show a single experiment in detail
        experiment: Option<Uuid>,
    },

    /// Run one queued experiment; started by the scheduler
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        experiment: Uuid,

        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            inputs,
            title,
        } => {
            run_protocol(&cli.store, config, file, inputs, title).await?;
        }

        Commands::Validate { file, experiment } => match (file, experiment) {
            (Some(file), _) => validate_protocol(file)?,
            (None, Some(id)) => validate_experiment(&cli.store, config, id).await?,
            (None, None) => return Err(anyhow!("Pass either --file or --experiment")),
        },

        Commands::Tasks => {
            list_tasks();
        }

        Commands::Init { output } => {
            create_example_protocol(output)?;
        }

        Commands::Submit {
            file,
            inputs,
            title,
        } => {
            submit_protocol(&cli.store, config, file, inputs, title).await?;
        }

        Commands::Scheduler {
            once,
            max_running,
            tick_ms,
        } => {
            let mut config = config;
            if let Some(max_running) = max_running {
                config.max_running_experiments = max_running;
            }
            if let Some(tick_ms) = tick_ms {
                config.tick_interval_ms = tick_ms;
            }
            run_scheduler(&cli.store, config, once).await?;
        }

        Commands::Status { experiment } => {
            show_status(&cli.store, config, experiment).await?;
        }

        Commands::Worker { experiment, user } => {
            let runtime = build_runtime(&cli.store, config);
            runtime.run_worker(experiment, user).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Cannot load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    Ok(config.apply_env())
}

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    labtasks::register_all(&mut registry);
    registry
}

fn build_runtime(store: &Path, config: RuntimeConfig) -> LabRuntime {
    LabRuntime::new(registry(), Arc::new(FileRepository::new(store)), config)
}

fn load_graph(file: &Path) -> Result<ProtocolGraph> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    Ok(ProtocolGraph::from_json(&json)?)
}

/// `name=<json>`; a value that is not valid JSON is taken as a string
fn parse_input(raw: &str) -> Result<(String, Resource)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Input '{}' must look like name=<json>", raw))?;
    let value = serde_json::from_str(value)
        .map(Value::from_json)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), Resource::from_value(value)))
}

fn experiment_title(title: Option<String>, graph: &ProtocolGraph, file: &Path) -> String {
    title
        .or_else(|| graph.title.clone())
        .unwrap_or_else(|| file.display().to_string())
}

async fn run_protocol(
    store: &Path,
    config: RuntimeConfig,
    file: PathBuf,
    inputs: Vec<String>,
    title: Option<String>,
) -> Result<()> {
    println!("🚀 Loading protocol from: {}", file.display());

    let graph = load_graph(&file)?;
    println!("📋 Protocol: {}", graph.title.as_deref().unwrap_or("(untitled)"));
    println!("   Processes: {}", graph.node_count());
    println!("   Connectors: {}", graph.links.len());
    println!();

    let runtime = build_runtime(store, config);
    let user = User::system();
    let title = experiment_title(title, &graph, &file);
    let mut experiment = runtime.create_experiment(title, &graph, &user).await?;
    for raw in &inputs {
        let (name, resource) = parse_input(raw)?;
        experiment.set_input(&name, resource)?;
    }

    // Subscribe to events for real-time output
    let events = runtime.subscribe_events();
    let event_task = tokio::spawn(printer::print_events(events));

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("🛑 Interrupted, stopping the run");
            on_interrupt.cancel();
        }
    });

    let result = experiment
        .run(
            &user,
            RunOptions::blocking().with_cancellation(cancellation),
            &runtime,
        )
        .await;

    // Wait for events to finish printing
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Experiment Summary:");
    println!("   Experiment ID: {}", experiment.id());
    println!("   State: {}", printer::state_label(experiment.state()));
    printer::print_outputs(experiment.protocol());

    result.map_err(Into::into)
}

fn validate_protocol(file: PathBuf) -> Result<()> {
    println!("🔍 Validating protocol: {}", file.display());

    let graph = load_graph(&file)?;
    let protocol = labruntime::build_protocol(&graph, &registry())?;

    println!("✅ Protocol is valid:");
    println!("   Title: {}", graph.title.as_deref().unwrap_or("(untitled)"));
    println!("   Processes: {}", graph.node_count());
    println!("   Connectors: {}", graph.links.len());
    println!("   Inputs: {}", protocol.inputs().names().join(", "));
    println!("   Outputs: {}", protocol.outputs().names().join(", "));

    Ok(())
}

async fn validate_experiment(store: &Path, config: RuntimeConfig, id: Uuid) -> Result<()> {
    let runtime = build_runtime(store, config);
    let mut experiment = runtime.load_experiment(id).await?;
    experiment.validate(&runtime).await?;
    println!("🔒 Experiment {} validated", id);
    Ok(())
}

fn list_tasks() {
    println!("📦 Available Task Types:");
    println!();

    let registry = registry();
    for task_type in registry.list_task_types() {
        match registry.get_metadata(&task_type) {
            Some(metadata) => {
                println!("  • {} ({})", task_type, metadata.category);
                println!("    {}", metadata.description);
            }
            None => println!("  • {}", task_type),
        }
        if let Ok(spec) = registry.describe(&task_type) {
            let inputs: Vec<&str> = spec.inputs.iter().map(|(name, _)| name.as_str()).collect();
            let outputs: Vec<&str> = spec.outputs.iter().map(|(name, _)| name.as_str()).collect();
            println!("    in: [{}]  out: [{}]", inputs.join(", "), outputs.join(", "));
        }
    }
}

fn create_example_protocol(output: PathBuf) -> Result<()> {
    let mut travel = ProtocolGraph::new().with_title("Travel");
    travel
        .add_node("wait", NodeSpec::task("robot.wait").with_config("waiting_time", 0.2))
        .add_node("fly", NodeSpec::task("robot.fly").with_config("direction", "north"))
        .link("wait", "robot", "fly", "robot")
        .interface("robot", "wait", "robot")
        .outerface("robot", "fly", "robot");

    let mut protocol = ProtocolGraph::new().with_title("Robot travel");
    protocol
        .add_node("create", NodeSpec::task("robot.create").with_position(100.0, 100.0))
        .add_node(
            "move",
            NodeSpec::task("robot.move")
                .with_config("direction", "east")
                .with_position(300.0, 100.0),
        )
        .add_node("sugar", NodeSpec::task("robot.sugar_create").with_position(300.0, 250.0))
        .add_node("eat", NodeSpec::task("robot.eat").with_position(500.0, 100.0))
        .add_node("travel", NodeSpec::protocol(travel).with_position(700.0, 100.0))
        .link("create", "robot", "move", "robot")
        .link("move", "robot", "eat", "robot")
        .link("sugar", "sugar", "eat", "food")
        .link("eat", "robot", "travel", "robot")
        .outerface("robot", "travel", "robot");

    // Fail early if the example drifted from the task library
    labruntime::build_protocol(&protocol, &registry())?;

    std::fs::write(&output, protocol.to_json_pretty()?)?;

    println!("✨ Created example protocol: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  lab run --file {}", output.display());

    Ok(())
}

async fn submit_protocol(
    store: &Path,
    config: RuntimeConfig,
    file: PathBuf,
    inputs: Vec<String>,
    title: Option<String>,
) -> Result<()> {
    let graph = load_graph(&file)?;
    let max_queue_length = config.max_queue_length;
    let runtime = build_runtime(store, config);
    let user = User::system();

    let mut queue = Queue::with_jobs(max_queue_length, runtime.store().list_all::<Job>().await?);
    if queue.is_full() {
        return Err(labcore::SchedulingError::QueueFull { max_length: max_queue_length }.into());
    }

    let title = experiment_title(title, &graph, &file);
    let mut experiment = runtime.create_experiment(title, &graph, &user).await?;
    for raw in &inputs {
        let (name, resource) = parse_input(raw)?;
        experiment.set_input(&name, resource)?;
    }
    runtime.save_experiment(&experiment).await?;

    let job = Job::new(experiment.id(), user.id);
    queue.add(job.clone())?;
    runtime.store().save(&job).await?;

    println!("📥 Queued experiment {} ({} job(s) waiting)", experiment.id(), queue.len());
    println!("   Start the scheduler with: lab --store {} scheduler", store.display());
    Ok(())
}

async fn run_scheduler(store: &Path, config: RuntimeConfig, once: bool) -> Result<()> {
    let program = std::env::current_exe().context("Cannot locate the lab binary")?;
    let launcher = ProcessLauncher::new(program)
        .with_args(["--store".to_string(), store.display().to_string()])
        .with_poll_interval(config.worker_poll_interval());
    let poll_interval = config.worker_poll_interval();
    let runtime = Arc::new(build_runtime(store, config).with_launcher(Arc::new(launcher)));

    let events = runtime.subscribe_events();
    let event_task = tokio::spawn(printer::print_events(events));

    let scheduler = runtime.start_scheduler();
    println!("⏱️  Scheduler running on {}", store.display());

    if once {
        loop {
            let report = scheduler.tick().await?;
            for id in &report.launched {
                println!("  ▶️  Launched experiment {}", id);
            }
            for id in &report.discarded {
                println!("  🗑️  Discarded job {}", id);
            }
            let waiting = scheduler.jobs().await?.len();
            let running = runtime.count_running_experiments().await?;
            if waiting == 0 && running == 0 {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }
    } else {
        tokio::signal::ctrl_c().await?;
        println!("🛑 Stopping scheduler");
    }

    scheduler.shutdown().await;
    event_task.abort();
    Ok(())
}

async fn show_status(store: &Path, config: RuntimeConfig, experiment: Option<Uuid>) -> Result<()> {
    let runtime = build_runtime(store, config);

    if let Some(id) = experiment {
        let record = runtime
            .experiment_record(id)
            .await?
            .ok_or_else(|| anyhow!("No experiment {}", id))?;
        printer::print_record(&record);
        return Ok(());
    }

    let records = runtime.list_experiments().await?;
    println!("🧪 Experiments ({}):", records.len());
    for record in &records {
        printer::print_record_line(record);
    }

    let mut jobs = runtime.store().list_all::<Job>().await?;
    jobs.sort_by_key(|job| job.created_at);
    println!();
    println!("📥 Queue ({}):", jobs.len());
    for job in &jobs {
        println!("  • {} queued at {}", job.experiment_id, job.created_at.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}
