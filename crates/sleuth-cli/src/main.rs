//! sleuth - developer research assistant CLI

mod commands;
mod config;
mod console;

use clap::Parser;
use sleuth_agent::{
    BufferRegistry, DuckDuckGoSearch, ExecutionDriver, FileCheckpointStore, FileReportSink,
    JsonlMemory, ProviderInference, ReplyMeta, RunOutcome, RunRequest, Search, Services,
    TavilySearch, ThreadStore, Workflow,
};
use sleuth_ai::{Model, providers::openai::OpenAIProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// sleuth - developer research assistant
#[derive(Parser, Debug)]
#[command(name = "sleuth")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: llama3.2)
    #[arg(short, long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint (default: http://localhost:11434/v1)
    #[arg(long)]
    base_url: Option<String>,

    /// Session id; history and checkpoints carry over between runs with the same id
    #[arg(short, long, default_value = "cli_session")]
    session: String,

    /// Run in non-interactive mode with a single query
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// How often streamed tokens are drained, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Token drain mode (poll, wait)
    #[arg(long)]
    drain: Option<String>,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sleuth=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_workflow(cfg: &config::Config, model: Model) -> Workflow {
    let provider = Arc::new(OpenAIProvider::new(cfg.get_api_key("openai")));
    let inference = Arc::new(ProviderInference::new(provider, model));

    let search: Arc<dyn Search> = match cfg.get_api_key("tavily") {
        Some(key) => Arc::new(TavilySearch::new(key)),
        None => {
            tracing::info!("No Tavily API key configured, falling back to DuckDuckGo");
            Arc::new(DuckDuckGoSearch::new())
        }
    };

    let data_dir = cfg.data_dir();
    let services = Services {
        inference,
        search,
        memory: Arc::new(JsonlMemory::new(data_dir.join("memory.jsonl"))),
        reports: Arc::new(FileReportSink::new(cfg.output_dir())),
        buffers: BufferRegistry::new(),
    };
    let checkpoints = Arc::new(FileCheckpointStore::new(data_dir.join("checkpoints")));

    Workflow::new(services, checkpoints, cfg.workflow_config())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::DEFAULT_MODEL.to_string());
    let base_url = args
        .base_url
        .or(cfg.base_url.clone())
        .unwrap_or_else(|| config::DEFAULT_BASE_URL.to_string());

    let mut driver_config = cfg.driver_config();
    if let Some(ms) = args.poll_interval_ms {
        driver_config.poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(ref mode) = args.drain {
        driver_config.drain_mode = config::parse_drain_mode(mode);
    }

    let workflow = build_workflow(&cfg, Model::new(model_id.clone(), base_url));
    let driver = ExecutionDriver::new(Arc::new(workflow)).with_config(driver_config);
    let mut threads = ThreadStore::with_initial(args.session.clone());

    // Non-interactive mode
    if let Some(command) = args.command {
        if run_query(&driver, &mut threads, &command, args.verbose)
            .await
            .is_err()
        {
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&driver, &mut threads, &model_id, args.verbose).await
}

/// Run one query on the current thread, rendering it to the console
async fn run_query(
    driver: &ExecutionDriver,
    threads: &mut ThreadStore,
    query: &str,
    verbose: bool,
) -> sleuth_agent::Result<RunOutcome> {
    threads.append_user(query);
    let request = RunRequest::new(threads.current().id.clone(), query);

    let mut console = console::Console::new();
    let outcome = match driver.run(request, |event| console.on_event(event)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("\nError: {}", e);
            if let sleuth_agent::Error::Worker(ref failure) = e {
                if verbose && !failure.detail.is_empty() {
                    eprintln!("{}", failure.detail);
                }
            }
            return Err(e);
        }
    };
    console.finish(&outcome);

    threads.append_assistant(
        &outcome.report,
        ReplyMeta {
            nodes: outcome.nodes.clone(),
            mode: outcome.state.mode,
            confidence: Some(outcome.state.confidence_score),
            tokens: outcome.state.token_usage,
        },
    );
    Ok(outcome)
}

async fn run_interactive(
    driver: &ExecutionDriver,
    threads: &mut ThreadStore,
    model_id: &str,
    verbose: bool,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("sleuth ({}) session: {}", model_id, threads.current().id);
        eprintln!("Ask a development question, /help for commands, exit to quit.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        if let Some(result) =
            commands::execute_command(input, threads, driver.workflow().table())
        {
            match result {
                commands::CommandResult::NewThread => {
                    let id = threads.create_thread();
                    println!("Started thread {} ({}).", threads.len(), id);
                }
                commands::CommandResult::SwitchThread(index) => {
                    if threads.switch(index) {
                        println!("Switched to: {}", threads.current().title);
                    }
                }
                commands::CommandResult::DeleteThread(index) => {
                    if let Some(thread) = threads.delete(index) {
                        if let Err(e) = driver.workflow().checkpoints().delete(&thread.id).await {
                            tracing::warn!(thread = %thread.id, "Failed to delete checkpoint: {}", e);
                        }
                        println!("Deleted thread: {}", thread.title);
                    }
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        // Errors are already reported; the session carries on with the next query
        let _ = run_query(driver, threads, input, verbose).await;
        println!();
    }

    Ok(())
}
