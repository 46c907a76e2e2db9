use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use react_agent::clients::{OllamaConfig, TextGenerator, create_llm_client};
use react_agent::core::{AgentConfig, ReactAgent, RunOutcome, Severity, Step};
use react_agent::memory::{ChatHistory, ChatTurn, DEFAULT_CONTEXT_TURNS, DEFAULT_HISTORY_FILE};
use react_agent::tools::default_tools;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "react-agent")]
#[command(version = "0.1.0")]
#[command(about = "ReAct question-answering agent over local tools", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Ollama base URL (falls back to OLLAMA_BASE_URL)")]
    base_url: Option<String>,

    #[arg(short, long, global = true, help = "Model name (falls back to OLLAMA_MODEL)")]
    model: Option<String>,

    #[arg(short, long, global = true, default_value = ".", help = "Directory FileReaderTool reads from")]
    workdir: PathBuf,

    #[arg(short, long, global = true, default_value = "policy.txt", help = "Policy document, relative to workdir")]
    document: PathBuf,

    #[arg(long, global = true, env = "REACT_MAX_ITERATIONS", default_value_t = react_agent::core::DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Answer a single question")]
    Ask {
        #[arg(short, long)]
        question: String,

        #[arg(long, help = "Print the reasoning trace")]
        show_trace: bool,
    },

    #[command(about = "Interactive conversation with persistent history")]
    Chat {
        #[arg(long, default_value = DEFAULT_HISTORY_FILE)]
        history_file: PathBuf,

        #[arg(long, help = "Print the reasoning trace")]
        show_trace: bool,
    },

    #[command(about = "List the registered tools")]
    Tools,
}

fn build_agent(args: &Args, show_trace: bool) -> Result<ReactAgent> {
    let mut llm_config = OllamaConfig::from_env();
    if let Some(base_url) = &args.base_url {
        llm_config.base_url = base_url.clone();
    }
    if let Some(model) = &args.model {
        llm_config.model = model.clone();
    }

    let client: Arc<dyn TextGenerator> = Arc::from(create_llm_client("ollama", llm_config)?);
    let model = client.model_info();
    info!(model = %model.name, max_tokens = ?model.max_tokens, "generation backend ready");
    let document = args.workdir.join(&args.document);
    let tools = default_tools(args.workdir.clone(), document, Arc::clone(&client));

    let config = AgentConfig {
        max_iterations: args.max_iterations,
        ..Default::default()
    };
    let agent = ReactAgent::new(client, Arc::new(tools), config);

    if show_trace {
        Ok(agent.with_step_callback(Arc::new(print_step)))
    } else {
        Ok(agent)
    }
}

fn paint(severity: Severity, text: &str) -> colored::ColoredString {
    match severity {
        Severity::Info => text.green(),
        Severity::Warning => text.yellow(),
        Severity::Error => text.red(),
        Severity::Muted => text.dimmed(),
    }
}

fn print_step(step: &Step) {
    println!(
        "{}",
        format!("--- Iteration {}/{} ---", step.iteration, step.max_iterations).bold()
    );
    if !step.raw.is_empty() {
        println!("{}", step.raw.dimmed());
    }
    if let Some(answer) = &step.final_answer {
        println!("{} {}", "Final Answer:".cyan().bold(), answer);
    } else if let Some(action) = &step.action {
        println!("{} {}", "Action:".cyan(), action);
    }
    if let Some(observation) = &step.observation {
        println!("{} {}", "Observation:".bold(), paint(step.severity, observation));
    }
    for note in &step.notes {
        println!("{}", paint(note.severity, &note.text));
    }
}

fn print_outcome(outcome: &RunOutcome) {
    if let Some(conclusion) = outcome.trace.conclusion() {
        println!("{}", paint(conclusion.severity, &conclusion.text));
    }
    let label = if outcome.is_answered() { "Answer:".green() } else { "Answer:".red() };
    println!("\n{} {}", label.bold(), outcome.answer);
}

fn load_history(path: PathBuf) -> ChatHistory {
    match ChatHistory::load(&path) {
        Ok(history) => history,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not load chat history, starting fresh");
            ChatHistory::fresh(path)
        }
    }
}

async fn chat(mut agent: ReactAgent, history_file: PathBuf) -> Result<()> {
    let mut history = load_history(history_file);

    println!("Chat started. Type '/reset' to clear history, 'exit' or 'quit' to end.");
    if !history.is_empty() {
        println!("Loaded {} previous turn(s).", history.len());
    }
    println!();

    let mut reader = io::BufReader::new(io::stdin());
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush().await?;

        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }
        if input == "/reset" {
            if let Err(e) = history.clear() {
                warn!(error = %e, "could not remove chat history file");
            }
            agent.reset_error_memory();
            println!("History and error memory cleared.");
            continue;
        }

        let context = history.prompt_context(DEFAULT_CONTEXT_TURNS);
        let outcome = agent.run(input, &context).await;
        print_outcome(&outcome);
        println!();

        let question = input.to_string();
        let (answer, trace) = outcome.into_pair();
        history.push(ChatTurn { question, answer, trace });
        if let Err(e) = history.save() {
            warn!(error = %e, "could not save chat history");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match &args.command {
        Commands::Ask { question, show_trace } => {
            let mut agent = build_agent(&args, *show_trace).context("failed to set up agent")?;
            let outcome = agent.run(question, "").await;
            print_outcome(&outcome);
        }

        Commands::Chat {
            history_file,
            show_trace,
        } => {
            let agent = build_agent(&args, *show_trace).context("failed to set up agent")?;
            chat(agent, history_file.clone()).await?;
        }

        Commands::Tools => {
            let agent = build_agent(&args, false).context("failed to set up agent")?;
            for info in agent.tools().infos() {
                println!("{}\n    {}", info.name.bold(), info.description);
            }
        }
    }

    Ok(())
}
