use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use delver_core::agent::{AgentError, AgentReply};
use delver_core::config::{Config, LoggingConfig, resolve_config_path};
use delver_core::{Session, bootstrap};
use delver_index::pipeline::IngestReport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Ask questions about a codebase.
#[derive(Debug, Parser)]
#[command(name = "delver", version, about)]
struct Cli {
    /// Workspace root to index and query.
    #[arg(default_value = ".")]
    workspace: PathBuf,

    /// Config file. Defaults to $DELVER_CONFIG, then config/default.toml.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Start without running an ingestion pass.
    #[arg(long)]
    no_ingest: bool,

    /// Resume from an exported transcript.
    #[arg(long, value_name = "FILE")]
    transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&resolve_config_path(cli.config.as_deref()))?;
    init_subscriber(&config.logging)?;

    let mut session = bootstrap(config, &cli.workspace)
        .await
        .context("startup failed")?;
    println!(
        "delver v{} ({} mode) on {}",
        env!("CARGO_PKG_VERSION"),
        session.config().mode,
        session.root().display()
    );

    if let Some(path) = &cli.transcript {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read transcript {}", path.display()))?;
        session.agent.import_transcript(&json)?;
        println!("Resumed {} turns from {}", session.agent.memory().len(), path.display());
    }

    if cli.no_ingest {
        tracing::info!("ingestion disabled by flag");
    } else {
        run_ingest(&session).await;
    }

    repl(&mut session).await
}

fn init_subscriber(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = &config.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

async fn run_ingest(session: &Session) {
    println!("Indexing workspace...");
    match session.ingest().await {
        Ok(report) => println!("{}", describe_report(&report)),
        Err(e) => {
            tracing::error!(error = %e, "ingestion failed");
            eprintln!("Indexing failed, the previous index is kept: {e}");
        }
    }
}

fn describe_report(report: &IngestReport) -> String {
    if report.skipped_pass {
        return "Index already present, skipping ingestion.".to_owned();
    }
    let mut out = format!(
        "Indexed {} files ({} unchanged, {} skipped), {} chunks written, {} removed in {}ms.",
        report.files_indexed,
        report.files_unchanged,
        report.files_skipped,
        report.chunks_written,
        report.records_removed,
        report.duration_ms
    );
    if !report.errors.is_empty() {
        out.push_str(&format!(" {} files could not be read.", report.errors.len()));
    }
    out
}

enum Command<'a> {
    Exit,
    Export(&'a str),
    Ask(&'a str),
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line.split_once(char::is_whitespace) {
        _ if line == "/exit" || line == "/quit" => Command::Exit,
        _ if line == "/export" => Command::Export(""),
        Some(("/export", file)) => Command::Export(file.trim()),
        _ => Command::Ask(line),
    }
}

async fn repl(session: &mut Session) -> anyhow::Result<()> {
    println!("Ask about the code. /export <file> saves the transcript, /exit quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print_prompt();
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Exit => break,
            Command::Export(file) => export(session, Path::new(file)).await,
            Command::Ask(question) => match ask(session, question).await {
                Ok(reply) => print_reply(&reply),
                Err(AgentError::SessionClosed) => break,
                Err(e) => eprintln!("error: {e}"),
            },
        }
    }

    session.agent.shutdown();
    Ok(())
}

/// Run one turn; Ctrl-C cancels it instead of ending the process.
async fn ask(session: &mut Session, question: &str) -> Result<AgentReply, AgentError> {
    let cancel = CancellationToken::new();
    let turn = session.agent.handle(question, &cancel);
    tokio::pin!(turn);
    loop {
        tokio::select! {
            result = &mut turn => return result,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                tracing::info!("interrupt received, cancelling turn");
                cancel.cancel();
            }
        }
    }
}

async fn export(session: &Session, path: &Path) {
    if path.as_os_str().is_empty() {
        eprintln!("usage: /export <file>");
        return;
    }
    let result = match session.agent.export_transcript() {
        Ok(json) => tokio::fs::write(path, json).await.map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => println!("Transcript written to {}", path.display()),
        Err(e) => eprintln!("export failed: {e:#}"),
    }
}

fn print_prompt() {
    use std::io::Write;
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_reply(reply: &AgentReply) {
    if reply.cancelled {
        println!("(cancelled)");
        return;
    }
    println!("{}", reply.text);
    if reply.degraded {
        println!("(semantic search was unavailable; answer is based on exact matches)");
    }
    if reply.incomplete {
        println!("(incomplete answer)");
    }
}
