use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_protocol::{DEFAULT_SESSION_TITLE, SessionStore};
use chat_reducer::{DrainOutcome, TurnReducer, TurnState, drain};
use chat_runtime::{ChatRequest, DemoEngine, RuntimeBuilder};
use clap::{Parser, Subcommand};
use futures_util::{StreamExt, stream};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "chatctl")]
#[command(about = "Replay captured chat streams and run demo turns")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fold a captured event stream into its final turn state.
    Replay {
        /// Captured stream, or `-` for stdin.
        input: PathBuf,
        /// Bytes handed to the line splitter at a time.
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
    },
    /// Run one turn against the built-in demo engine.
    Demo {
        #[arg(long, env = "CHAT_ROOT", default_value = ".chat")]
        root: PathBuf,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        title: Option<String>,
        /// Pause between answer fragments.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let state = match cli.command {
        Command::Replay { input, chunk_size } => {
            let bytes = read_input(&input).await?;
            let (outcome, state) = replay(&bytes, chunk_size).await;
            report(outcome, &state);
            state
        }
        Command::Demo {
            root,
            prompt,
            title,
            delay_ms,
        } => {
            let (outcome, state) = run_demo(&root, prompt, title, delay_ms).await?;
            report(outcome, &state);
            state
        }
    };

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn read_input(input: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if input.as_os_str() == "-" {
        tokio::io::stdin()
            .read_to_end(&mut bytes)
            .await
            .context("failed to read stdin")?;
    } else {
        bytes = tokio::fs::read(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
    }
    Ok(bytes)
}

async fn replay(bytes: &[u8], chunk_size: usize) -> (DrainOutcome, TurnState) {
    let chunks = bytes.chunks(chunk_size.max(1)).map(Ok::<_, Infallible>);
    let mut reducer = TurnReducer::new();
    let outcome = match drain(stream::iter(chunks), &mut reducer).await {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    };
    (outcome, reducer.into_state())
}

async fn run_demo(
    root: &Path,
    prompt: String,
    title: Option<String>,
    delay_ms: u64,
) -> Result<(DrainOutcome, TurnState)> {
    let mut engine = DemoEngine::new();
    if delay_ms > 0 {
        engine = engine.with_fragment_delay(Duration::from_millis(delay_ms));
    }
    let runtime = RuntimeBuilder::new(root).engine(Arc::new(engine)).build();

    let title = title.unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_owned());
    let session = runtime
        .store()
        .create_session(title)
        .await
        .context("failed to create session")?;
    info!(session_id = %session.session_id, root = %root.display(), "session created");

    let handle = runtime.start_turn(ChatRequest {
        session_id: session.session_id,
        content: prompt,
        file_ids: Vec::new(),
    });
    info!(request_id = %handle.request_id(), "turn started");

    let lines = handle
        .into_stream()
        .map(|line| Ok::<_, Infallible>(line.into_bytes()));
    let mut reducer = TurnReducer::new();
    let outcome = match drain(lines, &mut reducer).await {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    };
    Ok((outcome, reducer.into_state()))
}

fn report(outcome: DrainOutcome, state: &TurnState) {
    match outcome {
        DrainOutcome::Sealed => info!(
            events = state.event_count,
            has_error = state.has_error,
            tool_calls = state.tool_calls.len(),
            data_blocks = state.data_blocks.len(),
            "turn sealed"
        ),
        DrainOutcome::Abandoned => warn!(
            events = state.event_count,
            "stream ended before a terminal event"
        ),
    }
}
