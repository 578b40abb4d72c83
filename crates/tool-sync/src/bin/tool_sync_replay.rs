// Replay recorded ToolRendererV1 traffic into a requester and print the result

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::Parser;
use tool_sync::{MemoryChannel, MessageChannel, NodeTree, SocketConfig, ToolSocket, TypeRegistry};
use tool_sync_wire::codec;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tool-sync-replay")]
#[command(
    about = "Apply newline-delimited wire messages from stdin and print the final root state",
    long_about = None
)]
struct Cli {
    /// Tool id the replayed socket answers to
    tool_id: String,

    /// Socket config (TOML); its tool_id must match
    #[arg(long)]
    config: Option<PathBuf>,

    /// Composite types to register as dynamic-schema, besides Object.World
    #[arg(long, num_args = 1..)]
    types: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = SocketConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            if config.tool_id != cli.tool_id {
                bail!("{} is for tool `{}`, not `{}`", path.display(), config.tool_id, cli.tool_id);
            }
            config
        }
        None => SocketConfig::new(&cli.tool_id),
    };

    let mut registry = TypeRegistry::new();
    registry.register_dynamic("Object.World")?;
    for type_name in &cli.types {
        registry.register_dynamic(type_name)?;
    }

    let (tool_end, mut feed) = MemoryChannel::pair();
    let mut socket = ToolSocket::requester(config, NodeTree::new(Rc::new(registry)), tool_end);
    socket.start()?;

    for (index, line) in io::stdin().lock().lines().enumerate() {
        let line_no = index + 1;
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let message = codec::decode_str(&line).with_context(|| format!("line {line_no}"))?;
        feed.post(message)?;
        socket.pump().with_context(|| format!("line {line_no}"))?;
    }

    let Some(root) = socket.root() else {
        bail!("no snapshot for tool `{}` in the input", socket.tool_id());
    };
    let state = socket.tree().state(root)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
