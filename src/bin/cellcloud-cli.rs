//! Cell Cloud CLI - command-line tools for the nucleus
//!
//! Writes nucleus configs, encodes and decodes primitives, and runs a file
//! transfer between two in-process nuclei.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use cellcloud::nucleus::{Cellet, MemoryTransport, storage};
use cellcloud::talk::dialect::ActionDialect;
use cellcloud::talk::{AnyDialect, Primitive, PrimitiveSerializer};
use cellcloud::transfer::{FileReceiver, FileSender, TransferCellet};
use cellcloud::{Nucleus, NucleusConfig};

const TRANSFER_CELLET: &str = "transfer";

#[derive(Parser)]
#[command(name = "cellcloud")]
#[command(about = "Cell Cloud nucleus tools", long_about = None)]
struct Cli {
    /// Nucleus config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a nucleus config file
    Init {
        /// Fragment size for file transfers
        #[arg(long, default_value = "6144")]
        chunk_size: usize,

        /// Maximum concurrent action workers
        #[arg(long, default_value = "32")]
        max_workers: usize,

        /// Chunk cache size that triggers eviction
        #[arg(long, default_value = "104857600")]
        clear_threshold: u64,
    },

    /// Print an action dialect primitive
    Encode {
        /// Action name
        #[arg(long)]
        action: String,

        /// Parameters as name=value
        #[arg(long = "param")]
        params: Vec<String>,

        /// Dialect tracker
        #[arg(long, default_value = "none")]
        tracker: String,

        /// Print the JSON document instead of wire bytes
        #[arg(long)]
        json: bool,
    },

    /// Read a primitive from stdin and print it in the other form
    Decode {
        /// Input is a JSON document; print wire bytes
        #[arg(long)]
        json: bool,
    },

    /// Send a file through two in-process nuclei
    Transfer {
        /// File to send
        input: PathBuf,

        /// Directory the received file is written to
        #[arg(long)]
        out: PathBuf,

        /// Fragment size (defaults to the config value)
        #[arg(long)]
        chunk_size: Option<usize>,
    },
}

/// Sending side of the transfer command
struct Outbox;

impl Cellet for Outbox {
    fn identifier(&self) -> &str {
        TRANSFER_CELLET
    }

    fn dialogue(&self, peer_tag: &str, _primitive: Primitive) {
        tracing::debug!(peer = %peer_tag, "outbox ignores inbound primitive");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<NucleusConfig> {
    match path {
        Some(path) => storage::load_config(path),
        None => Ok(NucleusConfig::default()),
    }
}

fn build_action(action: String, params: &[String], tracker: String) -> Result<ActionDialect> {
    let mut dialect = ActionDialect::new(tracker).with_action(action);
    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            bail!("parameter '{param}' is not name=value");
        };
        if let Ok(flag) = value.parse::<bool>() {
            dialect.append_param(name, flag);
        } else if let Ok(number) = value.parse::<i64>() {
            dialect.append_param(name, number);
        } else {
            dialect.append_param(name, value);
        }
    }
    Ok(dialect)
}

fn main() -> Result<()> {
    // Logs go to stderr so encoded output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            chunk_size,
            max_workers,
            clear_threshold,
        } => {
            let path = cli.config.unwrap_or_else(|| PathBuf::from("nucleus.json"));
            let mut config = NucleusConfig::default();
            config.chunk.chunk_size = chunk_size;
            config.chunk.clear_threshold = clear_threshold;
            config.action.max_workers = max_workers;

            storage::write_config(&path, &config)?;
            println!("Wrote nucleus config to {:?}", path);
        }

        Commands::Encode {
            action,
            params,
            tracker,
            json,
        } => {
            let dialect = build_action(action, &params, tracker)?;
            let primitive = AnyDialect::from(dialect)
                .translate()
                .context("action dialect has no action")?;

            if json {
                println!("{}", PrimitiveSerializer::to_json_string(&primitive)?);
            } else {
                let mut stdout = std::io::stdout().lock();
                PrimitiveSerializer::write(&mut stdout, &primitive)?;
                writeln!(stdout)?;
            }
        }

        Commands::Decode { json } => {
            let config = load_config(cli.config.as_ref())?;
            let nucleus = Nucleus::new(config, Arc::new(MemoryTransport::new()))?;

            let mut input = Vec::new();
            std::io::stdin().read_to_end(&mut input)?;

            if json {
                let text = String::from_utf8(input).context("JSON input is not UTF-8")?;
                let primitive = nucleus.serializer().from_json_str(&text, None)?;
                let mut stdout = std::io::stdout().lock();
                PrimitiveSerializer::write(&mut stdout, &primitive)?;
                writeln!(stdout)?;
            } else {
                let trimmed = input.trim_ascii_end();
                let primitive = nucleus.serializer().deserialize(trimmed, None)?;
                println!("{}", PrimitiveSerializer::to_json_string(&primitive)?);
            }
            nucleus.shutdown();
        }

        Commands::Transfer {
            input,
            out,
            chunk_size,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(chunk_size) = chunk_size {
                config.chunk.chunk_size = chunk_size;
            }
            let chunk_size = config.chunk.chunk_size;

            let link = Arc::new(MemoryTransport::new());
            let sender = Nucleus::new(config.clone(), link.clone())?;
            let receiver = Nucleus::new(config, Arc::new(MemoryTransport::new()))?;

            sender.register_cellet(Arc::new(Outbox))?;
            let cellet = Arc::new(TransferCellet::new(
                TRANSFER_CELLET,
                FileReceiver::new(&out, chunk_size, receiver.chunk_factory().clone()),
            ));
            receiver.register_cellet(cellet.clone())?;

            let sender_tag = sender.tag().to_string();
            let receiver_tag = receiver.tag().to_string();
            let fragments = FileSender::new(chunk_size).send_file(&sender, TRANSFER_CELLET, &receiver_tag, &input)?;

            for frame in link.drain() {
                receiver.on_primitive_arrived(TRANSFER_CELLET, &sender_tag, &frame.payload)?;
            }

            let Some(report) = cellet.reports().pop() else {
                bail!("transfer of {:?} did not complete", input);
            };
            println!("Sent {} fragments", fragments);
            println!("Wrote {} bytes to {:?}", report.bytes, report.path);
            println!("BLAKE3 {}", report.digest);

            sender.shutdown();
            receiver.shutdown();
        }
    }

    Ok(())
}
