//! CHIF API CLI - encode, decode and manage CHIF containers.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use chif_core::{ChifClient, ChifError, EncodeRequest, EventQuery, Pipeline};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

mod commands;
mod config;
mod exit_codes;
mod logging;
mod utils;

use config::GlobalArgs;
use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0    success
  1    general error or job failed
  2    usage error
  65   invalid manifest
  66   input file missing
  69   service unavailable
  74   cannot write output
  75   job still running after --max-wait / --max-polls
  76   unexpected service response
  78   configuration error
  130  interrupted";

#[derive(Parser)]
#[command(name = "chif-api")]
#[command(author, version, about = "Encode, decode and manage CHIF containers", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode the parts listed in a manifest into a CHIF container
    Encode {
        /// Manifest describing the parts to encode
        #[arg(long)]
        manifest: PathBuf,

        /// Where to save the container (defaults to <UUID>.chif)
        #[arg(long)]
        chif: Option<PathBuf>,

        /// Download the container once encoded
        #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
        download: bool,

        /// Publish the container to the CDN once encoded
        #[arg(long)]
        publish: bool,
    },

    /// Decode a CHIF container back into its parts
    Decode {
        /// Container to decode
        #[arg(long)]
        chif: PathBuf,

        /// Manifest the container was encoded from
        #[arg(long)]
        manifest: PathBuf,

        /// Directory to write the decoded archive into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Print the status of an encode task
    Status {
        #[arg(long)]
        uuid: String,
    },

    /// Download an encoded container
    Download {
        #[arg(long)]
        uuid: String,

        /// Where to save the container
        #[arg(long)]
        chif: PathBuf,
    },

    /// List access events of a file
    #[command(name = "getEvents")]
    GetEvents {
        #[arg(long)]
        uuid: String,

        /// Earliest event (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = utils::parse_time)]
        start: Option<DateTime<Utc>>,

        /// Latest event (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = utils::parse_time)]
        end: Option<DateTime<Utc>>,

        #[arg(long, default_value = "DESC", value_parser = ["ASC", "DESC"])]
        order: String,

        #[arg(long, default_value_t = 100)]
        limit: u32,
    },

    /// Block access to a file
    Block {
        #[arg(long)]
        uuid: String,

        #[arg(long, allow_negative_numbers = true)]
        code: i64,

        #[arg(long)]
        reason: String,
    },

    /// Lift a block
    Unblock {
        #[arg(long)]
        uuid: String,
    },

    /// Print the block placed on a file
    #[command(name = "getBlock")]
    GetBlock {
        #[arg(long)]
        uuid: String,
    },

    /// Delete a file
    Delete {
        #[arg(long)]
        uuid: String,

        /// Also unpublish it from the CDN
        #[arg(long)]
        unpublish: bool,
    },

    /// Publish a file to the CDN
    Publish {
        #[arg(long)]
        uuid: String,
    },

    /// Remove a file from the CDN
    Unpublish {
        #[arg(long)]
        uuid: String,

        /// Also delete it
        #[arg(long)]
        delete: bool,
    },

    /// List the organization's files
    #[command(name = "getFiles")]
    GetFiles,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init(cli.global.verbose, &cli.global.log) {
        eprintln!("{err:#}");
        process::exit(exit_codes::IO_ERROR);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChifError::Cancelled.into()),
        result = run(cli, cancel.clone()) => result,
    };

    let exit = match result {
        Ok(()) => ExitCode::success(),
        Err(err) => {
            let exit = ExitCode::from_anyhow(&err);
            report(&err, &exit);
            exit
        }
    };
    process::exit(exit.code);
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let global = cli.global;
    let client = ChifClient::new(global.client_config()?)?;
    let pipeline = Pipeline::new(client)
        .with_poll_options(global.poll_options())
        .with_ip_echo_url(global.ip_echo_url()?)
        .with_cancellation(cancel);

    match cli.command {
        Commands::Encode {
            manifest,
            chif,
            download,
            publish,
        } => {
            let request = EncodeRequest {
                manifest,
                chif,
                download,
                publish,
            };
            commands::encode::execute(&pipeline, request).await
        }
        Commands::Decode {
            chif,
            manifest,
            out_dir,
        } => commands::decode::execute(&pipeline, chif, manifest, out_dir).await,
        Commands::Status { uuid } => commands::status::execute(&pipeline, uuid).await,
        Commands::Download { uuid, chif } => {
            commands::download::execute(&pipeline, uuid, chif).await
        }
        Commands::GetEvents {
            uuid,
            start,
            end,
            order,
            limit,
        } => {
            let query = EventQuery {
                start,
                end,
                order,
                limit,
            };
            commands::files::events(&pipeline, uuid, query).await
        }
        Commands::Block { uuid, code, reason } => {
            commands::files::block(&pipeline, uuid, code, reason).await
        }
        Commands::Unblock { uuid } => commands::files::unblock(&pipeline, uuid).await,
        Commands::GetBlock { uuid } => commands::files::get_block(&pipeline, uuid).await,
        Commands::Delete { uuid, unpublish } => {
            commands::files::delete(&pipeline, uuid, unpublish).await
        }
        Commands::Publish { uuid } => commands::files::publish(&pipeline, uuid).await,
        Commands::Unpublish { uuid, delete } => {
            commands::files::unpublish(&pipeline, uuid, delete).await
        }
        Commands::GetFiles => commands::files::get_files(&pipeline).await,
    }
}

/// Log a failure with its cause chain and, for HTTP failures, the body the
/// service sent back.
fn report(err: &anyhow::Error, exit: &ExitCode) {
    if let Some(message) = &exit.message {
        error!(code = exit.code, "{message}");
    }
    let body = err
        .chain()
        .find_map(|e| e.downcast_ref::<ChifError>())
        .and_then(ChifError::response_body)
        .filter(|body| !body.trim().is_empty());
    if let Some(body) = body {
        error!("Response body:\n{}", utils::pretty_body(body));
    }
}
