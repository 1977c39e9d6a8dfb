//! The strata command line: every subcommand dispatches through the same
//! engine the HTTP API uses, either in-process or against a running node
//! with `--remote`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use strata_core::methods::access::CreateAuthTokenParams;
use strata_core::methods::automation::ApplyParams;
use strata_core::methods::collection::ListParams;
use strata_core::methods::config::{GetConfigParams, SetConfigParams};
use strata_core::methods::dataset::{
    DiffParams, GetParams, PullParams, PushParams, RemoveParams, RenameParams, SaveParams,
    ValidateParams,
};
use strata_core::methods::peer::{
    ConnectParams, DisconnectParams, PeerInfoParams, PeerListParams,
};
use strata_core::{Config, Error, ErrorKind, Instance, Source};

#[derive(Parser)]
#[command(name = "strata", version, about = "Decentralized dataset versioning")]
struct Cli {
    /// Config file (default: $HOME/.strata/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Route every call to a running node at this address
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Resolution source: local, network, or p2p
    #[arg(long, global = true)]
    source: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config file with a fresh node identity
    Init {
        /// Peername for the new identity
        #[arg(long, default_value = "me")]
        peername: String,
    },
    /// List datasets
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        /// key:value constraints (username, name)
        #[arg(long)]
        filter: Vec<String>,
        #[arg(long, default_value = "")]
        order_by: String,
    },
    /// Save a new dataset version
    Save {
        reference: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        message: String,
        /// Body file to commit
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long)]
        force: bool,
        /// Fail if the dataset already exists
        #[arg(long)]
        new: bool,
    },
    /// Print a dataset or one of its components
    Get {
        reference: String,
        /// Component: body, meta, commit, structure
        #[arg(long, default_value = "")]
        selector: String,
    },
    /// Compare two datasets or body files
    Diff { left: String, right: String },
    /// Render a dataset to HTML
    Render {
        reference: String,
        #[arg(long, default_value = "")]
        template: String,
    },
    /// Change a dataset's name
    Rename { current: String, next: String },
    /// Delete a dataset
    Remove {
        reference: String,
        #[arg(long)]
        force: bool,
    },
    /// Fetch a dataset from the network
    Pull { reference: String },
    /// Publish a dataset to a remote
    Push {
        reference: String,
        #[arg(long, default_value = "")]
        remote: String,
    },
    /// Check a dataset body for structural problems
    Validate {
        #[arg(default_value = "")]
        reference: String,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Run a transform script
    Apply {
        #[arg(long, default_value = "")]
        reference: String,
        /// Transform script file
        #[arg(long, default_value = "")]
        file: String,
    },
    /// Peer operations
    #[command(subcommand)]
    Peers(PeerCommands),
    /// Node configuration
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Issue an auth token for a profile
    Token {
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long, default_value_t = 0)]
        ttl_seconds: u64,
    },
    /// Run the HTTP API and event channel
    Serve {
        #[arg(long)]
        address: Option<String>,
    },
}

#[derive(Subcommand)]
enum PeerCommands {
    /// List known peers
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Show one peer
    Info { peer: String },
    /// Connect to a peer address
    Connect { address: String },
    /// Disconnect from a peer
    Disconnect { address: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print configuration (private values redacted unless --with-private-values)
    Get {
        #[arg(default_value = "")]
        field: String,
        #[arg(long)]
        with_private_values: bool,
    },
    /// Replace configuration from a YAML file
    Set { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(err.kind()))
        }
    }
}

/// Errors bubble up from dispatch unchanged; the exit code reflects the
/// error kind.
fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::BadRequest => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Unauthorized => 4,
        ErrorKind::UnsupportedTransport => 5,
        ErrorKind::Conflict => 6,
        ErrorKind::Dependency => 7,
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".strata")
        .join("config.yaml")
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Init { peername } = &cli.command {
        return init(&config_path, peername);
    }

    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "no config file; using an ephemeral identity (run `strata init` to keep one)"
        );
        let id = format!("Qm{}", uuid::Uuid::new_v4().simple());
        Config::default_with_profile(id, "me", uuid::Uuid::new_v4().simple().to_string())
    };

    let mut builder = Instance::builder(config).config_path(&config_path);
    if let Some(remote) = &cli.remote {
        builder = builder.connect_to(remote);
    }
    let inst = builder.build()?;

    let mut dispatcher = inst.dispatcher();
    if let Some(source) = &cli.source {
        dispatcher = dispatcher.with_source(Source::parse(source)?);
    }
    let ctx = inst.context();

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::List {
            offset,
            limit,
            filter,
            order_by,
        } => {
            let outcome = dispatcher
                .dispatch::<_, Value>(
                    &ctx,
                    "collection.list",
                    ListParams {
                        offset,
                        limit,
                        filter,
                        order_by,
                        ..ListParams::default()
                    },
                )
                .await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
            print_json(&outcome.value)
        }
        Commands::Save {
            reference,
            title,
            message,
            body,
            force,
            new,
        } => {
            let info: Value = dispatcher
                .call(
                    &ctx,
                    "dataset.save",
                    SaveParams {
                        reference,
                        title,
                        message,
                        body_path: body,
                        force,
                        new,
                        ..SaveParams::default()
                    },
                )
                .await?;
            print_json(&info)
        }
        Commands::Get {
            reference,
            selector,
        } => {
            let value: Value = dispatcher
                .call(
                    &ctx,
                    "dataset.get",
                    GetParams {
                        reference,
                        selector,
                        ..GetParams::default()
                    },
                )
                .await?;
            print_json(&value)
        }
        Commands::Diff { left, right } => {
            let value: Value = dispatcher
                .call(
                    &ctx,
                    "dataset.diff",
                    DiffParams {
                        left_side: left,
                        right_side: right,
                        ..DiffParams::default()
                    },
                )
                .await?;
            print_json(&value)
        }
        Commands::Render {
            reference,
            template,
        } => {
            let html: String = dispatcher
                .call(
                    &ctx,
                    "dataset.render",
                    strata_core::methods::dataset::RenderParams {
                        reference,
                        template,
                    },
                )
                .await?;
            println!("{html}");
            Ok(())
        }
        Commands::Rename { current, next } => {
            let info: Value = dispatcher
                .call(&ctx, "dataset.rename", RenameParams { current, next })
                .await?;
            print_json(&info)
        }
        Commands::Remove { reference, force } => {
            let result: Value = dispatcher
                .call(
                    &ctx,
                    "dataset.remove",
                    RemoveParams {
                        reference,
                        force,
                        ..RemoveParams::default()
                    },
                )
                .await?;
            print_json(&result)
        }
        Commands::Pull { reference } => {
            let info: Value = dispatcher
                .call(
                    &ctx,
                    "dataset.pull",
                    PullParams {
                        reference,
                        ..PullParams::default()
                    },
                )
                .await?;
            print_json(&info)
        }
        Commands::Push { reference, remote } => {
            let info: Value = dispatcher
                .call(&ctx, "dataset.push", PushParams { reference, remote })
                .await?;
            print_json(&info)
        }
        Commands::Validate { reference, body } => {
            let result: Value = dispatcher
                .call(
                    &ctx,
                    "dataset.validate",
                    ValidateParams {
                        reference,
                        body_path: body,
                    },
                )
                .await?;
            print_json(&result)
        }
        Commands::Apply { reference, file } => {
            let ds: Value = dispatcher
                .call(
                    &ctx,
                    "automation.apply",
                    ApplyParams {
                        reference,
                        transform_path: file,
                        ..ApplyParams::default()
                    },
                )
                .await?;
            print_json(&ds)
        }
        Commands::Peers(cmd) => match cmd {
            PeerCommands::List { offset, limit } => {
                let peers: Value = dispatcher
                    .call(&ctx, "peer.list", PeerListParams { offset, limit })
                    .await?;
                print_json(&peers)
            }
            PeerCommands::Info { peer } => {
                let info: Value = dispatcher
                    .call(&ctx, "peer.info", PeerInfoParams { peer })
                    .await?;
                print_json(&info)
            }
            PeerCommands::Connect { address } => {
                let peer: Value = dispatcher
                    .call(&ctx, "peer.connect", ConnectParams { address })
                    .await?;
                print_json(&peer)
            }
            PeerCommands::Disconnect { address } => {
                dispatcher
                    .call::<_, ()>(&ctx, "peer.disconnect", DisconnectParams { address })
                    .await?;
                Ok(())
            }
        },
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Get {
                field,
                with_private_values,
            } => {
                let value: Value = dispatcher
                    .call(
                        &ctx,
                        "config.get",
                        GetConfigParams {
                            field,
                            with_private_values,
                        },
                    )
                    .await?;
                print_json(&value)
            }
            ConfigCommands::Set { file } => {
                let next = Config::load(&file)?;
                dispatcher
                    .call::<_, ()>(&ctx, "config.set", SetConfigParams { config: Some(next) })
                    .await?;
                Ok(())
            }
        },
        Commands::Token {
            username,
            ttl_seconds,
        } => {
            let grantee = if username.is_empty() {
                inst.config().profile.peername.clone()
            } else {
                username
            };
            let token: String = dispatcher
                .call(
                    &ctx,
                    "access.createauthtoken",
                    CreateAuthTokenParams {
                        grantee_username: grantee,
                        ttl_seconds,
                        ..CreateAuthTokenParams::default()
                    },
                )
                .await?;
            println!("{token}");
            Ok(())
        }
        Commands::Serve { address } => {
            let address = address.unwrap_or_else(|| inst.config().api.address.clone());
            strata_api::serve(inst, &address).await
        }
    }
}

fn init(path: &PathBuf, peername: &str) -> Result<(), Error> {
    if path.exists() {
        return Err(Error::conflict(format!(
            "config already exists at {}",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::dependency(format!("creating {}: {e}", parent.display())))?;
    }
    let id = format!("Qm{}", uuid::Uuid::new_v4().simple());
    let secret = uuid::Uuid::new_v4().simple().to_string();
    let config = Config::default_with_profile(id, peername, secret);
    config.validate()?;
    config.save(path)?;
    println!("initialized {}", path.display());
    Ok(())
}

fn print_json(value: &Value) -> Result<(), Error> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("encoding output: {e}")))?;
    println!("{text}");
    Ok(())
}
