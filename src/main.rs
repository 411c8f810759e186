//! dsv - decentralized dataset versioning command line interface

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dsv::config::DEFAULT_TIMEOUT_SECS;
use dsv::ops::{self, CommitOptions};
use dsv::transport::serve::{serve, Server};
use dsv::transport::DatasetRegistry;
use dsv::{suggest_parents, Error, Hash, LocalStore, PeerId, RemoteUrl, Repo, Repository};

#[derive(Parser)]
#[command(name = "dsv")]
#[command(about = "decentralized dataset versioning")]
#[command(version)]
struct Cli {
    /// repository path (searched upwards)
    #[arg(short = 'C', long, default_value = ".")]
    repo: PathBuf,

    /// log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// path to create repository at
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// record a file or directory as a new version
    Commit {
        /// file or directory to commit
        path: PathBuf,

        /// commit message
        #[arg(short, long)]
        message: String,

        /// parent version (hash or unique prefix); defaults to the leaves
        #[arg(short, long = "parent")]
        parents: Vec<String>,

        /// do not pin the committed content
        #[arg(long)]
        no_pin: bool,
    },

    /// show versions, newest first
    Log,

    /// write a version's content to a destination
    Checkout {
        /// version hash or unique prefix
        hash: String,

        /// destination path
        destination: PathBuf,
    },

    /// merge the remote's versions into this repository
    Fetch,

    /// send this repository's versions to the remote
    Push,

    /// create a repository from a remote dataset
    Clone {
        /// remote url, ending in <org>/<dataset>
        url: String,

        /// destination directory (defaults to the dataset name)
        destination: Option<PathBuf>,
    },

    /// show or set the remote url
    Remote {
        /// new remote url
        url: Option<String>,
    },

    /// read or edit configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// show the default parents for the next commit
    Parents,

    /// remove objects no pin or version refers to
    Gc {
        /// only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// serve a dataset registry over http
    Serve {
        /// registry root directory
        #[arg(long)]
        root: PathBuf,

        /// address to listen on
        #[arg(long, default_value = "127.0.0.1:7420")]
        listen: String,

        /// url clients use to reach this server
        #[arg(long)]
        public_url: Option<String>,

        /// seconds allowed per request
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// create an empty dataset in a registry
    DatasetCreate {
        /// registry root directory
        #[arg(long)]
        root: PathBuf,

        /// dataset as <org>/<name>
        dataset: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// print a value
    Get { key: String },
    /// set a value
    Set { key: String, value: String },
    /// remove a value
    Unset { key: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        if let Error::MergeConflict(conflicts) = &e {
            for conflict in conflicts {
                eprintln!("\n{}", conflict);
            }
        }
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open(path: &Path) -> dsv::Result<Repository<LocalStore>> {
    Repo::find(path)?.connect()
}

fn run(cli: Cli) -> dsv::Result<()> {
    match cli.command {
        Commands::Init { path } => {
            Repo::init(&path)?;
            println!("initialized dsv repository at {}", path.display());
        }

        Commands::Commit {
            path,
            message,
            parents,
            no_pin,
        } => {
            let mut repository = open(&cli.repo)?;

            let mut options = CommitOptions::new(message);
            options.pin = !no_pin;
            if !parents.is_empty() {
                let resolved = parents
                    .iter()
                    .map(|p| resolve_parent(&repository, p))
                    .collect::<dsv::Result<Vec<_>>>()?;
                options.parents = Some(resolved);
            }

            let chosen = options
                .parents
                .clone()
                .unwrap_or_else(|| suggest_parents(repository.manifest()));
            for unknown in repository.manifest().unknown_commits(&chosen) {
                eprintln!("warning: {} is not a known version", unknown);
            }

            let version = ops::commit(&mut repository, &path, &options)?;
            println!("{}", version.hash);
        }

        Commands::Log => {
            let repository = open(&cli.repo)?;
            let entries = ops::log(&repository);
            if entries.is_empty() {
                println!("no versions");
            }
            for entry in entries {
                println!("{}", entry);
            }
        }

        Commands::Checkout { hash, destination } => {
            let repository = open(&cli.repo)?;
            let version = ops::checkout(&repository, &hash, &destination)?;
            println!(
                "checked out {} to {}",
                version.hash.short(),
                destination.display()
            );
        }

        Commands::Fetch => {
            let mut repository = open(&cli.repo)?;
            let head = ops::fetch(&mut repository)?;
            println!("manifest {}", head);
        }

        Commands::Push => {
            let mut repository = open(&cli.repo)?;
            let head = ops::push(&mut repository)?;
            println!("manifest {}", head);
        }

        Commands::Clone { url, destination } => {
            let dest = match destination {
                Some(dest) => dest,
                None => PathBuf::from(RemoteUrl::parse(&url)?.dataset()),
            };
            let repository = ops::clone(&url, &dest)?;
            println!(
                "cloned {} versions into {}",
                repository.manifest().len(),
                dest.display()
            );
        }

        Commands::Remote { url } => {
            let mut repo = Repo::find(&cli.repo)?;
            match url {
                Some(url) => {
                    let remote = RemoteUrl::parse(&url)?;
                    repo.config_mut().remote = Some(remote.to_string());
                    repo.save_config()?;
                }
                None => match repo.config().remote()? {
                    Some(remote) => println!("{}", remote),
                    None => return Err(Error::NoRemoteConfigured),
                },
            }
        }

        Commands::Config { command } => {
            let mut repo = Repo::find(&cli.repo)?;
            match command {
                ConfigCommand::Get { key } => match repo.config().get_path(&key)? {
                    toml::Value::String(s) => println!("{}", s),
                    other => println!("{}", other),
                },
                ConfigCommand::Set { key, value } => {
                    repo.config_mut().set_path(&key, &value)?;
                    repo.save_config()?;
                }
                ConfigCommand::Unset { key } => {
                    repo.config_mut().delete_path(&key)?;
                    repo.save_config()?;
                }
            }
        }

        Commands::Parents => {
            let repository = open(&cli.repo)?;
            for hash in suggest_parents(repository.manifest()) {
                println!("{}", hash);
            }
        }

        Commands::Gc { dry_run } => {
            let mut repository = open(&cli.repo)?;
            let stats = ops::gc(&mut repository, dry_run)?;
            let verb = if dry_run { "would remove" } else { "removed" };
            println!(
                "{} {} objects ({} bytes), kept {}",
                verb, stats.objects_removed, stats.bytes_freed, stats.objects_kept
            );
        }

        Commands::Serve {
            root,
            listen,
            public_url,
            timeout,
        } => {
            let public_url = public_url.unwrap_or_else(|| format!("http://{}/", listen));
            let registry = open_registry(&root)?.with_identity(PeerId::new(public_url));
            let server = Arc::new(Server::new(registry, Duration::from_secs(timeout)));

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| transport_error("runtime", e))?;
            runtime.block_on(async {
                let listener = tokio::net::TcpListener::bind(&listen)
                    .await
                    .map_err(|e| transport_error(&listen, e))?;
                serve(server, listener)
                    .await
                    .map_err(|e| transport_error(&listen, e))
            })?;
        }

        Commands::DatasetCreate { root, dataset } => {
            let (org, name) = dataset
                .split_once('/')
                .ok_or_else(|| Error::InvalidDatasetName(dataset.clone()))?;
            let registry = open_registry(&root)?;
            let payload = registry.create_dataset(org, name)?;
            println!("created {} at {}", dataset, payload.hash);
        }
    }

    Ok(())
}

/// a parent given as a full hash, or a prefix of a known version
fn resolve_parent(repository: &Repository<LocalStore>, raw: &str) -> dsv::Result<Hash> {
    if raw.len() == 64 {
        return Hash::from_hex(raw);
    }
    Ok(repository.manifest().resolve_prefix(raw)?.hash)
}

fn open_registry(root: &Path) -> dsv::Result<DatasetRegistry> {
    match DatasetRegistry::open(root) {
        Err(Error::NotInitialized(_)) => DatasetRegistry::initialize(root),
        other => other,
    }
}

fn transport_error(context: &str, err: std::io::Error) -> Error {
    Error::Transport {
        message: format!("{}: {}", context, err),
    }
}
