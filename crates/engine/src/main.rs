//! VaultFM
//!
//! Command-line front end for the file manager engine.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use engine::config::{default_config_path, default_data_root, Config};
use engine::{Dispatcher, FileStream, InstanceRegistry, Preview, Request, Response};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// VaultFM - sandboxed, encrypted file manager.
#[derive(Parser, Debug)]
#[command(name = "vaultfm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Instance to operate on (optional when only one is configured)
    #[arg(short, long, global = true, value_name = "ID")]
    pub instance: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Write a starter configuration file
    InitConfig {
        /// Root folder for the default instance
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List configured instances
    Instances,

    /// List a folder
    List {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Search recursively by name (`*` for glob patterns)
    Search {
        path: String,
        query: String,
    },

    /// Create a folder
    NewFolder {
        path: String,
        name: String,
    },

    /// Create an empty file
    NewFile {
        path: String,
        name: String,
    },

    /// Delete items (to the recycle bin when enabled)
    Delete {
        /// Folder to list afterwards
        path: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Rename items in place
    Rename {
        path: String,
        new_name: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Encrypt items in place
    Encrypt {
        path: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Decrypt items in place
    Decrypt {
        path: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Compress items into an archive inside PATH
    Zip {
        path: String,
        name: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Extract archives into PATH
    Unzip {
        path: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Copy items into PATH
    Copy {
        path: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Move items into PATH
    Cut {
        path: String,
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Replace a file's text (reads stdin when --content is omitted)
    Edit {
        file_path: String,
        #[arg(long)]
        content: Option<String>,
    },

    /// Write a file's decrypted content
    Download {
        file_path: String,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Like download, with display-oriented content handling
    View {
        file_path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a file's text for editing
    GetFileText {
        file_path: String,
    },

    /// Upload a local file into PATH
    Upload {
        path: String,
        source: PathBuf,
        /// Name to store under (defaults to the source file name)
        #[arg(long)]
        name: Option<String>,
        /// Chunk index for multi-part uploads
        #[arg(long)]
        chunk: Option<u32>,
    },

    /// Write an image preview, or print the icon key
    Preview {
        file_path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Set up console logging and, when configured, a daily rolling log file.
///
/// The returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_writer(io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "vaultfm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { root, force } = &cli.command {
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if path.exists() && !force {
            bail!(
                "Config file already exists: {} (use --force to overwrite)",
                path.display()
            );
        }
        let root = root.clone().unwrap_or_else(default_data_root);
        Config::starter(&root).save(&path)?;
        println!("{}", path.display());
        return Ok(());
    }

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.engine.log_level.clone()
    };
    let _guard = init_tracing(&level, config.engine.log_dir.as_deref());
    tracing::debug!(instances = config.instances.len(), "Configuration loaded");

    let registry = Arc::new(InstanceRegistry::new());
    for instance in &config.instances {
        registry
            .register(instance.clone())
            .with_context(|| format!("Failed to open instance '{}'", instance.id))?;
    }

    if let Commands::Instances = cli.command {
        for id in registry.ids() {
            println!("{id}");
        }
        return Ok(());
    }

    let instance_id = match cli.instance {
        Some(id) => id,
        None => {
            let ids = registry.ids();
            match ids.as_slice() {
                [only] => only.clone(),
                [] => bail!("No instances configured"),
                _ => bail!("Several instances configured, pick one with --instance"),
            }
        }
    };

    let (request, output) = build_request(cli.command)?;
    let dispatcher = Dispatcher::new(registry);
    let response = dispatcher.dispatch(&instance_id, request).await?;

    match response {
        Response::Listing(listing) => println!("{}", serde_json::to_string_pretty(&listing)?),
        Response::Text(text) => print!("{text}"),
        Response::Stream(stream) => write_stream(stream, output.as_deref())?,
        Response::Preview(Preview::Image(stream)) => write_stream(stream, output.as_deref())?,
        Response::Preview(Preview::Icon(icon)) => {
            println!("{}", serde_json::json!({ "icon": icon }))
        }
        Response::Done => println!("{}", serde_json::json!({ "status": "ok" })),
    }

    Ok(())
}

/// Translate a subcommand into a request and an optional output path.
fn build_request(command: Commands) -> anyhow::Result<(Request, Option<PathBuf>)> {
    let request = match command {
        Commands::InitConfig { .. } => bail!("'init-config' is not a file operation"),
        Commands::Instances => bail!("'instances' is not a file operation"),
        Commands::List { path } => Request::List { path },
        Commands::Search { path, query } => Request::Search { path, query },
        Commands::NewFolder { path, name } => Request::NewFolder { path, name },
        Commands::NewFile { path, name } => Request::NewFile { path, name },
        Commands::Delete { path, items } => Request::Delete { path, items },
        Commands::Rename {
            path,
            new_name,
            items,
        } => Request::Rename {
            path,
            items,
            new_name,
        },
        Commands::Encrypt { path, items } => Request::Encrypt { path, items },
        Commands::Decrypt { path, items } => Request::Decrypt { path, items },
        Commands::Zip { path, name, items } => Request::Zip {
            path,
            items,
            file_name: name,
        },
        Commands::Unzip { path, items } => Request::Unzip { path, items },
        Commands::Copy { path, items } => Request::Copy { path, items },
        Commands::Cut { path, items } => Request::Cut { path, items },
        Commands::Edit { file_path, content } => {
            let content = match content {
                Some(content) => content,
                None => {
                    let mut buf = String::new();
                    io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read content from stdin")?;
                    buf
                }
            };
            Request::Edit { file_path, content }
        }
        Commands::Download { file_path, output } => {
            return Ok((Request::Download { file_path }, output))
        }
        Commands::View { file_path, output } => return Ok((Request::View { file_path }, output)),
        Commands::GetFileText { file_path } => Request::GetFileText { file_path },
        Commands::Upload {
            path,
            source,
            name,
            chunk,
        } => {
            let data = std::fs::read(&source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            let file_name = match name {
                Some(name) => name,
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("No file name in {}", source.display()))?,
            };
            Request::Upload {
                path,
                file_name,
                data,
                chunk,
            }
        }
        Commands::Preview { file_path, output } => {
            return Ok((Request::Preview { file_path }, output))
        }
    };
    Ok((request, None))
}

/// Copy a served stream to `output`, or stdout when none is given.
fn write_stream(mut stream: FileStream, output: Option<&Path>) -> anyhow::Result<()> {
    tracing::debug!(
        file = %stream.file_name,
        mime = %stream.mime,
        disposition = %stream.disposition,
        "Writing stream"
    );
    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            io::copy(&mut stream.reader, &mut file)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            io::copy(&mut stream.reader, &mut lock).context("Failed to write to stdout")?;
            lock.flush()?;
        }
    }
    Ok(())
}
