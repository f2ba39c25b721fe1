//! Grove CLI - plumbing commands for a Grove object and reference store.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Grove - content-addressed object and reference storage
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// YAML store configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (overrides the configured path, default: .grove)
    #[arg(short = 'C', long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty store, or report an existing one
    Init,

    /// Compute an object ID, optionally storing the object
    HashObject {
        /// File to hash; reads stdin when omitted
        file: Option<PathBuf>,
        /// Object type
        #[arg(short = 't', long = "type", default_value = "blob")]
        object_type: String,
        /// Write the object into the store
        #[arg(short, long)]
        write: bool,
    },

    /// Show an object's type, size, or content
    #[command(group(clap::ArgGroup::new("mode").required(true).args(["kind", "size", "pretty"])))]
    CatFile {
        /// Object ID or reference name
        object: String,
        /// Print the object type
        #[arg(short = 't')]
        kind: bool,
        /// Print the object size
        #[arg(short = 's')]
        size: bool,
        /// Pretty-print the content
        #[arg(short = 'p')]
        pretty: bool,
    },

    /// List references
    ShowRef {
        /// Glob over reference names (`*` also matches `/`)
        pattern: Option<String>,
        /// Include HEAD
        #[arg(long)]
        head: bool,
        /// Also show the peeled ID of annotated tags
        #[arg(short, long)]
        dereference: bool,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or move a reference
    UpdateRef {
        /// Reference name
        name: String,
        /// New target: an object ID or reference name
        target: String,
        /// Reflog message
        #[arg(short, long)]
        message: Option<String>,
        /// Overwrite without a compare against the current value
        #[arg(short, long)]
        force: bool,
    },

    /// Read or set a symbolic reference
    SymbolicRef {
        /// Reference name
        name: String,
        /// Reference to point at
        target: Option<String>,
        /// Reflog message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Delete a reference and its reflog
    DeleteRef {
        /// Reference name
        name: String,
    },

    /// Rename a reference
    RenameRef {
        /// Current name
        old: String,
        /// New name
        new: String,
        /// Replace an existing reference at the new name
        #[arg(short, long)]
        force: bool,
    },

    /// Show a reference's log, newest entry first
    Reflog {
        /// Reference name
        #[arg(default_value = "HEAD")]
        name: String,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// List, create, or delete tags
    Tag {
        /// Tag name; lists tags when omitted
        name: Option<String>,
        /// Object to tag (default: HEAD)
        target: Option<String>,
        /// Annotation message; creates an annotated tag
        #[arg(short, long)]
        message: Option<String>,
        /// Replace an existing tag
        #[arg(short, long)]
        force: bool,
        /// Delete the tag
        #[arg(short, long, conflicts_with_all = ["message", "force", "target"])]
        delete: bool,
    },

    /// List, create, or delete branches
    Branch {
        /// Branch name; lists branches when omitted
        name: Option<String>,
        /// Commit to start at (default: HEAD)
        start: Option<String>,
        /// List remote-tracking branches
        #[arg(short, long)]
        remotes: bool,
        /// Replace an existing branch
        #[arg(short, long)]
        force: bool,
        /// Delete the branch
        #[arg(short, long, conflicts_with_all = ["force", "start"])]
        delete: bool,
    },

    /// Resolve a reference and peel annotated tags
    Peel {
        /// Reference name
        name: String,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("grove={log_level},grove_storage={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut out = std::io::stdout().lock();
    let result = commands::load_config(cli.config.as_deref(), cli.store.as_deref()).and_then(
        |config| match cli.command {
            Commands::Init => commands::init(&config, &mut out),
            Commands::Version => {
                commands::print_line(&mut out, format!("grove {}", env!("CARGO_PKG_VERSION")))
            }
            command => {
                let repo = commands::open(&config)?;
                run(&repo, command, &mut out)
            }
        },
    );

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(
    repo: &grove_storage::Repository,
    command: Commands,
    out: &mut dyn std::io::Write,
) -> anyhow::Result<()> {
    match command {
        Commands::HashObject {
            file,
            object_type,
            write,
        } => commands::hash_object(repo, file.as_deref(), &object_type, write, out),
        Commands::CatFile {
            object,
            kind,
            size,
            pretty,
        } => {
            let mode = match (kind, size, pretty) {
                (true, _, _) => commands::CatMode::Type,
                (_, true, _) => commands::CatMode::Size,
                (_, _, true) => commands::CatMode::Pretty,
                _ => anyhow::bail!("cat-file needs one of -t, -s or -p"),
            };
            commands::cat_file(repo, &object, mode, out)
        }
        Commands::ShowRef {
            pattern,
            head,
            dereference,
            json,
        } => commands::show_ref(repo, pattern.as_deref(), head, dereference, json, out),
        Commands::UpdateRef {
            name,
            target,
            message,
            force,
        } => commands::update_ref(repo, &name, &target, message.as_deref(), force, out),
        Commands::SymbolicRef {
            name,
            target,
            message,
        } => commands::symbolic_ref(repo, &name, target.as_deref(), message.as_deref(), out),
        Commands::DeleteRef { name } => commands::delete_ref(repo, &name, out),
        Commands::RenameRef { old, new, force } => {
            commands::rename_ref(repo, &old, &new, force, out)
        }
        Commands::Reflog { name, json } => commands::reflog(repo, &name, json, out),
        Commands::Tag {
            name: None, ..
        } => commands::tag_list(repo, out),
        Commands::Tag {
            name: Some(name),
            delete: true,
            ..
        } => commands::tag_delete(repo, &name, out),
        Commands::Tag {
            name: Some(name),
            target,
            message,
            force,
            delete: false,
        } => commands::tag_create(
            repo,
            &name,
            target.as_deref(),
            message.as_deref(),
            force,
            out,
        ),
        Commands::Branch {
            name: None,
            remotes,
            ..
        } => commands::branch_list(repo, remotes, out),
        Commands::Branch {
            name: Some(name),
            delete: true,
            ..
        } => commands::branch_delete(repo, &name, out),
        Commands::Branch {
            name: Some(name),
            start,
            force,
            delete: false,
            ..
        } => commands::branch_create(repo, &name, start.as_deref(), force, out),
        Commands::Peel { name } => commands::peel(repo, &name, out),
        Commands::Init | Commands::Version => Ok(()),
    }
}
