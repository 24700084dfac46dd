//! vcsdb - command-line front end
//!
//! Every command prints JSON on stdout. Failures go to stderr with an exit
//! code derived from the error kind.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use vcsdb::config::StoreConfig;
use vcsdb::model::{parse_timestamp, Bundle, CommitId, NewCommit, RepoName, RepoPath};
use vcsdb::registry::{self, Registry};
use vcsdb::{ErrorKind, VcsError, VcsResult};

/// vcsdb - pluggable version-control storage
#[derive(Parser, Debug)]
#[command(
    name = "vcsdb",
    version,
    about = "Pluggable version-control storage",
    long_about = "Append-only commit graphs with content-addressed commits and blobs,\n\
                  stored by interchangeable engines (sqlite_fs, graph_db)."
)]
struct Cli {
    /// Root directory for engine data
    #[arg(long, global = true, env = "VCSDB_ROOT")]
    root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true, env = "VCSDB_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered engines
    Engines,

    /// Create an empty repository
    Create { engine: String, repo: String },

    /// List repositories
    Repos {
        engine: String,

        /// Include head, counts and last commit
        #[arg(long)]
        summary: bool,
    },

    /// List commits newest first
    Commits {
        engine: String,
        repo: String,

        /// Maximum number of commits
        #[arg(long)]
        limit: Option<usize>,

        /// Start below this commit
        #[arg(long)]
        before: Option<String>,
    },

    /// Show one commit with its tree and changes
    Show {
        engine: String,
        repo: String,
        commit: String,
    },

    /// Check whether a commit belongs to a repository
    Exists {
        engine: String,
        repo: String,
        commit: String,
    },

    /// Push a commit on top of the current head
    Push {
        engine: String,
        repo: String,

        /// Parent commit (omit for the first commit)
        #[arg(long)]
        parent: Option<String>,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Commit author
        #[arg(short, long)]
        author: String,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(long)]
        timestamp: Option<String>,

        /// PATH=LOCAL_FILE, content read from a local file
        #[arg(long = "file")]
        files: Vec<String>,

        /// PATH=TEXT, content given inline
        #[arg(long = "text")]
        texts: Vec<String>,
    },

    /// Print the commits after a cursor as a bundle
    Pull {
        engine: String,
        repo: String,

        /// Last commit the caller already has
        #[arg(long)]
        since: Option<String>,
    },

    /// Print the whole repository as a bundle, or copy it into a new one
    Clone {
        engine: String,
        repo: String,

        /// Create this repository as the copy
        #[arg(long)]
        into: Option<String>,
    },

    /// Replay a bundle file onto a repository
    Restore {
        engine: String,
        repo: String,
        bundle: PathBuf,
    },

    /// Fast-forward one repository with the commits of another
    Sync {
        engine: String,
        source: String,
        target: String,
    },

    /// Delete a repository
    Delete { engine: String, repo: String },

    /// Commits that changed a path, newest first
    History {
        engine: String,
        repo: String,
        path: String,
    },

    /// Content of a path at a commit
    Cat {
        engine: String,
        repo: String,
        commit: String,
        path: String,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let usage = e.use_stderr();
            let _ = e.print();
            return if usage { ExitCode::from(4) } else { ExitCode::SUCCESS };
        }
    };

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(cli) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("error: {}", e);
            exit_code(e.kind())
        }
    }
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::NotFound => ExitCode::from(2),
        ErrorKind::Conflict => ExitCode::from(3),
        ErrorKind::InvalidInput => ExitCode::from(4),
        ErrorKind::StorageFailure => ExitCode::FAILURE,
    }
}

fn load_config(cli: &Cli) -> VcsResult<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn to_value<T: Serialize>(value: T) -> VcsResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn repo(raw: &str) -> VcsResult<RepoName> {
    Ok(RepoName::new(raw)?)
}

fn path(raw: &str) -> VcsResult<RepoPath> {
    Ok(RepoPath::new(raw)?)
}

fn commit_id(raw: &str) -> VcsResult<CommitId> {
    Ok(CommitId::from_hex(raw)?)
}

fn commit_opt(raw: Option<&str>) -> VcsResult<Option<CommitId>> {
    raw.map(commit_id).transpose()
}

/// split `PATH=VALUE`
fn assignment(raw: &str) -> VcsResult<(RepoPath, &str)> {
    let (p, value) = raw
        .split_once('=')
        .ok_or_else(|| VcsError::InvalidCommit(format!("expected PATH=VALUE, got '{}'", raw)))?;
    Ok((path(p)?, value))
}

fn run(cli: Cli) -> VcsResult<Value> {
    let config = load_config(&cli)?;
    let registry = registry::install(Registry::with_defaults(config)?)?;

    match cli.command {
        Command::Engines => to_value(registry.list()),

        Command::Create { engine, repo: name } => {
            let name = repo(&name)?;
            registry.get(&engine)?.create_repo(&name)?;
            Ok(json!({ "repo": name, "engine": engine }))
        }

        Command::Repos { engine, summary } => {
            let store = registry.get(&engine)?;
            if summary {
                to_value(store.list_summaries()?)
            } else {
                to_value(store.list_repos()?)
            }
        }

        Command::Commits {
            engine,
            repo: name,
            limit,
            before,
        } => {
            let before = commit_opt(before.as_deref())?;
            to_value(registry.get(&engine)?.commits(&repo(&name)?, limit, before)?)
        }

        Command::Show {
            engine,
            repo: name,
            commit,
        } => to_value(registry.get(&engine)?.commit(&repo(&name)?, &commit_id(&commit)?)?),

        Command::Exists {
            engine,
            repo: name,
            commit,
        } => {
            let exists = registry
                .get(&engine)?
                .commit_exists(&repo(&name)?, &commit_id(&commit)?)?;
            Ok(json!({ "exists": exists }))
        }

        Command::Push {
            engine,
            repo: name,
            parent,
            message,
            author,
            timestamp,
            files,
            texts,
        } => {
            let mut commit = NewCommit::new(author, message).parent_id(commit_opt(parent.as_deref())?);
            if let Some(raw) = timestamp {
                let ts = parse_timestamp(&raw)
                    .map_err(|e| VcsError::InvalidCommit(format!("bad timestamp '{}': {}", raw, e)))?;
                commit = commit.timestamp(ts);
            }
            for raw in &files {
                let (p, local) = assignment(raw)?;
                let content = fs::read(local)
                    .map_err(|e| VcsError::InvalidCommit(format!("cannot read '{}': {}", local, e)))?;
                commit = commit.file(p, content);
            }
            for raw in &texts {
                let (p, text) = assignment(raw)?;
                commit = commit.file(p, text);
            }
            to_value(registry.get(&engine)?.push(&repo(&name)?, commit)?)
        }

        Command::Pull {
            engine,
            repo: name,
            since,
        } => {
            let since = commit_opt(since.as_deref())?;
            to_value(registry.get(&engine)?.pull(&repo(&name)?, since)?)
        }

        Command::Clone {
            engine,
            repo: name,
            into,
        } => {
            let store = registry.get(&engine)?;
            let source = repo(&name)?;
            match into {
                Some(target) => to_value(store.clone_repo(&source, &repo(&target)?)?),
                None => to_value(store.clone_bundle(&source)?),
            }
        }

        Command::Restore {
            engine,
            repo: name,
            bundle,
        } => {
            let raw = fs::read(&bundle)
                .map_err(|e| VcsError::InvalidBundle(format!("cannot read {}: {}", bundle.display(), e)))?;
            let bundle: Bundle = serde_json::from_slice(&raw)
                .map_err(|e| VcsError::InvalidBundle(format!("{}: {}", bundle.display(), e)))?;
            to_value(registry.get(&engine)?.restore(&repo(&name)?, &bundle)?)
        }

        Command::Sync {
            engine,
            source,
            target,
        } => to_value(registry.get(&engine)?.sync(&repo(&source)?, &repo(&target)?)?),

        Command::Delete { engine, repo: name } => {
            to_value(registry.get(&engine)?.delete_repo(&repo(&name)?)?)
        }

        Command::History {
            engine,
            repo: name,
            path: p,
        } => to_value(registry.get(&engine)?.file_history(&repo(&name)?, &path(&p)?)?),

        Command::Cat {
            engine,
            repo: name,
            commit,
            path: p,
        } => {
            let commit = commit_id(&commit)?;
            let p = path(&p)?;
            let content = registry.get(&engine)?.file_content(&repo(&name)?, &commit, &p)?;
            let size = content.len();
            let (encoding, content) = match String::from_utf8(content) {
                Ok(text) => ("utf8", text),
                Err(e) => ("hex", hex::encode(e.into_bytes())),
            };
            Ok(json!({
                "commit": commit,
                "path": p,
                "size": size,
                "encoding": encoding,
                "content": content,
            }))
        }
    }
}
