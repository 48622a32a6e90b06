//! A Git remote helper that stores an entire repository — objects,
//! refs, symbolic refs, and config — inside a single SQLite file.
//!
//! To Git this crate's binary appears as a transport for `sqlite://`
//! URLs; see [`url::Url`] for the accepted forms and [`run`] for the
//! `gitremote-helpers(7)` command loop this binary drives.
pub mod codec;
pub mod engine;
pub mod logger;
pub mod repo;
pub mod store;
pub mod url;
pub mod walker;

use std::io::{self, BufRead, ErrorKind, Write};

use thiserror::Error;

use crate::codec::{Command, PushResponse};
use crate::engine::Engine;
use crate::repo::RepoAccess;
use crate::store::Store;
use crate::url::Url;

#[derive(Debug, Error)]
pub enum Error {
    /// `GIT_DIR` was not set in the environment.
    #[error("GIT_DIR is not set")]
    MissingGitDir,
    /// The binary was invoked with the wrong number of arguments.
    #[error("invalid arguments: {0:?}")]
    InvalidArguments(Vec<String>),
    #[error(transparent)]
    Url(#[from] url::UrlError),
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Repo(#[from] repo::Error),
    #[error(transparent)]
    Engine(#[from] engine::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A command this helper declines to implement.
    #[error("unimplemented command `{0}`")]
    Unimplemented(&'static str),
}

/// Run the remote helper for one invocation, i.e. one
/// `git-remote-sqlite <remote-name> <url>` process.
///
/// `args` excludes the program name, matching `std::env::args().skip(1)`.
pub fn run(args: &[String]) -> Result<(), Error> {
    let git_dir = std::env::var("GIT_DIR").map_err(|_| Error::MissingGitDir)?;

    let url: Url = match args {
        [url] => url.parse()?,
        [_remote_name, url] => url.parse()?,
        _ => return Err(Error::InvalidArguments(args.to_vec())),
    };

    log::debug!("opening store at {}", url.path);
    let store = Store::open(&url.path)?;
    let repo = RepoAccess::open(&git_dir)?;
    let engine = Engine::new(store, repo);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let Some(command) = codec::parse(&line)? else {
            break;
        };

        match command {
            Command::Capabilities => {
                if write_response(&mut stdout, &engine::capabilities())? {
                    break;
                }
            }
            Command::List { for_push } => {
                let resp = engine.list(for_push)?;
                if write_response(&mut stdout, &resp)? {
                    break;
                }
            }
            Command::Fetch { .. } => {
                drain_block(&stdin, &mut line)?;
                let resp = engine.fetch()?;
                if write_response(&mut stdout, &resp)? {
                    break;
                }
            }
            Command::Push { spec } => {
                let mut results = vec![engine.push(&spec)];
                loop {
                    line.clear();
                    if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
                        break;
                    }
                    match codec::parse(&line)? {
                        Some(Command::Push { spec }) => results.push(engine.push(&spec)),
                        _ => break,
                    }
                }
                let resp = PushResponse { results };
                if write_response(&mut stdout, &resp)? {
                    break;
                }
            }
            Command::Option { name, value } => {
                let resp = engine.option(&name, &value);
                if write_response(&mut stdout, &resp)? {
                    break;
                }
            }
            Command::Import { .. } => return Err(Error::Unimplemented("import")),
            Command::Export => return Err(Error::Unimplemented("export")),
            Command::Connect { .. } => return Err(Error::Unimplemented("connect")),
            Command::StatelessConnect { .. } => return Err(Error::Unimplemented("stateless-connect")),
            Command::Get { .. } => return Err(Error::Unimplemented("get")),
        }
    }

    Ok(())
}

/// Read and discard lines up to (and including) the next blank line.
/// Used for multi-line command blocks (`fetch`) whose individual lines
/// this engine does not need, since it restores every stored object
/// regardless of which ref was requested.
fn drain_block(stdin: &io::Stdin, line: &mut String) -> io::Result<()> {
    loop {
        line.clear();
        if stdin.lock().read_line(line)? == 0 || line.trim().is_empty() {
            return Ok(());
        }
    }
}

/// Write a response block and flush. Returns `Ok(true)` if the host has
/// closed its end of the pipe — a normal end-of-dialogue condition, not
/// an error — signaling the caller to stop the loop.
fn write_response<T: std::fmt::Display>(out: &mut impl Write, value: &T) -> io::Result<bool> {
    match write!(out, "{value}").and_then(|_| out.flush()) {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(true),
        Err(e) => Err(e),
    }
}
