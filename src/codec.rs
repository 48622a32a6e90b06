//! Parse inbound `gitremote-helpers(7)` command lines; render response
//! values to their required textual form.
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Line did not match any recognized command shape.
    #[error("invalid command `{0}`")]
    InvalidCommand(String),
}

/// One parsed command line. `None` (produced by [`parse`] returning
/// `Ok(None)`) signals end-of-input, which the caller uses to terminate
/// the command loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capabilities,
    List { for_push: bool },
    Fetch { sha: String, name: String },
    /// The raw `[+]<src>:<dst>` text, left unsplit: refspec parsing is
    /// the Repo Access component's job, not the codec's.
    Push { spec: String },
    Option { name: String, value: String },
    Import { name: String },
    Export,
    Connect { service: String },
    StatelessConnect { service: String },
    Get { uri: String, path: String },
}

/// Parse one line of input. Surrounding whitespace is trimmed; an empty
/// line yields `Ok(None)` (end of input / loop terminator).
pub fn parse(line: &str) -> Result<Option<Command>, Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let tokens: Vec<&str> = line.split(' ').collect();
    let cmd = match tokens.as_slice() {
        ["capabilities"] => Command::Capabilities,
        ["list"] => Command::List { for_push: false },
        ["list", "for-push"] => Command::List { for_push: true },
        ["fetch", sha, name] => Command::Fetch {
            sha: sha.to_string(),
            name: name.to_string(),
        },
        ["push", spec] => Command::Push {
            spec: spec.to_string(),
        },
        ["option", name, value] => Command::Option {
            name: name.to_string(),
            value: value.to_string(),
        },
        ["import", name] => Command::Import {
            name: name.to_string(),
        },
        ["export"] => Command::Export,
        ["connect", service] => Command::Connect {
            service: service.to_string(),
        },
        ["stateless-connect", service] => Command::StatelessConnect {
            service: service.to_string(),
        },
        ["get", uri, path] => Command::Get {
            uri: uri.to_string(),
            path: path.to_string(),
        },
        _ => return Err(Error::InvalidCommand(line.to_string())),
    };
    Ok(Some(cmd))
}

/// A single ref as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedRef {
    Regular { sha: String, name: String },
    Symbolic { target: String, name: String },
    Unknown { name: String },
    Keywords { pairs: Vec<(String, String)>, name: String },
}

impl fmt::Display for ListedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular { sha, name } => write!(f, "{sha} {name}"),
            Self::Symbolic { target, name } => write!(f, "@{target} {name}"),
            Self::Unknown { name } => write!(f, "? {name}"),
            Self::Keywords { pairs, name } => {
                for (k, v) in pairs {
                    write!(f, ":{k} {v} ")?;
                }
                write!(f, "{name}")
            }
        }
    }
}

/// The ordered set of capability tokens a remote helper may advertise.
pub const ALL_CAPABILITIES: [&str; 14] = [
    "import",
    "export",
    "push",
    "fetch",
    "connect",
    "stateless-connect",
    "check-connectivity",
    "get",
    "bidi-import",
    "signed-tags",
    "object-format",
    "no-private-update",
    "progress",
    "option",
];

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub enabled: Vec<&'static str>,
    pub refspec: Option<String>,
    pub export_marks: Option<String>,
    pub import_marks: Option<String>,
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "capabilities")?;
        for name in ALL_CAPABILITIES.iter().filter(|c| self.enabled.contains(c)) {
            writeln!(f, "{name}")?;
        }
        if let Some(refspec) = &self.refspec {
            writeln!(f, "refspec {refspec}")?;
        }
        if let Some(path) = &self.export_marks {
            writeln!(f, "export-marks {path}")?;
        }
        if let Some(path) = &self.import_marks {
            writeln!(f, "import-marks {path}")?;
        }
        writeln!(f)
    }
}

/// A complete `list` response block.
#[derive(Debug, Clone, Default)]
pub struct ListResponse {
    pub refs: Vec<ListedRef>,
}

impl fmt::Display for ListResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.refs {
            writeln!(f, "{r}")?;
        }
        writeln!(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionResponse {
    Ok,
    Unsupported,
    Error(String),
}

impl fmt::Display for OptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => writeln!(f, "ok"),
            Self::Unsupported => writeln!(f, "unsupported"),
            Self::Error(msg) => writeln!(f, "error {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    Complete,
    Lock(String),
    ConnectivityOk,
}

impl fmt::Display for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => writeln!(f),
            Self::Lock(path) => writeln!(f, "lock {path}"),
            Self::ConnectivityOk => writeln!(f, "connectivity-ok"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    Ok(String),
    Error { dst: String, why: Option<String> },
}

impl fmt::Display for PushResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(dst) => writeln!(f, "ok {dst}"),
            Self::Error { dst, why: Some(why) } => writeln!(f, "error {dst} {why}"),
            Self::Error { dst, why: None } => writeln!(f, "error {dst}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PushResponse {
    pub results: Vec<PushResult>,
}

impl fmt::Display for PushResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.results {
            write!(f, "{r}")?;
        }
        writeln!(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResponse {
    Established,
    Fallback,
}

impl fmt::Display for ConnectResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Established => writeln!(f),
            Self::Fallback => writeln!(f, "fallback"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_capabilities() {
        assert_eq!(parse("capabilities").unwrap(), Some(Command::Capabilities));
    }

    #[test]
    fn test_parse_list_for_push() {
        assert_eq!(
            parse("list for-push").unwrap(),
            Some(Command::List { for_push: true })
        );
    }

    #[test]
    fn test_parse_push_keeps_spec_raw() {
        let cmd = parse("push +refs/heads/main:refs/heads/main").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Push {
                spec: "+refs/heads/main:refs/heads/main".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_empty_line_is_eof() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(parse("frobnicate").is_err());
    }

    #[test]
    fn test_parse_missing_argument() {
        assert!(parse("fetch deadbeef").is_err());
    }

    #[test]
    fn test_render_capabilities() {
        let caps = Capabilities {
            enabled: vec!["push", "fetch"],
            ..Default::default()
        };
        assert_eq!(caps.to_string(), "capabilities\npush\nfetch\n\n");
    }

    #[test]
    fn test_render_listed_ref_variants() {
        assert_eq!(
            ListedRef::Regular { sha: "a".repeat(40), name: "refs/heads/main".into() }.to_string(),
            format!("{} refs/heads/main", "a".repeat(40))
        );
        assert_eq!(
            ListedRef::Symbolic { target: "refs/heads/main".into(), name: "HEAD".into() }.to_string(),
            "@refs/heads/main HEAD"
        );
        assert_eq!(ListedRef::Unknown { name: "HEAD".into() }.to_string(), "? HEAD");
    }

    #[test]
    fn test_render_push_response() {
        let resp = PushResponse {
            results: vec![PushResult::Ok("refs/heads/main".into())],
        };
        assert_eq!(resp.to_string(), "ok refs/heads/main\n\n");
    }

    #[test]
    fn test_render_push_error_with_reason() {
        let result = PushResult::Error {
            dst: "refs/heads/main".into(),
            why: Some("Invalid refspec format".into()),
        };
        assert_eq!(result.to_string(), "error refs/heads/main Invalid refspec format\n");
    }

    #[test]
    fn test_render_fetch_response_variants() {
        assert_eq!(FetchResponse::Complete.to_string(), "\n");
        assert_eq!(FetchResponse::Lock("/tmp/repo.lock".into()).to_string(), "lock /tmp/repo.lock\n");
        assert_eq!(FetchResponse::ConnectivityOk.to_string(), "connectivity-ok\n");
    }

    #[test]
    fn test_render_connect_response_variants() {
        assert_eq!(ConnectResponse::Established.to_string(), "\n");
        assert_eq!(ConnectResponse::Fallback.to_string(), "fallback\n");
    }
}
