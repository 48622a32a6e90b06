//! `sqlite://` remote URL parsing.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UrlError {
    /// Total length, NUL-byte, or general syntax violation.
    #[error("invalid url format")]
    InvalidFormat,
    /// Unsupported URL scheme.
    #[error("unsupported scheme: expected `sqlite://`")]
    UnsupportedScheme,
    /// Path component failed length or traversal validation.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// A parsed `sqlite://` remote URL.
///
/// Two forms are accepted:
///
/// * host form — `sqlite://<db-filename>`, a single path component with no
///   leading slash.
/// * path form — `sqlite:///<absolute-path>`, an explicit absolute path.
///
/// The ambiguous form `sqlite://host/path` (both a host *and* further path
/// segments) is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    /// Normalized, traversal-checked path to the database file.
    pub path: String,
}

impl Url {
    pub const SCHEME: &'static str = "sqlite";
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", Self::SCHEME, self.path)
    }
}

impl FromStr for Url {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 2048 || s.contains('\0') {
            return Err(UrlError::InvalidFormat);
        }
        let rest = s.strip_prefix("sqlite://").ok_or(UrlError::UnsupportedScheme)?;

        // Disambiguate host-form (`sqlite://name`) from path-form
        // (`sqlite:///abs/path`). A leading `/` means path-form; anything
        // else with more than one component after the host is ambiguous.
        let (raw_path, is_path_form) = if let Some(abs) = rest.strip_prefix('/') {
            (abs, true)
        } else {
            if rest.contains('/') {
                // `sqlite://host/path` — neither pure host-form nor pure
                // path-form. Reject as ambiguous.
                return Err(UrlError::InvalidFormat);
            }
            (rest, false)
        };

        if raw_path.is_empty() || raw_path.len() > 1024 || raw_path == "/" {
            return Err(UrlError::InvalidPath(raw_path.to_string()));
        }

        let path = normalize(raw_path, is_path_form)?;

        Ok(Url { path })
    }
}

/// Normalize `.`/`..` components, rejecting traversal past the root.
fn normalize(raw: &str, is_path_form: bool) -> Result<String, UrlError> {
    let mut components: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if components.pop().is_none() {
                    return Err(UrlError::InvalidPath(raw.to_string()));
                }
            }
            other => components.push(other),
        }
    }
    if components.is_empty() {
        return Err(UrlError::InvalidPath(raw.to_string()));
    }
    let joined = components.join("/");
    if is_path_form {
        Ok(format!("/{joined}"))
    } else {
        Ok(joined)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_host_form() {
        let url: Url = "sqlite://repo.db".parse().unwrap();
        assert_eq!(url.path, "repo.db");
    }

    #[test]
    fn test_path_form() {
        let url: Url = "sqlite:///var/lib/repo.db".parse().unwrap();
        assert_eq!(url.path, "/var/lib/repo.db");
    }

    #[test]
    fn test_ambiguous_form_rejected() {
        assert!("sqlite://host/path".parse::<Url>().is_err());
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!("git://repo.db".parse::<Url>().is_err());
    }

    #[test]
    fn test_nul_byte_rejected() {
        assert!("sqlite://test\0.db".parse::<Url>().is_err());
    }

    #[test]
    fn test_lone_slash_path_rejected() {
        assert!("sqlite:///".parse::<Url>().is_err());
    }

    #[test]
    fn test_traversal_rejected() {
        assert!("sqlite:///../../etc/passwd".parse::<Url>().is_err());
    }

    #[test]
    fn test_traversal_within_bounds_normalizes() {
        let url: Url = "sqlite:///a/./b/../c".parse().unwrap();
        assert_eq!(url.path, "/a/c");
    }

    #[test]
    fn test_empty_rejected() {
        assert!("".parse::<Url>().is_err());
    }
}
