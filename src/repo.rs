//! Bounded capability surface over the local working repository:
//! ref resolution, object read/write, and refspec parsing.
use std::path::Path;
use std::str::FromStr;
use std::sync::Once;

use thiserror::Error;

use crate::store::ObjectKind;

static GIT_INIT: Once = Once::new();

#[derive(Debug, Error)]
pub enum Error {
    /// Repository could not be opened.
    #[error("failed to open repository: {0}")]
    Open(#[source] git2::Error),
    /// A named reference could not be resolved.
    #[error("failed to resolve reference `{0}`")]
    Resolve(String),
    /// An object could not be read.
    #[error("failed to read object `{0}`: {1}")]
    Lookup(String, #[source] git2::Error),
    /// An object could not be written.
    #[error("failed to write object: {0}")]
    Write(#[source] git2::Error),
    /// The object database reported a kind this core does not model.
    #[error("unrecognized object kind `{0}`")]
    InvalidObjectType(String),
    /// A refspec did not match `[+]src:dst` or a lone `src`.
    #[error("invalid refspec `{0}`")]
    RefspecParse(String),
}

/// Selects which side of a refspec's semantics apply. Only `Push` is
/// exercised by this core's engine; `Fetch` is modeled for completeness
/// of the component contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Fetch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub src: String,
    pub dst: String,
    pub force: bool,
}

/// Idempotent, process-wide libgit2 setup. Beyond what `git2` already
/// performs lazily on first use, this disables the repository-ownership
/// check that otherwise rejects repositories not owned by the current
/// uid — a common situation when this helper runs inside a container or
/// under `sudo`.
fn ensure_git_initialized() {
    GIT_INIT.call_once(|| unsafe {
        git2::opts::set_verify_owner_validation(false).ok();
    });
}

pub struct RepoAccess {
    repo: git2::Repository,
}

impl RepoAccess {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        ensure_git_initialized();
        let repo = git2::Repository::open(path).map_err(Error::Open)?;
        Ok(Self { repo })
    }

    /// Resolve `name` to the 40-hex SHA it points to, peeling tags and
    /// following refs. Accepts a ref name, a short or long SHA, or
    /// anything else `git2::Repository::revparse_single` understands.
    pub fn resolve_ref(&self, name: &str) -> Result<String, Error> {
        let obj = self
            .repo
            .revparse_single(name)
            .map_err(|_| Error::Resolve(name.to_string()))?;
        let commit = obj.peel_to_commit().map_err(|_| Error::Resolve(name.to_string()))?;
        let sha = commit.id().to_string();
        log::debug!("resolved `{name}` to {sha}");
        Ok(sha)
    }

    /// Read an object's declared kind and raw, uncompressed, post-header
    /// payload bytes.
    pub fn get_object(&self, sha: &str) -> Result<(ObjectKind, Vec<u8>), Error> {
        let oid = git2::Oid::from_str(sha).map_err(|e| Error::Lookup(sha.to_string(), e))?;
        let odb = self.repo.odb().map_err(|e| Error::Lookup(sha.to_string(), e))?;
        let obj = odb.read(oid).map_err(|e| Error::Lookup(sha.to_string(), e))?;
        let kind = match obj.kind() {
            git2::ObjectType::Blob => ObjectKind::Blob,
            git2::ObjectType::Tree => ObjectKind::Tree,
            git2::ObjectType::Commit => ObjectKind::Commit,
            git2::ObjectType::Tag => ObjectKind::Tag,
            other => return Err(Error::InvalidObjectType(format!("{other:?}"))),
        };
        Ok((kind, obj.data().to_vec()))
    }

    /// Write a loose object of the given kind, returning the resulting SHA.
    pub fn put_object(&self, kind: ObjectKind, bytes: &[u8]) -> Result<String, Error> {
        let git_kind = match kind {
            ObjectKind::Blob => git2::ObjectType::Blob,
            ObjectKind::Tree => git2::ObjectType::Tree,
            ObjectKind::Commit => git2::ObjectType::Commit,
            ObjectKind::Tag => git2::ObjectType::Tag,
        };
        let odb = self.repo.odb().map_err(Error::Write)?;
        let oid = odb.write(git_kind, bytes).map_err(Error::Write)?;
        Ok(oid.to_string())
    }

    /// Access the underlying `git2` handle, for components (like the
    /// object walker) that need direct revwalk/tree access this bounded
    /// surface doesn't otherwise expose.
    pub fn git2_repository(&self) -> &git2::Repository {
        &self.repo
    }

    /// Parse `[+]src:dst` or a lone `src` (no destination).
    pub fn parse_refspec(&self, text: &str, _direction: Direction) -> Result<Refspec, Error> {
        let Some((src, dst)) = text.split_once(':') else {
            if text.is_empty() {
                return Err(Error::RefspecParse(text.to_string()));
            }
            return Ok(Refspec {
                src: text.to_string(),
                dst: text.to_string(),
                force: false,
            });
        };
        if dst.is_empty() || dst.contains(':') || src.is_empty() {
            return Err(Error::RefspecParse(text.to_string()));
        }
        let (src, force) = match src.strip_prefix('+') {
            Some(rest) => (rest, true),
            None => (src, false),
        };
        Ok(Refspec {
            src: src.to_string(),
            dst: dst.to_string(),
            force,
        })
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "fetch" => Ok(Self::Fetch),
            other => Err(Error::RefspecParse(other.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn init_repo(dir: &std::path::Path) -> (git2::Repository, git2::Oid) {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_id = {
            let mut builder = repo.treebuilder(None).unwrap();
            let blob = repo.blob(b"# Test Repository\n").unwrap();
            builder.insert("README.md", blob, 0o100644).unwrap();
            builder.write().unwrap()
        };
        let oid = {
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap()
        };
        (repo, oid)
    }

    #[test]
    fn test_resolve_and_read_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, oid) = init_repo(dir.path());

        let access = RepoAccess::open(dir.path()).unwrap();
        let resolved = access.resolve_ref("HEAD").unwrap();
        assert_eq!(resolved, oid.to_string());

        let (kind, bytes) = access.get_object(&resolved).unwrap();
        assert_eq!(kind, ObjectKind::Commit);
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_put_object_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let access = RepoAccess::open(dir.path()).unwrap();

        let sha = access.put_object(ObjectKind::Blob, b"hello world").unwrap();
        let (kind, bytes) = access.get_object(&sha).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn test_parse_refspec_force() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let access = RepoAccess::open(dir.path()).unwrap();

        let spec = access
            .parse_refspec("+refs/heads/main:refs/heads/main", Direction::Push)
            .unwrap();
        assert_eq!(spec.src, "refs/heads/main");
        assert_eq!(spec.dst, "refs/heads/main");
        assert!(spec.force);
    }

    #[test]
    fn test_parse_refspec_invalid() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let access = RepoAccess::open(dir.path()).unwrap();

        assert!(access.parse_refspec("invalid::refspec", Direction::Push).is_err());
    }
}
