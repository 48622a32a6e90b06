//! Glue: coordinates the walker, repo access, and store within
//! transactions; implements the business semantics behind each
//! protocol command.
use thiserror::Error;

use crate::codec::{Capabilities, FetchResponse, ListResponse, ListedRef, OptionResponse, PushResult};
use crate::repo::{Direction, RepoAccess};
use crate::store::{ObjectKind, RefClass, Store};
use crate::walker::ObjectWalker;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error(transparent)]
    Repo(#[from] crate::repo::Error),
    #[error(transparent)]
    Walker(#[from] crate::walker::Error),
}

/// The capability set this engine advertises: `push`, `fetch`,
/// `progress`, `option`. Everything else is false; no refspec template
/// is advertised.
pub fn capabilities() -> Capabilities {
    Capabilities {
        enabled: vec!["push", "fetch", "progress", "option"],
        ..Default::default()
    }
}

pub struct Engine {
    store: Store,
    repo: RepoAccess,
}

impl Engine {
    pub fn new(store: Store, repo: RepoAccess) -> Self {
        Self { store, repo }
    }

    /// Enumerate refs. A fresh database (schema present, no rows) behaves
    /// as an empty repository rather than an error. `for_push` does not
    /// currently change the projection: this engine advertises no
    /// refspec template, so push and fetch see the same ref set.
    pub fn list(&self, _for_push: bool) -> Result<ListResponse, Error> {
        let refs = self.store.iterate_refs()?;
        Ok(ListResponse {
            refs: refs
                .into_iter()
                .map(|r| ListedRef::Regular { sha: r.sha, name: r.name })
                .collect(),
        })
    }

    /// Restore every stored object into the local repository. Reads all
    /// objects of every kind (coarse but simple — see design notes on
    /// selective fetch as a natural refinement) rather than only those
    /// reachable from the requested ref.
    pub fn fetch(&self) -> Result<FetchResponse, Error> {
        log::debug!("fetch: beginning transaction");
        self.store.begin()?;
        let result = self.fetch_inner();
        match &result {
            Ok(_) => self.store.commit()?,
            Err(e) => {
                log::debug!("fetch: rolling back after error: {e}");
                self.store.rollback()?;
            }
        }
        result
    }

    fn fetch_inner(&self) -> Result<FetchResponse, Error> {
        let mut written_count = 0u64;
        for kind in ObjectKind::ALL {
            for sha in self.store.iterate_objects_by_kind(kind)? {
                let Some((stored_kind, bytes)) = self.store.get_object(&sha)? else {
                    continue;
                };
                let written = self.repo.put_object(stored_kind, &bytes)?;
                if written != sha {
                    return Err(Error::Repo(crate::repo::Error::Write(git2::Error::from_str(
                        "sha mismatch after write",
                    ))));
                }
                written_count += 1;
                log::trace!("fetch: restored {kind} {written}");
            }
        }
        log::debug!("fetch: restored {written_count} objects");
        Ok(FetchResponse::Complete)
    }

    /// Transfer the object closure of `<src>` into the store and point
    /// `<dst>` at it.
    pub fn push(&self, spec: &str) -> PushResult {
        log::debug!("push: {spec}");
        let refspec = match self.repo.parse_refspec(spec, Direction::Push) {
            Ok(r) => r,
            Err(_) => {
                return PushResult::Error {
                    dst: spec.to_string(),
                    why: Some("Invalid refspec format".to_string()),
                }
            }
        };

        match self.push_inner(&refspec.src, &refspec.dst) {
            Ok(()) => PushResult::Ok(refspec.dst),
            Err(PushFailure::Resolve) => {
                log::debug!("push: failed to resolve `{}`, rolling back", refspec.src);
                let _ = self.store.rollback();
                PushResult::Error {
                    dst: refspec.dst,
                    why: Some("Failed to resolve reference".to_string()),
                }
            }
            Err(PushFailure::Other(e)) => {
                log::debug!("push: {e}, rolling back");
                let _ = self.store.rollback();
                PushResult::Error {
                    dst: refspec.dst,
                    why: Some(e.to_string()),
                }
            }
        }
    }

    fn push_inner(&self, src: &str, dst: &str) -> Result<(), PushFailure> {
        self.store.begin().map_err(|e| PushFailure::Other(e.into()))?;

        let sha = self
            .repo
            .resolve_ref(src)
            .map_err(|_| PushFailure::Resolve)?;

        let oid = git2::Oid::from_str(&sha)
            .map_err(|_| PushFailure::Resolve)?;
        let walker = ObjectWalker::new(self.repo.git2_repository(), oid)
            .map_err(|e| PushFailure::Other(e.into()))?;

        let mut transferred = 0u64;
        for reachable in walker {
            let reachable_sha = reachable.to_string();
            if self
                .store
                .has_object(&reachable_sha)
                .map_err(|e| PushFailure::Other(e.into()))?
            {
                continue;
            }
            let (kind, bytes) = self
                .repo
                .get_object(&reachable_sha)
                .map_err(|e| PushFailure::Other(e.into()))?;
            self.store
                .put_object(&reachable_sha, kind, &bytes)
                .map_err(|e| PushFailure::Other(e.into()))?;
            transferred += 1;
            log::trace!("push: stored {kind} {reachable_sha}");
        }
        log::debug!("push: transferred {transferred} new objects to `{dst}`");

        self.store
            .put_ref(dst, &sha, RefClass::Branch)
            .map_err(|e| PushFailure::Other(e.into()))?;
        self.store.commit().map_err(|e| PushFailure::Other(e.into()))?;

        Ok(())
    }

    /// `verbosity` is acknowledged; `progress`, `timeout`, and `depth`
    /// are recognized but unsupported; anything else is silently
    /// accepted and ignored.
    pub fn option(&self, name: &str, _value: &str) -> OptionResponse {
        match name {
            "verbosity" => OptionResponse::Ok,
            "progress" | "timeout" | "depth" => OptionResponse::Unsupported,
            _ => OptionResponse::Ok,
        }
    }
}

enum PushFailure {
    Resolve,
    Other(Error),
}
