//! Lazy enumeration of the transitive object closure reachable from a
//! start commit: commit ancestry, then each commit's tree recursively,
//! with deduplication.
use std::collections::{HashSet, VecDeque};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("revision walk failed: {0}")]
    Revwalk(#[source] git2::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    Commit,
    Tree,
}

struct PendingItem {
    oid: git2::Oid,
    provenance: Provenance,
}

/// One open tree context: the tree itself and the index of the next
/// child entry to visit.
struct TreeFrame {
    tree: git2::Oid,
    next: usize,
}

/// Single-threaded, lazy, non-restartable walker over the reachable
/// object closure of a start commit. Each SHA is emitted at most once.
pub struct ObjectWalker<'repo> {
    repo: &'repo git2::Repository,
    revwalk: git2::Revwalk<'repo>,
    visited: HashSet<git2::Oid>,
    pending: VecDeque<PendingItem>,
    tree_stack: Vec<TreeFrame>,
}

impl<'repo> ObjectWalker<'repo> {
    pub fn new(repo: &'repo git2::Repository, start: git2::Oid) -> Result<Self, Error> {
        log::trace!("walk: starting from {start}");
        let mut revwalk = repo.revwalk().map_err(Error::Revwalk)?;
        revwalk.push(start).map_err(Error::Revwalk)?;
        Ok(Self {
            repo,
            revwalk,
            visited: HashSet::new(),
            pending: VecDeque::new(),
            tree_stack: Vec::new(),
        })
    }

    fn mark(&mut self, oid: git2::Oid) -> bool {
        self.visited.insert(oid)
    }

    /// Advance the top tree frame by one entry. Sub-trees are pushed
    /// onto `pending` with `Provenance::Tree` (and will themselves be
    /// pushed onto the tree stack when dequeued); blobs are pushed
    /// directly. Returns `true` if an entry was found at the top frame
    /// (even if it had already been visited and nothing changed).
    fn advance_top_frame(&mut self) -> Option<()> {
        loop {
            let frame = self.tree_stack.last_mut()?;
            let tree = match self.repo.find_tree(frame.tree) {
                Ok(tree) => tree,
                Err(_) => {
                    // Lookup failure: drop this frame and keep walking
                    // the rest of the tree stack, per the documented
                    // tolerance for partial repositories.
                    log::trace!("walk: tree {} missing, skipping", frame.tree);
                    self.tree_stack.pop();
                    continue;
                }
            };
            if frame.next >= tree.len() {
                self.tree_stack.pop();
                continue;
            }
            let entry = tree.get(frame.next).expect("index within bounds");
            frame.next += 1;
            let provenance = match entry.kind() {
                Some(git2::ObjectType::Tree) => Provenance::Tree,
                _ => {
                    // Blob (or any non-tree leaf): emit directly, no
                    // further provenance needed since it has no children.
                    self.pending.push_back(PendingItem {
                        oid: entry.id(),
                        provenance: Provenance::Tree,
                    });
                    return Some(());
                }
            };
            self.pending.push_back(PendingItem {
                oid: entry.id(),
                provenance,
            });
            return Some(());
        }
    }
}

impl<'repo> Iterator for ObjectWalker<'repo> {
    type Item = git2::Oid;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Drain pending first, emitting newly-visited SHAs.
            while let Some(item) = self.pending.pop_front() {
                let is_new = self.mark(item.oid);

                match item.provenance {
                    Provenance::Commit => {
                        if let Ok(commit) = self.repo.find_commit(item.oid) {
                            // Enqueue the root tree; it is emitted (and
                            // its own children walked) like any other
                            // tree once its turn comes up in `pending`.
                            self.pending.push_back(PendingItem {
                                oid: commit.tree_id(),
                                provenance: Provenance::Tree,
                            });
                        } else {
                            log::trace!("walk: commit {} missing, skipping", item.oid);
                        }
                    }
                    Provenance::Tree => {
                        if self.repo.find_tree(item.oid).is_ok() {
                            self.tree_stack.push(TreeFrame {
                                tree: item.oid,
                                next: 0,
                            });
                        }
                        // Not a tree (a blob) or missing: nothing further
                        // to enqueue from it.
                    }
                }

                if is_new {
                    return Some(item.oid);
                }
            }

            // Pending empty: advance the tree stack by one entry.
            if self.advance_top_frame().is_some() {
                continue;
            }

            // Tree stack drained: pull the next commit from the revwalk.
            match self.revwalk.next() {
                Some(Ok(oid)) => {
                    self.pending.push_back(PendingItem {
                        oid,
                        provenance: Provenance::Commit,
                    });
                }
                Some(Err(_)) => {
                    // Revision-walk failure for one step: skip and keep
                    // going, matching the walker's general tolerance for
                    // lookup failures.
                    continue;
                }
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn commit_with_file(
        repo: &git2::Repository,
        parent: Option<&git2::Commit>,
        name: &str,
        content: &[u8],
    ) -> git2::Oid {
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let blob = repo.blob(content).unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        builder.insert(name, blob, 0o100644).unwrap();
        let tree_id = builder.write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parents: Vec<&git2::Commit> = parent.into_iter().collect();
        repo.commit(None, &sig, &sig, "msg", &tree, &parents)
            .unwrap()
    }

    #[test]
    fn test_walk_single_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let oid = commit_with_file(&repo, None, "a.txt", b"hello");

        let walker = ObjectWalker::new(&repo, oid).unwrap();
        let shas: Vec<_> = walker.collect();

        // commit, tree, blob
        assert_eq!(shas.len(), 3);
        assert_eq!(shas[0], oid);
    }

    #[test]
    fn test_walk_deduplicates_shared_blob() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let first = repo.find_commit(commit_with_file(&repo, None, "a.txt", b"same")).unwrap();
        let second = commit_with_file(&repo, Some(&first), "b.txt", b"same");

        let walker = ObjectWalker::new(&repo, second).unwrap();
        let shas: Vec<_> = walker.collect();

        let unique: HashSet<_> = shas.iter().copied().collect();
        assert_eq!(shas.len(), unique.len());
        // 2 commits + 2 trees + 1 shared blob = 5
        assert_eq!(shas.len(), 5);
    }

    #[test]
    fn test_walk_emits_each_sha_once() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let first = repo.find_commit(commit_with_file(&repo, None, "a.txt", b"x")).unwrap();
        let second = commit_with_file(&repo, Some(&first), "a.txt", b"x");

        let walker = ObjectWalker::new(&repo, second).unwrap();
        let shas: Vec<_> = walker.collect();
        let unique: HashSet<_> = shas.iter().copied().collect();
        assert_eq!(shas.len(), unique.len());
    }
}
