//! Allow/deny decisions for permission-gated opens.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use fangate_common::types::Verdict;

/// Decides whether an open of `path` may proceed.
///
/// Called only for permission-gated records, on the hot path of a blocked
/// opener, so implementations must not block.
pub trait VerdictPolicy {
    /// Returns the verdict for a resolved path.
    fn decide(&self, path: &Path) -> Verdict;
}

impl<F> VerdictPolicy for F
where
    F: Fn(&Path) -> Verdict,
{
    fn decide(&self, path: &Path) -> Verdict {
        self(path)
    }
}

/// Denies opens of an exact set of paths and allows everything else.
///
/// Paths are compared as raw bytes.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    paths: HashSet<PathBuf>,
}

impl DenyList {
    /// Builds a deny list from configured paths.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            paths: paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
        }
    }
}

impl VerdictPolicy for DenyList {
    fn decide(&self, path: &Path) -> Verdict {
        if self.paths.contains(path) {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }
}
