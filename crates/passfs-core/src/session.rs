//! Per-mount session state.
//!
//! A [`SessionState`] is built once, before the filesystem is mounted, and
//! shared read-only with every operation handler through an `Arc`. It holds
//! the canonical backing root and the transform key.

use crate::error::{PassResult, SessionError};
use crate::path::{PathTranslator, VirtualPath};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

/// Opaque per-mount key reserved for a content transformation hook.
///
/// No operation reads it today. The value is wiped from memory on drop and
/// never appears in `Debug` output.
#[derive(Clone, Default)]
pub struct TransformKey(Zeroizing<String>);

impl TransformKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// Returns the key material.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Zeroizing<String>> for TransformKey {
    fn from(key: Zeroizing<String>) -> Self {
        Self(key)
    }
}

impl fmt::Debug for TransformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransformKey(<redacted>)")
    }
}

/// Immutable configuration of one mount.
#[derive(Debug)]
pub struct SessionState {
    translator: PathTranslator,
    transform_key: TransformKey,
}

impl SessionState {
    /// Creates the session for a backing root.
    ///
    /// The root is canonicalized here, so symlinks and relative components
    /// are resolved exactly once and translation stays a pure concatenation.
    ///
    /// # Errors
    ///
    /// Fails if the root cannot be resolved or is not a directory.
    pub fn new(root: impl AsRef<Path>, transform_key: TransformKey) -> Result<Self, SessionError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|source| SessionError::Resolve {
            path: root.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(SessionError::NotADirectory(canonical));
        }

        info!(root = %canonical.display(), "Mount session created");
        Ok(Self {
            translator: PathTranslator::new(canonical),
            transform_key,
        })
    }

    /// Replaces the translator, keeping the root.
    #[must_use]
    pub fn with_translator(mut self, translator: PathTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// The canonical backing root.
    pub fn root_directory(&self) -> &Path {
        self.translator.root()
    }

    pub fn transform_key(&self) -> &TransformKey {
        &self.transform_key
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    /// Translates a virtual path into its backing path.
    pub fn translate(&self, path: &VirtualPath) -> PassResult<PathBuf> {
        self.translator.translate(path)
    }
}
