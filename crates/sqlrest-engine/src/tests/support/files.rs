//! Filesystem double counting SQL file reads.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};

use crate::source::{OsFileSystem, SqlFileSystem};

/// Delegates to the real filesystem and counts reads.
#[derive(Debug, Default)]
pub struct CountingFileSystem {
    reads: AtomicUsize,
}

impl CountingFileSystem {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SqlFileSystem for CountingFileSystem {
    fn canonicalize(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf> {
        OsFileSystem.canonicalize(path)
    }

    fn read_to_string(&self, path: &Utf8Path) -> io::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        OsFileSystem.read_to_string(path)
    }
}
