//! Byte-level storage behind a credential vault.
//!
//! [`FileStore`] is the real thing: every write goes to a temporary file in the
//! vault's directory, is synced, then renamed over the vault so a reader only
//! ever sees the old or the new contents. [`MemoryStore`] keeps the bytes in
//! memory and can be told to fail writes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// Mode of a vault file. Squid runs its auth helper as the proxy user, which
/// does not own the file, so it must be world-readable. Only hashes are stored.
pub const VAULT_FILE_MODE: u32 = 0o644;
/// Mode given to the vault directory when it has to be created.
pub const VAULT_DIR_MODE: u32 = 0o755;

pub trait VaultStore {
    /// Where the vault lives; used in errors and logs.
    fn location(&self) -> &Path;

    fn exists(&self) -> bool;

    /// Current contents, or `None` when there is no vault.
    fn read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the whole vault. On error the previous contents are untouched.
    fn replace(&mut self, contents: &[u8]) -> io::Result<()>;

    /// Deletes the vault. Returns whether there was anything to delete.
    fn discard(&mut self) -> io::Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn ensure_parent_dir(&self) -> io::Result<()> {
        let parent = self.parent_dir();
        if parent.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(parent)?;
        set_mode(parent, VAULT_DIR_MODE)
    }
}

impl VaultStore for FileStore {
    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn replace(&mut self, contents: &[u8]) -> io::Result<()> {
        self.ensure_parent_dir()?;
        let parent = self.parent_dir();

        // Dropping the temp file on any early return removes it.
        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(contents)?;
        temp.as_file().sync_all()?;
        set_mode(temp.path(), VAULT_FILE_MODE)?;
        temp.persist(&self.path).map_err(|err| err.error)?;

        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
        debug!(path = %self.path.display(), bytes = contents.len(), "vault file replaced");
        Ok(())
    }

    fn discard(&mut self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// In-memory vault storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    location: PathBuf,
    contents: Option<Vec<u8>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            contents: None,
            fail_writes: false,
        }
    }

    pub fn with_contents(location: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: Some(contents.into()),
            ..Self::new(location)
        }
    }

    /// Makes every following `replace`/`discard` fail until turned off.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            ));
        }
        Ok(())
    }
}

impl VaultStore for MemoryStore {
    fn location(&self) -> &Path {
        &self.location
    }

    fn exists(&self) -> bool {
        self.contents.is_some()
    }

    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.contents.clone())
    }

    fn replace(&mut self, contents: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        self.contents = Some(contents.to_vec());
        Ok(())
    }

    fn discard(&mut self) -> io::Result<bool> {
        self.check_writable()?;
        Ok(self.contents.take().is_some())
    }
}
