//! [`FileSystem`] over a local directory.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ignore::WalkBuilder;
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::fs::{FileReader, FileSystem, WalkEntry, WALK_CHANNEL_SIZE};
use crate::streaming::protocol::Stat;

type WalkSender = mpsc::Sender<Result<WalkEntry>>;

#[derive(Debug, Clone)]
pub struct LocalFs {
    root: Arc<PathBuf>,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    fn walk(&self) -> mpsc::Receiver<Result<WalkEntry>> {
        let root = self.root.clone();
        spawn_walker(move |tx| walk_blocking(&root, tx))
    }

    async fn open(&self, path: &str) -> io::Result<FileReader> {
        let file = tokio::fs::File::open(self.root.join(path)).await?;
        Ok(Box::new(file))
    }
}

/// Run a blocking walk on the blocking pool, streaming into the returned
/// receiver.
///
/// The stream only closes cleanly when `work` returns. A walker that panics
/// ends the stream with a [`SyncError::Task`] item, so a dead walk is never
/// mistaken for the end of the tree.
fn spawn_walker<W>(work: W) -> mpsc::Receiver<Result<WalkEntry>>
where
    W: FnOnce(&WalkSender) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(WALK_CHANNEL_SIZE);
    let walker_tx = tx.clone();
    let walker = tokio::task::spawn_blocking(move || work(&walker_tx));

    tokio::spawn(async move {
        if let Err(err) = walker.await {
            tracing::error!(error = %err, "walker died");
            // Receiver may already be gone; nothing left to tell
            let _ = tx.send(Err(SyncError::Task(err))).await;
        }
    });

    rx
}

fn walk_blocking(root: &Path, tx: &WalkSender) {
    // No filtering here: inclusion is decided before a tree reaches the sender
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();
    let mut hardlinks = Hardlinks::default();

    for result in walker {
        let item = match result {
            Ok(dent) if dent.depth() == 0 => continue,
            Ok(dent) => {
                let full = dent.path();
                let rel = relative_path(root, full);
                build_stat(full, rel.clone(), &mut hardlinks)
                    .map(|stat| WalkEntry {
                        path: rel,
                        stat: Some(stat),
                    })
                    .map_err(|source| SyncError::Walk {
                        path: full.to_path_buf(),
                        source,
                    })
            }
            Err(err) => Err(SyncError::Walk {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, err),
            }),
        };

        let failed = item.is_err();
        if tx.blocking_send(item).is_err() || failed {
            // Receiver gone (session over) or walk aborted
            return;
        }
    }
}

fn relative_path(root: &Path, full: &Path) -> String {
    let rel = full.strip_prefix(root).unwrap_or(full);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// First path seen for each multiply-linked inode, keyed by (dev, ino).
#[derive(Default)]
struct Hardlinks {
    first: HashMap<(u64, u64), String>,
}

#[cfg_attr(not(unix), allow(dead_code))]
impl Hardlinks {
    /// Returns the earlier path if this inode was already walked.
    fn link_source(&mut self, dev: u64, ino: u64, path: &str) -> Option<String> {
        match self.first.get(&(dev, ino)) {
            Some(source) => Some(source.clone()),
            None => {
                self.first.insert((dev, ino), path.to_string());
                None
            }
        }
    }
}

/// Nanoseconds since the epoch, clamped to the range of `i64`.
fn mtime_nanos(secs: i64, nsec: i64) -> i64 {
    secs.checked_mul(1_000_000_000)
        .and_then(|ns| ns.checked_add(nsec))
        .unwrap_or(if secs < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(unix)]
fn build_stat(full: &Path, path: String, hardlinks: &mut Hardlinks) -> io::Result<Stat> {
    use crate::streaming::protocol::{S_IFBLK, S_IFCHR};
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::symlink_metadata(full)?;
    let mut stat = Stat {
        path,
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.size(),
        mod_time: mtime_nanos(meta.mtime(), meta.mtime_nsec()),
        ..Default::default()
    };

    if stat.is_symlink() {
        stat.linkname = std::fs::read_link(full)?.to_string_lossy().into_owned();
    } else if !stat.is_dir() && meta.nlink() > 1 {
        if let Some(source) = hardlinks.link_source(meta.dev(), meta.ino(), &stat.path) {
            stat.linkname = source;
        }
    }

    let file_type = stat.file_type();
    if file_type == S_IFCHR || file_type == S_IFBLK {
        let (major, minor) = dev_numbers(meta.rdev());
        stat.devmajor = major;
        stat.devminor = minor;
    }

    // Best effort: unreadable attributes are left out
    if let Ok(names) = xattr::list(full) {
        for name in names {
            if let Ok(Some(value)) = xattr::get(full, &name) {
                stat.xattrs
                    .insert(name.to_string_lossy().into_owned(), value.into());
            }
        }
    }

    Ok(stat)
}

#[cfg(not(unix))]
fn build_stat(full: &Path, path: String, _hardlinks: &mut Hardlinks) -> io::Result<Stat> {
    use crate::streaming::protocol::{S_IFDIR, S_IFLNK, S_IFREG};

    let meta = std::fs::symlink_metadata(full)?;
    let ft = meta.file_type();
    let mode = if ft.is_dir() {
        S_IFDIR | 0o755
    } else if ft.is_symlink() {
        S_IFLNK | 0o777
    } else if meta.permissions().readonly() {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o644
    };
    let mod_time = match meta.modified()?.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos()).map_or(i64::MIN, |ns| -ns),
    };

    let mut stat = Stat {
        path,
        mode,
        size: meta.len(),
        mod_time,
        ..Default::default()
    };
    if ft.is_symlink() {
        stat.linkname = std::fs::read_link(full)?.to_string_lossy().into_owned();
    }
    Ok(stat)
}

/// Split a device id into (major, minor) with the platform's own layout.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
))]
fn dev_numbers(rdev: u64) -> (u64, u64) {
    let dev = rdev as libc::dev_t;
    // Safe functions in current libc, unsafe in older releases
    #[allow(unused_unsafe)]
    let (major, minor) = unsafe { (libc::major(dev), libc::minor(dev)) };
    (major as u64, minor as u64)
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))
))]
fn dev_numbers(_rdev: u64) -> (u64, u64) {
    (0, 0)
}
