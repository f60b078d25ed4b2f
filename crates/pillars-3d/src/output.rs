use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of KITTI point cloud artifacts.
pub const ARTIFACT_EXTENSION: &str = "bin";

/// Outcome of committing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The artifact was written (or replaced) at this path.
    Written(PathBuf),
    /// An artifact already existed at this path and was left untouched.
    Skipped(PathBuf),
}

impl WriteResult {
    /// The destination path.
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written(path) | WriteResult::Skipped(path) => path,
        }
    }

    /// Whether bytes were committed.
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written(_))
    }
}

/// Error types for the output module.
#[derive(Debug, thiserror::Error)]
pub enum WriteError<E = std::io::Error>
where
    E: std::error::Error + 'static,
{
    /// A filesystem operation failed.
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        /// The destination or directory involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The content producer failed part-way through.
    #[error("Failed to produce {}: {source}", path.display())]
    Produce {
        /// The destination that was being written.
        path: PathBuf,
        /// The producer's error.
        source: E,
    },
}

/// Commits artifacts under an output root.
///
/// Content is written to a temporary file next to the destination and renamed over it
/// once complete, so a destination never holds a partial artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputManager {
    root: PathBuf,
}

impl OutputManager {
    /// Create a manager for the given output root. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output root and its parents if needed.
    pub fn ensure_root(&self) -> Result<(), WriteError> {
        std::fs::create_dir_all(&self.root).map_err(|source| WriteError::Io {
            path: self.root.clone(),
            source,
        })
    }

    /// The destination of scene `index` of the source named `stem`: `<root>/<stem>_<index>.bin`.
    pub fn artifact_path(&self, stem: &str, index: usize) -> PathBuf {
        self.root
            .join(format!("{stem}_{index}.{ARTIFACT_EXTENSION}"))
    }

    /// Commit `bytes` to `dest`.
    ///
    /// An existing `dest` is skipped unless `force` is set, in which case it is replaced.
    pub fn write(&self, dest: &Path, bytes: &[u8], force: bool) -> Result<WriteResult, WriteError> {
        self.write_with(dest, force, |writer| writer.write_all(bytes))
            .map_err(|err| match err {
                WriteError::Produce { path, source } => WriteError::Io { path, source },
                other => other,
            })
    }

    /// Commit the output of `produce` to `dest`.
    ///
    /// `produce` is not called when `dest` exists and `force` is unset. If `produce` fails,
    /// the temporary file is removed and `dest` is left as it was.
    pub fn write_with<F, E>(
        &self,
        dest: &Path,
        force: bool,
        produce: F,
    ) -> Result<WriteResult, WriteError<E>>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: std::error::Error + 'static,
    {
        if !force && dest.exists() {
            log::debug!("{} exists, skipping", dest.display());
            return Ok(WriteResult::Skipped(dest.to_path_buf()));
        }

        let io_err = |source: std::io::Error| WriteError::<E>::Io {
            path: dest.to_path_buf(),
            source,
        };

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".pillars-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_err)?;

        let writer: &mut dyn Write = &mut tmp;
        produce(writer).map_err(|source| WriteError::Produce {
            path: dest.to_path_buf(),
            source,
        })?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        let persisted = if force {
            tmp.persist(dest)
        } else {
            tmp.persist_noclobber(dest)
        };

        match persisted {
            Ok(_) => Ok(WriteResult::Written(dest.to_path_buf())),
            // another writer committed the same destination first
            Err(err) if !force && err.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(WriteResult::Skipped(dest.to_path_buf()))
            }
            Err(err) => Err(io_err(err.error)),
        }
    }
}

/// A dataset split of the KITTI directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KittiSplit {
    /// `train/`
    Train,
    /// `val/`
    #[default]
    Val,
}

impl KittiSplit {
    /// Every split, in directory order.
    pub const ALL: [KittiSplit; 2] = [KittiSplit::Train, KittiSplit::Val];

    /// The split's directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            KittiSplit::Train => "train",
            KittiSplit::Val => "val",
        }
    }
}

impl fmt::Display for KittiSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The KITTI dataset tree expected by the PointPillars trainer:
///
/// ```text
/// <data_root>/
/// ├── train/{lidar,label}/
/// └── val/{lidar,label}/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KittiLayout {
    data_root: PathBuf,
}

impl KittiLayout {
    /// Create a layout rooted at `data_root`.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// The dataset root.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// The point cloud directory of a split.
    pub fn lidar_dir(&self, split: KittiSplit) -> PathBuf {
        self.data_root.join(split.as_str()).join("lidar")
    }

    /// The label directory of a split.
    pub fn label_dir(&self, split: KittiSplit) -> PathBuf {
        self.data_root.join(split.as_str()).join("label")
    }

    /// Every directory of the tree.
    pub fn directories(&self) -> Vec<PathBuf> {
        KittiSplit::ALL
            .iter()
            .flat_map(|split| [self.lidar_dir(*split), self.label_dir(*split)])
            .collect()
    }

    /// Create the whole tree, returning the directories.
    pub fn create(&self) -> Result<Vec<PathBuf>, WriteError> {
        let directories = self.directories();
        for dir in &directories {
            std::fs::create_dir_all(dir).map_err(|source| WriteError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(directories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("producer gave up")]
    struct GaveUp;

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[test]
    fn test_artifact_path() {
        let output = OutputManager::new("data/val/lidar");
        assert_eq!(
            output.artifact_path("scan", 3),
            Path::new("data/val/lidar/scan_3.bin")
        );
    }

    #[test]
    fn test_write_then_skip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path().join("lidar"));
        output.ensure_root()?;
        let dest = output.artifact_path("scan", 0);

        let first = output.write(&dest, b"first", false)?;
        assert_eq!(first, WriteResult::Written(dest.clone()));

        let second = output.write(&dest, b"second", false)?;
        assert!(!second.is_written());
        assert_eq!(std::fs::read(&dest)?, b"first");
        Ok(())
    }

    #[test]
    fn test_force_overwrites() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path());
        let dest = output.artifact_path("scan", 1);

        output.write(&dest, b"old", false)?;
        let res = output.write(&dest, b"new contents", true)?;
        assert!(res.is_written());
        assert_eq!(std::fs::read(&dest)?, b"new contents");
        assert!(temp_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_producer_leaves_no_artifact() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path());
        let dest = output.artifact_path("scan", 0);

        let res = output.write_with(&dest, false, |writer| {
            writer.write_all(b"half of a record").map_err(|_| GaveUp)?;
            Err(GaveUp)
        });
        assert!(matches!(res, Err(WriteError::Produce { .. })));
        assert!(!dest.exists());
        assert!(temp_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_forced_producer_keeps_previous() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path());
        let dest = output.artifact_path("scan", 0);
        output.write(&dest, b"previous", false)?;

        let res = output.write_with(&dest, true, |writer| {
            writer.write_all(b"partial").map_err(|_| GaveUp)?;
            Err(GaveUp)
        });
        assert!(res.is_err());
        assert_eq!(std::fs::read(&dest)?, b"previous");
        Ok(())
    }

    #[test]
    fn test_skip_does_not_call_producer() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path());
        let dest = output.artifact_path("scan", 0);
        output.write(&dest, b"kept", false)?;

        let mut called = false;
        let res = output.write_with(&dest, false, |_| -> Result<(), GaveUp> {
            called = true;
            Ok(())
        })?;
        assert_eq!(res, WriteResult::Skipped(dest));
        assert!(!called);
        Ok(())
    }

    #[test]
    fn test_kitti_layout() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let layout = KittiLayout::new(dir.path().join("data"));
        let created = layout.create()?;

        assert_eq!(created.len(), 4);
        assert!(created.iter().all(|d| d.is_dir()));
        assert_eq!(
            layout.lidar_dir(KittiSplit::Val),
            dir.path().join("data").join("val").join("lidar")
        );
        assert_eq!(KittiSplit::default().to_string(), "val");
        Ok(())
    }
}
