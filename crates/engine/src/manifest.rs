/// # Manifest - SSTable File Tracking
///
/// Tracks the set of live SSTable file ids so the engine can correctly
/// reconstruct its SSTable list after a restart without re-scanning or
/// guessing at directory order.
///
/// Unlike an older two-level (L0/L1) design, SSTables here form a single flat
/// list — there is no level assignment to track. Size-tiered compaction (the
/// `compaction` crate) decides which files to merge purely from their ids and
/// metadata, so the manifest only needs to remember "which ids currently
/// exist", newest first.
///
/// ## File Format
///
/// One numeric SSTable id per line:
///
/// ```text
/// 42
/// 17
/// 3
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// The manifest is rewritten atomically: write to a `.tmp` file, fsync, then
/// rename over the existing manifest.
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the SST directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// In-memory representation of the manifest: the set of live SSTable ids.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    /// Live SSTable file ids, newest first.
    pub ids: Vec<u64>,
}

impl Manifest {
    /// Loads an existing manifest from `sst_dir/MANIFEST`, or creates an
    /// empty one if the file does not exist.
    pub fn load_or_create(sst_dir: &Path) -> Result<Self> {
        let path = sst_dir.join(MANIFEST_FILENAME);

        if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("failed to open manifest at {}", path.display()))?;
            let reader = BufReader::new(file);
            let mut ids = Vec::new();

            for (line_num, line) in reader.lines().enumerate() {
                let line = line
                    .with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                let id: u64 = trimmed.parse().with_context(|| {
                    format!("manifest line {}: not a valid id: {}", line_num + 1, trimmed)
                })?;
                ids.push(id);
            }

            Ok(Self { path, ids })
        } else {
            Ok(Self {
                path,
                ids: Vec::new(),
            })
        }
    }

    /// Persists the current manifest state to disk (temp file + fsync + rename).
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| {
                    format!("failed to create manifest tmp at {}", tmp_path.display())
                })?;
            Self::write_manifest_contents(&mut f, &self.ids)?;
            f.flush()?;
            f.sync_all()?;
        }

        if fs::rename(&tmp_path, &self.path).is_err() {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
                .with_context(|| format!("failed to open manifest at {}", self.path.display()))?;
            Self::write_manifest_contents(&mut f, &self.ids)?;
            f.flush()?;
            f.sync_all()?;
            let _ = fs::remove_file(&tmp_path);
        }

        Ok(())
    }

    fn write_manifest_contents(f: &mut File, ids: &[u64]) -> Result<()> {
        writeln!(f, "# RiptideKV SSTable Manifest")?;
        writeln!(f, "# One file id per line, newest first")?;
        for id in ids {
            writeln!(f, "{}", id)?;
        }
        Ok(())
    }

    /// Inserts a new id at the front (newest first). Does not save to disk.
    ///
    /// Used for ids that genuinely are the newest layer, e.g. a freshly
    /// flushed SSTable.
    pub fn add(&mut self, id: u64) {
        self.ids.insert(0, id);
    }

    /// Inserts a new id at the back (oldest first). Does not save to disk.
    ///
    /// A compaction output carries the oldest data among the files it
    /// replaces — even though its file id is numerically the largest seen so
    /// far — so it must land at the oldest position in the manifest, not the
    /// newest, or recovery (which trusts manifest order, not file id order)
    /// would treat it as shadowing genuinely newer SSTables.
    pub fn add_oldest(&mut self, id: u64) {
        self.ids.push(id);
    }

    /// Removes the given ids from the manifest. Does not save to disk.
    pub fn remove(&mut self, removed: &[u64]) {
        self.ids.retain(|id| !removed.contains(id));
    }
}
