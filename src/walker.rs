use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::error::{Error, Result};

/// File formats accepted as manuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualFormat {
    Pdf,
    Text,
    Markdown,
}

impl ManualFormat {
    /// Format for a file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(ManualFormat::Pdf),
            "txt" => Some(ManualFormat::Text),
            "md" | "markdown" => Some(ManualFormat::Markdown),
            _ => None,
        }
    }
}

/// A manual found in the manuals directory.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the manuals directory, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub format: ManualFormat,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

impl DiscoveredFile {
    /// File name without directories, e.g. `Claims Manual.pdf`.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Recursively discover manuals under `root`, sorted by relative path.
///
/// Hidden files and directories (names starting with `.`) are skipped, as
/// are files whose extension is not a [`ManualFormat`].
pub fn discover_manuals(root: &Path) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        return Err(Error::NotFound {
            kind: "manuals directory",
            name: root.display().to_string(),
        });
    }
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            // Broken links are skipped; linked directories are not followed.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_file()
                && let Some(format) = ManualFormat::from_path(&path)
            {
                results.push(make_discovered(root, &path, &resolved, format)?);
            }
        } else if file_type.is_file()
            && let Some(format) = ManualFormat::from_path(&path)
        {
            let abs = path.canonicalize()?;
            results.push(make_discovered(root, &path, &abs, format)?);
        }
    }

    Ok(())
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
    format: ManualFormat,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let mtime = std::fs::metadata(absolute_path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        format,
        mtime,
    })
}
