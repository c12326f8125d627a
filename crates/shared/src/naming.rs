//! Output folder naming and source folder archiving.
//!
//! Neither operation ever overwrites: when a target name is taken, `_1`,
//! `_2`, ... is appended until a free name is found.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TITLE_PUNCTUATION: &str =
    "《》\u{201C}\u{201D}\u{2018}\u{2019}「」【】()（）[]［］<>，。！？；：、,.\"'!?;:~`";
const INVALID_FILENAME_CHARS: &str = "<>:\"/\\|?*";
const MAX_TITLE_CHARS: usize = 100;
pub const UNTITLED: &str = "未命名";

/// Turns a generated title into a folder name: outer punctuation stripped,
/// path-hostile characters removed, at most 100 characters.
pub fn safe_title(title: &str) -> String {
    let trimmed = title
        .trim()
        .trim_matches(|c: char| TITLE_PUNCTUATION.contains(c));

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !INVALID_FILENAME_CHARS.contains(*c) && !c.is_control())
        .collect();

    let truncated: String = cleaned.trim().chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim_end();

    if truncated.is_empty() {
        UNTITLED.to_string()
    } else {
        truncated.to_string()
    }
}

/// First path among `base`, `base_1`, `base_2`, ... that does not exist yet
pub fn unique_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    (1u32..)
        .map(|n| {
            let mut name = OsString::from(base.as_os_str());
            name.push(format!("_{}", n));
            PathBuf::from(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| base.to_path_buf())
}

/// Same as [`unique_path`] but numbers the file stem, keeping the extension
pub fn unique_file_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let first = dir.join(format!("{}.{}", stem, extension));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{}_{}.{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Creates a fresh folder for `title` under `root`
pub fn create_output_folder(root: &Path, title: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let path = unique_path(&root.join(safe_title(title)));
    fs::create_dir(&path)?;
    Ok(path)
}

/// Moves `source` into `processed_root`, returning where it landed
pub fn archive_folder(source: &Path, processed_root: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(processed_root)?;

    let name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot archive {}", source.display()),
        )
    })?;
    let target = unique_path(&processed_root.join(name));

    if let Err(e) = fs::rename(source, &target) {
        tracing::debug!(
            "Rename {} -> {} failed ({}), copying instead",
            source.display(),
            target.display(),
            e
        );
        move_by_copy(source, &target)?;
    }

    Ok(target)
}

/// Copies `source` to `target`, then deletes `source`. A failed copy
/// removes whatever reached `target`, leaving `source` untouched.
fn move_by_copy(source: &Path, target: &Path) -> io::Result<()> {
    if let Err(e) = copy_dir_recursive(source, target) {
        if let Err(cleanup) = fs::remove_dir_all(target) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove partial copy {}: {}",
                    target.display(),
                    cleanup
                );
            }
        }
        return Err(e);
    }
    fs::remove_dir_all(source)
}

fn copy_dir_recursive(source: &Path, target: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let dest = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest)?;
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot copy special file {}", entry.path().display()),
            ));
        }
    }
    Ok(())
}

// Links are recreated as links, never followed.
#[cfg(unix)]
fn copy_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, dest)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    if link.is_dir() {
        fs::create_dir_all(dest)
    } else {
        fs::copy(link, dest).map(|_| ())
    }
}
