//! Version Store - Numbered Immutable Build Snapshots
//!
//! A project directory holds `v1`, `v2`, ... version directories plus a
//! `current` pointer to the newest one. The contract (scan, parse trailing
//! integer, ignore non-matching names) lives behind `VersionStore` so a
//! non-filesystem backend can implement the same semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ASSETS_SUBDIR;

pub const METADATA_FILENAME: &str = "version.json";
pub const CURRENT_LINK: &str = "current";

/// Persisted per version directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub previous_version: Option<u32>,
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("cannot access project directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot create version directory {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("legacy migration failed: {0}")]
    Migration(std::io::Error),

    #[error("carry-forward failed: {0}")]
    CarryForward(std::io::Error),

    #[error("cannot write version metadata: {0}")]
    Metadata(std::io::Error),
}

/// Non-fatal: the build is complete even when the pointer cannot be placed.
#[derive(Debug, Error)]
#[error("could not update 'current' pointer: {0}")]
pub struct PointerError(pub String);

pub trait VersionStore {
    /// Highest existing version + 1, or 1 for a fresh project. Gaps in the
    /// sequence are never reused.
    fn next_version(&self, project_dir: &Path) -> Result<u32, VersionError>;

    /// The highest-numbered existing version directory, if any.
    fn latest_version(&self, project_dir: &Path) -> Result<Option<(u32, PathBuf)>, VersionError>;

    /// Allocate and create the next version directory. Creation is
    /// exclusive, so two racing builds cannot adopt the same number.
    fn allocate_next(&self, project_dir: &Path) -> Result<(u32, PathBuf), VersionError>;

    /// One-shot migration of a legacy unversioned layout into `v1`.
    /// Returns whether migration actually ran.
    fn migrate_legacy(&self, project_dir: &Path) -> Result<bool, VersionError>;

    /// Copy assets from the previous version, skipping names the new
    /// version already has. Returns the number copied.
    fn carry_forward(&self, previous_dir: &Path, new_dir: &Path) -> Result<usize, VersionError>;

    fn write_metadata(
        &self,
        version_dir: &Path,
        version: u32,
        previous_version: Option<u32>,
    ) -> Result<(), VersionError>;

    /// Point `current` at the given version, replacing any existing link.
    fn update_current_pointer(&self, project_dir: &Path, version: u32)
        -> Result<(), PointerError>;
}

/// Local-filesystem implementation: versions are `v{n}` directories,
/// `current` is a relative symlink.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsVersionStore;

impl FsVersionStore {
    pub fn version_dir(project_dir: &Path, version: u32) -> PathBuf {
        project_dir.join(format!("v{version}"))
    }

    fn scan_versions(&self, project_dir: &Path) -> Result<Vec<(u32, PathBuf)>, VersionError> {
        if !project_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(project_dir).map_err(|source| VersionError::Scan {
            path: project_dir.to_path_buf(),
            source,
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| VersionError::Scan {
                path: project_dir.to_path_buf(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            // Anything that is not v<integer> is simply not a version.
            if let Some(number) = parse_version_name(&entry.file_name().to_string_lossy()) {
                versions.push((number, entry.path()));
            }
        }
        Ok(versions)
    }
}

fn parse_version_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl VersionStore for FsVersionStore {
    fn next_version(&self, project_dir: &Path) -> Result<u32, VersionError> {
        let versions = self.scan_versions(project_dir)?;
        Ok(versions.iter().map(|(n, _)| *n).max().map_or(1, |max| max + 1))
    }

    fn latest_version(&self, project_dir: &Path) -> Result<Option<(u32, PathBuf)>, VersionError> {
        let versions = self.scan_versions(project_dir)?;
        Ok(versions.into_iter().max_by_key(|(n, _)| *n))
    }

    fn allocate_next(&self, project_dir: &Path) -> Result<(u32, PathBuf), VersionError> {
        fs::create_dir_all(project_dir).map_err(|source| VersionError::Create {
            path: project_dir.to_path_buf(),
            source,
        })?;
        let version = self.next_version(project_dir)?;
        let dir = Self::version_dir(project_dir, version);
        // create_dir, not create_dir_all: if a concurrent build got here
        // first, fail instead of sharing the directory.
        fs::create_dir(&dir).map_err(|source| VersionError::Create {
            path: dir.clone(),
            source,
        })?;
        tracing::info!(version, dir = %dir.display(), "allocated build version");
        Ok((version, dir))
    }

    fn migrate_legacy(&self, project_dir: &Path) -> Result<bool, VersionError> {
        if !project_dir.exists() {
            return Ok(false);
        }
        // Guard: once any version directory exists, migration already
        // happened (or never applies) and must not run again.
        if !self.scan_versions(project_dir)?.is_empty() {
            return Ok(false);
        }

        let legacy_entries: Vec<(std::ffi::OsString, PathBuf)> = fs::read_dir(project_dir)
            .map_err(VersionError::Migration)?
            .filter_map(|e| e.ok())
            .map(|e| (e.file_name(), e.path()))
            .filter(|(name, _)| name.to_string_lossy() != CURRENT_LINK)
            .collect();
        if legacy_entries.is_empty() {
            return Ok(false);
        }

        let v1_dir = Self::version_dir(project_dir, 1);
        tracing::info!(
            from = %project_dir.display(),
            to = %v1_dir.display(),
            "migrating legacy unversioned layout"
        );
        fs::create_dir_all(&v1_dir).map_err(VersionError::Migration)?;

        for (name, path) in legacy_entries {
            // The fresh v1 directory sits inside the legacy directory;
            // never copy it into itself.
            if path == v1_dir {
                continue;
            }
            copy_recursive(&path, &v1_dir.join(name)).map_err(VersionError::Migration)?;
        }

        self.write_metadata(&v1_dir, 1, None)?;
        Ok(true)
    }

    fn carry_forward(&self, previous_dir: &Path, new_dir: &Path) -> Result<usize, VersionError> {
        let prev_assets = previous_dir.join(ASSETS_SUBDIR);
        if !prev_assets.exists() {
            return Ok(0);
        }
        let new_assets = new_dir.join(ASSETS_SUBDIR);
        fs::create_dir_all(&new_assets).map_err(VersionError::CarryForward)?;

        let mut copied = 0;
        for entry in fs::read_dir(&prev_assets).map_err(VersionError::CarryForward)? {
            let entry = entry.map_err(VersionError::CarryForward)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let dest = new_assets.join(entry.file_name());
            // Names already present belong to this build run; the previous
            // version never overwrites them.
            if dest.exists() {
                continue;
            }
            fs::copy(&path, &dest).map_err(VersionError::CarryForward)?;
            copied += 1;
        }

        tracing::info!(copied, from = %prev_assets.display(), "carried forward assets");
        Ok(copied)
    }

    fn write_metadata(
        &self,
        version_dir: &Path,
        version: u32,
        previous_version: Option<u32>,
    ) -> Result<(), VersionError> {
        let metadata = VersionMetadata {
            version,
            created_at: Utc::now(),
            previous_version,
        };
        let body = serde_json::to_string_pretty(&metadata)
            .map_err(|e| VersionError::Metadata(std::io::Error::other(e)))?;
        fs::write(version_dir.join(METADATA_FILENAME), body).map_err(VersionError::Metadata)
    }

    fn update_current_pointer(
        &self,
        project_dir: &Path,
        version: u32,
    ) -> Result<(), PointerError> {
        let link = project_dir.join(CURRENT_LINK);

        // Replace unconditionally; a stale or dangling link must never
        // survive a successful build.
        if let Ok(meta) = link.symlink_metadata() {
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&link)
            } else {
                fs::remove_file(&link)
            };
            removed.map_err(|e| PointerError(e.to_string()))?;
        }

        let target = format!("v{version}");
        make_symlink(&target, &link).map_err(|e| PointerError(e.to_string()))?;
        tracing::info!(target, "updated 'current' pointer");
        Ok(())
    }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symlinks unsupported on this platform"))
}

fn copy_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dest)?;
    }
    Ok(())
}
