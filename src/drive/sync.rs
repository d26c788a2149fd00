use super::{FileStore, RemoteFile};
use crate::config::SyncConfig;
use crate::error::Result;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What to pull from one remote folder and where to put it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub folder_name: String,
    /// suffixes such as `.tif`; empty keeps every file
    pub extensions: Vec<String>,
    pub name_contains: Option<String>,
    pub target_dir: PathBuf,
    pub overwrite: bool,
}

impl From<&SyncConfig> for SyncPlan {
    fn from(config: &SyncConfig) -> Self {
        Self {
            folder_name: config.google_drive.folder_name.clone(),
            extensions: config.google_drive.file_extensions.clone(),
            name_contains: config.google_drive.name_contains.clone(),
            target_dir: config.local.target_dir.clone(),
            overwrite: config.sync.overwrite,
        }
    }
}

impl SyncPlan {
    pub fn wants(&self, name: &str) -> bool {
        let extension = self.extensions.is_empty()
            || self.extensions.iter().any(|e| name.ends_with(e.as_str()));
        let contains = self
            .name_contains
            .as_deref()
            .map_or(true, |needle| name.contains(needle));
        extension && contains
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// files in the remote folder before filtering
    pub listed: usize,
    pub downloaded: Vec<PathBuf>,
    /// matching files already present locally
    pub skipped: Vec<String>,
    pub bytes: u64,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files listed, {} downloaded ({} bytes), {} skipped",
            self.listed,
            self.downloaded.len(),
            self.bytes,
            self.skipped.len()
        )
    }
}

/// downloads the plan's files that are missing locally (or all of them with
/// `overwrite`). each file is written to `<name>.part` and renamed when
/// complete, so an interrupted run never leaves a truncated file under the
/// final name.
pub fn sync_folder<S: FileStore + ?Sized>(store: &S, plan: &SyncPlan) -> Result<SyncReport> {
    let folder_id = store.find_folder(&plan.folder_name)?;
    let files = store.list_files(&folder_id)?;
    info!(folder = %plan.folder_name, files = files.len(), "listed remote folder");

    let mut report = SyncReport {
        listed: files.len(),
        ..Default::default()
    };
    fs::create_dir_all(&plan.target_dir)?;

    for file in files.iter().filter(|f| plan.wants(&f.name)) {
        if !is_plain_name(&file.name) {
            warn!(name = %file.name, "skipping remote file with a path-like name");
            continue;
        }
        let target = plan.target_dir.join(&file.name);
        if target.exists() && !plan.overwrite {
            info!(name = %file.name, "skipping, already exists");
            report.skipped.push(file.name.clone());
            continue;
        }

        let bytes = download_to(store, file, &target)?;
        info!(name = %file.name, bytes, "downloaded");
        report.bytes += bytes;
        report.downloaded.push(target);
    }
    Ok(report)
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name().is_some_and(|n| n == name)
}

fn download_to<S: FileStore + ?Sized>(store: &S, file: &RemoteFile, target: &Path) -> Result<u64> {
    let partial = target.with_file_name(format!("{}.part", file.name));
    match write_partial(store, file, &partial) {
        Ok(bytes) => {
            fs::rename(&partial, target)?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_partial<S: FileStore + ?Sized>(
    store: &S,
    file: &RemoteFile,
    partial: &Path,
) -> Result<u64> {
    let mut out = BufWriter::new(File::create(partial)?);
    let bytes = store.download(&file.id, &mut out)?;
    out.flush()?;
    Ok(bytes)
}
