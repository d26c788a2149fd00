//! Pulls exported files from a Google Drive folder into a local directory.

pub mod auth;
pub mod client;
pub mod sync;

pub use auth::{acquire_token, InstalledAppFlow, OAuthFlow, Token};
pub use client::DriveClient;
pub use sync::{sync_folder, SyncPlan, SyncReport};

use crate::config::SyncConfig;
use crate::error::{Result, Stage, StageExt};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::io::Write;
use tracing::info;

/// A file in remote storage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "byte_count")]
    pub size: Option<u64>,
}

/// Drive reports sizes as decimal strings
fn byte_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Number(n)) => Ok(Some(n)),
        Some(Size::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

pub trait FileStore {
    /// id of the first non-trashed folder called `name`
    fn find_folder(&self, name: &str) -> Result<String>;
    /// every non-trashed file directly inside the folder
    fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>>;
    /// streams the file's content into `out`, returning the bytes written
    fn download(&self, file_id: &str, out: &mut dyn Write) -> Result<u64>;
}

/// authenticates with the configured credentials and runs the sync
pub fn run_sync(config: &SyncConfig) -> Result<SyncReport> {
    info!(
        folder = %config.google_drive.folder_name,
        target = %config.local.target_dir.display(),
        "starting Drive sync"
    );
    let flow =
        InstalledAppFlow::from_secrets_file(&config.auth.credentials_path).stage(Stage::Sync)?;
    let token = acquire_token(&flow, &config.auth.token_path, Utc::now()).stage(Stage::Sync)?;
    let client = DriveClient::new(token.access_token).stage(Stage::Sync)?;

    let report = sync_folder(&client, &SyncPlan::from(config)).stage(Stage::Sync)?;
    info!(%report, "Drive sync finished");
    Ok(report)
}
