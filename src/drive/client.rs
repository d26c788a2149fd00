//! Drive v3 REST client.

use super::{FileStore, RemoteFile};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct DriveClient {
    http: reqwest::blocking::Client,
    base: String,
    access_token: String,
}

impl DriveClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base(DRIVE_API, access_token)
    }

    pub fn with_base(base: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            http,
            base: base.into(),
            access_token: access_token.into(),
        })
    }

    fn list(&self, query: &str, fields: &str, page_token: Option<&str>) -> Result<FileList> {
        let mut params = vec![("q", query), ("fields", fields), ("pageSize", "1000")];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let list = self
            .http
            .get(format!("{}/files", self.base))
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(list)
    }
}

/// Drive query string literal: backslashes and single quotes escaped
fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub fn folder_query(name: &str) -> String {
    format!(
        "name = {} and mimeType = '{FOLDER_MIME}' and trashed = false",
        quoted(name)
    )
}

pub fn children_query(folder_id: &str) -> String {
    format!("{} in parents and trashed = false", quoted(folder_id))
}

impl FileStore for DriveClient {
    fn find_folder(&self, name: &str) -> Result<String> {
        let list = self.list(&folder_query(name), "files(id, name)", None)?;
        list.files
            .into_iter()
            .next()
            .map(|folder| folder.id)
            .ok_or_else(|| Error::Storage(format!("Folder '{name}' not found in Drive")))
    }

    fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        let query = children_query(folder_id);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list(
                &query,
                "nextPageToken, files(id, name, size)",
                page_token.as_deref(),
            )?;
            debug!(folder = %folder_id, files = page.files.len(), "listed page");
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(files),
            }
        }
    }

    fn download(&self, file_id: &str, out: &mut dyn Write) -> Result<u64> {
        let mut response = self
            .http
            .get(format!("{}/files/{file_id}", self.base))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()?
            .error_for_status()?;
        Ok(response.copy_to(out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_are_escaped() {
        assert_eq!(
            folder_query("GEE_exports"),
            format!("name = 'GEE_exports' and mimeType = '{FOLDER_MIME}' and trashed = false")
        );
        assert_eq!(
            folder_query("Bob's"),
            format!("name = 'Bob\\'s' and mimeType = '{FOLDER_MIME}' and trashed = false")
        );
        assert_eq!(children_query("abc123"), "'abc123' in parents and trashed = false");
    }

    #[test]
    fn file_list_pages_parse() {
        let page: FileList = serde_json::from_str(
            r#"{"nextPageToken": "p2", "files": [{"id": "1", "name": "lst.tif", "size": "2048"}]}"#,
        )
        .unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        assert_eq!(page.files[0].size, Some(2048));
    }

    #[test]
    fn unreachable_api_is_an_http_error() {
        let client = DriveClient::with_base("http://127.0.0.1:9/drive/v3", "token").unwrap();
        assert!(matches!(client.find_folder("x"), Err(Error::Http(_))));
    }
}
