use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FolderList {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "ParentFolderID", default)]
    pub parent_folder_id: Option<String>,
    #[serde(rename = "Folders", default)]
    pub folders: Vec<Folder>,
    #[serde(rename = "Files", default)]
    pub files: Vec<File>,
}

impl FolderList {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Folder {
    #[serde(rename = "FolderID")]
    pub folder_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DateModified", default, deserialize_with = "i64_from_any")]
    pub date_modified: i64,
    #[serde(rename = "ChildFolders", default, deserialize_with = "i64_from_any")]
    pub child_folders: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {
    #[serde(rename = "FileId")]
    pub file_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default, deserialize_with = "u64_from_any")]
    pub size: u64,
    #[serde(rename = "DateModified", default, deserialize_with = "i64_from_any")]
    pub date_modified: i64,
    #[serde(rename = "FileHash", default)]
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateFolderResponse {
    #[serde(rename = "FolderID")]
    pub folder_id: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateFileResponse {
    #[serde(rename = "FileId")]
    pub file_id: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CopyFileResponse {
    #[serde(rename = "FileID")]
    pub file_id: String,
    #[serde(rename = "Size", default, deserialize_with = "u64_from_any")]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenUploadResponse {
    #[serde(rename = "TempLocation")]
    pub temp_location: String,
    #[serde(rename = "RequireCompression", default)]
    pub require_compression: bool,
    #[serde(rename = "RequireHash", default)]
    pub require_hash: bool,
    #[serde(rename = "SpeedLimit", default, deserialize_with = "i64_from_any")]
    pub speed_limit: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloseUploadResponse {
    #[serde(rename = "FileID")]
    pub file_id: String,
    #[serde(rename = "FileHash", default)]
    pub file_hash: Option<String>,
    #[serde(rename = "Size", default, deserialize_with = "u64_from_any")]
    pub size: u64,
}

// The API is inconsistent about quoting numbers: the same field shows up as
// `"Size": "12"` in listings and `"Size": 12` elsewhere.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
    Null(()),
}

fn i64_from_any<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(value) => Ok(value),
        NumberOrString::String(value) if value.trim().is_empty() => Ok(0),
        NumberOrString::String(value) => value.trim().parse().map_err(de::Error::custom),
        NumberOrString::Null(()) => Ok(0),
    }
}

fn u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64_from_any(deserializer)?;
    u64::try_from(value).map_err(|_| de::Error::custom(format!("negative size: {value}")))
}
