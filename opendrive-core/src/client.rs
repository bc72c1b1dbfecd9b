use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::models::{
    CloseUploadResponse, CopyFileResponse, CreateFileResponse, CreateFolderResponse, FolderList,
    OpenUploadResponse,
};
use crate::session::Session;

pub const DEFAULT_BASE_URL: &str = "https://dev.opendrive.com/api/v1";

/// Folder ID the service uses for the top of every account's tree.
pub const ROOT_FOLDER_ID: &str = "0";

/// Statuses the service is known to return for conditions that clear up on
/// their own (expired list tokens, throttling, overloaded gateways).
pub const RETRY_STATUS_CODES: [u16; 8] = [400, 401, 408, 429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum OpenDriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// One slice of a file sent to the chunk endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ChunkUpload<'a> {
    pub file_id: &'a str,
    pub file_name: &'a str,
    pub temp_location: &'a str,
    pub offset: u64,
    pub data: &'a [u8],
}

#[derive(Clone)]
pub struct OpenDriveClient {
    http: Client,
    base_url: Url,
}

impl OpenDriveClient {
    pub fn new() -> Result<Self, OpenDriveError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, OpenDriveError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(OpenDriveError::Url(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn list_folder(
        &self,
        session: &Session,
        folder_id: &str,
    ) -> Result<FolderList, OpenDriveError> {
        let url = self.endpoint(&["folder", "list.json", session.id(), folder_id])?;
        self.call_json::<(), _>(Method::GET, url, None).await
    }

    /// Looks up a single child of `folder_id` by its (already escaped) name.
    pub async fn item_by_name(
        &self,
        session: &Session,
        folder_id: &str,
        name: &str,
    ) -> Result<FolderList, OpenDriveError> {
        let mut url = self.endpoint(&["folder", "itembyname.json", session.id(), folder_id])?;
        url.query_pairs_mut().append_pair("name", name);
        self.call_json::<(), _>(Method::GET, url, None).await
    }

    pub async fn create_folder(
        &self,
        session: &Session,
        parent_id: &str,
        name: &str,
    ) -> Result<CreateFolderResponse, OpenDriveError> {
        let url = self.endpoint(&["folder.json"])?;
        let body = CreateFolderRequest {
            session_id: session.id(),
            folder_name: name,
            folder_sub_parent: parent_id,
            folder_is_public: 0,
            folder_public_upl: 0,
            folder_public_display: 0,
            folder_public_dnl: 0,
        };
        self.call_json(Method::POST, url, Some(&body)).await
    }

    pub async fn remove_folder(
        &self,
        session: &Session,
        folder_id: &str,
    ) -> Result<(), OpenDriveError> {
        let url = self.endpoint(&["folder", "remove.json"])?;
        let body = RemoveFolderRequest {
            session_id: session.id(),
            folder_id,
        };
        let request = self.http.post(url).json(&body);
        Self::drain(self.call_raw(request).await?).await
    }

    pub async fn move_copy_file(
        &self,
        session: &Session,
        src_file_id: &str,
        dst_folder_id: &str,
        move_file: bool,
        overwrite: bool,
    ) -> Result<CopyFileResponse, OpenDriveError> {
        let url = self.endpoint(&["file", "move_copy.json"])?;
        let body = MoveCopyRequest {
            session_id: session.id(),
            src_file_id,
            dst_folder_id,
            move_file: if move_file { "true" } else { "false" },
            overwrite_if_exists: if overwrite { "true" } else { "false" },
        };
        self.call_json(Method::POST, url, Some(&body)).await
    }

    pub async fn create_file(
        &self,
        session: &Session,
        folder_id: &str,
        name: &str,
    ) -> Result<CreateFileResponse, OpenDriveError> {
        let url = self.endpoint(&["upload", "create_file.json"])?;
        let body = CreateFileRequest {
            session_id: session.id(),
            folder_id,
            file_name: name,
        };
        self.call_json(Method::POST, url, Some(&body)).await
    }

    pub async fn open_file_upload(
        &self,
        session: &Session,
        file_id: &str,
        size: u64,
    ) -> Result<OpenUploadResponse, OpenDriveError> {
        let url = self.endpoint(&["upload", "open_file_upload.json"])?;
        let body = OpenUploadRequest {
            session_id: session.id(),
            file_id,
            file_size: size,
        };
        self.call_json(Method::POST, url, Some(&body)).await
    }

    pub async fn upload_file_chunk(
        &self,
        session: &Session,
        chunk: &ChunkUpload<'_>,
    ) -> Result<(), OpenDriveError> {
        let url = self.endpoint(&["upload", "upload_file_chunk.json"])?;
        let part = Part::bytes(chunk.data.to_vec())
            .file_name(chunk.file_name.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("file_data", part)
            .text("session_id", session.id().to_string())
            .text("file_id", chunk.file_id.to_string())
            .text("temp_location", chunk.temp_location.to_string())
            .text("chunk_offset", chunk.offset.to_string())
            .text("chunk_size", chunk.data.len().to_string());
        let request = self.http.post(url).multipart(form);
        Self::drain(self.call_raw(request).await?).await
    }

    pub async fn close_file_upload(
        &self,
        session: &Session,
        file_id: &str,
        size: u64,
        temp_location: &str,
    ) -> Result<CloseUploadResponse, OpenDriveError> {
        let url = self.endpoint(&["upload", "close_file_upload.json"])?;
        let body = CloseUploadRequest {
            session_id: session.id(),
            file_id,
            file_size: size,
            temp_location,
        };
        self.call_json(Method::POST, url, Some(&body)).await
    }

    pub async fn set_file_modification_time(
        &self,
        session: &Session,
        file_id: &str,
        unix_secs: i64,
    ) -> Result<(), OpenDriveError> {
        let url = self.endpoint(&["file", "filesettings.json"])?;
        let body = FileSettingsRequest {
            session_id: session.id(),
            file_id,
            file_modification_time: unix_secs.to_string(),
        };
        let request = self.http.put(url).json(&body);
        Self::drain(self.call_raw(request).await?).await
    }

    /// Starts a download; the body of the returned response is the file content.
    pub async fn download_file(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<Response, OpenDriveError> {
        let mut url = self.endpoint(&["download", "file.json", file_id])?;
        url.query_pairs_mut().append_pair("session_id", session.id());
        self.call_raw(self.http.get(url)).await
    }

    pub async fn delete_file(&self, session: &Session, file_id: &str) -> Result<(), OpenDriveError> {
        let url = self.endpoint(&["file.json", session.id(), file_id])?;
        Self::drain(self.call_raw(self.http.delete(url)).await?).await
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, OpenDriveError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) async fn call_json<B, T>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, OpenDriveError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.call_raw(request).await?;
        Ok(response.json::<T>().await?)
    }

    async fn call_raw(&self, request: RequestBuilder) -> Result<Response, OpenDriveError> {
        let response = request.send().await?;
        debug!("{} -> {}", response.url().path(), response.status());
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(OpenDriveError::Api { status, body })
        }
    }

    async fn drain(response: Response) -> Result<(), OpenDriveError> {
        response.bytes().await?;
        Ok(())
    }
}

impl OpenDriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            OpenDriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            OpenDriveError::Api { status, .. } => Some(*status),
            OpenDriveError::Request(err) => err.status(),
            OpenDriveError::Url(_) => None,
        }
    }

    /// Whether repeating the same call has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            OpenDriveError::Api { .. } => !matches!(
                self.classification(),
                Some(ApiErrorClass::Permanent) | None
            ),
            OpenDriveError::Request(err) => is_transport_failure(err),
            OpenDriveError::Url(_) => false,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if !RETRY_STATUS_CODES.contains(&status.as_u16()) {
        ApiErrorClass::Permanent
    } else if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else {
        ApiErrorClass::Transient
    }
}

fn is_transport_failure(err: &reqwest::Error) -> bool {
    if err.is_decode() || err.is_builder() || err.is_redirect() {
        return false;
    }
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[derive(Serialize)]
struct CreateFolderRequest<'a> {
    session_id: &'a str,
    folder_name: &'a str,
    folder_sub_parent: &'a str,
    folder_is_public: i64,
    folder_public_upl: i64,
    folder_public_display: i64,
    folder_public_dnl: i64,
}

#[derive(Serialize)]
struct RemoveFolderRequest<'a> {
    session_id: &'a str,
    folder_id: &'a str,
}

#[derive(Serialize)]
struct MoveCopyRequest<'a> {
    session_id: &'a str,
    src_file_id: &'a str,
    dst_folder_id: &'a str,
    #[serde(rename = "move")]
    move_file: &'a str,
    overwrite_if_exists: &'a str,
}

#[derive(Serialize)]
struct CreateFileRequest<'a> {
    session_id: &'a str,
    folder_id: &'a str,
    file_name: &'a str,
}

#[derive(Serialize)]
struct OpenUploadRequest<'a> {
    session_id: &'a str,
    file_id: &'a str,
    file_size: u64,
}

#[derive(Serialize)]
struct CloseUploadRequest<'a> {
    session_id: &'a str,
    file_id: &'a str,
    file_size: u64,
    temp_location: &'a str,
}

#[derive(Serialize)]
struct FileSettingsRequest<'a> {
    session_id: &'a str,
    file_id: &'a str,
    file_modification_time: String,
}
