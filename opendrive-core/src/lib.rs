mod client;
mod models;
mod session;

pub use client::{
    ApiErrorClass, ChunkUpload, DEFAULT_BASE_URL, OpenDriveClient, OpenDriveError,
    RETRY_STATUS_CODES, ROOT_FOLDER_ID,
};
pub use models::{
    CloseUploadResponse, CopyFileResponse, CreateFileResponse, CreateFolderResponse, File, Folder,
    FolderList, OpenUploadResponse,
};
pub use session::Session;
