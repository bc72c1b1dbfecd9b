use log::{debug, info, warn};
use opendrive_core::ChunkUpload;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FsError, Result};
use crate::fs::FsInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadState {
    Idle,
    Opened,
    ChunkSent,
    Closed,
    MetadataSet,
    Done,
    Failed,
}

/// What the service reported once an upload was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_id: String,
    pub size: u64,
    /// Lowercase hex MD5 of the bytes that were sent.
    pub md5: String,
}

/// Drives one open -> chunks -> close -> set-mod-time sequence.
///
/// Chunks go out strictly in offset order, each through the pacer. Any step
/// that fails after its retries moves the upload to [`UploadState::Failed`];
/// nothing is resumed by a later upload of the same file.
pub(crate) struct ChunkedUpload<'a> {
    fs: &'a FsInner,
    file_id: String,
    file_name: String,
    size: u64,
    chunk_size: usize,
    temp_location: String,
    offset: u64,
    chunk_index: u64,
    digest: md5::Context,
    state: UploadState,
}

impl<'a> ChunkedUpload<'a> {
    pub(crate) fn new(fs: &'a FsInner, file_id: &str, file_name: &str, size: u64) -> Self {
        Self {
            fs,
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            size,
            chunk_size: fs.chunk_size.max(1),
            temp_location: String::new(),
            offset: 0,
            chunk_index: 0,
            digest: md5::Context::new(),
            state: UploadState::Idle,
        }
    }

    pub(crate) async fn run<R>(mut self, reader: &mut R, mod_time: i64) -> Result<UploadedFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match self.drive(reader, mod_time).await {
            Ok(uploaded) => {
                self.state = UploadState::Done;
                info!(
                    "uploaded {:?}: {} bytes in {} chunks",
                    self.file_name, uploaded.size, self.chunk_index
                );
                Ok(uploaded)
            }
            Err(err) => {
                warn!(
                    "upload of {:?} failed in state {:?} at offset {}: {err}",
                    self.file_name, self.state, self.offset
                );
                self.state = UploadState::Failed;
                Err(err)
            }
        }
    }

    async fn drive<R>(&mut self, reader: &mut R, mod_time: i64) -> Result<UploadedFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.open().await?;
        self.send_chunks(reader).await?;
        let uploaded = self.close().await?;
        self.set_mod_time(&uploaded.file_id, mod_time).await?;
        Ok(uploaded)
    }

    async fn open(&mut self) -> Result<()> {
        let fs = self.fs;
        let file_id = self.file_id.as_str();
        let size = self.size;
        let opened = fs
            .pacer
            .call(move || fs.client.open_file_upload(&fs.session, file_id, size))
            .await?;
        debug!(
            "opened upload of {:?} ({size} bytes) at {}",
            self.file_name, opened.temp_location
        );
        self.temp_location = opened.temp_location;
        self.state = UploadState::Opened;
        Ok(())
    }

    async fn send_chunks<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; chunk_len(self.chunk_size, self.size)];
        while self.offset < self.size {
            let want = chunk_len(self.chunk_size, self.size - self.offset);
            let got = read_full(reader, &mut buf[..want]).await?;
            if got < want {
                return Err(FsError::Protocol(format!(
                    "source ended after {} of {} bytes",
                    self.offset + got as u64,
                    self.size
                )));
            }
            let data = &buf[..want];
            self.digest.consume(data);
            self.send_chunk(data).await?;
            self.offset += want as u64;
            self.chunk_index += 1;
            self.state = UploadState::ChunkSent;
        }

        let mut extra = [0u8; 1];
        if reader.read(&mut extra).await? > 0 {
            return Err(FsError::Protocol(format!(
                "source holds more than the declared {} bytes",
                self.size
            )));
        }
        Ok(())
    }

    async fn send_chunk(&self, data: &[u8]) -> Result<()> {
        let fs = self.fs;
        let chunk = ChunkUpload {
            file_id: &self.file_id,
            file_name: &self.file_name,
            temp_location: &self.temp_location,
            offset: self.offset,
            data,
        };
        debug!(
            "chunk {} of {:?}: offset={} size={}",
            self.chunk_index,
            self.file_name,
            self.offset,
            data.len()
        );
        let chunk = &chunk;
        fs.pacer
            .call(move || fs.client.upload_file_chunk(&fs.session, chunk))
            .await
    }

    async fn close(&mut self) -> Result<UploadedFile> {
        let fs = self.fs;
        let file_id = self.file_id.as_str();
        let temp_location = self.temp_location.as_str();
        let size = self.size;
        let closed = fs
            .pacer
            .call(move || {
                fs.client
                    .close_file_upload(&fs.session, file_id, size, temp_location)
            })
            .await?;
        self.state = UploadState::Closed;

        let digest = std::mem::replace(&mut self.digest, md5::Context::new());
        let md5 = format!("{:x}", digest.compute());
        if let Some(remote_hash) = closed.file_hash.as_deref()
            && !remote_hash.is_empty()
            && !remote_hash.eq_ignore_ascii_case(&md5)
        {
            return Err(FsError::Protocol(format!(
                "hash mismatch for {:?}: sent {md5}, service stored {remote_hash}",
                self.file_name
            )));
        }
        if closed.size != size {
            debug!(
                "service reports {} bytes for {:?}, sent {size}",
                closed.size, self.file_name
            );
        }

        self.file_id = closed.file_id.clone();
        Ok(UploadedFile {
            file_id: closed.file_id,
            size: closed.size,
            md5,
        })
    }

    async fn set_mod_time(&mut self, file_id: &str, mod_time: i64) -> Result<()> {
        let fs = self.fs;
        fs.pacer
            .call(move || {
                fs.client
                    .set_file_modification_time(&fs.session, file_id, mod_time)
            })
            .await?;
        self.state = UploadState::MetadataSet;
        Ok(())
    }
}

fn chunk_len(chunk_size: usize, remaining: u64) -> usize {
    usize::try_from(remaining).map_or(chunk_size, |remaining| remaining.min(chunk_size))
}

/// Fills `buf` unless the reader hits EOF first; returns the bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
