//! Upload strategy: single PUT for small payloads, resumable session for
//! everything else.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Method;
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use drivelink_common::{Error, RemotePath, Result};

use super::client::DriveClient;
use super::http::GraphRequest;
use super::models::{ChunkAck, DriveItem, UploadSessionResponse, CONFLICT_BEHAVIOR_KEY};

/// Stream of payload bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A byte stream with a declared total size.
pub struct Payload {
    stream: ByteStream,
    size: u64,
}

impl Payload {
    pub fn new(stream: ByteStream, size: u64) -> Self {
        Self { stream, size }
    }

    /// In-memory payload.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        Self::new(Box::pin(futures::stream::once(async move { Ok(data) })), size)
    }

    /// Stream a local file without loading it into memory.
    ///
    /// Only the size is read here. The file is opened when the stream is
    /// first polled, so a batch of pending payloads holds no descriptors.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = tokio::fs::metadata(&path).await?.len();
        let stream = futures::stream::once(async move { tokio::fs::File::open(path).await })
            .map_ok(ReaderStream::new)
            .try_flatten()
            .map_err(Error::from);
        Ok(Self::new(Box::pin(stream), size))
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("size", &self.size).finish()
    }
}

/// Live upload session state.
#[derive(Debug)]
struct UploadSession {
    session_url: String,
    total_size: u64,
    bytes_sent: u64,
    chunk_size: usize,
}

impl UploadSession {
    fn content_range(&self, len: usize) -> String {
        format!(
            "bytes {}-{}/{}",
            self.bytes_sent,
            self.bytes_sent + len as u64 - 1,
            self.total_size
        )
    }
}

impl DriveClient {
    /// Upload `payload` to `destination` with conflict-rename.
    ///
    /// Payloads below the small upload threshold go up in one request;
    /// larger ones through a resumable session, one chunk in memory at a time.
    ///
    /// # Errors
    /// - Any non-success response (after the executor's retries)
    /// - [`Error::Protocol`] if the stream ends early or over-produces
    pub async fn upload(
        &self,
        destination: &RemotePath,
        payload: Payload,
        content_type: &str,
    ) -> Result<DriveItem> {
        if payload.size < self.small_upload_threshold {
            self.upload_small(destination, payload, content_type).await
        } else {
            self.upload_session(destination, payload, content_type).await
        }
    }

    async fn upload_small(
        &self,
        destination: &RemotePath,
        mut payload: Payload,
        content_type: &str,
    ) -> Result<DriveItem> {
        let mut data = BytesMut::with_capacity(payload.size as usize);
        while let Some(chunk) = payload.stream.next().await {
            data.extend_from_slice(&chunk?);
            if data.len() as u64 > payload.size {
                return Err(overrun(destination, payload.size));
            }
        }
        if (data.len() as u64) < payload.size {
            return Err(Error::Protocol(format!(
                "Payload for {} ended after {} of {} bytes",
                destination,
                data.len(),
                payload.size
            )));
        }

        let request = GraphRequest::put(self.content_endpoint(destination))
            .query(CONFLICT_BEHAVIOR_KEY, "rename")
            .header("Content-Type", content_type)
            .body(data.freeze())
            .timeout(self.upload_timeout)
            .raise_on_error();

        let item: DriveItem = self.executor().execute(&request).await?.json()?;
        info!("Uploaded {} ({} bytes)", destination, payload.size);
        Ok(item)
    }

    async fn upload_session(
        &self,
        destination: &RemotePath,
        mut payload: Payload,
        content_type: &str,
    ) -> Result<DriveItem> {
        let mut session = self.create_session(destination, payload.size).await?;
        let mut buffer = BytesMut::with_capacity(session.chunk_size);
        let mut exhausted = false;

        loop {
            while !exhausted && buffer.len() < session.chunk_size {
                match payload.stream.next().await {
                    Some(chunk) => buffer.extend_from_slice(&chunk?),
                    None => exhausted = true,
                }
                if session.bytes_sent + buffer.len() as u64 > session.total_size {
                    return Err(overrun(destination, session.total_size));
                }
            }

            let available = session.bytes_sent + buffer.len() as u64;
            if buffer.is_empty() || (exhausted && available < session.total_size) {
                return Err(Error::Protocol(format!(
                    "Payload for {} ended after {} of {} bytes without completing the session",
                    destination, available, session.total_size
                )));
            }

            let len = buffer.len().min(session.chunk_size);
            let chunk = buffer.split_to(len).freeze();
            if let Some(item) = self.put_chunk(&mut session, chunk, content_type).await? {
                info!(
                    "Uploaded {} ({} bytes) via upload session",
                    destination, session.total_size
                );
                return Ok(item);
            }
        }
    }

    async fn create_session(&self, destination: &RemotePath, total_size: u64) -> Result<UploadSession> {
        let body = serde_json::json!({
            "item": { CONFLICT_BEHAVIOR_KEY: "rename" },
            "deferCommit": false,
        });
        // A retried create would leave an orphaned session behind. A 401 is
        // rejected before any session exists, so the refresh may repeat it.
        let request = GraphRequest::post(self.session_endpoint(destination))
            .json(body)
            .no_backoff_retry()
            .raise_on_error();

        let response: UploadSessionResponse = self.executor().execute(&request).await?.json()?;
        debug!(
            "Upload session for {} created, expires {:?}",
            destination, response.expiration_date_time
        );

        Ok(UploadSession {
            session_url: response.upload_url,
            total_size,
            bytes_sent: 0,
            chunk_size: self.chunk_size,
        })
    }

    /// Send one chunk. Returns the item once the session completes.
    async fn put_chunk(
        &self,
        session: &mut UploadSession,
        chunk: Bytes,
        content_type: &str,
    ) -> Result<Option<DriveItem>> {
        let len = chunk.len();
        let request = GraphRequest::url(Method::PUT, session.session_url.as_str())
            .unauthenticated()
            .header("Content-Length", len.to_string())
            .header("Content-Range", session.content_range(len))
            .header("Content-Type", content_type)
            .body(chunk)
            .timeout(self.upload_timeout);

        let response = self.executor().execute(&request).await?;
        match response.status {
            200 | 201 => Ok(Some(response.json()?)),
            202 => {
                session.bytes_sent += len as u64;
                let ack: ChunkAck = response.json().unwrap_or_default();
                if let Some(expected) = ack.next_offset() {
                    if expected != session.bytes_sent {
                        debug!(
                            "Server expects offset {} but {} bytes were sent",
                            expected, session.bytes_sent
                        );
                    }
                }
                Ok(None)
            }
            _ => Err(response.into_error()),
        }
    }
}

fn overrun(destination: &RemotePath, declared: u64) -> Error {
    Error::Protocol(format!(
        "Payload for {} produced more than the declared {} bytes",
        destination, declared
    ))
}
