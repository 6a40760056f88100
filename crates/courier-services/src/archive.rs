//! Archive Streamer: assembles a selection of stored files into one
//! compressed archive, emitted incrementally.
//!
//! The archive is a gzip-compressed tar stream produced by a bounded-buffer
//! pipeline: a blocking producer task drives the tar/gzip encoders, pulling
//! member bytes from storage through a sync-async bridge and pushing output
//! chunks into a bounded channel the HTTP response consumes. No member is
//! ever buffered whole and no temporary file is involved, so memory use is
//! capped at roughly chunk_bytes × channel_depth per archive regardless of
//! payload size. Independent archive requests each get their own pipeline.
//!
//! Members are written in the order given (declaration order) with fixed
//! header metadata, so repeated requests for the same selection are
//! byte-identical. When the consumer disconnects, the next output chunk
//! fails to send and the producer aborts the remaining member reads.

use bytes::Bytes;
use courier_core::models::FileEntry;
use courier_core::AppError;
use courier_storage::Storage;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{Stream, TryStreamExt};
use std::io::{self, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::io::{StreamReader, SyncIoBridge};

/// One archive member: the name it appears under and where its bytes live.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub name: String,
    pub storage_key: String,
    pub size: u64,
}

impl From<&FileEntry> for ArchiveMember {
    fn from(entry: &FileEntry) -> Self {
        ArchiveMember {
            name: entry.name.clone(),
            storage_key: entry.storage_key.clone(),
            size: entry.observed_size.unwrap_or(entry.declared_size),
        }
    }
}

/// Sanitize a filename for an archive entry to prevent path traversal.
/// Extracts only the base name (strips path components like `../`).
fn sanitize_member_name(filename: &str, fallback: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

pub struct ArchiveStreamer {
    storage: Arc<dyn Storage>,
    chunk_bytes: usize,
    channel_depth: usize,
}

impl ArchiveStreamer {
    pub fn new(storage: Arc<dyn Storage>, chunk_bytes: usize, channel_depth: usize) -> Self {
        ArchiveStreamer {
            storage,
            chunk_bytes: chunk_bytes.max(1024),
            channel_depth: channel_depth.max(1),
        }
    }

    /// Start streaming an archive of the given members.
    ///
    /// Returns immediately; the archive bytes arrive through the returned
    /// stream as the producer assembles them. A mid-stream storage failure
    /// surfaces as a `PartialFailure` item after the bytes already emitted —
    /// by then the archive header is on the wire, so the delivering layer
    /// aborts the connection rather than reporting success.
    pub fn stream(&self, members: Vec<ArchiveMember>) -> ArchiveStream {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(self.channel_depth);
        let storage = Arc::clone(&self.storage);
        let chunk_bytes = self.chunk_bytes;
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            match write_archive(storage.as_ref(), &members, chunk_bytes, tx.clone(), &handle) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!("Archive consumer disconnected, aborting remaining members");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Archive streaming failed mid-stream");
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        ArchiveStream { rx }
    }
}

/// Drive the tar/gzip encoders over every member in order. Runs on a
/// blocking thread; member reads are bridged from the async storage stream.
fn write_archive(
    storage: &dyn Storage,
    members: &[ArchiveMember],
    chunk_bytes: usize,
    tx: mpsc::Sender<io::Result<Bytes>>,
    handle: &Handle,
) -> io::Result<()> {
    let sink = ChannelSink::new(tx, chunk_bytes);
    let encoder = GzEncoder::new(sink, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (index, member) in members.iter().enumerate() {
        let byte_stream = handle
            .block_on(storage.get_stream(&member.storage_key))
            .map_err(io::Error::other)?;
        let reader = StreamReader::new(byte_stream.map_err(io::Error::other));
        let bridged = SyncIoBridge::new_with_handle(reader, handle.clone());
        let mut payload = ExactLen::new(bridged, member.size);

        let fallback = format!("unnamed_{}", index);
        let name = sanitize_member_name(&member.name, &fallback);

        // Fixed metadata keeps repeated archives byte-identical.
        let mut header = tar::Header::new_gnu();
        header.set_size(member.size);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();

        builder.append_data(&mut header, name, &mut payload)?;
    }

    let encoder = builder.into_inner()?;
    let mut sink = encoder.finish()?;
    sink.flush()
}

/// `Write` adapter pushing coalesced chunks into the bounded output channel.
/// A dropped receiver turns into `BrokenPipe`, which aborts the producer.
struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    chunk_bytes: usize,
}

impl ChannelSink {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>, chunk_bytes: usize) -> Self {
        ChannelSink {
            tx,
            buf: Vec::with_capacity(chunk_bytes),
            chunk_bytes,
        }
    }

    fn send_buf(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::take(&mut self.buf));
        self.buf.reserve(self.chunk_bytes);
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer disconnected")
        })
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.chunk_bytes {
            self.send_buf()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buf()
    }
}

/// Reader guard enforcing that a member yields exactly its recorded size:
/// a shorter object fails the archive instead of silently corrupting it, a
/// longer one is cut at the recorded size the tar header already promised.
struct ExactLen<R> {
    inner: R,
    remaining: u64,
}

impl<R> ExactLen<R> {
    fn new(inner: R, len: u64) -> Self {
        ExactLen {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for ExactLen<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stored object is shorter than its recorded size",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// The archive bytes, delivered as they are produced.
pub struct ArchiveStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                Poll::Ready(Some(Err(AppError::PartialFailure(e.to_string()))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
