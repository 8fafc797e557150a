//! Scoped resource release.
//!
//! A [`ResourceScope`] is a stack of release callbacks. Every callback runs
//! exactly once, last registered first, when the scope is closed or dropped.
//! Dropping covers `?` early returns and futures abandoned on cancellation.
//!
//! [`ScopedHandle`] is a file whose descriptor belongs to a scope. Clones of
//! the handle can read or write (for example a multipart stream), but only the
//! scope's release callback closes the descriptor; afterwards every clone
//! reports an error instead of touching a closed file.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, error};

type Release = Box<dyn FnOnce() + Send + 'static>;

struct Deferred {
    label: String,
    release: Release,
}

/// Stack of release callbacks run in reverse registration order.
pub struct ResourceScope {
    name: &'static str,
    deferred: Vec<Deferred>,
}

impl ResourceScope {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            deferred: Vec::new(),
        }
    }

    /// Register a release callback.
    pub fn defer<F>(&mut self, label: impl Into<String>, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.into();
        debug!(scope = self.name, resource = %label, "Registered release");
        self.deferred.push(Deferred {
            label,
            release: Box::new(release),
        });
    }

    /// Number of callbacks still waiting to run.
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    /// Run every pending callback now.
    pub fn close(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        while let Some(Deferred { label, release }) = self.deferred.pop() {
            debug!(scope = self.name, resource = %label, "Releasing");
            if panic::catch_unwind(AssertUnwindSafe(release)).is_err() {
                error!(scope = self.name, resource = %label, "Release callback panicked");
            }
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScope")
            .field("name", &self.name)
            .field(
                "pending",
                &self.deferred.iter().map(|d| &d.label).collect::<Vec<_>>(),
            )
            .finish()
    }
}

struct HandleSlot {
    path: PathBuf,
    len: Option<u64>,
    file: Mutex<Option<File>>,
}

/// A file descriptor owned by a [`ResourceScope`].
#[derive(Clone)]
pub struct ScopedHandle {
    slot: Arc<HandleSlot>,
}

impl ScopedHandle {
    /// Open an existing file for reading.
    pub async fn open_read(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let len = file.metadata().await.ok().map(|m| m.len());
        Ok(Self::from_file(path, file, len))
    }

    /// Create (or truncate) a file for writing.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).await?;
        Ok(Self::from_file(path, file, None))
    }

    fn from_file(path: &Path, file: File, len: Option<u64>) -> Self {
        Self {
            slot: Arc::new(HandleSlot {
                path: path.to_path_buf(),
                len,
                file: Mutex::new(Some(file)),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.slot.path
    }

    /// File length at open time, when known.
    pub fn len(&self) -> Option<u64> {
        self.slot.len
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    /// Close the descriptor. Returns `false` if it was already closed.
    pub fn release(&self) -> bool {
        let file = self.lock().take();
        file.is_some()
    }

    /// Hand ownership of the descriptor to `scope`.
    pub fn register(&self, scope: &mut ResourceScope) {
        let handle = self.clone();
        scope.defer(format!("file {}", self.path().display()), move || {
            handle.release();
        });
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.slot.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn released_error(&self) -> io::Error {
        io::Error::other(format!(
            "file handle already released: {}",
            self.path().display()
        ))
    }
}

impl std::fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("path", &self.slot.path)
            .field("released", &self.is_released())
            .finish()
    }
}

impl AsyncRead for ScopedHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(file) => Pin::new(file).poll_read(cx, buf),
            None => Poll::Ready(Err(self.released_error())),
        }
    }
}

impl AsyncWrite for ScopedHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(file) => Pin::new(file).poll_write(cx, buf),
            None => Poll::Ready(Err(self.released_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Err(self.released_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
