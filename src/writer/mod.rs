//! Asynchronous image set persistence
//!
//! The capture thread hands finished bursts to [`AsyncImageWriter`], whose
//! worker thread encodes and writes them while the capture loop goes back to
//! previewing.

pub mod file_id;
pub mod image_set;
pub mod thumbnail;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::pipeline::work_queue::WorkQueue;
use crate::WriterConfig;

pub use file_id::{DirectoryProbe, FileIdAllocator, IdProbe, MemoryProbe};
pub use image_set::{FileFormat, ImageSet, OutputFormat};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("{0:?} output is not supported")]
    UnsupportedFormat(OutputFormat),

    #[error("frame {0} has no decodable image data")]
    InvalidFrame(usize),

    #[error("failed to start writer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl WriterError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        WriterError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Invoked from the writer thread whenever files appear on disk.
pub type FileSystemCallback = Arc<dyn Fn() + Send + Sync>;

type CallbackSlot = Arc<Mutex<Option<FileSystemCallback>>>;

/// Background writer owning one worker thread for its lifetime.
///
/// Dropping the writer enqueues a shutdown sentinel and joins the thread, so
/// every pushed set is on disk once the drop returns.
pub struct AsyncImageWriter {
    dir: PathBuf,
    queue: Arc<WorkQueue<Option<ImageSet>>>,
    ids: FileIdAllocator,
    callback: CallbackSlot,
    handle: Option<JoinHandle<()>>,
}

impl AsyncImageWriter {
    /// Creates the output directory if needed and starts the worker thread.
    pub fn new(dir: impl Into<PathBuf>, config: WriterConfig) -> Result<Self, WriterError> {
        let dir = dir.into();
        let ids = FileIdAllocator::for_directory(&dir);
        Self::with_allocator(dir, config, ids)
    }

    /// Like [`AsyncImageWriter::new`] with a custom id allocator.
    pub fn with_allocator(
        dir: impl Into<PathBuf>,
        config: WriterConfig,
        ids: FileIdAllocator,
    ) -> Result<Self, WriterError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| WriterError::io(&dir, e))?;

        let queue = Arc::new(WorkQueue::new());
        let callback: CallbackSlot = Arc::new(Mutex::new(None));

        let handle = {
            let queue = queue.clone();
            let callback = callback.clone();
            std::thread::Builder::new()
                .name("image-writer".into())
                .spawn(move || writer_loop(queue, callback, config))
                .map_err(WriterError::Spawn)?
        };

        info!("Image writer started, output directory {:?}", dir);

        Ok(Self {
            dir,
            queue,
            ids,
            callback,
            handle: Some(handle),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    /// Allocates the next free file id and returns an empty set bound to it.
    pub fn new_image_set(&mut self) -> ImageSet {
        let id = self.ids.allocate();
        debug!("New image set {}", id);
        ImageSet::new(id, &self.dir)
    }

    /// Queues a set for writing. Never blocks.
    pub fn push(&self, set: ImageSet) {
        self.queue.produce(Some(set));
    }

    pub fn set_free_file_id(&mut self, id: u32) {
        self.ids.set_free_id(id);
    }

    pub fn set_on_file_system_changed(&self, callback: FileSystemCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Sets waiting to be written (diagnostics only).
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for AsyncImageWriter {
    fn drop(&mut self) {
        let (queued, taken) = self.queue.stats();
        debug!("Stopping image writer, {} of {} sets picked up", taken, queued);
        self.queue.produce(None);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Image writer thread panicked");
            }
        }
    }
}

fn writer_loop(queue: Arc<WorkQueue<Option<ImageSet>>>, callback: CallbackSlot, config: WriterConfig) {
    while let Some(item) = queue.consume(true) {
        let Some(set) = item else {
            debug!("Image writer shutting down");
            break;
        };

        let start = Instant::now();
        let mut notify = || {
            let current = callback.lock().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(cb) = current {
                cb();
            }
        };

        match set.write(&config, &mut notify) {
            Ok(written) => {
                let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                metrics::histogram!("image_set_write_ms").record(elapsed);
                info!("Image set {} written: {} images in {:.1}ms", set.id(), written, elapsed);
            }
            Err(e) => error!("Failed to write image set {}: {}", set.id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Yuv420Image};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame() -> Frame {
        let image = Yuv420Image::new(32, 24);
        Frame {
            data: Bytes::from(image.data),
            meta: Arc::new(FrameMetadata {
                sequence: 1,
                width: 32,
                height: 24,
                format: PixelFormat::Yuv420p,
                exposure: 1000,
                gain: 1.0,
                white_balance: 6500,
                focus: 0.0,
                flash_brightness: 0.0,
                histogram: Vec::new(),
                sharpness: None,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    fn config() -> WriterConfig {
        WriterConfig {
            thumbnail_width: 16,
            thumbnail_height: 12,
            ..WriterConfig::default()
        }
    }

    #[test]
    fn test_ids_skip_existing_manifests() {
        let dir = tempfile::tempdir().unwrap();
        for id in 0..5 {
            std::fs::write(dir.path().join(image_set::manifest_name(id)), b"").unwrap();
        }
        let mut writer = AsyncImageWriter::new(dir.path(), config()).unwrap();
        assert_eq!(writer.new_image_set().id(), 5);
        assert_eq!(writer.new_image_set().id(), 6);
    }

    #[test]
    fn test_drop_flushes_pending_sets() {
        let dir = tempfile::tempdir().unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        {
            let mut writer = AsyncImageWriter::new(dir.path(), config()).unwrap();
            let counter = changes.clone();
            writer.set_on_file_system_changed(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

            for _ in 0..2 {
                let mut set = writer.new_image_set();
                set.add(FileFormat::jpeg(95), frame());
                writer.push(set);
            }
        }

        assert!(dir.path().join("img_0000.xml").exists());
        assert!(dir.path().join("img_0001_00.jpg").exists());
        assert!(dir.path().join("thumb_0001_00.jpg").exists());
        // manifest + one frame, per set
        assert_eq!(changes.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_free_file_id_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AsyncImageWriter::new(dir.path(), config()).unwrap();
        writer.set_free_file_id(40);
        assert_eq!(writer.new_image_set().id(), 40);
    }

    #[test]
    fn test_free_file_id_reset_keeps_queued_sets() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AsyncImageWriter::new(dir.path(), config()).unwrap();
        let first = writer.new_image_set();
        let second = writer.new_image_set();

        // Neither set is on disk yet
        writer.set_free_file_id(0);
        let third = writer.new_image_set();

        assert_eq!((first.id(), second.id()), (0, 1));
        assert_eq!(third.id(), 2);
    }
}
