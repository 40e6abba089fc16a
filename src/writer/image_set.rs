//! Image sets: the frames of one burst plus their output formats

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::frame::Frame;
use crate::writer::thumbnail::create_thumbnail;
use crate::writer::WriterError;
use crate::WriterConfig;

/// Image stack manifest file name
pub fn manifest_name(id: u32) -> String {
    format!("img_{:04}.xml", id)
}

pub fn image_name(id: u32, index: usize, format: OutputFormat) -> String {
    format!("img_{:04}_{:02}.{}", id, index, format.extension())
}

pub fn thumbnail_name(id: u32, index: usize) -> String {
    format!("thumb_{:04}_{:02}.jpg", id, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Jpeg,
    Tiff,
    Dng,
    Raw,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Tiff => "tif",
            OutputFormat::Dng => "dng",
            OutputFormat::Raw => "raw",
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, OutputFormat::Jpeg | OutputFormat::Tiff)
    }
}

/// Output format plus encoder quality (JPEG only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFormat {
    pub format: OutputFormat,
    pub quality: u8,
}

impl FileFormat {
    pub fn jpeg(quality: u8) -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality,
        }
    }

    pub fn tiff() -> Self {
        Self {
            format: OutputFormat::Tiff,
            quality: 100,
        }
    }
}

/// Frames of one capture, bound to a file id and output directory.
///
/// Built on the capture thread, then moved into the writer.
#[derive(Clone)]
pub struct ImageSet {
    id: u32,
    dir: PathBuf,
    entries: Vec<(FileFormat, Frame)>,
}

impl ImageSet {
    pub fn new(id: u32, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            dir: dir.into(),
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add(&mut self, format: FileFormat, frame: Frame) {
        self.entries.push((format, frame));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that end up on disk: valid frames in a supported format.
    fn writable(&self) -> impl Iterator<Item = (usize, &FileFormat, &Frame)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, (format, frame))| frame.is_valid() && format.format.is_supported())
            .map(|(i, (format, frame))| (i, format, frame))
    }

    /// Renders the `img_NNNN.xml` manifest. Frame indices keep their burst
    /// position, so dropped frames leave gaps in the file names.
    pub fn manifest(&self) -> String {
        let count = self.writable().count();
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        let _ = writeln!(xml, "<imagestack imagecount=\"{}\">", count);

        for (i, format, frame) in self.writable() {
            let meta = &frame.meta;
            let _ = writeln!(
                xml,
                "<image name=\"{}\" thumbnail=\"{}\" flash=\"{}\" gain=\"{}\" exposure=\"{}\" wb=\"{}\" focus=\"{:.2}\" />",
                image_name(self.id, i, format.format),
                thumbnail_name(self.id, i),
                if meta.flash_brightness > 0.0 { 1 } else { 0 },
                (meta.gain * 100.0) as i32,
                meta.exposure,
                meta.white_balance,
                meta.focus,
            );
        }

        xml.push_str("</imagestack>\n");
        xml
    }

    /// Writes the manifest, then every frame with its thumbnail.
    ///
    /// `on_change` runs once after the manifest and once after each frame.
    /// Nothing is written when the set has no writable frame. Returns the
    /// number of images written.
    pub fn write(&self, config: &WriterConfig, on_change: &mut dyn FnMut()) -> Result<usize, WriterError> {
        for (i, (format, frame)) in self.entries.iter().enumerate() {
            if frame.is_valid() && !format.format.is_supported() {
                warn!(
                    "Skipping frame {} of set {}: {}",
                    i,
                    self.id,
                    WriterError::UnsupportedFormat(format.format)
                );
            }
        }

        if self.writable().next().is_none() {
            debug!("Image set {} has no valid frames, nothing written", self.id);
            return Ok(0);
        }

        let path = self.dir.join(manifest_name(self.id));
        std::fs::write(&path, self.manifest()).map_err(|e| WriterError::io(&path, e))?;
        on_change();

        let mut written = 0;
        for (i, format, frame) in self.writable() {
            let rgb = frame.to_rgb().ok_or(WriterError::InvalidFrame(i))?;
            let path = self.dir.join(image_name(self.id, i, format.format));
            save_image(&rgb, &path, *format)?;

            let start = Instant::now();
            let thumbnail = create_thumbnail(
                frame,
                config.thumbnail_width,
                config.thumbnail_height,
                config.thumbnail_blur_radius,
            );
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            metrics::histogram!("thumbnail_ms").record(elapsed);
            debug!("create thumbnail time: {:.3}ms", elapsed);

            let thumb_rgb = match thumbnail {
                Some(thumbnail) => thumbnail.to_rgb(),
                // Non-YUV frames: let the image crate scale it
                None => image::imageops::thumbnail(&rgb, config.thumbnail_width, config.thumbnail_height),
            };
            let path = self.dir.join(thumbnail_name(self.id, i));
            save_image(&thumb_rgb, &path, FileFormat::jpeg(config.thumbnail_quality))?;

            written += 1;
            on_change();
        }

        Ok(written)
    }
}

impl std::fmt::Debug for ImageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSet")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("frames", &self.entries.len())
            .finish()
    }
}

fn save_image(rgb: &RgbImage, path: &Path, format: FileFormat) -> Result<(), WriterError> {
    match format.format {
        OutputFormat::Jpeg => {
            let file = File::create(path).map_err(|e| WriterError::io(path, e))?;
            let mut out = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut out, format.quality.clamp(1, 100)).encode_image(rgb)?;
            out.flush().map_err(|e| WriterError::io(path, e))?;
        }
        OutputFormat::Tiff => rgb.save_with_format(path, ImageFormat::Tiff)?,
        other => return Err(WriterError::UnsupportedFormat(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat, Yuv420Image};
    use bytes::Bytes;
    use std::sync::Arc;

    fn frame(seq: u64, gain: f32, flash: f32) -> Frame {
        let mut image = Yuv420Image::new(64, 48);
        {
            let (y, u, v) = image.planes_mut();
            y.fill(120);
            u.fill(128);
            v.fill(128);
        }
        Frame {
            data: Bytes::from(image.data),
            meta: Arc::new(FrameMetadata {
                sequence: seq,
                width: 64,
                height: 48,
                format: PixelFormat::Yuv420p,
                exposure: 25000,
                gain,
                white_balance: 5200,
                focus: 1.5,
                flash_brightness: flash,
                histogram: Vec::new(),
                sharpness: None,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    fn small_thumbnails() -> WriterConfig {
        WriterConfig {
            thumbnail_width: 16,
            thumbnail_height: 12,
            ..WriterConfig::default()
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(manifest_name(7), "img_0007.xml");
        assert_eq!(image_name(7, 3, OutputFormat::Jpeg), "img_0007_03.jpg");
        assert_eq!(thumbnail_name(12, 0), "thumb_0012_00.jpg");
    }

    #[test]
    fn test_manifest_lists_valid_frames_only() {
        let mut set = ImageSet::new(3, "/tmp");
        set.add(FileFormat::jpeg(95), frame(1, 1.5, 0.0));
        set.add(FileFormat::jpeg(95), Frame::dropped(2));
        set.add(FileFormat::jpeg(95), frame(3, 2.0, 1.0));

        let xml = set.manifest();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<imagestack imagecount=\"2\">\n"));
        assert!(xml.contains(
            "<image name=\"img_0003_00.jpg\" thumbnail=\"thumb_0003_00.jpg\" flash=\"0\" gain=\"150\" exposure=\"25000\" wb=\"5200\" focus=\"1.50\" />"
        ));
        assert!(xml.contains("name=\"img_0003_02.jpg\" thumbnail=\"thumb_0003_02.jpg\" flash=\"1\" gain=\"200\""));
        assert!(!xml.contains("img_0003_01"));
        assert!(xml.ends_with("</imagestack>\n"));
    }

    #[test]
    fn test_write_calls_back_after_manifest_and_each_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = ImageSet::new(0, dir.path());
        set.add(FileFormat::jpeg(90), frame(1, 1.0, 0.0));
        set.add(FileFormat::tiff(), frame(2, 1.0, 0.0));

        let mut calls = 0;
        let written = set.write(&small_thumbnails(), &mut || calls += 1).unwrap();

        assert_eq!(written, 2);
        assert_eq!(calls, 3);
        assert!(dir.path().join("img_0000.xml").exists());
        assert!(dir.path().join("img_0000_01.tif").exists());

        let jpeg = image::open(dir.path().join("img_0000_00.jpg")).unwrap();
        assert_eq!((jpeg.width(), jpeg.height()), (64, 48));
        let thumb = image::open(dir.path().join("thumb_0000_01.jpg")).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (16, 12));
    }

    #[test]
    fn test_empty_set_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = ImageSet::new(1, dir.path());
        set.add(FileFormat::jpeg(95), Frame::dropped(1));

        let mut calls = 0;
        assert_eq!(set.write(&small_thumbnails(), &mut || calls += 1).unwrap(), 0);
        assert_eq!(calls, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unsupported_format_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = ImageSet::new(2, dir.path());
        set.add(
            FileFormat {
                format: OutputFormat::Dng,
                quality: 100,
            },
            frame(1, 1.0, 0.0),
        );
        set.add(FileFormat::jpeg(95), frame(2, 1.0, 0.0));

        assert_eq!(set.write(&small_thumbnails(), &mut || {}).unwrap(), 1);
        assert!(set.manifest().contains("imagecount=\"1\""));
        assert!(!dir.path().join("img_0002_00.dng").exists());
        assert!(dir.path().join("img_0002_01.jpg").exists());
    }
}
