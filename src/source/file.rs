//! Image-file frame source
//!
//! Replays a single image or every image in a directory as a stream of
//! single-plane `f32` frames (luma, normalized to `0.0..=1.0`). Directory
//! entries are played in file-name order. The source loops by default, so a
//! single still image becomes an endless stream suitable for reprocessing.

use super::FrameSource;
use crate::error::{PipelineError, Result, ResultExt};
use crate::types::{ComponentConfig, Frame, FrameShape};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const IMAGE_EXTENSIONS: &[&str] = &["png", "tif", "tiff", "jpg", "jpeg"];

/// Frame source reading image files
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    files: Vec<PathBuf>,
    /// Decoded frames, filled at open when preloading
    cache: Vec<Frame>,
    preload: bool,
    looping: bool,
    interval: Option<Duration>,
    next_due: Option<Instant>,
    index: usize,
    open: bool,
}

impl FileSource {
    /// Create a looping, unpaced, preloading source for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            files: Vec::new(),
            cache: Vec::new(),
            preload: true,
            looping: true,
            interval: None,
            next_due: None,
            index: 0,
            open: false,
        }
    }

    /// Pace to `fps` frames per second; 0 disables pacing
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Decode every file at open (`true`) or one file per frame (`false`)
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Build from `path` (required), `fps`, `loop` and `preload` parameters
    pub fn from_config(config: &ComponentConfig) -> Result<Self> {
        let path = config
            .str_opt("path")?
            .ok_or_else(|| PipelineError::invalid_parameter("path", "a file or directory is required"))?;
        Ok(Self::new(path)
            .with_fps(config.float_or("fps", 0.0)?)
            .with_looping(config.bool_or("loop", true)?)
            .with_preload(config.bool_or("preload", true)?))
    }

    /// Files that will be played, in order (empty until opened)
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn list_files(path: &Path) -> Result<Vec<PathBuf>> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        if !path.is_dir() {
            return Err(PipelineError::Source(format!(
                "{} is neither a file nor a directory",
                path.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file = entry?.path();
            let is_image = file
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if file.is_file() && is_image {
                files.push(file);
            }
        }
        files.sort();
        Ok(files)
    }

    fn decode(path: &Path) -> Result<Frame> {
        let luma = image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_luma32f();
        let shape = FrameShape::new(luma.height() as usize, luma.width() as usize);
        Frame::new(shape, luma.into_raw())
    }

    fn frame_at(&self, index: usize) -> Result<Frame> {
        if self.preload {
            self.cache
                .get(index)
                .cloned()
                .ok_or_else(|| PipelineError::Source(format!("frame {} out of range", index)))
        } else {
            Self::decode(&self.files[index])
        }
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn open(&mut self) -> Result<()> {
        self.files = Self::list_files(&self.path)?;
        if self.files.is_empty() {
            return Err(PipelineError::Source(format!(
                "no images found in {}",
                self.path.display()
            )));
        }
        if self.preload {
            self.cache = self
                .files
                .iter()
                .map(|f| Self::decode(f))
                .collect::<Result<Vec<_>>>()?;
        }
        self.index = 0;
        self.next_due = None;
        self.open = true;
        tracing::info!(
            "File source opened: {} image(s) from {}",
            self.files.len(),
            self.path.display()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(PipelineError::Source("file source is not open".to_string()));
        }
        if self.index >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.index = 0;
        }

        if let Some(interval) = self.interval {
            let now = Instant::now();
            match self.next_due {
                Some(due) if now < due => return Ok(None),
                _ => self.next_due = Some(now + interval),
            }
        }

        // Move past the file even if it fails to decode
        let index = self.index;
        self.index += 1;
        Ok(Some(self.frame_at(index)?))
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.cache.clear();
        self.files.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(4, 3, Luma([value])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_single_file_loops() {
        let dir = TempDir::new().unwrap();
        let path = write_png(dir.path(), "still.png", 255);

        let mut source = FileSource::new(&path);
        source.open().unwrap();
        for _ in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.shape(), FrameShape::new(3, 4));
            assert!(frame.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
        }
    }

    #[test]
    fn test_directory_in_name_order_without_loop() {
        let dir = TempDir::new().unwrap();
        write_png(dir.path(), "b.png", 0);
        write_png(dir.path(), "a.png", 255);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut source = FileSource::new(dir.path()).with_looping(false).with_preload(false);
        source.open().unwrap();
        assert_eq!(source.files().len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert!((first.data()[0] - 1.0).abs() < 1e-6);
        assert_eq!(second.data()[0], 0.0);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"truncated").unwrap();
        write_png(dir.path(), "b.png", 0);

        let mut source = FileSource::new(dir.path()).with_looping(false).with_preload(false);
        source.open().unwrap();
        assert!(source.next_frame().is_err());
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.data()[0], 0.0);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_path_fails_open() {
        let dir = TempDir::new().unwrap();
        let mut source = FileSource::new(dir.path().join("nope"));
        assert!(source.open().is_err());

        let mut empty = FileSource::new(dir.path());
        assert!(empty.open().is_err());
    }

    #[test]
    fn test_from_config_requires_path() {
        assert!(FileSource::from_config(&ComponentConfig::new("file")).is_err());
        let cfg = ComponentConfig::new("file").with("path", "/tmp/x.png").with("loop", false);
        let source = FileSource::from_config(&cfg).unwrap();
        assert!(!source.looping);
    }
}
