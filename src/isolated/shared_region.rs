//! Shared memory region for moving output frames out of a worker process.
//!
//! The region is a POSIX shared memory object sized once, at setup, for the
//! largest frame the pipeline will carry. The host creates it and the worker
//! attaches to it by name. Each written frame is placed at the same fixed
//! offset, so a reader only needs its shape to slice it out.
//!
//! # Layout
//!
//! ```text
//! +--------------------------- header (64 bytes) ---------------------------+
//! | magic | generation | rows | cols | planes | seq | capacity | reserved   |
//! +-------------------------------------------------------------------------+
//! | samples: capacity x f32, plane-major, frame at offset 0                 |
//! +-------------------------------------------------------------------------+
//! ```
//!
//! # Synchronization
//!
//! The writer bumps `generation` to an odd value, copies the samples and
//! shape, then bumps it to the next even value. A reader copies only while
//! `generation` is even and unchanged across its copy, retrying a bounded
//! number of times otherwise. Readers never block the writer, and any number
//! of readers can copy concurrently. Shape notifications travel separately
//! on a small [`ShapeChannel`]; a reader that has never been notified
//! reports "no frame yet" without touching the samples.

use crate::error::{PipelineError, Result};
use crate::pipeline::channel::ShapeChannel;
use crate::types::{Frame, FrameShape};
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const MAGIC: u64 = 0x4652_4d50_4950_4531; // "FRMPIPE1"
const HEADER_BYTES: usize = 64;
const MAX_READ_RETRIES: usize = 64;

const H_MAGIC: usize = 0;
const H_GENERATION: usize = 1;
const H_ROWS: usize = 2;
const H_COLS: usize = 3;
const H_PLANES: usize = 4;
const H_SEQ: usize = 5;
const H_CAPACITY: usize = 6;

static REGION_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A mapped shared memory region
pub struct SharedRegion {
    name: String,
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
    /// The creator unlinks the name on drop
    owner: bool,
}

// The mapping is plain memory; all shared fields are accessed atomically and
// sample copies are guarded by the generation counter.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// A name unique to this process, valid on every supported platform
    pub fn unique_name() -> String {
        format!(
            "/framepipe-{}-{}",
            std::process::id(),
            REGION_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Create a new region able to hold a frame of `max_shape`
    pub fn create(name: &str, max_shape: FrameShape) -> Result<Self> {
        let capacity = max_shape.len();
        if capacity == 0 {
            return Err(PipelineError::SharedRegion(
                "region shape must hold at least one sample".to_string(),
            ));
        }
        let len = HEADER_BYTES + capacity * std::mem::size_of::<f32>();
        let c_name = c_name(name)?;

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(os_error(&format!("shm_open({}) failed", name)));
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } < 0 {
            let err = os_error("ftruncate failed");
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        let ptr = match map(fd, len) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        let region = Self {
            name: name.to_string(),
            ptr,
            len,
            capacity,
            owner: true,
        };
        region.slot(H_CAPACITY).store(capacity as u64, Ordering::Relaxed);
        region.slot(H_GENERATION).store(0, Ordering::Relaxed);
        region.slot(H_MAGIC).store(MAGIC, Ordering::Release);

        tracing::debug!("Created shared region {} ({} bytes, {})", name, len, max_shape);
        Ok(region)
    }

    /// Attach to a region created by another process (or this one)
    pub fn attach(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as libc::c_uint) };
        if fd < 0 {
            return Err(os_error(&format!("shm_open({}) failed", name)));
        }

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let err = os_error("fstat failed");
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let len = stat.st_size as usize;
        if len < HEADER_BYTES {
            unsafe { libc::close(fd) };
            return Err(PipelineError::SharedRegion(format!(
                "region {} is too small ({} bytes)",
                name, len
            )));
        }

        let ptr = map(fd, len)?;
        let mut region = Self {
            name: name.to_string(),
            ptr,
            len,
            capacity: 0,
            owner: false,
        };
        if region.slot(H_MAGIC).load(Ordering::Acquire) != MAGIC {
            return Err(PipelineError::SharedRegion(format!(
                "region {} has not been initialised",
                name
            )));
        }
        let capacity = region.slot(H_CAPACITY).load(Ordering::Relaxed) as usize;
        if HEADER_BYTES + capacity * std::mem::size_of::<f32>() > len {
            return Err(PipelineError::SharedRegion(format!(
                "region {} header claims more samples than it maps",
                name
            )));
        }
        region.capacity = capacity;
        Ok(region)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of `f32` samples the region can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of completed writes
    pub fn writes(&self) -> u64 {
        self.slot(H_GENERATION).load(Ordering::Acquire) / 2
    }

    fn slot(&self, index: usize) -> &AtomicU64 {
        debug_assert!(index * 8 < HEADER_BYTES);
        // Page-aligned mapping, header slots are 8-byte aligned
        unsafe { &*(self.ptr.as_ptr() as *const AtomicU64).add(index) }
    }

    fn samples(&self) -> *mut f32 {
        unsafe { self.ptr.as_ptr().add(HEADER_BYTES) as *mut f32 }
    }

    /// Copy `frame` into the region. Single writer only.
    fn write(&self, frame: &Frame) -> Result<()> {
        let data = frame.data();
        if data.len() > self.capacity {
            return Err(PipelineError::SharedRegion(format!(
                "frame {} needs {} samples, region holds {}",
                frame.shape(),
                data.len(),
                self.capacity
            )));
        }

        let generation = self.slot(H_GENERATION);
        let g = generation.load(Ordering::Relaxed);
        generation.store(g.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.samples(), data.len()) };
        let shape = frame.shape();
        self.slot(H_ROWS).store(shape.rows as u64, Ordering::Relaxed);
        self.slot(H_COLS).store(shape.cols as u64, Ordering::Relaxed);
        self.slot(H_PLANES).store(shape.planes as u64, Ordering::Relaxed);
        self.slot(H_SEQ).store(frame.seq(), Ordering::Relaxed);

        generation.store(g.wrapping_add(2), Ordering::Release);
        Ok(())
    }

    /// Copy the current frame out, or `None` if nothing was ever written
    fn read(&self) -> Result<Option<Frame>> {
        let generation = self.slot(H_GENERATION);
        for _ in 0..MAX_READ_RETRIES {
            let before = generation.load(Ordering::Acquire);
            if before == 0 {
                return Ok(None);
            }
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let shape = FrameShape::with_planes(
                self.slot(H_ROWS).load(Ordering::Relaxed) as usize,
                self.slot(H_COLS).load(Ordering::Relaxed) as usize,
                self.slot(H_PLANES).load(Ordering::Relaxed) as usize,
            );
            let seq = self.slot(H_SEQ).load(Ordering::Relaxed);
            let len = shape.len();
            if len > self.capacity {
                // Torn header, the generation check below will fail
                std::hint::spin_loop();
                continue;
            }

            let mut data = vec![0.0f32; len];
            unsafe { std::ptr::copy_nonoverlapping(self.samples(), data.as_mut_ptr(), len) };
            fence(Ordering::Acquire);

            if generation.load(Ordering::Relaxed) == before {
                return Ok(Some(Frame::new(shape, data)?.with_seq(seq)));
            }
        }
        Err(PipelineError::SharedRegion(format!(
            "region {} kept changing during {} read attempts",
            self.name, MAX_READ_RETRIES
        )))
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
        if self.owner {
            if let Ok(c_name) = c_name(&self.name) {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            tracing::debug!("Removed shared region {}", self.name);
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("owner", &self.owner)
            .finish()
    }
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|_| PipelineError::SharedRegion(format!("invalid region name {:?}", name)))
}

fn os_error(what: &str) -> PipelineError {
    PipelineError::SharedRegion(format!("{}: {}", what, std::io::Error::last_os_error()))
}

/// Map `len` bytes of `fd` read/write and close the descriptor
fn map(fd: libc::c_int, len: usize) -> Result<NonNull<u8>> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    let err = (ptr == libc::MAP_FAILED).then(|| os_error("mmap failed"));
    unsafe { libc::close(fd) };
    match err {
        Some(err) => Err(err),
        None => NonNull::new(ptr as *mut u8)
            .ok_or_else(|| PipelineError::SharedRegion("mmap returned null".to_string())),
    }
}

/// Write side: copies frames in and optionally notifies a shape channel
#[derive(Debug)]
pub struct SharedRegionWriter {
    region: SharedRegion,
    notify: Option<Arc<ShapeChannel>>,
}

impl SharedRegionWriter {
    pub fn new(region: SharedRegion) -> Self {
        Self {
            region,
            notify: None,
        }
    }

    /// Push each written shape onto `shapes` after the copy completes
    pub fn with_notify(mut self, shapes: Arc<ShapeChannel>) -> Self {
        self.notify = Some(shapes);
        self
    }

    /// Copy `frame` to the fixed offset and return its shape
    pub fn write(&mut self, frame: &Frame) -> Result<FrameShape> {
        self.region.write(frame)?;
        let shape = frame.shape();
        if let Some(shapes) = &self.notify {
            shapes.push(shape);
        }
        Ok(shape)
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}

/// Read side: copies frames out after observing a shape notification
#[derive(Debug)]
pub struct SharedRegionReader {
    region: SharedRegion,
    shapes: Arc<ShapeChannel>,
    /// Sequence number of the last frame handed out
    last_seq: Option<u64>,
}

impl SharedRegionReader {
    pub fn new(region: SharedRegion, shapes: Arc<ShapeChannel>) -> Self {
        Self {
            region,
            shapes,
            last_seq: None,
        }
    }

    /// The channel shape notifications must be pushed onto
    pub fn shapes(&self) -> &Arc<ShapeChannel> {
        &self.shapes
    }

    /// Consume pending notifications and return a private copy of the newest
    /// frame, or `None` if there is nothing new.
    ///
    /// A frame already returned is never returned again, even when several
    /// notifications refer to it.
    pub fn read_next(&mut self) -> Result<Option<Frame>> {
        let newest = self.shapes.drain_all().into_iter().last();
        match newest {
            None => Ok(None),
            Some(shape) if shape.is_empty() => Ok(None),
            Some(_) => {
                let frame = match self.region.read()? {
                    Some(frame) => frame,
                    None => return Ok(None),
                };
                if self.last_seq.is_some_and(|last| frame.seq() <= last) {
                    return Ok(None);
                }
                self.last_seq = Some(frame.seq());
                Ok(Some(frame))
            }
        }
    }

    /// Copy of whatever the region currently holds, without consuming
    /// notifications. `None` before the first write.
    pub fn read_latest(&self) -> Result<Option<Frame>> {
        self.region.read()
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(rows: usize, cols: usize, seq: u64) -> Frame {
        Frame::from_fn(FrameShape::new(rows, cols), |r, c, _| (r * 1000 + c) as f32 + 0.25).with_seq(seq)
    }

    fn pair(max_shape: FrameShape) -> (SharedRegionWriter, SharedRegionReader) {
        let name = SharedRegion::unique_name();
        let owner = SharedRegion::create(&name, max_shape).unwrap();
        let attached = SharedRegion::attach(&name).unwrap();
        let shapes = ShapeChannel::shared(2, 1);
        (
            SharedRegionWriter::new(attached).with_notify(shapes.clone()),
            SharedRegionReader::new(owner, shapes),
        )
    }

    #[test]
    fn test_read_before_write_is_none() {
        let (_writer, mut reader) = pair(FrameShape::new(8, 8));
        assert!(reader.read_next().unwrap().is_none());
        assert!(reader.read_latest().unwrap().is_none());
    }

    #[test]
    fn test_empty_shape_sentinel_is_none() {
        let (_writer, mut reader) = pair(FrameShape::new(8, 8));
        reader.shapes().push(FrameShape::EMPTY);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_round_trip_is_bit_identical() {
        let (mut writer, mut reader) = pair(FrameShape::new(48, 64));
        let frame = test_frame(30, 40, 1);
        assert_eq!(writer.write(&frame).unwrap(), FrameShape::new(30, 40));

        let copy = reader.read_next().unwrap().unwrap();
        assert_eq!(copy, frame);
        assert!(copy
            .data()
            .iter()
            .zip(frame.data())
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_copy_is_private() {
        let (mut writer, mut reader) = pair(FrameShape::new(4, 4));
        writer.write(&test_frame(4, 4, 1)).unwrap();
        let first = reader.read_next().unwrap().unwrap();
        writer
            .write(&Frame::from_fn(FrameShape::new(4, 4), |_, _, _| -1.0).with_seq(2))
            .unwrap();
        assert_eq!(first, test_frame(4, 4, 1));
        assert_eq!(reader.read_next().unwrap().unwrap().data(), &[-1.0; 16]);
    }

    #[test]
    fn test_frame_delivered_once() {
        let (mut writer, mut reader) = pair(FrameShape::new(4, 4));
        writer.write(&test_frame(2, 2, 5)).unwrap();
        assert!(reader.read_next().unwrap().is_some());
        // Stale notification for the same frame
        reader.shapes().push(FrameShape::new(2, 2));
        assert!(reader.read_next().unwrap().is_none());
        // Re-reading is always possible
        assert_eq!(reader.read_latest().unwrap().unwrap().seq(), 5);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let (mut writer, mut reader) = pair(FrameShape::new(4, 4));
        assert!(writer.write(&test_frame(5, 4, 1)).is_err());
        assert!(reader.read_next().unwrap().is_none());
        assert_eq!(writer.region().writes(), 0);
    }

    #[test]
    fn test_attach_unknown_name_fails() {
        assert!(SharedRegion::attach("/framepipe-does-not-exist").is_err());
    }

    #[test]
    fn test_create_rejects_empty_shape() {
        assert!(SharedRegion::create(&SharedRegion::unique_name(), FrameShape::EMPTY).is_err());
    }

    #[test]
    fn test_concurrent_readers_see_consistent_frames() {
        let name = SharedRegion::unique_name();
        let owner = SharedRegion::create(&name, FrameShape::new(64, 64)).unwrap();
        let mut writer = SharedRegionWriter::new(SharedRegion::attach(&name).unwrap());

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let region = SharedRegion::attach(&name).unwrap();
                std::thread::spawn(move || {
                    let reader = SharedRegionReader::new(region, ShapeChannel::shared(1, 1));
                    for _ in 0..500 {
                        if let Ok(Some(frame)) = reader.read_latest() {
                            // Every sample of a frame carries its seq
                            assert!(frame.data().iter().all(|&v| v == frame.seq() as f32));
                        }
                    }
                })
            })
            .collect();

        for seq in 1..=500u64 {
            let frame = Frame::from_fn(FrameShape::new(64, 64), |_, _, _| seq as f32).with_seq(seq);
            writer.write(&frame).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(owner.writes(), 500);
    }
}
