//! Raster backings shared by overlay workers.
//!
//! Workers only ever need one capability: "decode window `[r0, r1) x
//! [c0, c1)`". [`WindowSource`] captures it, and [`select_backing`] picks one
//! of three implementations at setup time:
//!
//! 1. [`SharedMemorySegment`]: a named segment in the POSIX shared-memory
//!    namespace (`/dev/shm`), filled once and mapped read-only.
//! 2. [`MappedTempFile`]: a temporary file with an identical byte copy,
//!    mapped read-only.
//! 3. [`StreamingSource`]: re-opens the grid's band file for every window.
//!
//! The segment and the temporary file are removed when the backing is
//! dropped, so every exit path (including unwinding) releases them.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use forest_alert_raster_models::{BackingKind, CellWindow, RasterHeader};
use memmap2::{Mmap, MmapMut};
use tempfile::NamedTempFile;

use crate::{RasterError, RasterGrid, WindowCells, codec};

/// Directory backing the POSIX shared-memory namespace on Linux.
const SHM_DIR: &str = "/dev/shm";

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Read-only access to raster windows.
///
/// Implementations must be shareable across worker threads.
pub trait WindowSource: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> BackingKind;

    /// Metadata of the grid being served.
    fn header(&self) -> &RasterHeader;

    /// Decodes the cells of `window`.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the window is outside the grid or the
    /// backing store cannot be read.
    fn read_window(&self, window: CellWindow) -> Result<WindowCells, RasterError>;
}

/// Whole-band copy in a named shared-memory segment.
pub struct SharedMemorySegment {
    map: Mmap,
    name: String,
    path: PathBuf,
    header: RasterHeader,
}

impl SharedMemorySegment {
    /// Creates a segment sized to the band and copies the grid into it.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::BackingUnavailable`] when the platform has no
    /// shared-memory namespace, or [`RasterError::Io`] if the segment cannot
    /// be created or mapped.
    pub fn create(grid: &RasterGrid) -> Result<Self, RasterError> {
        let dir = Path::new(SHM_DIR);
        if !cfg!(target_os = "linux") || !dir.is_dir() {
            return Err(RasterError::BackingUnavailable {
                kind: BackingKind::SharedMemory,
                message: format!("{SHM_DIR} is not available on this platform"),
            });
        }

        let name = format!(
            "forest-alert-{}-{}",
            std::process::id(),
            SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = dir.join(&name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        // From here on the segment exists; drop the file on any failure.
        let unlink = UnlinkOnError(Some(path.clone()));
        let map = fill_and_seal(&file, grid.as_bytes())?;
        unlink.disarm();

        log::debug!(
            "Created shared memory segment {name} ({} bytes)",
            grid.as_bytes().len()
        );

        Ok(Self {
            map,
            name,
            path,
            header: grid.header().clone(),
        })
    }

    /// Name of the segment within the shared-memory namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SharedMemorySegment {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released shared memory segment {}", self.name),
            Err(e) => log::warn!("Failed to release shared memory segment {}: {e}", self.name),
        }
    }
}

impl WindowSource for SharedMemorySegment {
    fn kind(&self) -> BackingKind {
        BackingKind::SharedMemory
    }

    fn header(&self) -> &RasterHeader {
        &self.header
    }

    fn read_window(&self, window: CellWindow) -> Result<WindowCells, RasterError> {
        codec::decode_window(&self.header, &self.map, window)
    }
}

/// Whole-band copy in a memory-mapped temporary file.
pub struct MappedTempFile {
    // Declared before `file` so the mapping is dropped first.
    map: Mmap,
    file: NamedTempFile,
    header: RasterHeader,
}

impl MappedTempFile {
    /// Writes the grid to a fresh temporary file and maps it read-only.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Io`] if the file cannot be created, written,
    /// or mapped.
    pub fn create(grid: &RasterGrid) -> Result<Self, RasterError> {
        let mut file = tempfile::Builder::new()
            .prefix("forest-alert-")
            .suffix(".band")
            .tempfile()?;
        file.write_all(grid.as_bytes())?;
        file.flush()?;

        // SAFETY: the temporary file is private to this process and is never
        // written again once mapped.
        let map = unsafe { Mmap::map(file.as_file())? };

        log::debug!(
            "Mapped raster copy at {} ({} bytes)",
            file.path().display(),
            map.len()
        );

        Ok(Self {
            map,
            file,
            header: grid.header().clone(),
        })
    }

    /// Location of the temporary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl WindowSource for MappedTempFile {
    fn kind(&self) -> BackingKind {
        BackingKind::MappedFile
    }

    fn header(&self) -> &RasterHeader {
        &self.header
    }

    fn read_window(&self, window: CellWindow) -> Result<WindowCells, RasterError> {
        codec::decode_window(&self.header, &self.map, window)
    }
}

/// Reads windows straight from the grid's band file.
#[derive(Debug)]
pub struct StreamingSource {
    path: PathBuf,
    header: RasterHeader,
}

impl StreamingSource {
    /// Uses the band file the grid was loaded from.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::BackingUnavailable`] if the grid has no source
    /// file or the file no longer matches the grid's header.
    pub fn create(grid: &RasterGrid) -> Result<Self, RasterError> {
        let unavailable = |message: String| RasterError::BackingUnavailable {
            kind: BackingKind::Streaming,
            message,
        };

        let path = grid
            .source_path()
            .ok_or_else(|| unavailable("grid was not loaded from a file".to_owned()))?;

        let mut file = File::open(path)?;
        let (on_disk, _) = codec::read_header(&mut file)?;
        if &on_disk != grid.header() {
            return Err(unavailable(format!(
                "{} changed since it was loaded",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            header: on_disk,
        })
    }
}

impl WindowSource for StreamingSource {
    fn kind(&self) -> BackingKind {
        BackingKind::Streaming
    }

    fn header(&self) -> &RasterHeader {
        &self.header
    }

    fn read_window(&self, window: CellWindow) -> Result<WindowCells, RasterError> {
        let (_, cells) = codec::read_window_from_file(&self.path, window)?;
        Ok(cells)
    }
}

/// Creates the backing requested by `kind`.
///
/// [`BackingKind::Auto`] tries shared memory, then a mapped temporary file,
/// then streaming, and returns the first that works. Any other kind is used
/// as-is and fails if unavailable.
///
/// # Errors
///
/// Returns the last strategy's error when nothing could be set up.
pub fn select_backing(
    grid: &RasterGrid,
    kind: BackingKind,
) -> Result<Box<dyn WindowSource>, RasterError> {
    let backing: Box<dyn WindowSource> = match kind {
        BackingKind::SharedMemory => Box::new(SharedMemorySegment::create(grid)?),
        BackingKind::MappedFile => Box::new(MappedTempFile::create(grid)?),
        BackingKind::Streaming => Box::new(StreamingSource::create(grid)?),
        BackingKind::Auto => match SharedMemorySegment::create(grid) {
            Ok(segment) => Box::new(segment),
            Err(e) => {
                log::info!("Shared memory unavailable ({e}), trying mapped temp file");
                match MappedTempFile::create(grid) {
                    Ok(mapped) => Box::new(mapped),
                    Err(e) => {
                        log::info!("Mapped temp file unavailable ({e}), falling back to streaming");
                        Box::new(StreamingSource::create(grid)?)
                    }
                }
            }
        },
    };

    log::info!("Serving raster windows from {} backing", backing.kind());
    Ok(backing)
}

fn fill_and_seal(file: &File, bytes: &[u8]) -> Result<Mmap, RasterError> {
    file.set_len(bytes.len() as u64)?;

    // SAFETY: the segment was just created with `create_new` under a
    // process-unique name, so no other mapping of it exists.
    let mut map = unsafe { MmapMut::map_mut(file)? };
    map.copy_from_slice(bytes);
    map.flush()?;

    Ok(map.make_read_only()?)
}

/// Removes a half-created segment unless disarmed.
struct UnlinkOnError(Option<PathBuf>);

impl UnlinkOnError {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for UnlinkOnError {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use forest_alert_raster_models::{AffineTransform, CellType};

    use super::*;

    fn header() -> RasterHeader {
        RasterHeader {
            width: 4,
            height: 3,
            cell_type: CellType::U16,
            transform: AffineTransform::north_up(0.0, 3.0, 1.0),
            nodata: Some(0),
            crs: None,
        }
    }

    fn cells() -> Vec<i64> {
        (1..=12).collect()
    }

    fn window() -> CellWindow {
        CellWindow {
            row_start: 1,
            row_end: 3,
            col_start: 1,
            col_end: 3,
        }
    }

    #[test]
    fn mapped_temp_file_serves_windows_and_cleans_up() {
        let grid = RasterGrid::from_cells(header(), &cells()).unwrap();
        let mapped = MappedTempFile::create(&grid).unwrap();
        let path = mapped.path().to_path_buf();
        assert!(path.exists());

        assert_eq!(mapped.read_window(window()).unwrap().cells(), &[6, 7, 10, 11]);

        drop(mapped);
        assert!(!path.exists());
    }

    #[test]
    fn streaming_requires_a_source_file() {
        let grid = RasterGrid::from_cells(header(), &cells()).unwrap();
        let err = StreamingSource::create(&grid).err().unwrap();
        assert!(matches!(
            err,
            RasterError::BackingUnavailable {
                kind: BackingKind::Streaming,
                ..
            }
        ));
    }

    #[test]
    fn streaming_reads_from_the_band_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.band");
        codec::write_band_file(&path, &header(), &cells()).unwrap();
        let grid = RasterGrid::open(&path).unwrap();

        let streaming = StreamingSource::create(&grid).unwrap();
        assert_eq!(streaming.read_window(window()).unwrap().cells(), &[6, 7, 10, 11]);
    }

    #[test]
    fn every_backing_matches_the_in_memory_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.band");
        codec::write_band_file(&path, &header(), &cells()).unwrap();
        let grid = RasterGrid::open(&path).unwrap();
        let expected = grid.read_window(window()).unwrap();

        for kind in [
            BackingKind::Auto,
            BackingKind::MappedFile,
            BackingKind::Streaming,
        ] {
            let backing = select_backing(&grid, kind).unwrap();
            assert_eq!(backing.read_window(window()).unwrap(), expected, "{kind}");
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn shared_memory_segment_is_released_on_drop() {
        if !Path::new(SHM_DIR).is_dir() {
            return;
        }
        let grid = RasterGrid::from_cells(header(), &cells()).unwrap();
        let segment = SharedMemorySegment::create(&grid).unwrap();
        let path = Path::new(SHM_DIR).join(segment.name());
        assert!(path.exists());
        assert_eq!(segment.read_window(window()).unwrap().cells(), &[6, 7, 10, 11]);

        drop(segment);
        assert!(!path.exists());
    }

    #[test]
    fn auto_never_picks_streaming_when_memory_backings_work() {
        let grid = RasterGrid::from_cells(header(), &cells()).unwrap();
        let backing = select_backing(&grid, BackingKind::Auto).unwrap();
        assert_ne!(backing.kind(), BackingKind::Streaming);
    }
}
