//! Band-file codec.
//!
//! Layout:
//!
//! ```text
//! offset 0    : magic b"FABAND01"
//! offset 8    : u32 LE header length N
//! offset 12   : N bytes of JSON RasterHeader
//! offset 12+N : height*width cells, row-major, little-endian
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write as _};
use std::path::Path;

use forest_alert_raster_models::{CellType, CellWindow, RasterHeader};

use crate::{RasterError, WindowCells};

/// Leading bytes of every band file.
pub const MAGIC: &[u8; 8] = b"FABAND01";

/// Upper bound on the JSON header, to reject garbage before allocating.
const MAX_HEADER_LEN: u32 = 1 << 20;

/// Checks dimensions and the transform.
///
/// # Errors
///
/// Returns [`RasterError::InvalidFormat`] for an empty grid or a
/// non-invertible transform.
pub fn validate_header(header: &RasterHeader) -> Result<(), RasterError> {
    if header.width == 0 || header.height == 0 {
        return Err(RasterError::invalid(format!(
            "grid must be non-empty, got {}x{}",
            header.width, header.height
        )));
    }
    if header.checked_byte_len().is_none() {
        return Err(RasterError::invalid(format!(
            "grid of {}x{} {} cells overflows",
            header.width, header.height, header.cell_type
        )));
    }
    if !header.transform.is_invertible() {
        return Err(RasterError::invalid("affine transform is not invertible"));
    }
    Ok(())
}

/// Encodes class codes as little-endian bytes of `cell_type`.
///
/// # Errors
///
/// Returns [`RasterError::CellOutOfRange`] for a value the type cannot hold.
pub fn encode_cells(cell_type: CellType, cells: &[i64]) -> Result<Vec<u8>, RasterError> {
    let mut out = Vec::with_capacity(cells.len() * cell_type.size_bytes());
    let out_of_range = |value: i64| RasterError::CellOutOfRange { value, cell_type };

    for &value in cells {
        match cell_type {
            CellType::U8 => out.push(u8::try_from(value).map_err(|_| out_of_range(value))?),
            CellType::U16 => out.extend_from_slice(
                &u16::try_from(value)
                    .map_err(|_| out_of_range(value))?
                    .to_le_bytes(),
            ),
            CellType::I16 => out.extend_from_slice(
                &i16::try_from(value)
                    .map_err(|_| out_of_range(value))?
                    .to_le_bytes(),
            ),
            CellType::U32 => out.extend_from_slice(
                &u32::try_from(value)
                    .map_err(|_| out_of_range(value))?
                    .to_le_bytes(),
            ),
            CellType::I32 => out.extend_from_slice(
                &i32::try_from(value)
                    .map_err(|_| out_of_range(value))?
                    .to_le_bytes(),
            ),
        }
    }

    Ok(out)
}

/// Decodes one cell from exactly `cell_type.size_bytes()` bytes.
#[must_use]
pub fn decode_cell(cell_type: CellType, bytes: &[u8]) -> i64 {
    match cell_type {
        CellType::U8 => i64::from(bytes[0]),
        CellType::U16 => i64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
        CellType::I16 => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        CellType::U32 => i64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        CellType::I32 => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
    }
}

fn decode_row(cell_type: CellType, bytes: &[u8], out: &mut Vec<i64>) {
    out.extend(
        bytes
            .chunks_exact(cell_type.size_bytes())
            .map(|cell| decode_cell(cell_type, cell)),
    );
}

fn check_window(header: &RasterHeader, window: CellWindow) -> Result<(), RasterError> {
    if window.fits(header.width, header.height) {
        Ok(())
    } else {
        Err(RasterError::WindowOutOfBounds {
            window,
            width: header.width,
            height: header.height,
        })
    }
}

/// Decodes a window from the full band bytes.
///
/// # Errors
///
/// Returns [`RasterError`] if the window is outside the grid or `data` is
/// shorter than the header promises.
pub fn decode_window(
    header: &RasterHeader,
    data: &[u8],
    window: CellWindow,
) -> Result<WindowCells, RasterError> {
    check_window(header, window)?;
    let needed = header
        .checked_byte_len()
        .ok_or_else(|| RasterError::invalid("grid byte size overflows"))?;
    if data.len() < needed {
        return Err(RasterError::invalid(format!(
            "band holds {} bytes, header needs {needed}",
            data.len()
        )));
    }

    let size = header.cell_type.size_bytes();
    let mut cells = Vec::with_capacity(window.len());
    for row in window.row_start..window.row_end {
        let start = (row * header.width + window.col_start) * size;
        let end = start + window.width() * size;
        decode_row(header.cell_type, &data[start..end], &mut cells);
    }

    Ok(WindowCells::new(window, cells))
}

/// Writes a band file.
///
/// # Errors
///
/// Returns [`RasterError`] on an invalid header, unrepresentable cells, or
/// I/O failure.
pub fn write_band_file(
    path: &Path,
    header: &RasterHeader,
    cells: &[i64],
) -> Result<(), RasterError> {
    validate_header(header)?;
    if cells.len() != header.cell_count() {
        return Err(RasterError::invalid(format!(
            "expected {} cells, got {}",
            header.cell_count(),
            cells.len()
        )));
    }

    let header_json = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header_json.len())
        .ok()
        .filter(|len| *len <= MAX_HEADER_LEN)
        .ok_or_else(|| RasterError::invalid("header too large"))?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(&header_json)?;
    writer.write_all(&encode_cells(header.cell_type, cells)?)?;
    writer.flush()?;

    Ok(())
}

/// Reads the magic and header, leaving `reader` positioned at the first
/// cell. Returns the header and the byte offset of the band data.
///
/// # Errors
///
/// Returns [`RasterError`] for a bad magic, oversized or invalid header, or
/// I/O failure.
pub fn read_header(reader: &mut impl Read) -> Result<(RasterHeader, u64), RasterError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(RasterError::invalid("missing FABAND01 magic"));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let header_len = u32::from_le_bytes(len_bytes);
    if header_len > MAX_HEADER_LEN {
        return Err(RasterError::invalid(format!(
            "header length {header_len} exceeds {MAX_HEADER_LEN}"
        )));
    }

    let mut header_json = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_json)?;
    let header: RasterHeader = serde_json::from_slice(&header_json)?;
    validate_header(&header)?;

    Ok((header, 12 + u64::from(header_len)))
}

/// Reads a whole band file.
///
/// # Errors
///
/// Returns [`RasterError`] if the file is unreadable, malformed, or truncated.
pub fn read_band_file(path: &Path) -> Result<(RasterHeader, Vec<u8>), RasterError> {
    let mut file = File::open(path)?;
    let (header, data_offset) = read_header(&mut file)?;

    let byte_len = header.byte_len();
    let available = file.metadata()?.len().saturating_sub(data_offset);
    if available < byte_len as u64 {
        return Err(RasterError::invalid(format!(
            "{} is truncated: {available} of {byte_len} band bytes",
            path.display(),
        )));
    }

    let mut data = vec![0u8; byte_len];
    file.read_exact(&mut data)?;

    Ok((header, data))
}

/// Opens `path` and reads only the rows and columns of `window`.
///
/// # Errors
///
/// Returns [`RasterError`] if the file is unreadable or malformed, or the
/// window is outside the grid.
pub fn read_window_from_file(
    path: &Path,
    window: CellWindow,
) -> Result<(RasterHeader, WindowCells), RasterError> {
    let mut file = File::open(path)?;
    let (header, data_offset) = read_header(&mut file)?;
    check_window(&header, window)?;

    let size = header.cell_type.size_bytes();
    let mut row_bytes = vec![0u8; window.width() * size];
    let mut cells = Vec::with_capacity(window.len());

    for row in window.row_start..window.row_end {
        let offset = ((row * header.width + window.col_start) * size) as u64;
        file.seek(SeekFrom::Start(data_offset + offset))?;
        file.read_exact(&mut row_bytes)?;
        decode_row(header.cell_type, &row_bytes, &mut cells);
    }

    Ok((header, WindowCells::new(window, cells)))
}
