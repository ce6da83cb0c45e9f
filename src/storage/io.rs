//! # Page I/O and Sidecar Format
//!
//! [`PageIO`] treats the `.dat` file as a flat array of fixed-size pages:
//! page `i` occupies bytes `[i * page_bytes, (i + 1) * page_bytes)`. Reads
//! and writes are whole-page, positional, and synchronous. Writing beyond
//! the current end of file extends it; reading a page that was never
//! written is an error surfaced to the caller.
//!
//! ## Sidecar Layout (`.bin`)
//!
//! ```text
//! Offset  Size        Field
//! ------  ----------  -----------------------------------------
//! 0       8           magic ("pairtree")
//! 8       4           version
//! 12      4           page_bytes
//! 16      4           pair_len
//! 20      4           block_size
//! 24      4           high_water
//! 28      4           free_len
//! 32      8           reserved
//! 40      4*free_len  free page indices (little-endian u32)
//! ...     page_bytes  root page image
//! ```
//!
//! The geometry fields are validated against the caller's configuration on
//! open, so a store created with one key width or node capacity cannot be
//! silently reopened with another.
//!
//! All multi-byte fields are little-endian via the zerocopy `U32` wrapper,
//! and the header struct derives the full zerocopy set so it can be read
//! straight out of the file bytes without copying field by field.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::Geometry;

pub const SIDECAR_MAGIC: &[u8; 8] = b"pairtree";
pub const SIDECAR_VERSION: u32 = 1;
pub const SIDECAR_HEADER_LEN: usize = 40;

/// Positional whole-page I/O over the `.dat` file.
#[derive(Debug)]
pub struct PageIO {
    file: File,
    page_bytes: usize,
}

impl PageIO {
    /// Opens (creating if absent) the page file at `path`.
    pub fn open(path: &Path, page_bytes: usize) -> Result<Self> {
        ensure!(page_bytes > 0, "page size must be non-zero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open page file {}", path.display()))?;

        Ok(Self { file, page_bytes })
    }

    pub fn page_bytes(&self) -> usize {
        self.page_bytes
    }

    /// Reads page `page_no` into `buf`.
    pub fn read_page(&mut self, page_no: u32, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.page_bytes,
            "read buffer size {} != page size {}",
            buf.len(),
            self.page_bytes
        );

        let offset = page_no as u64 * self.page_bytes as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(buf)
            .wrap_err_with(|| format!("short read of page {}", page_no))
    }

    /// Writes page `page_no` from `data`.
    pub fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_bytes,
            "write buffer size {} != page size {}",
            data.len(),
            self.page_bytes
        );

        let offset = page_no as u64 * self.page_bytes as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .write_all(data)
            .wrap_err_with(|| format!("failed to write page {}", page_no))
    }

    /// Flushes the page file to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data().wrap_err("failed to sync page file")
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SidecarHeader {
    magic: [u8; 8],
    version: U32,
    page_bytes: U32,
    pair_len: U32,
    block_size: U32,
    high_water: U32,
    free_len: U32,
    reserved: [u8; 8],
}

const _: () = assert!(size_of::<SidecarHeader>() == SIDECAR_HEADER_LEN);

impl SidecarHeader {
    pub fn new(geometry: Geometry, high_water: u32, free_len: u32) -> Self {
        Self {
            magic: *SIDECAR_MAGIC,
            version: U32::new(SIDECAR_VERSION),
            page_bytes: U32::new(geometry.page_bytes as u32),
            pair_len: U32::new(geometry.pair_len as u32),
            block_size: U32::new(geometry.block_size as u32),
            high_water: U32::new(high_water),
            free_len: U32::new(free_len),
            reserved: [0u8; 8],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= SIDECAR_HEADER_LEN,
            "buffer too small for SidecarHeader: {} < {}",
            bytes.len(),
            SIDECAR_HEADER_LEN
        );

        Self::ref_from_bytes(&bytes[..SIDECAR_HEADER_LEN])
            .map_err(|e| eyre::eyre!("failed to read SidecarHeader: {:?}", e))
    }

    /// Checks magic, version, and geometry against the opener's view.
    pub fn validate(&self, geometry: Geometry) -> Result<()> {
        ensure!(
            self.magic == *SIDECAR_MAGIC,
            "bad sidecar magic: {:02x?}",
            self.magic
        );
        ensure!(
            self.version.get() == SIDECAR_VERSION,
            "unsupported sidecar version {}",
            self.version.get()
        );
        ensure!(
            self.page_bytes.get() as usize == geometry.page_bytes,
            "page size mismatch: file has {}, expected {}",
            self.page_bytes.get(),
            geometry.page_bytes
        );
        ensure!(
            self.pair_len.get() as usize == geometry.pair_len,
            "pair size mismatch: file has {}, expected {}",
            self.pair_len.get(),
            geometry.pair_len
        );
        ensure!(
            self.block_size.get() as usize == geometry.block_size,
            "block size mismatch: file has {}, expected {}",
            self.block_size.get(),
            geometry.block_size
        );
        Ok(())
    }

    pub fn high_water(&self) -> u32 {
        self.high_water.get()
    }

    pub fn free_len(&self) -> u32 {
        self.free_len.get()
    }
}

/// Decoded sidecar contents.
#[derive(Debug)]
pub struct SidecarState {
    pub high_water: u32,
    pub free_list: Vec<u32>,
    pub root: Vec<u8>,
}

/// Reads and validates the sidecar. `Ok(None)` means no sidecar exists
/// and the store should start out fresh.
pub fn read_sidecar(path: &Path, geometry: Geometry) -> Result<Option<SidecarState>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .wrap_err_with(|| format!("failed to open sidecar {}", path.display()))
        }
    };

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .wrap_err_with(|| format!("failed to read sidecar {}", path.display()))?;

    let header = SidecarHeader::from_bytes(&bytes)?;
    header.validate(geometry)?;

    let free_len = header.free_len() as usize;
    let high_water = header.high_water();
    let expected = SIDECAR_HEADER_LEN + free_len * 4 + geometry.page_bytes;
    ensure!(
        bytes.len() == expected,
        "sidecar truncated: {} bytes, expected {}",
        bytes.len(),
        expected
    );

    let mut free_list = Vec::with_capacity(free_len);
    let mut offset = SIDECAR_HEADER_LEN;
    for _ in 0..free_len {
        let raw: [u8; 4] = bytes[offset..offset + 4].try_into().unwrap();
        free_list.push(u32::from_le_bytes(raw));
        offset += 4;
    }

    let root = bytes[offset..offset + geometry.page_bytes].to_vec();

    Ok(Some(SidecarState {
        high_water,
        free_list,
        root,
    }))
}

/// Writes the sidecar in one pass: header, free list, root image.
pub fn write_sidecar(
    path: &Path,
    geometry: Geometry,
    high_water: u32,
    free_list: &[u32],
    root: &[u8],
) -> Result<()> {
    ensure!(
        root.len() == geometry.page_bytes,
        "root image size {} != page size {}",
        root.len(),
        geometry.page_bytes
    );

    let header = SidecarHeader::new(geometry, high_water, free_list.len() as u32);

    let mut bytes = Vec::with_capacity(SIDECAR_HEADER_LEN + free_list.len() * 4 + root.len());
    bytes.extend_from_slice(header.as_bytes());
    for &page_no in free_list {
        bytes.extend_from_slice(&page_no.to_le_bytes());
    }
    bytes.extend_from_slice(root);

    let mut file = File::create(path)
        .wrap_err_with(|| format!("failed to create sidecar {}", path.display()))?;
    file.write_all(&bytes)?;
    file.sync_data().wrap_err("failed to sync sidecar")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: Geometry = Geometry {
        page_bytes: 4096,
        pair_len: 12,
        block_size: 16,
    };

    fn temp_path(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn page_io_round_trip() {
        let (_dir, path) = temp_path("pages.dat");
        let mut io = PageIO::open(&path, 4096).unwrap();

        let mut page = vec![0u8; 4096];
        page[0] = 0xAB;
        page[4095] = 0xCD;

        io.write_page(3, &page).unwrap();

        let mut out = vec![0u8; 4096];
        io.read_page(3, &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn page_io_rejects_wrong_buffer_size() {
        let (_dir, path) = temp_path("pages.dat");
        let mut io = PageIO::open(&path, 4096).unwrap();

        let mut small = vec![0u8; 100];
        assert!(io.read_page(0, &mut small).is_err());
        assert!(io.write_page(0, &small).is_err());
    }

    #[test]
    fn page_io_read_of_unwritten_page_fails() {
        let (_dir, path) = temp_path("pages.dat");
        let mut io = PageIO::open(&path, 4096).unwrap();

        let mut buf = vec![0u8; 4096];
        assert!(io.read_page(7, &mut buf).is_err());
    }

    #[test]
    fn sidecar_header_size() {
        assert_eq!(size_of::<SidecarHeader>(), SIDECAR_HEADER_LEN);
    }

    #[test]
    fn sidecar_missing_reads_as_none() {
        let (_dir, path) = temp_path("store.bin");
        assert!(read_sidecar(&path, GEOMETRY).unwrap().is_none());
    }

    #[test]
    fn sidecar_round_trip() {
        let (_dir, path) = temp_path("store.bin");
        let root = vec![7u8; GEOMETRY.page_bytes];
        let free = vec![4, 9, 2];

        write_sidecar(&path, GEOMETRY, 12, &free, &root).unwrap();

        let state = read_sidecar(&path, GEOMETRY).unwrap().unwrap();
        assert_eq!(state.high_water, 12);
        assert_eq!(state.free_list, free);
        assert_eq!(state.root, root);
    }

    #[test]
    fn sidecar_rejects_geometry_mismatch() {
        let (_dir, path) = temp_path("store.bin");
        let root = vec![0u8; GEOMETRY.page_bytes];
        write_sidecar(&path, GEOMETRY, 1, &[], &root).unwrap();

        let other = Geometry {
            block_size: 32,
            ..GEOMETRY
        };
        let err = read_sidecar(&path, other).unwrap_err();
        assert!(err.to_string().contains("block size mismatch"));
    }

    #[test]
    fn sidecar_rejects_bad_magic() {
        let (_dir, path) = temp_path("store.bin");
        let root = vec![0u8; GEOMETRY.page_bytes];
        write_sidecar(&path, GEOMETRY, 1, &[], &root).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();

        let err = read_sidecar(&path, GEOMETRY).unwrap_err();
        assert!(err.to_string().contains("bad sidecar magic"));
    }

    #[test]
    fn sidecar_rejects_truncation() {
        let (_dir, path) = temp_path("store.bin");
        let root = vec![0u8; GEOMETRY.page_bytes];
        write_sidecar(&path, GEOMETRY, 5, &[3], &root).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let err = read_sidecar(&path, GEOMETRY).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
