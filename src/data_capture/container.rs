//! On-disk layout of a capture.
//!
//! ```text
//! ┌──────┬─────────────┬────────────┬─────────────┬────────────┬─────────────┐
//! │ CAPB │ version u32 │ hdr len u32│ JSON header │ thumbnail  │ payload ... │
//! └──────┴─────────────┴────────────┴─────────────┴────────────┴─────────────┘
//! ```
//!
//! Integers are little-endian. The thumbnail length comes from the header's thumbnail
//! descriptor; the payload runs to the end of the file and is only interpreted by the replay
//! driver named in the header.

use super::types::{local_machine_ident, CaptureHeader, FileType, ReplayStatus, ThumbnailDescriptor};
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: [u8; 4] = *b"CAPB";
/// Only this version is read; anything else is `VersionMismatch`.
pub const CONTAINER_VERSION: u32 = 1;
/// Larger headers are treated as corruption.
pub const MAX_HEADER_LEN: u32 = 1 << 20;

const PREAMBLE_LEN: u64 = 12;

#[derive(Debug, Clone)]
pub struct CaptureContainer {
    pub header: CaptureHeader,
    path: PathBuf,
    thumbnail: Option<Vec<u8>>,
    payload_offset: u64,
}

impl CaptureContainer {
    /// Reads and validates everything up to the payload.
    pub fn open(path: &Path) -> Result<Self, ReplayStatus> {
        let file = File::open(path).map_err(|e| io_status(&e))?;
        let file_len = file.metadata().map_err(|e| io_status(&e))?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(()) if magic == MAGIC => {}
            Ok(()) => return Err(ReplayStatus::UnsupportedFormat),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ReplayStatus::UnsupportedFormat)
            }
            Err(e) => return Err(io_status(&e)),
        }

        let version = read_u32(&mut reader)?;
        if version != CONTAINER_VERSION {
            debug!(
                "{} has container version {}, expected {}",
                path.display(),
                version,
                CONTAINER_VERSION
            );
            return Err(ReplayStatus::VersionMismatch);
        }

        let header_len = read_u32(&mut reader)?;
        if header_len > MAX_HEADER_LEN || PREAMBLE_LEN + header_len as u64 > file_len {
            return Err(ReplayStatus::FileCorrupted);
        }
        let mut header_bytes = vec![0u8; header_len as usize];
        reader
            .read_exact(&mut header_bytes)
            .map_err(|e| io_status(&e))?;
        let header: CaptureHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| ReplayStatus::FileCorrupted)?;
        if header.driver.trim().is_empty() {
            return Err(ReplayStatus::FileCorrupted);
        }

        let mut payload_offset = PREAMBLE_LEN + header_len as u64;
        let thumbnail = match &header.thumbnail {
            Some(descriptor) => {
                let end = payload_offset
                    .checked_add(descriptor.length)
                    .filter(|end| *end <= file_len)
                    .ok_or(ReplayStatus::FileCorrupted)?;
                let length =
                    usize::try_from(descriptor.length).map_err(|_| ReplayStatus::FileCorrupted)?;
                let mut bytes = vec![0u8; length];
                reader.read_exact(&mut bytes).map_err(|e| io_status(&e))?;
                payload_offset = end;
                Some(bytes)
            }
            None => None,
        };

        Ok(Self {
            header,
            path: path.to_path_buf(),
            thumbnail,
            payload_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn thumbnail(&self) -> Option<&[u8]> {
        self.thumbnail.as_deref()
    }

    pub fn read_payload(&self) -> Result<Vec<u8>, ReplayStatus> {
        let mut file = File::open(&self.path).map_err(|e| io_status(&e))?;
        file.seek(SeekFrom::Start(self.payload_offset))
            .map_err(|e| io_status(&e))?;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload).map_err(|e| io_status(&e))?;
        Ok(payload)
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32, ReplayStatus> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(|e| io_status(&e))?;
    Ok(u32::from_le_bytes(bytes))
}

fn io_status(e: &io::Error) -> ReplayStatus {
    match e.kind() {
        io::ErrorKind::NotFound => ReplayStatus::FileNotFound,
        io::ErrorKind::UnexpectedEof => ReplayStatus::FileCorrupted,
        _ => ReplayStatus::FileIoFailed,
    }
}

/// Builds a capture container.
///
/// ```rust,no_run
/// use capbridge::data_capture::container::CaptureWriter;
///
/// CaptureWriter::new("chunk-stream")
///     .payload(vec![0, 0, 0, 0])
///     .write(std::path::Path::new("/tmp/empty.cap"))?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct CaptureWriter {
    header: CaptureHeader,
    thumbnail: Option<Vec<u8>>,
    payload: Vec<u8>,
}

impl CaptureWriter {
    /// A capture for `driver`, stamped with this machine's ident.
    pub fn new(driver: &str) -> Self {
        Self {
            header: CaptureHeader {
                driver: driver.to_string(),
                machine_ident: local_machine_ident(),
                thumbnail: None,
            },
            thumbnail: None,
            payload: Vec::new(),
        }
    }

    pub fn machine_ident(mut self, ident: &str) -> Self {
        self.header.machine_ident = ident.to_string();
        self
    }

    /// Stores an already encoded thumbnail.
    pub fn thumbnail(mut self, format: FileType, width: u32, height: u32, bytes: Vec<u8>) -> Self {
        self.header.thumbnail = Some(ThumbnailDescriptor {
            format,
            width,
            height,
            length: bytes.len() as u64,
        });
        self.thumbnail = Some(bytes);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        let header = serde_json::to_vec(&self.header)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "capture header too large"))?;

        out.write_all(&MAGIC)?;
        out.write_all(&CONTAINER_VERSION.to_le_bytes())?;
        out.write_all(&header_len.to_le_bytes())?;
        out.write_all(&header)?;
        if let Some(thumbnail) = &self.thumbnail {
            out.write_all(thumbnail)?;
        }
        out.write_all(&self.payload)?;
        out.flush()
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_written_container_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.cap");
        CaptureWriter::new("chunk-stream")
            .machine_ident("linux-x86_64")
            .thumbnail(FileType::Png, 2, 1, vec![1, 2, 3])
            .payload(vec![9, 8, 7, 6])
            .write(&path)
            .unwrap();

        let container = CaptureContainer::open(&path).unwrap();
        assert_eq!(container.header.driver, "chunk-stream");
        assert_eq!(container.header.machine_ident, "linux-x86_64");
        assert_eq!(container.thumbnail(), Some(&[1u8, 2, 3][..]));
        assert_eq!(container.read_payload().unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_open_failures_map_to_status() {
        let dir = TempDir::new().unwrap();

        assert_eq!(
            CaptureContainer::open(&dir.path().join("missing.cap")).unwrap_err(),
            ReplayStatus::FileNotFound
        );

        let foreign = dir.path().join("foreign.cap");
        fs::write(&foreign, b"RDOC\x01\x00\x00\x00").unwrap();
        assert_eq!(
            CaptureContainer::open(&foreign).unwrap_err(),
            ReplayStatus::UnsupportedFormat
        );

        let future = dir.path().join("future.cap");
        fs::write(&future, b"CAPB\x07\x00\x00\x00\x02\x00\x00\x00{}").unwrap();
        assert_eq!(
            CaptureContainer::open(&future).unwrap_err(),
            ReplayStatus::VersionMismatch
        );

        let truncated = dir.path().join("truncated.cap");
        fs::write(&truncated, b"CAPB\x01\x00\x00\x00\xff\x00\x00\x00{\"dri").unwrap();
        assert_eq!(
            CaptureContainer::open(&truncated).unwrap_err(),
            ReplayStatus::FileCorrupted
        );
    }

    #[test]
    fn test_thumbnail_longer_than_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.cap");
        let mut bytes = Vec::new();
        CaptureWriter::new("chunk-stream")
            .thumbnail(FileType::Png, 1, 1, vec![0; 64])
            .write_to(&mut bytes)
            .unwrap();
        bytes.truncate(bytes.len() - 10);
        fs::write(&path, bytes).unwrap();

        assert_eq!(
            CaptureContainer::open(&path).unwrap_err(),
            ReplayStatus::FileCorrupted
        );
    }

    #[test]
    fn test_huge_thumbnail_length_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.cap");
        let header = serde_json::to_vec(&CaptureHeader {
            driver: "chunk-stream".to_string(),
            machine_ident: local_machine_ident(),
            thumbnail: Some(ThumbnailDescriptor {
                format: FileType::Png,
                width: 1,
                height: 1,
                length: u64::MAX,
            }),
        })
        .unwrap();

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&[0; 16]);
        fs::write(&path, bytes).unwrap();

        assert_eq!(
            CaptureContainer::open(&path).unwrap_err(),
            ReplayStatus::FileCorrupted
        );
    }
}
