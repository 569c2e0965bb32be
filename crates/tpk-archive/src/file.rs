use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use memmap2::Mmap;
use tpk_types::{wire, BlobId};
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{ArchiveError, ArchiveResult};
use crate::traits::Archive;

/// File magic.
const MAGIC: &[u8; 4] = b"TPKA";
/// Current format version.
const VERSION: u32 = 1;
/// Magic + version.
const PREAMBLE_SIZE: u64 = 8;
/// Entry header: kind (u8) + payload length (u32 LE) + CRC32 of payload (u32 LE).
const ENTRY_HEADER_SIZE: u64 = 9;

const KIND_BLOB: u8 = 1;
const KIND_TAG: u8 = 2;

/// Location of one blob payload inside the file.
#[derive(Clone, Copy, Debug)]
struct BlobSlot {
    offset: u64,
    len: u32,
    crc: u32,
}

#[derive(Debug, Default)]
struct Layout {
    blobs: Vec<BlobSlot>,
    catalog: Catalog,
    end: u64,
}

struct Writer {
    out: BufWriter<File>,
    offset: u64,
    /// Set after a failed write; the bytes in `out` no longer match `offset`.
    failed: bool,
}

enum Backing {
    /// Opened for append; reads go through a second handle after a flush.
    Writable {
        writer: Mutex<Writer>,
        reader: Mutex<File>,
    },
    /// Opened read-only over a memory map.
    Mapped(Mmap),
}

/// Single-file archive.
///
/// On-disk format:
/// ```text
/// [4 bytes: "TPKA"] [4 bytes: version (big-endian u32)]
/// repeated:
///   [1 byte: kind (1 = blob, 2 = tag)]
///   [4 bytes: payload length (little-endian u32)]
///   [4 bytes: CRC32 of payload (little-endian u32)]
///   [N bytes: payload]
/// ```
/// A tag payload is `[blob id u64 LE][name][category]`, strings
/// length-prefixed. Blob ids are the ordinal of the blob entry in the file.
///
/// The catalog and the blob offset table are rebuilt by scanning the file on
/// open. The format is a batch format: a file cut short mid-entry is
/// reported as corrupt, not repaired.
pub struct FileArchive {
    path: PathBuf,
    layout: RwLock<Layout>,
    backing: Backing,
}

impl FileArchive {
    /// Create a new archive, truncating any existing file at `path`.
    pub fn create(path: &Path) -> ArchiveResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(MAGIC)?;
        file.write_all(&VERSION.to_be_bytes())?;
        file.flush()?;

        let layout = Layout {
            end: PREAMBLE_SIZE,
            ..Layout::default()
        };
        Self::writable(path, file, layout)
    }

    /// Open an archive for appending, creating it if it does not exist.
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        if !path.exists() {
            return Self::create(path);
        }
        let data = std::fs::read(path)?;
        let layout = scan(&data)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(
            path = %path.display(),
            blobs = layout.blobs.len(),
            "archive opened for append"
        );
        Self::writable(path, file, layout)
    }

    /// Open an existing archive read-only over a memory map.
    pub fn open_read_only(path: &Path) -> ArchiveResult<Self> {
        let file = File::open(path)?;
        // SAFETY: Mmap::map is unsafe because the file could be modified
        // externally while mapped. Archives opened this way are treated as
        // immutable; every access is bounds-checked against the layout
        // built from the mapped bytes, and the map lives as long as `self`.
        let mmap = unsafe { Mmap::map(&file)? };
        let layout = scan(&mmap)?;
        debug!(
            path = %path.display(),
            blobs = layout.blobs.len(),
            "archive opened read-only"
        );
        Ok(Self {
            path: path.to_path_buf(),
            layout: RwLock::new(layout),
            backing: Backing::Mapped(mmap),
        })
    }

    fn writable(path: &Path, mut file: File, layout: Layout) -> ArchiveResult<Self> {
        let offset = layout.end;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        let reader = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            layout: RwLock::new(layout),
            backing: Backing::Writable {
                writer: Mutex::new(Writer {
                    out: BufWriter::new(file),
                    offset,
                    failed: false,
                }),
                reader: Mutex::new(reader),
            },
        })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered entries and fsync the file. A no-op when read-only.
    pub fn sync(&self) -> ArchiveResult<()> {
        if let Backing::Writable { writer, .. } = &self.backing {
            let mut w = writer.lock().expect("archive writer poisoned");
            w.out.flush()?;
            w.out.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Write one framed entry; returns its offset and the payload CRC.
    fn write_entry(&self, kind: u8, payload: &[u8]) -> ArchiveResult<(u64, u32)> {
        let Backing::Writable { writer, .. } = &self.backing else {
            return Err(ArchiveError::ReadOnly);
        };
        let len = u32::try_from(payload.len()).map_err(|_| ArchiveError::Corrupt {
            offset: 0,
            reason: format!("entry of {} bytes exceeds u32 length field", payload.len()),
        })?;
        let crc = crc32fast::hash(payload);

        let frame = frame_entry(kind, len, crc, payload);

        let mut w = writer.lock().expect("archive writer poisoned");
        if w.failed {
            return Err(ArchiveError::WriterFailed);
        }
        let entry_offset = w.offset;
        if let Err(e) = w.out.write_all(&frame) {
            w.failed = true;
            return Err(e.into());
        }
        w.offset += frame.len() as u64;
        Ok((entry_offset, crc))
    }

    fn slot(&self, id: BlobId) -> ArchiveResult<BlobSlot> {
        let layout = self.layout.read().expect("lock poisoned");
        usize::try_from(id.get())
            .ok()
            .and_then(|i| layout.blobs.get(i))
            .copied()
            .ok_or(ArchiveError::NotFound(id))
    }
}

impl Archive for FileArchive {
    fn append(&self, data: &[u8]) -> ArchiveResult<BlobId> {
        // Layout lock is held across the write so ids follow file order.
        let mut layout = self.layout.write().expect("lock poisoned");
        let (entry_offset, crc) = self.write_entry(KIND_BLOB, data)?;
        let id = BlobId::new(layout.blobs.len() as u64);
        layout.blobs.push(BlobSlot {
            offset: entry_offset + ENTRY_HEADER_SIZE,
            len: data.len() as u32,
            crc,
        });
        layout.end = entry_offset + ENTRY_HEADER_SIZE + data.len() as u64;
        Ok(id)
    }

    fn read(&self, id: BlobId) -> ArchiveResult<Vec<u8>> {
        let slot = self.slot(id)?;
        let data = match &self.backing {
            Backing::Mapped(mmap) => {
                let start = slot.offset as usize;
                let end = start + slot.len as usize;
                mmap.get(start..end)
                    .ok_or_else(|| ArchiveError::Corrupt {
                        offset: slot.offset,
                        reason: "blob extends beyond mapped file".into(),
                    })?
                    .to_vec()
            }
            Backing::Writable { writer, reader } => {
                writer
                    .lock()
                    .expect("archive writer poisoned")
                    .out
                    .flush()?;
                let mut file = reader.lock().expect("archive reader poisoned");
                file.seek(SeekFrom::Start(slot.offset))?;
                let mut buf = vec![0u8; slot.len as usize];
                file.read_exact(&mut buf)?;
                buf
            }
        };
        if crc32fast::hash(&data) != slot.crc {
            return Err(ArchiveError::Corrupt {
                offset: slot.offset,
                reason: format!("CRC mismatch for blob {id}"),
            });
        }
        Ok(data)
    }

    fn tag(&self, id: BlobId, name: &str, category: &str) -> ArchiveResult<()> {
        if !self.is_writable() {
            return Err(ArchiveError::ReadOnly);
        }
        let mut layout = self.layout.write().expect("lock poisoned");
        if id.get() >= layout.blobs.len() as u64 {
            return Err(ArchiveError::NotFound(id));
        }
        let mut payload = Vec::with_capacity(8 + name.len() + category.len() + 4);
        payload.extend_from_slice(&id.get().to_le_bytes());
        wire::put_str(&mut payload, name);
        wire::put_str(&mut payload, category);
        let (entry_offset, _) = self.write_entry(KIND_TAG, &payload)?;
        layout.catalog.insert(id, name, category);
        layout.end = entry_offset + ENTRY_HEADER_SIZE + payload.len() as u64;
        Ok(())
    }

    fn find(&self, name: &str, category: &str) -> ArchiveResult<Vec<BlobId>> {
        Ok(self
            .layout
            .read()
            .expect("lock poisoned")
            .catalog
            .find(name, category))
    }

    fn is_writable(&self) -> bool {
        matches!(self.backing, Backing::Writable { .. })
    }

    fn blob_count(&self) -> u64 {
        self.layout.read().expect("lock poisoned").blobs.len() as u64
    }

    fn blob_len(&self, id: BlobId) -> ArchiveResult<u64> {
        self.slot(id).map(|slot| u64::from(slot.len))
    }
}

impl Drop for FileArchive {
    fn drop(&mut self) {
        if let Backing::Writable { writer, .. } = &self.backing {
            if let Ok(mut w) = writer.lock() {
                if let Err(e) = w.out.flush() {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to flush archive on close"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for FileArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileArchive")
            .field("path", &self.path)
            .field("blob_count", &self.blob_count())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// `[kind][len][crc][payload]` as one contiguous buffer.
fn frame_entry(kind: u8, len: u32, crc: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ENTRY_HEADER_SIZE as usize + payload.len());
    frame.push(kind);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Walk every entry and rebuild the blob table and the catalog.
fn scan(data: &[u8]) -> ArchiveResult<Layout> {
    if data.len() < PREAMBLE_SIZE as usize {
        return Err(ArchiveError::Corrupt {
            offset: 0,
            reason: "file shorter than preamble".into(),
        });
    }
    if &data[0..4] != MAGIC {
        return Err(ArchiveError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(&data[0..4]).into(),
        });
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != VERSION {
        return Err(ArchiveError::UnsupportedVersion(version));
    }

    let mut layout = Layout::default();
    let mut offset = PREAMBLE_SIZE;
    let file_len = data.len() as u64;

    while offset < file_len {
        if offset + ENTRY_HEADER_SIZE > file_len {
            return Err(ArchiveError::Corrupt {
                offset,
                reason: "truncated entry header".into(),
            });
        }
        let h = offset as usize;
        let kind = data[h];
        let len = u32::from_le_bytes([data[h + 1], data[h + 2], data[h + 3], data[h + 4]]);
        let crc = u32::from_le_bytes([data[h + 5], data[h + 6], data[h + 7], data[h + 8]]);
        let payload_offset = offset + ENTRY_HEADER_SIZE;
        let payload_end = payload_offset + u64::from(len);
        if payload_end > file_len {
            return Err(ArchiveError::Corrupt {
                offset,
                reason: "truncated entry payload".into(),
            });
        }

        match kind {
            KIND_BLOB => layout.blobs.push(BlobSlot {
                offset: payload_offset,
                len,
                crc,
            }),
            KIND_TAG => {
                let payload = &data[payload_offset as usize..payload_end as usize];
                if crc32fast::hash(payload) != crc {
                    return Err(ArchiveError::Corrupt {
                        offset,
                        reason: "CRC mismatch in tag entry".into(),
                    });
                }
                let (id, name, category) =
                    decode_tag(payload).map_err(|reason| ArchiveError::Corrupt { offset, reason })?;
                if id.get() >= layout.blobs.len() as u64 {
                    return Err(ArchiveError::Corrupt {
                        offset,
                        reason: format!("tag refers to unknown blob {id}"),
                    });
                }
                layout.catalog.insert(id, &name, &category);
            }
            other => {
                return Err(ArchiveError::Corrupt {
                    offset,
                    reason: format!("unknown entry kind {other}"),
                })
            }
        }
        offset = payload_end;
    }

    layout.end = offset;
    Ok(layout)
}

fn decode_tag(payload: &[u8]) -> Result<(BlobId, String, String), String> {
    let mut cursor = payload;
    let raw = wire::take_array::<8>(&mut cursor).map_err(|e| e.to_string())?;
    let name = wire::take_str(&mut cursor).map_err(|e| e.to_string())?;
    let category = wire::take_str(&mut cursor).map_err(|e| e.to_string())?;
    Ok((BlobId::new(u64::from_le_bytes(raw)), name, category))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::create(&dir.path().join("a.tpk")).unwrap();
        let a = archive.append(b"first").unwrap();
        let b = archive.append(b"second blob").unwrap();
        assert!(a < b);
        assert_eq!(archive.read(a).unwrap(), b"first");
        assert_eq!(archive.read(b).unwrap(), b"second blob");
        assert_eq!(archive.blob_len(b).unwrap(), 11);
    }

    #[test]
    fn frame_matches_entry_layout() {
        let frame = frame_entry(KIND_BLOB, 3, 0xAABB_CCDD, b"abc");
        assert_eq!(frame.len() as u64, ENTRY_HEADER_SIZE + 3);
        assert_eq!(frame[0], KIND_BLOB);
        assert_eq!(&frame[1..5], &3u32.to_le_bytes());
        assert_eq!(&frame[5..9], &0xAABB_CCDDu32.to_le_bytes());
        assert_eq!(&frame[9..], b"abc");
    }

    #[test]
    fn failed_writer_refuses_further_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::create(&dir.path().join("failed.tpk")).unwrap();
        let id = archive.append(b"kept").unwrap();
        if let Backing::Writable { writer, .. } = &archive.backing {
            writer.lock().unwrap().failed = true;
        }
        assert!(matches!(
            archive.append(b"lost").unwrap_err(),
            ArchiveError::WriterFailed
        ));
        assert!(matches!(
            archive.tag(id, "n", "c").unwrap_err(),
            ArchiveError::WriterFailed
        ));
        assert_eq!(archive.blob_count(), 1);
        assert!(archive.find("n", "c").unwrap().is_empty());
        assert_eq!(archive.read(id).unwrap(), b"kept");
    }

    #[test]
    fn reopen_rebuilds_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.tpk");
        let id = {
            let archive = FileArchive::create(&path).unwrap();
            archive.append(b"header").unwrap();
            let id = archive.append(b"footer").unwrap();
            archive.tag(id, "ntuple", "top").unwrap();
            id
        };

        let archive = FileArchive::open(&path).unwrap();
        assert_eq!(archive.blob_count(), 2);
        assert_eq!(archive.find("ntuple", "top").unwrap(), vec![id]);
        assert_eq!(archive.read(id).unwrap(), b"footer");

        // Appends continue after the existing entries.
        let next = archive.append(b"more").unwrap();
        assert_eq!(next, id.next());
    }

    #[test]
    fn read_only_open_serves_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.tpk");
        {
            let archive = FileArchive::create(&path).unwrap();
            let id = archive.append(b"payload").unwrap();
            archive.tag(id, "x", "y").unwrap();
            archive.sync().unwrap();
        }

        let archive = FileArchive::open_read_only(&path).unwrap();
        assert!(!archive.is_writable());
        let ids = archive.find("x", "y").unwrap();
        assert_eq!(archive.read(ids[0]).unwrap(), b"payload");
        assert!(matches!(
            archive.append(b"nope").unwrap_err(),
            ArchiveError::ReadOnly
        ));
        assert!(matches!(
            archive.tag(ids[0], "a", "b").unwrap_err(),
            ArchiveError::ReadOnly
        ));
    }

    #[test]
    fn corrupted_blob_detected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.tpk");
        {
            let archive = FileArchive::create(&path).unwrap();
            archive.append(b"precious bytes").unwrap();
        }

        // Flip the first payload byte.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            let pos = PREAMBLE_SIZE + ENTRY_HEADER_SIZE;
            file.seek(SeekFrom::Start(pos)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(pos)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let archive = FileArchive::open_read_only(&path).unwrap();
        let err = archive.read(BlobId::new(0)).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt { .. }));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.tpk");
        {
            let archive = FileArchive::create(&path).unwrap();
            archive.append(b"0123456789").unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let err = FileArchive::open_read_only(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt { .. }));
    }

    #[test]
    fn bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("magic.tpk");
        std::fs::write(&path, b"BADMxxxx").unwrap();
        let err = FileArchive::open_read_only(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidMagic { .. }));
    }

    #[test]
    fn bad_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.tpk");
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&99u32.to_be_bytes());
        std::fs::write(&path, data).unwrap();
        let err = FileArchive::open(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedVersion(99)));
    }

    #[test]
    fn open_missing_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fresh.tpk");
        let archive = FileArchive::open(&path).unwrap();
        assert_eq!(archive.blob_count(), 0);
        assert!(path.exists());
    }
}
