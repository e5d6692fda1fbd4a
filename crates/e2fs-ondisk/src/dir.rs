use crate::FileType;
use e2fs_types::{align4, read_le_u16, read_le_u32, ParseError, NAME_MAX};
use serde::{Deserialize, Serialize};

/// One directory entry in its in-memory form (serializer input, walker output).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode: u32,
    pub file_type: FileType,
    pub name: Vec<u8>,
}

impl DirEntry {
    pub fn new(name: impl Into<Vec<u8>>, inode: u32, file_type: FileType) -> Self {
        Self {
            inode,
            file_type,
            name: name.into(),
        }
    }
}

/// On-disk size of a record with an `name_len`-byte name: 8-byte header plus
/// the name, padded to 4-byte alignment.
#[must_use]
pub fn record_len(name_len: usize) -> usize {
    align4(8 + name_len)
}

/// Walk a directory-entry stream, invoking `visit(name, inode, file_type)`
/// for every live entry. Entries with `inode == 0` are skipped. The walk
/// stops early when `visit` returns `false`.
///
/// A `rec_len` below the 8-byte header size (including zero) or one that
/// would advance past the end of the buffer is corrupt.
pub fn walk_entries(
    buf: &[u8],
    mut visit: impl FnMut(&[u8], u32, FileType) -> bool,
) -> Result<(), ParseError> {
    let mut offset = 0_usize;

    while offset + 8 <= buf.len() {
        let inode = read_le_u32(buf, offset)?;
        let rec_len = usize::from(read_le_u16(buf, offset + 4)?);
        let name_len = usize::from(buf[offset + 6]);
        let file_type = buf[offset + 7];

        if rec_len < 8 {
            return Err(ParseError::InvalidField {
                field: "rec_len",
                reason: "directory entry rec_len < 8",
            });
        }
        let entry_end = offset + rec_len;
        if entry_end > buf.len() {
            return Err(ParseError::InvalidField {
                field: "rec_len",
                reason: "directory entry extends past buffer end",
            });
        }

        if inode != 0 {
            if offset + 8 + name_len > entry_end {
                return Err(ParseError::InvalidField {
                    field: "name_len",
                    reason: "name extends past rec_len",
                });
            }
            let name = &buf[offset + 8..offset + 8 + name_len];
            if !visit(name, inode, FileType::from_raw(file_type)) {
                return Ok(());
            }
        }

        offset = entry_end;
    }

    Ok(())
}

/// Collect every live entry of a directory stream in on-disk order.
pub fn parse_entries(buf: &[u8]) -> Result<Vec<DirEntry>, ParseError> {
    let mut entries = Vec::new();
    walk_entries(buf, |name, inode, file_type| {
        entries.push(DirEntry::new(name.to_vec(), inode, file_type));
        true
    })?;
    Ok(entries)
}

/// Serialize an ordered entry list into directory data.
///
/// Records never cross a block boundary: when the next record does not fit
/// in the current block, the previous record's `rec_len` is stretched to the
/// block end. The output is zero-padded to a multiple of `block_size` and the
/// final record's `rec_len` covers the trailing padding, so a walker stops
/// cleanly at the buffer end.
pub fn serialize_entries(entries: &[DirEntry], block_size: usize) -> Result<Vec<u8>, ParseError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    // Placement pass: (offset, rec_len) per entry, honoring block boundaries.
    let mut placements = Vec::with_capacity(entries.len());
    let mut pos = 0_usize;
    for entry in entries {
        if entry.name.is_empty() || entry.name.len() > NAME_MAX {
            return Err(ParseError::InvalidField {
                field: "name_len",
                reason: "directory entry name must be 1..=255 bytes",
            });
        }
        let need = record_len(entry.name.len());
        let room = block_size - pos % block_size;
        if need > room {
            let last: &mut (usize, usize) =
                placements.last_mut().expect("first record always fits");
            last.1 += room;
            pos += room;
        }
        placements.push((pos, need));
        pos += need;
    }

    // The last record spans the rest of the directory, padding included.
    let total = pos.div_ceil(block_size) * block_size;
    placements.last_mut().expect("non-empty").1 += total - pos;

    let mut out = vec![0_u8; total];
    for (entry, &(offset, rec_len)) in entries.iter().zip(&placements) {
        out[offset..offset + 4].copy_from_slice(&entry.inode.to_le_bytes());
        out[offset + 4..offset + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
        out[offset + 6] = entry.name.len() as u8;
        out[offset + 7] = entry.file_type as u8;
        out[offset + 8..offset + 8 + entry.name.len()].copy_from_slice(&entry.name);
    }
    Ok(out)
}
