//! Android sparse image densifier.
//!
//! Fastboot sends large images as sparse images, often split into several
//! parts, so a flash capture of `system.img` is a concatenation of sparse
//! images. Every part describes the same dense image from block 0; the
//! dense size is taken from the first header.

use std::io::{Cursor, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;
use tracing::{debug, warn};

pub const SPARSE_HEADER_MAGIC: u32 = 0xED26_FF3A;
pub const SPARSE_FILE_HEADER_SIZE: usize = 28;
pub const SPARSE_CHUNK_HEADER_SIZE: usize = 12;

/// Largest dense image `densify_to_vec` will allocate.
pub const MAX_IN_MEMORY_DENSE_SIZE: u64 = 1 << 30;

pub const CHUNK_TYPE_RAW: u16 = 0xCAC1;
pub const CHUNK_TYPE_FILL: u16 = 0xCAC2;
pub const CHUNK_TYPE_DONT_CARE: u16 = 0xCAC3;
pub const CHUNK_TYPE_CRC32: u16 = 0xCAC4;

#[derive(Error, Debug)]
pub enum SparseError {
    #[error("bad sparse magic 0x{found:08X} at offset 0x{offset:X}")]
    BadMagic { offset: usize, found: u32 },
    #[error("unsupported sparse version {major}.{minor} at offset 0x{offset:X}")]
    UnsupportedVersion {
        offset: usize,
        major: u16,
        minor: u16,
    },
    #[error("unexpected header sizes {file_header}/{chunk_header} at offset 0x{offset:X}")]
    HeaderSize {
        offset: usize,
        file_header: u16,
        chunk_header: u16,
    },
    #[error("truncated sparse image at offset 0x{offset:X}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("chunk at offset 0x{offset:X} has {actual} data bytes, expected {expected}")]
    ChunkSize {
        offset: usize,
        expected: u64,
        actual: u64,
    },
    #[error("chunk at offset 0x{offset:X} reaches past the end of the image")]
    OutOfBounds { offset: usize },
    #[error("dense image of {size} bytes exceeds the in-memory limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
}

impl SparseHeader {
    pub fn dense_size(&self) -> u64 {
        self.block_size as u64 * self.total_blocks as u64
    }

    fn parse(src: &[u8], offset: usize) -> Result<Self, SparseError> {
        let data = take(src, offset, SPARSE_FILE_HEADER_SIZE)?;
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != SPARSE_HEADER_MAGIC {
            return Err(SparseError::BadMagic {
                offset,
                found: magic,
            });
        }
        let major = cursor.read_u16::<LittleEndian>()?;
        let minor = cursor.read_u16::<LittleEndian>()?;
        if (major, minor) != (1, 0) {
            return Err(SparseError::UnsupportedVersion {
                offset,
                major,
                minor,
            });
        }
        let file_header = cursor.read_u16::<LittleEndian>()?;
        let chunk_header = cursor.read_u16::<LittleEndian>()?;
        if file_header as usize != SPARSE_FILE_HEADER_SIZE
            || chunk_header as usize != SPARSE_CHUNK_HEADER_SIZE
        {
            return Err(SparseError::HeaderSize {
                offset,
                file_header,
                chunk_header,
            });
        }
        Ok(Self {
            block_size: cursor.read_u32::<LittleEndian>()?,
            total_blocks: cursor.read_u32::<LittleEndian>()?,
            total_chunks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// What a chunk contributes to the dense image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Data bytes at `data_offset` in the sparse input.
    Raw {
        data_offset: usize,
    },
    Fill {
        pattern: [u8; 4],
    },
    DontCare,
    Crc32,
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseChunk {
    /// Offset of the chunk header in the sparse input.
    pub offset: usize,
    pub kind: ChunkKind,
    /// Dense byte offset the chunk covers.
    pub dense_offset: u64,
    /// Dense byte count the chunk covers.
    pub dense_len: u64,
}

/// Parsed layout of one or more concatenated sparse images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsePlan {
    pub dense_size: u64,
    pub images: usize,
    pub chunks: Vec<SparseChunk>,
}

fn take(src: &[u8], offset: usize, len: usize) -> Result<&[u8], SparseError> {
    src.get(offset..offset.saturating_add(len))
        .ok_or(SparseError::Truncated {
            offset,
            needed: len,
            available: src.len().saturating_sub(offset),
        })
}

/// Walk every image and chunk header of `src`.
pub fn plan(src: &[u8]) -> Result<SparsePlan, SparseError> {
    let mut plan = SparsePlan {
        dense_size: 0,
        images: 0,
        chunks: Vec::new(),
    };
    let mut pos = 0;
    while pos < src.len() {
        let header = SparseHeader::parse(src, pos)?;
        if plan.images == 0 {
            plan.dense_size = header.dense_size();
        }
        debug!(
            offset = pos,
            block_size = header.block_size,
            blocks = header.total_blocks,
            chunks = header.total_chunks,
            "Sparse image"
        );
        plan.images += 1;
        pos += SPARSE_FILE_HEADER_SIZE;

        let block_size = header.block_size as u64;
        let mut block = 0u64;
        for _ in 0..header.total_chunks {
            let offset = pos;
            let mut cursor = Cursor::new(take(src, pos, SPARSE_CHUNK_HEADER_SIZE)?);
            let chunk_type = cursor.read_u16::<LittleEndian>()?;
            let _reserved = cursor.read_u16::<LittleEndian>()?;
            let blocks = cursor.read_u32::<LittleEndian>()? as u64;
            let total_size = cursor.read_u32::<LittleEndian>()? as usize;
            let data_len = total_size
                .checked_sub(SPARSE_CHUNK_HEADER_SIZE)
                .ok_or(SparseError::ChunkSize {
                    offset,
                    expected: SPARSE_CHUNK_HEADER_SIZE as u64,
                    actual: total_size as u64,
                })?;
            let data_offset = pos + SPARSE_CHUNK_HEADER_SIZE;
            let data = take(src, data_offset, data_len)?;

            let dense_len = blocks
                .checked_mul(block_size)
                .ok_or(SparseError::OutOfBounds { offset })?;
            let expect_len = |expected: u64| {
                if data_len as u64 == expected {
                    Ok(())
                } else {
                    Err(SparseError::ChunkSize {
                        offset,
                        expected,
                        actual: data_len as u64,
                    })
                }
            };
            let kind = match chunk_type {
                CHUNK_TYPE_RAW => {
                    expect_len(dense_len)?;
                    ChunkKind::Raw { data_offset }
                }
                CHUNK_TYPE_FILL => {
                    expect_len(4)?;
                    let mut pattern = [0u8; 4];
                    pattern.copy_from_slice(data);
                    ChunkKind::Fill { pattern }
                }
                CHUNK_TYPE_DONT_CARE => ChunkKind::DontCare,
                CHUNK_TYPE_CRC32 => ChunkKind::Crc32,
                other => {
                    warn!(
                        offset,
                        chunk_type = %format!("0x{other:04X}"),
                        "Unsupported sparse chunk type"
                    );
                    ChunkKind::Unknown(other)
                }
            };

            let dense_offset = block
                .checked_mul(block_size)
                .ok_or(SparseError::OutOfBounds { offset })?;
            let dense_end = dense_offset
                .checked_add(dense_len)
                .ok_or(SparseError::OutOfBounds { offset })?;
            if matches!(kind, ChunkKind::Raw { .. } | ChunkKind::Fill { .. })
                && dense_end > plan.dense_size
            {
                return Err(SparseError::OutOfBounds { offset });
            }
            plan.chunks.push(SparseChunk {
                offset,
                kind,
                dense_offset,
                dense_len,
            });
            block = block
                .checked_add(blocks)
                .ok_or(SparseError::OutOfBounds { offset })?;
            pos = data_offset + data_len;
        }
    }
    Ok(plan)
}

/// Write the dense image described by `plan` into `out`.
///
/// Skipped regions are not written; `out` must read back as zeroes there
/// (a fresh file truncated to `plan.dense_size`, or a zeroed buffer).
/// Returns the number of bytes written.
pub fn apply<W: Write + Seek>(
    plan: &SparsePlan,
    src: &[u8],
    out: &mut W,
) -> Result<u64, SparseError> {
    let mut written = 0u64;
    for chunk in &plan.chunks {
        match chunk.kind {
            ChunkKind::Raw { data_offset } => {
                out.seek(SeekFrom::Start(chunk.dense_offset))?;
                out.write_all(take(src, data_offset, chunk.dense_len as usize)?)?;
                written += chunk.dense_len;
            }
            ChunkKind::Fill { pattern } => {
                out.seek(SeekFrom::Start(chunk.dense_offset))?;
                let block: Vec<u8> = pattern.iter().copied().cycle().take(4096).collect();
                let mut remaining = chunk.dense_len;
                while remaining > 0 {
                    let n = remaining.min(block.len() as u64) as usize;
                    out.write_all(&block[..n])?;
                    remaining -= n as u64;
                }
                written += chunk.dense_len;
            }
            ChunkKind::DontCare | ChunkKind::Crc32 | ChunkKind::Unknown(_) => {}
        }
    }
    out.flush()?;
    Ok(written)
}

/// Densify into memory, refusing images above `MAX_IN_MEMORY_DENSE_SIZE`.
pub fn densify_to_vec(src: &[u8]) -> Result<Vec<u8>, SparseError> {
    let plan = plan(src)?;
    if plan.dense_size > MAX_IN_MEMORY_DENSE_SIZE {
        return Err(SparseError::TooLarge {
            size: plan.dense_size,
            limit: MAX_IN_MEMORY_DENSE_SIZE,
        });
    }
    let mut out = Cursor::new(vec![0u8; plan.dense_size as usize]);
    apply(&plan, src, &mut out)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use byteorder::WriteBytesExt;

    use super::*;

    const BLOCK: u32 = 16;

    fn image(total_blocks: u32, chunks: &[(u16, u32, &[u8])]) -> Vec<u8> {
        image_with_block_size(BLOCK, total_blocks, chunks)
    }

    fn image_with_block_size(
        block_size: u32,
        total_blocks: u32,
        chunks: &[(u16, u32, &[u8])],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(SPARSE_HEADER_MAGIC).unwrap();
        out.write_u16::<LittleEndian>(1).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(28).unwrap();
        out.write_u16::<LittleEndian>(12).unwrap();
        out.write_u32::<LittleEndian>(block_size).unwrap();
        out.write_u32::<LittleEndian>(total_blocks).unwrap();
        out.write_u32::<LittleEndian>(chunks.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        for &(chunk_type, blocks, data) in chunks {
            out.write_u16::<LittleEndian>(chunk_type).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u32::<LittleEndian>(blocks).unwrap();
            out.write_u32::<LittleEndian>(12 + data.len() as u32).unwrap();
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_raw_fill_and_skip() {
        let raw = [0xAB; 32];
        let src = image(
            5,
            &[
                (CHUNK_TYPE_RAW, 2, &raw[..]),
                (CHUNK_TYPE_DONT_CARE, 1, &[][..]),
                (CHUNK_TYPE_FILL, 1, &[1, 2, 3, 4][..]),
                (CHUNK_TYPE_CRC32, 0, &[0; 4][..]),
            ],
        );
        let dense = densify_to_vec(&src).unwrap();
        assert_eq!(dense.len(), 80);
        assert_eq!(&dense[..32], &raw[..]);
        assert!(dense[32..48].iter().all(|&b| b == 0));
        assert_eq!(&dense[48..52], &[1, 2, 3, 4]);
        assert_eq!(&dense[60..64], &[1, 2, 3, 4]);
        assert!(dense[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_concatenated_parts_overlay() {
        let mut src = image(
            4,
            &[
                (CHUNK_TYPE_RAW, 1, &[1; 16][..]),
                (CHUNK_TYPE_DONT_CARE, 3, &[][..]),
            ],
        );
        src.extend(image(
            4,
            &[
                (CHUNK_TYPE_DONT_CARE, 2, &[][..]),
                (CHUNK_TYPE_RAW, 1, &[2; 16][..]),
            ],
        ));
        let plan = plan(&src).unwrap();
        assert_eq!(plan.images, 2);
        assert_eq!(plan.dense_size, 64);

        let dense = densify_to_vec(&src).unwrap();
        assert_eq!(&dense[..16], &[1; 16]);
        assert_eq!(&dense[16..32], &[0; 16]);
        assert_eq!(&dense[32..48], &[2; 16]);
        assert_eq!(&dense[48..], &[0; 16]);
    }

    #[test]
    fn test_unknown_chunk_is_skipped() {
        let src = image(
            2,
            &[(0xCAFF, 1, &[9; 3][..]), (CHUNK_TYPE_RAW, 1, &[7; 16][..])],
        );
        let dense = densify_to_vec(&src).unwrap();
        assert_eq!(&dense[..16], &[0; 16]);
        assert_eq!(&dense[16..], &[7; 16]);
    }

    #[test]
    fn test_empty_input() {
        assert!(densify_to_vec(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut src = image(1, &[]);
        src[0] = 0;
        assert!(matches!(
            plan(&src),
            Err(SparseError::BadMagic { offset: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_chunk_data() {
        let mut src = image(2, &[(CHUNK_TYPE_RAW, 2, &[0; 32][..])]);
        src.truncate(src.len() - 1);
        assert!(matches!(plan(&src), Err(SparseError::Truncated { .. })));
    }

    #[test]
    fn test_raw_size_must_match_blocks() {
        let src = image(2, &[(CHUNK_TYPE_RAW, 2, &[0; 20][..])]);
        assert!(matches!(
            plan(&src),
            Err(SparseError::ChunkSize {
                expected: 32,
                actual: 20,
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_bounds() {
        let src = image(1, &[(CHUNK_TYPE_FILL, 2, &[0; 4][..])]);
        assert!(matches!(
            plan(&src),
            Err(SparseError::OutOfBounds { offset: 28 })
        ));
    }

    #[test]
    fn test_huge_block_counts_are_rejected() {
        let src = image_with_block_size(
            u32::MAX,
            u32::MAX,
            &[
                (CHUNK_TYPE_DONT_CARE, u32::MAX, &[][..]),
                (CHUNK_TYPE_DONT_CARE, u32::MAX, &[][..]),
                (CHUNK_TYPE_DONT_CARE, u32::MAX, &[][..]),
            ],
        );
        assert!(matches!(
            plan(&src),
            Err(SparseError::OutOfBounds { offset: 40 })
        ));
    }

    #[test]
    fn test_in_memory_size_limit() {
        let src = image_with_block_size(4096, 0x4_0001, &[]);
        let dense_size = plan(&src).unwrap().dense_size;
        assert_eq!(dense_size, MAX_IN_MEMORY_DENSE_SIZE + 4096);
        assert!(matches!(
            densify_to_vec(&src),
            Err(SparseError::TooLarge { .. })
        ));
    }
}
