use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::error::{Result, TomoError};

pub const MRC_HEADER_SIZE: usize = 1024;

/// The few MRC header fields the half stacker needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MrcHeader {
    pub nx: i32,
    pub ny: i32,
    pub nz: i32,
    pub mode: i32,
    /// Extended header size in bytes.
    pub nsymbt: i32,
}

impl MrcHeader {
    pub fn bytes_per_voxel(&self, path: &Path) -> Result<usize> {
        Ok(match self.mode {
            0 => 1,
            1 | 6 | 12 => 2,
            2 => 4,
            mode => {
                return Err(TomoError::InvalidMrc {
                    path: path.to_path_buf(),
                    reason: format!("unsupported mode {mode}"),
                })
            }
        })
    }

    /// Bytes of one z-section.
    pub fn section_bytes(&self, path: &Path) -> Result<usize> {
        Ok(self.nx as usize * self.ny as usize * self.bytes_per_voxel(path)?)
    }
}

/// Memory-mapped MRC image or stack.
#[derive(Debug)]
pub struct MrcFile {
    mmap: Mmap,
    pub header: MrcHeader,
    path: PathBuf,
}

impl MrcFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < MRC_HEADER_SIZE {
            return Err(TomoError::InvalidMrc {
                path: path.to_path_buf(),
                reason: "file too small for an MRC header".to_owned(),
            });
        }

        let header = MrcHeader {
            nx: LittleEndian::read_i32(&mmap[0..4]),
            ny: LittleEndian::read_i32(&mmap[4..8]),
            nz: LittleEndian::read_i32(&mmap[8..12]),
            mode: LittleEndian::read_i32(&mmap[12..16]),
            nsymbt: LittleEndian::read_i32(&mmap[92..96]),
        };
        if header.nx <= 0 || header.ny <= 0 || header.nz <= 0 || header.nsymbt < 0 {
            return Err(TomoError::InvalidMrc {
                path: path.to_path_buf(),
                reason: format!(
                    "bad dimensions {}x{}x{} (nsymbt {})",
                    header.nx, header.ny, header.nz, header.nsymbt
                ),
            });
        }

        let this = MrcFile {
            mmap,
            header,
            path: path.to_path_buf(),
        };
        let needed =
            MRC_HEADER_SIZE + this.header.nsymbt as usize + this.data_bytes()?;
        if this.mmap.len() < needed {
            return Err(TomoError::InvalidMrc {
                path: path.to_path_buf(),
                reason: format!("truncated: expected {} bytes, got {}", needed, this.mmap.len()),
            });
        }
        Ok(this)
    }

    fn data_bytes(&self) -> Result<usize> {
        Ok(self.header.section_bytes(&self.path)? * self.header.nz as usize)
    }

    pub fn raw_header(&self) -> &[u8] {
        &self.mmap[..MRC_HEADER_SIZE]
    }

    /// Voxel data, extended header excluded.
    pub fn data(&self) -> Result<&[u8]> {
        let start = MRC_HEADER_SIZE + self.header.nsymbt as usize;
        Ok(&self.mmap[start..start + self.data_bytes()?])
    }
}

/// Stack MRC images into one multi-section stack at `dest`.
///
/// The first frame's header is reused with the extended header dropped and
/// `nz`/`mz` patched to the total section count; every frame must agree on
/// dimensions and mode.
pub fn stack_images(frames: &[PathBuf], dest: &Path) -> Result<()> {
    let first = frames.first().ok_or_else(|| {
        TomoError::Config(format!("no frames to stack into {}", dest.display()))
    })?;
    let first = MrcFile::open(first)?;

    let mut header = first.raw_header().to_vec();
    // no extended header in the output
    LittleEndian::write_i32(&mut header[92..96], 0);

    let mut writer = BufWriter::new(File::create(dest)?);
    writer.write_all(&header)?;

    let mut sections: i32 = 0;
    for path in frames {
        let frame = MrcFile::open(path)?;
        if frame.header.nx != first.header.nx
            || frame.header.ny != first.header.ny
            || frame.header.mode != first.header.mode
        {
            return Err(TomoError::InvalidMrc {
                path: path.clone(),
                reason: format!(
                    "does not match the first frame ({}x{} mode {})",
                    first.header.nx, first.header.ny, first.header.mode
                ),
            });
        }
        writer.write_all(frame.data()?)?;
        sections += frame.header.nz;
    }

    // patch nz and mz now that the count is known
    let mut writer = writer.into_inner().map_err(|e| e.into_error())?;
    let mut nz = [0u8; 4];
    LittleEndian::write_i32(&mut nz, sections);
    writer.seek(SeekFrom::Start(8))?;
    writer.write_all(&nz)?;
    writer.seek(SeekFrom::Start(36))?;
    writer.write_all(&nz)?;
    writer.flush()?;
    Ok(())
}
