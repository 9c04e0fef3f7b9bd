//! Framed record encoding for durable files
//!
//! Checkpoint and oplog files share one frame format with CRC32 checksums
//! for corruption detection.
//!
//! ## Frame Format
//!
//! ```text
//! [length: u32 LE][payload: bytes][crc32: u32 LE]
//! ```
//!
//! - **length**: payload size in bytes (not including length or crc)
//! - **payload**: rmp-serde (MessagePack) serialized record
//! - **crc32**: checksum over the payload
//!
//! A torn tail (partial last frame after a crash) is detected by a short
//! read or a checksum mismatch; readers stop at the last intact frame.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tessera_core::{Error, Result};

/// Append-only frame writer over a file
pub struct FrameWriter {
    out: BufWriter<File>,
}

impl FrameWriter {
    /// Create (truncating) a new frame file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Open an existing frame file for appending.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Serialize and append one record.
    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let payload =
            rmp_serde::to_vec(record).map_err(|e| Error::Serialization(e.to_string()))?;
        let crc = crc32fast::hash(&payload);
        self.out.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.out.write_all(&payload)?;
        self.out.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    /// Flush buffered frames and sync file contents to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok(())
    }
}

/// Frame reader that stops cleanly at a torn tail
pub struct FrameReader {
    input: BufReader<File>,
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            input: BufReader::new(File::open(path)?),
        })
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of file or at a torn final frame. A
    /// checksum mismatch on a *complete* frame is real corruption and is
    /// reported as an error.
    pub fn read_record<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut self.input, &mut len_buf)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => return Ok(None),
            ReadOutcome::Full => {}
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        if read_exact_or_eof(&mut self.input, &mut payload)? != ReadOutcome::Full {
            return Ok(None);
        }

        let mut crc_buf = [0u8; 4];
        if read_exact_or_eof(&mut self.input, &mut crc_buf)? != ReadOutcome::Full {
            return Ok(None);
        }
        let expected = u32::from_le_bytes(crc_buf);
        let actual = crc32fast::hash(&payload);
        if expected != actual {
            return Err(Error::Corruption(format!(
                "frame checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            )));
        }

        let record =
            rmp_serde::from_slice(&payload).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Some(record))
    }

    /// Read all remaining records.
    pub fn read_all<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

#[derive(PartialEq)]
enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}
