//! Append-only log file.
//!
//! ```text
//! [running checksum: 4] [frame] [frame] ... [bad tail]
//! frame = [size: 4] [checksum: 4] [data: size]
//! ```
//!
//! The running checksum covers every complete frame and is rewritten after
//! each append. Frames are synced before the header is, so after a crash the
//! header always matches some frame boundary; anything past the last
//! matching boundary is a torn append and is cut off when the log is opened.
//!
//! Checksums fold each byte, read as unsigned, into a running hash that is
//! multiplied by 13331 per byte. This is TideDB's own log format; files
//! written by other engines are not readable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::storage::error::{StorageError, StorageResult};

const SEED: u32 = 13331;
const HEADER_SIZE: u64 = 4;
const FRAME_HEADER_SIZE: u64 = 8;

pub(crate) fn checksum(seed: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(seed, |acc, &b| acc.wrapping_mul(SEED).wrapping_add(b as u32))
}

struct LogFile {
    file: File,
    running_checksum: u32,
    /// Read cursor for `next`.
    position: u64,
    size: u64,
}

impl LogFile {
    /// Reads the whole frame at the cursor and advances past it. Returns
    /// `None` if the frame is cut short or fails its checksum.
    fn read_frame(&mut self) -> StorageResult<Option<Vec<u8>>> {
        if self.position + FRAME_HEADER_SIZE > self.size {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(self.position))?;
        let size = self.file.read_u32::<BigEndian>()? as u64;
        let expected = self.file.read_u32::<BigEndian>()?;
        if self.position + FRAME_HEADER_SIZE + size > self.size {
            return Ok(None);
        }

        let mut frame = vec![0u8; (FRAME_HEADER_SIZE + size) as usize];
        BigEndian::write_u32(&mut frame[0..4], size as u32);
        BigEndian::write_u32(&mut frame[4..8], expected);
        self.file.read_exact(&mut frame[FRAME_HEADER_SIZE as usize..])?;

        if checksum(0, &frame[FRAME_HEADER_SIZE as usize..]) != expected {
            return Ok(None);
        }

        self.position += frame.len() as u64;
        Ok(Some(frame))
    }

    fn drop_tail(&mut self) -> StorageResult<()> {
        if self.position < self.size {
            warn!(
                "discarding {} bytes of log tail at offset {}",
                self.size - self.position,
                self.position
            );
            self.truncate(self.position)?;
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }
}

pub struct Logger {
    inner: Mutex<LogFile>,
}

impl Logger {
    pub fn create(path: &Path) -> StorageResult<Self> {
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&0u32.to_be_bytes())?;
        file.sync_all()?;

        Ok(Self {
            inner: Mutex::new(LogFile {
                file,
                running_checksum: 0,
                position: HEADER_SIZE,
                size: HEADER_SIZE,
            }),
        })
    }

    /// Opens an existing log, validating it and cutting off any torn tail.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        if size < HEADER_SIZE {
            return Err(StorageError::BadLogFile(format!(
                "file is {} bytes, shorter than its header",
                size
            )));
        }
        file.seek(SeekFrom::Start(0))?;
        let header = file.read_u32::<BigEndian>()?;

        let logger = Self {
            inner: Mutex::new(LogFile {
                file,
                running_checksum: header,
                position: HEADER_SIZE,
                size,
            }),
        };
        logger.check_and_remove_tail()?;
        Ok(logger)
    }

    fn check_and_remove_tail(&self) -> StorageResult<()> {
        let mut log = self.inner.lock();
        let header = log.running_checksum;
        log.position = HEADER_SIZE;

        let mut running = 0u32;
        let mut boundary = (header == 0).then_some(HEADER_SIZE);
        let mut frames = 0usize;
        while let Some(frame) = log.read_frame()? {
            running = checksum(running, &frame);
            frames += 1;
            if running == header {
                boundary = Some(log.position);
            }
        }

        let Some(boundary) = boundary else {
            return Err(StorageError::BadLogFile(format!(
                "running checksum {:#010x} matches no frame boundary",
                header
            )));
        };
        if boundary < log.size {
            warn!("log has frames past its checksum; truncating to {}", boundary);
            log.truncate(boundary)?;
        }
        debug!("log opened with {} frames, {} bytes", frames, log.size);

        log.position = HEADER_SIZE;
        Ok(())
    }

    /// Appends one record and makes it durable before returning.
    pub fn log(&self, data: &[u8]) -> StorageResult<()> {
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE as usize + data.len());
        frame.put_u32(data.len() as u32);
        frame.put_u32(checksum(0, data));
        frame.put_slice(data);

        let mut log = self.inner.lock();
        let end = log.size;
        log.file.seek(SeekFrom::Start(end))?;
        log.file.write_all(&frame)?;
        log.file.sync_data()?;
        log.size += frame.len() as u64;

        let running = checksum(log.running_checksum, &frame);
        log.file.seek(SeekFrom::Start(0))?;
        log.file.write_all(&running.to_be_bytes())?;
        log.file.sync_data()?;
        log.running_checksum = running;

        Ok(())
    }

    /// Returns the data of the next record, or `None` at the end of the log.
    ///
    /// A trailing frame that is cut short or fails its checksum is truncated
    /// away rather than returned.
    pub fn next(&self) -> StorageResult<Option<Vec<u8>>> {
        let mut log = self.inner.lock();
        match log.read_frame()? {
            Some(frame) => Ok(Some(frame[FRAME_HEADER_SIZE as usize..].to_vec())),
            None => {
                log.drop_tail()?;
                Ok(None)
            }
        }
    }

    /// Moves the read cursor back to the first record.
    pub fn rewind(&self) {
        self.inner.lock().position = HEADER_SIZE;
    }

    pub fn close(&self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn read_all(logger: &Logger) -> Result<Vec<Vec<u8>>> {
        logger.rewind();
        let mut records = Vec::new();
        while let Some(record) = logger.next()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_append_and_read() -> Result<()> {
        let dir = tempdir()?;
        let logger = Logger::create(&dir.path().join("t.log"))?;

        logger.log(b"first")?;
        logger.log(b"")?;
        logger.log(b"third record")?;

        assert_eq!(
            read_all(&logger)?,
            vec![b"first".to_vec(), Vec::new(), b"third record".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_records() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        {
            let logger = Logger::create(&path)?;
            logger.log(b"a")?;
            logger.log(b"bb")?;
        }

        let logger = Logger::open(&path)?;
        logger.log(b"ccc")?;
        assert_eq!(
            read_all(&logger)?,
            vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_corrupted_acknowledged_frame_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        let logger = Logger::create(&path)?;
        logger.log(b"good")?;
        logger.log(b"flipped")?;
        drop(logger);

        let mut bytes = std::fs::read(&path)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes)?;

        // The header covers a frame that no longer verifies.
        assert!(matches!(
            Logger::open(&path),
            Err(StorageError::BadLogFile(_))
        ));
        assert_eq!(std::fs::read(&path)?, bytes);
        Ok(())
    }

    #[test]
    fn test_next_drops_bad_frame() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        let logger = Logger::create(&path)?;
        logger.log(b"kept")?;
        logger.log(b"mangled")?;

        {
            let mut log = logger.inner.lock();
            let end = log.size;
            log.file.seek(SeekFrom::Start(end - 1))?;
            log.file.write_all(&[0u8])?;
        }

        assert_eq!(read_all(&logger)?, vec![b"kept".to_vec()]);
        assert_eq!(std::fs::metadata(&path)?.len(), HEADER_SIZE + 8 + 4);
        Ok(())
    }

    #[test]
    fn test_torn_append_is_truncated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        {
            let logger = Logger::create(&path)?;
            logger.log(b"complete")?;
        }
        let clean_len = std::fs::metadata(&path)?.len();

        // A frame header promising more data than was written.
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&100u32.to_be_bytes())?;
        file.write_all(&[1, 2, 3, 4, 5, 6])?;
        drop(file);

        let logger = Logger::open(&path)?;
        assert_eq!(std::fs::metadata(&path)?.len(), clean_len);
        assert_eq!(read_all(&logger)?, vec![b"complete".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_complete_frame_without_header_update() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        {
            let logger = Logger::create(&path)?;
            logger.log(b"committed")?;
        }
        let clean_len = std::fs::metadata(&path)?.len();

        let data = b"never acknowledged";
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&(data.len() as u32).to_be_bytes())?;
        file.write_all(&checksum(0, data).to_be_bytes())?;
        file.write_all(data)?;
        drop(file);

        let logger = Logger::open(&path)?;
        assert_eq!(std::fs::metadata(&path)?.len(), clean_len);
        assert_eq!(read_all(&logger)?, vec![b"committed".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_bad_header_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        {
            let logger = Logger::create(&path)?;
            logger.log(b"x")?;
        }
        let mut bytes = std::fs::read(&path)?;
        bytes[0] ^= 0x55;
        std::fs::write(&path, &bytes)?;

        assert!(matches!(
            Logger::open(&path),
            Err(StorageError::BadLogFile(_))
        ));
        Ok(())
    }

    #[test]
    fn test_short_file_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.log");
        std::fs::write(&path, [0u8; 2])?;
        assert!(matches!(
            Logger::open(&path),
            Err(StorageError::BadLogFile(_))
        ));
        Ok(())
    }
}
