//! Migration log record format.
//!
//! Each record starts with the parent inode id carrying a reserved tag bit:
//! set for put, clear for delete. Put records then carry the entry name, the
//! child inode and a full attribute snapshot; delete records carry only the
//! entry name. Records are written to the log store individually and shipped
//! concatenated, ids implicit from the batch's starting log id.

use metafs_proto::wire::{WireDeserialize, WireError, WireSerialize};
use metafs_proto::StatRecord;
use metafs_types::{make_error_msg, Result, ShardCode};

/// Reserved bit in the parent-id field distinguishing put from delete.
/// Inode ids keep this bit clear: bit 63 is the directory flag and allocated
/// ids stay below bit 62.
pub const LOG_PUT_TAG: u64 = 1 << 62;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Put {
        parent: u64,
        name: String,
        inode: u64,
        stat: StatRecord,
    },
    Delete {
        parent: u64,
        name: String,
    },
}

impl LogRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let r = match self {
            LogRecord::Put {
                parent,
                name,
                inode,
                stat,
            } => (parent | LOG_PUT_TAG)
                .wire_serialize(&mut buf)
                .and_then(|_| name.wire_serialize(&mut buf))
                .and_then(|_| inode.wire_serialize(&mut buf))
                .and_then(|_| stat.wire_serialize(&mut buf)),
            LogRecord::Delete { parent, name } => parent
                .wire_serialize(&mut buf)
                .and_then(|_| name.wire_serialize(&mut buf)),
        };
        match r {
            Ok(()) => Ok(buf),
            Err(err) => corrupt(err),
        }
    }

    pub fn decode(buf: &[u8], offset: &mut usize) -> Result<LogRecord> {
        let tagged: u64 = read(buf, offset)?;
        let parent = tagged & !LOG_PUT_TAG;
        if tagged & LOG_PUT_TAG != 0 {
            Ok(LogRecord::Put {
                parent,
                name: read(buf, offset)?,
                inode: read(buf, offset)?,
                stat: read(buf, offset)?,
            })
        } else {
            Ok(LogRecord::Delete {
                parent,
                name: read(buf, offset)?,
            })
        }
    }

    /// Decode a shipped batch of `count` concatenated records.
    pub fn decode_batch(buf: &[u8], count: u32) -> Result<Vec<LogRecord>> {
        let mut offset = 0;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(LogRecord::decode(buf, &mut offset)?);
        }
        if offset != buf.len() {
            return make_error_msg(
                ShardCode::LOG_CORRUPTION,
                format!("{} trailing bytes after {} records", buf.len() - offset, count),
            );
        }
        Ok(records)
    }
}

fn corrupt<T>(err: WireError) -> Result<T> {
    make_error_msg(ShardCode::LOG_CORRUPTION, err.to_string())
}

fn read<T: WireDeserialize>(buf: &[u8], offset: &mut usize) -> Result<T> {
    T::wire_deserialize(buf, offset).or_else(corrupt)
}
