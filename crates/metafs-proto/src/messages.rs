//! Tagged request/response records for client-server and server-server RPC.
//!
//! Every message encodes as one opcode byte followed by the body fields in
//! declaration order, little endian.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::shard::{DirEntryRecord, EntryCursor, EntryRecord, ShardDescriptor, StatRecord};
use crate::wire::{WireDeserialize, WireError, WireSerialize};
use crate::{impl_wire_for_enum, wire_struct};

/// Operation tag shared by requests and their responses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum OpCode {
    // client to server
    Open = 0,
    Unlink = 1,
    Stat = 2,
    Mknod = 3,
    Readdir = 4,
    Mkdir = 5,
    Rmdir = 6,
    GetInode = 7,
    ReadShardMap = 8,
    // server to server
    CreateShard = 9,
    SendShardEntries = 10,
    SendShardLog = 11,
}

/// Response status carried as the first field of every response body.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u32)]
pub enum RespStatus {
    #[default]
    Success = 0,
    Fail = 1,
    Exists = 2,
    NotFound = 3,
    NotDirectory = 4,
    IsDirectory = 5,
    NotEmpty = 6,
    /// Target shard mid-creation or mid-handoff. Retry, unbounded.
    Busy = 7,
    /// The addressed shard no longer owns the key. Refetch the shard map
    /// and retry once.
    StaleRouting = 8,
}

/// Progress of the log-shipping ladder, reported by the origin with every
/// send-shard-log batch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u32)]
pub enum LogStatus {
    /// Backlog still above the almost-done threshold.
    #[default]
    FarToDone = 0,
    /// Backlog small; the new range layout has been published.
    AlmostDone = 1,
    /// Final batch; the target owns the range after applying it.
    Done = 2,
}

impl_wire_for_enum!(RespStatus, u32);
impl_wire_for_enum!(LogStatus, u32);

// ---------------------------------------------------------------------------
// Client to server
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct OpenReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub mode: u32,
        pub name: String,
    }
}

wire_struct! {
    pub struct UnlinkReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub name: String,
    }
}

wire_struct! {
    pub struct StatReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub name: String,
    }
}

wire_struct! {
    pub struct MknodReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub mode: u32,
        pub name: String,
    }
}

wire_struct! {
    pub struct ReaddirReq {
        pub shard_id: u32,
        pub dir: u64,
        pub bucket: u64,
        /// Offset returned by the previous readdir page, 0 for the first.
        pub offset: u64,
    }
}

wire_struct! {
    pub struct MkdirReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub mode: u32,
        pub name: String,
    }
}

wire_struct! {
    pub struct RmdirReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub name: String,
    }
}

wire_struct! {
    pub struct GetInodeReq {
        pub shard_id: u32,
        pub parent: u64,
        pub bucket: u64,
        pub name: String,
    }
}

wire_struct! {
    pub struct ReadShardMapReq {
        pub client_id: u32,
    }
}

// ---------------------------------------------------------------------------
// Server to server
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct CreateShardReq {
        pub shard_id: u32,
        pub start_key: u64,
        pub end_key: u64,
    }
}

wire_struct! {
    pub struct SendShardEntriesReq {
        pub shard_id: u32,
        /// More batches follow after this one.
        pub is_more: bool,
        /// Where the next batch resumes if `is_more`.
        pub cursor: EntryCursor,
        pub entries: Vec<EntryRecord>,
    }
}

wire_struct! {
    pub struct SendShardLogReq {
        pub shard_id: u32,
        pub log_status: LogStatus,
        /// First log id the target should expect after this batch.
        pub next_log_id: u32,
        pub count: u32,
        /// Concatenated log records, opaque at this layer.
        pub entries: Vec<u8>,
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

wire_struct! {
    pub struct OpenRsp {
        pub status: RespStatus,
        pub inode: u64,
        pub stat: StatRecord,
    }
}

wire_struct! {
    pub struct UnlinkRsp {
        pub status: RespStatus,
    }
}

wire_struct! {
    pub struct StatRsp {
        pub status: RespStatus,
        pub inode: u64,
        pub stat: StatRecord,
    }
}

wire_struct! {
    pub struct MknodRsp {
        pub status: RespStatus,
        pub inode: u64,
        pub stat: StatRecord,
    }
}

wire_struct! {
    pub struct ReaddirRsp {
        pub status: RespStatus,
        pub is_more: bool,
        pub next_offset: u64,
        pub entries: Vec<DirEntryRecord>,
    }
}

wire_struct! {
    pub struct MkdirRsp {
        pub status: RespStatus,
        pub inode: u64,
    }
}

wire_struct! {
    pub struct RmdirRsp {
        pub status: RespStatus,
    }
}

wire_struct! {
    pub struct GetInodeRsp {
        pub status: RespStatus,
        pub inode: u64,
    }
}

wire_struct! {
    /// Bit-exact layout: status (u32), count (u32), then count descriptors
    /// of (id u32, start u64, end u64).
    pub struct ReadShardMapRsp {
        pub status: RespStatus,
        pub shards: Vec<ShardDescriptor>,
    }
}

wire_struct! {
    pub struct CreateShardRsp {
        pub status: RespStatus,
        pub shard_id: u32,
    }
}

wire_struct! {
    pub struct SendShardEntriesRsp {
        pub status: RespStatus,
        pub shard_id: u32,
        pub is_more: bool,
        pub cursor: EntryCursor,
    }
}

wire_struct! {
    pub struct SendShardLogRsp {
        pub status: RespStatus,
        pub shard_id: u32,
        pub log_status: LogStatus,
        pub next_log_id: u32,
    }
}

// ---------------------------------------------------------------------------
// Tagged unions
// ---------------------------------------------------------------------------

macro_rules! message_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident($ty:ty)),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $($variant($ty),)*
        }

        impl $name {
            pub fn opcode(&self) -> OpCode {
                match self {
                    $(Self::$variant(_) => OpCode::$variant,)*
                }
            }

            pub fn encode(&self) -> Result<Vec<u8>, WireError> {
                let mut buf = Vec::new();
                u8::from(self.opcode()).wire_serialize(&mut buf)?;
                match self {
                    $(Self::$variant(m) => m.wire_serialize(&mut buf)?,)*
                }
                Ok(buf)
            }

            pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
                let mut offset = 0;
                let raw = u8::wire_deserialize(buf, &mut offset)?;
                let op = OpCode::try_from(raw).map_err(|_| WireError::InvalidEnumVariant {
                    enum_name: "OpCode",
                    value: raw as u64,
                })?;
                match op {
                    $(OpCode::$variant => {
                        Ok(Self::$variant(<$ty>::wire_deserialize(buf, &mut offset)?))
                    })*
                }
            }
        }
    };
}

message_enum! {
    /// Any request, tagged by its opcode on the wire.
    Request {
        Open(OpenReq),
        Unlink(UnlinkReq),
        Stat(StatReq),
        Mknod(MknodReq),
        Readdir(ReaddirReq),
        Mkdir(MkdirReq),
        Rmdir(RmdirReq),
        GetInode(GetInodeReq),
        ReadShardMap(ReadShardMapReq),
        CreateShard(CreateShardReq),
        SendShardEntries(SendShardEntriesReq),
        SendShardLog(SendShardLogReq),
    }
}

message_enum! {
    /// Any response, tagged with the opcode of the request it answers.
    Response {
        Open(OpenRsp),
        Unlink(UnlinkRsp),
        Stat(StatRsp),
        Mknod(MknodRsp),
        Readdir(ReaddirRsp),
        Mkdir(MkdirRsp),
        Rmdir(RmdirRsp),
        GetInode(GetInodeRsp),
        ReadShardMap(ReadShardMapRsp),
        CreateShard(CreateShardRsp),
        SendShardEntries(SendShardEntriesRsp),
        SendShardLog(SendShardLogRsp),
    }
}

impl Response {
    /// The status field every response body starts with.
    pub fn status(&self) -> RespStatus {
        match self {
            Response::Open(r) => r.status,
            Response::Unlink(r) => r.status,
            Response::Stat(r) => r.status,
            Response::Mknod(r) => r.status,
            Response::Readdir(r) => r.status,
            Response::Mkdir(r) => r.status,
            Response::Rmdir(r) => r.status,
            Response::GetInode(r) => r.status,
            Response::ReadShardMap(r) => r.status,
            Response::CreateShard(r) => r.status,
            Response::SendShardEntries(r) => r.status,
            Response::SendShardLog(r) => r.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = Request::Mknod(MknodReq {
            shard_id: 3,
            parent: 42,
            bucket: 17,
            mode: 0o644,
            name: "a.txt".to_string(),
        });
        let buf = req.encode().unwrap();
        assert_eq!(buf[0], u8::from(OpCode::Mknod));
        assert_eq!(Request::decode(&buf).unwrap(), req);
    }

    #[test]
    fn test_response_roundtrip() {
        let rsp = Response::SendShardLog(SendShardLogRsp {
            status: RespStatus::Success,
            shard_id: 9,
            log_status: LogStatus::AlmostDone,
            next_log_id: 31,
        });
        let buf = rsp.encode().unwrap();
        assert_eq!(Response::decode(&buf).unwrap(), rsp);
    }

    #[test]
    fn test_shard_map_rsp_exact_bytes() {
        let rsp = ReadShardMapRsp {
            status: RespStatus::Success,
            shards: vec![
                ShardDescriptor::new(0, 0, 511),
                ShardDescriptor::new(4, 512, 1023),
            ],
        };
        let mut buf = Vec::new();
        rsp.wire_serialize(&mut buf).unwrap();

        let mut expect = Vec::new();
        expect.extend_from_slice(&0u32.to_le_bytes()); // status
        expect.extend_from_slice(&2u32.to_le_bytes()); // count
        expect.extend_from_slice(&0u32.to_le_bytes());
        expect.extend_from_slice(&0u64.to_le_bytes());
        expect.extend_from_slice(&511u64.to_le_bytes());
        expect.extend_from_slice(&4u32.to_le_bytes());
        expect.extend_from_slice(&512u64.to_le_bytes());
        expect.extend_from_slice(&1023u64.to_le_bytes());
        assert_eq!(buf, expect);
    }

    #[test]
    fn test_decode_bad_opcode() {
        let buf = vec![0xEEu8, 0, 0, 0];
        assert!(matches!(
            Request::decode(&buf),
            Err(WireError::InvalidEnumVariant { .. })
        ));
    }

    #[test]
    fn test_resp_status_values() {
        assert_eq!(u32::from(RespStatus::Success), 0);
        assert_eq!(u32::from(RespStatus::Busy), 7);
        assert_eq!(u32::from(RespStatus::StaleRouting), 8);
    }
}
