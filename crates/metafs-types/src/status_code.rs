/// Status code type alias, `u16` across the whole codebase.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// RPC / transport status codes (2xxx).
pub mod RPCCode {
    use super::status_code_t;

    pub const INVALID_MESSAGE_TYPE: status_code_t = 2000;
    pub const INVALID_SESSION: status_code_t = 2001;
    pub const SEND_FAILED: status_code_t = 2002;
    pub const SERDE_ERROR: status_code_t = 2003;
}

/// Metadata shard service status codes (3xxx).
pub mod ShardCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const EXISTS: status_code_t = 3001;
    pub const NOT_EMPTY: status_code_t = 3002;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const STALE_ROUTING: status_code_t = 3004;
    pub const BUSY: status_code_t = 3005;
    pub const UNKNOWN_SHARD: status_code_t = 3006;
    pub const BAD_TRANSITION: status_code_t = 3007;
    pub const LOG_CORRUPTION: status_code_t = 3008;
    pub const IS_DIRECTORY: status_code_t = 3009;
}

/// Storage-boundary status codes (4xxx).
pub mod KvCode {
    use super::status_code_t;

    pub const GET_ERROR: status_code_t = 4000;
    pub const PUT_ERROR: status_code_t = 4001;
    pub const SCAN_ERROR: status_code_t = 4002;
    pub const APPEND_ERROR: status_code_t = 4003;
}

/// Map a status code to its symbolic name for diagnostics.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::FOUND_BUG => "FoundBug",
        StatusCode::UNKNOWN => "Unknown",
        RPCCode::INVALID_MESSAGE_TYPE => "RPC::InvalidMessageType",
        RPCCode::INVALID_SESSION => "RPC::InvalidSession",
        RPCCode::SEND_FAILED => "RPC::SendFailed",
        RPCCode::SERDE_ERROR => "RPC::SerdeError",
        ShardCode::NOT_FOUND => "Shard::NotFound",
        ShardCode::EXISTS => "Shard::Exists",
        ShardCode::NOT_EMPTY => "Shard::NotEmpty",
        ShardCode::NOT_DIRECTORY => "Shard::NotDirectory",
        ShardCode::STALE_ROUTING => "Shard::StaleRouting",
        ShardCode::BUSY => "Shard::Busy",
        ShardCode::UNKNOWN_SHARD => "Shard::UnknownShard",
        ShardCode::BAD_TRANSITION => "Shard::BadTransition",
        ShardCode::LOG_CORRUPTION => "Shard::LogCorruption",
        ShardCode::IS_DIRECTORY => "Shard::IsDirectory",
        KvCode::GET_ERROR => "Kv::GetError",
        KvCode::PUT_ERROR => "Kv::PutError",
        KvCode::SCAN_ERROR => "Kv::ScanError",
        KvCode::APPEND_ERROR => "Kv::AppendError",
        _ => "Undefined",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_known() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(ShardCode::STALE_ROUTING), "Shard::StaleRouting");
        assert_eq!(to_string(KvCode::APPEND_ERROR), "Kv::AppendError");
    }

    #[test]
    fn test_to_string_undefined() {
        assert_eq!(to_string(12345), "Undefined");
    }
}
