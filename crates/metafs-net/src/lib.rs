//! Blocking RPC seam between clients, servers, and peer servers.
//!
//! A `Transport` addresses peers by session index; session `i` talks to
//! server slot `i`. The loopback transport wires sessions straight to
//! in-process handlers, pushing every message through the wire codec so the
//! bytes exchanged match a real deployment.

use std::sync::Arc;

use tracing::trace;

use metafs_proto::{Request, Response, WireError};
use metafs_types::{make_error_msg, RPCCode, Result, Status};

/// Server side of the seam: one handler per server process.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, req: Request) -> Response;
}

/// Client side of the seam: blocking request/response toward a session.
pub trait Transport: Send + Sync {
    fn num_sessions(&self) -> u32;

    fn call(&self, session: u32, req: &Request) -> Result<Response>;
}

fn serde_status(err: WireError) -> Status {
    Status::with_message(RPCCode::SERDE_ERROR, err.to_string())
}

/// In-process transport over a fixed set of handlers.
pub struct Loopback {
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl Loopback {
    pub fn new(handlers: Vec<Arc<dyn RequestHandler>>) -> Self {
        Self { handlers }
    }
}

impl Transport for Loopback {
    fn num_sessions(&self) -> u32 {
        self.handlers.len() as u32
    }

    fn call(&self, session: u32, req: &Request) -> Result<Response> {
        let handler = match self.handlers.get(session as usize) {
            Some(h) => h,
            None => {
                return make_error_msg(
                    RPCCode::INVALID_SESSION,
                    format!("session {} of {}", session, self.handlers.len()),
                );
            }
        };
        trace!(session, opcode = ?req.opcode(), "loopback call");
        // Round-trip through the codec so handlers only ever see what would
        // survive the wire.
        let req_bytes = req.encode().map_err(serde_status)?;
        let decoded = Request::decode(&req_bytes).map_err(serde_status)?;
        let rsp = handler.handle(decoded);
        let rsp_bytes = rsp.encode().map_err(serde_status)?;
        Response::decode(&rsp_bytes).map_err(serde_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metafs_proto::{GetInodeReq, GetInodeRsp, RespStatus};

    struct FixedInode(u64);

    impl RequestHandler for FixedInode {
        fn handle(&self, req: Request) -> Response {
            match req {
                Request::GetInode(_) => Response::GetInode(GetInodeRsp {
                    status: RespStatus::Success,
                    inode: self.0,
                }),
                _ => Response::GetInode(GetInodeRsp {
                    status: RespStatus::Fail,
                    inode: 0,
                }),
            }
        }
    }

    fn get_inode_req() -> Request {
        Request::GetInode(GetInodeReq {
            shard_id: 0,
            parent: 1,
            bucket: 0,
            name: "f".to_string(),
        })
    }

    #[test]
    fn test_loopback_routes_by_session() {
        let t = Loopback::new(vec![Arc::new(FixedInode(10)), Arc::new(FixedInode(20))]);
        assert_eq!(t.num_sessions(), 2);
        match t.call(0, &get_inode_req()).unwrap() {
            Response::GetInode(rsp) => assert_eq!(rsp.inode, 10),
            other => panic!("unexpected response {:?}", other),
        }
        match t.call(1, &get_inode_req()).unwrap() {
            Response::GetInode(rsp) => assert_eq!(rsp.inode, 20),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_loopback_invalid_session() {
        let t = Loopback::new(vec![Arc::new(FixedInode(10))]);
        let err = t.call(5, &get_inode_req()).unwrap_err();
        assert_eq!(err.code(), RPCCode::INVALID_SESSION);
    }
}
