pub mod error;
pub mod header;
pub mod requests;
pub mod responses;


pub use error::{Result, RpcError};
pub use header::{FrameHeader, MsgStatus, MsgType, HEADER_LEN, MAGIC, VERSION};
pub use requests::{method_signature, service_key, Request, RequestId, RequestIdGenerator};
pub use responses::Response;
