//! JSONL request dispatch for companion channels.
//!
//! Every accepted connection carries a sequence of request lines. Each line
//! is decoded into a [`CommandRequest`], admitted into the server's pending
//! set, executed, and answered with a single response line before the next
//! request is read.
//!
//! ## Protocol
//!
//! ```json
//! {"id":1,"command":"describe","arguments":{}}
//! ```
//!
//! Successful requests are answered with a result line:
//!
//! ```json
//! {"kind":"result","id":1,"payload":{"udid":"host"}}
//! ```
//!
//! Failures carry a category. Protocol and internal failures close the
//! connection; command failures leave it open for the next request.
//!
//! ```json
//! {"kind":"error","id":1,"category":"command","message":"unsupported command: boot"}
//! ```

mod errors;
mod handler;
mod request;
mod response;

pub use self::errors::{DispatchError, ErrorCategory};
pub(crate) use self::handler::CommandDispatcher;
pub use self::request::CommandRequest;
pub use self::response::{ResponseMessage, ResponseWriter};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Maximum size of a single request line in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;
