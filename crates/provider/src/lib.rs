pub mod common;
pub mod router;
pub mod sse;

pub use router::{NonStreamReply, Reply, Router, StreamReply};
