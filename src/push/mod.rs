//! Unfiltered one-way delivery over a streaming HTTP response
//!
//! Every connected stream receives every broadcast event as an
//! `event: <type>` frame, plus a comment heartbeat while idle.

mod registry;
mod stream;
mod writer;

pub use registry::StreamRegistry;
pub use stream::PushStream;
pub use writer::{comment_frame, event_frame, BodyStream, BodyWriter, PushWriter};
