//! Infrastructure layer: rate limiting, job queues, SSE push, external ports.

pub mod external;
pub mod jobs;
pub mod rate_limit;
pub mod sse;

pub use sse::{ClientConnection, GenerationMessage, Registration, SseFrame, SseNotifier};
