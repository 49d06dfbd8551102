//! stepwise-session: Incremental aggregation of step event streams
//!
//! This crate folds decoded stream events into two views: the step registry
//! (coalesced, ordered by step id) and the session message (reply text plus
//! the raw step log), and drives a transport to feed them.

pub mod chat;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod projector;
pub mod registry;
pub mod session;
pub mod transport;

pub use chat::{Chat, ChatReply};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::{SessionEvent, SessionOutcome};
pub use handle::{SessionHandle, SessionSnapshot};
pub use projector::{LogEntry, LogKind, Role, SessionMessage, ToolExecution};
pub use registry::{Step, StepRegistry};
pub use session::{Session, SessionStats};
pub use transport::{HttpTransport, Transport};
