//! Relational message history.
//!
//! Serves the thread and channel aggregation stages: exact lookups by
//! channel, thread and time range, scored by lexical overlap with the query.

pub mod message_log;

pub use message_log::MessageLog;
