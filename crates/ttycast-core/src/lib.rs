//! ttycast-core: shared formats for the ttycast session recorder.
//!
//! Provides the event model, the newline-delimited cast file codec, the live
//! viewer protocol messages, and the error taxonomy shared by the recorder and
//! any external consumer of its output.

pub mod codec;
pub mod error;
pub mod event;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_event, encode_event, encode_header, read_cast, Cast, Header, CAST_VERSION};
pub use error::{CastError, CastResult};
pub use event::{Event, EventKind, Timestamp, Utf8Stream, WindowSize};
pub use messages::{ClientMessage, ServerMessage, SessionMetadata, SessionNotice, TerminalSize, WireEvent};
