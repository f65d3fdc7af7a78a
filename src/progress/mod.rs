// # Progress Module
//
// Formatting-job progress, from the channel to what the screen shows:
//
// - **FormattingSession**: full progress document written by the external job
// - **ProgressChannel**: subscribe by session id, receive snapshots, unsubscribe
// - **ProgressHub** / **PollingChannel**: in-process store and HTTP polling backends
// - **reduce**: pure `(FormatView, ChannelEvent) -> FormatView` state machine

mod channel;
mod hub;
mod polling;
mod reducer;
mod types;

pub use channel::{ChannelError, ProgressChannel, ProgressSubscription};
pub use hub::ProgressHub;
pub use polling::PollingChannel;
pub use reducer::{
    classify_action, reduce, FailureCause, FormatPhase, FormatView, FAILURE_MARKERS, READY_MARKER,
};
pub use types::{ChannelEvent, FormattingSession, HistoryEntry};
