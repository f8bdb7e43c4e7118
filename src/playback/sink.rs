use crate::messages::Fragment;
use anyhow::Result;

/// Append-only media sink that accepts one fragment at a time
///
/// Implementations signal completion of each `append` asynchronously (for
/// `RodioSink`, a `SinkReady` on a channel). Callers must not append again
/// before that signal arrives; `PlaybackBuffer` enforces this.
pub trait FragmentSink {
    /// Hand one fragment to the sink
    fn append(&mut self, fragment: Fragment) -> Result<()>;

    /// No more fragments for the current turn
    fn end_of_stream(&mut self) -> Result<()>;

    /// Throw away whatever the current turn has appended so far
    fn discard(&mut self) -> Result<()>;
}
