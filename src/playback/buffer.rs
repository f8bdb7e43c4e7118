use super::sink::FragmentSink;
use crate::messages::Fragment;
use anyhow::Result;
use std::collections::VecDeque;

/// Bridges an asynchronous stream of fragments to a sink that takes one at a time
///
/// Fragments are released to the sink in arrival order, and never while a
/// previous append is still in flight. The pending queue is unbounded: a sink
/// that stops signalling readiness lets it grow without limit.
pub struct PlaybackBuffer<S> {
    sink: S,
    pending: VecDeque<Fragment>,
    busy: bool,
    stopped: bool,
    finishing: bool,
}

impl<S: FragmentSink> PlaybackBuffer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            busy: false,
            stopped: false,
            finishing: false,
        }
    }

    /// Submit straight to the sink when it is ready, otherwise queue at the tail
    ///
    /// Older fragments left queued by a rejected append always go first.
    pub fn submit_or_enqueue(&mut self, fragment: Fragment) -> Result<()> {
        self.pending.push_back(fragment);

        if self.busy || self.stopped {
            tracing::trace!("Queued fragment, {} pending", self.pending.len());
            return Ok(());
        }

        self.release_next()
    }

    /// Called once per readiness notification from the sink
    pub fn on_sink_ready(&mut self) -> Result<()> {
        self.busy = false;

        if self.stopped {
            return Ok(());
        }

        self.release_next()
    }

    /// Mark the end of the current turn
    ///
    /// The sink is told once the queue has drained and the last append completed.
    pub fn finish(&mut self) -> Result<()> {
        self.finishing = true;

        if self.busy || self.stopped {
            return Ok(());
        }

        self.release_next()
    }

    /// Stop feeding the sink; whatever is still pending stays put
    pub fn stop(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                "Playback stopped with {} fragments pending",
                self.pending.len()
            );
        }
        self.stopped = true;
    }

    /// Discard the previous turn, on both sides, and accept fragments again
    ///
    /// The busy flag is left alone since it mirrors the sink, not the turn.
    pub fn reset(&mut self) -> Result<()> {
        self.pending.clear();
        self.stopped = false;
        self.finishing = false;
        self.sink.discard()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Hand the head of the queue to the sink, or end the turn if it is drained
    ///
    /// A rejected fragment goes back to the front so order is kept.
    fn release_next(&mut self) -> Result<()> {
        let Some(fragment) = self.pending.pop_front() else {
            return self.end_if_finishing();
        };

        match self.sink.append(fragment.clone()) {
            Ok(()) => {
                self.busy = true;
                Ok(())
            }
            Err(e) => {
                self.pending.push_front(fragment);
                Err(e)
            }
        }
    }

    fn end_if_finishing(&mut self) -> Result<()> {
        if self.finishing {
            self.finishing = false;
            self.sink.end_of_stream()?;
        }
        Ok(())
    }
}
