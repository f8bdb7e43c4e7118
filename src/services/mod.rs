pub mod recorder;

pub use recorder::{Microphone, Recorder, RecorderHandle};
