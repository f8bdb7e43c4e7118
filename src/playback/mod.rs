pub mod buffer;
pub mod media;
pub mod rodio_sink;
pub mod sink;

pub use buffer::PlaybackBuffer;
pub use rodio_sink::RodioSink;
pub use sink::FragmentSink;
