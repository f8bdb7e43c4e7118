pub mod capture;
pub mod encode;
pub mod format;

pub use capture::{ActiveCapture, AudioCapture};
pub use encode::FragmentEncoder;
pub use format::AudioFormat;
