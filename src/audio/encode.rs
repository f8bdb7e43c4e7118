use super::format::AudioFormat;
use crate::messages::Fragment;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// Size value used for RIFF and data chunks whose final length is unknown
const STREAMING_SIZE: u32 = u32::MAX;

/// Turns captured sample chunks into outbound fragments
///
/// The fragments of one recording concatenate into a single WAV stream: the
/// first fragment carries the header (with streaming sizes), the rest are bare
/// 16-bit PCM.
pub struct FragmentEncoder {
    spec: WavSpec,
    header_sent: bool,
}

impl FragmentEncoder {
    pub fn new(format: AudioFormat) -> Self {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: AudioFormat::BITS_PER_SAMPLE,
            sample_format: SampleFormat::Int,
        };

        Self {
            spec,
            header_sent: false,
        }
    }

    pub fn encode(&mut self, samples: &[f32]) -> Result<Fragment> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                WavWriter::new(&mut cursor, self.spec).context("Failed to create WAV writer")?;
            for sample in samples {
                // Convert f32 (-1.0 to 1.0) to i16
                let amplitude = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(amplitude)
                    .context("Failed to write sample")?;
            }
            writer.finalize().context("Failed to finalize WAV")?;
        }

        let mut bytes = cursor.into_inner();
        let data_start = data_offset(&bytes).context("WAV output has no data chunk")?;

        if self.header_sent {
            bytes.drain(..data_start);
        } else {
            bytes[4..8].copy_from_slice(&STREAMING_SIZE.to_le_bytes());
            bytes[data_start - 4..data_start].copy_from_slice(&STREAMING_SIZE.to_le_bytes());
            self.header_sent = true;
        }

        Ok(Fragment::from(bytes))
    }
}

/// Offset of the first byte of sample data in a RIFF/WAVE buffer
fn data_offset(bytes: &[u8]) -> Option<usize> {
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().ok()?) as usize;
        if id == b"data" {
            return Some(pos + 8);
        }
        // Chunks are word aligned
        pos += 8 + size + (size & 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fragment_carries_streaming_header() {
        let mut encoder = FragmentEncoder::new(AudioFormat::default());

        let fragment = encoder.encode(&[0.0, 0.5, -0.5, 1.0]).unwrap();
        let bytes = fragment.as_bytes();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[4..8], &u32::MAX.to_le_bytes());

        let start = data_offset(bytes).unwrap();
        assert_eq!(&bytes[start - 4..start], &u32::MAX.to_le_bytes());
        assert_eq!(bytes.len() - start, 8);
    }

    #[test]
    fn later_fragments_are_bare_pcm() {
        let mut encoder = FragmentEncoder::new(AudioFormat::default());
        encoder.encode(&[0.0; 16]).unwrap();

        let fragment = encoder.encode(&[1.0, -1.0, 2.0]).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&i16::MAX.to_le_bytes());
        expected.extend_from_slice(&(-i16::MAX).to_le_bytes());
        expected.extend_from_slice(&i16::MAX.to_le_bytes());
        assert_eq!(fragment.as_bytes(), expected.as_slice());
    }

    #[test]
    fn missing_data_chunk_is_detected() {
        assert_eq!(data_offset(b"RIFF\0\0\0\0WAVE"), None);
    }
}
