//! # Clip Assembly
//!
//! Container detection for decoded audio payloads and the silent placeholder
//! clip the dialogue pipeline substitutes when real audio cannot be obtained.

use bridge_traits::audio::{AudioClip, AudioMime};
use bytes::Bytes;
use tracing::debug;

/// Sample rate of the placeholder clip. The value is arbitrary since the
/// clip carries zero data frames, but it must be a rate hosts accept.
const PLACEHOLDER_SAMPLE_RATE: u32 = 8_000;

/// Container detector for audio payloads.
///
/// The narration pipeline only ever produces two containers: WAV from
/// waveform-style providers and MP3 from compressed-output providers. The
/// payload itself is the only trustworthy signal (envelope metadata has been
/// observed lying about its format), so detection reads the header bytes.
pub struct FormatDetector;

impl FormatDetector {
    /// Detect the container format of an audio payload.
    ///
    /// A RIFF/WAVE signature identifies WAV; everything else is treated as
    /// MP3, the pipeline's default container.
    pub fn detect_mime(data: &[u8]) -> AudioMime {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            AudioMime::Wav
        } else {
            debug!(len = data.len(), "No WAV signature, assuming MP3 payload");
            AudioMime::Mp3
        }
    }
}

/// Build the deterministic silent placeholder clip.
///
/// A minimal valid WAV: a 44-byte header describing 16-bit mono PCM with an
/// empty data chunk. Hosts treat it as a zero-length clip that "plays" and
/// ends immediately, so downstream playback code needs no separate
/// "no audio" branch.
pub fn silent_clip() -> AudioClip {
    let mut header = Vec::with_capacity(44);

    let byte_rate = PLACEHOLDER_SAMPLE_RATE * 2; // mono, 16-bit
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&36u32.to_le_bytes()); // chunk size: header only
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&1u16.to_le_bytes()); // mono
    header.extend_from_slice(&PLACEHOLDER_SAMPLE_RATE.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&2u16.to_le_bytes()); // block align
    header.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    header.extend_from_slice(b"data");
    header.extend_from_slice(&0u32.to_le_bytes()); // zero data frames

    AudioClip::new(AudioMime::Wav, Bytes::from(header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_wav_signature() {
        let clip = silent_clip();
        assert_eq!(FormatDetector::detect_mime(&clip.data), AudioMime::Wav);
    }

    #[test]
    fn defaults_to_mp3() {
        assert_eq!(
            FormatDetector::detect_mime(&[0xFF, 0xFB, 0x90, 0x00]),
            AudioMime::Mp3
        );
        assert_eq!(FormatDetector::detect_mime(b"ID3\x04rest"), AudioMime::Mp3);
        assert_eq!(FormatDetector::detect_mime(&[]), AudioMime::Mp3);
    }

    #[test]
    fn truncated_riff_is_not_wav() {
        // "RIFF" alone, no WAVE marker
        assert_eq!(FormatDetector::detect_mime(b"RIFF1234"), AudioMime::Mp3);
    }

    #[test]
    fn placeholder_is_valid_wav() {
        let clip = silent_clip();
        assert_eq!(clip.mime, AudioMime::Wav);
        assert_eq!(clip.data.len(), 44);
        assert_eq!(&clip.data[0..4], b"RIFF");
        assert_eq!(&clip.data[8..12], b"WAVE");
        assert_eq!(&clip.data[36..40], b"data");
        // data chunk declares zero bytes
        assert_eq!(&clip.data[40..44], &[0, 0, 0, 0]);
    }

    #[test]
    fn placeholder_is_deterministic() {
        assert_eq!(silent_clip(), silent_clip());
    }
}
