//! # Audio Envelope Decoding
//!
//! Each dialogue line's audio ships as a JSON envelope containing a Base64
//! payload plus provider-specific metadata. Different synthesis providers
//! wrap the payload differently, so extraction probes an ordered list of
//! known shapes; the first match wins and anything unrecognized falls back
//! to the silent placeholder.
//!
//! The decoder never fails: the caller always receives something playable,
//! and every discrepancy is routed to diagnostics instead. This keeps the
//! sequencer's advance logic uniform: a line that "plays" a placeholder
//! ends like any other line.

use crate::manifest::DialogueLine;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bridge_traits::audio::AudioClip;
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use core_audio::clip::{silent_clip, FormatDetector};
use core_runtime::config::DialogueConfig;
use core_runtime::events::{CoreEvent, DialogueEvent, EnvelopeFallback, EventBus};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Envelope Shapes
// ============================================================================

/// The known envelope layouts, in probe order.
///
/// The flat shapes come from single-generation synthesis responses; the
/// `generations` family wraps the same three layouts in a multi-candidate
/// array of which only the first entry is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    /// `{ "audio": "<base64>" }`
    Audio,
    /// `{ "audio_data": "<base64>" }`
    AudioData,
    /// `{ "output": { "audio": "<base64>" } }`
    OutputAudio,
    /// `{ "generations": [ { "audio": "<base64>" } ] }`
    GenerationsAudio,
    /// `{ "generations": [ { "audio_data": "<base64>" } ] }`
    GenerationsAudioData,
    /// `{ "generations": [ { "output": { "audio": "<base64>" } } ] }`
    GenerationsOutputAudio,
}

type ShapeMatcher = fn(&Value) -> Option<&str>;

fn probe_audio(value: &Value) -> Option<&str> {
    value.get("audio").and_then(Value::as_str)
}

fn probe_audio_data(value: &Value) -> Option<&str> {
    value.get("audio_data").and_then(Value::as_str)
}

fn probe_output_audio(value: &Value) -> Option<&str> {
    value
        .get("output")
        .and_then(|output| output.get("audio"))
        .and_then(Value::as_str)
}

fn first_generation(value: &Value) -> Option<&Value> {
    value.get("generations").and_then(|g| g.get(0))
}

fn probe_generations_audio(value: &Value) -> Option<&str> {
    first_generation(value).and_then(probe_audio)
}

fn probe_generations_audio_data(value: &Value) -> Option<&str> {
    first_generation(value).and_then(probe_audio_data)
}

fn probe_generations_output_audio(value: &Value) -> Option<&str> {
    first_generation(value).and_then(probe_output_audio)
}

/// Probe order is part of the contract: flat fields before nested output,
/// single-generation shapes before the `generations` array.
const SHAPE_MATCHERS: &[(EnvelopeShape, ShapeMatcher)] = &[
    (EnvelopeShape::Audio, probe_audio),
    (EnvelopeShape::AudioData, probe_audio_data),
    (EnvelopeShape::OutputAudio, probe_output_audio),
    (EnvelopeShape::GenerationsAudio, probe_generations_audio),
    (EnvelopeShape::GenerationsAudioData, probe_generations_audio_data),
    (
        EnvelopeShape::GenerationsOutputAudio,
        probe_generations_output_audio,
    ),
];

/// Extract the Base64 payload from a parsed envelope, identifying its shape.
fn extract_payload(value: &Value) -> Option<(EnvelopeShape, &str)> {
    SHAPE_MATCHERS
        .iter()
        .find_map(|(shape, matcher)| matcher(value).map(|payload| (*shape, payload)))
}

// ============================================================================
// Decoder
// ============================================================================

/// Where a playable line's audio actually came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipOrigin {
    /// Real audio decoded from the envelope.
    Decoded { shape: EnvelopeShape },
    /// The deterministic silent clip, substituted after a failure.
    Placeholder { reason: EnvelopeFallback },
}

/// The decoder's infallible output: always playable.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableLine {
    pub clip: AudioClip,
    pub origin: ClipOrigin,
}

impl PlayableLine {
    /// Returns `true` if the line will play silence instead of narration.
    pub fn is_placeholder(&self) -> bool {
        matches!(self.origin, ClipOrigin::Placeholder { .. })
    }
}

/// Fetches and decodes one line's audio envelope.
pub struct EnvelopeDecoder {
    http: Arc<dyn HttpClient>,
    config: DialogueConfig,
    events: EventBus,
}

impl EnvelopeDecoder {
    pub fn new(http: Arc<dyn HttpClient>, config: DialogueConfig, events: EventBus) -> Self {
        Self {
            http,
            config,
            events,
        }
    }

    /// Produce playable audio for a dialogue line.
    ///
    /// Never fails: fetch errors, unrecognized envelopes, and broken Base64
    /// all degrade to the silent placeholder, with the discrepancy reported
    /// as a [`DialogueEvent::LineFallback`] event.
    pub async fn decode(&self, line: &DialogueLine) -> PlayableLine {
        let request = HttpRequest::get(&line.audio_path).timeout(self.config.fetch_timeout);
        let fetch = tokio::time::timeout(
            self.config.fetch_timeout,
            self.http.execute_with_retry(request, RetryPolicy::none()),
        )
        .await;

        let response = match fetch {
            Err(_elapsed) => {
                warn!(line = line.index, path = %line.audio_path, "Envelope fetch timed out");
                return self.fallback(line, EnvelopeFallback::FetchFailed);
            }
            Ok(Err(e)) => {
                warn!(line = line.index, path = %line.audio_path, error = %e, "Envelope fetch failed");
                return self.fallback(line, EnvelopeFallback::FetchFailed);
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            warn!(
                line = line.index,
                status = response.status,
                "Envelope not served"
            );
            return self.fallback(line, EnvelopeFallback::FetchFailed);
        }

        let value: Value = match serde_json::from_slice(&response.body) {
            Ok(value) => value,
            Err(e) => {
                warn!(line = line.index, error = %e, "Envelope is not valid JSON");
                return self.fallback(line, EnvelopeFallback::UnrecognizedShape);
            }
        };

        let Some((shape, payload)) = extract_payload(&value) else {
            warn!(line = line.index, "Envelope matches no known shape");
            return self.fallback(line, EnvelopeFallback::UnrecognizedShape);
        };

        let bytes = match BASE64.decode(payload.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(line = line.index, shape = ?shape, error = %e, "Envelope payload is not valid Base64");
                return self.fallback(line, EnvelopeFallback::InvalidPayload);
            }
        };

        let mime = FormatDetector::detect_mime(&bytes);
        debug!(line = line.index, shape = ?shape, %mime, size = bytes.len(), "Envelope decoded");

        PlayableLine {
            clip: AudioClip::new(mime, bytes),
            origin: ClipOrigin::Decoded { shape },
        }
    }

    fn fallback(&self, line: &DialogueLine, reason: EnvelopeFallback) -> PlayableLine {
        self.events
            .emit(CoreEvent::Dialogue(DialogueEvent::LineFallback {
                line: line.index,
                reason,
            }))
            .ok();

        PlayableLine {
            clip: silent_clip(),
            origin: ClipOrigin::Placeholder { reason },
        }
    }
}
