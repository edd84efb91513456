//! # Dialogue Manifests
//!
//! Types and loading for the per-slide dialogue script: an ordered list of
//! narrated lines, each pointing at a JSON-wrapped audio payload.
//!
//! The wire format is the authoring pipeline's output:
//!
//! ```json
//! {
//!   "title": "Opening",
//!   "audioFiles": [
//!     { "index": 0, "speaker": "Dev A", "text": "Hi", "filename": "l0.json", "path": "/d/l0.json" }
//!   ]
//! }
//! ```
//!
//! Absence is not an error: a 404, a transport failure, or an empty
//! `audioFiles` list all mean "this slide has no dialogue". Only a document
//! that is present but structurally wrong (no `audioFiles` key, broken
//! records, inconsistent indices) is malformed; that is an authoring bug
//! and is classified separately.

use crate::error::{DialogueError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use core_runtime::config::DialogueConfig;
use core_runtime::events::{CoreEvent, DialogueEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Manifest Types
// ============================================================================

/// One narrated utterance. Immutable once the manifest is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    /// Position in the manifest; must match the array position.
    pub index: usize,
    /// Free-form speaker identifier (e.g. "Dev A").
    pub speaker: String,
    /// Transcript, shown in the UI and used as fallback.
    pub text: String,
    /// Envelope file name, kept for diagnostics.
    pub filename: String,
    /// Locator for the JSON-wrapped audio payload (not a direct audio file).
    #[serde(rename = "path")]
    pub audio_path: String,
}

/// One slide's full narrated script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueManifest {
    /// Manifest title.
    pub title: String,
    /// Lines in playback order; the line `index` equals its position here.
    pub lines: Vec<DialogueLine>,
}

impl DialogueManifest {
    /// Whether the slide has anything to narrate.
    pub fn has_dialogue(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Outcome of a manifest fetch that did not fail hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestFetch {
    /// A manifest with at least one line.
    Loaded(DialogueManifest),
    /// The slide has no dialogue (absent file, transport failure, or an
    /// empty line list). Not an error.
    NotAvailable,
}

/// Raw manifest document as served. `audioFiles` is optional so that a
/// present-but-missing key can be told apart from an empty list.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "audioFiles")]
    audio_files: Option<Vec<DialogueLine>>,
}

// ============================================================================
// Loader
// ============================================================================

/// Fetches and validates per-slide dialogue manifests.
///
/// Stateless and idempotent, safe to call repeatedly for the same slide.
/// Caching is a policy decision left to the caller.
pub struct ManifestLoader {
    http: Arc<dyn HttpClient>,
    config: DialogueConfig,
    events: EventBus,
}

impl ManifestLoader {
    pub fn new(http: Arc<dyn HttpClient>, config: DialogueConfig, events: EventBus) -> Self {
        Self {
            http,
            config,
            events,
        }
    }

    /// The deterministic manifest location for a slide.
    pub fn manifest_url(&self, slide: usize) -> String {
        format!(
            "{}/slide{:02}/metadata.json",
            self.config.manifest_base.trim_end_matches('/'),
            slide
        )
    }

    /// Fetch the manifest for a slide.
    ///
    /// Returns `Ok(NotAvailable)` for every shade of "no dialogue here";
    /// `Err(ManifestMalformed)` only when the document exists but is
    /// structurally invalid.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::ManifestMalformed`] when the fetched JSON
    /// lacks the `audioFiles` key, a record is missing required fields, or
    /// a line's declared index contradicts its position.
    pub async fn load(&self, slide: usize) -> Result<ManifestFetch> {
        let url = self.manifest_url(slide);
        self.emit(DialogueEvent::ManifestLoading { slide });

        let request = HttpRequest::get(&url).timeout(self.config.fetch_timeout);
        let fetch = tokio::time::timeout(
            self.config.fetch_timeout,
            self.http.execute_with_retry(request, RetryPolicy::none()),
        )
        .await;

        let response = match fetch {
            Err(_elapsed) => {
                info!(slide, url = %url, "Manifest fetch timed out");
                return self.unavailable(slide);
            }
            Ok(Err(e)) => {
                info!(slide, url = %url, error = %e, "Manifest fetch failed");
                return self.unavailable(slide);
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            info!(slide, status = response.status, "Manifest not served");
            return self.unavailable(slide);
        }

        let document: ManifestDocument = match serde_json::from_slice(&response.body) {
            Ok(document) => document,
            Err(e) => return self.malformed(slide, format!("invalid document: {}", e)),
        };

        let Some(lines) = document.audio_files else {
            return self.malformed(slide, "audioFiles key missing".to_string());
        };

        if lines.is_empty() {
            debug!(slide, "Manifest present but empty");
            return self.unavailable(slide);
        }

        for (position, line) in lines.iter().enumerate() {
            if line.index != position {
                return self.malformed(
                    slide,
                    format!(
                        "line at position {} declares index {}",
                        position, line.index
                    ),
                );
            }
            if line.audio_path.is_empty() {
                return self.malformed(slide, format!("line {} has an empty path", position));
            }
        }

        let manifest = DialogueManifest {
            title: document.title.unwrap_or_default(),
            lines,
        };

        info!(
            slide,
            title = %manifest.title,
            line_count = manifest.len(),
            "Manifest loaded"
        );
        self.emit(DialogueEvent::ManifestLoaded {
            slide,
            title: manifest.title.clone(),
            line_count: manifest.len(),
        });

        Ok(ManifestFetch::Loaded(manifest))
    }

    fn unavailable(&self, slide: usize) -> Result<ManifestFetch> {
        self.emit(DialogueEvent::ManifestUnavailable { slide });
        Ok(ManifestFetch::NotAvailable)
    }

    fn malformed(&self, slide: usize, detail: String) -> Result<ManifestFetch> {
        warn!(slide, detail = %detail, "Manifest malformed");
        self.emit(DialogueEvent::ManifestMalformed {
            slide,
            detail: detail.clone(),
        });
        Err(DialogueError::ManifestMalformed { slide, detail })
    }

    fn emit(&self, event: DialogueEvent) {
        self.events.emit(CoreEvent::Dialogue(event)).ok();
    }
}
