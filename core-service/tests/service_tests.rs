//! Slide-awareness orchestration: autoplay gating, manifest caching, and
//! stale-fetch immunity.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bridge_traits::audio::ManualAudioChannel;
use bridge_traits::AudioChannel;
use bridge_traits::http::StaticHttpClient;
use core_audio::clip::silent_clip;
use core_audio::effects::{EffectLibrary, SoundEffect};
use core_dialogue::policy::NavigationReason;
use core_dialogue::sequencer::PlaybackPhase;
use core_runtime::config::CoreConfig;
use core_service::{PresentationService, ServiceChannels, ServiceDependencies, ServiceError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    client: Arc<StaticHttpClient>,
    dialogue: Arc<ManualAudioChannel>,
    effects: Arc<ManualAudioChannel>,
    service: PresentationService,
}

fn harness() -> Harness {
    let client = Arc::new(StaticHttpClient::new());
    let dialogue = Arc::new(ManualAudioChannel::new());
    let background = Arc::new(ManualAudioChannel::new());
    let effects = Arc::new(ManualAudioChannel::new());

    let deps = ServiceDependencies::new(
        client.clone(),
        ServiceChannels {
            dialogue: dialogue.clone(),
            background,
            effects: effects.clone(),
        },
        EffectLibrary::new().with_clip(SoundEffect::Pop, silent_clip()),
    );

    let service = PresentationService::new(CoreConfig::default(), deps).unwrap();

    Harness {
        client,
        dialogue,
        effects,
        service,
    }
}

fn manifest_doc() -> serde_json::Value {
    json!({
        "title": "T",
        "audioFiles": [
            {"index": 0, "speaker": "Dev A", "text": "Hi", "filename": "l0.json", "path": "/d/l0.json"}
        ]
    })
}

fn register_slide(h: &Harness, slide: usize) {
    h.client.insert_json(
        &format!("/sounds/dialogue/slide{:02}/metadata.json", slide),
        200,
        &manifest_doc(),
    );
    h.client.insert_json(
        "/d/l0.json",
        200,
        &json!({"audio": BASE64.encode(silent_clip().data)}),
    );
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn forward_navigation_autoplays() {
    let h = harness();
    register_slide(&h, 1);

    h.service
        .handle_slide_change(1, NavigationReason::Next)
        .await
        .unwrap();

    let ch = h.dialogue.clone();
    wait_for(move || ch.started_clips().len() == 1).await;
    assert!(h.service.dialogue_snapshot().has_auto_played);
}

#[tokio::test(start_paused = true)]
async fn backward_and_direct_navigation_do_not_autoplay() {
    for reason in [
        NavigationReason::Prev,
        NavigationReason::Direct,
        NavigationReason::Other,
    ] {
        let h = harness();
        register_slide(&h, 2);

        h.service.handle_slide_change(2, reason).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Armed but not playing: the manual affordance still works.
        assert!(h.dialogue.started_clips().is_empty(), "reason {:?}", reason);
        assert_eq!(h.service.dialogue_snapshot().phase, PlaybackPhase::Idle);

        h.service.play_dialogue().await.unwrap();
        let ch = h.dialogue.clone();
        wait_for(move || ch.started_clips().len() == 1).await;
    }
}

#[tokio::test(start_paused = true)]
async fn unchanged_index_is_a_no_op() {
    let h = harness();
    register_slide(&h, 3);

    h.service
        .handle_slide_change(3, NavigationReason::Next)
        .await
        .unwrap();
    let ch = h.dialogue.clone();
    wait_for(move || ch.started_clips().len() == 1).await;

    // A re-render with the same index must not restart narration.
    h.service
        .handle_slide_change(3, NavigationReason::Next)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.dialogue.started_clips().len(), 1);
    assert_eq!(h.client.requests().len(), 2); // manifest + envelope, once each
}

#[tokio::test(start_paused = true)]
async fn manifest_cache_avoids_refetch() {
    let h = harness();
    register_slide(&h, 4);
    h.client
        .insert("/sounds/dialogue/slide05/metadata.json", 404, "none");

    h.service
        .handle_slide_change(4, NavigationReason::Next)
        .await
        .unwrap();
    let ch = h.dialogue.clone();
    wait_for(move || ch.started_clips().len() == 1).await;
    h.dialogue.finish_current();

    h.service
        .handle_slide_change(5, NavigationReason::Next)
        .await
        .unwrap();

    let manifest_fetches_before = h
        .client
        .requests()
        .iter()
        .filter(|url| url.contains("slide04"))
        .count();

    // Back to slide 4: served from cache, autoplay fires again for the
    // fresh manifest load.
    h.service
        .handle_slide_change(4, NavigationReason::Next)
        .await
        .unwrap();
    let ch = h.dialogue.clone();
    wait_for(move || ch.started_clips().len() == 2).await;

    let manifest_fetches_after = h
        .client
        .requests()
        .iter()
        .filter(|url| url.contains("slide04"))
        .count();
    assert_eq!(manifest_fetches_before, manifest_fetches_after);
}

#[tokio::test(start_paused = true)]
async fn slide_without_dialogue_disarms() {
    let h = harness();
    h.client
        .insert("/sounds/dialogue/slide06/metadata.json", 404, "none");

    h.service
        .handle_slide_change(6, NavigationReason::Next)
        .await
        .unwrap();

    assert_eq!(h.service.dialogue_snapshot().phase, PlaybackPhase::Idle);
    h.service.play_dialogue().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.dialogue.started_clips().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_manifest_surfaces_as_error() {
    let h = harness();
    h.client.insert_json(
        "/sounds/dialogue/slide07/metadata.json",
        200,
        &json!({"title": "T"}),
    );

    let err = h
        .service
        .handle_slide_change(7, NavigationReason::Next)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Dialogue(_)));
}

/// A manifest fetch for slide A resolving after slide B became active must
/// not arm or play A's content.
#[tokio::test(start_paused = true)]
async fn stale_manifest_result_is_discarded() {
    let h = harness();
    register_slide(&h, 8);
    h.client
        .insert("/sounds/dialogue/slide09/metadata.json", 404, "none");

    let gate = h.client.hold("/sounds/dialogue/slide08/metadata.json");

    let pending = {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .handle_slide_change(8, NavigationReason::Next)
                .await
        })
    };
    tokio::task::yield_now().await;

    // The presenter moves on before slide 8's manifest arrives.
    h.service
        .handle_slide_change(9, NavigationReason::Next)
        .await
        .unwrap();
    assert_eq!(h.service.current_slide(), Some(9));

    gate.release();
    pending.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The late result for slide 8 changed nothing.
    assert!(h.dialogue.started_clips().is_empty());
    assert_eq!(h.service.dialogue_snapshot().phase, PlaybackPhase::Idle);
    assert_eq!(h.service.current_slide(), Some(9));
}

#[tokio::test(start_paused = true)]
async fn mute_drops_effect_triggers() {
    let h = harness();

    h.service.trigger_effect(SoundEffect::Pop);
    tokio::task::yield_now().await;
    assert_eq!(h.effects.started_clips().len(), 1);

    let muted = h.service.toggle_mute().await.unwrap();
    assert!(muted);

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.service.trigger_effect(SoundEffect::Pop);
    tokio::task::yield_now().await;
    assert_eq!(h.effects.started_clips().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_everything() {
    let h = harness();
    register_slide(&h, 10);

    h.service.init(Some(silent_clip())).await.unwrap();
    h.service
        .handle_slide_change(10, NavigationReason::Next)
        .await
        .unwrap();
    let ch = h.dialogue.clone();
    wait_for(move || ch.started_clips().len() == 1).await;

    h.service.dispose().await.unwrap();
    assert_eq!(h.service.dialogue_snapshot().phase, PlaybackPhase::Idle);
    assert!(!h.dialogue.is_active().await.unwrap());
}
