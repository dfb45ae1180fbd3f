mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{harness, harness_with, models, test_config, Harness};
use storyframe_core::asset::AssetKey;
use storyframe_core::error::CoreError;
use storyframe_core::prompt::FixedPrompt;
use storyframe_core::status::{AssetStatus, VariantStatus};
use storyframe_core::stuck::{is_stuck_error, StuckThresholds};
use storyframe_core::types::DbId;
use storyframe_pipeline::fanout::FanOutOptions;
use storyframe_pipeline::PipelineError;

/// Create generating variants for `names`; unscripted models never resolve.
async fn generating(h: &Harness, key: &AssetKey, names: &[&str]) -> Vec<DbId> {
    h.fanout
        .generate_variants(
            key,
            &models(names),
            &FixedPrompt("a knight".into()),
            &Default::default(),
            FanOutOptions::default(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn sweep_fails_only_variants_past_the_threshold() {
    let h = harness();
    let key = h.character("Mara");
    let ids = generating(&h, &key, &["old", "young"]).await;
    h.variants.backdate(ids[0], 6);
    h.variants.backdate(ids[1], 4);

    let reset = h.recovery.sweep_stuck(None, None).await.unwrap();
    assert_eq!(reset, 1);

    let old = h.variants.get(ids[0]);
    assert_eq!(old.status, VariantStatus::Failed);
    assert!(is_stuck_error(old.error_message.as_deref().unwrap()));
    assert_eq!(h.variants.get(ids[1]).status, VariantStatus::Generating);
}

#[tokio::test]
async fn sweep_ignores_resolved_variants() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 1).await;
    h.variants.backdate(ids[0], 60);

    let reset = h.recovery.sweep_stuck(None, None).await.unwrap();

    assert_eq!(reset, 0);
    assert_eq!(h.variants.get(ids[0]).status, VariantStatus::Ready);
}

#[tokio::test]
async fn slow_models_get_their_own_threshold() {
    let mut config = test_config();
    config.stuck_thresholds = StuckThresholds::new(5).with_override("video-slow", 20);
    let h = harness_with(config);
    let key = h.character("Mara");
    let ids = generating(&h, &key, &["fast", "video-slow"]).await;
    h.variants.backdate(ids[0], 10);
    h.variants.backdate(ids[1], 10);

    let reset = h.recovery.sweep_stuck(None, None).await.unwrap();

    assert_eq!(reset, 1);
    assert_eq!(h.variants.get(ids[0]).status, VariantStatus::Failed);
    assert_eq!(h.variants.get(ids[1]).status, VariantStatus::Generating);

    // An explicit max age overrides every per-model threshold.
    let reset = h.recovery.sweep_stuck(None, Some(8)).await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(h.variants.get(ids[1]).status, VariantStatus::Failed);
}

#[tokio::test]
async fn scoped_sweep_leaves_other_slots_alone() {
    let h = harness();
    let mara = h.character("Mara");
    let tomas = h.character("Tomas");
    let a = generating(&h, &mara, &["m"]).await;
    let b = generating(&h, &tomas, &["m"]).await;
    h.variants.backdate(a[0], 30);
    h.variants.backdate(b[0], 30);

    let reset = h.recovery.sweep_stuck(Some(&mara), None).await.unwrap();

    assert_eq!(reset, 1);
    assert_eq!(h.variants.get(a[0]).status, VariantStatus::Failed);
    assert_eq!(h.variants.get(b[0]).status, VariantStatus::Generating);
}

#[tokio::test]
async fn slot_fails_once_every_variant_is_stuck() {
    let h = harness();
    let key = h.character("Mara");
    let ids = generating(&h, &key, &["a", "b"]).await;
    for id in &ids {
        h.variants.backdate(*id, 30);
    }

    h.recovery.sweep_stuck(None, None).await.unwrap();

    assert_eq!(h.assets.status(&key), Some(AssetStatus::Failed));
}

#[tokio::test]
async fn sweep_as_of_a_fixed_instant() {
    let h = harness();
    let key = h.character("Mara");
    let ids = generating(&h, &key, &["a"]).await;
    let now = Utc::now();

    let early = h
        .recovery
        .sweep_stuck_as_of(now + chrono::Duration::minutes(4), None, None)
        .await
        .unwrap();
    assert_eq!(early, 0);

    let late = h
        .recovery
        .sweep_stuck_as_of(now + chrono::Duration::minutes(6), None, None)
        .await
        .unwrap();
    assert_eq!(late, 1);
    assert_eq!(h.variants.get(ids[0]).status, VariantStatus::Failed);
}

#[tokio::test]
async fn invalid_max_age_is_rejected() {
    let h = harness();
    let err = h.recovery.sweep_stuck(None, Some(0)).await.unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::Validation(_)));
}
