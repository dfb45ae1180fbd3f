mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{harness, Harness, PROJECT_ID};
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::error::CoreError;
use storyframe_core::status::{AssetStatus, VariantStatus};
use storyframe_db::models::variant::Variant;
use storyframe_pipeline::PipelineError;

fn selected_in(h: &Harness, key: &AssetKey) -> Vec<Variant> {
    h.variants
        .all()
        .into_iter()
        .filter(|v| v.key() == *key && v.is_selected)
        .collect()
}

#[tokio::test]
async fn select_approves_the_slot() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 2).await;

    let selected = h.selection.select(ids[1]).await.unwrap();
    assert_eq!(selected.status, VariantStatus::Selected);
    assert!(selected.is_selected);

    let image = h.assets.image(&key).unwrap();
    assert_eq!(image.generation_status, AssetStatus::Approved);
    assert_eq!(image.approved_image_url.as_deref(), Some(selected.image_url.as_str()));
    assert_eq!(image.approved_image_path.as_deref(), Some(selected.storage_path.as_str()));
    assert_eq!(image.selected_model.as_deref(), Some(selected.model.as_str()));
}

#[tokio::test]
async fn reselecting_moves_the_selection() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 3).await;

    h.selection.select(ids[0]).await.unwrap();
    h.selection.select(ids[2]).await.unwrap();

    let selected = selected_in(&h, &key);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, ids[2]);
    assert_eq!(h.variants.get(ids[0]).status, VariantStatus::Ready);
    assert_eq!(
        h.assets.image(&key).unwrap().approved_image_url,
        Some(h.variants.get(ids[2]).image_url)
    );
}

#[tokio::test]
async fn selecting_the_selected_variant_is_idempotent() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 1).await;

    h.selection.select(ids[0]).await.unwrap();
    h.selection.select(ids[0]).await.unwrap();

    assert_eq!(selected_in(&h, &key).len(), 1);
}

#[tokio::test]
async fn slots_are_independent() {
    let h = harness();
    let portrait = h.character("Mara");
    let full_body = AssetKey::new(
        AssetType::Character,
        portrait.asset_id,
        Some("full_body".into()),
    );
    let a = h.ready_variants(&portrait, 1).await;
    let b = h.ready_variants(&full_body, 1).await;

    h.selection.select(a[0]).await.unwrap();
    h.selection.select(b[0]).await.unwrap();

    assert!(h.variants.get(a[0]).is_selected);
    assert!(h.variants.get(b[0]).is_selected);
}

#[tokio::test]
async fn non_ready_variants_cannot_be_selected() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 2).await;

    let mut generating = h.variants.get(ids[0]);
    generating.status = VariantStatus::Generating;
    h.variants.put(generating);
    let mut failed = h.variants.get(ids[1]);
    failed.status = VariantStatus::Failed;
    h.variants.put(failed);

    for id in &ids {
        let err = h.selection.select(*id).await.unwrap_err();
        assert_matches!(err, PipelineError::Core(CoreError::Validation(_)));
    }
    assert!(selected_in(&h, &key).is_empty());
    assert_ne!(h.assets.status(&key), Some(AssetStatus::Approved));
}

#[tokio::test]
async fn selecting_a_missing_variant_is_not_found() {
    let h = harness();
    let err = h.selection.select(404).await.unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selects_leave_one_selection() {
    for _ in 0..20 {
        let h = harness();
        let key = h.character("Mara");
        let ids = h.ready_variants(&key, 4).await;

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let selection = Arc::clone(&h.selection);
                let id = *id;
                tokio::spawn(async move { selection.select(id).await })
            })
            .collect();
        for handle in handles {
            // A select may lose the race; it must never corrupt the slot.
            let _ = handle.await.unwrap();
        }

        let selected = selected_in(&h, &key);
        assert_eq!(selected.len(), 1);
        assert_eq!(
            h.assets.image(&key).unwrap().approved_image_url,
            Some(selected[0].image_url.clone())
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn superseded_select_mirrors_the_later_selection() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 2).await;

    // Hold the first select between its write and its repair pass.
    let gate = h.variants.pause_next_list_selected();
    let first = {
        let selection = Arc::clone(&h.selection);
        let id = ids[0];
        tokio::spawn(async move { selection.select(id).await })
    };
    gate.reached.notified().await;

    let second = h.selection.select(ids[1]).await.unwrap();
    assert_eq!(second.id, ids[1]);

    gate.release.notify_one();
    let err = first.await.unwrap().unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::Conflict(_)));

    let selected = selected_in(&h, &key);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, ids[1]);
    let image = h.assets.image(&key).unwrap();
    assert_eq!(image.approved_image_url, Some(selected[0].image_url.clone()));
    assert_eq!(image.selected_model, Some(selected[0].model.clone()));
    assert_eq!(image.generation_status, AssetStatus::Approved);
}

#[tokio::test]
async fn repair_keeps_the_most_recent_selection() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 3).await;

    // Simulate a committed duplicate selection.
    for id in &ids[..2] {
        let mut v = h.variants.get(*id);
        v.is_selected = true;
        v.status = VariantStatus::Selected;
        h.variants.put(v);
    }

    let repair = h
        .selection
        .resolve_duplicate_selections(&key)
        .await
        .unwrap();

    assert_eq!(repair.winner, Some(ids[1]));
    assert_eq!(repair.reverted, vec![ids[0]]);
    assert_eq!(h.variants.get(ids[0]).status, VariantStatus::Ready);
    assert_eq!(
        h.assets.image(&key).unwrap().approved_image_url,
        Some(h.variants.get(ids[1]).image_url)
    );

    let again = h
        .selection
        .resolve_duplicate_selections(&key)
        .await
        .unwrap();
    assert!(again.reverted.is_empty());
}

#[tokio::test]
async fn unselect_clears_the_approval() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 1).await;
    h.selection.select(ids[0]).await.unwrap();

    let reverted = h.selection.unselect(ids[0]).await.unwrap();
    assert_eq!(reverted.status, VariantStatus::Ready);
    assert!(!reverted.is_selected);

    let image = h.assets.image(&key).unwrap();
    assert_eq!(image.approved_image_url, None);
    assert_eq!(image.generation_status, AssetStatus::Pending);

    let err = h.selection.unselect(ids[0]).await.unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::Validation(_)));
}

#[tokio::test]
async fn selected_variant_cannot_be_deleted_without_force() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 1).await;
    h.selection.select(ids[0]).await.unwrap();

    let err = h.selection.delete(ids[0], false).await.unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::Conflict(_)));
    assert!(h.variants.get(ids[0]).is_selected);
    assert_eq!(h.assets.status(&key), Some(AssetStatus::Approved));
}

#[tokio::test]
async fn force_delete_resets_the_slot_and_removes_the_blob() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 1).await;
    let variant = h.selection.select(ids[0]).await.unwrap();

    h.selection.delete(ids[0], true).await.unwrap();

    assert!(h.variants.all().is_empty());
    let image = h.assets.image(&key).unwrap();
    assert_eq!(image.approved_image_url, None);
    assert_eq!(image.generation_status, AssetStatus::Pending);
    assert!(!h.blobs.contains(key.asset_type.bucket(), &variant.storage_path));
}

#[tokio::test]
async fn deleting_an_unselected_variant_keeps_the_approval() {
    let h = harness();
    let key = h.character("Mara");
    let ids = h.ready_variants(&key, 2).await;
    h.selection.select(ids[0]).await.unwrap();

    h.selection.delete(ids[1], false).await.unwrap();

    assert_eq!(h.variants.all().len(), 1);
    assert_eq!(h.assets.status(&key), Some(AssetStatus::Approved));
}

#[tokio::test]
async fn bulk_approve_picks_the_first_ready_variant_per_slot() {
    let h = harness();
    let mara = h.character("Mara");
    let tomas = h.character("Tomas");
    let harbour = h.assets.add(PROJECT_ID, AssetType::Location, "Harbour");
    let harbour = AssetKey::whole(AssetType::Location, harbour.id);

    let mara_ids = h.ready_variants(&mara, 3).await;
    let tomas_ids = h.ready_variants(&tomas, 2).await;
    h.selection.select(tomas_ids[1]).await.unwrap();
    // Harbour has only a failed variant.
    let harbour_ids = h.ready_variants(&harbour, 1).await;
    let mut failed = h.variants.get(harbour_ids[0]);
    failed.status = VariantStatus::Failed;
    h.variants.put(failed);

    let report = h.selection.bulk_approve(PROJECT_ID).await.unwrap();

    assert_eq!(report.approved, vec![mara_ids[0]]);
    assert_eq!(report.already_selected, 1);
    assert_eq!(report.without_candidate, 1);
    assert!(h.variants.get(tomas_ids[1]).is_selected);
    assert_eq!(h.assets.status(&mara), Some(AssetStatus::Approved));
}
