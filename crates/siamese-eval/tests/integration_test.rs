use std::path::PathBuf;

use siamese_eval::{IndexedDataset, Params, SiameseEval};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load() -> (IndexedDataset, IndexedDataset) {
    let gt = IndexedDataset::new(&fixtures_dir().join("gt.json")).expect("Failed to load GT");
    let dt = gt
        .load_res(&fixtures_dir().join("dt.json"))
        .expect("Failed to load DT");
    (gt, dt)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn test_load_gt() {
    let (gt, dt) = load();
    assert_eq!(gt.dataset.images.len(), 2);
    assert_eq!(gt.dataset.annotations.len(), 5);
    assert_eq!(gt.dataset.categories.len(), 2);
    assert_eq!(dt.dataset.annotations.len(), 5);
    for ann in &dt.dataset.annotations {
        assert!(ann.score.is_some());
        assert!(ann.id > 0);
    }
}

#[test]
fn test_rle_masks_decode() {
    let (gt, dt) = load();
    let gt_mask = gt.ann_to_mask(gt.get_ann(4).unwrap()).unwrap();
    assert_eq!(gt_mask.area(), 100);
    assert!(gt_mask.get(5, 5) && gt_mask.get(14, 14) && !gt_mask.get(15, 15));

    let dt_mask = dt.ann_to_mask(dt.get_ann(4).unwrap()).unwrap();
    assert_eq!(dt_mask.area(), 80);
    assert!(dt_mask.get(14, 12) && !dt_mask.get(14, 13));
}

#[test]
fn test_units_and_matches() {
    let (gt, dt) = load();
    let mut e = SiameseEval::new(gt, dt, Params::default());
    e.evaluate().unwrap();

    let keys: Vec<(u64, u64)> = e.units.iter().map(|u| (u.category_id, u.image_id)).collect();
    // the crowd-only (image 2, dog) pair is not a unit
    assert_eq!(keys, vec![(1, 1), (1, 2), (2, 1)]);

    let u = &e.units[0];
    assert_eq!(u.gt_ids, vec![1, 2]);
    assert_eq!(u.dt_ids, vec![1, 2]);
    assert_eq!(u.matches, vec![Some(0), Some(1)]);
    assert!(close(u.detection_scores[0], 1.0));
    assert!(close(u.detection_scores[1], 0.64));
    let seg = u.segmentation_scores.as_ref().unwrap();
    assert!(close(seg[0], 1.0));
    assert!(close(seg[1], 0.64));

    let u = &e.units[1];
    assert!(close(u.detection_scores[0], 1.0));
    // box matches exactly, the predicted mask misses two columns
    assert!(close(u.segmentation_scores.as_ref().unwrap()[0], 0.8));

    let u = &e.units[2];
    assert_eq!(u.matches, vec![None]);
    assert_eq!(u.detection_scores, vec![0.0]);
    assert_eq!(u.segmentation_scores, Some(vec![0.0]));
}

#[test]
fn test_accumulate_stats() {
    let (gt, dt) = load();
    let mut e = SiameseEval::new(gt, dt, Params::default());
    e.evaluate().unwrap();
    e.accumulate();

    let s = e.summary.as_ref().expect("Accumulate should set summary");
    assert_eq!(s.num_instances, 4);
    assert_eq!(s.num_detected, 3);
    assert_eq!(s.categories.len(), 2);
    assert!(close(s.categories[0].mean_detection_iou, 0.88));
    assert!(close(s.categories[1].mean_detection_iou, 0.0));

    let stats = e.stats.as_ref().unwrap();
    assert_eq!(stats.len(), 5);
    assert!(close(stats[0], 0.66));
    assert!(close(stats[1], 0.75));
    assert!(close(stats[2], 0.61));
    assert!(close(stats[3], 0.44));
    assert!(close(stats[4], (2.44 / 3.0) / 2.0));

    e.summarize();
}

#[test]
fn test_filters_and_threshold() {
    let (gt, dt) = load();
    let params = Params {
        img_ids: vec![1],
        cat_ids: vec![1],
        iou_threshold: 0.7,
        ..Params::default()
    };
    let mut e = SiameseEval::new(gt, dt, params);
    e.evaluate().unwrap();
    assert_eq!(e.units.len(), 1);
    // 0.64 no longer passes
    assert_eq!(e.units[0].matches, vec![Some(0), None]);
    let seg = e.units[0].segmentation_scores.as_ref().unwrap();
    assert!(close(seg[0], 1.0));
    assert_eq!(seg[1], 0.0);
}
