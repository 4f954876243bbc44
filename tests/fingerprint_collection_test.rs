/// 指纹采集与训练集管理测试
///
/// 覆盖采集状态机、固化校验、导入导出以及按范围删除

#[cfg(test)]
mod tests {
    use blufinger::{Fingerprint, Localization, LocalizationConfig, LocalizationError, ObservationVector};
    use tokio_test::{assert_err, assert_ok};

    const T0: i64 = 1_700_000_000_000;
    const T1: i64 = T0 + 1_000;

    /// 按标准流程采集 sphere1/room1
    fn collect_room1(engine: &Localization) {
        assert!(engine.start_fingerprint());
        assert_ok!(engine.feed_measurement(-60, "A", Some(T0), None));
        assert_ok!(engine.feed_measurement(-65, "B", Some(T0), None));
        assert_eq!(engine.create_fingerprint_sample(None).unwrap(), 2);
        assert_ok!(engine.feed_measurement(-58, "A", Some(T1), None));
        assert_eq!(engine.create_fingerprint_sample(None).unwrap(), 1);
        assert_ok!(engine.finalize_fingerprint("sphere1", "room1", None));
    }

    fn single_point(pairs: Vec<(&str, f64)>) -> Fingerprint {
        let mut fp = Fingerprint::new();
        fp.add_observation(&ObservationVector::from_pairs(pairs)).unwrap();
        fp
    }

    #[tokio::test]
    async fn test_collect_and_finalize_scenario() {
        let engine = Localization::with_defaults().unwrap();
        collect_room1(&engine);

        assert!(!engine.is_collecting());
        let fp = engine.get_fingerprint("sphere1", "room1").unwrap();
        assert!(fp.is_finalized());
        assert_eq!(fp.sample_count(), 2);
        assert!((fp.mean("A").unwrap() - (-59.0)).abs() < 1e-6);
        assert_eq!(fp.mean("B"), Some(-65.0));
        assert_eq!(fp.beacon("A").unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_double_start_keeps_original_session() {
        let engine = Localization::with_defaults().unwrap();
        assert!(engine.start_fingerprint());
        assert_ok!(engine.feed_measurement(-60, "A", Some(T0), None));
        assert!(!engine.start_fingerprint());
        assert!(engine.is_collecting());

        // 原会话的测量仍然有效
        assert_eq!(engine.create_fingerprint_sample(None).unwrap(), 1);
        assert_ok!(engine.finalize_fingerprint("sphere1", "room1", None));
        assert_eq!(engine.get_fingerprint("sphere1", "room1").unwrap().mean("A"), Some(-60.0));
    }

    #[tokio::test]
    async fn test_operations_without_session_are_invalid_state() {
        let engine = Localization::with_defaults().unwrap();

        let err = engine.feed_measurement(-60, "A", None, None).unwrap_err();
        assert!(err.is_invalid_state());
        assert!(engine.create_fingerprint_sample(None).unwrap_err().is_invalid_state());
        assert!(engine.finalize_fingerprint("s", "l", None).unwrap_err().is_invalid_state());

        // 不会隐式开启会话
        assert!(!engine.is_collecting());
        assert!(!engine.abort_fingerprint());
    }

    #[tokio::test]
    async fn test_abort_discards_session() {
        let engine = Localization::with_defaults().unwrap();
        assert!(engine.start_fingerprint());
        assert_ok!(engine.feed_measurement(-60, "A", Some(T0), None));
        assert_ok!(engine.create_fingerprint_sample(None));
        assert!(engine.abort_fingerprint());
        assert!(!engine.is_collecting());

        assert!(engine.finalize_fingerprint("sphere1", "room1", None).is_err());
        assert!(engine.get_fingerprint("sphere1", "room1").is_none());

        // 放弃后可以重新开始
        assert!(engine.start_fingerprint());
    }

    #[tokio::test]
    async fn test_validation_failure_keeps_collecting() {
        let config = LocalizationConfig {
            min_fingerprint_samples: 2,
            ..Default::default()
        };
        let engine = Localization::new(config).unwrap();
        assert!(engine.start_fingerprint());
        assert_ok!(engine.feed_measurement(-60, "A", Some(T0), None));
        assert_ok!(engine.create_fingerprint_sample(None));

        let err = engine.finalize_fingerprint("sphere1", "room1", None).unwrap_err();
        assert!(err.is_validation_failure());
        assert!(engine.is_collecting());
        assert!(engine.get_fingerprint("sphere1", "room1").is_none());

        assert_ok!(engine.feed_measurement(-62, "A", Some(T1), None));
        assert_ok!(engine.create_fingerprint_sample(None));
        assert_ok!(engine.finalize_fingerprint("sphere1", "room1", None));
        assert!(!engine.is_collecting());
    }

    #[tokio::test]
    async fn test_min_samples_per_beacon_prunes_stray_detection() {
        let config = LocalizationConfig {
            min_samples_per_beacon: 2,
            ..Default::default()
        };
        let engine = Localization::new(config).unwrap();
        collect_room1(&engine);

        // B 只出现在一个采样点中
        let fp = engine.get_fingerprint("sphere1", "room1").unwrap();
        assert!(fp.beacon("A").is_some());
        assert!(fp.beacon("B").is_none());
    }

    #[tokio::test]
    async fn test_explicit_fingerprint_target() {
        let engine = Localization::with_defaults().unwrap();
        let mut fp = Fingerprint::new();

        assert_ok!(engine.feed_measurement(-70, "C", Some(T0), Some(&mut fp)));
        assert_eq!(engine.create_fingerprint_sample(Some(&mut fp)).unwrap(), 1);
        assert!(!engine.is_collecting());

        assert_ok!(engine.finalize_fingerprint("sphere2", "hall", Some(&fp)));
        assert_eq!(engine.get_fingerprint("sphere2", "hall").unwrap().mean("C"), Some(-70.0));
    }

    #[tokio::test]
    async fn test_invalid_measurements_rejected() {
        let config = LocalizationConfig {
            beacon_filter: Some("^20:A7:16".to_string()),
            ..Default::default()
        };
        let engine = Localization::new(config).unwrap();
        engine.start_fingerprint();

        assert!(matches!(
            engine.feed_measurement(0, "20:A7:16:5E:C5:D6", Some(T0), None),
            Err(LocalizationError::InvalidMeasurement { rssi: 0, .. })
        ));
        assert!(matches!(
            engine.feed_measurement(-60, "AA:BB:CC:DD:EE:FF", Some(T0), None),
            Err(LocalizationError::BeaconFiltered { .. })
        ));
        assert_ok!(engine.feed_measurement(-60, "20:A7:16:5E:C5:D6", Some(T0), None));
    }

    #[tokio::test]
    async fn test_import_get_round_trip() {
        let engine = Localization::with_defaults().unwrap();
        let mut fp = single_point(vec![("A", -60.0), ("B", -72.0)]);
        fp.add_observation(&ObservationVector::from_pairs(vec![("A", -64.0)])).unwrap();
        fp.finalize(1, 1).unwrap();

        assert_ok!(engine.import_fingerprint("sphere1", "room1", fp.clone()));
        let exported = engine.get_fingerprint("sphere1", "room1").unwrap();
        assert_eq!(exported, fp);

        // 经过字符串持久化后导入到另一个键
        let encoded = exported.to_json().unwrap();
        let restored: Fingerprint = encoded.parse().unwrap();
        assert_ok!(engine.import_fingerprint("sphere9", "copy", restored));
        let copy = engine.get_fingerprint("sphere9", "copy").unwrap();
        assert!((copy.mean("A").unwrap() - (-62.0)).abs() < 1e-9);
        assert!((copy.beacon("A").unwrap().variance() - 8.0).abs() < 1e-9);
        assert_eq!(copy.mean("B"), Some(-72.0));
    }

    #[tokio::test]
    async fn test_import_unfinalized_is_validated() {
        let engine = Localization::with_defaults().unwrap();
        assert_err!(engine.import_fingerprint("sphere1", "empty", Fingerprint::new()));
        assert!(engine.get_fingerprint("sphere1", "empty").is_none());

        assert_ok!(engine.import_fingerprint("sphere1", "room1", single_point(vec![("A", -60.0)])));
        assert!(engine.get_fingerprint("sphere1", "room1").unwrap().is_finalized());
    }

    #[tokio::test]
    async fn test_get_returns_independent_copy() {
        let engine = Localization::with_defaults().unwrap();
        collect_room1(&engine);

        let mut copy = engine.get_fingerprint("sphere1", "room1").unwrap();
        // 副本已固化，无法修改
        assert!(copy.add_observation(&ObservationVector::from_pairs(vec![("A", -90.0)])).is_err());
        assert!((engine.get_fingerprint("sphere1", "room1").unwrap().mean("A").unwrap() - (-59.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_refinalize_replaces_entry() {
        let engine = Localization::with_defaults().unwrap();
        collect_room1(&engine);

        assert_ok!(engine.import_fingerprint("sphere1", "room1", single_point(vec![("Z", -40.0)])));
        let fp = engine.get_fingerprint("sphere1", "room1").unwrap();
        assert!(fp.beacon("A").is_none());
        assert_eq!(fp.mean("Z"), Some(-40.0));
        assert_eq!(engine.locations("sphere1"), vec!["room1".to_string()]);
    }

    #[tokio::test]
    async fn test_identical_observation_beats_missing_beacons() {
        let engine = Localization::with_defaults().unwrap();
        collect_room1(&engine);

        let identical = engine
            .classify("sphere1", &ObservationVector::from_pairs(vec![("A", -59.0), ("B", -65.0)]))
            .unwrap();
        let all_missing = engine
            .classify("sphere1", &ObservationVector::from_pairs(vec![("Z", -59.0)]))
            .unwrap();
        assert!(identical.confidence > all_missing.confidence);
        assert!(engine.classify("sphere1", &ObservationVector::new()).is_none());
    }

    #[tokio::test]
    async fn test_remove_scopes() {
        let engine = Localization::with_defaults().unwrap();
        let obs = ObservationVector::from_pairs(vec![("A", -60.0)]);
        for (sphere, location) in [("s1", "r1"), ("s1", "r2"), ("s2", "r1")] {
            assert_ok!(engine.import_fingerprint(sphere, location, single_point(vec![("A", -60.0)])));
        }

        // 不存在的键静默忽略
        engine.remove_fingerprint("s1", "missing");
        engine.remove_fingerprint("nowhere", "r1");
        assert_eq!(engine.locations("s1").len(), 2);

        engine.remove_fingerprint("s1", "r2");
        assert!(engine.get_fingerprint("s1", "r2").is_none());
        assert_eq!(engine.classify("s1", &obs).unwrap().location_id, "r1");

        engine.remove_fingerprints("s1");
        assert!(engine.get_fingerprint("s1", "r1").is_none());
        assert!(engine.classify("s1", &obs).is_none());
        assert!(engine.get_fingerprint("s2", "r1").is_some());
        assert!(engine.classify("s2", &obs).is_some());
        assert_eq!(engine.spheres(), vec!["s2".to_string()]);

        engine.clear();
        assert!(engine.spheres().is_empty());
        assert!(engine.classify("s2", &obs).is_none());
    }

    #[test]
    fn test_engine_requires_runtime() {
        assert!(matches!(
            Localization::with_defaults(),
            Err(LocalizationError::NoRuntime)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LocalizationConfig {
            window_horizon_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            Localization::new(config),
            Err(LocalizationError::Config { field: "window_horizon_ms", .. })
        ));
    }

    #[tokio::test]
    async fn test_import_revalidates_finalized_fingerprint() {
        let config = LocalizationConfig {
            min_samples_per_beacon: 3,
            ..Default::default()
        };
        let engine = Localization::new(config).unwrap();

        // 以更宽松的阈值固化过的指纹
        let mut sparse = single_point(vec![("A", -60.0)]);
        sparse.finalize(1, 1).unwrap();
        assert!(engine.import_fingerprint("sphere1", "room1", sparse).unwrap_err().is_validation_failure());
        assert!(engine.get_fingerprint("sphere1", "room1").is_none());

        let mut fp = single_point(vec![("A", -60.0), ("B", -70.0)]);
        fp.add_observation(&ObservationVector::from_pairs(vec![("A", -61.0)])).unwrap();
        fp.add_observation(&ObservationVector::from_pairs(vec![("A", -62.0)])).unwrap();
        fp.finalize(1, 1).unwrap();
        assert_ok!(engine.import_fingerprint("sphere1", "room1", fp));

        let stored = engine.get_fingerprint("sphere1", "room1").unwrap();
        assert_eq!(stored.beacon("A").unwrap().count(), 3);
        assert!(stored.beacon("B").is_none());
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_statistics() {
        let engine = Localization::with_defaults().unwrap();
        assert_ok!(engine.import_fingerprint("sphere1", "good", single_point(vec![("A", -70.0)])));

        let encoded = r#"{"state":"finalized","sample_count":2,"beacons":{"A":{"mean":-90.0,"m2":-4.0,"count":2}}}"#;
        assert!(Fingerprint::from_json(encoded).unwrap_err().is_validation_failure());

        // 不经过 from_json 的解码结果在导入时被拦下
        let malformed: Fingerprint = serde_json::from_str(encoded).unwrap();
        let err = engine.import_fingerprint("sphere1", "bad", malformed).unwrap_err();
        assert!(err.is_validation_failure());
        assert!(engine.get_fingerprint("sphere1", "bad").is_none());

        let result = engine
            .classify("sphere1", &ObservationVector::from_pairs(vec![("A", -90.0)]))
            .unwrap();
        assert_eq!(result.location_id, "good");
        assert!(result.confidence < 1.0);
    }

    #[tokio::test]
    async fn test_explicit_fingerprint_uses_engine_windows() {
        let config = LocalizationConfig {
            window_horizon_ms: 1_000,
            ..Default::default()
        };
        let engine = Localization::new(config).unwrap();

        for mut fp in [Fingerprint::new(), engine.new_fingerprint()] {
            assert_ok!(engine.feed_measurement(-60, "A", Some(0), Some(&mut fp)));
            assert_ok!(engine.feed_measurement(-70, "B", Some(5_000), Some(&mut fp)));
            // A 已超出 1 秒窗口
            assert_eq!(engine.create_fingerprint_sample(Some(&mut fp)).unwrap(), 1);
            assert!(fp.beacon("A").is_none());
            assert_eq!(fp.mean("B"), Some(-70.0));
        }

        // 会话指纹行为一致
        assert!(engine.start_fingerprint());
        assert_ok!(engine.feed_measurement(-60, "A", Some(0), None));
        assert_ok!(engine.feed_measurement(-70, "B", Some(5_000), None));
        assert_eq!(engine.create_fingerprint_sample(None).unwrap(), 1);
    }
}
