use soundmark::{find_duplicates, query, Config, Index, Pipeline};

fn tone(freq: f32, sr: u32, seconds: f32) -> Vec<f32> {
    let n = (sr as f32 * seconds) as usize;
    (0..n)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
        .collect()
}

fn small_cfg() -> Config {
    let mut c = Config::default();
    c.sr = 8_000;
    c.win = 512;
    c.hop = 128;
    c.zone = 8;
    c.fan = 3;
    c.pairs = 3;
    c
}

#[test]
fn build_then_query_finds_the_source_track() {
    let cfg = small_cfg();
    let dir = tempfile::tempdir().unwrap();
    let mut index = Index::open(&dir.path().join("index.json"), &cfg).unwrap();

    let track_a = tone(440.0, cfg.sr, 4.0);
    let track_b = tone(523.25, cfg.sr, 4.0);

    for (name, samples) in [("a.wav", &track_a), ("b.wav", &track_b)] {
        let mut pipeline = Pipeline::new(&cfg);
        let id = index.begin_track(name).unwrap();
        index.append(id, pipeline.fingerprint_vec(samples));
    }
    index.checkpoint().unwrap();

    let clip = &track_a[(cfg.sr as f32 * 1.5) as usize..(cfg.sr as f32 * 2.5) as usize];
    let mut query_pipeline = Pipeline::new(&cfg);
    let results = query(&index, &mut query_pipeline, clip, &cfg, 3);

    assert!(!results.is_empty());
    assert_eq!(results[0].track_name, "a.wav");
}

#[test]
fn duplicate_pass_reports_a_canonical_symmetric_pair() {
    let mut cfg = small_cfg();
    cfg.min_matches = 3;
    cfg.min_ratio = 0.3;

    let dir = tempfile::tempdir().unwrap();
    let mut index = Index::open(&dir.path().join("index.json"), &cfg).unwrap();

    let base = tone(440.0, cfg.sr, 5.0);
    let shifted_start = (cfg.sr as f32 * 0.5) as usize;

    let id_a = index.begin_track("original.wav").unwrap();
    let mut pipeline_a = Pipeline::new(&cfg);
    index.append(id_a, pipeline_a.fingerprint_vec(&base));

    let id_b = index.begin_track("clip.wav").unwrap();
    let mut pipeline_b = Pipeline::new(&cfg);
    index.append(id_b, pipeline_b.fingerprint_vec(&base[shifted_start..]));

    let pairs = find_duplicates(&index, &cfg);
    assert_eq!(pairs.len(), 1);

    let pair = &pairs[0];
    assert_eq!(pair.track_a, id_a.min(id_b));
    assert_eq!(pair.track_b, id_a.max(id_b));
    assert!(pair.best_count >= cfg.min_matches);
}

#[test]
fn resuming_a_build_preserves_earlier_tracks() {
    let cfg = small_cfg();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.json");

    {
        let mut index = Index::open(&path, &cfg).unwrap();
        let mut pipeline = Pipeline::new(&cfg);
        let id = index.begin_track("first.wav").unwrap();
        index.append(id, pipeline.fingerprint_vec(&tone(300.0, cfg.sr, 2.0)));
        index.checkpoint().unwrap();
    }

    let mut index = Index::open(&path, &cfg).unwrap();
    assert!(index.was_resumed());
    assert_eq!(index.track_count(), 1);
    assert!(index.has_track("first.wav"));

    let mut pipeline = Pipeline::new(&cfg);
    let id = index.begin_track("second.wav").unwrap();
    index.append(id, pipeline.fingerprint_vec(&tone(900.0, cfg.sr, 2.0)));
    index.checkpoint().unwrap();

    let reopened = Index::open(&path, &cfg).unwrap();
    assert_eq!(reopened.track_count(), 2);
    assert!(reopened.has_track("first.wav"));
    assert!(reopened.has_track("second.wav"));
}

#[test]
fn raising_min_matches_never_adds_a_duplicate_pair() {
    let cfg = small_cfg();
    let dir = tempfile::tempdir().unwrap();
    let mut index = Index::open(&dir.path().join("index.json"), &cfg).unwrap();

    let base = tone(440.0, cfg.sr, 5.0);
    let id_a = index.begin_track("a.wav").unwrap();
    let mut pipeline_a = Pipeline::new(&cfg);
    index.append(id_a, pipeline_a.fingerprint_vec(&base));
    let id_b = index.begin_track("b.wav").unwrap();
    let mut pipeline_b = Pipeline::new(&cfg);
    let shift = (cfg.sr as f32 * 0.3) as usize;
    index.append(id_b, pipeline_b.fingerprint_vec(&base[shift..]));

    let mut loose = cfg.clone();
    loose.min_matches = 1;
    let mut strict = cfg;
    strict.min_matches = 10_000;

    let loose_pairs = find_duplicates(&index, &loose);
    let strict_pairs = find_duplicates(&index, &strict);
    assert!(strict_pairs.len() <= loose_pairs.len());
}
