mod common;

use common::{MockBackend, expected_samples, init_logging, mock_tune, mock_tune_with_length};
use sidflow::{
    CacheConfig, Engine, EngineConfig, RenderOutcome, SidFlowError, Telemetry,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn loaded(backend: MockBackend, config: EngineConfig) -> Engine<MockBackend> {
    init_logging();
    let mut engine = Engine::new(backend, config);
    engine.load_tune(&mock_tune(3)).unwrap();
    engine
}

#[test]
fn render_five_seconds_in_fixed_batches() {
    let mut engine = loaded(MockBackend::mono(), EngineConfig::default());
    assert_eq!(engine.sample_rate(), 44_100);
    assert_eq!(engine.channels(), 1);

    let chunk = engine.render_seconds(5.0, Some(20_000)).unwrap();
    assert_eq!(chunk.frame_count(), 220_500);
    assert_eq!(chunk.start_frame(), 0);
    assert_eq!(chunk.samples(), expected_samples(1, 1, 0, 220_500).as_slice());
    assert_eq!(engine.current_frame(), 220_500);
}

#[test]
fn seek_into_rendered_audio_matches_original_bytes() {
    let mut engine = loaded(MockBackend::mono(), EngineConfig::default());
    let original = engine.render_seconds(5.0, Some(20_000)).unwrap().to_le_bytes();
    let calls = engine.backend().render_calls();

    engine.seek_seconds(2.0).unwrap();
    let replay = engine.render_seconds(0.1, None).unwrap();

    let frame_bytes = 2;
    let from = 88_200 * frame_bytes;
    let to = 92_610 * frame_bytes;
    assert_eq!(replay.to_le_bytes(), &original[from..to]);
    // Served entirely from the cache
    assert_eq!(engine.backend().render_calls(), calls);
}

#[test]
fn identical_inputs_produce_identical_bytes() {
    let render = || {
        let mut engine = loaded(MockBackend::new(44_100, 2), EngineConfig::default());
        engine.select_song(2).unwrap();
        let mut bytes = Vec::new();
        for _ in 0..10 {
            bytes.extend(engine.render_seconds(0.1, Some(7_777)).unwrap().to_le_bytes());
        }
        bytes
    };
    let a = render();
    let b = render();
    assert_eq!(a.len(), 44_100 * 4);
    assert_eq!(a, b);
}

#[test]
fn cache_hit_equals_cold_render() {
    let mut warm = loaded(MockBackend::mono(), EngineConfig::default());
    warm.render_seconds(3.0, None).unwrap();
    warm.seek_seconds(1.25).unwrap();
    let cached = warm.render_seconds(0.5, None).unwrap();

    let cold_config = EngineConfig {
        cache: CacheConfig::disabled(),
        ..EngineConfig::default()
    };
    let mut cold = loaded(MockBackend::mono(), cold_config);
    cold.seek_seconds(1.25).unwrap();
    let rendered = cold.render_seconds(0.5, None).unwrap();

    assert_eq!(cached, rendered);
}

#[test]
fn partially_cached_seek_continues_seamlessly() {
    // Small cache: only the most recent ~1 s survives a 4 s render
    let config = EngineConfig {
        cache: CacheConfig {
            budget_seconds: 1.0,
            budget_bytes: None,
        },
        checkpoint_interval_seconds: 0.5,
        ..EngineConfig::default()
    };
    let mut engine = loaded(MockBackend::mono().with_snapshots(), config);
    engine.render_seconds(4.0, None).unwrap();
    assert!(engine.checkpoint_count() > 0);

    // Starts in cached audio, runs past its end into re-rendered audio
    engine.seek_seconds(3.5).unwrap();
    let tail = engine.render_seconds(1.0, None).unwrap();
    assert_eq!(
        tail.samples(),
        expected_samples(1, 1, 154_350, 44_100).as_slice()
    );

    // Starts before anything cached
    engine.seek_seconds(0.75).unwrap();
    let early = engine.render_seconds(0.25, None).unwrap();
    assert_eq!(
        early.samples(),
        expected_samples(1, 1, 33_075, 11_025).as_slice()
    );
}

#[test]
fn yield_hook_interleaves_with_long_render() {
    let config = EngineConfig {
        yield_every_batches: 4,
        ..EngineConfig::default()
    };
    let mut engine = loaded(MockBackend::mono(), config);
    let yields = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&yields);
    engine.set_yield_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    engine.render_seconds(10.0, Some(20_000)).unwrap();
    let batches = engine.backend().render_calls();
    assert!(batches > 400);
    assert_eq!(yields.load(Ordering::SeqCst), batches / 4);
}

#[test]
fn render_past_end_of_tune() {
    init_logging();
    let mut engine = Engine::new(MockBackend::mono(), EngineConfig::default());
    // 1.5 s tune
    engine.load_tune(&mock_tune_with_length(1, 15)).unwrap();

    let report = engine.render_seconds_report(2.0, None).unwrap();
    assert_eq!(report.outcome, RenderOutcome::EndOfStream);
    assert_eq!(report.chunk.frame_count(), 66_150);

    let again = engine.render_seconds_report(1.0, None).unwrap();
    assert_eq!(again.outcome, RenderOutcome::EndOfStream);
    assert!(again.chunk.is_empty());
    assert!(engine.render_cycles(20_000).unwrap().is_none());

    // Seeking back after the end works and the end is still honoured
    engine.seek_seconds(1.0).unwrap();
    let tail = engine.render_seconds(5.0, None).unwrap();
    assert_eq!(tail.frame_count(), 22_050);
}

#[test]
fn render_cycles_is_gapless() {
    let mut engine = loaded(MockBackend::mono(), EngineConfig::default());
    let mut samples = Vec::new();
    while samples.len() < 44_100 {
        let chunk = engine.render_cycles(12_345).unwrap().unwrap();
        assert_eq!(chunk.start_frame(), samples.len() as u64);
        samples.extend_from_slice(chunk.samples());
    }
    let n = samples.len() as u64;
    assert_eq!(samples, expected_samples(1, 1, 0, n));
}

#[test]
fn shared_telemetry_counts_frames() {
    init_logging();
    let telemetry = Arc::new(Telemetry::new());
    let mut engine =
        Engine::new(MockBackend::mono(), EngineConfig::default()).with_telemetry(Arc::clone(&telemetry));
    engine.load_tune(&mock_tune(1)).unwrap();
    engine.render_seconds(0.5, None).unwrap();
    engine.render_seconds(0.25, None).unwrap();
    assert_eq!(telemetry.snapshot().frames_produced, 33_075);
}

#[test]
fn errors_surface_immediately() {
    init_logging();
    let mut engine = Engine::new(MockBackend::mono(), EngineConfig::default());
    assert!(matches!(
        engine.render_seconds(1.0, None),
        Err(SidFlowError::NotLoaded)
    ));
    assert!(matches!(
        engine.load_tune(b"RSID garbage"),
        Err(SidFlowError::InvalidFormat(_))
    ));
    engine.load_tune(&mock_tune(2)).unwrap();
    assert!(matches!(
        engine.render_seconds(1.0, Some(0)),
        Err(SidFlowError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.select_song(3),
        Err(SidFlowError::InvalidArgument(_))
    ));
}
