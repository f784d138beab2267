use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use modelforge_ai::data::features;
use modelforge_ai::lifecycle::{price_features, risk_features};
use modelforge_ai::{
    BusinessRecord, DataProvider, DenseBackend, EngineError, EngineRuntime, EntityType,
    FetchError, InMemoryModelStore, InMemoryRecordRepository, LifecycleConfig, ModelKey,
    ModelLifecycle, ModelState, ModelStore, ModelType, PredictionInput, PredictionValue,
    RecordRepository, ScalingParams, StoreError, UpdateOutcome,
};
use modelforge_ai::lifecycle::ModelRegistry;
use modelforge_core::{Clock, ManualClock, TenantId};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn config() -> LifecycleConfig {
    LifecycleConfig::default().with_max_epochs(40)
}

fn lifecycle<S, R>(
    tenant_id: TenantId,
    store: Arc<S>,
    repo: Arc<R>,
    clock: Arc<ManualClock>,
) -> ModelLifecycle<DenseBackend, S, R>
where
    S: ModelStore,
    R: RecordRepository,
{
    let runtime = Arc::new(EngineRuntime::new(Arc::new(DenseBackend::new()), store));
    ModelLifecycle::new(
        ModelRegistry::new(tenant_id),
        runtime,
        DataProvider::new(repo),
        clock,
        config(),
    )
}

fn seed_sales(repo: &InMemoryRecordRepository, t: TenantId, now: DateTime<Utc>, days: i64, base: f64) {
    repo.extend((1..=days).map(|d| {
        BusinessRecord::new(t, EntityType::Sales, now - Duration::days(d))
            .with_amount(base + (d % 7) as f64 * 10.0)
    }));
}

fn seed_everything(repo: &InMemoryRecordRepository, t: TenantId, now: DateTime<Utc>) {
    seed_sales(repo, t, now, 40, 100.0);

    repo.extend((0..40).map(|i| {
        BusinessRecord::new(t, EntityType::Transactions, now - Duration::hours(i + 1))
            .with_amount(50.0 + (i % 5) as f64 * 3.0)
    }));

    repo.extend((0..30).map(|i| {
        let (score, delay, disputes, orders, on_time) = match i % 3 {
            0 => (85.0, 2.0, 0.0, 200.0, 0.95),
            1 => (55.0, 20.0, 2.0, 40.0, 0.7),
            _ => (20.0, 70.0, 8.0, 10.0, 0.3),
        };
        BusinessRecord::new(t, EntityType::TrustMetrics, now - Duration::hours(i + 1))
            .with_subject(format!("supplier-{i}"))
            .with_feature(features::TRUST_SCORE, score)
            .with_feature(features::PAYMENT_DELAY_DAYS, delay)
            .with_feature(features::DISPUTE_COUNT, disputes)
            .with_feature(features::ORDER_COUNT, orders)
            .with_feature(features::ON_TIME_RATE, on_time)
    }));

    repo.extend((0..20).map(|i| {
        let cost = 10.0 + i as f64;
        BusinessRecord::new(t, EntityType::ProductPricing, now - Duration::hours(i + 1))
            .with_quantity(5.0)
            .with_feature(features::UNIT_COST, cost)
            .with_feature(features::UNIT_PRICE, cost * 1.3)
            .with_feature(features::COMPETITOR_PRICE, cost * 1.25)
    }));

    repo.extend((0..32).map(|i| {
        let customer = i % 16;
        BusinessRecord::new(t, EntityType::CustomerBehavior, now - Duration::hours(i + 1))
            .with_subject(format!("customer-{customer:02}"))
            .with_amount(25.0 * (customer + 1) as f64)
    }));
}

struct Fixture {
    clock: Arc<ManualClock>,
    repo: Arc<InMemoryRecordRepository>,
    store: Arc<InMemoryModelStore>,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let repo = Arc::new(InMemoryRecordRepository::with_clock(clock.clone()));
        Self {
            clock,
            repo,
            store: Arc::new(InMemoryModelStore::new()),
        }
    }

    fn session(
        &self,
        t: TenantId,
    ) -> ModelLifecycle<DenseBackend, InMemoryModelStore, InMemoryRecordRepository> {
        lifecycle(t, self.store.clone(), self.repo.clone(), self.clock.clone())
    }
}

fn outcome(report: &modelforge_ai::SweepReport, model_type: ModelType) -> Option<&UpdateOutcome> {
    report
        .outcomes
        .iter()
        .find(|(t, _)| *t == model_type)
        .map(|(_, o)| o)
}

#[tokio::test]
async fn first_initialize_trains_every_type_with_enough_data() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_everything(&fx.repo, t, fx.clock.now());

    let session = fx.session(t);
    let report = session.initialize(t).await.unwrap();

    assert!(report.loaded.is_empty());
    assert!(report.degraded.is_none());
    let mut trained: Vec<ModelType> = report.trained().collect();
    trained.sort();
    assert_eq!(trained, ModelType::ALL.to_vec());

    for model_type in ModelType::ALL {
        assert_eq!(session.status(model_type), ModelState::Cached);
        let meta = session.metadata(model_type).unwrap();
        assert_eq!(meta.version, "v1");
        assert_eq!(meta.last_trained_at, start());
        assert!((0.0..=1.0).contains(&meta.performance));
    }

    // Artifact and metadata for every type, all under the tenant prefix.
    assert_eq!(
        fx.store.keys_with_prefix(&ModelKey::tenant_prefix(t)).len(),
        2 * ModelType::ALL.len()
    );
}

#[tokio::test]
async fn predictions_are_shaped_per_model_type() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_everything(&fx.repo, t, fx.clock.now());
    let session = fx.session(t);
    session.initialize(t).await.unwrap();

    let forecast = session
        .predict(t, ModelType::Forecast, PredictionInput::Series(vec![100.0, 110.0, 120.0, 130.0, 140.0, 150.0, 160.0]))
        .await
        .unwrap();
    assert!(forecast.value.as_scalar().unwrap().is_finite());
    assert_eq!(forecast.model_version, "v1");
    assert!(forecast.confidence >= 0.5 && forecast.confidence < 0.95);

    // Wrong window length.
    assert!(
        session
            .predict(t, ModelType::Forecast, PredictionInput::Series(vec![1.0, 2.0]))
            .await
            .is_none()
    );

    let row = risk_features(
        &BusinessRecord::new(t, EntityType::TrustMetrics, start())
            .with_feature(features::PAYMENT_DELAY_DAYS, 3.0)
            .with_feature(features::ORDER_COUNT, 150.0)
            .with_feature(features::ON_TIME_RATE, 0.9),
    );
    let risk = session
        .predict(t, ModelType::Risk, PredictionInput::Batch(vec![row.clone(), row]))
        .await
        .unwrap();
    match risk.value {
        PredictionValue::Batch(rows) => {
            assert_eq!(rows.len(), 2);
            for probs in rows {
                assert_eq!(probs.len(), 3);
                assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
            }
        }
        other => panic!("expected batch output, got {other:?}"),
    }

    let segment = session
        .predict(t, ModelType::Segmentation, PredictionInput::Series(vec![200.0]))
        .await
        .unwrap();
    let probs = segment.value.as_vector().unwrap();
    assert_eq!(probs.len(), 4);
    assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn predict_without_a_model_is_none() {
    let fx = Fixture::new();
    let t = TenantId::new();
    let session = fx.session(t);

    assert!(
        session
            .predict(t, ModelType::Price, PredictionInput::Batch(vec![vec![0.1, 0.2, 0.3]]))
            .await
            .is_none()
    );
    assert_eq!(session.status(ModelType::Price), ModelState::Absent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tenants_are_isolated() {
    let fx = Fixture::new();
    let a = TenantId::new();
    let b = TenantId::new();
    seed_sales(&fx.repo, a, fx.clock.now(), 30, 100.0);
    seed_sales(&fx.repo, b, fx.clock.now(), 30, 5000.0);

    let session_a = Arc::new(fx.session(a));
    let session_b = Arc::new(fx.session(b));

    let (ra, rb) = tokio::join!(
        tokio::spawn({
            let s = session_a.clone();
            async move { s.update_model(a, ModelType::Forecast).await }
        }),
        tokio::spawn({
            let s = session_b.clone();
            async move { s.update_model(b, ModelType::Forecast).await }
        }),
    );
    assert!(matches!(ra.unwrap().unwrap(), UpdateOutcome::Trained { .. }));
    assert!(matches!(rb.unwrap().unwrap(), UpdateOutcome::Trained { .. }));

    // Each tenant's model was fit on its own scale.
    let window_a: Vec<f64> = (0..7).map(|d| 100.0 + d as f64 * 10.0).collect();
    let window_b: Vec<f64> = window_a.iter().map(|v| v + 4900.0).collect();
    let pa = session_a
        .predict(a, ModelType::Forecast, PredictionInput::Series(window_a))
        .await
        .unwrap();
    let pb = session_b
        .predict(b, ModelType::Forecast, PredictionInput::Series(window_b.clone()))
        .await
        .unwrap();
    assert!(pa.value.as_scalar().unwrap() < 1000.0);
    assert!(pb.value.as_scalar().unwrap() > 1000.0);

    // A session never serves or trains for another tenant.
    assert!(
        session_a
            .predict(b, ModelType::Forecast, PredictionInput::Series(window_b))
            .await
            .is_none()
    );
    assert!(matches!(
        session_a.update_model(b, ModelType::Forecast).await,
        Err(EngineError::TenantScope { .. })
    ));
    assert!(matches!(
        session_a.initialize(b).await,
        Err(EngineError::TenantScope { .. })
    ));

    let keys_a = fx.store.keys_with_prefix(&ModelKey::tenant_prefix(a));
    let keys_b = fx.store.keys_with_prefix(&ModelKey::tenant_prefix(b));
    assert_eq!(keys_a.len(), 2);
    assert_eq!(keys_b.len(), 2);
    assert!(keys_a.iter().all(|k| !keys_b.contains(k)));
}

#[tokio::test]
async fn restart_restores_fresh_models_and_retrains_stale_ones() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 30, 100.0);

    let first = fx.session(t);
    first.initialize(t).await.unwrap();
    assert_eq!(first.metadata(ModelType::Forecast).unwrap().version, "v1");

    // Restart an hour later: the forecast is restored and left alone.
    fx.clock.advance(Duration::hours(1));
    let second = fx.session(t);
    let report = second.initialize(t).await.unwrap();
    assert_eq!(report.loaded, vec![ModelType::Forecast]);
    assert!(report.fresh.contains(&ModelType::Forecast));
    assert!(outcome(&report, ModelType::Forecast).is_none());
    assert_eq!(second.status(ModelType::Forecast), ModelState::Cached);

    // Restart past the update interval: initialize restores and retrains it.
    fx.clock.advance(Duration::hours(24));
    assert_eq!(second.status(ModelType::Forecast), ModelState::Stale);
    let third = fx.session(t);
    let report = third.initialize(t).await.unwrap();
    assert_eq!(report.loaded, vec![ModelType::Forecast]);
    assert!(!report.fresh.contains(&ModelType::Forecast));
    assert_eq!(
        outcome(&report, ModelType::Forecast),
        Some(&UpdateOutcome::Trained {
            version: "v2".to_string(),
            performance: third.metadata(ModelType::Forecast).unwrap().performance,
        })
    );
    assert_eq!(
        third.metadata(ModelType::Forecast).unwrap().last_trained_at,
        start() + Duration::hours(25)
    );
    assert_eq!(third.status(ModelType::Forecast), ModelState::Cached);

    // A running session's sweep picks up staleness the same way.
    fx.clock.advance(Duration::hours(25));
    let report = third.sweep(t).await.unwrap();
    assert!(matches!(
        outcome(&report, ModelType::Forecast),
        Some(UpdateOutcome::Trained { version, .. }) if version == "v3"
    ));
}

#[tokio::test]
async fn initialize_trains_types_missing_next_to_restored_ones() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 30, 100.0);
    fx.session(t).initialize(t).await.unwrap();

    // The remaining record kinds show up before the next start.
    fx.clock.advance(Duration::hours(1));
    fx.repo.extend((0..20).map(|i| {
        BusinessRecord::new(t, EntityType::Transactions, fx.clock.now() - Duration::hours(i + 1))
            .with_amount(40.0 + (i % 4) as f64)
    }));

    let session = fx.session(t);
    let report = session.initialize(t).await.unwrap();
    assert_eq!(report.loaded, vec![ModelType::Forecast]);
    assert!(report.fresh.contains(&ModelType::Forecast));
    assert!(matches!(
        outcome(&report, ModelType::Anomaly),
        Some(UpdateOutcome::Trained { version, .. }) if version == "v1"
    ));
    assert!(matches!(
        outcome(&report, ModelType::Risk),
        Some(UpdateOutcome::Skipped { .. })
    ));
}

#[tokio::test]
async fn artifact_without_metadata_is_stale() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 30, 100.0);
    fx.session(t).update_model(t, ModelType::Forecast).await.unwrap();

    // Copy only the artifact into a fresh store.
    let key = ModelKey::new(t, ModelType::Forecast);
    let artifact = fx.store.get(&key.artifact_key()).await.unwrap().unwrap();
    let store = Arc::new(InMemoryModelStore::new());
    store.put_raw(&key.artifact_key(), artifact);

    let session = lifecycle(t, store.clone(), fx.repo.clone(), fx.clock.clone());
    let report = session.initialize(t).await.unwrap();

    assert_eq!(report.loaded, vec![ModelType::Forecast]);
    assert!(matches!(
        outcome(&report, ModelType::Forecast),
        Some(UpdateOutcome::Trained { version, .. }) if version == "v2"
    ));
    assert!(store.get(&key.metadata_key()).await.unwrap().is_some());
}

#[tokio::test]
async fn insufficient_history_is_skipped() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 3, 100.0);

    let session = fx.session(t);
    let outcome = session.update_model(t, ModelType::Forecast).await.unwrap();

    assert_eq!(outcome, UpdateOutcome::Skipped { required: 8, actual: 3 });
    assert_eq!(session.status(ModelType::Forecast), ModelState::Absent);
    assert!(fx.store.keys_with_prefix(&ModelKey::tenant_prefix(t)).is_empty());
}

#[tokio::test]
async fn training_in_flight_is_not_duplicated() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 30, 100.0);
    let session = fx.session(t);

    let guard = session
        .registry()
        .try_begin_training(ModelType::Forecast)
        .unwrap();
    assert_eq!(session.status(ModelType::Forecast), ModelState::Training);
    assert_eq!(
        session.update_model(t, ModelType::Forecast).await.unwrap(),
        UpdateOutcome::InFlight
    );

    drop(guard);
    assert!(matches!(
        session.update_model(t, ModelType::Forecast).await.unwrap(),
        UpdateOutcome::Trained { .. }
    ));
}

/// Serves sales from an inner repository and fails every other read.
struct PartialRepository {
    inner: Arc<InMemoryRecordRepository>,
}

#[async_trait]
impl RecordRepository for PartialRepository {
    async fn read(
        &self,
        tenant_id: TenantId,
        entity: EntityType,
        lookback_days: u32,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>, FetchError> {
        match entity {
            EntityType::Sales => self.inner.read(tenant_id, entity, lookback_days, limit).await,
            _ => Err(FetchError::Query("relation does not exist".to_string())),
        }
    }
}

#[tokio::test]
async fn failed_fetch_does_not_block_other_types() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 30, 100.0);
    let repo = Arc::new(PartialRepository {
        inner: fx.repo.clone(),
    });

    let session = lifecycle(t, fx.store.clone(), repo, fx.clock.clone());
    let report = session.initialize(t).await.unwrap();

    assert!(matches!(
        outcome(&report, ModelType::Forecast),
        Some(UpdateOutcome::Trained { .. })
    ));
    for model_type in [ModelType::Anomaly, ModelType::Risk, ModelType::Price, ModelType::Segmentation] {
        match outcome(&report, model_type) {
            Some(UpdateOutcome::Failed { reason }) => assert!(reason.contains("relation does not exist")),
            other => panic!("{model_type}: expected failure, got {other:?}"),
        }
    }
}

/// Reads always miss, writes always fail.
struct ReadOnlyStore;

#[async_trait]
impl ModelStore for ReadOnlyStore {
    async fn set(&self, _key: &str, _blob: Vec<u8>) -> Result<(), StoreError> {
        Err(StoreError::Storage("disk full".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }
}

#[tokio::test]
async fn persistence_failure_still_serves_from_memory() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_sales(&fx.repo, t, fx.clock.now(), 30, 100.0);

    let session = lifecycle(t, Arc::new(ReadOnlyStore), fx.repo.clone(), fx.clock.clone());
    let outcome = session.update_model(t, ModelType::Forecast).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Trained { .. }));

    assert!(
        session
            .predict(t, ModelType::Forecast, PredictionInput::Series(vec![120.0; 7]))
            .await
            .is_some()
    );

    // Nothing survives a restart.
    let restarted = lifecycle(t, Arc::new(ReadOnlyStore), fx.repo.clone(), fx.clock.clone());
    assert_eq!(restarted.status(ModelType::Forecast), ModelState::Absent);
}

#[tokio::test]
async fn transaction_anomaly_check_uses_the_autoencoder() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_everything(&fx.repo, t, fx.clock.now());
    let session = fx.session(t);

    let amounts: Vec<f64> = (0..20).map(|i| 50.0 + (i % 5) as f64 * 3.0).collect();
    assert!(session.detect_transaction_anomalies(t, &amounts).await.is_none());

    session.update_model(t, ModelType::Anomaly).await.unwrap();
    let flagged = session.detect_transaction_anomalies(t, &amounts).await.unwrap();
    assert!(flagged.iter().all(|i| (4..amounts.len()).contains(i)));

    assert_eq!(
        session.detect_transaction_anomalies(t, &amounts[..3]).await,
        Some(Vec::new())
    );
    assert!(
        session
            .detect_transaction_anomalies(TenantId::new(), &amounts)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn price_inputs_are_raw_features_in_both_shapes() {
    let fx = Fixture::new();
    let t = TenantId::new();
    let now = fx.clock.now();
    fx.repo.extend((0..20).map(|i| {
        let cost = 10.0 + i as f64;
        let markup = 0.1 + 0.05 * (i % 5) as f64;
        BusinessRecord::new(t, EntityType::ProductPricing, now - Duration::hours(i + 1))
            .with_quantity(5.0)
            .with_feature(features::UNIT_COST, cost)
            .with_feature(features::UNIT_PRICE, cost * (1.0 + markup))
            .with_feature(features::COMPETITOR_PRICE, cost * 1.2)
    }));

    let session = fx.session(t);
    assert!(matches!(
        session.update_model(t, ModelType::Price).await.unwrap(),
        UpdateOutcome::Trained { .. }
    ));
    let entry = session.registry().get(ModelType::Price).unwrap();
    assert_eq!(entry.artifact.input_scaling, ScalingParams::None);
    assert!(matches!(entry.artifact.output_scaling, ScalingParams::MinMax { .. }));

    let f = price_features(15.0, Some(18.0), 5.0);
    let series = session
        .predict(t, ModelType::Price, PredictionInput::Series(f.clone()))
        .await
        .unwrap()
        .value
        .as_scalar()
        .unwrap();
    let batch = match session
        .predict(t, ModelType::Price, PredictionInput::Batch(vec![f.clone(), f]))
        .await
        .unwrap()
        .value
    {
        PredictionValue::Batch(rows) => rows,
        other => panic!("expected batch output, got {other:?}"),
    };

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].len(), 1);
    assert!((series - batch[0][0]).abs() < 1e-9, "{series} vs {:?}", batch[0]);
    // Markups seen in training span 0.1..0.3; the answer is a markup, not a
    // scaled output.
    assert!((-0.5..1.0).contains(&series), "{series}");
}

#[tokio::test]
async fn anomaly_predictions_reconstruct_scaled_windows() {
    let fx = Fixture::new();
    let t = TenantId::new();
    seed_everything(&fx.repo, t, fx.clock.now());
    let session = fx.session(t);
    session.update_model(t, ModelType::Anomaly).await.unwrap();

    let entry = session.registry().get(ModelType::Anomaly).unwrap();
    let scaling = entry.artifact.input_scaling;
    assert!(matches!(scaling, ScalingParams::Standard { .. }));

    let window = vec![50.0, 53.0, 56.0, 59.0, 62.0];
    let series = session
        .predict(t, ModelType::Anomaly, PredictionInput::Series(window.clone()))
        .await
        .unwrap();
    let reconstructed = series.value.as_vector().unwrap().to_vec();
    assert_eq!(reconstructed.len(), 5);
    assert!(reconstructed.iter().all(|v| v.is_finite()));

    // Batch rows go in as given: scaling them by hand matches the series path.
    let scaled: Vec<f64> = window.iter().map(|v| scaling.apply(*v)).collect();
    match session
        .predict(t, ModelType::Anomaly, PredictionInput::Batch(vec![scaled]))
        .await
        .unwrap()
        .value
    {
        PredictionValue::Batch(rows) => {
            assert_eq!(rows.len(), 1);
            for (a, b) in rows[0].iter().zip(&reconstructed) {
                assert!((a - b).abs() < 1e-9);
            }
        }
        other => panic!("expected batch output, got {other:?}"),
    }

    assert!(
        session
            .predict(t, ModelType::Anomaly, PredictionInput::Series(vec![50.0; 4]))
            .await
            .is_none()
    );
}
