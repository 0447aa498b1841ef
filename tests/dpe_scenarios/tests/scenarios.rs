use std::sync::Arc;

use crypto_dpe::{EngineConfig, OsEntropy};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};
use runtime_backend::DpeBackend;
use runtime_router::{RouterCommand, RouterError, SessionContext, SharedRouter};
use serde_json::{json, Value};
use storage_config::InMemoryConfigStore;

const DIMENSION: usize = 1536;

async fn router() -> (SharedRouter, Arc<DpeBackend>) {
    let backend = Arc::new(
        DpeBackend::open(
            EngineConfig::default(),
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(OsEntropy),
        )
        .await
        .expect("open backend"),
    );
    (backend.clone() as SharedRouter, backend)
}

fn ctx() -> SessionContext {
    SessionContext::new("scenario")
}

async fn rotate(router: &SharedRouter, body: Value) -> Result<Value, RouterError> {
    router
        .dispatch(ctx(), RouterCommand::new("config/rotate", body))
        .await
        .map(|response| response.payload)
}

async fn encrypt(router: &SharedRouter, vector: &[f64]) -> Result<Vec<f64>, RouterError> {
    let response = router
        .dispatch(
            ctx(),
            RouterCommand::new("encrypt/vector", json!({ "vector": vector })),
        )
        .await?;
    Ok(response.payload["ciphertext"]
        .as_array()
        .expect("ciphertext array")
        .iter()
        .map(|v| v.as_f64().expect("numeric ciphertext"))
        .collect())
}

fn unit_vector(rng: &mut ChaCha20Rng) -> Vec<f64> {
    let mut v: Vec<f64> = (0..DIMENSION).map(|_| StandardNormal.sample(rng)).collect();
    let norm = dot(&v, &v).sqrt();
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    dot(a, b) / (dot(a, a).sqrt() * dot(b, b).sqrt())
}

#[tokio::test(flavor = "multi_thread")]
async fn production_dimension_lifecycle() {
    let (router, backend) = router().await;
    let mut rng = ChaCha20Rng::seed_from_u64(1536);

    // rotate(1536, 10.0, 5.0) echoes exactly what was asked for
    let echoed = rotate(
        &router,
        json!({ "dimension": 1536, "scaling_factor": 10.0, "approximation_factor": 5.0 }),
    )
    .await
    .expect("rotate");
    assert_eq!(
        echoed,
        json!({ "dimension": 1536, "scaling_factor": 10.0, "approximation_factor": 5.0 })
    );
    let configured = backend.manager().current().expect("configured");

    // a random unit vector encrypts to 1536 finite values unlike the input
    let v = unit_vector(&mut rng);
    let first = encrypt(&router, &v).await.expect("encrypt");
    assert_eq!(first.len(), DIMENSION);
    assert!(first.iter().all(|x| x.is_finite()));
    assert_ne!(first, v);

    // the same vector encrypted twice differs
    let second = encrypt(&router, &v).await.expect("encrypt again");
    assert_ne!(first, second);

    // an out-of-range dimension is rejected and nothing changes
    let err = rotate(&router, json!({ "dimension": 100_000 }))
        .await
        .expect_err("dimension above 8192");
    assert_eq!(err.status_code(), 400);
    let current = backend.manager().current().expect("still configured");
    assert_eq!(current.version(), configured.version());
    assert_eq!(current.key_id(), configured.key_id());
    assert_eq!(current.params(), configured.params());

    // NaN at element 0 is rejected
    let err = router
        .dispatch(
            ctx(),
            RouterCommand::new(
                "encrypt/vector",
                json!({ "vector": std::iter::once(json!("NaN"))
                    .chain(v[1..].iter().map(|x| json!(x)))
                    .collect::<Vec<_>>() }),
            ),
        )
        .await
        .expect_err("NaN element");
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().contains("element 0"), "{err}");

    // a vector of the wrong length is rejected
    let err = encrypt(&router, &v[..DIMENSION - 1])
        .await
        .expect_err("short vector");
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().contains("1535"), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn similar_vectors_stay_similar() {
    let (router, _) = router().await;
    rotate(
        &router,
        json!({ "dimension": 1536, "scaling_factor": 10.0, "approximation_factor": 2.0 }),
    )
    .await
    .expect("rotate");

    let mut rng = ChaCha20Rng::seed_from_u64(95);
    let a = unit_vector(&mut rng);
    let mut w = unit_vector(&mut rng);
    let projection = dot(&w, &a);
    w.iter_mut().zip(&a).for_each(|(x, y)| *x -= projection * y);
    let w_norm = dot(&w, &w).sqrt();
    let sin = (1.0f64 - 0.95 * 0.95).sqrt();
    let b: Vec<f64> = a
        .iter()
        .zip(&w)
        .map(|(x, y)| 0.95 * x + sin * y / w_norm)
        .collect();
    let plain = cosine(&a, &b);
    assert!((plain - 0.95).abs() < 1e-9);

    let cipher = cosine(
        &encrypt(&router, &a).await.expect("encrypt a"),
        &encrypt(&router, &b).await.expect("encrypt b"),
    );
    assert!((plain - cipher).abs() < 0.1, "plain {plain} cipher {cipher}");
}

#[tokio::test]
async fn encrypt_requires_configuration() {
    let (router, _) = router().await;
    let err = encrypt(&router, &[0.5, 0.5]).await.expect_err("unconfigured");
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn rotate_defaults_and_retains_fields() {
    let (router, _) = router().await;
    let first = rotate(&router, json!({ "dimension": "12" }))
        .await
        .expect("first rotate");
    assert_eq!(
        first,
        json!({ "dimension": 12, "scaling_factor": 1.0, "approximation_factor": 5.0 })
    );

    let second = rotate(&router, json!({ "scaling_factor": "3.5" }))
        .await
        .expect("second rotate");
    assert_eq!(
        second,
        json!({ "dimension": 12, "scaling_factor": 3.5, "approximation_factor": 5.0 })
    );

    let err = rotate(&router, json!({ "approximation_factor": -1 }))
        .await
        .expect_err("negative approximation factor");
    assert!(matches!(err, RouterError::InvalidRequest { .. }));
}

#[tokio::test]
async fn large_dimension_rotate_reports_memory_warning() {
    let (router, _) = {
        let backend = Arc::new(
            DpeBackend::open(
                EngineConfig {
                    memory_warning_bytes: 64 * 64 * 8 - 1,
                    ..EngineConfig::default()
                },
                Arc::new(InMemoryConfigStore::new()),
                Arc::new(OsEntropy),
            )
            .await
            .expect("open backend"),
        );
        (backend.clone() as SharedRouter, backend)
    };
    let response = router
        .dispatch(ctx(), RouterCommand::new("config/rotate", json!({ "dimension": 64 })))
        .await
        .expect("rotate");
    assert_eq!(response.diagnostics.len(), 1);
    assert!(response.diagnostics[0].contains("dimension 64"));
}
