use std::sync::Arc;

use crypto_dpe::{
    ConfigManager, EngineConfig, Encryptor, OsEntropy, RotateRequest, SeededEntropy, Snapshot,
    VectorValidator,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};
use storage_config::InMemoryConfigStore;

async fn configured(dimension: usize, s: f64, beta: f64) -> Arc<Snapshot> {
    let manager = ConfigManager::open(
        EngineConfig::default(),
        Arc::new(InMemoryConfigStore::new()),
        Arc::new(SeededEntropy::from_u64(dimension as u64)),
    )
    .await
    .expect("open");
    manager
        .rotate(RotateRequest {
            dimension: Some(dimension as i64),
            scaling_factor: Some(s),
            approximation_factor: Some(beta),
        })
        .await
        .expect("rotate")
        .snapshot
}

fn encrypt(encryptor: &Encryptor, snapshot: &Snapshot, vector: &[f64]) -> Vec<f64> {
    let validated = VectorValidator::default()
        .validate(vector, snapshot)
        .expect("valid vector");
    encryptor.encrypt(validated).expect("encrypt").into_values()
}

fn unit_vector(rng: &mut ChaCha20Rng, dimension: usize) -> Vec<f64> {
    let mut v: Vec<f64> = (0..dimension).map(|_| StandardNormal.sample(rng)).collect();
    let norm = dot(&v, &v).sqrt();
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

/// Unit vector with cosine similarity `cos` to the unit vector `a`.
fn neighbour(rng: &mut ChaCha20Rng, a: &[f64], cos: f64) -> Vec<f64> {
    let mut w = unit_vector(rng, a.len());
    let projection = dot(&w, a);
    w.iter_mut().zip(a).for_each(|(x, y)| *x -= projection * y);
    let norm = dot(&w, &w).sqrt();
    let sin = (1.0 - cos * cos).sqrt();
    a.iter()
        .zip(&w)
        .map(|(x, y)| cos * x + sin * y / norm)
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    dot(a, b) / (dot(a, a).sqrt() * dot(b, b).sqrt())
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[tokio::test]
async fn same_vector_encrypts_differently() {
    let snapshot = configured(64, 1.0, 1.0).await;
    let encryptor = Encryptor::new(Arc::new(OsEntropy));
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    let v = unit_vector(&mut rng, 64);

    let first = encrypt(&encryptor, &snapshot, &v);
    let second = encrypt(&encryptor, &snapshot, &v);
    assert_eq!(first.len(), 64);
    assert_ne!(first, second);
    assert_ne!(first, v);
}

#[tokio::test]
async fn cosine_drift_stays_small_at_production_dimension() {
    let snapshot = configured(1536, 10.0, 2.0).await;
    let encryptor = Encryptor::new(Arc::new(SeededEntropy::from_u64(2)));
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let a = unit_vector(&mut rng, 1536);
    let b = neighbour(&mut rng, &a, 0.95);
    assert!((cosine(&a, &b) - 0.95).abs() < 1e-9);

    let drift = (cosine(&a, &b)
        - cosine(
            &encrypt(&encryptor, &snapshot, &a),
            &encrypt(&encryptor, &snapshot, &b),
        ))
    .abs();
    assert!(drift < 0.1, "drift {drift}");
}

#[tokio::test]
async fn cosine_drift_shrinks_with_approximation_factor() {
    const ROUNDS: usize = 20;
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let a = unit_vector(&mut rng, 512);
    let b = neighbour(&mut rng, &a, 0.9);
    let plain = cosine(&a, &b);

    let mut drifts = Vec::new();
    for beta in [4.0, 1.0, 0.25, 0.0] {
        let snapshot = configured(512, 3.0, beta).await;
        let encryptor = Encryptor::new(Arc::new(SeededEntropy::from_u64(4)));
        // average over fresh noise draws so the trend is not masked by one sample
        let cipher = (0..ROUNDS)
            .map(|_| {
                cosine(
                    &encrypt(&encryptor, &snapshot, &a),
                    &encrypt(&encryptor, &snapshot, &b),
                )
            })
            .sum::<f64>()
            / ROUNDS as f64;
        drifts.push((plain - cipher).abs());
    }
    for pair in drifts.windows(2) {
        assert!(pair[1] < pair[0], "drifts not decreasing: {drifts:?}");
    }
    assert!(drifts[3] < 1e-6, "noiseless drift {}", drifts[3]);
}

#[tokio::test]
async fn distance_ratio_tracks_scaling_factor() {
    let s = 4.0;
    let beta = 1.0;
    let snapshot = configured(128, s, beta).await;
    let encryptor = Encryptor::new(Arc::new(SeededEntropy::from_u64(5)));
    let mut rng = ChaCha20Rng::seed_from_u64(5);

    for _ in 0..10 {
        let a = unit_vector(&mut rng, 128);
        let b = unit_vector(&mut rng, 128);
        let ratio = distance(
            &encrypt(&encryptor, &snapshot, &a),
            &encrypt(&encryptor, &snapshot, &b),
        ) / distance(&a, &b);
        assert!(
            (ratio / s - 1.0).abs() < beta / 4.0,
            "ratio {ratio} too far from {s}"
        );
    }
}

#[tokio::test]
async fn noiseless_encryption_preserves_norms_exactly() {
    let snapshot = configured(96, 2.5, 0.0).await;
    let encryptor = Encryptor::new(Arc::new(SeededEntropy::from_u64(6)));
    let mut rng = ChaCha20Rng::seed_from_u64(6);
    let v: Vec<f64> = unit_vector(&mut rng, 96).iter().map(|x| x * 3.0).collect();

    let first = encrypt(&encryptor, &snapshot, &v);
    let second = encrypt(&encryptor, &snapshot, &v);
    assert!(first.iter().all(|x| x.is_finite()));
    assert_eq!(first, second);
    assert!((dot(&first, &first).sqrt() - 2.5 * 3.0).abs() < 1e-6);
}
