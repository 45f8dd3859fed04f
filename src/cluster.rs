use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::models::{self, excerpt, ClusterAssignmentRow, ClusterSummaryRow, PreprocessedDocument};
use crate::vectorize::cosine;

const N_INIT: usize = 10;
const MAX_ITERS: usize = 100;
const POWER_ITERS: usize = 50;

#[derive(Debug, Clone)]
pub struct ClusterOutput {
    pub k: usize,
    pub assignments: Vec<ClusterAssignmentRow>,
    pub summaries: Vec<ClusterSummaryRow>,
    /// Representative document ids per cluster, most central first.
    pub representatives: BTreeMap<usize, Vec<usize>>,
}

impl ClusterOutput {
    fn empty() -> Self {
        Self {
            k: 0,
            assignments: Vec::new(),
            summaries: Vec::new(),
            representatives: BTreeMap::new(),
        }
    }
}

/// Group documents by embedding similarity and write the cluster artifacts
/// under csv/. The cluster count comes from a silhouette search over the
/// configured range.
pub fn run(
    cfg: &AppConfig,
    docs: &[PreprocessedDocument],
    embeddings: &[Vec<f32>],
) -> Result<ClusterOutput> {
    let stage_start = std::time::Instant::now();
    if cfg.clustering.algorithm != "kmeans" {
        bail!(
            "Unknown clustering algorithm '{}', expected 'kmeans'",
            cfg.clustering.algorithm
        );
    }
    if docs.len() != embeddings.len() {
        bail!(
            "Embedding count {} does not match document count {}",
            embeddings.len(),
            docs.len()
        );
    }
    if docs.is_empty() {
        warn!("No documents available for clustering, writing empty artifacts");
        let output = ClusterOutput::empty();
        write_artifacts(cfg, &output)?;
        return Ok(output);
    }

    let dim = embeddings[0].len();
    let data = if cfg.clustering.reduced_dim > 0 && cfg.clustering.reduced_dim < dim && docs.len() >= 3 {
        info!(
            "Reducing embeddings - dim={} -> {}",
            dim, cfg.clustering.reduced_dim
        );
        reduce_dimensions(embeddings, cfg.clustering.reduced_dim, cfg.seed)
    } else {
        embeddings.to_vec()
    };

    let [k_min, k_max] = cfg.clustering.n_clusters_range;
    debug!(
        "Clustering started - documents={}, range=[{}, {}]",
        docs.len(),
        k_min,
        k_max
    );
    let (k, fit) = find_optimal_k(&data, k_min, k_max, cfg.seed);

    let assignments: Vec<ClusterAssignmentRow> = docs
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let cluster_id = fit.labels[i];
            ClusterAssignmentRow {
                document_id: doc.document_id,
                cluster_id,
                cluster_name: format!("cluster_{}", cluster_id + 1),
                similarity: cosine(&data[i], &fit.centroids[cluster_id]),
            }
        })
        .collect();

    let mut representatives: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut summaries = Vec::with_capacity(k);
    for cluster_id in 0..k {
        let mut members: Vec<&ClusterAssignmentRow> = assignments
            .iter()
            .filter(|a| a.cluster_id == cluster_id)
            .collect();
        members.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        let reps: Vec<usize> = members
            .iter()
            .take(cfg.clustering.representatives_per_cluster)
            .map(|a| a.document_id)
            .collect();

        let count = members.len();
        let avg = if count == 0 {
            0.0
        } else {
            members.iter().map(|a| a.similarity).sum::<f64>() / count as f64
        };
        let representative_text = reps
            .first()
            .map(|&id| excerpt(&docs[id].cleaned_text, 200))
            .unwrap_or_default();
        let sample_texts = reps
            .iter()
            .map(|&id| excerpt(&docs[id].cleaned_text, 100))
            .collect::<Vec<_>>()
            .join(" | ");

        summaries.push(ClusterSummaryRow {
            cluster_id,
            cluster_name: format!("cluster_{}", cluster_id + 1),
            document_count: count,
            avg_similarity: avg,
            representative_text,
            sample_texts,
        });
        representatives.insert(cluster_id, reps);
    }

    let sizes: Vec<usize> = summaries.iter().map(|s| s.document_count).collect();
    if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
        let avg = sizes.iter().sum::<usize>() as f32 / sizes.len() as f32;
        debug!(
            "Cluster size distribution - min={}, max={}, avg={:.1}",
            min, max, avg
        );
    }

    let output = ClusterOutput {
        k,
        assignments,
        summaries,
        representatives,
    };
    write_artifacts(cfg, &output)?;

    let elapsed = stage_start.elapsed();
    info!(
        "Clustering completed - duration={:.2}s, clusters={}, documents={}",
        elapsed.as_secs_f32(),
        output.k,
        docs.len()
    );
    Ok(output)
}

pub fn read_assignments(cfg: &AppConfig) -> Result<Vec<ClusterAssignmentRow>> {
    let path = cfg.csv_dir().join("cluster_assignments.csv");
    models::read_csv(&path)
        .with_context(|| format!("Missing {}, run the cluster stage first", path.display()))
}

pub fn read_summary(cfg: &AppConfig) -> Result<Vec<ClusterSummaryRow>> {
    let path = cfg.csv_dir().join("cluster_summary.csv");
    models::read_csv(&path)
        .with_context(|| format!("Missing {}, run the cluster stage first", path.display()))
}

pub fn read_representatives(cfg: &AppConfig) -> Result<BTreeMap<usize, Vec<usize>>> {
    let path = cfg.csv_dir().join("representative_indices.json");
    let raw = std::fs::read(&path)
        .with_context(|| format!("Missing {}, run the cluster stage first", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Malformed {}", path.display()))
}

fn write_artifacts(cfg: &AppConfig, output: &ClusterOutput) -> Result<()> {
    let csv_dir = cfg.csv_dir();

    let path = csv_dir.join("cluster_assignments.csv");
    models::write_csv(&path, &output.assignments)?;
    debug!("Wrote {}", path.display());

    let path = csv_dir.join("cluster_summary.csv");
    models::write_csv(&path, &output.summaries)?;
    debug!("Wrote {}", path.display());

    let path = csv_dir.join("representative_indices.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&output.representatives)?)?;
    debug!("Wrote {}", path.display());

    Ok(())
}

/// Principal components by power iteration with deflation. Input rows are
/// centered; arithmetic runs in f64 to keep the projection stable.
pub fn reduce_dimensions(vectors: &[Vec<f32>], target: usize, seed: u64) -> Vec<Vec<f32>> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }
    let dim = vectors[0].len();
    if target == 0 || target >= dim || n < 3 {
        return vectors.to_vec();
    }

    let mut mean = vec![0f64; dim];
    for row in vectors {
        for (m, x) in mean.iter_mut().zip(row.iter()) {
            *m += *x as f64;
        }
    }
    for m in mean.iter_mut() {
        *m /= n as f64;
    }
    let centered: Vec<Vec<f64>> = vectors
        .iter()
        .map(|row| row.iter().zip(mean.iter()).map(|(x, m)| *x as f64 - m).collect())
        .collect();

    let mut working = centered.clone();
    let mut components: Vec<Vec<f64>> = Vec::with_capacity(target);
    for c in 0..target {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(c as u64));
        let mut v: Vec<f64> = (0..dim).map(|_| rng.gen::<f64>() - 0.5).collect();
        normalize(&mut v);
        for _ in 0..POWER_ITERS {
            let mut next = vec![0f64; dim];
            for row in &working {
                let proj: f64 = row.iter().zip(v.iter()).map(|(x, y)| x * y).sum();
                for (nx, x) in next.iter_mut().zip(row.iter()) {
                    *nx += proj * x;
                }
            }
            if !normalize(&mut next) {
                break;
            }
            v = next;
        }
        for row in working.iter_mut() {
            let proj: f64 = row.iter().zip(v.iter()).map(|(x, y)| x * y).sum();
            for (x, vc) in row.iter_mut().zip(v.iter()) {
                *x -= proj * vc;
            }
        }
        components.push(v);
    }

    centered
        .iter()
        .map(|row| {
            components
                .iter()
                .map(|comp| {
                    row.iter().zip(comp.iter()).map(|(x, y)| x * y).sum::<f64>() as f32
                })
                .collect()
        })
        .collect()
}

fn normalize(v: &mut [f64]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm <= 1e-12 {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

struct KmeansFit {
    labels: Vec<usize>,
    centroids: Vec<Vec<f32>>,
    inertia: f64,
}

/// Silhouette search over the capped candidate range. Fewer than four
/// documents always form a single cluster.
fn find_optimal_k(data: &[Vec<f32>], k_min: usize, k_max: usize, seed: u64) -> (usize, KmeansFit) {
    let n = data.len();
    if n < 4 {
        debug!("Too few documents for a cluster search, using a single cluster");
        return (1, kmeans(data, 1, seed));
    }
    let lo = k_min.max(2);
    let hi = k_max.min(n / 3);
    if hi < lo {
        let k = lo.min(n);
        debug!("Cluster range empty after capping, using k={}", k);
        return (k, kmeans(data, k, seed));
    }

    let mut best_fit = kmeans(data, lo, seed);
    let mut best_k = lo;
    let mut best_score = silhouette_score(data, &best_fit.labels, lo);
    debug!("Cluster search - k={}, silhouette={:.4}", lo, best_score);
    for k in (lo + 1)..=hi {
        let fit = kmeans(data, k, seed);
        let score = silhouette_score(data, &fit.labels, k);
        debug!("Cluster search - k={}, silhouette={:.4}", k, score);
        if score > best_score {
            best_score = score;
            best_k = k;
            best_fit = fit;
        }
    }
    info!(
        "Cluster search selected k={} (silhouette {:.3})",
        best_k, best_score
    );
    (best_k, best_fit)
}

/// Best of N_INIT seeded runs by inertia.
fn kmeans(data: &[Vec<f32>], k: usize, seed: u64) -> KmeansFit {
    let mut best = kmeans_single(data, k, seed);
    for run in 1..N_INIT {
        let fit = kmeans_single(data, k, seed.wrapping_add(run as u64));
        if fit.inertia < best.inertia {
            best = fit;
        }
    }
    best
}

fn kmeans_single(data: &[Vec<f32>], k: usize, seed: u64) -> KmeansFit {
    let n = data.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_plus_plus(data, k, &mut rng);
    let mut labels = vec![usize::MAX; n];

    for _ in 0..MAX_ITERS {
        let new_labels: Vec<usize> = data.par_iter().map(|p| nearest(p, &centroids)).collect();

        let dim = data[0].len();
        let mut sums = vec![vec![0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, &label) in new_labels.iter().enumerate() {
            counts[label] += 1;
            for (s, x) in sums[label].iter_mut().zip(data[i].iter()) {
                *s += *x as f64;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c]
                    .iter()
                    .map(|s| (*s / counts[c] as f64) as f32)
                    .collect();
            }
        }

        // re-seed empty clusters from the points worst served by theirs
        let mut used: Vec<usize> = Vec::new();
        for c in 0..k {
            if counts[c] > 0 {
                continue;
            }
            let far = (0..n)
                .filter(|i| !used.contains(i))
                .max_by(|&a, &b| {
                    let da = squared_dist(&data[a], &centroids[new_labels[a]]);
                    let db = squared_dist(&data[b], &centroids[new_labels[b]]);
                    da.total_cmp(&db)
                });
            if let Some(i) = far {
                centroids[c] = data[i].clone();
                used.push(i);
            }
        }

        let converged = new_labels == labels;
        labels = new_labels;
        if converged {
            break;
        }
    }

    let labels: Vec<usize> = data.par_iter().map(|p| nearest(p, &centroids)).collect();
    let inertia: f64 = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| squared_dist(&data[i], &centroids[label]))
        .sum();
    KmeansFit {
        labels,
        centroids,
        inertia,
    }
}

/// k-means++ seeding: each next centroid is drawn proportional to squared
/// distance from the ones already chosen.
fn init_plus_plus(data: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = data.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..n)].clone());
    let mut d2 = vec![0f64; n];
    while centroids.len() < k {
        let mut total = 0.0;
        for (i, p) in data.iter().enumerate() {
            d2[i] = centroids
                .iter()
                .map(|c| squared_dist(p, c))
                .fold(f64::MAX, f64::min);
            total += d2[i];
        }
        let next = if total > 0.0 {
            let mut r = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                if r < d {
                    pick = i;
                    break;
                }
                r -= d;
            }
            pick
        } else {
            rng.gen_range(0..n)
        };
        centroids.push(data[next].clone());
    }
    centroids
}

fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_dist(point, centroid);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    best
}

fn squared_dist(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum()
}

/// Mean silhouette over all points; single-cluster labelings score 0.
fn silhouette_score(data: &[Vec<f32>], labels: &[usize], k: usize) -> f64 {
    if k < 2 || data.is_empty() {
        return 0.0;
    }
    let n = data.len();
    let scores: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut sums = vec![0f64; k];
            let mut counts = vec![0usize; k];
            for j in 0..n {
                if j == i {
                    continue;
                }
                sums[labels[j]] += squared_dist(&data[i], &data[j]).sqrt();
                counts[labels[j]] += 1;
            }
            let own = labels[i];
            if counts[own] == 0 {
                return 0.0;
            }
            let a = sums[own] / counts[own] as f64;
            let mut b = f64::MAX;
            for c in 0..k {
                if c != own && counts[c] > 0 {
                    b = b.min(sums[c] / counts[c] as f64);
                }
            }
            if b == f64::MAX {
                return 0.0;
            }
            let denom = a.max(b);
            if denom == 0.0 {
                0.0
            } else {
                (b - a) / denom
            }
        })
        .collect();
    scores.iter().sum::<f64>() / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn doc(id: usize, text: &str) -> PreprocessedDocument {
        PreprocessedDocument {
            document_id: id,
            record_id: format!("{}", id + 1),
            date: "2024-01-15".into(),
            category: "일반".into(),
            submitter: "입주민".into(),
            summary: text.into(),
            merged_text: text.into(),
            cleaned_text: text.into(),
            text_length: text.chars().count(),
            dedup_key: String::new(),
        }
    }

    fn blobs(centers: &[[f32; 4]], per_blob: usize) -> Vec<Vec<f32>> {
        let offsets = [
            [0.1, 0.0, -0.1, 0.0],
            [-0.1, 0.1, 0.0, 0.0],
            [0.0, -0.1, 0.1, 0.1],
            [0.1, 0.1, 0.0, -0.1],
            [-0.1, 0.0, 0.0, 0.1],
            [0.0, 0.1, -0.1, 0.0],
            [0.1, -0.1, 0.0, 0.0],
            [0.0, 0.0, 0.1, -0.1],
        ];
        let mut out = Vec::new();
        for center in centers {
            for i in 0..per_blob {
                let o = offsets[i % offsets.len()];
                out.push(center.iter().zip(o.iter()).map(|(c, d)| c + d).collect());
            }
        }
        out
    }

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.data.output_dir = dir.to_string_lossy().into_owned();
        cfg.clustering.reduced_dim = 0;
        cfg.ensure_output_dirs().unwrap();
        cfg
    }

    #[test]
    fn search_recovers_three_blobs() {
        let data = blobs(
            &[[10.0, 0.0, 0.0, 0.0], [0.0, 10.0, 0.0, 0.0], [0.0, 0.0, 10.0, 0.0]],
            8,
        );
        let (k, fit) = find_optimal_k(&data, 2, 6, 42);
        assert_eq!(k, 3);
        for blob in 0..3 {
            let first = fit.labels[blob * 8];
            for i in 0..8 {
                assert_eq!(fit.labels[blob * 8 + i], first);
            }
        }
        assert_ne!(fit.labels[0], fit.labels[8]);
        assert_ne!(fit.labels[8], fit.labels[16]);
    }

    #[test]
    fn silhouette_is_high_for_separated_blobs() {
        let data = blobs(&[[10.0, 0.0, 0.0, 0.0], [0.0, 10.0, 0.0, 0.0]], 8);
        let labels: Vec<usize> = (0..16).map(|i| i / 8).collect();
        assert!(silhouette_score(&data, &labels, 2) > 0.8);
    }

    #[test]
    fn tiny_corpus_collapses_to_one_cluster() {
        let data = blobs(&[[1.0, 0.0, 0.0, 0.0]], 3);
        let (k, fit) = find_optimal_k(&data, 2, 10, 42);
        assert_eq!(k, 1);
        assert!(fit.labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn reduction_keeps_row_count_and_is_deterministic() {
        let data = blobs(&[[10.0, 0.0, 0.0, 0.0], [0.0, 10.0, 0.0, 0.0]], 8);
        let a = reduce_dimensions(&data, 2, 42);
        let b = reduce_dimensions(&data, 2, 42);
        assert_eq!(a.len(), data.len());
        assert_eq!(a[0].len(), 2);
        assert_eq!(a, b);
    }

    #[test]
    fn reduction_skips_when_target_covers_dim() {
        let data = blobs(&[[1.0, 0.0, 0.0, 0.0]], 4);
        let out = reduce_dimensions(&data, 4, 42);
        assert_eq!(out, data);
    }

    #[test]
    fn run_writes_artifacts_and_central_representatives() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let docs: Vec<PreprocessedDocument> = (0..16)
            .map(|i| doc(i, &format!("문서 {} 관리비 회의 안건 내용", i)))
            .collect();
        let data = blobs(&[[10.0, 0.0, 0.0, 0.0], [0.0, 10.0, 0.0, 0.0]], 8);
        let out = run(&cfg, &docs, &data).unwrap();
        assert_eq!(out.k, 2);
        assert_eq!(out.assignments.len(), 16);

        for (cluster_id, reps) in &out.representatives {
            assert!(!reps.is_empty());
            for rep in reps {
                assert_eq!(out.assignments[*rep].cluster_id, *cluster_id);
            }
        }

        assert!(dir.path().join("csv/cluster_assignments.csv").exists());
        assert!(dir.path().join("csv/cluster_summary.csv").exists());
        let reps = read_representatives(&cfg).unwrap();
        assert_eq!(reps.len(), 2);
    }

    #[test]
    fn reruns_write_identical_artifacts() {
        let docs: Vec<PreprocessedDocument> = (0..16)
            .map(|i| doc(i, &format!("문서 {} 내용", i)))
            .collect();
        let data = blobs(&[[10.0, 0.0, 0.0, 0.0], [0.0, 10.0, 0.0, 0.0]], 8);
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        run(&test_config(dir_a.path()), &docs, &data).unwrap();
        run(&test_config(dir_b.path()), &docs, &data).unwrap();
        let a = std::fs::read(dir_a.path().join("csv/cluster_assignments.csv")).unwrap();
        let b = std::fs::read(dir_b.path().join("csv/cluster_assignments.csv")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_still_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let out = run(&cfg, &[], &[]).unwrap();
        assert_eq!(out.k, 0);
        assert!(dir.path().join("csv/representative_indices.json").exists());
    }
}
