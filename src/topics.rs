use crate::config::AppConfig;
use crate::models::{self, excerpt, PreprocessedDocument, TopicAssignment, TopicSummaryRow, TopicTermRow};
use crate::vectorize::{self, Vocabulary};
use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const ALPHA: f64 = 0.1;
const BETA: f64 = 0.01;
const TRAIN_ITERS: usize = 100;
const SEARCH_ITERS: usize = 30;
const EPS: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct TopicModelOutput {
    pub n_topics: usize,
    pub assignments: Vec<TopicAssignment>,
    pub top_terms: Vec<Vec<(String, f64)>>,
    pub topic_names: Vec<String>,
}

impl TopicModelOutput {
    fn empty() -> Self {
        Self {
            n_topics: 0,
            assignments: Vec::new(),
            top_terms: Vec::new(),
            topic_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopicDocumentRow {
    document_id: usize,
    record_id: String,
    date: String,
    category: String,
    submitter: String,
    confidence: f64,
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AllTopicDocumentRow {
    topic_id: usize,
    topic_name: String,
    document_id: usize,
    record_id: String,
    date: String,
    category: String,
    submitter: String,
    confidence: f64,
    text: String,
}

#[derive(Clone, Copy)]
enum Algorithm {
    Lda,
    Nmf,
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name {
        "lda" => Ok(Algorithm::Lda),
        "nmf" => Ok(Algorithm::Nmf),
        other => bail!("Unknown topic algorithm '{}', expected 'lda' or 'nmf'", other),
    }
}

/// Discover topics over the cleaned corpus and write every topic artifact
/// under csv/. The assignment pass is deterministic, so reruns on the same
/// input reproduce the same files.
pub fn run(cfg: &AppConfig, docs: &[PreprocessedDocument]) -> Result<TopicModelOutput> {
    let stage_start = std::time::Instant::now();
    let algo = parse_algorithm(&cfg.topics.algorithm)?;

    if docs.is_empty() {
        warn!("No documents available for topic discovery, writing empty artifacts");
        let output = TopicModelOutput::empty();
        write_artifacts(cfg, docs, &output)?;
        return Ok(output);
    }

    let tokenized: Vec<Vec<String>> = docs
        .iter()
        .map(|d| vectorize::with_bigrams(&vectorize::tokenize(&d.cleaned_text)))
        .collect();
    let mut vocab = Vocabulary::build(&tokenized, cfg.topics.min_df, cfg.topics.max_df);
    if vocab.is_empty() {
        debug!("Vocabulary empty under df bounds, relaxing to min_df=1");
        vocab = Vocabulary::build(&tokenized, 1, 1.0);
    }
    if vocab.is_empty() {
        warn!("No usable terms in corpus, writing empty artifacts");
        let output = TopicModelOutput::empty();
        write_artifacts(cfg, docs, &output)?;
        return Ok(output);
    }

    let corpus: Vec<Vec<usize>> = tokenized.iter().map(|t| vocab.term_ids(t)).collect();
    let counts: Vec<Vec<(usize, f64)>> = tokenized.iter().map(|t| vocab.term_counts(t)).collect();
    let tfidf = build_tfidf(&counts, &vocab);

    let n_topics = choose_n_topics(cfg, algo, &corpus, &tfidf, vocab.len());
    info!(
        "Fitting {} model - topics={}, terms={}, documents={}",
        cfg.topics.algorithm,
        n_topics,
        vocab.len(),
        docs.len()
    );

    let model = fit(algo, &corpus, &tfidf, vocab.len(), n_topics, TRAIN_ITERS, cfg.seed);
    let top_terms = top_terms(model.rows(), &vocab, cfg.topics.top_terms_per_topic);
    let topic_names: Vec<String> = top_terms
        .iter()
        .enumerate()
        .map(|(i, terms)| topic_name(i, terms))
        .collect();

    let assignments = assign_documents(docs, &corpus, &tfidf, &model, &topic_names);
    let output = TopicModelOutput {
        n_topics,
        assignments,
        top_terms,
        topic_names,
    };
    write_artifacts(cfg, docs, &output)?;

    let elapsed = stage_start.elapsed();
    info!(
        "Topic discovery completed - duration={:.2}s, topics={}, documents={}",
        elapsed.as_secs_f32(),
        output.n_topics,
        docs.len()
    );
    Ok(output)
}

pub fn read_assignments(cfg: &AppConfig) -> Result<Vec<TopicAssignment>> {
    let path = cfg.csv_dir().join("topic_assignments.csv");
    models::read_csv(&path)
        .with_context(|| format!("Missing {}, run the topics stage first", path.display()))
}

pub fn read_summary(cfg: &AppConfig) -> Result<Vec<TopicSummaryRow>> {
    let path = cfg.csv_dir().join("topic_summary.csv");
    models::read_csv(&path)
        .with_context(|| format!("Missing {}, run the topics stage first", path.display()))
}

fn build_tfidf(counts: &[Vec<(usize, f64)>], vocab: &Vocabulary) -> Vec<Vec<(usize, f64)>> {
    let n = vocab.n_docs.max(1) as f64;
    counts
        .iter()
        .map(|row| {
            let mut out: Vec<(usize, f64)> = row
                .iter()
                .map(|&(id, tf)| {
                    let idf = ((1.0 + n) / (1.0 + vocab.doc_freq[id] as f64)).ln() + 1.0;
                    (id, tf * idf)
                })
                .collect();
            let norm = out.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (_, v) in out.iter_mut() {
                    *v /= norm;
                }
            }
            out
        })
        .collect()
}

/// Either the configured topic count, or a coherence search over candidate
/// counts. Large corpora search on a seeded sample to keep the candidate
/// fits affordable.
fn choose_n_topics(
    cfg: &AppConfig,
    algo: Algorithm,
    corpus: &[Vec<usize>],
    tfidf: &[Vec<(usize, f64)>],
    vocab_size: usize,
) -> usize {
    let n_docs = corpus.len();
    let fallback = cfg.topics.n_topics.max(1).min(n_docs);
    if !cfg.topics.auto_find_topics {
        return fallback;
    }

    let sampled = cfg.topics.large_scale.enabled && n_docs > cfg.topics.large_scale.sample_size;
    let (search_docs, search_rows, cap) = if sampled {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut idx: Vec<usize> = (0..n_docs).collect();
        idx.shuffle(&mut rng);
        idx.truncate(cfg.topics.large_scale.sample_size);
        idx.sort_unstable();
        info!(
            "Large corpus, searching topic count on a {}-document sample",
            idx.len()
        );
        let d: Vec<Vec<usize>> = idx.iter().map(|&i| corpus[i].clone()).collect();
        let r: Vec<Vec<(usize, f64)>> = idx.iter().map(|&i| tfidf[i].clone()).collect();
        (d, r, cfg.topics.large_scale.max_topics_search)
    } else {
        (corpus.to_vec(), tfidf.to_vec(), cfg.topics.max_topics)
    };

    let upper = cap.min(search_docs.len() / 2);
    if upper < 2 {
        debug!("Corpus too small for a topic-count search, using n_topics={}", fallback);
        return fallback;
    }

    let doc_sets: Vec<BTreeSet<usize>> = search_docs
        .iter()
        .map(|d| d.iter().copied().collect())
        .collect();

    let seed = cfg.seed;
    let scored: Vec<(usize, f64)> = (2..=upper)
        .into_par_iter()
        .map(|k| {
            let model = fit(
                algo,
                &search_docs,
                &search_rows,
                vocab_size,
                k,
                SEARCH_ITERS,
                seed.wrapping_add(k as u64),
            );
            let term_ids = top_term_ids(model.rows(), 10);
            (k, umass_coherence(&term_ids, &doc_sets))
        })
        .collect();

    let mut best = scored[0];
    for &(k, c) in &scored[1..] {
        if c > best.1 {
            best = (k, c);
        }
    }
    info!("Topic-count search selected k={} (coherence {:.3})", best.0, best.1);
    best.0
}

/// UMass coherence over ranked topic terms. Higher is better; pairs whose
/// conditioning term never occurs are skipped.
fn umass_coherence(topics: &[Vec<usize>], doc_sets: &[BTreeSet<usize>]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for terms in topics {
        for i in 1..terms.len() {
            for j in 0..i {
                let wi = terms[i];
                let wj = terms[j];
                let d_wj = doc_sets.iter().filter(|s| s.contains(&wj)).count();
                if d_wj == 0 {
                    continue;
                }
                let d_both = doc_sets
                    .iter()
                    .filter(|s| s.contains(&wi) && s.contains(&wj))
                    .count();
                total += ((d_both as f64 + 1.0) / d_wj as f64).ln();
                pairs += 1;
            }
        }
    }
    if pairs == 0 {
        f64::NEG_INFINITY
    } else {
        total / pairs as f64
    }
}

enum FittedModel {
    Lda(LdaModel),
    Nmf(NmfModel),
}

impl FittedModel {
    /// Topic-term weight matrix, one row per topic.
    fn rows(&self) -> &[Vec<f64>] {
        match self {
            FittedModel::Lda(m) => &m.phi,
            FittedModel::Nmf(m) => &m.h,
        }
    }

    fn theta(&self, term_ids: &[usize], tfidf_row: &[(usize, f64)]) -> Vec<f64> {
        match self {
            FittedModel::Lda(m) => m.fold_in(term_ids),
            FittedModel::Nmf(m) => m.transform(tfidf_row),
        }
    }
}

fn fit(
    algo: Algorithm,
    corpus: &[Vec<usize>],
    tfidf: &[Vec<(usize, f64)>],
    vocab_size: usize,
    k: usize,
    iters: usize,
    seed: u64,
) -> FittedModel {
    match algo {
        Algorithm::Lda => FittedModel::Lda(LdaModel::fit(corpus, vocab_size, k, iters, seed)),
        Algorithm::Nmf => FittedModel::Nmf(NmfModel::fit(tfidf, vocab_size, k, iters, seed)),
    }
}

/// Latent Dirichlet Allocation fit by collapsed Gibbs sampling.
struct LdaModel {
    phi: Vec<Vec<f64>>, // [topic][term]
    k: usize,
}

impl LdaModel {
    fn fit(corpus: &[Vec<usize>], vocab_size: usize, k: usize, iters: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut word_topic = vec![vec![0f64; vocab_size]; k];
        let mut doc_topic = vec![vec![0f64; k]; corpus.len()];
        let mut topic_totals = vec![0f64; k];

        let mut assignments: Vec<Vec<usize>> = Vec::with_capacity(corpus.len());
        for (d, doc) in corpus.iter().enumerate() {
            let mut z = Vec::with_capacity(doc.len());
            for &w in doc {
                let t = rng.gen_range(0..k);
                word_topic[t][w] += 1.0;
                doc_topic[d][t] += 1.0;
                topic_totals[t] += 1.0;
                z.push(t);
            }
            assignments.push(z);
        }

        let v = vocab_size as f64;
        let mut weights = vec![0f64; k];
        for iter in 0..iters {
            for (d, doc) in corpus.iter().enumerate() {
                for (i, &w) in doc.iter().enumerate() {
                    let old = assignments[d][i];
                    word_topic[old][w] -= 1.0;
                    doc_topic[d][old] -= 1.0;
                    topic_totals[old] -= 1.0;

                    let mut total = 0.0;
                    for t in 0..k {
                        let p = (doc_topic[d][t] + ALPHA) * (word_topic[t][w] + BETA)
                            / (topic_totals[t] + BETA * v);
                        weights[t] = p;
                        total += p;
                    }
                    let mut r = rng.gen::<f64>() * total;
                    let mut next = k - 1;
                    for t in 0..k {
                        if r < weights[t] {
                            next = t;
                            break;
                        }
                        r -= weights[t];
                    }

                    word_topic[next][w] += 1.0;
                    doc_topic[d][next] += 1.0;
                    topic_totals[next] += 1.0;
                    assignments[d][i] = next;
                }
            }
            if (iter + 1) % 25 == 0 {
                debug!("Gibbs sweep {}/{}", iter + 1, iters);
            }
        }

        let phi = word_topic
            .iter()
            .enumerate()
            .map(|(t, row)| {
                let denom = topic_totals[t] + BETA * v;
                row.iter().map(|c| (c + BETA) / denom).collect()
            })
            .collect();
        Self { phi, k }
    }

    /// Deterministic fold-in for one document: each token contributes its
    /// normalized topic affinity, smoothed by the Dirichlet prior.
    fn fold_in(&self, doc: &[usize]) -> Vec<f64> {
        let mut soft = vec![0f64; self.k];
        let mut used = 0f64;
        for &w in doc {
            let affinities: Vec<f64> = (0..self.k).map(|t| self.phi[t][w]).collect();
            let sum: f64 = affinities.iter().sum();
            if sum <= 0.0 {
                continue;
            }
            for (t, a) in affinities.iter().enumerate() {
                soft[t] += a / sum;
            }
            used += 1.0;
        }
        let denom = used + self.k as f64 * ALPHA;
        soft.iter().map(|c| (c + ALPHA) / denom).collect()
    }
}

/// Non-negative matrix factorization of the TF-IDF matrix, multiplicative
/// updates.
struct NmfModel {
    h: Vec<Vec<f64>>,   // [topic][term]
    hht: Vec<Vec<f64>>, // [topic][topic], cached for transforms
    k: usize,
}

impl NmfModel {
    fn fit(tfidf: &[Vec<(usize, f64)>], vocab_size: usize, k: usize, iters: usize, seed: u64) -> Self {
        let n_docs = tfidf.len();
        let total: f64 = tfidf.iter().flat_map(|r| r.iter().map(|&(_, v)| v)).sum();
        let mean = total / (n_docs.max(1) * vocab_size.max(1)) as f64;
        let scale = (mean / k as f64).sqrt().max(EPS);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut w: Vec<Vec<f64>> = (0..n_docs)
            .map(|_| (0..k).map(|_| rng.gen::<f64>() * scale + EPS).collect())
            .collect();
        let mut h: Vec<Vec<f64>> = (0..k)
            .map(|_| (0..vocab_size).map(|_| rng.gen::<f64>() * scale + EPS).collect())
            .collect();

        for _ in 0..iters {
            // H <- H * (WtV) / (WtW H)
            let mut wtw = vec![vec![0f64; k]; k];
            for row in &w {
                for a in 0..k {
                    for b in 0..k {
                        wtw[a][b] += row[a] * row[b];
                    }
                }
            }
            let mut wtv = vec![vec![0f64; vocab_size]; k];
            for (d, row) in tfidf.iter().enumerate() {
                for &(j, v) in row {
                    for t in 0..k {
                        wtv[t][j] += w[d][t] * v;
                    }
                }
            }
            for t in 0..k {
                for j in 0..vocab_size {
                    let mut den = 0.0;
                    for s in 0..k {
                        den += wtw[t][s] * h[s][j];
                    }
                    h[t][j] *= wtv[t][j] / (den + EPS);
                }
            }

            // W <- W * (VHt) / (W HHt)
            let hht = gram(&h, k);
            for (d, row) in tfidf.iter().enumerate() {
                let mut num = vec![0f64; k];
                for &(j, v) in row {
                    for t in 0..k {
                        num[t] += v * h[t][j];
                    }
                }
                for t in 0..k {
                    let mut den = 0.0;
                    for s in 0..k {
                        den += w[d][s] * hht[s][t];
                    }
                    w[d][t] *= num[t] / (den + EPS);
                }
            }
        }

        let hht = gram(&h, k);
        Self { h, hht, k }
    }

    /// Project one TF-IDF row onto the fitted components with H held fixed,
    /// then normalize to a topic distribution. The uniform start makes the
    /// result deterministic.
    fn transform(&self, row: &[(usize, f64)]) -> Vec<f64> {
        let mut wrow = vec![1.0 / self.k as f64; self.k];
        let mut num = vec![0f64; self.k];
        for &(j, v) in row {
            for t in 0..self.k {
                num[t] += v * self.h[t][j];
            }
        }
        for _ in 0..30 {
            for t in 0..self.k {
                let mut den = 0.0;
                for s in 0..self.k {
                    den += wrow[s] * self.hht[s][t];
                }
                wrow[t] *= num[t] / (den + EPS);
            }
        }
        let sum: f64 = wrow.iter().sum();
        if sum > 0.0 {
            wrow.iter().map(|x| x / sum).collect()
        } else {
            vec![1.0 / self.k as f64; self.k]
        }
    }
}

fn gram(h: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0f64; k]; k];
    for a in 0..k {
        for b in 0..k {
            out[a][b] = h[a].iter().zip(h[b].iter()).map(|(x, y)| x * y).sum();
        }
    }
    out
}

fn top_terms(rows: &[Vec<f64>], vocab: &Vocabulary, n: usize) -> Vec<Vec<(String, f64)>> {
    rows.iter()
        .map(|row| {
            let mut indexed: Vec<(usize, f64)> =
                row.iter().copied().enumerate().collect();
            indexed.sort_by(|a, b| {
                b.1.total_cmp(&a.1)
                    .then_with(|| vocab.terms[a.0].cmp(&vocab.terms[b.0]))
            });
            indexed
                .into_iter()
                .take(n)
                .map(|(id, score)| (vocab.terms[id].clone(), score))
                .collect()
        })
        .collect()
}

fn top_term_ids(rows: &[Vec<f64>], n: usize) -> Vec<Vec<usize>> {
    rows.iter()
        .map(|row| {
            let mut indexed: Vec<(usize, f64)> =
                row.iter().copied().enumerate().collect();
            indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            indexed.into_iter().take(n).map(|(id, _)| id).collect()
        })
        .collect()
}

/// Topic label from its strongest single-word terms, slash-joined.
fn topic_name(topic_id: usize, terms: &[(String, f64)]) -> String {
    let mut parts: Vec<&str> = terms
        .iter()
        .map(|(t, _)| t.as_str())
        .filter(|t| !t.contains(' '))
        .take(3)
        .collect();
    if parts.is_empty() {
        parts = terms.iter().map(|(t, _)| t.as_str()).take(3).collect();
    }
    if parts.is_empty() {
        return format!("topic_{}", topic_id + 1);
    }
    parts.join("/")
}

/// File-system safe form of a topic name for per-topic CSV names.
fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .take(40)
        .collect()
}

fn assign_documents(
    docs: &[PreprocessedDocument],
    corpus: &[Vec<usize>],
    tfidf: &[Vec<(usize, f64)>],
    model: &FittedModel,
    topic_names: &[String],
) -> Vec<TopicAssignment> {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| {
            let theta = model.theta(&corpus[i], &tfidf[i]);
            let mut topic_id = 0;
            for (t, p) in theta.iter().enumerate() {
                if *p > theta[topic_id] {
                    topic_id = t;
                }
            }
            TopicAssignment {
                document_id: doc.document_id,
                topic_id,
                topic_name: topic_names[topic_id].clone(),
                confidence: theta[topic_id],
                text: excerpt(&doc.cleaned_text, 100),
            }
        })
        .collect()
}

fn write_artifacts(
    cfg: &AppConfig,
    docs: &[PreprocessedDocument],
    output: &TopicModelOutput,
) -> Result<()> {
    let csv_dir = cfg.csv_dir();

    let mut term_rows: Vec<TopicTermRow> = Vec::new();
    for (topic_id, terms) in output.top_terms.iter().enumerate() {
        for (rank, (term, score)) in terms.iter().enumerate() {
            term_rows.push(TopicTermRow {
                topic_id,
                topic_name: output.topic_names[topic_id].clone(),
                rank: rank + 1,
                term: term.clone(),
                score: *score,
            });
        }
    }
    let path = csv_dir.join("topic_top_terms.csv");
    models::write_csv(&path, &term_rows)?;
    debug!("Wrote {}", path.display());

    let path = csv_dir.join("topic_assignments.csv");
    models::write_csv(&path, &output.assignments)?;
    debug!("Wrote {}", path.display());

    let mut summary_rows: Vec<TopicSummaryRow> = Vec::new();
    for topic_id in 0..output.n_topics {
        let confidences: Vec<f64> = output
            .assignments
            .iter()
            .filter(|a| a.topic_id == topic_id)
            .map(|a| a.confidence)
            .collect();
        let count = confidences.len();
        let avg = if count == 0 {
            0.0
        } else {
            confidences.iter().sum::<f64>() / count as f64
        };
        let top: Vec<&str> = output.top_terms[topic_id]
            .iter()
            .take(5)
            .map(|(t, _)| t.as_str())
            .collect();
        summary_rows.push(TopicSummaryRow {
            topic_id,
            topic_name: output.topic_names[topic_id].clone(),
            document_count: count,
            avg_confidence: avg,
            top_terms: top.join("/"),
        });
    }
    let path = csv_dir.join("topic_summary.csv");
    models::write_csv(&path, &summary_rows)?;
    debug!("Wrote {}", path.display());

    let mut all_rows: Vec<AllTopicDocumentRow> = Vec::new();
    for topic_id in 0..output.n_topics {
        let doc_rows: Vec<TopicDocumentRow> = output
            .assignments
            .iter()
            .filter(|a| a.topic_id == topic_id)
            .map(|a| {
                let doc = &docs[a.document_id];
                TopicDocumentRow {
                    document_id: a.document_id,
                    record_id: doc.record_id.clone(),
                    date: doc.date.clone(),
                    category: doc.category.clone(),
                    submitter: doc.submitter.clone(),
                    confidence: a.confidence,
                    text: excerpt(&doc.merged_text, 300),
                }
            })
            .collect();
        let name = safe_file_name(&output.topic_names[topic_id]);
        let path = csv_dir.join(format!("topic_{}_{}_documents.csv", topic_id, name));
        models::write_csv(&path, &doc_rows)?;
        for row in doc_rows {
            all_rows.push(AllTopicDocumentRow {
                topic_id,
                topic_name: output.topic_names[topic_id].clone(),
                document_id: row.document_id,
                record_id: row.record_id,
                date: row.date,
                category: row.category,
                submitter: row.submitter,
                confidence: row.confidence,
                text: row.text,
            });
        }
    }
    let path = csv_dir.join("all_topic_documents.csv");
    models::write_csv(&path, &all_rows)?;
    debug!("Wrote {}", path.display());

    Ok(())
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

    fn bimodal_docs() -> Vec<PreprocessedDocument> {
        let fees = [
            "관리비 인상 고지 관리비 부과 기준 인상 반대",
            "관리비 인상 내역 공개 관리비 부과 명세 확인",
            "관리비 부과 기준 인상 사유 고지 요구",
            "관리비 인상 반대 서명 부과 명세 공개",
            "관리비 고지 오류 부과 금액 인상 확인",
            "관리비 인상 공고 부과 기준 명세 공개",
            "관리비 부과 내역 인상 사유 공개 요구",
            "관리비 인상 고지 부과 명세 반대 서명",
        ];
        let leaks = [
            "주차장 누수 보수 공사 일정 주차장 방수",
            "주차장 천장 누수 방수 공사 보수 요청",
            "주차장 누수 공사 지연 방수 보수 일정",
            "주차장 방수 보수 공사 누수 재발 신고",
            "주차장 누수 방수 공사 일정 보수 문의",
            "주차장 보수 공사 누수 방수 일정 공지",
            "주차장 누수 신고 방수 보수 공사 접수",
            "주차장 공사 일정 누수 방수 보수 안내",
        ];
        fees.iter()
            .chain(leaks.iter())
            .enumerate()
            .map(|(i, t)| doc(i, t))
            .collect()
    }

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.data.output_dir = dir.to_string_lossy().into_owned();
        cfg.topics.auto_find_topics = false;
        cfg.topics.n_topics = 2;
        cfg.ensure_output_dirs().unwrap();
        cfg
    }

    fn majority_topic(assignments: &[TopicAssignment], ids: std::ops::Range<usize>) -> usize {
        let mut counts = std::collections::HashMap::new();
        for a in assignments.iter().filter(|a| ids.contains(&a.document_id)) {
            *counts.entry(a.topic_id).or_insert(0usize) += 1;
        }
        counts.into_iter().max_by_key(|&(_, c)| c).map(|(t, _)| t).unwrap()
    }

    #[test]
    fn lda_separates_distinct_subjects() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let docs = bimodal_docs();
        let out = run(&cfg, &docs).unwrap();
        assert_eq!(out.n_topics, 2);
        assert_eq!(out.assignments.len(), docs.len());
        assert_ne!(
            majority_topic(&out.assignments, 0..8),
            majority_topic(&out.assignments, 8..16)
        );
        assert!(dir.path().join("csv/topic_assignments.csv").exists());
        assert!(dir.path().join("csv/topic_summary.csv").exists());
        assert!(dir.path().join("csv/all_topic_documents.csv").exists());
    }

    #[test]
    fn reruns_are_deterministic() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let docs = bimodal_docs();
        let out_a = run(&test_config(dir_a.path()), &docs).unwrap();
        let out_b = run(&test_config(dir_b.path()), &docs).unwrap();
        assert_eq!(out_a.topic_names, out_b.topic_names);
        let ids_a: Vec<usize> = out_a.assignments.iter().map(|a| a.topic_id).collect();
        let ids_b: Vec<usize> = out_b.assignments.iter().map(|a| a.topic_id).collect();
        assert_eq!(ids_a, ids_b);
        let csv_a = std::fs::read(dir_a.path().join("csv/topic_assignments.csv")).unwrap();
        let csv_b = std::fs::read(dir_b.path().join("csv/topic_assignments.csv")).unwrap();
        assert_eq!(csv_a, csv_b);
    }

    #[test]
    fn nmf_produces_full_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.topics.algorithm = "nmf".into();
        let docs = bimodal_docs();
        let out = run(&cfg, &docs).unwrap();
        assert_eq!(out.n_topics, 2);
        assert_eq!(out.assignments.len(), docs.len());
        for a in &out.assignments {
            assert!(a.confidence > 0.0 && a.confidence <= 1.0);
        }
        for terms in &out.top_terms {
            assert!(!terms.is_empty());
        }
    }

    #[test]
    fn auto_search_stays_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.topics.auto_find_topics = true;
        cfg.topics.max_topics = 5;
        let out = run(&cfg, &bimodal_docs()).unwrap();
        assert!(out.n_topics >= 2 && out.n_topics <= 5);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.topics.algorithm = "lsa".into();
        let err = run(&cfg, &bimodal_docs()).unwrap_err();
        assert!(err.to_string().contains("lsa"));
    }

    #[test]
    fn empty_corpus_writes_empty_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let out = run(&cfg, &[]).unwrap();
        assert_eq!(out.n_topics, 0);
        assert!(dir.path().join("csv/topic_assignments.csv").exists());
    }

    #[test]
    fn topic_names_prefer_single_word_terms() {
        let terms = vec![
            ("관리비 인상".to_string(), 0.9),
            ("관리비".to_string(), 0.8),
            ("인상".to_string(), 0.7),
            ("고지".to_string(), 0.6),
        ];
        assert_eq!(topic_name(0, &terms), "관리비/인상/고지");
        assert_eq!(topic_name(3, &[]), "topic_4");
    }

    #[test]
    fn safe_file_names_replace_separators() {
        assert_eq!(safe_file_name("관리비/인상 외"), "관리비_인상_외");
    }
}
