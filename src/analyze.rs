use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::budget::cap_text;
use crate::cluster;
use crate::config::AppConfig;
use crate::llm::{self, ChatClient};
use crate::models::{self, excerpt, PreprocessedDocument};
use crate::out_models::{
    ClusterAnalysis, ClusterSummaryAnalysis, DocumentAnalysis, DocumentAnalysisRecord,
};
use crate::preprocess;
use crate::prompts;
use crate::topics;

const DOC_PROMPT_TOKENS: usize = 700;
const SUMMARY_PROMPT_TOKENS: usize = 1500;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndividualAnalysisRow {
    cluster_id: usize,
    cluster_name: String,
    document_id: usize,
    excerpt: String,
    cause: String,
    actors: String,
    demands: String,
    tone: String,
    risk: String,
    resolution: String,
    policy_implication: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClusterAnalysisRow {
    cluster_id: usize,
    cluster_name: String,
    topic_name: String,
    document_count: usize,
    main_cause: String,
    main_actors: String,
    common_demands: String,
    overall_tone: String,
    main_risks: String,
    resolution_priority: String,
    policy_improvements: String,
}

/// Analyze each cluster's representative documents with the LLM, then
/// synthesize a cluster-level summary. Clusters are processed serially and
/// every call failure degrades to a placeholder, so a partial run still
/// writes complete artifacts.
pub async fn run(cfg: &AppConfig) -> Result<Vec<ClusterAnalysis>> {
    let stage_start = std::time::Instant::now();
    let docs = preprocess::read_preprocessed(cfg)?;
    let cluster_summaries = cluster::read_summary(cfg)?;
    let memberships = cluster::read_assignments(cfg)?;
    let representatives = cluster::read_representatives(cfg)?;
    let topic_assignments = topics::read_assignments(cfg)?;

    let client = ChatClient::from_env(&cfg.llm)?;
    match &client {
        Some(c) => info!("LLM analysis using model {}", c.model()),
        None => warn!(
            "{} not set - analysis will use placeholder values",
            llm::API_KEY_ENV
        ),
    }

    let doc_by_id: BTreeMap<usize, &PreprocessedDocument> =
        docs.iter().map(|d| (d.document_id, d)).collect();
    let topic_by_doc: BTreeMap<usize, String> = topic_assignments
        .into_iter()
        .map(|a| (a.document_id, a.topic_name))
        .collect();
    let mut members_by_cluster: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for row in &memberships {
        members_by_cluster
            .entry(row.cluster_id)
            .or_default()
            .push(row.document_id);
    }

    let total = cluster_summaries.len();
    let mut results: Vec<ClusterAnalysis> = Vec::with_capacity(total);
    for (i, summary) in cluster_summaries.iter().enumerate() {
        info!(
            "Analyzing cluster {}/{} ({})",
            i + 1,
            total,
            summary.cluster_name
        );
        let member_ids = members_by_cluster
            .get(&summary.cluster_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let topic_name = majority_topic(member_ids, &topic_by_doc);

        let rep_ids = representatives
            .get(&summary.cluster_id)
            .cloned()
            .unwrap_or_default();
        let mut doc_records: Vec<DocumentAnalysisRecord> = Vec::with_capacity(rep_ids.len());
        for doc_id in rep_ids {
            let doc = match doc_by_id.get(&doc_id) {
                Some(d) => *d,
                None => {
                    warn!("Representative document {} not found in preprocessed set", doc_id);
                    continue;
                }
            };
            let analysis = match &client {
                Some(c) => {
                    let text = cap_text(&doc.cleaned_text, DOC_PROMPT_TOKENS);
                    let prompt = prompts::user_document_analysis(&text, &topic_name);
                    match c.complete(&prompts::system_analyst(), &prompt).await {
                        Ok(response) => match llm::extract_json::<DocumentAnalysis>(&response) {
                            Ok(a) => a,
                            Err(e) => {
                                warn!("Document {} analysis unparseable: {:#}", doc_id, e);
                                DocumentAnalysis::failed()
                            }
                        },
                        Err(e) => {
                            warn!("Document {} analysis call failed: {:#}", doc_id, e);
                            DocumentAnalysis::failed()
                        }
                    }
                }
                None => DocumentAnalysis::unavailable(),
            };
            doc_records.push(DocumentAnalysisRecord {
                document_id: doc_id,
                excerpt: excerpt(&doc.cleaned_text, 150),
                analysis,
            });
            if client.is_some() {
                tokio::time::sleep(Duration::from_millis(cfg.llm.request_delay_ms)).await;
            }
        }

        let summary_analysis = match &client {
            Some(c) if !doc_records.is_empty() => {
                let analyses: Vec<&DocumentAnalysis> =
                    doc_records.iter().map(|r| &r.analysis).collect();
                let analyses_json = serde_json::to_string(&analyses)?;
                let prompt = prompts::user_cluster_summary(
                    &summary.cluster_name,
                    &topic_name,
                    &cap_text(&analyses_json, SUMMARY_PROMPT_TOKENS),
                );
                let outcome = match c.complete(&prompts::system_analyst(), &prompt).await {
                    Ok(response) => match llm::extract_json::<ClusterSummaryAnalysis>(&response) {
                        Ok(a) => a,
                        Err(e) => {
                            warn!(
                                "Cluster {} summary unparseable: {:#}",
                                summary.cluster_id, e
                            );
                            ClusterSummaryAnalysis::failed()
                        }
                    },
                    Err(e) => {
                        warn!("Cluster {} summary call failed: {:#}", summary.cluster_id, e);
                        ClusterSummaryAnalysis::failed()
                    }
                };
                tokio::time::sleep(Duration::from_millis(cfg.llm.request_delay_ms)).await;
                outcome
            }
            Some(_) => ClusterSummaryAnalysis::default(),
            None => ClusterSummaryAnalysis::unavailable(),
        };

        results.push(ClusterAnalysis {
            cluster_id: summary.cluster_id,
            cluster_name: summary.cluster_name.clone(),
            topic_name,
            documents: doc_records,
            summary: summary_analysis,
        });
    }

    write_artifacts(cfg, &results)?;

    let elapsed = stage_start.elapsed();
    info!(
        "LLM analysis completed - duration={:.2}s, clusters={}",
        elapsed.as_secs_f32(),
        results.len()
    );
    Ok(results)
}

pub fn read_results(cfg: &AppConfig) -> Result<Vec<ClusterAnalysis>> {
    let path = cfg.csv_dir().join("analysis_results.json");
    let raw = std::fs::read(&path)
        .with_context(|| format!("Missing {}, run the analyze stage first", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Malformed {}", path.display()))
}

/// Most frequent topic name among the member documents; ties go to the
/// lexicographically smaller name.
fn majority_topic(member_ids: &[usize], topic_by_doc: &BTreeMap<usize, String>) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for id in member_ids {
        if let Some(name) = topic_by_doc.get(id) {
            *counts.entry(name.as_str()).or_insert(0) += 1;
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((name, count));
        }
    }
    best.map(|(n, _)| n.to_string())
        .unwrap_or_else(|| "general".to_string())
}

fn join_list(items: &[String]) -> String {
    items.join("; ")
}

fn write_artifacts(cfg: &AppConfig, results: &[ClusterAnalysis]) -> Result<()> {
    let csv_dir = cfg.csv_dir();

    let mut individual_rows: Vec<IndividualAnalysisRow> = Vec::new();
    for cluster in results {
        for record in &cluster.documents {
            individual_rows.push(IndividualAnalysisRow {
                cluster_id: cluster.cluster_id,
                cluster_name: cluster.cluster_name.clone(),
                document_id: record.document_id,
                excerpt: record.excerpt.clone(),
                cause: record.analysis.cause.clone(),
                actors: join_list(&record.analysis.actors),
                demands: join_list(&record.analysis.demands),
                tone: record.analysis.tone.clone(),
                risk: record.analysis.risk.clone(),
                resolution: record.analysis.resolution.clone(),
                policy_implication: record.analysis.policy_implication.clone(),
            });
        }
    }
    let path = csv_dir.join("individual_analyses.csv");
    models::write_csv(&path, &individual_rows)?;
    debug!("Wrote {}", path.display());

    let cluster_rows: Vec<ClusterAnalysisRow> = results
        .iter()
        .map(|c| ClusterAnalysisRow {
            cluster_id: c.cluster_id,
            cluster_name: c.cluster_name.clone(),
            topic_name: c.topic_name.clone(),
            document_count: c.documents.len(),
            main_cause: c.summary.main_cause.clone(),
            main_actors: join_list(&c.summary.main_actors),
            common_demands: join_list(&c.summary.common_demands),
            overall_tone: c.summary.overall_tone.clone(),
            main_risks: join_list(&c.summary.main_risks),
            resolution_priority: c.summary.resolution_priority.clone(),
            policy_improvements: join_list(&c.summary.policy_improvements),
        })
        .collect();
    let path = csv_dir.join("cluster_analyses.csv");
    models::write_csv(&path, &cluster_rows)?;
    debug!("Wrote {}", path.display());

    let path = csv_dir.join("analysis_results.json");
    std::fs::write(&path, serde_json::to_vec_pretty(results)?)?;
    debug!("Wrote {}", path.display());

    Ok(())
}
