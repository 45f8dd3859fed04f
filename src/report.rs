use anyhow::Result;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::analyze;
use crate::cluster;
use crate::config::AppConfig;
use crate::insights::{self, PolicyInsights};
use crate::models::{
    ClusterDigest, ClusterSummaryRow, FinalStatistics, PreprocessedDocument, TopicSummaryRow,
};
use crate::out_models::ClusterAnalysis;
use crate::preprocess;
use crate::topics;
use crate::viz;

/// Render the Markdown report and the final statistics from whatever
/// artifacts earlier stages have produced. Missing artifacts degrade the
/// report instead of failing it.
pub fn run(cfg: &AppConfig) -> Result<PathBuf> {
    let stage_start = std::time::Instant::now();

    let docs = read_or_empty("preprocessed documents", || preprocess::read_preprocessed(cfg));
    let topic_summary = read_or_empty("topic summary", || topics::read_summary(cfg));
    let topic_assignments = read_or_empty("topic assignments", || topics::read_assignments(cfg));
    let cluster_summary = read_or_empty("cluster summary", || cluster::read_summary(cfg));
    let analyses = read_or_empty("cluster analyses", || analyze::read_results(cfg));
    let insights = match insights::read_insights(cfg) {
        Ok(found) => found,
        Err(err) => {
            warn!("No policy insights for the report - {}", err);
            PolicyInsights::default()
        }
    };

    let viz_files = viz::write_all(cfg, &docs, &topic_summary, &topic_assignments, &cluster_summary)?;

    let markdown = render_markdown(
        cfg,
        &docs,
        &topic_summary,
        &cluster_summary,
        &analyses,
        &insights,
        &viz_files,
    );
    let report_path = cfg.reports_dir().join("analysis_report.md");
    std::fs::write(&report_path, &markdown)?;
    debug!("Wrote {}", report_path.display());

    let stats = build_statistics(&docs, &topic_summary, &cluster_summary, &analyses);
    viz::write_json(cfg.reports_dir().join("final_statistics.json"), &stats)?;

    let elapsed = stage_start.elapsed();
    info!(
        "Report generation completed - duration={:.2}s, visualizations={}",
        elapsed.as_secs_f32(),
        viz_files.len()
    );
    Ok(report_path)
}

fn read_or_empty<T, F>(what: &str, read: F) -> Vec<T>
where
    F: FnOnce() -> Result<Vec<T>>,
{
    match read() {
        Ok(rows) => rows,
        Err(err) => {
            warn!("No {} for the report - {}", what, err);
            Vec::new()
        }
    }
}

fn render_markdown(
    cfg: &AppConfig,
    docs: &[PreprocessedDocument],
    topic_summary: &[TopicSummaryRow],
    cluster_summary: &[ClusterSummaryRow],
    analyses: &[ClusterAnalysis],
    insights: &PolicyInsights,
    viz_files: &[PathBuf],
) -> String {
    let mut out = String::new();

    out.push_str("# Counseling Records Analysis Report\n\n");
    out.push_str(&format!("Generated: {}\n\n", Local::now().format("%Y-%m-%d %H:%M")));

    out.push_str("## Overview\n\n");
    out.push_str(&format!("- Documents analyzed: {}\n", docs.len()));
    out.push_str(&format!("- Topics discovered: {}\n", topic_summary.len()));
    out.push_str(&format!("- Clusters formed: {}\n", cluster_summary.len()));
    out.push_str(&format!("- Clusters with LLM analysis: {}\n\n", analyses.len()));
    out.push_str(&format!(
        "Topics were discovered with {} over the preprocessed corpus. Documents were grouped by {} clustering of {} embeddings, and cluster representatives were reviewed with the {} model.\n\n",
        cfg.topics.algorithm.to_uppercase(),
        cfg.clustering.algorithm,
        cfg.clustering.embedding_model,
        cfg.llm.model,
    ));

    if !topic_summary.is_empty() {
        out.push_str("## Topic Distribution\n\n");
        out.push_str("| Topic | Documents | Avg confidence | Top terms |\n");
        out.push_str("|---|---|---|---|\n");
        for topic in topic_summary {
            out.push_str(&format!(
                "| {} | {} | {:.3} | {} |\n",
                topic.topic_name, topic.document_count, topic.avg_confidence, topic.top_terms
            ));
        }
        out.push('\n');
    }

    if !cluster_summary.is_empty() {
        out.push_str("## Clusters\n\n");
        out.push_str("| Cluster | Documents | Avg similarity |\n");
        out.push_str("|---|---|---|\n");
        for cluster in cluster_summary {
            out.push_str(&format!(
                "| {} | {} | {:.3} |\n",
                cluster.cluster_name, cluster.document_count, cluster.avg_similarity
            ));
        }
        out.push('\n');

        let analysis_by_id: BTreeMap<usize, &ClusterAnalysis> =
            analyses.iter().map(|a| (a.cluster_id, a)).collect();
        for cluster in cluster_summary {
            out.push_str(&format!("### {}\n\n", cluster.cluster_name));
            if !cluster.representative_text.is_empty() {
                out.push_str(&format!("Representative: {}\n\n", cluster.representative_text));
            }
            if let Some(analysis) = analysis_by_id.get(&cluster.cluster_id) {
                let summary = &analysis.summary;
                out.push_str(&format!("- Main cause: {}\n", summary.main_cause));
                if !summary.main_actors.is_empty() {
                    out.push_str(&format!("- Main actors: {}\n", summary.main_actors.join(", ")));
                }
                if !summary.common_demands.is_empty() {
                    out.push_str(&format!(
                        "- Common demands: {}\n",
                        summary.common_demands.join(", ")
                    ));
                }
                out.push_str(&format!("- Overall tone: {}\n", summary.overall_tone));
                if !summary.main_risks.is_empty() {
                    out.push_str(&format!("- Main risks: {}\n", summary.main_risks.join(", ")));
                }
                out.push_str(&format!(
                    "- Resolution priority: {}\n",
                    summary.resolution_priority
                ));
                if !summary.policy_improvements.is_empty() {
                    out.push_str(&format!(
                        "- Policy improvements: {}\n",
                        summary.policy_improvements.join(", ")
                    ));
                }
                out.push('\n');
            }
        }
    }

    let insight_sections: [(&str, &Vec<crate::insights::InsightItem>); 5] = [
        ("FAQ Candidates", &insights.faq_suggestions),
        ("Education Materials", &insights.education_materials),
        ("Regulation Improvements", &insights.regulation_improvements),
        ("Risk Management", &insights.risk_management),
        ("Priority Actions", &insights.priority_actions),
    ];
    if insight_sections.iter().any(|(_, items)| !items.is_empty()) {
        out.push_str("## Policy Insights\n\n");
        for (title, items) in insight_sections {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("### {}\n\n", title));
            for item in items.iter().take(3) {
                out.push_str(&format!("- **{}**: {}\n", item.title, item.detail));
            }
            out.push('\n');
        }
    }

    if !viz_files.is_empty() {
        out.push_str("## Visualizations\n\n");
        let base = cfg.output_dir();
        for path in viz_files {
            let shown = path.strip_prefix(&base).unwrap_or(path);
            out.push_str(&format!("- {}\n", shown.display()));
        }
        out.push('\n');
    }

    out.push_str("*Generated automatically by the analysis pipeline.*\n");
    out
}

fn build_statistics(
    docs: &[PreprocessedDocument],
    topic_summary: &[TopicSummaryRow],
    cluster_summary: &[ClusterSummaryRow],
    analyses: &[ClusterAnalysis],
) -> FinalStatistics {
    let analysis_by_id: BTreeMap<usize, &ClusterAnalysis> =
        analyses.iter().map(|a| (a.cluster_id, a)).collect();
    let mut analysis_summary = BTreeMap::new();
    for cluster in cluster_summary {
        let digest = match analysis_by_id.get(&cluster.cluster_id) {
            Some(analysis) => ClusterDigest {
                document_count: cluster.document_count,
                main_cause: analysis.summary.main_cause.clone(),
                policy_improvement: analysis
                    .summary
                    .policy_improvements
                    .first()
                    .cloned()
                    .unwrap_or_default(),
            },
            None => ClusterDigest {
                document_count: cluster.document_count,
                main_cause: String::new(),
                policy_improvement: String::new(),
            },
        };
        analysis_summary.insert(cluster.cluster_name.clone(), digest);
    }
    FinalStatistics {
        total_documents: docs.len(),
        total_topics: topic_summary.len(),
        total_clusters: cluster_summary.len(),
        analysis_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::InsightItem;
    use crate::models::{self, TopicAssignment};
    use crate::out_models::ClusterSummaryAnalysis;
    use xxhash_rust::xxh3::xxh3_64;

    fn doc(id: usize, text: &str) -> PreprocessedDocument {
        PreprocessedDocument {
            document_id: id,
            record_id: format!("{}", id + 1),
            date: "2024-03-02".into(),
            category: "회계".into(),
            submitter: "입주민".into(),
            summary: text.into(),
            merged_text: text.into(),
            cleaned_text: text.into(),
            text_length: text.chars().count(),
            dedup_key: format!("{:016x}", xxh3_64(text.as_bytes())),
        }
    }

    fn seeded_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.data.output_dir = dir.to_string_lossy().into_owned();
        cfg.ensure_output_dirs().unwrap();
        cfg
    }

    #[test]
    fn report_renders_every_section_from_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = seeded_config(dir.path());
        let csv_dir = cfg.csv_dir();

        let docs = vec![
            doc(0, "관리비 인상 내역 공개 요구"),
            doc(1, "주차장 누수 보수 요청"),
            doc(2, "회계 감사 결과 공개 요구"),
        ];
        models::write_csv(csv_dir.join("preprocessed.csv"), &docs).unwrap();
        models::write_csv(
            csv_dir.join("topic_summary.csv"),
            &[TopicSummaryRow {
                topic_id: 0,
                topic_name: "관리비/공개".into(),
                document_count: 3,
                avg_confidence: 0.71,
                top_terms: "관리비/공개/감사".into(),
            }],
        )
        .unwrap();
        let assignments: Vec<TopicAssignment> = docs
            .iter()
            .map(|d| TopicAssignment {
                document_id: d.document_id,
                topic_id: 0,
                topic_name: "관리비/공개".into(),
                confidence: 0.7,
                text: String::new(),
            })
            .collect();
        models::write_csv(csv_dir.join("topic_assignments.csv"), &assignments).unwrap();
        models::write_csv(
            csv_dir.join("cluster_summary.csv"),
            &[ClusterSummaryRow {
                cluster_id: 0,
                cluster_name: "cluster_1".into(),
                document_count: 3,
                avg_similarity: 0.88,
                representative_text: "관리비 인상 내역 공개 요구".into(),
                sample_texts: "관리비 인상 내역 공개 요구".into(),
            }],
        )
        .unwrap();
        let analyses = vec![ClusterAnalysis {
            cluster_id: 0,
            cluster_name: "cluster_1".into(),
            topic_name: "관리비/공개".into(),
            documents: Vec::new(),
            summary: ClusterSummaryAnalysis {
                main_cause: "관리비 산정 근거 미공개".into(),
                resolution_priority: "high".into(),
                policy_improvements: vec!["산정 내역 정기 공개".into()],
                ..ClusterSummaryAnalysis::default()
            },
        }];
        std::fs::write(
            csv_dir.join("analysis_results.json"),
            serde_json::to_vec_pretty(&analyses).unwrap(),
        )
        .unwrap();
        let mut insights = PolicyInsights::default();
        insights.faq_suggestions.push(InsightItem {
            title: "회계".into(),
            detail: "Recurring accounting questions".into(),
            priority: "high".into(),
            evidence_count: 3,
        });
        std::fs::write(
            csv_dir.join("policy_insights.json"),
            serde_json::to_vec_pretty(&insights).unwrap(),
        )
        .unwrap();

        let report_path = run(&cfg).unwrap();
        let text = std::fs::read_to_string(&report_path).unwrap();
        assert!(text.contains("# Counseling Records Analysis Report"));
        assert!(text.contains("- Documents analyzed: 3"));
        assert!(text.contains("## Topic Distribution"));
        assert!(text.contains("| 관리비/공개 | 3 |"));
        assert!(text.contains("### cluster_1"));
        assert!(text.contains("- Main cause: 관리비 산정 근거 미공개"));
        assert!(text.contains("## Policy Insights"));
        assert!(text.contains("### FAQ Candidates"));
        assert!(text.contains("## Visualizations"));
        assert!(text.contains("*Generated automatically by the analysis pipeline.*"));

        let raw = std::fs::read(cfg.reports_dir().join("final_statistics.json")).unwrap();
        let stats: FinalStatistics = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_clusters, 1);
        assert_eq!(
            stats.analysis_summary["cluster_1"].policy_improvement,
            "산정 내역 정기 공개"
        );
    }

    #[test]
    fn report_degrades_when_no_artifacts_exist() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = seeded_config(dir.path());

        let report_path = run(&cfg).unwrap();
        let text = std::fs::read_to_string(&report_path).unwrap();
        assert!(text.contains("- Documents analyzed: 0"));
        assert!(!text.contains("## Topic Distribution"));
        assert!(cfg.reports_dir().join("final_statistics.json").exists());
    }
}
