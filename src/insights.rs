use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::analyze;
use crate::config::AppConfig;
use crate::models::{self, label_or_missing};
use crate::preprocess;
use crate::vectorize;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NgramRow {
    ngram: String,
    frequency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrequencyRow {
    value: String,
    count: usize,
    share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightItem {
    pub title: String,
    pub detail: String,
    pub priority: String, // high|medium|low
    pub evidence_count: usize,
}

/// Operational suggestions derived from the frequency tables and, when the
/// analyze stage has run, from the cluster risk summaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyInsights {
    pub faq_suggestions: Vec<InsightItem>,
    pub education_materials: Vec<InsightItem>,
    pub regulation_improvements: Vec<InsightItem>,
    pub risk_management: Vec<InsightItem>,
    pub priority_actions: Vec<InsightItem>,
}

/// Mine frequency patterns from the preprocessed corpus: n-gram tables, a
/// submitter-by-category crosstab, and templated policy insights.
pub fn run(cfg: &AppConfig) -> Result<PolicyInsights> {
    let stage_start = std::time::Instant::now();
    let docs = preprocess::read_preprocessed(cfg)?;
    let csv_dir = cfg.csv_dir();

    let mut bigrams: BTreeMap<String, usize> = BTreeMap::new();
    let mut trigrams: BTreeMap<String, usize> = BTreeMap::new();
    for doc in &docs {
        let tokens = vectorize::tokenize(&doc.cleaned_text);
        for gram in vectorize::ngrams(&tokens, 2) {
            *bigrams.entry(gram).or_insert(0) += 1;
        }
        for gram in vectorize::ngrams(&tokens, 3) {
            *trigrams.entry(gram).or_insert(0) += 1;
        }
    }
    write_ngrams(&csv_dir.join("bigram_analysis.csv"), &bigrams)?;
    write_ngrams(&csv_dir.join("trigram_analysis.csv"), &trigrams)?;

    let mut submitter_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut crosstab: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for doc in &docs {
        let submitter = label_or_missing(&doc.submitter);
        let category = label_or_missing(&doc.category);
        *submitter_counts.entry(submitter.clone()).or_insert(0) += 1;
        *category_counts.entry(category.clone()).or_insert(0) += 1;
        *crosstab.entry(submitter).or_default().entry(category).or_insert(0) += 1;
    }
    write_frequency(&csv_dir.join("submitter_frequency.csv"), &submitter_counts, docs.len())?;
    write_frequency(&csv_dir.join("category_frequency.csv"), &category_counts, docs.len())?;
    let categories: BTreeSet<String> = category_counts.keys().cloned().collect();
    write_crosstab(&csv_dir.join("submitter_category_crosstab.csv"), &crosstab, &categories)?;

    let analyses = match analyze::read_results(cfg) {
        Ok(a) => a,
        Err(_) => {
            debug!("No analysis results available, skipping risk insights");
            Vec::new()
        }
    };
    let insights = build_insights(docs.len(), &category_counts, &bigrams, &crosstab, &analyses);

    let path = csv_dir.join("policy_insights.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&insights)?)?;
    debug!("Wrote {}", path.display());
    for (key, items) in [
        ("faq_suggestions", &insights.faq_suggestions),
        ("education_materials", &insights.education_materials),
        ("regulation_improvements", &insights.regulation_improvements),
        ("risk_management", &insights.risk_management),
        ("priority_actions", &insights.priority_actions),
    ] {
        models::write_csv(csv_dir.join(format!("insight_{}.csv", key)), items)?;
    }

    let elapsed = stage_start.elapsed();
    info!(
        "Insight mining completed - duration={:.2}s, bigrams={}, categories={}",
        elapsed.as_secs_f32(),
        bigrams.len(),
        category_counts.len()
    );
    Ok(insights)
}

pub fn read_insights(cfg: &AppConfig) -> Result<PolicyInsights> {
    let path = cfg.csv_dir().join("policy_insights.json");
    let raw = std::fs::read(&path)
        .with_context(|| format!("Missing {}, run the insights stage first", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Malformed {}", path.display()))
}

fn share_priority(share: f64) -> String {
    if share >= 0.15 {
        "high".to_string()
    } else if share >= 0.05 {
        "medium".to_string()
    } else {
        "low".to_string()
    }
}

fn top_counts(counts: &BTreeMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    counts
        .iter()
        .map(|(k, c)| (k.clone(), *c))
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .take(n)
        .collect()
}

fn build_insights(
    n_docs: usize,
    category_counts: &BTreeMap<String, usize>,
    bigrams: &BTreeMap<String, usize>,
    crosstab: &BTreeMap<String, BTreeMap<String, usize>>,
    analyses: &[crate::out_models::ClusterAnalysis],
) -> PolicyInsights {
    let total = n_docs.max(1) as f64;

    let faq_suggestions = top_counts(category_counts, 5)
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(category, count)| InsightItem {
            title: format!("FAQ entry for '{}' inquiries", category),
            detail: format!(
                "'{}' accounts for {} of {} counseling records ({:.1}%); publish a standing FAQ answer for its recurring questions.",
                category,
                count,
                n_docs,
                count as f64 / total * 100.0
            ),
            priority: share_priority(count as f64 / total),
            evidence_count: count,
        })
        .collect();

    let education_materials = top_counts(bigrams, 5)
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(gram, count)| InsightItem {
            title: format!("Resident guide covering '{}'", gram),
            detail: format!(
                "The phrase '{}' recurs {} times across the corpus; a short printed or posted guide would pre-empt repeat inquiries.",
                gram, count
            ),
            priority: share_priority(count as f64 / total),
            evidence_count: count,
        })
        .collect();

    let regulation_improvements = top_counts(category_counts, 3)
        .into_iter()
        .filter(|(_, count)| (*count as f64 / total) >= 0.1)
        .map(|(category, count)| InsightItem {
            title: format!("Review management rules touching '{}'", category),
            detail: format!(
                "'{}' generates {:.1}% of all counseling; its share suggests the current rules or their communication leave room to tighten.",
                category,
                count as f64 / total * 100.0
            ),
            priority: share_priority(count as f64 / total),
            evidence_count: count,
        })
        .collect();

    let risk_management = analyses
        .iter()
        .filter(|a| !a.summary.main_risks.is_empty())
        .map(|a| {
            let lowered = a.summary.resolution_priority.to_lowercase();
            let priority = if lowered.contains("high") || lowered.contains("상") {
                "high".to_string()
            } else {
                "medium".to_string()
            };
            InsightItem {
                title: format!("Risk watch for {}", a.cluster_name),
                detail: a.summary.main_risks.join("; "),
                priority,
                evidence_count: a.documents.len(),
            }
        })
        .collect();

    let mut cells: Vec<(String, String, usize)> = Vec::new();
    for (submitter, row) in crosstab {
        for (category, count) in row {
            cells.push((submitter.clone(), category.clone(), *count));
        }
    }
    cells.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| (&a.0, &a.1).cmp(&(&b.0, &b.1))));
    let priority_actions = cells
        .into_iter()
        .take(3)
        .enumerate()
        .map(|(i, (submitter, category, count))| InsightItem {
            title: format!("Prioritize '{}' cases raised by '{}'", category, submitter),
            detail: format!(
                "{} records combine submitter '{}' with category '{}'; this is the {}largest demand block.",
                count,
                submitter,
                category,
                if i == 0 { "" } else { "next " }
            ),
            priority: if i == 0 { "high".to_string() } else { "medium".to_string() },
            evidence_count: count,
        })
        .collect();

    PolicyInsights {
        faq_suggestions,
        education_materials,
        regulation_improvements,
        risk_management,
        priority_actions,
    }
}

fn write_ngrams(path: &std::path::Path, counts: &BTreeMap<String, usize>) -> Result<()> {
    let mut rows: Vec<NgramRow> = counts
        .iter()
        .map(|(gram, count)| NgramRow {
            ngram: gram.clone(),
            frequency: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.ngram.cmp(&b.ngram)));
    models::write_csv(path, &rows)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn write_frequency(
    path: &std::path::Path,
    counts: &BTreeMap<String, usize>,
    n_docs: usize,
) -> Result<()> {
    let total = n_docs.max(1) as f64;
    let mut rows: Vec<FrequencyRow> = counts
        .iter()
        .map(|(value, count)| FrequencyRow {
            value: value.clone(),
            count: *count,
            share: *count as f64 / total,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    models::write_csv(path, &rows)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Submitter-by-category contingency table with row and column totals.
fn write_crosstab(
    path: &std::path::Path,
    crosstab: &BTreeMap<String, BTreeMap<String, usize>>,
    categories: &BTreeSet<String>,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec!["submitter".to_string()];
    header.extend(categories.iter().cloned());
    header.push("total".to_string());
    writer.write_record(&header)?;

    let mut column_totals: BTreeMap<&String, usize> = BTreeMap::new();
    let mut grand_total = 0usize;
    for (submitter, row) in crosstab {
        let mut record = vec![submitter.clone()];
        let mut row_total = 0usize;
        for category in categories {
            let count = row.get(category).copied().unwrap_or(0);
            row_total += count;
            *column_totals.entry(category).or_insert(0) += count;
            record.push(count.to_string());
        }
        grand_total += row_total;
        record.push(row_total.to_string());
        writer.write_record(&record)?;
    }

    let mut totals = vec!["total".to_string()];
    for category in categories {
        totals.push(column_totals.get(category).copied().unwrap_or(0).to_string());
    }
    totals.push(grand_total.to_string());
    writer.write_record(&totals)?;
    writer.flush()?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PreprocessedDocument;

    fn doc(id: usize, category: &str, submitter: &str, text: &str) -> PreprocessedDocument {
        PreprocessedDocument {
            document_id: id,
            record_id: format!("{}", id + 1),
            date: "2024-01-15".into(),
            category: category.into(),
            submitter: submitter.into(),
            summary: text.into(),
            merged_text: text.into(),
            cleaned_text: text.into(),
            text_length: text.chars().count(),
            dedup_key: String::new(),
        }
    }

    fn seed(cfg: &AppConfig) {
        let docs = vec![
            doc(0, "회계", "입주민", "관리비 인상 내역 공개 요청"),
            doc(1, "회계", "입주민", "관리비 인상 사유 설명 요청"),
            doc(2, "회계", "동대표", "관리비 인상 근거 자료 요청"),
            doc(3, "시설", "입주민", "주차장 누수 보수 요청"),
        ];
        models::write_csv(cfg.csv_dir().join("preprocessed.csv"), &docs).unwrap();
    }

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.data.output_dir = dir.to_string_lossy().into_owned();
        cfg.ensure_output_dirs().unwrap();
        cfg
    }

    #[test]
    fn crosstab_carries_margins() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        seed(&cfg);
        run(&cfg).unwrap();

        let raw =
            std::fs::read_to_string(cfg.csv_dir().join("submitter_category_crosstab.csv")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines[0], "submitter,시설,회계,total");
        assert_eq!(lines[1], "동대표,0,1,1");
        assert_eq!(lines[2], "입주민,1,2,3");
        assert_eq!(lines[3], "total,1,3,4");
    }

    #[test]
    fn bigrams_rank_by_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        seed(&cfg);
        run(&cfg).unwrap();

        let rows: Vec<NgramRow> =
            models::read_csv(cfg.csv_dir().join("bigram_analysis.csv")).unwrap();
        assert_eq!(rows[0].ngram, "관리비 인상");
        assert_eq!(rows[0].frequency, 3);
    }

    #[test]
    fn insights_surface_dominant_category() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        seed(&cfg);
        let insights = run(&cfg).unwrap();

        assert!(!insights.faq_suggestions.is_empty());
        assert!(insights.faq_suggestions[0].title.contains("회계"));
        assert_eq!(insights.faq_suggestions[0].priority, "high");
        assert!(!insights.priority_actions.is_empty());
        assert_eq!(insights.priority_actions[0].evidence_count, 2);

        let reread = read_insights(&cfg).unwrap();
        assert_eq!(reread.faq_suggestions.len(), insights.faq_suggestions.len());
    }

    #[test]
    fn reruns_write_identical_insights() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let cfg_a = test_config(dir_a.path());
        let cfg_b = test_config(dir_b.path());
        seed(&cfg_a);
        seed(&cfg_b);
        run(&cfg_a).unwrap();
        run(&cfg_b).unwrap();
        let a = std::fs::read(cfg_a.csv_dir().join("policy_insights.json")).unwrap();
        let b = std::fs::read(cfg_b.csv_dir().join("policy_insights.json")).unwrap();
        assert_eq!(a, b);
    }
}
