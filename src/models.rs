use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the source table, after header recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub record_id: String, // serial-number column, kept verbatim
    pub date: String,
    pub category: String,
    pub summary: String,
    pub submitter: String,
    pub body: String,
}

/// A record that survived cleaning, the length filter, and deduplication.
/// `document_id` is the 0-based position in the surviving set and is the id
/// every downstream artifact refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessedDocument {
    pub document_id: usize,
    pub record_id: String,
    pub date: String,
    pub category: String,
    pub submitter: String,
    pub summary: String,
    pub merged_text: String,
    pub cleaned_text: String,
    pub text_length: usize,
    pub dedup_key: String, // xxh3 of cleaned_text, hex
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub document_id: usize,
    pub topic_id: usize,
    pub topic_name: String,
    pub confidence: f64,
    pub text: String, // excerpt, capped at 100 chars
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicTermRow {
    pub topic_id: usize,
    pub topic_name: String,
    pub rank: usize,
    pub term: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummaryRow {
    pub topic_id: usize,
    pub topic_name: String,
    pub document_count: usize,
    pub avg_confidence: f64,
    pub top_terms: String, // top terms joined with '/'
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterAssignmentRow {
    pub document_id: usize,
    pub cluster_id: usize,
    pub cluster_name: String,
    pub similarity: f64, // cosine to the cluster centroid
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummaryRow {
    pub cluster_id: usize,
    pub cluster_name: String,
    pub document_count: usize,
    pub avg_similarity: f64,
    pub representative_text: String,
    pub sample_texts: String, // up to 3 excerpts joined with ' | '
}

/// Aggregate written to reports/final_statistics.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStatistics {
    pub total_documents: usize,
    pub total_topics: usize,
    pub total_clusters: usize,
    pub analysis_summary: BTreeMap<String, ClusterDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDigest {
    pub document_count: usize,
    pub main_cause: String,
    pub policy_improvement: String,
}

/// Truncate to `max` chars with an ellipsis, the excerpt form used across
/// the CSV artifacts.
pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Counting label for a free-text field; blank values share one bucket.
pub fn label_or_missing(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        "미기재".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Serialize rows into a CSV artifact. Zero rows still produce the file so
/// a rerun of a later stage finds it.
pub fn write_csv<P: AsRef<Path>, T: Serialize>(path: P, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.with_context(|| format!("Malformed row in {}", path.display()))?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_roundtrip_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let rows = vec![TopicTermRow {
            topic_id: 0,
            topic_name: "관리비/인상".into(),
            rank: 1,
            term: "관리비".into(),
            score: 0.42,
        }];
        write_csv(&path, &rows).unwrap();
        let back: Vec<TopicTermRow> = read_csv(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].term, "관리비");
    }

    #[test]
    fn excerpt_keeps_short_text() {
        assert_eq!(excerpt("짧은 글", 100), "짧은 글");
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "가".repeat(150);
        let e = excerpt(&long, 100);
        assert!(e.ends_with("..."));
        assert_eq!(e.chars().count(), 103);
    }
}
