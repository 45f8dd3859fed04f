use anyhow::Result;
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::AppConfig;
use crate::models::{
    label_or_missing, ClusterSummaryRow, PreprocessedDocument, TopicAssignment, TopicSummaryRow,
};
use crate::vectorize;

const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac",
];
const BAR_HEIGHT: usize = 28;
const CHART_WIDTH: usize = 900;
const LABEL_WIDTH: usize = 260;
const CLOUD_WIDTH: usize = 900;
const CLOUD_TERMS: usize = 50;

pub fn write_json<P: AsRef<Path>, T: ?Sized + Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct ChartEntry {
    label: String,
    count: usize,
}

#[derive(Debug, Serialize)]
struct CrosstabData {
    submitters: Vec<String>,
    categories: Vec<String>,
    counts: Vec<Vec<usize>>,
}

/// Numeric series behind every chart, exported alongside the SVGs for
/// anyone rendering their own views.
#[derive(Debug, Serialize)]
struct ChartData {
    topic_distribution: Vec<ChartEntry>,
    cluster_distribution: Vec<ChartEntry>,
    submitter_frequency: Vec<ChartEntry>,
    category_frequency: Vec<ChartEntry>,
    crosstab: CrosstabData,
}

/// Render every visualization under visualizations/ and return the written
/// paths in a stable order.
pub fn write_all(
    cfg: &AppConfig,
    docs: &[PreprocessedDocument],
    topic_summary: &[TopicSummaryRow],
    topic_assignments: &[TopicAssignment],
    cluster_summary: &[ClusterSummaryRow],
) -> Result<Vec<PathBuf>> {
    let viz_dir = cfg.viz_dir();
    let mut written = Vec::new();

    let topic_entries: Vec<ChartEntry> = topic_summary
        .iter()
        .map(|t| ChartEntry {
            label: t.topic_name.clone(),
            count: t.document_count,
        })
        .collect();
    let path = viz_dir.join("topic_distribution.svg");
    std::fs::write(&path, svg_bar_chart("Documents per topic", &topic_entries))?;
    written.push(path);

    let cluster_entries: Vec<ChartEntry> = cluster_summary
        .iter()
        .map(|c| ChartEntry {
            label: c.cluster_name.clone(),
            count: c.document_count,
        })
        .collect();
    let path = viz_dir.join("cluster_distribution.svg");
    std::fs::write(&path, svg_bar_chart("Documents per cluster", &cluster_entries))?;
    written.push(path);

    let mut submitter_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut crosstab: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for doc in docs {
        let submitter = label_or_missing(&doc.submitter);
        let category = label_or_missing(&doc.category);
        *submitter_counts.entry(submitter.clone()).or_insert(0) += 1;
        *category_counts.entry(category.clone()).or_insert(0) += 1;
        *crosstab.entry(submitter).or_default().entry(category).or_insert(0) += 1;
    }
    let submitter_entries = sorted_entries(&submitter_counts);
    let category_entries = sorted_entries(&category_counts);

    let charts_dir = cfg.frequency_charts_dir();
    let path = charts_dir.join("submitter_frequency.svg");
    std::fs::write(&path, svg_bar_chart("Records per submitter type", &submitter_entries))?;
    written.push(path);
    let path = charts_dir.join("category_frequency.svg");
    std::fs::write(&path, svg_bar_chart("Records per category", &category_entries))?;
    written.push(path);

    let submitters: Vec<String> = crosstab.keys().cloned().collect();
    let categories: Vec<String> = category_counts.keys().cloned().collect();
    let matrix: Vec<Vec<usize>> = submitters
        .iter()
        .map(|s| {
            categories
                .iter()
                .map(|c| {
                    crosstab
                        .get(s)
                        .and_then(|row| row.get(c))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        })
        .collect();
    let path = charts_dir.join("crosstab_heatmap.svg");
    std::fs::write(
        &path,
        svg_heatmap("Submitter by category", &submitters, &categories, &matrix),
    )?;
    written.push(path);

    let clouds_dir = cfg.wordclouds_dir();
    let mut overall_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut topic_counts: BTreeMap<usize, BTreeMap<String, usize>> = BTreeMap::new();
    let topic_by_doc: BTreeMap<usize, usize> = topic_assignments
        .iter()
        .map(|a| (a.document_id, a.topic_id))
        .collect();
    for doc in docs {
        for token in vectorize::tokenize(&doc.cleaned_text) {
            *overall_counts.entry(token.clone()).or_insert(0) += 1;
            if let Some(&topic_id) = topic_by_doc.get(&doc.document_id) {
                *topic_counts.entry(topic_id).or_default().entry(token).or_insert(0) += 1;
            }
        }
    }
    for topic in topic_summary {
        let counts = topic_counts.get(&topic.topic_id).cloned().unwrap_or_default();
        let path = clouds_dir.join(format!("topic_{}_wordcloud.svg", topic.topic_id));
        std::fs::write(&path, svg_word_cloud(&topic.topic_name, &counts))?;
        written.push(path);
    }
    let path = clouds_dir.join("overall_wordcloud.svg");
    std::fs::write(&path, svg_word_cloud("All documents", &overall_counts))?;
    written.push(path);

    let data = ChartData {
        topic_distribution: topic_entries,
        cluster_distribution: cluster_entries,
        submitter_frequency: submitter_entries,
        category_frequency: category_entries,
        crosstab: CrosstabData {
            submitters,
            categories,
            counts: matrix,
        },
    };
    let path = viz_dir.join("chart_data.json");
    write_json(&path, &data)?;
    written.push(path);

    Ok(written)
}

fn sorted_entries(counts: &BTreeMap<String, usize>) -> Vec<ChartEntry> {
    counts
        .iter()
        .map(|(label, count)| ChartEntry {
            label: label.clone(),
            count: *count,
        })
        .sorted_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)))
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Horizontal bar chart, one row per entry.
fn svg_bar_chart(title: &str, entries: &[ChartEntry]) -> String {
    let max = entries.iter().map(|e| e.count).max().unwrap_or(0).max(1);
    let height = 70 + entries.len() * (BAR_HEIGHT + 8);
    let usable = CHART_WIDTH - LABEL_WIDTH - 90;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = CHART_WIDTH,
        h = height
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<text x="20" y="32" font-family="sans-serif" font-size="18" font-weight="bold">{}</text>"#,
        escape(title)
    ));
    svg.push('\n');
    for (i, entry) in entries.iter().enumerate() {
        let y = 60 + i * (BAR_HEIGHT + 8);
        let bar = (entry.count as f64 / max as f64 * usable as f64).round() as usize;
        svg.push_str(&format!(
            r#"<text x="20" y="{}" font-family="sans-serif" font-size="13">{}</text>"#,
            y + BAR_HEIGHT - 9,
            escape(&entry.label)
        ));
        svg.push('\n');
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}"/>"#,
            LABEL_WIDTH,
            y,
            bar.max(2),
            BAR_HEIGHT,
            PALETTE[i % PALETTE.len()]
        ));
        svg.push('\n');
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="13">{}</text>"#,
            LABEL_WIDTH + bar.max(2) + 8,
            y + BAR_HEIGHT - 9,
            entry.count
        ));
        svg.push('\n');
    }
    svg.push_str("</svg>\n");
    svg
}

/// Contingency heatmap; cell shade scales with the count.
fn svg_heatmap(title: &str, rows: &[String], cols: &[String], matrix: &[Vec<usize>]) -> String {
    let cell_w = 110usize;
    let cell_h = 36usize;
    let left = 220usize;
    let top = 90usize;
    let width = left + cols.len().max(1) * cell_w + 40;
    let height = top + rows.len().max(1) * cell_h + 30;
    let max = matrix
        .iter()
        .flat_map(|r| r.iter().copied())
        .max()
        .unwrap_or(0)
        .max(1);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<text x="20" y="32" font-family="sans-serif" font-size="18" font-weight="bold">{}</text>"#,
        escape(title)
    ));
    svg.push('\n');
    for (j, col) in cols.iter().enumerate() {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="12" text-anchor="middle">{}</text>"#,
            left + j * cell_w + cell_w / 2,
            top - 12,
            escape(col)
        ));
        svg.push('\n');
    }
    for (i, row) in rows.iter().enumerate() {
        svg.push_str(&format!(
            r#"<text x="20" y="{}" font-family="sans-serif" font-size="12">{}</text>"#,
            top + i * cell_h + cell_h / 2 + 4,
            escape(row)
        ));
        svg.push('\n');
        for (j, &count) in matrix[i].iter().enumerate() {
            let t = count as f64 / max as f64;
            let r = (255.0 - (255.0 - 78.0) * t).round() as u8;
            let g = (255.0 - (255.0 - 121.0) * t).round() as u8;
            let b = (255.0 - (255.0 - 167.0) * t).round() as u8;
            svg.push_str(&format!(
                r##"<rect x="{}" y="{}" width="{}" height="{}" fill="rgb({},{},{})" stroke="#ddd"/>"##,
                left + j * cell_w,
                top + i * cell_h,
                cell_w,
                cell_h,
                r,
                g,
                b
            ));
            svg.push('\n');
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" font-family="sans-serif" font-size="12" text-anchor="middle" fill="{}">{}</text>"#,
                left + j * cell_w + cell_w / 2,
                top + i * cell_h + cell_h / 2 + 4,
                if t > 0.6 { "#fff" } else { "#333" },
                count
            ));
            svg.push('\n');
        }
    }
    svg.push_str("</svg>\n");
    svg
}

/// Word cloud as a deterministic left-to-right flow layout; font size
/// scales with the square root of the term frequency.
fn svg_word_cloud(title: &str, counts: &BTreeMap<String, usize>) -> String {
    let mut terms: Vec<(&String, usize)> = counts.iter().map(|(t, c)| (t, *c)).collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    terms.truncate(CLOUD_TERMS);
    let max = terms.first().map(|&(_, c)| c).unwrap_or(1).max(1);

    let mut elements: Vec<String> = Vec::new();
    let mut x = 24.0f64;
    let mut y = 100.0f64;
    let mut line_height = 0.0f64;
    for (i, (term, count)) in terms.iter().enumerate() {
        let font = 12.0 + 30.0 * (*count as f64 / max as f64).sqrt();
        let width: f64 = term
            .chars()
            .map(|c| if c.is_ascii() { font * 0.55 } else { font })
            .sum();
        if x + width > (CLOUD_WIDTH as f64 - 24.0) {
            x = 24.0;
            y += line_height + 14.0;
            line_height = 0.0;
        }
        elements.push(format!(
            r#"<text x="{:.0}" y="{:.0}" font-family="sans-serif" font-size="{:.0}" fill="{}">{}</text>"#,
            x,
            y,
            font,
            PALETTE[i % PALETTE.len()],
            escape(term)
        ));
        x += width + 18.0;
        line_height = line_height.max(font);
    }
    let height = (y + line_height + 30.0) as usize;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = CLOUD_WIDTH,
        h = height
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<text x="20" y="36" font-family="sans-serif" font-size="18" font-weight="bold">{}</text>"#,
        escape(title)
    ));
    svg.push('\n');
    for element in elements {
        svg.push_str(&element);
        svg.push('\n');
    }
    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn bar_chart_draws_one_rect_per_entry() {
        let entries = vec![
            ChartEntry { label: "회계".into(), count: 5 },
            ChartEntry { label: "시설 <보수>".into(), count: 2 },
        ];
        let svg = svg_bar_chart("Records per category", &entries);
        assert_eq!(svg.matches("<rect").count(), 2);
        assert!(svg.contains("&lt;보수&gt;"));
        assert!(!svg.contains("<보수>"));
    }

    #[test]
    fn word_cloud_is_deterministic_and_scales_top_term() {
        let counts: BTreeMap<String, usize> =
            [("관리비".to_string(), 9), ("누수".to_string(), 1)].into_iter().collect();
        let a = svg_word_cloud("test", &counts);
        let b = svg_word_cloud("test", &counts);
        assert_eq!(a, b);
        assert!(a.contains("관리비"));
        assert!(a.contains(r#"font-size="42""#)); // 12 + 30 * sqrt(1)
    }

    #[test]
    fn write_all_produces_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.data.output_dir = dir.path().to_string_lossy().into_owned();
        cfg.ensure_output_dirs().unwrap();

        let docs = vec![
            doc(0, "회계", "입주민", "관리비 인상 내역 공개"),
            doc(1, "시설", "동대표", "주차장 누수 보수 공사"),
        ];
        let topic_summary = vec![TopicSummaryRow {
            topic_id: 0,
            topic_name: "관리비/인상".into(),
            document_count: 2,
            avg_confidence: 0.8,
            top_terms: "관리비/인상".into(),
        }];
        let assignments = vec![
            TopicAssignment {
                document_id: 0,
                topic_id: 0,
                topic_name: "관리비/인상".into(),
                confidence: 0.9,
                text: String::new(),
            },
            TopicAssignment {
                document_id: 1,
                topic_id: 0,
                topic_name: "관리비/인상".into(),
                confidence: 0.7,
                text: String::new(),
            },
        ];
        let cluster_summary = vec![ClusterSummaryRow {
            cluster_id: 0,
            cluster_name: "cluster_1".into(),
            document_count: 2,
            avg_similarity: 0.9,
            representative_text: "텍스트".into(),
            sample_texts: "텍스트".into(),
        }];

        let written =
            write_all(&cfg, &docs, &topic_summary, &assignments, &cluster_summary).unwrap();
        for path in &written {
            assert!(path.exists(), "missing {}", path.display());
        }
        assert!(cfg.viz_dir().join("topic_distribution.svg").exists());
        assert!(cfg.wordclouds_dir().join("topic_0_wordcloud.svg").exists());
        assert!(cfg.wordclouds_dir().join("overall_wordcloud.svg").exists());
        assert!(cfg.frequency_charts_dir().join("crosstab_heatmap.svg").exists());

        let raw = std::fs::read(cfg.viz_dir().join("chart_data.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["topic_distribution"][0]["count"], 2);
    }
}
