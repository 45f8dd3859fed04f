use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::{AppConfig, MaskRule};
use crate::models::{PreprocessedDocument, Record};

/// Compiled masking rules, applied in configuration order.
pub struct Masker {
    rules: Vec<(Regex, String)>,
}

impl Masker {
    pub fn new(rules: &[MaskRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let re = Regex::new(&rule.pattern)
                .with_context(|| format!("invalid mask pattern {:?}", rule.pattern))?;
            compiled.push((re, rule.replacement.clone()));
        }
        Ok(Self { rules: compiled })
    }

    pub fn mask(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, replacement) in &self.rules {
            out = re.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }
}

/// NFC-normalize, mask personal information, strip everything but word
/// characters and whitespace, collapse runs of whitespace.
pub fn clean_text(text: &str, masker: &Masker, strip: &Regex, spaces: &Regex) -> String {
    let normalized: String = text.nfc().collect();
    let masked = masker.mask(normalized.trim());
    let stripped = strip.replace_all(&masked, " ");
    spaces.replace_all(stripped.trim(), " ").into_owned()
}

/// Run the preprocess stage: load the input table, clean and merge the text
/// columns, drop short documents, deduplicate, and persist the result.
pub fn run(cfg: &AppConfig) -> Result<Vec<PreprocessedDocument>> {
    let start = std::time::Instant::now();
    let records = crate::ingest::load_records(Path::new(&cfg.data.input_file), &cfg.data.columns)?;
    let total = records.len();

    let masker = Masker::new(&cfg.preprocessing.mask_rules)?;
    let strip = Regex::new(r"[^\w\s]").context("compiling strip pattern")?;
    let spaces = Regex::new(r"\s+").context("compiling whitespace pattern")?;
    let text_columns = cfg.text_columns();

    let mut docs: Vec<PreprocessedDocument> = Vec::with_capacity(records.len());
    let mut too_short = 0usize;
    for rec in &records {
        // Masked before it is ever persisted; merged_text lands in several
        // artifacts downstream.
        let merged = masker.mask(&merge_text_columns(rec, &cfg.data.columns, &text_columns));
        let cleaned = clean_text(&merged, &masker, &strip, &spaces);
        let text_length = cleaned.chars().count();
        if text_length < cfg.preprocessing.min_text_length {
            too_short += 1;
            continue;
        }
        docs.push(PreprocessedDocument {
            document_id: 0, // assigned after dedup
            record_id: rec.record_id.clone(),
            date: rec.date.clone(),
            category: rec.category.clone(),
            submitter: rec.submitter.clone(),
            summary: rec.summary.clone(),
            merged_text: merged,
            cleaned_text: cleaned,
            text_length,
            dedup_key: String::new(),
        });
    }
    if too_short > 0 {
        debug!(
            "Length filter - dropped={} documents below {} chars",
            too_short, cfg.preprocessing.min_text_length
        );
    }

    for doc in docs.iter_mut() {
        doc.dedup_key = format!("{:016x}", xxh3_64(doc.cleaned_text.as_bytes()));
    }

    if cfg.preprocessing.remove_duplicates {
        let before = docs.len();
        let mut seen: HashSet<String> = HashSet::new();
        docs.retain(|doc| seen.insert(doc.dedup_key.clone()));
        let removed = before - docs.len();
        if removed > 0 {
            info!("Deduplication - removed={} duplicates, retained={} documents", removed, docs.len());
        } else {
            debug!("Deduplication - no duplicates found, retained={} documents", docs.len());
        }
    }

    for (i, doc) in docs.iter_mut().enumerate() {
        doc.document_id = i;
    }

    if docs.is_empty() {
        warn!("Preprocessing left no documents (input rows={})", total);
    }

    let out_path = cfg.csv_dir().join("preprocessed.csv");
    write_preprocessed(&out_path, &docs)?;
    debug!("Wrote {}", out_path.display());

    info!(
        "Preprocessing completed - duration={:.2}s, input_rows={}, documents={}",
        start.elapsed().as_secs_f32(),
        total,
        docs.len()
    );
    Ok(docs)
}

/// Join the configured text columns in order, skipping empty fields.
fn merge_text_columns(
    rec: &Record,
    columns: &crate::config::ColumnConfig,
    text_columns: &[String],
) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for name in text_columns {
        let value = if *name == columns.summary {
            rec.summary.as_str()
        } else if *name == columns.body {
            rec.body.as_str()
        } else if *name == columns.category {
            rec.category.as_str()
        } else if *name == columns.submitter {
            rec.submitter.as_str()
        } else if *name == columns.date {
            rec.date.as_str()
        } else if *name == columns.id {
            rec.record_id.as_str()
        } else {
            ""
        };
        if !value.is_empty() {
            parts.push(value);
        }
    }
    parts.join(" ")
}

pub fn write_preprocessed(path: &Path, docs: &[PreprocessedDocument]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for doc in docs {
        writer.serialize(doc)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the preprocess artifact back; later stages start from this.
pub fn read_preprocessed(cfg: &AppConfig) -> Result<Vec<PreprocessedDocument>> {
    let path = cfg.csv_dir().join("preprocessed.csv");
    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("reading {} (run the preprocess stage first)", path.display()))?;
    let mut docs = Vec::new();
    for row in reader.deserialize() {
        let doc: PreprocessedDocument =
            row.with_context(|| format!("decoding row in {}", path.display()))?;
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;

    fn masker() -> Masker {
        Masker::new(&PreprocessConfig::default().mask_rules).unwrap()
    }

    fn patterns() -> (Regex, Regex) {
        (Regex::new(r"[^\w\s]").unwrap(), Regex::new(r"\s+").unwrap())
    }

    #[test]
    fn masks_phone_numbers() {
        let m = masker();
        assert_eq!(m.mask("연락처 010-1234-5678 입니다"), "연락처 [전화번호] 입니다");
        assert_eq!(m.mask("01012345678"), "[전화번호]");
    }

    #[test]
    fn masks_vehicle_and_resident_numbers() {
        let m = masker();
        assert_eq!(m.mask("차량 12가3456 주차 문제"), "차량 [차량번호] 주차 문제");
        assert_eq!(m.mask("881122-1234567"), "[주민번호]");
    }

    #[test]
    fn clean_collapses_whitespace_and_symbols() {
        let m = masker();
        let (strip, spaces) = patterns();
        let cleaned = clean_text("  관리비!!   인상(30%)   문의??  ", &m, &strip, &spaces);
        assert_eq!(cleaned, "관리비 인상 30 문의");
    }

    #[test]
    fn clean_keeps_hangul_and_digits() {
        let m = masker();
        let (strip, spaces) = patterns();
        assert_eq!(
            clean_text("제12조 의결권, 위임장.", &m, &strip, &spaces),
            "제12조 의결권 위임장"
        );
    }

    fn doc(id: usize, text: &str) -> PreprocessedDocument {
        PreprocessedDocument {
            document_id: id,
            record_id: id.to_string(),
            date: "2025.1.2".into(),
            category: "분쟁".into(),
            submitter: "관리소장".into(),
            summary: "요약".into(),
            merged_text: text.into(),
            cleaned_text: text.into(),
            text_length: text.chars().count(),
            dedup_key: format!("{:016x}", xxh3_64(text.as_bytes())),
        }
    }

    #[test]
    fn preprocessed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.data.output_dir = dir.path().to_string_lossy().into_owned();
        cfg.ensure_output_dirs().unwrap();
        let docs = vec![doc(0, "관리비 인상 문의"), doc(1, "위임장 서명 문의")];
        write_preprocessed(&cfg.csv_dir().join("preprocessed.csv"), &docs).unwrap();
        let back = read_preprocessed(&cfg).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].cleaned_text, "위임장 서명 문의");
        assert_eq!(back[0].dedup_key, docs[0].dedup_key);
    }
}
