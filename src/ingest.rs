use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::ColumnConfig;
use crate::models::Record;

/// Load the source table. Strips a UTF-8 BOM, recovers the header row when
/// the export carries preamble lines above it, and verifies that every
/// required column is present.
pub fn load_records(path: &Path, columns: &ColumnConfig) -> Result<Vec<Record>> {
    let start = std::time::Instant::now();
    if !path.exists() {
        bail!("input file not found: {}", path.display());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading input file {}", path.display()))?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for row in reader.records() {
        rows.push(row.with_context(|| format!("parsing CSV row in {}", path.display()))?);
    }
    if rows.is_empty() {
        bail!("input file is empty: {}", path.display());
    }

    let header_idx = find_header_row(&rows, columns).ok_or_else(|| {
        anyhow::anyhow!(
            "no header row containing '{}' or '{}' found in {}",
            columns.id,
            columns.date,
            path.display()
        )
    })?;
    if header_idx > 0 {
        debug!("Header recovered at row {} (skipped {} preamble rows)", header_idx, header_idx);
    }

    let header = &rows[header_idx];
    let index_of = |name: &str| header.iter().position(|h| h.trim() == name);

    let required = [
        &columns.id,
        &columns.date,
        &columns.category,
        &columns.summary,
        &columns.submitter,
        &columns.body,
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| index_of(name).is_none())
        .map(|name| name.as_str())
        .collect();
    if !missing.is_empty() {
        bail!(
            "required columns missing from {}: {}",
            path.display(),
            missing.join(", ")
        );
    }

    let col = |name: &str| index_of(name).unwrap_or(usize::MAX);
    let (id_i, date_i, cat_i, sum_i, sub_i, body_i) = (
        col(&columns.id),
        col(&columns.date),
        col(&columns.category),
        col(&columns.summary),
        col(&columns.submitter),
        col(&columns.body),
    );

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in rows.iter().skip(header_idx + 1) {
        let field = |i: usize| row.get(i).unwrap_or("").trim().to_string();
        let rec = Record {
            record_id: field(id_i),
            date: field(date_i),
            category: field(cat_i),
            summary: field(sum_i),
            submitter: field(sub_i),
            body: field(body_i),
        };
        if rec.record_id.is_empty() && rec.summary.is_empty() && rec.body.is_empty() {
            skipped += 1;
            continue;
        }
        records.push(rec);
    }
    if skipped > 0 {
        warn!("Skipped {} blank rows while loading {}", skipped, path.display());
    }

    info!(
        "Input load completed - duration={:.2}s, rows={}, file={}",
        start.elapsed().as_secs_f32(),
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Exports sometimes carry title/preamble rows above the real header.
/// The header is the first row containing the id or date column name.
fn find_header_row(rows: &[csv::StringRecord], columns: &ColumnConfig) -> Option<usize> {
    rows.iter().position(|row| {
        row.iter()
            .any(|cell| cell.trim() == columns.id || cell.trim() == columns.date)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_input(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    const CLEAN: &str = "연번,상담일자,상담유형,상담요약,상담인 유형,상담내용\n\
        1,2025.1.2,분쟁,위임장,관리소장,총회시 위임장에 소유자가 직접 서명을 하여야 하는지 문의\n\
        2,2025.1.3,관리비,인상,점유자,부당한 관리비 인상 요구에 응해야 하는지 문의\n";

    #[test]
    fn loads_clean_table() {
        let f = write_input(CLEAN);
        let records = load_records(f.path(), &ColumnConfig::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_id, "1");
        assert_eq!(records[1].category, "관리비");
    }

    #[test]
    fn strips_bom_and_recovers_header() {
        let with_preamble = format!("\u{feff}상담 데이터 추출본,,,,,\n,,,,,\n{}", CLEAN);
        let f = write_input(&with_preamble);
        let records = load_records(f.path(), &ColumnConfig::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].submitter, "관리소장");
    }

    #[test]
    fn rejects_missing_required_column() {
        let f = write_input(
            "연번,상담일자,상담유형,상담요약,상담인 유형\n1,2025.1.2,분쟁,위임장,관리소장\n",
        );
        let err = load_records(f.path(), &ColumnConfig::default()).unwrap_err();
        assert!(err.to_string().contains("상담내용"));
    }

    #[test]
    fn rejects_missing_file() {
        let err =
            load_records(Path::new("/nonexistent/input.csv"), &ColumnConfig::default()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn skips_blank_rows() {
        let with_blank = format!("{}\n,,,,,\n", CLEAN.trim_end());
        let f = write_input(&with_blank);
        let records = load_records(f.path(), &ColumnConfig::default()).unwrap();
        assert_eq!(records.len(), 2);
    }
}
