use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Pipeline configuration, loaded from a YAML file.
///
/// Every field carries a default so a missing or partial file still yields a
/// runnable configuration; the file only needs to state what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub preprocessing: PreprocessConfig,
    pub topics: TopicConfig,
    pub clustering: ClusterConfig,
    pub llm: LlmConfig,
    /// Seed shared by every sampled step (topic fit, cluster init, corpus
    /// sampling). Reruns on identical input and seed produce byte-identical
    /// CSV artifacts.
    pub seed: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            preprocessing: PreprocessConfig::default(),
            topics: TopicConfig::default(),
            clustering: ClusterConfig::default(),
            llm: LlmConfig::default(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Source table (CSV). UTF-8, BOM tolerated.
    pub input_file: String,
    /// Root of the artifact tree (csv/, reports/, visualizations/).
    pub output_dir: String,
    pub columns: ColumnConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_file: "data/counsel_records.csv".into(),
            output_dir: "outputs".into(),
            columns: ColumnConfig::default(),
        }
    }
}

/// Names of the required input columns. Defaults match the counseling-board
/// export this pipeline was built for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub id: String,
    pub date: String,
    pub category: String,
    pub summary: String,
    pub submitter: String,
    pub body: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            id: "연번".into(),
            date: "상담일자".into(),
            category: "상담유형".into(),
            summary: "상담요약".into(),
            submitter: "상담인 유형".into(),
            body: "상담내용".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Columns merged into the analysis text, in order. Empty means
    /// summary followed by body.
    pub text_columns: Vec<String>,
    /// Documents shorter than this (in chars, after cleaning) are dropped.
    pub min_text_length: usize,
    pub remove_duplicates: bool,
    /// Applied in order before any other cleaning.
    pub mask_rules: Vec<MaskRule>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            text_columns: Vec::new(),
            min_text_length: 20,
            remove_duplicates: true,
            mask_rules: default_mask_rules(),
        }
    }
}

/// One personal-information masking rule: a regex and its placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRule {
    pub pattern: String,
    pub replacement: String,
}

fn default_mask_rules() -> Vec<MaskRule> {
    let rule = |pattern: &str, replacement: &str| MaskRule {
        pattern: pattern.into(),
        replacement: replacement.into(),
    };
    vec![
        rule(r"\d{2,3}-\d{3,4}-\d{4}", "[전화번호]"),
        rule(r"\d{6}-\d{7}", "[주민번호]"),
        rule(r"\d{10,11}", "[전화번호]"),
        rule(r"\d{2,3}[가-힣]\d{4}", "[차량번호]"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// "lda" or "nmf".
    pub algorithm: String,
    /// Topic count when auto_find_topics is off, and the search fallback.
    pub n_topics: usize,
    /// Search the topic count by coherence score over 2..=max_topics.
    pub auto_find_topics: bool,
    pub max_topics: usize,
    /// Terms appearing in fewer documents than this are dropped.
    pub min_df: usize,
    /// Terms appearing in more than this fraction of documents are dropped.
    pub max_df: f64,
    pub top_terms_per_topic: usize,
    pub large_scale: LargeScaleConfig,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            algorithm: "lda".into(),
            n_topics: 5,
            auto_find_topics: true,
            max_topics: 15,
            min_df: 2,
            max_df: 0.95,
            top_terms_per_topic: 10,
            large_scale: LargeScaleConfig::default(),
        }
    }
}

/// Sampling knobs for corpora too large to fit the topic model on directly.
/// The model is fitted on a seeded sample; assignment still covers every
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeScaleConfig {
    pub enabled: bool,
    pub sample_size: usize,
    pub max_topics_search: usize,
}

impl Default for LargeScaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_size: 1000,
            max_topics_search: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// "hashed-tfidf" is built in and fully offline; any other value is
    /// treated as an embeddings-API model name.
    pub embedding_model: String,
    /// Dimension of the built-in hashed embedding.
    pub embedding_dim: usize,
    /// Target dimension before k-means; 0 disables reduction.
    pub reduced_dim: usize,
    pub algorithm: String,
    /// Inclusive cluster-count search range; the upper end is further
    /// capped at a third of the corpus size.
    pub n_clusters_range: [usize; 2],
    pub representatives_per_cluster: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            embedding_model: "hashed-tfidf".into(),
            embedding_dim: 256,
            reduced_dim: 64,
            algorithm: "kmeans".into(),
            n_clusters_range: [2, 10],
            representatives_per_cluster: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint root; /v1/chat/completions is appended.
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Pause between consecutive API calls.
    pub request_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 1000,
            temperature: 0.3,
            request_delay_ms: 100,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file not found at {} - using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.output_dir)
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.output_dir().join("csv")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.output_dir().join("reports")
    }

    pub fn viz_dir(&self) -> PathBuf {
        self.output_dir().join("visualizations")
    }

    pub fn wordclouds_dir(&self) -> PathBuf {
        self.viz_dir().join("wordclouds")
    }

    pub fn frequency_charts_dir(&self) -> PathBuf {
        self.viz_dir().join("frequency_charts")
    }

    /// Create the whole artifact tree up front.
    pub fn ensure_output_dirs(&self) -> Result<()> {
        for dir in [
            self.csv_dir(),
            self.reports_dir(),
            self.wordclouds_dir(),
            self.frequency_charts_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Columns merged into the analysis text, falling back to summary + body.
    pub fn text_columns(&self) -> Vec<String> {
        if self.preprocessing.text_columns.is_empty() {
            vec![
                self.data.columns.summary.clone(),
                self.data.columns.body.clone(),
            ]
        } else {
            self.preprocessing.text_columns.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.topics.algorithm, "lda");
        assert_eq!(cfg.clustering.n_clusters_range, [2, 10]);
        assert_eq!(cfg.preprocessing.mask_rules.len(), 4);
        assert_eq!(
            cfg.text_columns(),
            vec!["상담요약".to_string(), "상담내용".to_string()]
        );
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r#"
data:
  input_file: "in.csv"
  output_dir: "run1"
topics:
  algorithm: "nmf"
  auto_find_topics: false
  n_topics: 3
seed: 7
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.data.input_file, "in.csv");
        assert_eq!(cfg.topics.algorithm, "nmf");
        assert_eq!(cfg.topics.n_topics, 3);
        // untouched sections keep their defaults
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.preprocessing.min_text_length, 20);
        assert_eq!(cfg.clustering.embedding_model, "hashed-tfidf");
    }

    #[test]
    fn explicit_text_columns_win() {
        let mut cfg = AppConfig::default();
        cfg.preprocessing.text_columns = vec!["상담내용".into()];
        assert_eq!(cfg.text_columns(), vec!["상담내용".to_string()]);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/config.yaml")).unwrap();
        assert_eq!(cfg.data.output_dir, "outputs");
    }
}
