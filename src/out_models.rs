use serde::{Deserialize, Serialize};

/// Structured fields the model returns for one counseling record. Field
/// names double as the JSON keys the prompt asks for; missing keys fall
/// back to the defaults so a sloppy response still yields a usable row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentAnalysis {
    pub cause: String,
    pub actors: Vec<String>,
    pub demands: Vec<String>,
    pub tone: String, // positive|neutral|negative
    pub risk: String,
    pub resolution: String,
    pub policy_implication: String,
}

impl Default for DocumentAnalysis {
    fn default() -> Self {
        Self {
            cause: String::new(),
            actors: Vec::new(),
            demands: Vec::new(),
            tone: "neutral".into(),
            risk: String::new(),
            resolution: String::new(),
            policy_implication: String::new(),
        }
    }
}

impl DocumentAnalysis {
    /// Placeholder used when no API key is configured.
    pub fn unavailable() -> Self {
        Self {
            cause: "analysis unavailable (no API key)".into(),
            ..Self::default()
        }
    }

    /// Placeholder used when a call or its parse failed; the run continues
    /// with the rows analyzed so far.
    pub fn failed() -> Self {
        Self {
            cause: "analysis failed".into(),
            ..Self::default()
        }
    }
}

/// Cluster-level synthesis over the per-record analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSummaryAnalysis {
    pub main_cause: String,
    pub main_actors: Vec<String>,
    pub common_demands: Vec<String>,
    pub overall_tone: String,
    pub main_risks: Vec<String>,
    pub resolution_priority: String,
    pub policy_improvements: Vec<String>,
}

impl Default for ClusterSummaryAnalysis {
    fn default() -> Self {
        Self {
            main_cause: String::new(),
            main_actors: Vec::new(),
            common_demands: Vec::new(),
            overall_tone: "neutral".into(),
            main_risks: Vec::new(),
            resolution_priority: String::new(),
            policy_improvements: Vec::new(),
        }
    }
}

impl ClusterSummaryAnalysis {
    pub fn unavailable() -> Self {
        Self {
            main_cause: "analysis unavailable (no API key)".into(),
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            main_cause: "analysis failed".into(),
            ..Self::default()
        }
    }
}

/// One analyzed representative document, as stored in
/// analysis_results.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysisRecord {
    pub document_id: usize,
    pub excerpt: String,
    pub analysis: DocumentAnalysis,
}

/// Full per-cluster analysis: the representatives plus the synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterAnalysis {
    pub cluster_id: usize,
    pub cluster_name: String,
    pub topic_name: String,
    pub documents: Vec<DocumentAnalysisRecord>,
    pub summary: ClusterSummaryAnalysis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: DocumentAnalysis =
            serde_json::from_str(r#"{"cause": "누수", "actors": ["관리사무소"]}"#).unwrap();
        assert_eq!(parsed.cause, "누수");
        assert_eq!(parsed.tone, "neutral");
        assert!(parsed.demands.is_empty());
    }

    #[test]
    fn placeholders_keep_neutral_tone() {
        assert_eq!(DocumentAnalysis::unavailable().tone, "neutral");
        assert_eq!(ClusterSummaryAnalysis::failed().overall_tone, "neutral");
        assert!(DocumentAnalysis::failed().cause.contains("failed"));
    }
}
