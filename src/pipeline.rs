use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::analyze;
use crate::cluster;
use crate::config::AppConfig;
use crate::insights;
use crate::llm::{self, ChatClient};
use crate::models::PreprocessedDocument;
use crate::preprocess;
use crate::report;
use crate::topics;
use crate::vectorize;

/// Stage names in execution order.
pub const STAGES: &[&str] = &[
    "preprocess",
    "topics",
    "cluster",
    "analyze",
    "insights",
    "report",
];

/// Run the requested stages in canonical order. Later stages read their
/// inputs from the artifacts of earlier runs, so any subset works as long
/// as its inputs exist on disk.
pub async fn run(cfg: &AppConfig, stages: &[String]) -> Result<()> {
    let selected = select_stages(stages)?;

    cfg.ensure_output_dirs()?;
    let pipeline_start = std::time::Instant::now();
    info!("Running stages: {}", selected.join(", "));

    let mut docs: Option<Vec<PreprocessedDocument>> = None;
    for stage in &selected {
        match *stage {
            "preprocess" => {
                docs = Some(preprocess::run(cfg)?);
            }
            "topics" => {
                let docs = loaded_docs(cfg, &mut docs)?;
                topics::run(cfg, docs)?;
            }
            "cluster" => {
                let docs = loaded_docs(cfg, &mut docs)?;
                let texts: Vec<String> =
                    docs.iter().map(|d| d.cleaned_text.clone()).collect();
                let embeddings = embed_documents(cfg, &texts).await?;
                cluster::run(cfg, docs, &embeddings)?;
            }
            "analyze" => {
                analyze::run(cfg).await?;
            }
            "insights" => {
                insights::run(cfg)?;
            }
            "report" => {
                report::run(cfg)?;
            }
            _ => {}
        }
    }

    info!(
        "Pipeline completed - duration={:.2}s, stages={}",
        pipeline_start.elapsed().as_secs_f32(),
        selected.len()
    );
    Ok(())
}

/// Map requested names onto STAGES order, deduplicating along the way.
fn select_stages(requested: &[String]) -> Result<Vec<&'static str>> {
    for stage in requested {
        if !STAGES.contains(&stage.as_str()) {
            bail!(
                "Unknown stage {:?}, valid stages: {}",
                stage,
                STAGES.join(", ")
            );
        }
    }
    let selected: Vec<&'static str> = STAGES
        .iter()
        .copied()
        .filter(|name| requested.iter().any(|s| s == name))
        .collect();
    if selected.is_empty() {
        bail!("No stages selected, valid stages: {}", STAGES.join(", "));
    }
    Ok(selected)
}

/// Preprocessed documents for the current run, read from disk at most once
/// when the preprocess stage itself was skipped.
fn loaded_docs<'a>(
    cfg: &AppConfig,
    cache: &'a mut Option<Vec<PreprocessedDocument>>,
) -> Result<&'a [PreprocessedDocument]> {
    if cache.is_none() {
        *cache = Some(preprocess::read_preprocessed(cfg)?);
    }
    Ok(cache.as_deref().unwrap_or_default())
}

/// Embed the corpus with the configured model. The hashed TF-IDF model runs
/// locally; any other name goes through the embeddings API and falls back
/// to hashed TF-IDF when no key is configured.
async fn embed_documents(cfg: &AppConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let start = std::time::Instant::now();
    let model = cfg.clustering.embedding_model.as_str();
    let embeddings = if model == "hashed-tfidf" {
        vectorize::embed_corpus(texts, cfg.clustering.embedding_dim)
    } else {
        match ChatClient::from_env(&cfg.llm)? {
            Some(client) => client.embed(model, texts).await?,
            None => {
                warn!(
                    "No {} set, using hashed-tfidf embeddings instead of '{}'",
                    llm::API_KEY_ENV,
                    model
                );
                vectorize::embed_corpus(texts, cfg.clustering.embedding_dim)
            }
        }
    };
    info!(
        "Embedding completed - duration={:.2}s, documents={}, dim={}",
        start.elapsed().as_secs_f32(),
        embeddings.len(),
        embeddings.first().map(|v| v.len()).unwrap_or(0)
    );
    Ok(embeddings)
}
