use std::collections::{BTreeMap, BTreeSet, HashMap};
use unicode_normalization::UnicodeNormalization;
use xxhash_rust::xxh3::xxh3_64;

/// Tokens dropped before any counting. A pragmatic list for Korean
/// counseling text: particles, conjunctions, and filler nouns that carry no
/// topical signal.
const STOPWORDS: &[&str] = &[
    "그리고", "그러나", "하지만", "그런데", "그래서", "따라서", "또는", "및",
    "때문에", "위해서", "통해서", "의해서", "대해서", "관해서", "로서", "으로서",
    "에서", "에게서", "부터", "까지", "이것", "그것", "저것", "무엇", "어떤",
    "어느", "언제", "어디", "어떻게", "우리", "저희", "매우", "너무", "아주",
    "정말", "진짜", "전혀", "절대", "별로", "그냥", "바로", "이미", "아직",
    "벌써", "있다", "없다", "하다", "되다", "같다", "있는", "없는", "하는",
    "되는", "이런", "그런", "저런", "여부", "경우", "관련", "내용", "사항",
    "문제", "문의", "상담", "요청", "대해", "통해", "위해", "때문", "이유",
    "하여", "하고", "에서의", "으로의", "입니다", "합니다",
];

/// NFC-normalize, lowercase, split on non-alphanumeric boundaries, and keep
/// multi-char tokens that are not stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfc().collect::<String>().to_lowercase();
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !is_stopword(t))
        .map(|t| t.to_string())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Space-joined n-grams over an already tokenized document.
pub fn ngrams(tokens: &[String], n: usize) -> Vec<String> {
    if n == 0 || tokens.len() < n {
        return Vec::new();
    }
    tokens.windows(n).map(|w| w.join(" ")).collect()
}

/// Unigrams plus bigrams, the token form the topic vocabulary counts.
pub fn with_bigrams(tokens: &[String]) -> Vec<String> {
    let mut out = tokens.to_vec();
    out.extend(ngrams(tokens, 2));
    out
}

/// Document-frequency filtered vocabulary with stable, lexicographic term
/// ids.
pub struct Vocabulary {
    pub terms: Vec<String>,
    index: HashMap<String, usize>,
    pub doc_freq: Vec<usize>,
    pub n_docs: usize,
}

impl Vocabulary {
    /// Keep terms with document frequency in [min_df, max_df * n_docs].
    pub fn build(docs: &[Vec<String>], min_df: usize, max_df: f64) -> Self {
        let n_docs = docs.len();
        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in docs {
            let unique: BTreeSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let max_count = (max_df * n_docs as f64).floor() as usize;
        let mut terms = Vec::new();
        let mut doc_freq = Vec::new();
        for (term, count) in df {
            if count >= min_df && count <= max_count.max(min_df) {
                terms.push(term.to_string());
                doc_freq.push(count);
            }
        }

        let index = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { terms, index, doc_freq, n_docs }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn id(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    /// Token stream mapped to vocabulary ids, out-of-vocabulary tokens
    /// dropped. This is the sequence form the topic sampler consumes.
    pub fn term_ids(&self, tokens: &[String]) -> Vec<usize> {
        tokens.iter().filter_map(|t| self.id(t)).collect()
    }

    /// Sparse term counts for one document, ordered by term id.
    pub fn term_counts(&self, tokens: &[String]) -> Vec<(usize, f64)> {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for id in self.term_ids(tokens) {
            *counts.entry(id).or_insert(0.0) += 1.0;
        }
        counts.into_iter().collect()
    }
}

/// Deterministic feature-hashed TF-IDF embeddings, L2-normalized. The
/// offline stand-in for an embeddings API: close texts land close in cosine
/// space because they share hashed term buckets.
pub fn embed_corpus(texts: &[String], dim: usize) -> Vec<Vec<f32>> {
    let dim = dim.max(8);
    let tokenized: Vec<Vec<String>> = texts.iter().map(|t| with_bigrams(&tokenize(t))).collect();

    let mut df: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        let unique: BTreeSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
        for term in unique {
            *df.entry(term).or_insert(0) += 1;
        }
    }
    let n = texts.len() as f64;

    tokenized
        .iter()
        .map(|tokens| {
            let mut tf: BTreeMap<&str, f64> = BTreeMap::new();
            for t in tokens {
                *tf.entry(t.as_str()).or_insert(0.0) += 1.0;
            }
            let mut v = vec![0f64; dim];
            for (term, count) in tf {
                let idf = (n / (1.0 + df.get(term).copied().unwrap_or(0) as f64)).ln() + 1.0;
                let h = xxh3_64(term.as_bytes());
                let bucket = (h % dim as u64) as usize;
                let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
                v[bucket] += sign * count * idf;
            }
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                for x in v.iter_mut() {
                    *x /= norm;
                }
            }
            v.into_iter().map(|x| x as f32).collect()
        })
        .collect()
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut na = 0f64;
    let mut nb = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_filters_stopwords_and_short_tokens() {
        let tokens = tokenize("관리비 인상 그리고 a 위임장!");
        assert_eq!(tokens, vec!["관리비", "인상", "위임장"]);
    }

    #[test]
    fn tokenize_lowercases() {
        assert_eq!(tokenize("APT Manager"), vec!["apt", "manager"]);
    }

    #[test]
    fn bigrams_join_adjacent_tokens() {
        let tokens = vec!["관리비".to_string(), "인상".to_string(), "반대".to_string()];
        assert_eq!(ngrams(&tokens, 2), vec!["관리비 인상", "인상 반대"]);
        assert_eq!(with_bigrams(&tokens).len(), 5);
    }

    #[test]
    fn vocabulary_applies_df_bounds() {
        let docs: Vec<Vec<String>> = vec![
            vec!["관리비".into(), "인상".into()],
            vec!["관리비".into(), "선거".into()],
            vec!["관리비".into(), "인상".into()],
            vec!["관리비".into(), "회계".into()],
        ];
        // 관리비 df=4 (above max_df 0.8*4=3), 인상 df=2, others df=1
        let vocab = Vocabulary::build(&docs, 2, 0.8);
        assert_eq!(vocab.terms, vec!["인상".to_string()]);
        assert_eq!(vocab.doc_freq, vec![2]);
    }

    #[test]
    fn term_counts_are_ordered_and_summed() {
        let docs: Vec<Vec<String>> = vec![
            vec!["가".into(), "나".into()],
            vec!["가".into(), "다".into()],
        ];
        let vocab = Vocabulary::build(&docs, 1, 1.0);
        let counts = vocab.term_counts(&vec!["가".into(), "가".into(), "다".into()]);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].1, 2.0);
    }

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let texts = vec![
            "관리비 인상 문의".to_string(),
            "위임장 서명 문의".to_string(),
        ];
        let a = embed_corpus(&texts, 64);
        let b = embed_corpus(&texts, 64);
        assert_eq!(a, b);
        let norm: f64 = a[0].iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let texts = vec![
            "관리비 인상 통지 관리비 고지".to_string(),
            "관리비 인상 반대 관리비 민원".to_string(),
            "지하주차장 누수 공사 일정".to_string(),
        ];
        let e = embed_corpus(&texts, 128);
        assert!(cosine(&e[0], &e[1]) > cosine(&e[0], &e[2]));
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
