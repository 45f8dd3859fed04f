pub fn system_analyst() -> String {
    "You are an analyst for an apartment-management counseling center. \
     You read resident counseling records and answer with compact, well-formed JSON only."
        .to_string()
}

pub fn user_document_analysis(record_text: &str, topic_name: &str) -> String {
    format!(
        r#"You'll receive one counseling record from an apartment-management support board.
Its discovered topic is "{topic}".

RECORD:
<{text}>

Return JSON with exactly these keys:
{{
  "cause": "root cause of the complaint in one sentence",
  "actors": ["people or bodies involved"],
  "demands": ["what the counselee asks for"],
  "tone": "positive|neutral|negative",
  "risk": "dispute or safety risk if unresolved, one sentence",
  "resolution": "how the case was or could be resolved",
  "policy_implication": "rule or process change this suggests, one sentence"
}}

CONSTRAINTS:
- Respond with JSON only, no prose around it.
- Keep string values in the language of the record.
- ≤ 300 tokens."#,
        topic = topic_name,
        text = record_text
    )
}

pub fn user_cluster_summary(cluster_name: &str, topic_name: &str, analyses_json: &str) -> String {
    format!(
        r#"You'll receive per-record analyses for the cluster "{cluster}" (topic: "{topic}").
Synthesize them into one cluster-level view.

ANALYSES JSON:
<{analyses}>

Return JSON with exactly these keys:
{{
  "main_cause": "the dominant root cause",
  "main_actors": ["recurring people or bodies"],
  "common_demands": ["recurring requests"],
  "overall_tone": "positive|neutral|negative",
  "main_risks": ["risks if the pattern continues"],
  "resolution_priority": "high|medium|low with a short reason",
  "policy_improvements": ["concrete rule or process changes"]
}}

CONSTRAINTS:
- Respond with JSON only, no prose around it.
- Generalize across records; do not quote any single record at length.
- ≤ 400 tokens."#,
        cluster = cluster_name,
        topic = topic_name,
        analyses = analyses_json
    )
}
