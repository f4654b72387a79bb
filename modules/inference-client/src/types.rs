use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest<'a> {
    pub inputs: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Classification endpoints answer either `[{..}]` or, for a single
/// input, `[[{..}]]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClassifyResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl ClassifyResponse {
    pub fn into_scores(self) -> Vec<LabelScore> {
        match self {
            ClassifyResponse::Nested(outer) => outer.into_iter().next().unwrap_or_default(),
            ClassifyResponse::Flat(scores) => scores,
        }
    }
}

/// Highest-scoring label, if any.
pub fn top_label(scores: &[LabelScore]) -> Option<&LabelScore> {
    scores
        .iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
}
