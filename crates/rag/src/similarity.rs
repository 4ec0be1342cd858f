use std::cmp::Ordering;

/// Cosine similarity of two vectors. A zero-norm vector has no direction,
/// so it scores 0 against everything instead of producing NaN. Vectors of
/// different dimensions come from different embedders and also score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let score = dot / (a_norm.sqrt() * b_norm.sqrt());
    if score.is_nan() {
        0.0
    } else {
        score
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: usize,
    pub score: f32,
}

/// Scores every candidate against `query` and keeps the best `top_n`.
/// The sort is stable, so equal scores keep candidate order.
pub fn top_n<'a, I>(query: &[f32], candidates: I, top_n: usize) -> Vec<ScoredId>
where
    I: IntoIterator<Item = (usize, &'a [f32])>,
{
    let mut scored: Vec<ScoredId> = candidates
        .into_iter()
        .map(|(id, embedding)| ScoredId {
            id,
            score: cosine_similarity(query, embedding),
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(top_n);
    scored
}
