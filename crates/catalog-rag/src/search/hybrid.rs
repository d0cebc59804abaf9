use std::collections::HashMap;

/// Which ranked lists an id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HybridSource {
    Vector,
    TextSearch,
    Both,
}

/// Reciprocal Rank Fusion: merges ranked id lists without score normalization.
/// Formula: rrf_score(doc) = Σ 1/(k + rank_i) for each list containing doc.
/// Ties keep the order of first appearance, vector list first.
pub fn reciprocal_rank_fusion(
    vector_ranked: &[String],
    text_ranked: &[String],
    k: usize,
    top_k: usize,
) -> Vec<(String, f32, HybridSource)> {
    let mut scores: HashMap<&str, (f32, HybridSource, usize)> = HashMap::new();
    let mut seen = 0usize;

    let lists = [
        (vector_ranked, HybridSource::Vector),
        (text_ranked, HybridSource::TextSearch),
    ];
    for (ranked, source) in lists {
        for (rank, id) in ranked.iter().enumerate() {
            let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
            scores
                .entry(id.as_str())
                .and_modify(|(s, src, _)| {
                    *s += rrf;
                    if *src != source {
                        *src = HybridSource::Both;
                    }
                })
                .or_insert_with(|| {
                    seen += 1;
                    (rrf, source, seen)
                });
        }
    }

    let mut merged: Vec<(String, f32, HybridSource, usize)> = scores
        .into_iter()
        .map(|(id, (score, source, order))| (id.to_string(), score, source, order))
        .collect();

    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.3.cmp(&b.3))
    });
    merged.truncate(top_k);
    merged
        .into_iter()
        .map(|(id, score, source, _)| (id, score, source))
        .collect()
}
