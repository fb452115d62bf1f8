//! Vector rescoring for find-nearest queries.

use std::cmp::Ordering;

use common::{
    document::Document,
    query::{
        DistanceMeasure,
        FindNearest,
    },
};
use value::Value;

/// Rescore the filtered rows by vector distance, keep the top `limit`, and
/// optionally write the reported distance into each surviving document.
///
/// Documents without a vector of the query's dimension at the vector field
/// are skipped, so a mismatched-dimension query yields an empty result
/// rather than an error.
pub fn apply_find_nearest(nearest: &FindNearest, docs: Vec<Document>) -> Vec<Document> {
    let mut scored: Vec<(f64, f64, Document)> = docs
        .into_iter()
        .filter_map(|doc| {
            let candidate = match doc.get(&nearest.vector_field) {
                Some(Value::Vector(components)) => components,
                _ => return None,
            };
            if candidate.len() != nearest.query_vector.len() {
                return None;
            }
            let (rank, reported) = score(nearest.measure, &nearest.query_vector, candidate);
            Some((rank, reported, doc))
        })
        .collect();

    if let Some(threshold) = nearest.distance_threshold {
        scored.retain(|(_, reported, _)| match nearest.measure {
            DistanceMeasure::Euclidean | DistanceMeasure::Cosine => *reported <= threshold,
            // Larger dot products are closer, so the threshold is a floor.
            DistanceMeasure::DotProduct => *reported >= threshold,
        });
    }

    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    scored.truncate(nearest.limit);

    scored
        .into_iter()
        .map(|(_, reported, doc)| match nearest.distance_result_field {
            Some(ref field) => {
                let (path, mut data, create_time, update_time) = (
                    doc.path().clone(),
                    doc.data().clone(),
                    doc.create_time(),
                    doc.update_time(),
                );
                data.set_path(field, Value::Float64(reported));
                Document::new(path, data, create_time, update_time)
            },
            None => doc,
        })
        .collect()
}

/// Returns `(rank key, reported distance)`. Rows sort ascending by rank.
fn score(measure: DistanceMeasure, query: &[f64], candidate: &[f64]) -> (f64, f64) {
    match measure {
        DistanceMeasure::Euclidean => {
            let distance = query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            (distance, distance)
        },
        DistanceMeasure::Cosine => {
            let dot = dot(query, candidate);
            let norms = norm(query) * norm(candidate);
            let similarity = if norms == 0.0 { 0.0 } else { dot / norms };
            let distance = 1.0 - similarity;
            (distance, distance)
        },
        DistanceMeasure::DotProduct => {
            let dot = dot(query, candidate);
            // Rank by negated dot, report the raw dot product.
            (-dot, dot)
        },
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
