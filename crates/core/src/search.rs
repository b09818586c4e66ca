use std::cmp::Ordering;

/// `1 - cosine_similarity`, in `[0, 2]`. Zero-length or mismatched vectors are
/// maximally dissimilar rather than an error.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 1.0;
    }
    (1.0 - dot / denom).clamp(0.0, 2.0) as f32
}

/// A scored candidate; `position` is insertion order and breaks distance ties.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub distance: f32,
    pub position: i64,
}

/// Keeps the `k` nearest candidates, nearest first.
pub fn nearest<T>(candidates: impl IntoIterator<Item = Scored<T>>, k: usize) -> Vec<Scored<T>> {
    if k == 0 {
        return Vec::new();
    }
    let mut all: Vec<Scored<T>> = candidates.into_iter().collect();
    all.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
    all.truncate(k);
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = [0.3, -0.2, 0.9];
        assert!(cosine_distance(&v, &v) < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_vectors_do_not_panic() {
        assert_eq!(cosine_distance(&[], &[]), 2.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 2.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn nearest_orders_by_distance_then_position() {
        let scored = vec![
            Scored { item: "c", distance: 0.5, position: 2 },
            Scored { item: "a", distance: 0.1, position: 5 },
            Scored { item: "b", distance: 0.5, position: 1 },
            Scored { item: "d", distance: 0.9, position: 0 },
        ];
        let top: Vec<_> = nearest(scored, 3).into_iter().map(|s| s.item).collect();
        assert_eq!(top, vec!["a", "b", "c"]);
    }
}
