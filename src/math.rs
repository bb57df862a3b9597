use std::collections::BTreeSet;

/// Type alias for sets, we use this to hide which type of `HashSet` we are actually using.
pub type Set<S> = fxhash::FxHashSet<S>;
/// Type alias for maps, we use this to hide which type of `HashMap` we are actually using.
pub type Map<K, V> = fxhash::FxHashMap<K, V>;

/// Represents a bijective mapping between `L` and `R`, that is a mapping which associates
/// each `L` with precisely one `R` and vice versa.
pub type Bijection<L, R> = bimap::BiBTreeMap<L, R>;

/// Computes `x * ln(x / total)` with the usual convention that `0 * ln 0 = 0`.
pub fn x_ln_x_over(x: f64, total: f64) -> f64 {
    if x <= 0.0 || total <= 0.0 {
        0.0
    } else {
        x * (x / total).ln()
    }
}

/// Returns the distinct values of `values` in ascending order.
pub fn distinct_sorted<I: IntoIterator<Item = u64>>(values: I) -> Vec<u64> {
    values
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Computes borders for `bins` equal-frequency bins over `values`. Each border is the first value
/// of a new bin, so the result has at most `bins - 1` entries, is strictly increasing and never
/// contains the smallest value.
pub fn quantile_borders(values: &[u64], bins: usize) -> Vec<u64> {
    if bins <= 1 || values.is_empty() {
        return vec![];
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let smallest = sorted[0];
    let borders: BTreeSet<u64> = (1..bins)
        .map(|i| sorted[(i * sorted.len()) / bins])
        .filter(|b| *b > smallest)
        .collect();
    borders.into_iter().collect()
}
