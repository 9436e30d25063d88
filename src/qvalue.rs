//! q-value procedures over plain value lists.
//!
//! Every function returns one entry per input value, in input order. Smaller
//! values are more significant.

use rustc_hash::FxHashMap;

/// FDR reported when every null observation is at or below the statistic
pub const UNINFORMATIVE_FDR: f64 = 10.0;

/// Number of entries in `sorted` that are `<= value`
pub fn count_at_or_below(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&v| v <= value)
}

pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Positions of `values` ordered by value; ties keep input order
fn ascending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order
}

/// Empirical p-value of `value` against a sorted null pool, smoothed by one
pub fn p_value_from_randomizations(value: f64, null_sorted: &[f64]) -> f64 {
    (count_at_or_below(null_sorted, value) as f64 + 1.0) / (null_sorted.len() as f64 + 1.0)
}

/// False discovery rate at threshold `value`.
///
/// `(#null <= value) / (#real <= value * runs)`, or [`UNINFORMATIVE_FDR`] when the
/// null pool gives no information at this threshold.
pub fn compute_fdr(value: f64, real_sorted: &[f64], null_sorted: &[f64], runs: u64) -> f64 {
    let null_at_or_below = count_at_or_below(null_sorted, value);
    if null_at_or_below == null_sorted.len() {
        return UNINFORMATIVE_FDR;
    }
    let real_at_or_below = count_at_or_below(real_sorted, value);
    null_at_or_below as f64 / (real_at_or_below as f64 * runs as f64)
}

/// q-values plus the per-row randomization p-values they were derived from
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QValues {
    pub q_values: Vec<f64>,
    pub p_values_from_randomizations: Vec<f64>,
}

/// Storey–Tibshirani q-values with `m` hypotheses.
///
/// Walking from least to most significant, `q = min(q_prev, min(1, p * m / rank))`.
pub fn storey_tibshirani(p_values: &[f64], m: u64) -> Vec<f64> {
    let order = ascending_order(p_values);
    let mut q_values = vec![0.0; p_values.len()];
    let mut current = 1.0_f64;
    for (rank0, &i) in order.iter().enumerate().rev() {
        let fdr = p_values[i] * m as f64 / (rank0 + 1) as f64;
        current = current.min(fdr.min(1.0));
        q_values[i] = current;
    }
    q_values
}

/// Empirical q-values against one pooled null distribution from `runs` null runs
pub fn randomization(values: &[f64], null_values: &[f64], runs: u64) -> QValues {
    let real_sorted = sorted_copy(values);
    let null_sorted = sorted_copy(null_values);
    let order = ascending_order(values);

    let mut result = QValues {
        q_values: vec![0.0; values.len()],
        p_values_from_randomizations: vec![0.0; values.len()],
    };
    let mut running = f64::INFINITY;
    for &i in order.iter().rev() {
        let fdr = compute_fdr(values[i], &real_sorted, &null_sorted, runs);
        running = running.min(fdr);
        result.q_values[i] = running;
        result.p_values_from_randomizations[i] = p_value_from_randomizations(values[i], &null_sorted);
    }
    result
}

/// Empirical q-values where each row is compared with the null pool of its own group.
///
/// Rows of a group without any null observation get a randomization p-value of 1.
pub fn local_randomization(values: &[f64], groups: &[i64], null_pools: &FxHashMap<i64, Vec<f64>>) -> QValues {
    let sorted_pools: FxHashMap<i64, Vec<f64>> = null_pools
        .iter()
        .map(|(&group, pool)| (group, sorted_copy(pool)))
        .collect();

    let p_rand: Vec<f64> = values
        .iter()
        .zip(groups)
        .map(|(&value, group)| {
            let pool = sorted_pools.get(group).map(Vec::as_slice).unwrap_or(&[]);
            p_value_from_randomizations(value, pool)
        })
        .collect();

    let p_rand_sorted = sorted_copy(&p_rand);
    let real_count = values.len() as f64;
    let mut q_values = vec![0.0; values.len()];
    let mut running = f64::INFINITY;
    for &i in ascending_order(&p_rand).iter().rev() {
        let fdr = real_count * p_rand[i] / count_at_or_below(&p_rand_sorted, p_rand[i]) as f64;
        running = running.min(fdr);
        q_values[i] = running;
    }

    QValues {
        q_values,
        p_values_from_randomizations: p_rand,
    }
}
