//! Smooth weighted round-robin scheduler (C1, §4.1).
//!
//! Capacities are approximated by rational numbers with denominator at most
//! 1000, scaled to a common denominator, reduced by their gcd, and then
//! walked through the classic smooth-WRR generation loop (accumulate
//! weights, emit the current max, subtract the total). All of the
//! bookkeeping after the initial rational approximation is done in integer
//! arithmetic so the sequence is exactly reproducible.

const MAX_DENOMINATOR: i64 = 1000;
const PRECISION: f64 = 1e-9;

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: i64, b: i64) -> i64 {
    a / gcd(a, b) * b
}

/// Finds the `(numerator, denominator)` with `denominator <= MAX_DENOMINATOR`
/// that minimizes `|p - numerator/denominator|`.
fn best_fraction(p: f64) -> (i64, i64) {
    let mut best_denominator = 1i64;
    let mut best_numerator = p.round() as i64;
    let mut best_error = (p - best_numerator as f64).abs();

    for d in 1..=MAX_DENOMINATOR {
        let n = (p * d as f64).round() as i64;
        let err = (p - n as f64 / d as f64).abs();
        if err < best_error {
            best_error = err;
            best_denominator = d;
            best_numerator = n;
            if err < PRECISION {
                break;
            }
        }
    }

    (best_numerator, best_denominator)
}

/// Builds the dispatch sequence for a set of backend capacities. Capacities
/// that don't sum to 1 within 1e-3 are rescaled first (§4.1). Returns an
/// empty sequence for an empty input; panics are never used for empty or
/// all-zero inputs, both of which the caller should have already rejected
/// during config validation (§4.8) before a `RoutingSlot` is built.
pub fn generate_sequence(capacities: &[f64]) -> Vec<usize> {
    if capacities.is_empty() {
        return Vec::new();
    }

    let total: f64 = capacities.iter().sum();
    let normalized: Vec<f64> = if (total - 1.0).abs() > 0.001 && total > 0.0 {
        capacities.iter().map(|p| p / total).collect()
    } else {
        capacities.to_vec()
    };

    let fractions: Vec<(i64, i64)> = normalized.iter().map(|p| best_fraction(*p)).collect();

    let common_denominator = fractions
        .iter()
        .fold(1i64, |acc, (_, d)| lcm(acc, *d));

    let mut weights: Vec<i64> = fractions
        .iter()
        .map(|(n, d)| n * (common_denominator / d))
        .collect();
    let mut common_denominator = common_denominator;

    let gcd_all = weights.iter().skip(1).fold(weights[0], |acc, w| gcd(acc, *w));
    if gcd_all > 1 {
        for w in weights.iter_mut() {
            *w /= gcd_all;
        }
        common_denominator /= gcd_all;
    }

    let mut sequence = Vec::with_capacity(common_denominator.max(0) as usize);
    let mut current_weights = vec![0i64; weights.len()];

    for _ in 0..common_denominator {
        for (cw, w) in current_weights.iter_mut().zip(weights.iter()) {
            *cw += w;
        }

        let mut max_index = 0;
        let mut max_weight = current_weights[0];
        for (i, &w) in current_weights.iter().enumerate().skip(1) {
            if w > max_weight {
                max_weight = w;
                max_index = i;
            }
        }

        sequence.push(max_index);
        current_weights[max_index] -= common_denominator;
    }

    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sequence_nonempty_for_single_backend() {
        let seq = generate_sequence(&[1.0]);
        assert_eq!(seq, vec![0]);
    }

    #[test]
    fn indices_are_valid() {
        let seq = generate_sequence(&[0.75, 0.25]);
        assert!(seq.iter().all(|&i| i < 2));
        assert!(!seq.is_empty());
    }

    #[test]
    fn shares_match_capacity_within_one_over_length() {
        let seq = generate_sequence(&[0.75, 0.25]);
        let len = seq.len() as f64;
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for &i in &seq {
            *counts.entry(i).or_default() += 1;
        }
        let share0 = *counts.get(&0).unwrap_or(&0) as f64 / len;
        assert!((share0 - 0.75).abs() <= 1.0 / len + 1e-9);
    }

    #[test]
    fn three_way_split_sums_to_sequence_length() {
        let seq = generate_sequence(&[0.5, 0.3, 0.2]);
        let mut counts = [0usize; 3];
        for &i in &seq {
            counts[i] += 1;
        }
        assert_eq!(counts.iter().sum::<usize>(), seq.len());
    }

    #[test]
    fn rescales_when_sum_is_off() {
        let seq = generate_sequence(&[0.5, 0.5001]);
        assert!(!seq.is_empty());
    }
}
