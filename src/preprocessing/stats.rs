//! Non-parametric statistics used by the feature selector
//!
//! Rank correlation with a two-sided significance test and the
//! Kruskal-Wallis H test. Distribution tails come from `statrs`.

use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

/// Rank correlation between two samples with its two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationTest {
    pub rho: f64,
    pub p_value: f64,
}

/// Kruskal-Wallis test outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KruskalTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Fractional ranks (1-based), ties receive the average rank
pub fn rank(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && indexed[j + 1].1 == indexed[i].1 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for item in indexed.iter().take(j + 1).skip(i) {
            ranks[item.0] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

/// Pearson correlation, `None` when either side has zero variance
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman rank correlation, `None` when undefined (zero variance)
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    pearson(&rank(x), &rank(y))
}

/// Spearman correlation with a two-sided p-value from Student's t
/// with n - 2 degrees of freedom.
pub fn spearman_test(x: &[f64], y: &[f64]) -> Option<CorrelationTest> {
    let rho = spearman(x, y)?;
    let n = x.len();
    if n < 3 {
        return Some(CorrelationTest { rho, p_value: 1.0 });
    }

    let denom = 1.0 - rho * rho;
    if denom <= 0.0 {
        return Some(CorrelationTest { rho, p_value: 0.0 });
    }

    let dof = (n - 2) as f64;
    let t = rho * (dof / denom).sqrt();
    let p_value = match StudentsT::new(0.0, 1.0, dof) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => 1.0,
    };
    Some(CorrelationTest { rho, p_value })
}

/// Kruskal-Wallis H test with tie correction.
///
/// Returns `None` when fewer than two non-empty groups are given.
/// Samples that are all identical give `p_value = 1.0`.
pub fn kruskal_wallis(groups: &[Vec<f64>]) -> Option<KruskalTest> {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    if groups.len() < 2 {
        return None;
    }

    let pooled: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let n_total = pooled.len() as f64;
    let ranks = rank(&pooled);

    let mut offset = 0;
    let mut sum_term = 0.0;
    for g in &groups {
        let rank_sum: f64 = ranks[offset..offset + g.len()].iter().sum();
        sum_term += rank_sum * rank_sum / g.len() as f64;
        offset += g.len();
    }
    let h = 12.0 / (n_total * (n_total + 1.0)) * sum_term - 3.0 * (n_total + 1.0);

    // tie correction
    let mut sorted = pooled.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut tie_sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[i] {
            j += 1;
        }
        let t = (j - i + 1) as f64;
        tie_sum += t * t * t - t;
        i = j + 1;
    }
    let correction = 1.0 - tie_sum / (n_total * n_total * n_total - n_total);
    if correction <= 0.0 {
        return Some(KruskalTest { statistic: 0.0, p_value: 1.0 });
    }

    let statistic = h / correction;
    let dof = (groups.len() - 1) as f64;
    let p_value = match ChiSquared::new(dof) {
        Ok(dist) => dist.sf(statistic.max(0.0)),
        Err(_) => 1.0,
    };
    Some(KruskalTest { statistic, p_value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rank_with_ties() {
        let ranks = rank(&[10.0, 20.0, 20.0, 5.0]);
        assert_eq!(ranks, vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_spearman_monotone() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 25.0];
        let test = spearman_test(&x, &y).unwrap();
        assert_abs_diff_eq!(test.rho, 1.0, epsilon = 1e-12);
        assert_eq!(test.p_value, 0.0);
    }

    #[test]
    fn test_spearman_zero_variance_is_undefined() {
        let x = [3.0, 3.0, 3.0, 3.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        assert!(spearman_test(&x, &y).is_none());
    }

    #[test]
    fn test_spearman_p_value_matches_reference() {
        // sum of squared rank differences is 16, so rho = 1 - 96/990
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let y = [2.0, 1.0, 4.0, 3.0, 6.0, 5.0, 8.0, 10.0, 7.0, 9.0];
        let test = spearman_test(&x, &y).unwrap();
        assert_abs_diff_eq!(test.rho, 1.0 - 96.0 / 990.0, epsilon = 1e-12);
        assert!(test.p_value < 0.01);
    }

    #[test]
    fn test_kruskal_separated_groups() {
        let groups = vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![6.0, 7.0, 8.0, 9.0, 10.0],
        ];
        let test = kruskal_wallis(&groups).unwrap();
        assert_abs_diff_eq!(test.statistic, 6.818181818, epsilon = 1e-6);
        assert!(test.p_value < 0.01);
    }

    #[test]
    fn test_kruskal_identical_values() {
        let groups = vec![vec![1.0; 5], vec![1.0; 5]];
        let test = kruskal_wallis(&groups).unwrap();
        assert_eq!(test.p_value, 1.0);
    }

    #[test]
    fn test_kruskal_needs_two_groups() {
        assert!(kruskal_wallis(&[vec![1.0, 2.0]]).is_none());
    }
}
