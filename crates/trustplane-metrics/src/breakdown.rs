//! Percentage breakdowns
//!
//! Shares are computed in integer tenths of a percent with a
//! largest-remainder split: every share is floored, then the leftover
//! tenths go to the categories with the largest fractional parts. Each
//! share stays within 0.1 of its exact value and over exhaustive
//! categories the result always sums to 100.0.

use std::cmp::Reverse;

use trustplane_common::CategoryShare;

const TENTHS_TOTAL: u128 = 1000;

/// Split `counts` into percentages rounded to one decimal place.
///
/// When every count is zero all shares are 0.0. Equal fractional parts
/// favour the larger count, then the first one listed.
pub fn percentage_breakdown(counts: &[(String, u64)]) -> Vec<CategoryShare> {
    let total: u128 = counts.iter().map(|(_, c)| *c as u128).sum();
    if total == 0 {
        return counts
            .iter()
            .map(|(category, count)| CategoryShare {
                category: category.clone(),
                count: *count,
                percentage: 0.0,
            })
            .collect();
    }

    // (floor tenths, fractional numerator over `total`)
    let scaled: Vec<(u128, u128)> = counts
        .iter()
        .map(|(_, c)| {
            let exact = *c as u128 * TENTHS_TOTAL;
            (exact / total, exact % total)
        })
        .collect();
    let mut tenths: Vec<u128> = scaled.iter().map(|(floor, _)| *floor).collect();

    let leftover = TENTHS_TOTAL - tenths.iter().sum::<u128>();
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by_key(|&i| (Reverse(scaled[i].1), Reverse(counts[i].1), i));
    for &i in order.iter().take(leftover as usize) {
        tenths[i] += 1;
    }

    counts
        .iter()
        .zip(tenths)
        .map(|((category, count), t)| CategoryShare {
            category: category.clone(),
            count: *count,
            percentage: t as f64 / 10.0,
        })
        .collect()
}
