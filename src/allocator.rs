//! Progressive-tax allocator (4.B).
//!
//! Distributes a token budget across N items. Small items ("below average")
//! are protected and kept whole whenever that's feasible; the deficit is
//! taxed proportionally off the larger items instead. When protection isn't
//! feasible (the small items alone already exceed the target), every item
//! is taxed proportionally ("fallback mode").

#[derive(Debug, Clone)]
pub struct AllocatorItem {
    pub name: String,
    pub tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub name: String,
    pub tokens: u64,
    pub allocated_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationStats {
    pub protection_mode_used: bool,
    pub protected_count: usize,
    pub truncated_count: usize,
    pub deficit: i64,
}

pub struct AllocationResult {
    pub allocations: Vec<Allocation>,
    pub stats: AllocationStats,
}

/// Allocate `target` tokens across `items` per the progressive-tax algorithm
/// in §4.B. `items` must be non-empty if `target` is exceeded; an empty
/// slice returns an empty allocation with default stats.
pub fn allocate(items: &[AllocatorItem], target: u64) -> AllocationResult {
    if items.is_empty() {
        return AllocationResult {
            allocations: Vec::new(),
            stats: AllocationStats::default(),
        };
    }

    let total: u64 = items.iter().map(|item| item.tokens).sum();
    let deficit = total as i64 - target as i64;

    if deficit <= 0 {
        let allocations = items
            .iter()
            .map(|item| Allocation {
                name: item.name.clone(),
                tokens: item.tokens,
                allocated_tokens: item.tokens,
            })
            .collect();
        return AllocationResult {
            allocations,
            stats: AllocationStats {
                protection_mode_used: false,
                protected_count: items.len(),
                truncated_count: 0,
                deficit,
            },
        };
    }

    let deficit_u = deficit as u64;
    let n = items.len() as u64;
    let avg = deficit_u as f64 / n as f64;

    let (below, above): (Vec<&AllocatorItem>, Vec<&AllocatorItem>) =
        items.iter().partition(|item| (item.tokens as f64) < avg);
    let sum_below: u64 = below.iter().map(|item| item.tokens).sum();
    let protection_mode_used = !below.is_empty() && sum_below <= target;

    let allocations = if protection_mode_used {
        protection_mode(items, &above, deficit_u)
    } else {
        fallback_mode(items, total, deficit_u)
    };

    let protected_count = if protection_mode_used { below.len() } else { 0 };
    let truncated_count = allocations
        .iter()
        .filter(|allocation| allocation.exact < allocation.tokens as f64)
        .count();

    let allocations = redistribute_rounding_remainder(allocations, target);

    AllocationResult {
        allocations,
        stats: AllocationStats {
            protection_mode_used,
            protected_count,
            truncated_count,
            deficit,
        },
    }
}

/// An allocation before the remainder has been apportioned: `exact` is the
/// unrounded float the tax formula produced, clamped to `[0, tokens]`.
struct ExactAllocation {
    name: String,
    tokens: u64,
    exact: f64,
}

fn protection_mode(
    items: &[AllocatorItem],
    above: &[&AllocatorItem],
    deficit: u64,
) -> Vec<ExactAllocation> {
    let sum_above: u64 = above.iter().map(|item| item.tokens).sum();
    let above_names: std::collections::HashSet<&str> =
        above.iter().map(|item| item.name.as_str()).collect();

    items
        .iter()
        .map(|item| {
            if above_names.contains(item.name.as_str()) {
                let tax = if sum_above == 0 {
                    0.0
                } else {
                    (item.tokens as f64 / sum_above as f64) * deficit as f64
                };
                ExactAllocation {
                    name: item.name.clone(),
                    tokens: item.tokens,
                    exact: (item.tokens as f64 - tax).clamp(0.0, item.tokens as f64),
                }
            } else {
                ExactAllocation {
                    name: item.name.clone(),
                    tokens: item.tokens,
                    exact: item.tokens as f64,
                }
            }
        })
        .collect()
}

fn fallback_mode(items: &[AllocatorItem], total: u64, deficit: u64) -> Vec<ExactAllocation> {
    items
        .iter()
        .map(|item| {
            let tax = if total == 0 {
                0.0
            } else {
                (item.tokens as f64 / total as f64) * deficit as f64
            };
            ExactAllocation {
                name: item.name.clone(),
                tokens: item.tokens,
                exact: (item.tokens as f64 - tax).clamp(0.0, item.tokens as f64),
            }
        })
        .collect()
}

/// Round each item's exact share down, then hand the leftover tokens to the
/// items with the largest fractional remainder (the largest-remainder /
/// Hamilton apportionment method), breaking ties by input order.
///
/// This is the real achievable guarantee: equal inputs produce equal
/// outputs whenever `target` divides evenly across them, and otherwise
/// differ by at most one token. Integers can't split 100 tokens three ways
/// into three equal shares, so exact equality for every input isn't
/// possible in general.
fn redistribute_rounding_remainder(allocations: Vec<ExactAllocation>, target: u64) -> Vec<Allocation> {
    let mut floors: Vec<Allocation> = allocations
        .iter()
        .map(|allocation| Allocation {
            name: allocation.name.clone(),
            tokens: allocation.tokens,
            allocated_tokens: allocation.exact.floor() as u64,
        })
        .collect();

    let floor_sum: u64 = floors.iter().map(|allocation| allocation.allocated_tokens).sum();
    let mut remainder = target.saturating_sub(floor_sum);

    let mut order: Vec<usize> = (0..allocations.len()).collect();
    order.sort_by(|&a, &b| {
        let frac_a = allocations[a].exact - allocations[a].exact.floor();
        let frac_b = allocations[b].exact - allocations[b].exact.floor();
        frac_b.partial_cmp(&frac_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    for index in order {
        if remainder == 0 {
            break;
        }
        let allocation = &mut floors[index];
        if allocation.allocated_tokens < allocation.tokens {
            allocation.allocated_tokens += 1;
            remainder -= 1;
        }
    }

    // floor_sum can exceed target only by clamping at `tokens`; claw back
    // from the back of the same order so large items give first.
    if floor_sum > target {
        let mut excess = floor_sum - target;
        for allocation in floors.iter_mut().rev() {
            if excess == 0 {
                break;
            }
            let give_back = allocation.allocated_tokens.min(excess);
            allocation.allocated_tokens -= give_back;
            excess -= give_back;
        }
    }

    floors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, u64)]) -> Vec<AllocatorItem> {
        pairs
            .iter()
            .map(|(name, tokens)| AllocatorItem {
                name: name.to_string(),
                tokens: *tokens,
            })
            .collect()
    }

    fn find<'a>(allocations: &'a [Allocation], name: &str) -> &'a Allocation {
        allocations.iter().find(|a| a.name == name).unwrap()
    }

    #[test]
    fn no_deficit_keeps_everything() {
        let items = items(&[("a", 100), ("b", 200)]);
        let result = allocate(&items, 1000);
        assert_eq!(find(&result.allocations, "a").allocated_tokens, 100);
        assert_eq!(find(&result.allocations, "b").allocated_tokens, 200);
        assert!(!result.stats.protection_mode_used);
    }

    #[test]
    fn scenario_one_giant_file() {
        let items = items(&[("a", 1000), ("b", 1000), ("c", 10_000), ("d", 300_000)]);
        let result = allocate(&items, 100_000);

        assert!(result.stats.protection_mode_used);
        assert_eq!(find(&result.allocations, "a").allocated_tokens, 1000);
        assert_eq!(find(&result.allocations, "b").allocated_tokens, 1000);
        assert_eq!(find(&result.allocations, "c").allocated_tokens, 10_000);
        assert_eq!(find(&result.allocations, "d").allocated_tokens, 88_000);
        assert_eq!(result.stats.protected_count, 3);
        assert_eq!(result.stats.truncated_count, 1);
    }

    #[test]
    fn scenario_two_large_two_small() {
        let items = items(&[("a", 1000), ("b", 1000), ("c", 100_000), ("d", 200_000)]);
        let result = allocate(&items, 100_000);

        assert!(result.stats.protection_mode_used);
        assert_eq!(find(&result.allocations, "a").allocated_tokens, 1000);
        assert_eq!(find(&result.allocations, "b").allocated_tokens, 1000);

        let c = find(&result.allocations, "c").allocated_tokens;
        let d = find(&result.allocations, "d").allocated_tokens;
        assert!((c as i64 - 32_667).abs() <= 2);
        assert!((d as i64 - 65_333).abs() <= 2);

        let c_pct = c as f64 / 100_000.0;
        let d_pct = d as f64 / 200_000.0;
        assert!((c_pct - d_pct).abs() < 0.001);
    }

    #[test]
    fn scenario_fallback() {
        let items = items(&[("a", 149), ("b", 251)]);
        let result = allocate(&items, 100);

        assert!(!result.stats.protection_mode_used);
        let a = find(&result.allocations, "a").allocated_tokens;
        let b = find(&result.allocations, "b").allocated_tokens;
        assert!((a as i64 - 37).abs() <= 1);
        assert!((b as i64 - 63).abs() <= 1);
    }

    #[test]
    fn sum_matches_target_within_rounding() {
        let items = items(&[("a", 17), ("b", 983), ("c", 5000), ("d", 123_456)]);
        let result = allocate(&items, 10_000);
        let sum: u64 = result.allocations.iter().map(|a| a.allocated_tokens).sum();
        assert!((sum as i64 - 10_000).abs() <= 1);
    }

    #[test]
    fn allocations_never_negative_or_over_original() {
        let items = items(&[("a", 1), ("b", 2), ("c", 3)]);
        let result = allocate(&items, 0);
        for allocation in &result.allocations {
            assert!(allocation.allocated_tokens <= allocation.tokens);
        }
    }

    #[test]
    fn equal_inputs_yield_equal_outputs_when_evenly_divisible() {
        let items = items(&[("a", 100), ("b", 100), ("c", 100), ("d", 100)]);
        let result = allocate(&items, 200);
        let values: Vec<u64> = result.allocations.iter().map(|a| a.allocated_tokens).collect();
        assert!(values.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn equal_inputs_differ_by_at_most_one_token_when_not_evenly_divisible() {
        // 100 tokens cannot be split three equal ways as integers; the
        // achievable guarantee is a spread of at most one token.
        let items = items(&[("a", 100), ("b", 100), ("c", 100)]);
        let result = allocate(&items, 100);
        let values: Vec<u64> = result.allocations.iter().map(|a| a.allocated_tokens).collect();
        let min = *values.iter().min().unwrap();
        let max = *values.iter().max().unwrap();
        assert!(max - min <= 1, "values {values:?} spread more than one token");
        let sum: u64 = values.iter().sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn protection_infeasible_falls_back() {
        // below items alone exceed target -> protection impossible
        let items = items(&[("a", 90), ("b", 90), ("c", 1000)]);
        let result = allocate(&items, 100);
        assert!(!result.stats.protection_mode_used);
    }
}
