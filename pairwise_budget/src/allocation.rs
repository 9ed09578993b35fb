//! Sequential budget allocation over the resolved ranking.
//!
//! The walk visits options in ranking order and draws each option's tier
//! amount from one of two budget streams (long and short duration). The long
//! stream is only open while some option ahead in the walk could still
//! qualify for it; when that window closes, the unspent long remainder moves
//! into the short stream exactly once.

use log::debug;

use crate::config::*;

// Long-stream eligibility of one ranked option, per strategy.
fn long_stream_eligible(option: &ElectionOption, rank: usize, rules: &EngineRules) -> bool {
    if option.stop_marker || !option.long_stream_eligible {
        return false;
    }
    match rules.strategy {
        AllocationStrategy::Standard => true,
        AllocationStrategy::EligibilityRanked => rank < rules.long_rank_threshold,
    }
}

/// Walks the ranking in order and assigns funds from the two budget streams.
///
/// The stop marker and everything ranked after it are rejected as past the
/// cutoff. A long-stream-eligible option tries the long stream first and
/// falls through to the short stream; anything else draws from the short
/// stream directly. An option neither stream can afford is rejected, and the
/// walk continues.
pub fn allocate(ranking: &[RankedOption], rules: &EngineRules) -> (Vec<Allocation>, AllocationSummary) {
    let long_budget = rules.total_budget * rules.long_stream_ratio;
    let short_budget = rules.total_budget * rules.short_stream_ratio;
    let mut remaining_long = long_budget;
    let mut remaining_short = short_budget;
    let mut transferred = 0.0;
    let mut window_open = true;
    let mut past_cutoff = false;

    let eligible: Vec<bool> = ranking
        .iter()
        .enumerate()
        .map(|(rank, r)| long_stream_eligible(&r.option, rank, rules))
        .collect();

    let mut allocations: Vec<Allocation> = Vec::with_capacity(ranking.len());
    for (rank, ranked) in ranking.iter().enumerate() {
        if ranked.option.stop_marker {
            past_cutoff = true;
        }

        // The long window closes when nothing from here on can qualify.
        if window_open && (past_cutoff || !eligible[rank..].iter().any(|e| *e)) {
            transferred = remaining_long;
            remaining_short += remaining_long;
            remaining_long = 0.0;
            window_open = false;
            if transferred > 0.0 {
                debug!(
                    "allocate: long stream window closed at rank {}, moving {} into the short stream",
                    rank + 1,
                    transferred
                );
            }
        }

        if past_cutoff {
            allocations.push(Allocation {
                option: ranked.option.clone(),
                allocated: false,
                stream: StreamDuration::None,
                amount: 0.0,
                rejection: Some(RejectionReason::PastCutoff),
            });
            continue;
        }

        let amount = ranked.option.budget_amount;
        if eligible[rank] && amount <= remaining_long {
            remaining_long -= amount;
            allocations.push(Allocation {
                option: ranked.option.clone(),
                allocated: true,
                stream: StreamDuration::Long,
                amount,
                rejection: None,
            });
        } else if amount <= remaining_short {
            remaining_short -= amount;
            allocations.push(Allocation {
                option: ranked.option.clone(),
                allocated: true,
                stream: StreamDuration::Short,
                amount,
                rejection: None,
            });
        } else {
            debug!(
                "allocate: cannot afford {} for {:?} (long {}, short {})",
                amount, ranked.option.label, remaining_long, remaining_short
            );
            allocations.push(Allocation {
                option: ranked.option.clone(),
                allocated: false,
                stream: StreamDuration::None,
                amount: 0.0,
                rejection: Some(RejectionReason::InsufficientBudget),
            });
        }
    }

    let summary = AllocationSummary::derive(&allocations, long_budget, short_budget, transferred);
    (allocations, summary)
}

impl AllocationSummary {
    /// Computes every aggregate from the final allocation set, so that the
    /// summary can never disagree with the allocations it describes.
    pub fn derive(
        allocations: &[Allocation],
        long_budget: f64,
        short_budget: f64,
        transferred: f64,
    ) -> AllocationSummary {
        let allocated_long: f64 = allocations
            .iter()
            .filter(|a| a.stream == StreamDuration::Long)
            .map(|a| a.amount)
            .sum();
        let allocated_short: f64 = allocations
            .iter()
            .filter(|a| a.stream == StreamDuration::Short)
            .map(|a| a.amount)
            .sum();
        let total_allocated = allocated_long + allocated_short;
        AllocationSummary {
            long_budget,
            short_budget,
            transferred,
            remaining_long: long_budget - transferred - allocated_long,
            remaining_short: short_budget + transferred - allocated_short,
            total_allocated,
            total_unspent: (long_budget + short_budget) - total_allocated,
            allocated_count: allocations.iter().filter(|a| a.allocated).count(),
            rejected_count: allocations.iter().filter(|a| !a.allocated).count(),
        }
    }
}
