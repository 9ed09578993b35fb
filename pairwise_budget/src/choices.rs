//! Option label parsing and ballot normalization.

use std::collections::HashMap;
use std::collections::HashSet;

use log::warn;

use crate::config::*;

// The labels recognized (case-insensitively) as the stop marker.
const STOP_SENTINELS: [&str; 2] = ["none below", "none of the below"];

const TIER_SEPARATOR: &str = " - ";

/// The outcome of parsing one raw option label.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedChoice {
    pub provider_name: String,
    pub tier: BudgetTier,
}

/// Splits a raw option label into a provider name and a budget tier.
///
/// The stop marker sentinel is recognized first and keeps its label verbatim
/// as the provider name. Otherwise the label is split on `" - "`: the right
/// token selects the tier (`ext` means extended, anything else basic) and the
/// left part, trimmed, is the provider. A label without separator is a
/// provider with the basic tier. Never fails.
pub fn parse_label(label: &str) -> ParsedChoice {
    let lowered = label.trim().to_lowercase();
    if STOP_SENTINELS.iter().any(|s| *s == lowered) {
        return ParsedChoice {
            provider_name: label.to_string(),
            tier: BudgetTier::None,
        };
    }
    match label.split_once(TIER_SEPARATOR) {
        Some((provider, tier_token)) => {
            let tier = if tier_token.trim().eq_ignore_ascii_case("ext") {
                BudgetTier::Extended
            } else {
                BudgetTier::Basic
            };
            ParsedChoice {
                provider_name: provider.trim().to_string(),
                tier,
            }
        }
        None => ParsedChoice {
            provider_name: label.trim().to_string(),
            tier: BudgetTier::Basic,
        },
    }
}

/// Builds the canonical option list from the raw labels and the provider
/// metadata table.
///
/// Ids are the 1-based positions in `labels`. A provider missing from the
/// table gets zero amounts and no long-stream eligibility rather than
/// failing the whole election.
pub fn build_options(
    labels: &[String],
    providers: &HashMap<String, ProviderBudget>,
) -> Vec<ElectionOption> {
    let mut res: Vec<ElectionOption> = Vec::with_capacity(labels.len());
    for (idx, label) in labels.iter().enumerate() {
        let parsed = parse_label(label);
        let stop_marker = parsed.tier == BudgetTier::None;
        let meta = providers.get(&parsed.provider_name);
        if meta.is_none() && !stop_marker {
            warn!(
                "build_options: no budget metadata for provider {:?}, defaulting amounts to zero",
                parsed.provider_name
            );
        }
        let budget_amount = match (meta, parsed.tier) {
            (Some(m), BudgetTier::Basic) => m.basic_amount,
            (Some(m), BudgetTier::Extended) => m.extended_amount,
            _ => 0.0,
        };
        res.push(ElectionOption {
            id: (idx + 1) as OptionId,
            label: label.clone(),
            provider_name: parsed.provider_name,
            tier: parsed.tier,
            budget_amount,
            long_stream_eligible: meta.map(|m| m.long_stream_eligible).unwrap_or(false),
            stop_marker,
        });
    }
    res
}

/// Rewrites a ballot so that no provider's basic tier is ranked below its
/// extended tier.
///
/// For every provider with both tiers present in the ballot and the extended
/// option ranked strictly before the basic one, the basic option moves to the
/// extended option's former position and the extended option follows
/// immediately after. All other relative ordering is preserved. Idempotent.
pub fn normalize_ballot(ballot: &Ballot, options: &[ElectionOption]) -> Ballot {
    // Tier pairs (basic id, extended id) per provider, in canonical order.
    let mut extended_by_provider: HashMap<&str, OptionId> = HashMap::new();
    for opt in options.iter().filter(|o| o.tier == BudgetTier::Extended) {
        extended_by_provider.insert(opt.provider_name.as_str(), opt.id);
    }
    let pairs: Vec<(OptionId, OptionId)> = options
        .iter()
        .filter(|o| o.tier == BudgetTier::Basic)
        .filter_map(|o| {
            extended_by_provider
                .get(o.provider_name.as_str())
                .map(|ext_id| (o.id, *ext_id))
        })
        .collect();

    let ranked_set: HashSet<OptionId> = ballot.ranked.iter().cloned().collect();
    let mut ranked = ballot.ranked.clone();
    for (basic_id, ext_id) in pairs {
        if !(ranked_set.contains(&basic_id) && ranked_set.contains(&ext_id)) {
            continue;
        }
        let pos_basic = ranked.iter().position(|id| *id == basic_id);
        let pos_ext = ranked.iter().position(|id| *id == ext_id);
        if let (Some(pb), Some(pe)) = (pos_basic, pos_ext) {
            if pe < pb {
                // Removing the later element does not shift the earlier one.
                ranked.remove(pb);
                ranked.insert(pe, basic_id);
            }
        }
    }
    Ballot {
        voter: ballot.voter.clone(),
        weight: ballot.weight,
        ranked,
    }
}
