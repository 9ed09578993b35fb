mod allocation;
pub mod builder;
mod choices;
mod config;
pub mod manual;

use std::collections::HashMap;

use log::{info, warn};

pub use crate::allocation::allocate;
pub use crate::choices::{build_options, normalize_ballot, parse_label, ParsedChoice};
pub use crate::config::*;

// **** Private structures ****

/// Weighted pairwise win matrix over the canonical option list.
///
/// Stored as a flat n-by-n arena indexed by option position: the cell (i, j)
/// holds the total voting power preferring option i over option j. The
/// participation of a pair is the sum of its two cells, since every counted
/// ballot contributes its weight to exactly one side.
#[derive(PartialEq, Debug, Clone)]
pub struct PairwiseMatrix {
    n: usize,
    votes: Vec<f64>,
}

impl PairwiseMatrix {
    fn new(n: usize) -> PairwiseMatrix {
        PairwiseMatrix {
            n,
            votes: vec![0.0; n * n],
        }
    }

    fn idx(&self, winner: OptionId, loser: OptionId) -> usize {
        (winner as usize - 1) * self.n + (loser as usize - 1)
    }

    fn add(&mut self, winner: OptionId, loser: OptionId, weight: f64) {
        let idx = self.idx(winner, loser);
        self.votes[idx] += weight;
    }

    /// Total voting power preferring option `a` over option `b`.
    pub fn votes_for(&self, a: OptionId, b: OptionId) -> f64 {
        self.votes[self.idx(a, b)]
    }

    /// Total voting power that expressed a preference between `a` and `b`.
    pub fn participating(&self, a: OptionId, b: OptionId) -> f64 {
        self.votes_for(a, b) + self.votes_for(b, a)
    }

    /// Head-to-head outcome for the pair: strictly more weighted votes wins,
    /// equal totals tie (including the no-data case).
    pub fn outcome(&self, a: OptionId, b: OptionId) -> PairOutcome {
        let va = self.votes_for(a, b);
        let vb = self.votes_for(b, a);
        if va > vb {
            PairOutcome::Win(a)
        } else if vb > va {
            PairOutcome::Win(b)
        } else {
            PairOutcome::Tie
        }
    }

    /// The full match table, one entry per unordered pair in canonical order.
    pub fn pairs(&self) -> Vec<PairwiseResult> {
        if self.n == 0 {
            return Vec::new();
        }
        let mut res: Vec<PairwiseResult> = Vec::with_capacity(self.n * (self.n - 1) / 2);
        for a in 1..=self.n as OptionId {
            for b in (a + 1)..=self.n as OptionId {
                res.push(PairwiseResult {
                    option_a: a,
                    option_b: b,
                    votes_a: self.votes_for(a, b),
                    votes_b: self.votes_for(b, a),
                    participating: self.participating(a, b),
                    outcome: self.outcome(a, b),
                });
            }
        }
        res
    }
}

// The 0-indexed rank of every countable option in one ballot.
//
// Unknown ids are dropped with a warning and a repeated id keeps its first
// occurrence, so ranks are positions within the retained sequence.
fn ballot_positions(ballot: &Ballot, num_options: usize) -> HashMap<OptionId, usize> {
    let mut positions: HashMap<OptionId, usize> = HashMap::new();
    let mut next_rank: usize = 0;
    for id in ballot.ranked.iter() {
        if *id == 0 || *id as usize > num_options {
            warn!(
                "ballot {:?}: skipping unknown option id {:?}",
                ballot.voter, id
            );
            continue;
        }
        if positions.contains_key(id) {
            warn!(
                "ballot {:?}: option id {:?} ranked twice, keeping the first occurrence",
                ballot.voter, id
            );
            continue;
        }
        positions.insert(*id, next_rank);
        next_rank += 1;
    }
    positions
}

/// Builds the weighted pairwise win matrix from all ballots.
///
/// For every unordered pair of options, a ballot contributes its weight to
/// the side it ranks higher. Options ranked after the ballot's stop marker
/// are treated as rejected by that voter: a pair with both members past the
/// marker records no vote, and an option past the marker never wins against
/// an unranked one.
pub fn pairwise_tally(ballots: &[Ballot], options: &[ElectionOption]) -> PairwiseMatrix {
    let n = options.len();
    let mut matrix = PairwiseMatrix::new(n);
    let stop_id: Option<OptionId> = options.iter().find(|o| o.stop_marker).map(|o| o.id);

    for ballot in ballots.iter() {
        let positions = ballot_positions(ballot, n);
        if positions.is_empty() {
            continue;
        }
        let stop_pos: Option<usize> = stop_id.and_then(|id| positions.get(&id).cloned());
        let weight = ballot.weight;

        for i in 1..=n as OptionId {
            for j in (i + 1)..=n as OptionId {
                match (positions.get(&i), positions.get(&j)) {
                    (Some(&pi), Some(&pj)) => {
                        if let Some(sp) = stop_pos {
                            if pi > sp && pj > sp {
                                // Both rejected by this voter.
                                continue;
                            }
                        }
                        if pi < pj {
                            matrix.add(i, j, weight);
                        } else {
                            matrix.add(j, i, weight);
                        }
                    }
                    (Some(&pi), None) => {
                        if stop_pos.map_or(true, |sp| pi <= sp) {
                            matrix.add(i, j, weight);
                        }
                    }
                    (None, Some(&pj)) => {
                        if stop_pos.map_or(true, |sp| pj <= sp) {
                            matrix.add(j, i, weight);
                        }
                    }
                    (None, None) => {}
                }
            }
        }
    }
    matrix
}

/// Converts the pairwise matrix into scored options in final ranking order.
///
/// Each option collects `win_points` per matchup it strictly wins,
/// `tie_points` per matchup tied with nonzero votes and `loss_points` per
/// matchup strictly lost. `average_support` is the option's vote total across
/// all matchups divided by the number of matchups with any participation
/// (zero when it never participated). The sort is descending by score, then
/// by average support; remaining ties keep the canonical option order.
pub fn resolve_ranking(
    matrix: &PairwiseMatrix,
    options: &[ElectionOption],
    rules: &EngineRules,
) -> Vec<RankedOption> {
    let mut ranking: Vec<RankedOption> = Vec::with_capacity(options.len());
    for opt in options.iter() {
        let mut score = 0.0;
        let mut support_sum = 0.0;
        let mut matchups_with_votes: usize = 0;
        for other in options.iter() {
            if other.id == opt.id {
                continue;
            }
            let own = matrix.votes_for(opt.id, other.id);
            let theirs = matrix.votes_for(other.id, opt.id);
            if own > theirs {
                score += rules.win_points;
            } else if own < theirs {
                score += rules.loss_points;
            } else if own > 0.0 {
                score += rules.tie_points;
            }
            support_sum += own;
            if own + theirs > 0.0 {
                matchups_with_votes += 1;
            }
        }
        let average_support = if matchups_with_votes > 0 {
            support_sum / matchups_with_votes as f64
        } else {
            0.0
        };
        ranking.push(RankedOption {
            option: opt.clone(),
            score,
            average_support,
        });
    }
    // Stable sort: equal (score, support) keeps the canonical option order.
    ranking.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.average_support
                    .partial_cmp(&a.average_support)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    ranking
}

/// Runs the full pipeline for one election: normalize the ballots, tally the
/// pairwise matrix, resolve the ranking and allocate the budget.
///
/// Arguments:
/// * `ballots` the raw ballots; entries whose voting power is not positive
///   and finite are skipped with a warning
/// * `options` the canonical option list, as produced by [build_options]
/// * `rules` the configuration that governs this election
pub fn run_budget_election(
    ballots: &[Ballot],
    options: &[ElectionOption],
    rules: &EngineRules,
) -> Result<ElectionOutcome, TallyError> {
    if options.is_empty() {
        return Err(TallyError::EmptyElection);
    }
    if rules.total_budget < 0.0 {
        return Err(TallyError::InvalidRules("total budget must be non-negative"));
    }
    if rules.long_stream_ratio < 0.0 || rules.short_stream_ratio < 0.0 {
        return Err(TallyError::InvalidRules("stream ratios must be non-negative"));
    }
    if rules.long_stream_ratio + rules.short_stream_ratio > 1.0 + 1e-9 {
        return Err(TallyError::InvalidRules(
            "stream ratios must not exceed the whole budget",
        ));
    }

    info!(
        "run_budget_election: processing {:?} ballots over {:?} options",
        ballots.len(),
        options.len()
    );

    let mut normalized: Vec<Ballot> = Vec::with_capacity(ballots.len());
    for ballot in ballots.iter() {
        if !ballot.weight.is_finite() || ballot.weight <= 0.0 {
            warn!(
                "run_budget_election: skipping ballot {:?} with unusable voting power {:?}",
                ballot.voter, ballot.weight
            );
            continue;
        }
        normalized.push(normalize_ballot(ballot, options));
    }

    let matrix = pairwise_tally(&normalized, options);
    let ranking = resolve_ranking(&matrix, options, rules);
    for (idx, r) in ranking.iter().enumerate() {
        info!(
            "Rank {}: {} (score {}, average support {})",
            idx + 1,
            r.option.label,
            r.score,
            r.average_support
        );
    }

    let (allocations, summary) = allocate(&ranking, rules);
    info!(
        "run_budget_election: allocated {} across {} options ({} rejected)",
        summary.total_allocated, summary.allocated_count, summary.rejected_count
    );

    Ok(ElectionOutcome {
        pairwise: matrix.pairs(),
        ranking,
        allocations,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn plain_options(labels: &[&str]) -> Vec<ElectionOption> {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        build_options(&labels, &HashMap::new())
    }

    fn ballot(voter: &str, weight: f64, ranked: &[OptionId]) -> Ballot {
        Ballot {
            voter: voter.to_string(),
            weight,
            ranked: ranked.to_vec(),
        }
    }

    #[test]
    fn weighted_majority_wins_the_pair() {
        // A beats B 10 to 5.
        let options = plain_options(&["A", "B"]);
        let ballots = vec![ballot("v1", 10.0, &[1, 2]), ballot("v2", 5.0, &[2, 1])];
        let matrix = pairwise_tally(&ballots, &options);
        assert_eq!(matrix.votes_for(1, 2), 10.0);
        assert_eq!(matrix.votes_for(2, 1), 5.0);
        assert_eq!(matrix.outcome(1, 2), PairOutcome::Win(1));

        let ranking = resolve_ranking(&matrix, &options, &EngineRules::DEFAULT_RULES);
        assert_eq!(ranking[0].option.id, 1);
        assert_eq!(ranking[0].score, 1.0);
        assert_eq!(ranking[1].score, 0.0);
    }

    #[test]
    fn option_past_stop_marker_still_loses_head_to_head() {
        let options = plain_options(&["A", "None below", "B"]);
        let ballots = vec![ballot("v1", 1.0, &[1, 2, 3])];
        let matrix = pairwise_tally(&ballots, &options);
        // Only B is past the marker, so the comparison stands and A wins.
        assert_eq!(matrix.votes_for(1, 3), 1.0);
        assert_eq!(matrix.votes_for(3, 1), 0.0);
        // A beats the stop marker itself.
        assert_eq!(matrix.votes_for(1, 2), 1.0);
        // The stop marker beats B (B is ranked past it).
        assert_eq!(matrix.votes_for(2, 3), 1.0);
    }

    #[test]
    fn pair_with_both_members_past_marker_is_skipped() {
        let options = plain_options(&["A", "None below", "B", "C"]);
        let ballots = vec![ballot("v1", 1.0, &[1, 2, 3, 4])];
        let matrix = pairwise_tally(&ballots, &options);
        // B vs C are both past the marker: no vote either way.
        assert_eq!(matrix.votes_for(3, 4), 0.0);
        assert_eq!(matrix.votes_for(4, 3), 0.0);
        assert_eq!(matrix.participating(3, 4), 0.0);
        assert_eq!(matrix.outcome(3, 4), PairOutcome::Tie);
    }

    #[test]
    fn option_past_marker_does_not_win_against_unranked() {
        let options = plain_options(&["A", "None below", "B", "C"]);
        // B is ranked past the marker, C is not ranked at all.
        let ballots = vec![ballot("v1", 1.0, &[1, 2, 3])];
        let matrix = pairwise_tally(&ballots, &options);
        assert_eq!(matrix.votes_for(3, 4), 0.0);
        // A, ranked before the marker, does win against the unranked C.
        assert_eq!(matrix.votes_for(1, 4), 1.0);
    }

    #[test]
    fn matrix_is_symmetric_and_conserves_weight() {
        let options = plain_options(&["A", "B", "C", "None below"]);
        let ballots = vec![
            ballot("v1", 3.5, &[1, 2, 4, 3]),
            ballot("v2", 2.0, &[2, 3, 1]),
            ballot("v3", 1.5, &[3]),
        ];
        let matrix = pairwise_tally(&ballots, &options);
        for pair in matrix.pairs() {
            assert_eq!(
                pair.participating,
                matrix.participating(pair.option_b, pair.option_a)
            );
            assert_eq!(pair.votes_a, matrix.votes_for(pair.option_a, pair.option_b));
        }
        // v1 ranks A and B above its marker: its full weight lands on exactly
        // one side of the (A, B) pair, and v2 adds its own on the other side.
        assert_eq!(matrix.votes_for(1, 2), 3.5);
        assert_eq!(matrix.votes_for(2, 1), 2.0);
        assert_eq!(matrix.participating(1, 2), 5.5);
    }

    #[test]
    fn unranked_option_has_zero_average_support() {
        let options = plain_options(&["A", "B", "C"]);
        // C is never ranked by anyone.
        let ballots = vec![ballot("v1", 2.0, &[1, 2]), ballot("v2", 1.0, &[2, 1])];
        let matrix = pairwise_tally(&ballots, &options);
        let ranking = resolve_ranking(&matrix, &options, &EngineRules::DEFAULT_RULES);
        let c = ranking.iter().find(|r| r.option.id == 3).unwrap();
        assert_eq!(c.average_support, 0.0);
        // Two one-sided losses with default weights: no points at all.
        assert_eq!(c.score, 0.0);
        assert_eq!(ranking.last().unwrap().option.id, 3);
    }

    #[test]
    fn tie_with_votes_scores_tie_points() {
        let options = plain_options(&["A", "B"]);
        let ballots = vec![ballot("v1", 2.0, &[1, 2]), ballot("v2", 2.0, &[2, 1])];
        let matrix = pairwise_tally(&ballots, &options);
        let ranking = resolve_ranking(&matrix, &options, &EngineRules::DEFAULT_RULES);
        assert_eq!(ranking[0].score, 0.5);
        assert_eq!(ranking[1].score, 0.5);
        // Canonical order breaks the remaining tie.
        assert_eq!(ranking[0].option.id, 1);
    }

    #[test]
    fn unknown_and_duplicate_ids_are_skipped_not_fatal() {
        let options = plain_options(&["A", "B"]);
        let ballots = vec![ballot("v1", 1.0, &[1, 99, 2, 1])];
        let matrix = pairwise_tally(&ballots, &options);
        assert_eq!(matrix.votes_for(1, 2), 1.0);
        assert_eq!(matrix.votes_for(2, 1), 0.0);
    }

    #[test]
    fn identical_inputs_yield_identical_outcomes() {
        let mut providers = HashMap::new();
        providers.insert(
            "A".to_string(),
            ProviderBudget {
                basic_amount: 100.0,
                extended_amount: 200.0,
                long_stream_eligible: true,
            },
        );
        providers.insert(
            "B".to_string(),
            ProviderBudget {
                basic_amount: 150.0,
                extended_amount: 300.0,
                long_stream_eligible: false,
            },
        );
        let labels: Vec<String> = vec![
            "A".to_string(),
            "A - ext".to_string(),
            "B".to_string(),
            "None below".to_string(),
        ];
        let options = build_options(&labels, &providers);
        let ballots = vec![
            ballot("v1", 3.0, &[2, 1, 3, 4]),
            ballot("v2", 1.0, &[3, 4, 1]),
            ballot("v3", 2.0, &[1, 3]),
        ];
        let mut rules = EngineRules::DEFAULT_RULES;
        rules.total_budget = 600.0;
        let first = run_budget_election(&ballots, &options, &rules).unwrap();
        let second = run_budget_election(&ballots, &options, &rules).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_option_past_final_marker_is_funded() {
        let mut providers = HashMap::new();
        for name in ["A", "B", "C"] {
            providers.insert(
                name.to_string(),
                ProviderBudget {
                    basic_amount: 10.0,
                    extended_amount: 20.0,
                    long_stream_eligible: true,
                },
            );
        }
        let labels: Vec<String> = vec![
            "A".to_string(),
            "B".to_string(),
            "None below".to_string(),
            "C".to_string(),
        ];
        let options = build_options(&labels, &providers);
        // Everyone ranks C past the marker.
        let ballots = vec![
            ballot("v1", 2.0, &[1, 2, 3, 4]),
            ballot("v2", 1.0, &[2, 1, 3, 4]),
        ];
        let mut rules = EngineRules::DEFAULT_RULES;
        rules.total_budget = 900.0;
        let outcome = run_budget_election(&ballots, &options, &rules).unwrap();
        let marker_rank = outcome
            .ranking
            .iter()
            .position(|r| r.option.stop_marker)
            .unwrap();
        for (idx, alloc) in outcome.allocations.iter().enumerate() {
            if idx >= marker_rank {
                assert!(!alloc.allocated);
                assert_eq!(alloc.rejection, Some(RejectionReason::PastCutoff));
            }
        }
    }

    #[test]
    fn election_with_no_ballots_yields_all_ties() {
        let options = plain_options(&["A", "B", "C"]);
        let outcome = run_budget_election(&[], &options, &EngineRules::DEFAULT_RULES).unwrap();
        assert_eq!(outcome.ranking.len(), 3);
        assert!(outcome.ranking.iter().all(|r| r.score == 0.0));
        assert!(outcome.ranking.iter().all(|r| r.average_support == 0.0));
        // Canonical option order carries the all-ties ranking.
        let ids: Vec<OptionId> = outcome.ranking.iter().map(|r| r.option.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn non_finite_voting_power_is_skipped() {
        let options = plain_options(&["A", "B"]);
        let ballots = vec![
            ballot("v1", f64::NAN, &[2, 1]),
            ballot("v2", f64::INFINITY, &[2, 1]),
            ballot("v3", 1.0, &[1, 2]),
        ];
        let outcome = run_budget_election(&ballots, &options, &EngineRules::DEFAULT_RULES).unwrap();
        // Only v3 counts: A wins the pair cleanly.
        assert_eq!(outcome.ranking[0].option.id, 1);
        assert_eq!(outcome.ranking[0].score, 1.0);
        assert_eq!(outcome.ranking[0].average_support, 1.0);
    }

    #[test]
    fn empty_option_list_is_fatal() {
        let res = run_budget_election(&[], &[], &EngineRules::DEFAULT_RULES);
        assert_eq!(res, Err(TallyError::EmptyElection));
    }

    #[test]
    fn inconsistent_ratios_are_rejected() {
        let options = plain_options(&["A"]);
        let mut rules = EngineRules::DEFAULT_RULES;
        rules.long_stream_ratio = 0.8;
        rules.short_stream_ratio = 0.8;
        let res = run_budget_election(&[], &options, &rules);
        assert!(matches!(res, Err(TallyError::InvalidRules(_))));
    }
}
