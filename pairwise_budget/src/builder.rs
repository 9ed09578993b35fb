use std::collections::HashMap;

use log::warn;

pub use crate::config::*;
use crate::{build_options, run_budget_election};

/// A builder for assembling and running one budget election.
///
/// ```
/// pub use pairwise_budget::builder::Builder;
/// pub use pairwise_budget::{EngineRules, ProviderBudget};
/// # use pairwise_budget::TallyError;
/// use std::collections::HashMap;
///
/// let mut providers = HashMap::new();
/// providers.insert(
///     "Anna's Show".to_string(),
///     ProviderBudget {
///         basic_amount: 100.0,
///         extended_amount: 200.0,
///         long_stream_eligible: true,
///     },
/// );
/// let mut rules = EngineRules::DEFAULT_RULES;
/// rules.total_budget = 300.0;
///
/// let mut builder = Builder::new(&rules).options(
///     &["Anna's Show".to_string(), "None below".to_string()],
///     &providers,
/// );
/// builder.add_ballot("voter-1", 2.0, &["Anna's Show".to_string()]);
///
/// let outcome = builder.run()?;
/// assert!(outcome.allocations[0].allocated);
/// # Ok::<(), TallyError>(())
/// ```
pub struct Builder {
    rules: EngineRules,
    options: Vec<ElectionOption>,
    ballots: Vec<Ballot>,
}

impl Builder {
    pub fn new(rules: &EngineRules) -> Builder {
        Builder {
            rules: rules.clone(),
            options: Vec::new(),
            ballots: Vec::new(),
        }
    }

    /// Sets the canonical option list from raw labels and the provider
    /// metadata table.
    pub fn options(self, labels: &[String], providers: &HashMap<String, ProviderBudget>) -> Builder {
        Builder {
            rules: self.rules,
            options: build_options(labels, providers),
            ballots: self.ballots,
        }
    }

    /// Adds a ballot given the ranked option labels, most preferred first.
    ///
    /// Labels that do not match any option are skipped with a warning.
    pub fn add_ballot(&mut self, voter: &str, weight: f64, labels: &[String]) {
        let mut ranked: Vec<OptionId> = Vec::with_capacity(labels.len());
        for label in labels.iter() {
            match self.options.iter().find(|o| o.label == *label) {
                Some(opt) => ranked.push(opt.id),
                None => {
                    warn!(
                        "add_ballot: voter {:?} ranked unknown option {:?}, skipping it",
                        voter, label
                    );
                }
            }
        }
        self.add_ballot_ids(voter, weight, &ranked);
    }

    /// Adds a ballot given ranked option ids, most preferred first.
    pub fn add_ballot_ids(&mut self, voter: &str, weight: f64, ids: &[OptionId]) {
        self.ballots.push(Ballot {
            voter: voter.to_string(),
            weight,
            ranked: ids.to_vec(),
        });
    }

    /// Runs the full pipeline over the accumulated ballots.
    pub fn run(&self) -> Result<ElectionOutcome, TallyError> {
        run_budget_election(&self.ballots, &self.options, &self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_resolves_labels_and_runs() {
        let mut providers = HashMap::new();
        providers.insert(
            "A".to_string(),
            ProviderBudget {
                basic_amount: 50.0,
                extended_amount: 120.0,
                long_stream_eligible: false,
            },
        );
        let mut rules = EngineRules::DEFAULT_RULES;
        rules.total_budget = 150.0;

        let mut builder = Builder::new(&rules).options(
            &[
                "A".to_string(),
                "A - ext".to_string(),
                "None below".to_string(),
            ],
            &providers,
        );
        builder.add_ballot("v1", 1.0, &["A".to_string(), "Nonexistent".to_string()]);
        builder.add_ballot("v2", 2.0, &["A - ext".to_string(), "A".to_string()]);

        let outcome = builder.run().unwrap();
        // v2's ballot is normalized to basic-then-extended, so basic wins the
        // tier matchup 3 to 0.
        assert_eq!(outcome.ranking[0].option.id, 1);
        assert!(outcome.allocations[0].allocated);
        assert_eq!(outcome.allocations[0].amount, 50.0);
    }
}
