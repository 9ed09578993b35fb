// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

/// Identifier of an option: its 1-based position in the canonical option list.
///
/// Ballots refer to options by this id.
pub type OptionId = u32;

/// The budget tier requested by an option label.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum BudgetTier {
    Basic,
    Extended,
    /// The stop marker carries no tier.
    None,
}

/// One entry of the canonical option list, fully resolved against the
/// provider metadata table. Immutable once built.
#[derive(PartialEq, Debug, Clone)]
pub struct ElectionOption {
    pub id: OptionId,
    pub label: String,
    pub provider_name: String,
    pub tier: BudgetTier,
    pub budget_amount: f64,
    pub long_stream_eligible: bool,
    pub stop_marker: bool,
}

/// Budget metadata for one provider, keyed by provider name in the caller's
/// metadata table.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct ProviderBudget {
    pub basic_amount: f64,
    pub extended_amount: f64,
    pub long_stream_eligible: bool,
}

/// One voter's ranked preference list, with voting power attached.
///
/// `ranked` is a permutation-subset of option ids; lower index means more
/// preferred. Ids must not repeat within one ballot.
#[derive(PartialEq, Debug, Clone)]
pub struct Ballot {
    pub voter: String,
    pub weight: f64,
    pub ranked: Vec<OptionId>,
}

// ********* Configuration **********

/// How long-stream eligibility is decided during the allocation walk.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum AllocationStrategy {
    /// An option may draw from the long stream whenever its provider is
    /// flagged long-stream eligible.
    Standard,
    /// An option may draw from the long stream only if it sits within the
    /// top `long_rank_threshold` positions of the ranking *and* its provider
    /// is flagged long-stream eligible.
    EligibilityRanked,
}

/// The rules that govern one tally-and-allocate run. No process-wide state:
/// an explicit value is passed into each call.
#[derive(PartialEq, Debug, Clone)]
pub struct EngineRules {
    pub total_budget: f64,
    pub long_stream_ratio: f64,
    pub short_stream_ratio: f64,
    pub win_points: f64,
    pub tie_points: f64,
    pub loss_points: f64,
    /// Only read under `AllocationStrategy::EligibilityRanked`.
    pub long_rank_threshold: usize,
    pub strategy: AllocationStrategy,
}

impl EngineRules {
    pub const DEFAULT_RULES: EngineRules = EngineRules {
        total_budget: 0.0,
        long_stream_ratio: 1.0 / 3.0,
        short_stream_ratio: 2.0 / 3.0,
        win_points: 1.0,
        tie_points: 0.5,
        loss_points: 0.0,
        long_rank_threshold: 5,
        strategy: AllocationStrategy::Standard,
    };
}

// ******** Output data structures *********

/// Outcome of one head-to-head matchup.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum PairOutcome {
    Win(OptionId),
    /// Equal weighted totals, including the no-data case where neither side
    /// received any vote.
    Tie,
}

/// One unordered pair of the full pairwise match table.
#[derive(PartialEq, Debug, Clone)]
pub struct PairwiseResult {
    pub option_a: OptionId,
    pub option_b: OptionId,
    pub votes_a: f64,
    pub votes_b: f64,
    pub participating: f64,
    pub outcome: PairOutcome,
}

/// An option together with its Copeland score, in final ranking order.
#[derive(PartialEq, Debug, Clone)]
pub struct RankedOption {
    pub option: ElectionOption,
    pub score: f64,
    pub average_support: f64,
}

/// The budget stream an allocation was drawn from.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum StreamDuration {
    Long,
    Short,
    None,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum RejectionReason {
    /// The option is the stop marker or ranked after it.
    PastCutoff,
    /// Neither stream could afford the option's amount.
    InsufficientBudget,
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::PastCutoff => write!(f, "past cutoff"),
            RejectionReason::InsufficientBudget => write!(f, "insufficient budget"),
        }
    }
}

/// The funding decision for one option. Created once during the allocation
/// walk and never mutated afterwards.
#[derive(PartialEq, Debug, Clone)]
pub struct Allocation {
    pub option: ElectionOption,
    pub allocated: bool,
    pub stream: StreamDuration,
    pub amount: f64,
    pub rejection: Option<RejectionReason>,
}

/// Aggregate counters over the final allocation set.
///
/// Every derived field is computed from the allocations in one place
/// (`AllocationSummary::derive`) so that displayed and underlying numbers
/// cannot drift apart.
#[derive(PartialEq, Debug, Clone)]
pub struct AllocationSummary {
    pub long_budget: f64,
    pub short_budget: f64,
    pub transferred: f64,
    pub remaining_long: f64,
    pub remaining_short: f64,
    pub total_allocated: f64,
    pub total_unspent: f64,
    pub allocated_count: usize,
    pub rejected_count: usize,
}

/// Everything the engine produces for one invocation.
#[derive(PartialEq, Debug, Clone)]
pub struct ElectionOutcome {
    pub ranking: Vec<RankedOption>,
    pub pairwise: Vec<PairwiseResult>,
    pub allocations: Vec<Allocation>,
    pub summary: AllocationSummary,
}

/// Errors that prevent the engine from producing any result.
///
/// Recoverable input problems (a corrupt ballot, an unknown option id) are
/// skipped with a warning instead and never surface here.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TallyError {
    EmptyElection,
    InvalidRules(&'static str),
}

impl Error for TallyError {}

impl Display for TallyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TallyError::EmptyElection => write!(f, "no options were supplied to the tally"),
            TallyError::InvalidRules(msg) => write!(f, "invalid engine rules: {}", msg),
        }
    }
}
