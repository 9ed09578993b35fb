use clap::Parser;

/// This is a tabulation program for ranked-choice program-budget elections.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file describing the election: option labels,
    /// provider budget metadata, ballot file sources and the tally rules.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (file path) A reference file containing the summary of an election in
    /// JSON format. If provided, pbtally will check that the tabulated output
    /// matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path or empty) If specified, the summary of the election will be
    /// written in JSON format to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard
    /// output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
