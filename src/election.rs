use log::{debug, info, warn};

use pairwise_budget::*;
use snafu::{prelude::*, Snafu};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::election::config_reader::*;

#[derive(Debug, Snafu)]
pub enum ElectionError {
    #[snafu(display(""))]
    OpeningJson { source: std::io::Error },
    #[snafu(display(""))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display(""))]
    ParsingJsonNumber {},
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading CSV line {lineno}"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("CSV line {lineno} is too short"))]
    CsvLineTooShort { lineno: usize },
    #[snafu(display("Error opening Excel file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display(""))]
    EmptyExcel {},
    #[snafu(display(""))]
    MissingParentDir {},
    #[snafu(display("Error writing the summary to {path}"))]
    WritingSummary {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The tally could not produce a result: {source}"))]
    Engine { source: TallyError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type ElectionResult<T> = Result<T, ElectionError>;

pub mod config_reader {
    use crate::election::*;

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct OutputSettings {
        #[serde(rename = "contestName")]
        pub contest_name: String,
        #[serde(rename = "outputDirectory")]
        pub output_directory: Option<String>,
        #[serde(rename = "contestDate")]
        pub contest_date: Option<String>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct OutputConfig {
        pub contest: Option<String>,
        pub date: Option<String>,
        #[serde(rename = "allocationStrategy")]
        pub allocation_strategy: String,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct BallotFileSource {
        pub provider: String,
        #[serde(rename = "filePath")]
        pub file_path: String,
        #[serde(rename = "worksheetName")]
        pub worksheet_name: Option<String>,
        #[serde(rename = "voterColumnIndex")]
        _voter_column_index: Option<JSValue>,
        #[serde(rename = "weightColumnIndex")]
        _weight_column_index: Option<JSValue>,
        #[serde(rename = "firstChoiceColumnIndex")]
        _first_choice_column_index: Option<JSValue>,
        #[serde(rename = "firstBallotRowIndex")]
        _first_ballot_row_index: Option<JSValue>,
    }

    impl BallotFileSource {
        pub fn voter_column_index(&self) -> ElectionResult<Option<usize>> {
            read_js_col(&self._voter_column_index)
        }

        pub fn weight_column_index(&self) -> ElectionResult<Option<usize>> {
            read_js_col(&self._weight_column_index)
        }

        pub fn first_choice_column_index(&self) -> ElectionResult<usize> {
            match read_js_col(&self._first_choice_column_index)? {
                Some(x) => Ok(x),
                None => whatever!(
                    "the ballot source {:?} needs a firstChoiceColumnIndex",
                    self.file_path
                ),
            }
        }

        /// 1-based row of the first ballot, defaulting to 2 (one header row).
        pub fn first_ballot_row_index(&self) -> ElectionResult<usize> {
            match &self._first_ballot_row_index {
                None => Ok(2),
                x => match read_js_int(x)? {
                    0 => whatever!("row indices are 1-based, got 0"),
                    n => Ok(n),
                },
            }
        }
    }

    fn default_amount() -> f64 {
        0.0
    }

    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct ProviderEntry {
        #[serde(rename = "basicAmount", default = "default_amount")]
        pub basic_amount: f64,
        #[serde(rename = "extendedAmount", default = "default_amount")]
        pub extended_amount: f64,
        #[serde(rename = "longStreamEligible", default)]
        pub long_stream_eligible: bool,
    }

    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct ElectionRules {
        #[serde(rename = "totalBudget")]
        pub total_budget: f64,
        #[serde(rename = "longStreamRatio")]
        pub long_stream_ratio: Option<f64>,
        #[serde(rename = "shortStreamRatio")]
        pub short_stream_ratio: Option<f64>,
        #[serde(rename = "winPoints")]
        pub win_points: Option<f64>,
        #[serde(rename = "tiePoints")]
        pub tie_points: Option<f64>,
        #[serde(rename = "lossPoints")]
        pub loss_points: Option<f64>,
        #[serde(rename = "longStreamRankThreshold")]
        pub long_stream_rank_threshold: Option<u32>,
        #[serde(rename = "allocationStrategy")]
        pub allocation_strategy: Option<String>,
    }

    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct ElectionConfig {
        #[serde(rename = "outputSettings")]
        pub output_settings: Option<OutputSettings>,
        #[serde(rename = "ballotFileSources")]
        pub ballot_file_sources: Vec<BallotFileSource>,
        pub options: Vec<String>,
        pub providers: HashMap<String, ProviderEntry>,
        pub rules: ElectionRules,
    }

    pub fn read_summary(path: &str) -> ElectionResult<JSValue> {
        let contents = fs::read_to_string(path).context(OpeningJsonSnafu {})?;
        let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
        Ok(js)
    }

    pub(crate) fn read_js_int(x: &Option<JSValue>) -> ElectionResult<usize> {
        match x {
            Some(JSValue::Number(n)) => n
                .as_u64()
                .map(|x| x as usize)
                .context(ParsingJsonNumberSnafu {}),
            Some(JSValue::String(s)) => s.parse::<usize>().ok().context(ParsingJsonNumberSnafu {}),
            _ => None.context(ParsingJsonNumberSnafu {}),
        }
    }

    // Columns are 1-based in the configuration, following the conventions of
    // the spreadsheet world; this converts to a 0-based index.
    fn read_js_col(x: &Option<JSValue>) -> ElectionResult<Option<usize>> {
        match x {
            None => Ok(None),
            _ => match read_js_int(x)? {
                0 => whatever!("column indices are 1-based, got 0"),
                n => Ok(Some(n - 1)),
            },
        }
    }
}

/// A ballot as parsed by the file readers, before the choices are resolved
/// against the option list.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedBallot {
    pub voter: Option<String>,
    // Kept as a string so that the weight rules stay in one place
    // (validate_ballots), whatever the file format.
    pub weight: Option<String>,
    pub choices: Vec<String>,
}

fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(path)
        .to_string()
}

pub mod json_reader {
    use crate::election::*;

    pub fn read_ballots(path: &str) -> ElectionResult<Vec<ParsedBallot>> {
        let contents = fs::read_to_string(path).context(OpeningJsonSnafu {})?;
        let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
        parse_ballots_js(&js, &simplify_file_name(path))
    }

    pub fn parse_ballots_js(js: &JSValue, source_name: &str) -> ElectionResult<Vec<ParsedBallot>> {
        let entries = match js.as_array() {
            Some(arr) => arr,
            None => whatever!("the ballot file {:?} is not a JSON array", source_name),
        };
        let mut res: Vec<ParsedBallot> = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let voter = entry["voter"]
                .as_str()
                .map(|s| s.to_string())
                .or_else(|| Some(format!("{}-{:08}", source_name, idx + 1)));
            let weight = match &entry["weight"] {
                JSValue::Null => None,
                JSValue::Number(n) => Some(n.to_string()),
                JSValue::String(s) => Some(s.clone()),
                x => {
                    warn!(
                        "ballot {:?}: unreadable weight {:?}, defaulting to 1",
                        voter, x
                    );
                    None
                }
            };
            // A corrupt ballot is a local problem: skip it and keep going.
            let raw_choices = match entry["choices"].as_array() {
                Some(arr) => arr,
                None => {
                    warn!(
                        "ballot {:?}: the choice field is not a sequence, skipping the ballot",
                        voter
                    );
                    continue;
                }
            };
            let mut choices: Vec<String> = Vec::with_capacity(raw_choices.len());
            for c in raw_choices.iter() {
                match c {
                    JSValue::String(s) => choices.push(s.clone()),
                    JSValue::Number(n) => choices.push(n.to_string()),
                    x => {
                        warn!("ballot {:?}: skipping unreadable choice {:?}", voter, x);
                    }
                }
            }
            res.push(ParsedBallot {
                voter,
                weight,
                choices,
            });
        }
        Ok(res)
    }
}

pub mod csv_reader {
    use crate::election::*;
    use std::fs::File;

    pub fn read_ballots(path: &str, cfs: &BallotFileSource) -> ElectionResult<Vec<ParsedBallot>> {
        let voter_idx_o = cfs.voter_column_index()?;
        let weight_idx_o = cfs.weight_column_index()?;
        let choices_start_col = cfs.first_choice_column_index()?;
        let source_name = simplify_file_name(path);

        let mut res: Vec<ParsedBallot> = Vec::new();
        let (records, row_offset) = get_records(path, cfs)?;
        for (idx, line_r) in records.enumerate() {
            let lineno = idx + row_offset;
            let line = line_r.context(CsvLineParseSnafu { lineno })?;
            debug!("read_ballots: lineno: {:?} row: {:?}", lineno, line);

            let voter = if let Some(voter_idx) = voter_idx_o {
                line.get(voter_idx)
                    .context(CsvLineTooShortSnafu { lineno })?
                    .to_string()
            } else {
                format!("{}-{:08}", source_name, lineno)
            };
            let weight: Option<String> = if let Some(weight_idx) = weight_idx_o {
                Some(
                    line.get(weight_idx)
                        .context(CsvLineTooShortSnafu { lineno })?
                        .to_string(),
                )
            } else {
                None
            };
            let choices: Vec<String> = line
                .iter()
                .skip(choices_start_col)
                .map(|s| s.to_string())
                .collect();

            res.push(ParsedBallot {
                voter: Some(voter),
                weight,
                choices,
            });
        }
        Ok(res)
    }

    fn get_records(
        path: &str,
        cfs: &BallotFileSource,
    ) -> ElectionResult<(csv::StringRecordsIntoIter<File>, usize)> {
        let first_row = cfs.first_ballot_row_index()?;
        let rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .context(CsvOpenSnafu { path })?;
        let mut records = rdr.into_records();
        // The index starts at 1 to respect most conventions in the excel world
        for _ in 1..first_row {
            _ = records.next();
        }
        Ok((records, first_row))
    }
}

pub mod xlsx_reader {
    use crate::election::*;
    use calamine::{open_workbook, Reader, Xlsx};

    pub fn read_ballots(path: &str, cfs: &BallotFileSource) -> ElectionResult<Vec<ParsedBallot>> {
        let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
        let wrange = match &cfs.worksheet_name {
            Some(name) => workbook.worksheet_range(name),
            None => workbook.worksheet_range_at(0),
        }
        .context(EmptyExcelSnafu {})?
        .context(OpeningExcelSnafu { path })?;

        let voter_idx_o = cfs.voter_column_index()?;
        let weight_idx_o = cfs.weight_column_index()?;
        let choices_start_col = cfs.first_choice_column_index()?;
        let first_row = cfs.first_ballot_row_index()?;
        let source_name = simplify_file_name(path);

        let mut res: Vec<ParsedBallot> = Vec::new();
        for (idx, row) in wrange.rows().enumerate().skip(first_row - 1) {
            let lineno = idx + 1;
            debug!("read_ballots: row {:?}: {:?}", lineno, row);
            let voter = match voter_idx_o.and_then(|i| row.get(i)) {
                Some(cell) => read_cell(cell),
                None => format!("{}-{:08}", source_name, lineno),
            };
            let weight = weight_idx_o
                .and_then(|i| row.get(i))
                .map(read_cell)
                .filter(|s| !s.is_empty());
            let choices: Vec<String> = row
                .iter()
                .skip(choices_start_col)
                .map(read_cell)
                .collect();
            res.push(ParsedBallot {
                voter: Some(voter),
                weight,
                choices,
            });
        }
        Ok(res)
    }

    fn read_cell(cell: &calamine::DataType) -> String {
        match cell {
            calamine::DataType::String(s) => s.clone(),
            calamine::DataType::Float(f) => f.to_string(),
            calamine::DataType::Int(i) => i.to_string(),
            _ => "".to_string(),
        }
    }
}

fn read_ballot_source(
    root_path: &str,
    cfs: &BallotFileSource,
    options: &[ElectionOption],
) -> ElectionResult<Vec<Ballot>> {
    let p: PathBuf = [root_path, cfs.file_path.as_str()].iter().collect();
    let p2 = p.as_path().display().to_string();
    info!("Attempting to read ballot file {:?}", p2);
    let parsed_ballots = match cfs.provider.as_str() {
        "json" => json_reader::read_ballots(p2.as_str()),
        "csv" => csv_reader::read_ballots(p2.as_str(), cfs),
        "xlsx" => xlsx_reader::read_ballots(p2.as_str(), cfs),
        x => whatever!("Ballot source provider not implemented: {:?}", x),
    }?;
    Ok(validate_ballots(&parsed_ballots, options))
}

/// Resolves parsed ballots against the option list.
///
/// A choice is matched by exact label first, then as a 1-based option id.
/// Unresolved choices are skipped with a warning; a ballot with a
/// non-positive weight is dropped entirely.
fn validate_ballots(parsed_ballots: &[ParsedBallot], options: &[ElectionOption]) -> Vec<Ballot> {
    let ids_by_label: HashMap<&str, OptionId> = options
        .iter()
        .map(|o| (o.label.as_str(), o.id))
        .collect();
    let mut res: Vec<Ballot> = Vec::new();
    for pb in parsed_ballots.iter() {
        let voter = pb.voter.clone().unwrap_or_else(|| "NO ID".to_string());
        let weight: f64 = match &pb.weight {
            None => 1.0,
            Some(s) => match s.parse::<f64>() {
                Ok(x) => x,
                Err(_) => {
                    warn!(
                        "ballot {:?}: unreadable weight {:?}, defaulting to 1",
                        voter, s
                    );
                    1.0
                }
            },
        };
        if !weight.is_finite() || weight <= 0.0 {
            warn!(
                "ballot {:?}: voting power {:?} is not positive and finite, dropping the ballot",
                voter, weight
            );
            continue;
        }
        let mut ranked: Vec<OptionId> = Vec::with_capacity(pb.choices.len());
        for choice in pb.choices.iter() {
            let trimmed = choice.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(id) = ids_by_label.get(trimmed) {
                ranked.push(*id);
            } else if let Ok(id) = trimmed.parse::<OptionId>() {
                if id >= 1 && id as usize <= options.len() {
                    ranked.push(id);
                } else {
                    warn!("ballot {:?}: option id {:?} out of range", voter, id);
                }
            } else {
                warn!("ballot {:?}: unknown option {:?}", voter, trimmed);
            }
        }
        debug!("Choices for ballot {:?}: {:?}", voter, ranked);
        if !ranked.is_empty() {
            res.push(Ballot {
                voter,
                weight,
                ranked,
            });
        }
    }
    res
}

fn validate_rules(rules: &ElectionRules) -> ElectionResult<EngineRules> {
    let defaults = EngineRules::DEFAULT_RULES;
    let res = EngineRules {
        total_budget: rules.total_budget,
        long_stream_ratio: rules.long_stream_ratio.unwrap_or(defaults.long_stream_ratio),
        short_stream_ratio: rules
            .short_stream_ratio
            .unwrap_or(defaults.short_stream_ratio),
        win_points: rules.win_points.unwrap_or(defaults.win_points),
        tie_points: rules.tie_points.unwrap_or(defaults.tie_points),
        loss_points: rules.loss_points.unwrap_or(defaults.loss_points),
        long_rank_threshold: rules
            .long_stream_rank_threshold
            .map(|x| x as usize)
            .unwrap_or(defaults.long_rank_threshold),
        strategy: match rules.allocation_strategy.as_deref() {
            None | Some("standard") => AllocationStrategy::Standard,
            Some("eligibilityRanked") => AllocationStrategy::EligibilityRanked,
            Some(x) => {
                whatever!("Cannot use allocation strategy {:?} (not implemented)", x)
            }
        },
    };
    Ok(res)
}

fn tier_label(tier: BudgetTier) -> &'static str {
    match tier {
        BudgetTier::Basic => "basic",
        BudgetTier::Extended => "extended",
        BudgetTier::None => "none",
    }
}

fn stream_label(stream: StreamDuration) -> JSValue {
    match stream {
        StreamDuration::Long => json!("long"),
        StreamDuration::Short => json!("short"),
        StreamDuration::None => JSValue::Null,
    }
}

fn build_summary_js(
    config: &ElectionConfig,
    rules: &EngineRules,
    options: &[ElectionOption],
    outcome: &ElectionOutcome,
) -> JSValue {
    let label_of = |id: OptionId| options[(id - 1) as usize].label.clone();
    let c = OutputConfig {
        contest: config
            .output_settings
            .as_ref()
            .map(|s| s.contest_name.clone()),
        date: config
            .output_settings
            .as_ref()
            .and_then(|s| s.contest_date.clone()),
        allocation_strategy: match rules.strategy {
            AllocationStrategy::Standard => "standard".to_string(),
            AllocationStrategy::EligibilityRanked => "eligibilityRanked".to_string(),
        },
    };

    let ranking: Vec<JSValue> = outcome
        .ranking
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            json!({
                "rank": idx + 1,
                "option": r.option.label,
                "provider": r.option.provider_name,
                "tier": tier_label(r.option.tier),
                "score": r.score,
                "averageSupport": r.average_support,
            })
        })
        .collect();

    let pairwise: Vec<JSValue> = outcome
        .pairwise
        .iter()
        .map(|p| {
            json!({
                "optionA": label_of(p.option_a),
                "optionB": label_of(p.option_b),
                "votesA": p.votes_a,
                "votesB": p.votes_b,
                "participating": p.participating,
                "winner": match p.outcome {
                    PairOutcome::Win(id) => json!(label_of(id)),
                    PairOutcome::Tie => json!("tie"),
                },
            })
        })
        .collect();

    let allocations: Vec<JSValue> = outcome
        .allocations
        .iter()
        .map(|a| {
            json!({
                "option": a.option.label,
                "allocated": a.allocated,
                "streamDuration": stream_label(a.stream),
                "allocatedAmount": a.amount,
                "rejectionReason": match a.rejection {
                    Some(r) => json!(r.to_string()),
                    None => JSValue::Null,
                },
            })
        })
        .collect();

    let s = &outcome.summary;
    json!({
        "config": c,
        "ranking": ranking,
        "pairwise": pairwise,
        "allocations": allocations,
        "summary": {
            "longBudget": s.long_budget,
            "shortBudget": s.short_budget,
            "transferred": s.transferred,
            "remainingLong": s.remaining_long,
            "remainingShort": s.remaining_short,
            "totalAllocated": s.total_allocated,
            "totalUnspent": s.total_unspent,
            "allocatedCount": s.allocated_count,
            "rejectedCount": s.rejected_count,
        },
    })
}

pub fn run_election(
    config_path: &str,
    check_summary_path: Option<&str>,
    out_path: Option<&str>,
) -> ElectionResult<()> {
    let config_p = Path::new(config_path);
    let config_str = fs::read_to_string(config_path).context(OpeningJsonSnafu {})?;
    let config: ElectionConfig = serde_json::from_str(&config_str).context(ParsingJsonSnafu {})?;
    info!("config: {:?}", config);

    let rules = validate_rules(&config.rules)?;

    if config.ballot_file_sources.is_empty() {
        whatever!("no ballot file sources detected");
    }

    let providers: HashMap<String, ProviderBudget> = config
        .providers
        .iter()
        .map(|(name, p)| {
            (
                name.clone(),
                ProviderBudget {
                    basic_amount: p.basic_amount,
                    extended_amount: p.extended_amount,
                    long_stream_eligible: p.long_stream_eligible,
                },
            )
        })
        .collect();
    let options = build_options(&config.options, &providers);

    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;
    let root_path = root_p.as_os_str().to_str().context(MissingParentDirSnafu {})?;
    let mut ballots: Vec<Ballot> = Vec::new();
    for cfs in config.ballot_file_sources.iter() {
        let mut file_data = read_ballot_source(root_path, cfs, &options)?;
        ballots.append(&mut file_data);
    }
    info!("Read {} valid ballots", ballots.len());

    let outcome = run_budget_election(&ballots, &options, &rules).context(EngineSnafu {})?;

    let result_js = build_summary_js(&config, &rules, &options, &outcome);
    let pretty_js_stats = serde_json::to_string_pretty(&result_js).context(ParsingJsonSnafu {})?;
    match out_path {
        None | Some("stdout") => println!("{}", pretty_js_stats),
        Some(path) => {
            fs::write(path, pretty_js_stats.as_str()).context(WritingSummarySnafu { path })?
        }
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = check_summary_path {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary")
        }
    }

    Ok(())
}
