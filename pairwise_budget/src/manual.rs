/*!

This is the long-form manual for `pairwise_budget` and `pbtally`.

## How the tally works

Every ballot is a ranked list of option labels with a voting power attached.
The engine compares every pair of options head to head: for each ballot, the
option ranked higher receives the ballot's full weight for that pair. An
option ranked after the ballot's stop marker ("None below") counts as
rejected by that voter: it can still lose a matchup, but it never collects
votes from that ballot, and a pair with both members past the marker is not
counted at all.

Each option then scores its win/tie/loss record (Copeland method) and the
options are ordered by score, with average support as the first tiebreaker
and the canonical option order as the last one.

## How the budget is allocated

The total budget is split into a long-duration stream and a short-duration
stream according to the configured ratios. The allocator walks the ranking
from the top:

- the stop marker and everything ranked below it is rejected ("past cutoff");
- a long-stream-eligible option draws its tier amount from the long stream,
  falling through to the short stream when the long stream cannot afford it;
- every other option draws from the short stream directly;
- when no option further down the walk could still use the long stream, its
  unspent remainder is moved into the short stream, once.

Under the `eligibilityRanked` strategy an option is long-stream eligible only
while it sits within the configured top-N window of the ranking.

## Input formats

The `pbtally` binary reads a JSON election configuration:

```json
{
    "outputSettings": { "contestName": "Q3 program budget" },
    "options": [
        "Acme Media",
        "Acme Media - ext",
        "None below",
        "Beacon"
    ],
    "providers": {
        "Acme Media": {
            "basicAmount": 100.0,
            "extendedAmount": 250.0,
            "longStreamEligible": true
        },
        "Beacon": { "basicAmount": 80.0, "extendedAmount": 160.0 }
    },
    "ballotFileSources": [
        { "provider": "json", "filePath": "ballots.json" }
    ],
    "rules": {
        "totalBudget": 900.0,
        "longStreamRatio": 0.3333333333333333,
        "shortStreamRatio": 0.6666666666666666,
        "allocationStrategy": "standard"
    }
}
```

Ballot sources come in three flavours, selected by the `provider` field:

* `json` — an array of `{"voter": ..., "weight": ..., "choices": [...]}`
  objects, where choices are option labels or 1-based option ids. A ballot
  whose `choices` is not an array is skipped with a warning.
* `csv` — one ballot per row; the voter column, optional weight column and
  the first choice column are configurable with `voterColumnIndex`,
  `weightColumnIndex` and `firstChoiceColumnIndex` (1-based, following the
  conventions of the spreadsheet world).
* `xlsx` — same layout as `csv`, read from an Excel file. The worksheet is
  selected with `worksheetName` and defaults to the first one.

## Output

The summary is a JSON document with the final ranking, the full pairwise
match table, the per-option allocations and the aggregate counters. Use
`--out` to write it to a file and `--reference` to compare the run against a
stored summary (the program prints a diff and fails on mismatch).

*/
