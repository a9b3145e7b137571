use clap::Parser;

/// Evaluates one elimination round of a yearly picture contest from
/// already-fetched page text.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file describing the contest year: registration cutoff,
    /// edit threshold, rename events and policies.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// The round to evaluate (0-3).
    #[clap(short = 'n', long, value_parser)]
    pub round: u8,

    /// (directory) Location of the fetched page texts (pages/) and the lookup
    /// tables (voters.json, subjects.json). The rendered output lands in out/.
    #[clap(short, long, value_parser)]
    pub pages_dir: String,

    /// (file path, 'stdout' or empty) If specified, the rendered text for the next
    /// round is also written to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference rendering. If provided, potyeval will check that
    /// its output matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// If passed as an argument, unrecognized source lines abort the round
    /// instead of being dropped.
    #[clap(long, takes_value = false)]
    pub strict: bool,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
