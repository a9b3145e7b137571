// ********* Shared data structures ***********

use chrono::{DateTime, Utc};
use snafu::Snafu;

/// One submission competing within a round.
///
/// A pool of candidates is created fresh each round by parsing the round's
/// source text; nothing persists across rounds except by being re-matched in
/// the next round's source.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Candidate {
    /// File title as it appears on the source page. Never empty after parsing.
    pub title: String,
    /// Opaque, round-specific sortable key (a date-sequence pair for the
    /// gallery rounds, a rank embedded in the comment for the final one).
    /// Must be unique within one round's pool.
    pub id: String,
    /// The subject category the candidate is listed under, when the source
    /// text is grouped.
    pub category: Option<Category>,
    /// Free-form annotation. Round-trips through rendering.
    pub comment: String,
    /// Valid vote count. Only populated by the tally.
    pub votes: u64,
}

impl Candidate {
    pub fn new(title: &str, id: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            id: id.to_string(),
            category: None,
            comment: String::new(),
            votes: 0,
        }
    }
}

/// A subject category: the raw key used for lookups and page names, plus the
/// label displayed to readers.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Category {
    pub key: String,
    pub label: String,
}

impl Category {
    pub fn new(key: &str, label: &str) -> Category {
        Category {
            key: key.to_string(),
            label: label.to_string(),
        }
    }
}

/// One signature-style line on a candidate's vote page. The position is the
/// order of appearance in that page and serves as the chronology proxy for
/// the voter-wide cap.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VoteRecord {
    pub raw_voter: String,
    pub position: usize,
}

/// Registration and edit-count data for one canonical account, as measured
/// strictly before the contest's registration cutoff.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct AccountInfo {
    pub registered: DateTime<Utc>,
    pub live_edits: u64,
    pub deleted_edits: u64,
}

/// How unrecognized source lines are treated by the parsers.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ParseMode {
    /// Drop the line with a warning.
    Lenient,
    /// Abort the round.
    Strict,
}

/// What to do with a candidate that matches none of the canonical buckets.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum UnmatchedPolicy {
    /// Exclude the candidate from the eligible output and record a diagnostic.
    Skip,
    /// Abort the round.
    Fail,
}

// ********* External lookup seams ***********

/// Failure of an external lookup. `Missing` is a definite "no record";
/// `Unavailable` covers transient conditions worth retrying.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[snafu(display("no record for {subject:?}"))]
    Missing { subject: String },
    #[snafu(display("lookup unavailable: {reason}"))]
    Unavailable { reason: String },
}

/// Access to already-fetched page text, keyed by page name. Fetching and
/// saving of the remote pages themselves is outside the core.
pub trait PageStore {
    fn fetch(&self, page: &str) -> Result<String, LookupError>;
    fn save(&self, page: &str, text: &str) -> Result<(), LookupError>;
}

/// Point-in-time registration and edit-count lookup for a canonical user
/// name. A failure here is an error, never an implicit "ineligible".
pub trait VoterDirectory {
    fn account(&self, canonical: &str) -> Result<AccountInfo, LookupError>;
}

/// Subject categories a candidate belongs to, in no particular order.
pub trait SubjectIndex {
    fn subjects(&self, title: &str) -> Result<Vec<String>, LookupError>;
}

// ********* Errors ***********

/// Errors that abort the evaluation of a round.
///
/// Unrecognized lines in lenient mode are not represented here: they are
/// logged and dropped at the parser level.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EvalError {
    /// A source line matched no recognizer while the parser ran in strict
    /// mode.
    #[snafu(display("round {round}: line matches no pattern: {line:?}"))]
    Parse { round: u8, line: String },

    /// An external lookup could not be completed after bounded retries.
    #[snafu(display("round {round}: lookup failed for {subject:?}: {source}"))]
    Lookup {
        round: u8,
        subject: String,
        source: LookupError,
    },

    /// A cap or dedup invariant would be violated, e.g. duplicate candidate
    /// ids within one pool. Indicates a logic or data error.
    #[snafu(display("round {round}: tally inconsistency: {detail}"))]
    TallyInconsistency { round: u8, detail: String },

    /// A candidate matched no canonical bucket and the round is configured
    /// to treat that as fatal.
    #[snafu(display("round {round}: no bucket matches candidate {title:?}"))]
    UnmatchedCandidate { round: u8, title: String },

    /// A stage list or pattern pair is self-contradictory. Raised at round
    /// construction, before any text is fetched.
    #[snafu(display("invalid configuration: {detail}"))]
    Configuration { detail: String },
}
