/*!
Core evaluation logic for a four-round elimination contest that narrows a
large pool of submissions down to a single winner.

The crate covers the round-evaluation pipeline only: parsing and rendering
candidate lists embedded in semi-structured text ([`Pattern`] and the parser
variants), voter-eligibility screening with identity-rename resolution
([`EligibilityConfig`], [`RenameMap`]), vote tallying with a voter-wide cap
([`VoteTally`]), multi-stage Top-N selection with category quotas
([`SelectionStage`], [`run_pipeline`]) and category-balanced curation
([`CategoryBucketer`]). Everything else, fetching remote pages, account
data and subject categories, is reached through the lookup traits
([`PageStore`], [`VoterDirectory`], [`SubjectIndex`]) and supplied by the
caller.
*/

mod buckets;
mod config;
mod eligibility;
mod pattern;
mod retry;
mod round;
mod selection;
mod tally;

pub use crate::buckets::{BucketOutcome, CategoryBucketer};
pub use crate::config::*;
pub use crate::eligibility::{EligibilityConfig, ExclusionReason, RenameEvent, RenameMap};
pub use crate::pattern::{
    CategorizedParser, GallerySort, MultiSourceParser, ParsedLine, Pattern, UncategorizedParser,
};
pub use crate::retry::LOOKUP_ATTEMPTS;
pub use crate::round::{CandidateSource, Contest, Providers, Round, RoundOutcome, Strategy};
pub use crate::selection::{run_pipeline, CommentTemplate, GroupKey, SelectionStage};
pub use crate::tally::{ExcludedVote, TallyReport, VoteExclusion, VoteTally};
