use std::sync::OnceLock;

use log::info;
use snafu::{ensure, ResultExt};

use crate::buckets::CategoryBucketer;
use crate::config::{
    Candidate, ConfigurationSnafu, EvalError, LookupSnafu, PageStore, SubjectIndex, VoterDirectory,
};
use crate::eligibility::EligibilityConfig;
use crate::pattern::{CategorizedParser, MultiSourceParser, UncategorizedParser};
use crate::retry::{with_retry, LOOKUP_ATTEMPTS};
use crate::selection::{run_pipeline, SelectionStage};
use crate::tally::VoteTally;

/// The external collaborators a round evaluation needs. All read-only; the
/// caller is free to fan out the underlying fetches.
pub struct Providers<'a> {
    pub store: &'a dyn PageStore,
    pub directory: &'a dyn VoterDirectory,
    pub subjects: &'a dyn SubjectIndex,
}

/// Where a round's candidates come from, and how its result is rendered.
pub enum CandidateSource {
    Categorized(CategorizedParser),
    Uncategorized(UncategorizedParser),
    MultiSource(MultiSourceParser),
}

impl CandidateSource {
    fn render(&self, pool: &[Candidate]) -> String {
        match self {
            CandidateSource::Categorized(p) => p.render(pool),
            CandidateSource::Uncategorized(p) => p.render(pool),
            // A multi-source parser only seeds; it never renders.
            CandidateSource::MultiSource(p) => {
                let flat = UncategorizedParser {
                    gallery: p.gallery.clone(),
                    sort: crate::pattern::GallerySort::SourceOrder,
                    mode: p.mode,
                };
                flat.render(pool)
            }
        }
    }
}

/// How a round decides which candidates stay eligible.
pub enum Strategy {
    /// The full parsed pool is the eligible output (the seeding round).
    SeedOnly,
    /// Category-balanced curation through the canonical bucket list.
    Bucketed(CategoryBucketer),
    /// Open voting: tally, then the stage pipeline.
    Voted {
        tally: VoteTally,
        stages: Vec<SelectionStage>,
    },
}

/// What one round evaluation hands back: the ordered eligible set with
/// attached comments, the rendered text for the next round's source, and
/// diagnostics for anything excluded along the way.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RoundOutcome {
    pub eligible: Vec<Candidate>,
    pub rendered: String,
    pub diagnostics: Vec<String>,
}

/// One elimination stage of the contest: a candidate source, an eligibility
/// strategy and an output pattern, driven as parse -> evaluate -> render.
pub struct Round {
    ordinal: u8,
    source_page: Option<String>,
    source: CandidateSource,
    strategy: Strategy,
    output: CandidateSource,
    output_page: String,
}

impl Round {
    /// Validates the composition before any text is fetched.
    pub fn new(
        ordinal: u8,
        source_page: Option<String>,
        source: CandidateSource,
        strategy: Strategy,
        output: CandidateSource,
        output_page: String,
    ) -> Result<Round, EvalError> {
        ensure!(
            ordinal <= 3,
            ConfigurationSnafu {
                detail: format!("round ordinal {} out of range", ordinal),
            }
        );
        match (&source, &source_page) {
            (CandidateSource::MultiSource(_), Some(_)) => {
                return ConfigurationSnafu {
                    detail: "a multi-source round names its own pages".to_string(),
                }
                .fail();
            }
            (CandidateSource::MultiSource(_), None) => {}
            (_, None) => {
                return ConfigurationSnafu {
                    detail: format!("round {} has no source page", ordinal),
                }
                .fail();
            }
            _ => {}
        }
        if let Strategy::Voted { stages, .. } = &strategy {
            ensure!(
                !stages.is_empty(),
                ConfigurationSnafu {
                    detail: format!("round {} has an empty stage list", ordinal),
                }
            );
        }
        if matches!(strategy, Strategy::Bucketed(_)) {
            ensure!(
                matches!(output, CandidateSource::Categorized(_)),
                ConfigurationSnafu {
                    detail: "a bucketed round renders grouped output".to_string(),
                }
            );
        }
        Ok(Round {
            ordinal,
            source_page,
            source,
            strategy,
            output,
            output_page,
        })
    }

    pub fn ordinal(&self) -> u8 {
        self.ordinal
    }

    /// The page the rendered output is meant for.
    pub fn output_page(&self) -> &str {
        &self.output_page
    }

    fn fetch_source(&self, store: &dyn PageStore) -> Result<String, EvalError> {
        let page = self
            .source_page
            .as_deref()
            .ok_or(EvalError::Configuration {
                detail: format!("round {} has no source page", self.ordinal),
            })?;
        with_retry(page, LOOKUP_ATTEMPTS, || store.fetch(page)).context(LookupSnafu {
            round: self.ordinal,
            subject: page.to_string(),
        })
    }

    fn parse_pool(&self, store: &dyn PageStore) -> Result<Vec<Candidate>, EvalError> {
        match &self.source {
            CandidateSource::MultiSource(p) => p.parse_all(self.ordinal, store),
            CandidateSource::Categorized(p) => p.parse(self.ordinal, &self.fetch_source(store)?),
            CandidateSource::Uncategorized(p) => p.parse(self.ordinal, &self.fetch_source(store)?),
        }
    }

    /// Evaluates the round: parse the source text, apply the eligibility
    /// strategy, render the output text. All-or-nothing: any lookup or
    /// consistency failure aborts the whole round.
    pub fn evaluate(
        &self,
        config: &EligibilityConfig,
        providers: &Providers,
    ) -> Result<RoundOutcome, EvalError> {
        let pool = self.parse_pool(providers.store)?;
        info!(
            "round {}: {} candidates in the pool",
            self.ordinal,
            pool.len()
        );
        let mut diagnostics: Vec<String> = Vec::new();
        let eligible = match &self.strategy {
            Strategy::SeedOnly => pool,
            Strategy::Bucketed(bucketer) => {
                let outcome = bucketer.assign(self.ordinal, &pool, providers.subjects)?;
                for title in &outcome.unmatched {
                    diagnostics.push(format!("no bucket for {:?}", title));
                }
                outcome.flattened()
            }
            Strategy::Voted { tally, stages } => {
                let mut pool = pool;
                let report = tally.tally(
                    self.ordinal,
                    &mut pool,
                    providers.store,
                    providers.directory,
                    config,
                )?;
                info!(
                    "round {}: {} valid votes, {} excluded",
                    self.ordinal,
                    report.counted,
                    report.excluded.len()
                );
                for e in &report.excluded {
                    diagnostics.push(format!(
                        "vote by {:?} for {:?} excluded: {}",
                        e.voter, e.candidate, e.reason
                    ));
                }
                run_pipeline(self.ordinal, stages, &pool)
            }
        };
        info!(
            "round {}: {} candidates eligible for the next round",
            self.ordinal,
            eligible.len()
        );
        let rendered = self.output.render(&eligible);
        Ok(RoundOutcome {
            eligible,
            rendered,
            diagnostics,
        })
    }
}

/// The year-scoped contest root. Owns the shared, read-only eligibility
/// configuration and the ordered round list.
pub struct Contest {
    year: i32,
    base_title: String,
    eligibility: EligibilityConfig,
    rounds: Vec<Round>,
    base_page: OnceLock<String>,
}

impl Contest {
    pub fn new(
        year: i32,
        base_title: &str,
        eligibility: EligibilityConfig,
        rounds: Vec<Round>,
    ) -> Contest {
        Contest {
            year,
            base_title: base_title.to_string(),
            eligibility,
            rounds,
            base_page: OnceLock::new(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn eligibility(&self) -> &EligibilityConfig {
        &self.eligibility
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// The contest's base page, computed on first access.
    pub fn base_page(&self) -> &str {
        self.base_page
            .get_or_init(|| format!("{}/{}", self.base_title, self.year))
    }

    pub fn subpage(&self, name: &str) -> String {
        format!("{}/{}", self.base_page(), name)
    }

    pub fn evaluate_round(
        &self,
        ordinal: u8,
        providers: &Providers,
    ) -> Result<RoundOutcome, EvalError> {
        let round = self
            .rounds
            .iter()
            .find(|r| r.ordinal == ordinal)
            .ok_or(EvalError::Configuration {
                detail: format!("no round {} in this contest", ordinal),
            })?;
        round.evaluate(&self.eligibility, providers)
    }
}
