use log::{debug, warn};
use snafu::{ensure, ResultExt};

use crate::config::{
    Candidate, Category, ConfigurationSnafu, EvalError, LookupSnafu, SubjectIndex,
    UnmatchedCandidateSnafu, UnmatchedPolicy,
};
use crate::retry::{with_retry, LOOKUP_ATTEMPTS};

/// Outcome of bucketing one pool: candidates grouped per bucket in bucket
/// priority order, plus the titles that matched no bucket.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BucketOutcome {
    pub groups: Vec<(Category, Vec<Candidate>)>,
    pub unmatched: Vec<String>,
}

impl BucketOutcome {
    /// The eligible pool: all bucketed candidates, in bucket priority order,
    /// each tagged with its bucket.
    pub fn flattened(&self) -> Vec<Candidate> {
        self.groups
            .iter()
            .flat_map(|(_, members)| members.clone())
            .collect()
    }
}

/// Assigns each candidate to exactly one of a fixed, priority-ordered list
/// of subject buckets, resolving real multi-category membership
/// deterministically: the first bucket in the list that matches wins.
#[derive(Debug, Clone)]
pub struct CategoryBucketer {
    buckets: Vec<Category>,
    unmatched: UnmatchedPolicy,
}

impl CategoryBucketer {
    pub fn new(
        buckets: &[(&str, &str)],
        unmatched: UnmatchedPolicy,
    ) -> Result<CategoryBucketer, EvalError> {
        ensure!(
            !buckets.is_empty(),
            ConfigurationSnafu {
                detail: "empty bucket list".to_string(),
            }
        );
        Ok(CategoryBucketer {
            buckets: buckets
                .iter()
                .map(|(key, label)| Category::new(key, label))
                .collect(),
            unmatched,
        })
    }

    pub fn buckets(&self) -> &[Category] {
        &self.buckets
    }

    /// Buckets the whole pool. Candidates keep their pool order within each
    /// bucket. A candidate matching no bucket is excluded and recorded, or
    /// aborts the round, depending on the configured policy.
    pub fn assign(
        &self,
        round: u8,
        pool: &[Candidate],
        index: &dyn SubjectIndex,
    ) -> Result<BucketOutcome, EvalError> {
        let mut groups: Vec<(Category, Vec<Candidate>)> = self
            .buckets
            .iter()
            .map(|b| (b.clone(), Vec::new()))
            .collect();
        let mut unmatched: Vec<String> = Vec::new();
        for cand in pool {
            let subjects = with_retry(&cand.title, LOOKUP_ATTEMPTS, || index.subjects(&cand.title))
                .context(LookupSnafu {
                    round,
                    subject: cand.title.clone(),
                })?;
            let slot = groups
                .iter_mut()
                .find(|(bucket, _)| subjects.iter().any(|s| *s == bucket.key));
            match slot {
                Some((bucket, members)) => {
                    debug!(
                        "round {}: {:?} -> bucket {:?}",
                        round, cand.title, bucket.key
                    );
                    let mut c = cand.clone();
                    c.category = Some(bucket.clone());
                    members.push(c);
                }
                None => {
                    ensure!(
                        self.unmatched == UnmatchedPolicy::Skip,
                        UnmatchedCandidateSnafu {
                            round,
                            title: cand.title.clone(),
                        }
                    );
                    warn!(
                        "round {}: no bucket for {:?} (subjects: {:?})",
                        round, cand.title, subjects
                    );
                    unmatched.push(cand.title.clone());
                }
            }
        }
        groups.retain(|(_, members)| !members.is_empty());
        Ok(BucketOutcome { groups, unmatched })
    }
}
