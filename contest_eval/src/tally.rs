use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use log::{debug, info};
use regex::Regex;
use snafu::{ensure, ResultExt};

use crate::config::{
    AccountInfo, Candidate, ConfigurationSnafu, EvalError, LookupSnafu, PageStore,
    TallyInconsistencySnafu, VoteRecord, VoterDirectory,
};
use crate::eligibility::{EligibilityConfig, ExclusionReason};
use crate::retry::{with_retry, LOOKUP_ATTEMPTS};

/// Why one particular vote was not counted.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum VoteExclusion {
    /// The same canonical voter already supported this candidate; the first
    /// occurrence was kept.
    RepeatVote,
    NotYetRegistered,
    InsufficientEdits,
    /// The voter already spent their whole round-wide cap on earlier votes.
    OverCap,
}

impl Display for VoteExclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteExclusion::RepeatVote => write!(f, "repeat vote"),
            VoteExclusion::NotYetRegistered => write!(f, "not yet registered"),
            VoteExclusion::InsufficientEdits => write!(f, "insufficient edits"),
            VoteExclusion::OverCap => write!(f, "over vote cap"),
        }
    }
}

/// Diagnostic for one discarded vote.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ExcludedVote {
    pub candidate: String,
    pub voter: String,
    pub reason: VoteExclusion,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct TallyReport {
    pub counted: u64,
    pub excluded: Vec<ExcludedVote>,
}

/// Counts valid votes per candidate from per-candidate vote pages, applying
/// eligibility screening and the voter-wide cap.
#[derive(Debug, Clone)]
pub struct VoteTally {
    page_template: String,
    vote_line: Regex,
    max_votes: Option<u32>,
}

impl VoteTally {
    /// `page_template` names the vote page of a candidate and must contain a
    /// `{title}` placeholder. `vote_line` extracts one raw username per line
    /// via its first capture group; an optional second group is the display
    /// text of the link, accepted only in the self-referential form.
    /// `max_votes = None` means unlimited.
    pub fn new(
        page_template: &str,
        vote_line: &str,
        max_votes: Option<u32>,
    ) -> Result<VoteTally, EvalError> {
        ensure!(
            page_template.contains("{title}"),
            ConfigurationSnafu {
                detail: format!("vote page template {:?} lacks {{title}}", page_template),
            }
        );
        let vote_line = Regex::new(vote_line).map_err(|e| EvalError::Configuration {
            detail: format!("bad vote line recognizer: {}", e),
        })?;
        ensure!(
            vote_line.captures_len() >= 2,
            ConfigurationSnafu {
                detail: "vote line recognizer needs a capture group for the username".to_string(),
            }
        );
        ensure!(
            max_votes != Some(0),
            ConfigurationSnafu {
                detail: "a vote cap of zero would discard every vote".to_string(),
            }
        );
        Ok(VoteTally {
            page_template: page_template.to_string(),
            vote_line,
            max_votes,
        })
    }

    /// Extracts the vote records of one page, in document order. Lines that
    /// are not vote lines (headings, struck votes, free-form discussion) are
    /// ignored here; they are not parse errors.
    pub fn parse_votes(&self, text: &str) -> Vec<VoteRecord> {
        let mut records: Vec<VoteRecord> = Vec::new();
        for (position, raw) in text.lines().enumerate() {
            let line = raw.trim_end();
            let caps = match self.vote_line.captures(line) {
                Some(caps) => caps,
                None => continue,
            };
            let target = match caps.get(1) {
                Some(m) => m.as_str(),
                None => continue,
            };
            // A display link is tolerated only when it repeats the target
            // (the [[User:X|X]] signature form).
            if let Some(display) = caps.get(2) {
                if display.as_str() != target {
                    debug!("ignoring non-signature link line {:?}", line);
                    continue;
                }
            }
            records.push(VoteRecord {
                raw_voter: target.to_string(),
                position,
            });
        }
        records
    }

    /// Tallies the whole pool. Writes the per-candidate counts back onto the
    /// pool and returns the exclusion diagnostics.
    ///
    /// The voter-wide cap is enforced in global round-wide order: votes are
    /// ordered by (candidate position in the pool, line position within that
    /// candidate's page), and only a voter's first `max_votes` valid votes
    /// count, regardless of which candidates they were for.
    pub fn tally(
        &self,
        round: u8,
        pool: &mut [Candidate],
        store: &dyn PageStore,
        directory: &dyn VoterDirectory,
        config: &EligibilityConfig,
    ) -> Result<TallyReport, EvalError> {
        let mut ids: HashSet<&str> = HashSet::new();
        for c in pool.iter() {
            ensure!(
                ids.insert(&c.id),
                TallyInconsistencySnafu {
                    round,
                    detail: format!("duplicate candidate id {:?}", c.id),
                }
            );
        }

        let mut report = TallyReport::default();
        let mut accounts: HashMap<String, AccountInfo> = HashMap::new();
        // (pool index, canonical voter), in round-wide chronological order.
        let mut valid: Vec<(usize, String)> = Vec::new();

        for (ci, cand) in pool.iter().enumerate() {
            let page = self.page_template.replace("{title}", &cand.title);
            let text = with_retry(&page, LOOKUP_ATTEMPTS, || store.fetch(&page)).context(
                LookupSnafu {
                    round,
                    subject: page.clone(),
                },
            )?;
            let records = self.parse_votes(&text);
            debug!(
                "round {}: {} vote lines for {:?}",
                round,
                records.len(),
                cand.title
            );
            let mut seen: HashSet<String> = HashSet::new();
            for rec in records {
                let canonical = config.renames().resolve(&rec.raw_voter);
                if !seen.insert(canonical.clone()) {
                    report.excluded.push(ExcludedVote {
                        candidate: cand.title.clone(),
                        voter: canonical,
                        reason: VoteExclusion::RepeatVote,
                    });
                    continue;
                }
                let account = match accounts.get(&canonical) {
                    Some(account) => *account,
                    None => {
                        let account =
                            with_retry(&canonical, LOOKUP_ATTEMPTS, || directory.account(&canonical))
                                .context(LookupSnafu {
                                    round,
                                    subject: canonical.clone(),
                                })?;
                        accounts.insert(canonical.clone(), account);
                        account
                    }
                };
                match config.screen(&account) {
                    Ok(()) => valid.push((ci, canonical)),
                    Err(reason) => report.excluded.push(ExcludedVote {
                        candidate: cand.title.clone(),
                        voter: canonical,
                        reason: match reason {
                            ExclusionReason::NotYetRegistered => VoteExclusion::NotYetRegistered,
                            ExclusionReason::InsufficientEdits => VoteExclusion::InsufficientEdits,
                        },
                    }),
                }
            }
        }

        for c in pool.iter_mut() {
            c.votes = 0;
        }
        let mut per_voter: HashMap<String, u32> = HashMap::new();
        for (ci, voter) in valid {
            let spent = per_voter.entry(voter.clone()).or_insert(0);
            if let Some(cap) = self.max_votes {
                if *spent >= cap {
                    report.excluded.push(ExcludedVote {
                        candidate: pool[ci].title.clone(),
                        voter,
                        reason: VoteExclusion::OverCap,
                    });
                    continue;
                }
            }
            *spent += 1;
            pool[ci].votes += 1;
            report.counted += 1;
        }

        for c in pool.iter() {
            info!("round {}: {:>5} votes for {}", round, c.votes, c.title);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookupError;
    use crate::eligibility::{RenameEvent, RenameMap};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;

    const VOTE_LINE: &str = r"^# *\[\[User:([^\]|]+?)(?:\|([^\]]+))?\]\] *$";

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    struct MemStore(HashMap<String, String>);

    impl PageStore for MemStore {
        fn fetch(&self, page: &str) -> Result<String, LookupError> {
            self.0.get(page).cloned().ok_or(LookupError::Missing {
                subject: page.to_string(),
            })
        }
        fn save(&self, _page: &str, _text: &str) -> Result<(), LookupError> {
            Ok(())
        }
    }

    struct MemDirectory(HashMap<String, AccountInfo>);

    impl VoterDirectory for MemDirectory {
        fn account(&self, canonical: &str) -> Result<AccountInfo, LookupError> {
            self.0.get(canonical).copied().ok_or(LookupError::Missing {
                subject: canonical.to_string(),
            })
        }
    }

    fn veteran() -> AccountInfo {
        AccountInfo {
            registered: ts(2015, 3, 1),
            live_edits: 5_000,
            deleted_edits: 0,
        }
    }

    fn config(renames: RenameMap) -> EligibilityConfig {
        EligibilityConfig::new(ts(2021, 1, 1), 75, false, renames)
    }

    fn pool(titles: &[&str]) -> Vec<Candidate> {
        titles.iter().map(|t| Candidate::new(t, t)).collect()
    }

    fn directory(names: &[&str]) -> MemDirectory {
        MemDirectory(names.iter().map(|n| (n.to_string(), veteran())).collect())
    }

    fn store(pages: &[(&str, &str)]) -> MemStore {
        MemStore(
            pages
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn counts_signature_lines_and_ignores_noise() {
        let tally = VoteTally::new("v/{title}", VOTE_LINE, None).unwrap();
        let records = tally.parse_votes(
            "== Votes ==\n# [[User:Alice]]\n# [[User:Bob|Bob]]\n# [[User:Carol|someone else]]\n#comment\n",
        );
        let names: Vec<&str> = records.iter().map(|r| r.raw_voter.as_str()).collect();
        // The self-referential display form is accepted; a mismatched
        // display link is not a signature.
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert_eq!(records[0].position, 1);
    }

    #[test]
    fn renamed_voter_counts_once_per_candidate() {
        // A was renamed to C; a vote cast as "A" and one cast as "C" for the
        // same candidate collapse to one vote by canonical "C", screened
        // against C's account data.
        let renames = RenameMap::from_events(
            [RenameEvent {
                old: "A".to_string(),
                new: "C".to_string(),
                at: ts(2020, 6, 1),
            }],
            ts(2021, 1, 1),
        );
        let tally = VoteTally::new("v/{title}", VOTE_LINE, None).unwrap();
        let mut cands = pool(&["File:X.jpg"]);
        let report = tally
            .tally(
                3,
                &mut cands,
                &store(&[("v/File:X.jpg", "# [[User:A]]\n# [[User:C]]\n")]),
                &directory(&["C"]),
                &config(renames),
            )
            .unwrap();
        assert_eq!(cands[0].votes, 1);
        assert_eq!(report.counted, 1);
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].reason, VoteExclusion::RepeatVote);
        assert_eq!(report.excluded[0].voter, "C");
    }

    #[test]
    fn cap_honors_earliest_votes_in_round_wide_order() {
        let tally = VoteTally::new("v/{title}", VOTE_LINE, Some(2)).unwrap();
        let mut cands = pool(&["File:1.jpg", "File:2.jpg", "File:3.jpg"]);
        let report = tally
            .tally(
                3,
                &mut cands,
                &store(&[
                    ("v/File:1.jpg", "# [[User:Eve]]\n"),
                    ("v/File:2.jpg", "# [[User:Eve]]\n# [[User:Mallory]]\n"),
                    ("v/File:3.jpg", "# [[User:Eve]]\n# [[User:Mallory]]\n"),
                ]),
                &directory(&["Eve", "Mallory"]),
                &config(RenameMap::default()),
            )
            .unwrap();
        // Eve's first two votes (candidates 1 and 2) count; the third is
        // dropped. Mallory is unaffected.
        assert_eq!(cands[0].votes, 1);
        assert_eq!(cands[1].votes, 2);
        assert_eq!(cands[2].votes, 1);
        let over: Vec<&ExcludedVote> = report
            .excluded
            .iter()
            .filter(|e| e.reason == VoteExclusion::OverCap)
            .collect();
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].voter, "Eve");
        assert_eq!(over[0].candidate, "File:3.jpg");
    }

    #[test]
    fn ineligible_voters_are_excluded_with_a_reason() {
        let mut accounts = HashMap::new();
        accounts.insert(
            "Newbie".to_string(),
            AccountInfo {
                registered: ts(2021, 1, 2),
                live_edits: 900,
                deleted_edits: 0,
            },
        );
        accounts.insert(
            "Sparse".to_string(),
            AccountInfo {
                registered: ts(2019, 1, 1),
                live_edits: 10,
                deleted_edits: 0,
            },
        );
        let tally = VoteTally::new("v/{title}", VOTE_LINE, None).unwrap();
        let mut cands = pool(&["File:X.jpg"]);
        let report = tally
            .tally(
                2,
                &mut cands,
                &store(&[("v/File:X.jpg", "# [[User:Newbie]]\n# [[User:Sparse]]\n")]),
                &MemDirectory(accounts),
                &config(RenameMap::default()),
            )
            .unwrap();
        assert_eq!(cands[0].votes, 0);
        let reasons: Vec<VoteExclusion> = report.excluded.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![
                VoteExclusion::NotYetRegistered,
                VoteExclusion::InsufficientEdits
            ]
        );
    }

    #[test]
    fn unknown_voter_aborts_the_round() {
        // A directory miss is an error, never a silent disqualification.
        let tally = VoteTally::new("v/{title}", VOTE_LINE, None).unwrap();
        let mut cands = pool(&["File:X.jpg"]);
        let res = tally.tally(
            2,
            &mut cands,
            &store(&[("v/File:X.jpg", "# [[User:Ghost]]\n")]),
            &directory(&[]),
            &config(RenameMap::default()),
        );
        assert!(matches!(res, Err(EvalError::Lookup { round: 2, .. })));
    }

    #[test]
    fn duplicate_pool_ids_are_a_tally_inconsistency() {
        let tally = VoteTally::new("v/{title}", VOTE_LINE, None).unwrap();
        let mut cands = pool(&["File:X.jpg", "File:X.jpg"]);
        let res = tally.tally(
            2,
            &mut cands,
            &store(&[]),
            &directory(&[]),
            &config(RenameMap::default()),
        );
        assert!(matches!(res, Err(EvalError::TallyInconsistency { .. })));
    }

    #[test]
    fn zero_cap_is_a_configuration_error() {
        let res = VoteTally::new("v/{title}", VOTE_LINE, Some(0));
        assert!(matches!(res, Err(EvalError::Configuration { .. })));
    }

    #[test]
    fn template_without_title_is_a_configuration_error() {
        let res = VoteTally::new("v/candidates", VOTE_LINE, None);
        assert!(matches!(res, Err(EvalError::Configuration { .. })));
    }
}
