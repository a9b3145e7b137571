use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use contest_eval::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Snafu};
use text_diff::print_diff;

use crate::args::Args;
use crate::contest;

#[derive(Debug, Snafu)]
pub enum PotyError {
    #[snafu(display("Error reading file {path}"))]
    ReadingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the contest configuration"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Error parsing timestamp {value:?}"))]
    ParsingTimestamp {
        source: chrono::ParseError,
        value: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Round evaluation failed"))]
    Evaluation { source: EvalError },
    #[snafu(display("Error saving page {page}"))]
    SavingPage { source: LookupError, page: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type PotyResult<T> = Result<T, PotyError>;

// ********* Configuration file ***********

/// One entry of the rename log as exported. Entries with missing fields do
/// occur in old dumps and are dropped with a warning.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RenameEntry {
    pub old: Option<String>,
    pub new: Option<String>,
    pub at: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ContestConfig {
    pub year: i32,
    #[serde(rename = "registrationCutoff")]
    pub registration_cutoff: String,
    #[serde(rename = "minEdits")]
    pub min_edits: u64,
    #[serde(rename = "countDeletedEdits")]
    pub count_deleted_edits: Option<bool>,
    #[serde(rename = "renameEvents")]
    pub rename_events: Option<Vec<RenameEntry>>,
    #[serde(rename = "unmatchedPolicy")]
    pub unmatched_policy: Option<String>,
    pub strict: Option<bool>,
    #[serde(rename = "maxFinalVotes")]
    pub max_final_votes: Option<u32>,
    #[serde(rename = "shuffleSeed")]
    pub shuffle_seed: Option<u32>,
}

fn parse_timestamp(value: &str) -> PotyResult<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value).context(ParsingTimestampSnafu {
        value: value.to_string(),
    })?;
    Ok(parsed.with_timezone(&Utc))
}

fn rename_events(entries: &[RenameEntry]) -> PotyResult<Vec<RenameEvent>> {
    let mut events: Vec<RenameEvent> = Vec::new();
    for entry in entries {
        match (&entry.old, &entry.new, &entry.at) {
            (Some(old), Some(new), Some(at)) => {
                events.push(RenameEvent {
                    old: old.clone(),
                    new: new.clone(),
                    at: parse_timestamp(at)?,
                });
            }
            _ => {
                warn!("dropping incomplete rename entry: {:?}", entry);
            }
        }
    }
    Ok(events)
}

fn read_config(path: &str) -> PotyResult<ContestConfig> {
    let text = fs::read_to_string(path).context(ReadingFileSnafu {
        path: path.to_string(),
    })?;
    let config: ContestConfig = serde_json::from_str(&text).context(ParsingJsonSnafu {})?;
    Ok(config)
}

fn unmatched_policy(config: &ContestConfig) -> PotyResult<UnmatchedPolicy> {
    match config.unmatched_policy.as_deref() {
        None | Some("skip") => Ok(UnmatchedPolicy::Skip),
        Some("fail") => Ok(UnmatchedPolicy::Fail),
        Some(x) => whatever!("Unknown unmatchedPolicy {:?} (expected skip or fail)", x),
    }
}

// ********* Directory-backed lookups ***********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
struct VoterEntry {
    registered: String,
    edits: u64,
    #[serde(rename = "deletedEdits")]
    deleted_edits: Option<u64>,
}

/// Turns a page name into a flat file name inside the pages directory.
fn page_file_name(page: &str) -> String {
    let mut name: String = page
        .chars()
        .map(|c| match c {
            ':' | '/' | ' ' => '_',
            c => c,
        })
        .collect();
    name.push_str(".txt");
    name
}

/// All lookups served from one directory of pre-fetched data: page texts
/// under pages/, the account table in voters.json and the subject table in
/// subjects.json. Rendered output lands under out/.
pub struct DirStore {
    root: PathBuf,
    accounts: HashMap<String, AccountInfo>,
    subjects: HashMap<String, Vec<String>>,
}

impl DirStore {
    pub fn load(root: &str) -> PotyResult<DirStore> {
        let root = PathBuf::from(root);
        let voters_path = root.join("voters.json");
        let voters_text =
            fs::read_to_string(&voters_path).context(ReadingFileSnafu {
                path: voters_path.display().to_string(),
            })?;
        let voters: HashMap<String, VoterEntry> =
            serde_json::from_str(&voters_text).context(ParsingJsonSnafu {})?;
        let mut accounts: HashMap<String, AccountInfo> = HashMap::new();
        for (name, entry) in voters {
            accounts.insert(
                name,
                AccountInfo {
                    registered: parse_timestamp(&entry.registered)?,
                    live_edits: entry.edits,
                    deleted_edits: entry.deleted_edits.unwrap_or(0),
                },
            );
        }
        let subjects_path = root.join("subjects.json");
        let subjects_text =
            fs::read_to_string(&subjects_path).context(ReadingFileSnafu {
                path: subjects_path.display().to_string(),
            })?;
        let subjects: HashMap<String, Vec<String>> =
            serde_json::from_str(&subjects_text).context(ParsingJsonSnafu {})?;
        info!(
            "loaded {} accounts and {} subject entries from {:?}",
            accounts.len(),
            subjects.len(),
            root
        );
        Ok(DirStore {
            root,
            accounts,
            subjects,
        })
    }
}

impl PageStore for DirStore {
    fn fetch(&self, page: &str) -> Result<String, LookupError> {
        let path = self.root.join("pages").join(page_file_name(page));
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LookupError::Missing {
                subject: page.to_string(),
            },
            _ => LookupError::Unavailable {
                reason: e.to_string(),
            },
        })
    }

    fn save(&self, page: &str, text: &str) -> Result<(), LookupError> {
        let dir = self.root.join("out");
        fs::create_dir_all(&dir).map_err(|e| LookupError::Unavailable {
            reason: e.to_string(),
        })?;
        let path = dir.join(page_file_name(page));
        info!("writing rendered page {:?} to {:?}", page, path);
        fs::write(&path, text).map_err(|e| LookupError::Unavailable {
            reason: e.to_string(),
        })
    }
}

impl VoterDirectory for DirStore {
    fn account(&self, canonical: &str) -> Result<AccountInfo, LookupError> {
        self.accounts
            .get(canonical)
            .copied()
            .ok_or(LookupError::Missing {
                subject: canonical.to_string(),
            })
    }
}

impl SubjectIndex for DirStore {
    fn subjects(&self, title: &str) -> Result<Vec<String>, LookupError> {
        self.subjects
            .get(title)
            .cloned()
            .ok_or(LookupError::Missing {
                subject: title.to_string(),
            })
    }
}

// ********* Driver ***********

pub fn run(args: &Args) -> PotyResult<()> {
    let config = read_config(&args.config)?;
    info!("config: {:?}", config);

    let cutoff = parse_timestamp(&config.registration_cutoff)?;
    let events = rename_events(config.rename_events.as_deref().unwrap_or(&[]))?;
    let renames = RenameMap::from_events(events, cutoff);
    info!("{} rename entries apply before the cutoff", renames.len());
    let eligibility = EligibilityConfig::new(
        cutoff,
        config.min_edits,
        config.count_deleted_edits.unwrap_or(false),
        renames,
    );
    let mode = if args.strict || config.strict.unwrap_or(false) {
        ParseMode::Strict
    } else {
        ParseMode::Lenient
    };
    let contest = contest::build(
        config.year,
        eligibility,
        mode,
        unmatched_policy(&config)?,
        config.max_final_votes.unwrap_or(3),
        config.shuffle_seed.unwrap_or(0),
    )
    .context(EvaluationSnafu {})?;

    let store = DirStore::load(&args.pages_dir)?;
    let providers = Providers {
        store: &store,
        directory: &store,
        subjects: &store,
    };
    let outcome = contest
        .evaluate_round(args.round, &providers)
        .context(EvaluationSnafu {})?;
    for diag in &outcome.diagnostics {
        warn!("round {}: {}", args.round, diag);
    }
    info!(
        "round {}: {} candidates eligible",
        args.round,
        outcome.eligible.len()
    );
    if args.round == 3 {
        match outcome.eligible.first() {
            Some(winner) => println!("winner: {} ({} votes)", winner.title, winner.votes),
            None => warn!("the final round produced no winner"),
        }
    }

    let round = contest
        .rounds()
        .iter()
        .find(|r| r.ordinal() == args.round)
        .ok_or(EvalError::Configuration {
            detail: format!("no round {} in this contest", args.round),
        })
        .context(EvaluationSnafu {})?;
    store
        .save(round.output_page(), &outcome.rendered)
        .context(SavingPageSnafu {
            page: round.output_page().to_string(),
        })?;

    match args.out.as_deref() {
        None | Some("") => {}
        Some("stdout") => println!("{}", outcome.rendered),
        Some(path) => fs::write(path, &outcome.rendered).context(WritingFileSnafu {
            path: path.to_string(),
        })?,
    }

    if let Some(reference_path) = &args.reference {
        let reference = fs::read_to_string(reference_path).context(ReadingFileSnafu {
            path: reference_path.clone(),
        })?;
        if reference != outcome.rendered {
            warn!("Found differences with the reference rendering");
            print_diff(reference.as_str(), outcome.rendered.as_str(), "\n");
            whatever!("Rendered output differs from the reference {reference_path}");
        }
        info!("rendered output matches the reference");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn contest_config_parses_with_camel_case_fields() {
        let text = r#"{
            "year": 2021,
            "registrationCutoff": "2022-01-01T00:00:00Z",
            "minEdits": 75,
            "countDeletedEdits": false,
            "renameEvents": [
                {"old": "A", "new": "B", "at": "2021-06-01T00:00:00Z"}
            ],
            "unmatchedPolicy": "skip",
            "maxFinalVotes": 3,
            "shuffleSeed": 42
        }"#;
        let config: ContestConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.year, 2021);
        assert_eq!(config.min_edits, 75);
        assert_eq!(config.max_final_votes, Some(3));
        assert_eq!(config.shuffle_seed, Some(42));
        let events = rename_events(config.rename_events.as_deref().unwrap()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old, "A");
        assert_eq!(
            events[0].at,
            Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn incomplete_rename_entries_are_dropped() {
        let entries = vec![
            RenameEntry {
                old: Some("A".to_string()),
                new: None,
                at: Some("2021-06-01T00:00:00Z".to_string()),
            },
            RenameEntry {
                old: Some("B".to_string()),
                new: Some("C".to_string()),
                at: Some("2021-06-01T00:00:00Z".to_string()),
            },
        ];
        let events = rename_events(&entries).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old, "B");
    }

    #[test]
    fn bad_timestamps_are_an_error_not_a_skip() {
        let entries = vec![RenameEntry {
            old: Some("A".to_string()),
            new: Some("B".to_string()),
            at: Some("not a date".to_string()),
        }];
        assert!(matches!(
            rename_events(&entries),
            Err(PotyError::ParsingTimestamp { .. })
        ));
    }

    #[test]
    fn page_names_flatten_to_file_names() {
        assert_eq!(
            page_file_name("Commons:Picture of the Year/2021/Candidates"),
            "Commons_Picture_of_the_Year_2021_Candidates.txt"
        );
    }

    #[test]
    fn unknown_unmatched_policy_is_rejected() {
        let config = ContestConfig {
            year: 2021,
            registration_cutoff: "2022-01-01T00:00:00Z".to_string(),
            min_edits: 75,
            count_deleted_edits: None,
            rename_events: None,
            unmatched_policy: Some("explode".to_string()),
            strict: None,
            max_final_votes: None,
            shuffle_seed: None,
        };
        assert!(unmatched_policy(&config).is_err());
        let defaulted = ContestConfig {
            unmatched_policy: None,
            ..config
        };
        assert_eq!(unmatched_policy(&defaulted).unwrap(), UnmatchedPolicy::Skip);
    }

    #[test]
    fn dir_store_serves_pages_accounts_and_subjects() {
        let root = std::env::temp_dir().join(format!("potyeval-test-{}", std::process::id()));
        let pages = root.join("pages");
        fs::create_dir_all(&pages).unwrap();
        fs::write(
            root.join("voters.json"),
            r#"{"V1": {"registered": "2015-01-01T00:00:00Z", "edits": 1000}}"#,
        )
        .unwrap();
        fs::write(
            root.join("subjects.json"),
            r#"{"File:Tern.jpg": ["Birds"]}"#,
        )
        .unwrap();
        fs::write(
            pages.join("Commons_Picture_of_the_Year_2021_Candidates.txt"),
            "File:Tern.jpg|12-3/4 <!---->\n",
        )
        .unwrap();

        let store = DirStore::load(root.to_str().unwrap()).unwrap();
        let text = store
            .fetch("Commons:Picture of the Year/2021/Candidates")
            .unwrap();
        assert!(text.starts_with("File:Tern.jpg|"));
        assert!(matches!(
            store.fetch("Commons:No such page"),
            Err(LookupError::Missing { .. })
        ));
        let account = store.account("V1").unwrap();
        assert_eq!(account.live_edits, 1000);
        assert_eq!(account.deleted_edits, 0);
        assert_eq!(store.subjects("File:Tern.jpg").unwrap(), vec!["Birds"]);

        store.save("Commons:Picture of the Year/2021/Results", "done\n").unwrap();
        let saved = fs::read_to_string(
            root.join("out")
                .join("Commons_Picture_of_the_Year_2021_Results.txt"),
        )
        .unwrap();
        assert_eq!(saved, "done\n");

        fs::remove_dir_all(&root).unwrap();
    }
}
