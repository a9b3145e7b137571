use log::{debug, warn};
use regex::Regex;
use snafu::ResultExt;

use crate::config::{
    Candidate, Category, ConfigurationSnafu, EvalError, LookupSnafu, PageStore, ParseMode,
    ParseSnafu,
};
use crate::retry::{with_retry, LOOKUP_ATTEMPTS};

/// Placeholders understood by the render templates.
const KNOWN_FIELDS: [&str; 5] = ["title", "id", "comment", "key", "label"];

/// Extracts the `{name}` placeholders of a template. A braced run that is not
/// entirely lowercase ascii is literal text (wiki markup is full of `{{..}}`).
pub(crate) fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find(|c: char| !c.is_ascii_lowercase()) {
            Some(end) if end > 0 && after[end..].starts_with('}') => {
                out.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            _ => rest = &rest[start + 1..],
        }
    }
    out
}

/// The fields captured from one recognized source line.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ParsedLine {
    pub title: Option<String>,
    pub id: Option<String>,
    pub comment: Option<String>,
    pub key: Option<String>,
    pub label: Option<String>,
}

/// A bidirectional text <-> record mapping unit: a recognizer regex with
/// named capture groups and the inverse render template.
///
/// The pair satisfies the round-trip law: parsing a rendered pool yields the
/// same pool field-for-field, though incidental whitespace may differ.
#[derive(Debug, Clone)]
pub struct Pattern {
    recognizer: Regex,
    template: String,
}

impl Pattern {
    /// Compiles the recognizer and validates the template. An unknown
    /// placeholder or capture-group name is a configuration error, raised
    /// here so a bad round definition fails before any text is fetched.
    pub fn new(recognizer: &str, template: &str) -> Result<Pattern, EvalError> {
        let recognizer = Regex::new(recognizer).map_err(|e| EvalError::Configuration {
            detail: format!("bad recognizer {:?}: {}", recognizer, e),
        })?;
        for name in recognizer.capture_names().flatten() {
            if !KNOWN_FIELDS.contains(&name) {
                return ConfigurationSnafu {
                    detail: format!("unknown capture group {:?} in recognizer", name),
                }
                .fail();
            }
        }
        for ph in placeholders(template) {
            if !KNOWN_FIELDS.contains(&ph.as_str()) {
                return ConfigurationSnafu {
                    detail: format!("unknown placeholder {:?} in template {:?}", ph, template),
                }
                .fail();
            }
        }
        Ok(Pattern {
            recognizer,
            template: template.to_string(),
        })
    }

    /// Matches one line, returning the captured fields. `None` means the
    /// line does not belong to this pattern.
    pub fn recognize(&self, line: &str) -> Option<ParsedLine> {
        let caps = self.recognizer.captures(line)?;
        let field = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        Some(ParsedLine {
            title: field("title"),
            id: field("id"),
            comment: field("comment"),
            key: field("key"),
            label: field("label"),
        })
    }

    /// Renders one candidate back to a source line.
    pub fn render_candidate(&self, c: &Candidate) -> String {
        let (key, label) = match &c.category {
            Some(cat) => (cat.key.as_str(), cat.label.as_str()),
            None => ("", ""),
        };
        self.template
            .replace("{title}", &c.title)
            .replace("{id}", &c.id)
            .replace("{comment}", &c.comment)
            .replace("{key}", key)
            .replace("{label}", label)
    }

    /// Renders a category header line.
    pub fn render_header(&self, cat: &Category) -> String {
        self.template
            .replace("{key}", &cat.key)
            .replace("{label}", &cat.label)
    }
}

/// Named gallery ordering strategies. These replace ad-hoc sort closures so
/// a round definition is plain data.
#[derive(Debug, Clone)]
pub enum GallerySort {
    /// Keep the order of the source text.
    SourceOrder,
    /// Compare the numeric runs embedded in the id as a tuple, e.g.
    /// `2021-02/15` sorts as (2021, 2, 15).
    DateSequence,
    /// Sort by the first number embedded in the comment, e.g. `#12`.
    CommentRank,
    /// Deterministic keyed shuffle for anonymized display ordering: the sort
    /// key is a digest of the seed and the title, so re-rendering an
    /// unchanged pool yields the same order.
    Anonymized { seed: u32 },
}

#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Clone)]
enum SortToken {
    Position(usize),
    Numbers(Vec<u64>),
    Text(String),
}

impl GallerySort {
    fn key(&self, position: usize, c: &Candidate) -> SortToken {
        match self {
            GallerySort::SourceOrder => SortToken::Position(position),
            GallerySort::DateSequence => {
                let runs = digit_runs(&c.id);
                if runs.is_empty() {
                    SortToken::Text(c.id.clone())
                } else {
                    SortToken::Numbers(runs)
                }
            }
            GallerySort::CommentRank => match digit_runs(&c.comment).first() {
                Some(&rank) => SortToken::Numbers(vec![rank]),
                None => SortToken::Position(position),
            },
            GallerySort::Anonymized { seed } => {
                SortToken::Text(sha256::digest(format!("{:08}{}", seed, c.title)))
            }
        }
    }

    pub(crate) fn apply(&self, pool: &mut Vec<Candidate>) {
        let mut keyed: Vec<(SortToken, Candidate)> = pool
            .drain(..)
            .enumerate()
            .map(|(i, c)| (self.key(i, &c), c))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        pool.extend(keyed.into_iter().map(|(_, c)| c));
    }
}

fn digit_runs(s: &str) -> Vec<u64> {
    let mut runs: Vec<u64> = Vec::new();
    let mut cur: Option<u64> = None;
    for ch in s.chars() {
        if let Some(d) = ch.to_digit(10) {
            cur = Some(cur.unwrap_or(0) * 10 + d as u64);
        } else if let Some(v) = cur.take() {
            runs.push(v);
        }
    }
    if let Some(v) = cur {
        runs.push(v);
    }
    runs
}

fn candidate_from_line(parsed: ParsedLine) -> Option<Candidate> {
    let title = parsed.title.filter(|t| !t.is_empty())?;
    // Lines without an explicit id fall back to the title, which is unique
    // on any well-formed gallery page.
    let id = parsed.id.unwrap_or_else(|| title.clone());
    Some(Candidate {
        title,
        id,
        category: None,
        comment: parsed.comment.unwrap_or_default(),
        votes: 0,
    })
}

fn skip_or_fail(mode: ParseMode, round: u8, line: &str) -> Result<(), EvalError> {
    match mode {
        ParseMode::Lenient => {
            warn!("round {}: skipping unrecognized line {:?}", round, line);
            Ok(())
        }
        ParseMode::Strict => ParseSnafu {
            round,
            line: line.to_string(),
        }
        .fail(),
    }
}

/// Parses a sequence of category-header lines, each followed by member
/// gallery lines. Gallery lines are grouped under the most recent header.
#[derive(Debug, Clone)]
pub struct CategorizedParser {
    pub header: Pattern,
    pub gallery: Pattern,
    pub sort: GallerySort,
    pub mode: ParseMode,
}

impl CategorizedParser {
    /// Candidates grouped by category, category order = header order,
    /// members sorted by the parser's sort key. Gallery lines before the
    /// first header end up in a `None` group.
    pub fn parse_grouped(
        &self,
        round: u8,
        text: &str,
    ) -> Result<Vec<(Option<Category>, Vec<Candidate>)>, EvalError> {
        let mut groups: Vec<(Option<Category>, Vec<Candidate>)> = Vec::new();
        for raw in text.lines() {
            let line = raw.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(parsed) = self.header.recognize(line) {
                let cat = Category {
                    key: parsed.key.unwrap_or_default(),
                    label: parsed.label.unwrap_or_default(),
                };
                groups.push((Some(cat), Vec::new()));
                continue;
            }
            if let Some(mut cand) = self.gallery.recognize(line).and_then(candidate_from_line) {
                if groups.is_empty() {
                    groups.push((None, Vec::new()));
                }
                if let Some((cat, members)) = groups.last_mut() {
                    cand.category = cat.clone();
                    members.push(cand);
                }
                continue;
            }
            skip_or_fail(self.mode, round, line)?;
        }
        for (_, members) in groups.iter_mut() {
            self.sort.apply(members);
        }
        Ok(groups)
    }

    /// The flat pool, in category order. Each candidate carries its category.
    pub fn parse(&self, round: u8, text: &str) -> Result<Vec<Candidate>, EvalError> {
        let groups = self.parse_grouped(round, text)?;
        Ok(groups.into_iter().flat_map(|(_, members)| members).collect())
    }

    /// Renders the pool back to header + gallery text. Groups follow the
    /// order of first appearance in the pool; members follow the sort key.
    pub fn render(&self, pool: &[Candidate]) -> String {
        let mut groups: Vec<(Option<Category>, Vec<Candidate>)> = Vec::new();
        for c in pool {
            let slot = groups
                .iter_mut()
                .find(|(g, _)| g.as_ref().map(|x| &x.key) == c.category.as_ref().map(|x| &x.key));
            match slot {
                Some((_, members)) => members.push(c.clone()),
                None => groups.push((c.category.clone(), vec![c.clone()])),
            }
        }
        let mut out = String::new();
        for (cat, mut members) in groups {
            self.sort.apply(&mut members);
            if let Some(cat) = cat {
                out.push_str(&self.header.render_header(&cat));
                out.push('\n');
            }
            for c in members {
                out.push_str(&self.gallery.render_candidate(&c));
                out.push('\n');
            }
        }
        out
    }
}

/// Parses a flat sequence of gallery lines, no headers.
#[derive(Debug, Clone)]
pub struct UncategorizedParser {
    pub gallery: Pattern,
    pub sort: GallerySort,
    pub mode: ParseMode,
}

impl UncategorizedParser {
    pub fn parse(&self, round: u8, text: &str) -> Result<Vec<Candidate>, EvalError> {
        let mut pool: Vec<Candidate> = Vec::new();
        for raw in text.lines() {
            let line = raw.trim_end();
            if line.is_empty() {
                continue;
            }
            match self.gallery.recognize(line).and_then(candidate_from_line) {
                Some(cand) => pool.push(cand),
                None => skip_or_fail(self.mode, round, line)?,
            }
        }
        self.sort.apply(&mut pool);
        Ok(pool)
    }

    pub fn render(&self, pool: &[Candidate]) -> String {
        let mut ordered = pool.to_vec();
        self.sort.apply(&mut ordered);
        let mut out = String::new();
        for c in ordered {
            out.push_str(&self.gallery.render_candidate(&c));
            out.push('\n');
        }
        out
    }
}

/// Reads several independent source pages in a fixed order and concatenates
/// their parsed candidates. Used to seed the opening round from pre-existing
/// curated lists; the full parsed pool is the eligible output.
#[derive(Debug, Clone)]
pub struct MultiSourceParser {
    pub pages: Vec<String>,
    pub gallery: Pattern,
    pub mode: ParseMode,
}

impl MultiSourceParser {
    pub fn parse_all(&self, round: u8, store: &dyn PageStore) -> Result<Vec<Candidate>, EvalError> {
        let mut pool: Vec<Candidate> = Vec::new();
        for page in &self.pages {
            let text = with_retry(page, LOOKUP_ATTEMPTS, || store.fetch(page)).context(
                LookupSnafu {
                    round,
                    subject: page.clone(),
                },
            )?;
            let mut count = 0usize;
            for raw in text.lines() {
                let line = raw.trim_end();
                if line.is_empty() {
                    continue;
                }
                match self.gallery.recognize(line).and_then(candidate_from_line) {
                    Some(cand) => {
                        pool.push(cand);
                        count += 1;
                    }
                    None => skip_or_fail(self.mode, round, line)?,
                }
            }
            debug!("round {}: {} candidates from {:?}", round, count, page);
        }
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookupError;
    use std::collections::HashMap;

    fn gallery_pattern() -> Pattern {
        Pattern::new(
            r"^(?P<title>[^|]+?)\|(?P<id>\d+-\d+/\d+) *(?:<!--(?P<comment>.*)-->)?$",
            "{title}|{id} <!--{comment}-->",
        )
        .unwrap()
    }

    fn header_pattern() -> Pattern {
        Pattern::new(
            r"^== *\[\[Gallery/(?P<key>[^|]+)\|(?P<label>[^\]]+?)\]\] *==$",
            "== [[Gallery/{key}|{label}]] ==",
        )
        .unwrap()
    }

    #[test]
    fn placeholders_ignore_literal_braces() {
        let found = placeholders("{title}|{{POTY2021/votebutton|f={title}}} <!--{comment}-->");
        assert_eq!(found, vec!["title", "title", "comment"]);
    }

    #[test]
    fn unknown_placeholder_is_a_configuration_error() {
        let res = Pattern::new(r"^(?P<title>.+)$", "{title} {rank}");
        assert!(matches!(res, Err(EvalError::Configuration { .. })));
    }

    #[test]
    fn unknown_capture_group_is_a_configuration_error() {
        let res = Pattern::new(r"^(?P<name>.+)$", "{title}");
        assert!(matches!(res, Err(EvalError::Configuration { .. })));
    }

    #[test]
    fn gallery_line_round_trips() {
        let p = gallery_pattern();
        let line = "File:Bee.jpg|2021-02/15 <!--buzzing-->";
        let parsed = p.recognize(line).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("File:Bee.jpg"));
        assert_eq!(parsed.id.as_deref(), Some("2021-02/15"));
        assert_eq!(parsed.comment.as_deref(), Some("buzzing"));
        let cand = Candidate {
            title: "File:Bee.jpg".to_string(),
            id: "2021-02/15".to_string(),
            category: None,
            comment: "buzzing".to_string(),
            votes: 0,
        };
        assert_eq!(p.render_candidate(&cand), line);
    }

    fn categorized() -> CategorizedParser {
        CategorizedParser {
            header: header_pattern(),
            gallery: gallery_pattern(),
            sort: GallerySort::DateSequence,
            mode: ParseMode::Lenient,
        }
    }

    const GROUPED_TEXT: &str = "\
== [[Gallery/Birds|Birds]] ==
File:Owl.jpg|2021-11/3 <!---->
File:Wren.jpg|2021-2/7 <!---->
== [[Gallery/Waters|Waters]] ==
File:Falls.jpg|2021-5/1 <!---->
";

    #[test]
    fn groups_under_most_recent_header_and_sorts_by_id() {
        let groups = categorized().parse_grouped(1, GROUPED_TEXT).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.as_ref().unwrap().label, "Birds");
        let birds: Vec<&str> = groups[0].1.iter().map(|c| c.title.as_str()).collect();
        // 2021-2/7 sorts before 2021-11/3 numerically.
        assert_eq!(birds, vec!["File:Wren.jpg", "File:Owl.jpg"]);
        assert_eq!(groups[1].1[0].category.as_ref().unwrap().key, "Waters");
    }

    #[test]
    fn parse_render_parse_is_stable() {
        let parser = categorized();
        let pool = parser.parse(1, GROUPED_TEXT).unwrap();
        let rendered = parser.render(&pool);
        let reparsed = parser.parse(1, &rendered).unwrap();
        assert_eq!(pool, reparsed);
    }

    #[test]
    fn strict_mode_surfaces_unrecognized_lines() {
        let mut parser = categorized();
        parser.mode = ParseMode::Strict;
        let res = parser.parse(1, "<gallery>\n");
        assert!(matches!(res, Err(EvalError::Parse { round: 1, .. })));
    }

    #[test]
    fn lenient_mode_drops_unrecognized_lines() {
        let pool = categorized()
            .parse(1, "<gallery>\nFile:Owl.jpg|2021-11/3 <!---->\n</gallery>\n")
            .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn anonymized_sort_is_deterministic() {
        let parser = UncategorizedParser {
            gallery: gallery_pattern(),
            sort: GallerySort::Anonymized { seed: 7 },
            mode: ParseMode::Lenient,
        };
        let text = "File:A.jpg|1-1/1 <!---->\nFile:B.jpg|1-1/2 <!---->\nFile:C.jpg|1-1/3 <!---->\n";
        let first = parser.parse(2, text).unwrap();
        let second = parser.parse(2, text).unwrap();
        assert_eq!(first, second);
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

    #[test]
    fn multi_source_concatenates_in_page_order() {
        let mut pages = HashMap::new();
        pages.insert(
            "list-A".to_string(),
            "File:A.jpg|1-1/1 <!---->\n".to_string(),
        );
        pages.insert(
            "list-B".to_string(),
            "File:B.jpg|1-1/2 <!---->\n".to_string(),
        );
        let parser = MultiSourceParser {
            pages: vec!["list-A".to_string(), "list-B".to_string()],
            gallery: gallery_pattern(),
            mode: ParseMode::Lenient,
        };
        let pool = parser.parse_all(0, &MemStore(pages)).unwrap();
        let titles: Vec<&str> = pool.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["File:A.jpg", "File:B.jpg"]);
    }

    #[test]
    fn multi_source_missing_page_aborts() {
        let parser = MultiSourceParser {
            pages: vec!["absent".to_string()],
            gallery: gallery_pattern(),
            mode: ParseMode::Lenient,
        };
        let res = parser.parse_all(0, &MemStore(HashMap::new()));
        assert!(matches!(res, Err(EvalError::Lookup { round: 0, .. })));
    }
}
