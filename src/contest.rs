//! The contest-year definition: the four rounds, their patterns, the stage
//! lists and the canonical bucket list. Everything here is data; the logic
//! lives in `contest_eval`.

use contest_eval::*;

/// The canonical subject buckets of the category-balanced round, in priority
/// order: a candidate belonging to several of these is assigned to the first
/// one that matches. Each entry is (lookup category, display label).
pub const BUCKETS: [(&str, &str); 25] = [
    ("Arthropods", "Arthropods"),
    ("Birds", "Birds"),
    ("Mammals", "Mammals"),
    ("Other animals", "Other animals"),
    ("Plants and fungi", "Plants and fungi"),
    ("People", "People and human activities"),
    (
        "Paintings, textiles and works on paper",
        "Paintings, textiles and works on paper",
    ),
    ("Settlements", "Settlements"),
    ("Castles", "Castles and Fortifications"),
    ("Religious Buildings", "Religious Buildings"),
    ("Constructions and buildings", "Constructions and buildings"),
    (
        "Artificially illuminated outdoor spaces",
        "Artificially illuminated outdoor spaces",
    ),
    ("Infrastructure", "Infrastructure"),
    ("Interiors and details", "Interiors and details"),
    (
        "Interiors of religious buildings",
        "Interiors of religious buildings",
    ),
    (
        "Frescos, ceilings and stained glass",
        "Frescos, ceilings and stained glass",
    ),
    ("Panoramic views", "Panoramic views"),
    ("Nature views", "Nature views"),
    ("Waters", "Waters"),
    ("Astronomy", "Astronomy, satellite and outer space"),
    ("Maps", "Maps and diagrams"),
    ("Vehicles and crafts", "Vehicles and crafts"),
    ("Sculptures", "Sculptures"),
    (
        "Objects, shells and miscellaneous",
        "Objects, shells and miscellaneous",
    ),
    ("Videos and Animations", "Videos and Animations"),
];

/// One username per line, in the signature form `# [[User:X]]` or the
/// self-referential display form `# [[User:X|X]]` (the tally rejects a
/// display text that differs from the target).
const VOTE_LINE: &str = r"^# *\[\[[Uu]ser:([^\]|]+?)(?:\|([^\]]+))?\]\] *$";

fn fp_gallery_pattern() -> Result<Pattern, EvalError> {
    Pattern::new(
        r"^(?P<title>[^|]+?)\|(?P<id>\d+-\d+/\d+) *(?:<!--(?P<comment>.*)-->)?$",
        "{title}|{id} <!--{comment}-->",
    )
}

fn header_pattern(year: i32) -> Result<Pattern, EvalError> {
    Pattern::new(
        r"^== *\[\[Commons:Picture of the Year/\d+/R1/Gallery/(?P<key>[^|]+)\|(?P<label>[^\]]+?)\]\] *==$",
        &format!(
            "== [[Commons:Picture of the Year/{}/R1/Gallery/{{key}}|{{label}}]] ==",
            year
        ),
    )
}

fn votebutton_pattern(year: i32) -> Result<Pattern, EvalError> {
    Pattern::new(
        r"^(?P<title>[^|]+?)\|\{\{[^}]+?\}\} *(?:<!--(?P<comment>.*)-->)?$",
        &format!(
            "{{title}}|{{{{POTY{y}/votebutton|f={{title}}|base=Commons:Picture_of_the_Year/{y}/R2}}}} <!--{{comment}}-->",
            y = year
        ),
    )
}

/// Builds the whole contest for one year. Fails before any text is fetched
/// if any pattern, stage list or bucket list is self-contradictory.
pub fn build(
    year: i32,
    eligibility: EligibilityConfig,
    mode: ParseMode,
    unmatched: UnmatchedPolicy,
    final_cap: u32,
    shuffle_seed: u32,
) -> Result<Contest, EvalError> {
    let base = format!("Commons:Picture of the Year/{}", year);
    let fp_gallery = fp_gallery_pattern()?;
    let header = header_pattern(year)?;
    let votebutton = votebutton_pattern(year)?;

    let rounds = vec![
        // Seeding: the two chronological featured-picture lists, no further
        // eligibility filter.
        Round::new(
            0,
            None,
            CandidateSource::MultiSource(MultiSourceParser {
                pages: vec![
                    format!("Commons:Featured pictures/chronological/{}-A", year),
                    format!("Commons:Featured pictures/chronological/{}-B", year),
                ],
                gallery: fp_gallery.clone(),
                mode,
            }),
            Strategy::SeedOnly,
            CandidateSource::Uncategorized(UncategorizedParser {
                gallery: fp_gallery.clone(),
                sort: GallerySort::SourceOrder,
                mode,
            }),
            format!("{}/Candidates", base),
        )?,
        // Category-balanced curation into the canonical buckets.
        Round::new(
            1,
            Some(format!("{}/Candidates", base)),
            CandidateSource::Categorized(CategorizedParser {
                header: header.clone(),
                gallery: fp_gallery.clone(),
                sort: GallerySort::DateSequence,
                mode,
            }),
            Strategy::Bucketed(CategoryBucketer::new(&BUCKETS, unmatched)?),
            CandidateSource::Categorized(CategorizedParser {
                header: header.clone(),
                gallery: fp_gallery.clone(),
                sort: GallerySort::DateSequence,
                mode,
            }),
            format!("{}/R1/Gallery", base),
        )?,
        // Open voting over the galleries: global top 30, then the top 2 of
        // each category from what is left. No per-voter cap in this round.
        Round::new(
            2,
            Some(format!("{}/R1/Gallery", base)),
            CandidateSource::Categorized(CategorizedParser {
                header,
                gallery: fp_gallery,
                sort: GallerySort::DateSequence,
                mode,
            }),
            Strategy::Voted {
                tally: VoteTally::new(&format!("{}/R1/v/{{title}}", base), VOTE_LINE, None)?,
                stages: vec![
                    SelectionStage::new(Some(30), GroupKey::None, "Top #{i} in all categories")?,
                    SelectionStage::new(
                        Some(2),
                        GroupKey::Category,
                        "Top #{i} in category \"{c}\"",
                    )?,
                ],
            },
            CandidateSource::Uncategorized(UncategorizedParser {
                gallery: votebutton.clone(),
                sort: GallerySort::Anonymized { seed: shuffle_seed },
                mode,
            }),
            format!("{}/Candidates/R2", base),
        )?,
        // The final: every voter supports at most a few candidates, the full
        // pool is ranked and rank 1 is the winner.
        Round::new(
            3,
            Some(format!("{}/Candidates/R2", base)),
            CandidateSource::Uncategorized(UncategorizedParser {
                gallery: votebutton,
                sort: GallerySort::SourceOrder,
                mode,
            }),
            Strategy::Voted {
                tally: VoteTally::new(
                    &format!("{}/R2/v/{{title}}", base),
                    VOTE_LINE,
                    Some(final_cap),
                )?,
                stages: vec![SelectionStage::new(None, GroupKey::None, "#{i}, {n} votes")?],
            },
            CandidateSource::Uncategorized(UncategorizedParser {
                gallery: Pattern::new("^$", "{title}| {comment}")?,
                sort: GallerySort::CommentRank,
                mode,
            }),
            format!("{}/Results", base),
        )?,
    ];
    Ok(Contest::new(
        year,
        "Commons:Picture of the Year",
        eligibility,
        rounds,
    ))
}
