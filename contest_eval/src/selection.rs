use std::collections::HashSet;

use log::debug;

use crate::config::{Candidate, ConfigurationSnafu, EvalError};
use crate::pattern::placeholders;

/// A rank-annotation template. `{i}` is the 1-based rank within the stage
/// (restarting per group for grouped stages), `{n}` the vote count and `{c}`
/// the group label.
#[derive(Debug, Clone)]
pub struct CommentTemplate {
    text: String,
}

const KNOWN_FIELDS: [&str; 3] = ["i", "n", "c"];

impl CommentTemplate {
    pub fn new(text: &str) -> Result<CommentTemplate, EvalError> {
        for ph in placeholders(text) {
            if !KNOWN_FIELDS.contains(&ph.as_str()) {
                return ConfigurationSnafu {
                    detail: format!("unknown placeholder {:?} in comment template {:?}", ph, text),
                }
                .fail();
            }
        }
        Ok(CommentTemplate {
            text: text.to_string(),
        })
    }

    fn format(&self, rank: usize, votes: u64, group: &str) -> String {
        self.text
            .replace("{i}", &rank.to_string())
            .replace("{n}", &votes.to_string())
            .replace("{c}", group)
    }
}

/// Named grouping strategies for a stage.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum GroupKey {
    /// One global group.
    None,
    /// Partition by the candidate's category.
    Category,
}

/// One ranking/quota step of a round's selection pipeline.
#[derive(Debug, Clone)]
pub struct SelectionStage {
    num: Option<usize>,
    group: GroupKey,
    comment: CommentTemplate,
}

impl SelectionStage {
    /// `num = None` means unbounded: the stage takes everything left, which
    /// turns a one-stage pipeline into a full ranked ordering.
    pub fn new(
        num: Option<usize>,
        group: GroupKey,
        comment: &str,
    ) -> Result<SelectionStage, EvalError> {
        if group == GroupKey::Category && num == Some(0) {
            return ConfigurationSnafu {
                detail: "grouped stage with a cap of zero selects nothing".to_string(),
            }
            .fail();
        }
        Ok(SelectionStage {
            num,
            group,
            comment: CommentTemplate::new(comment)?,
        })
    }
}

/// Runs the ordered stage list over a tallied pool.
///
/// State across stages: the selected set (in selection order) and the
/// remaining pool. Each stage sorts its view by vote count descending with a
/// stable tie-break on the pool order, takes its quota, attaches a formatted
/// comment, and removes the picks from the remaining pool. A later stage
/// only ever sees candidates not already promoted, which yields "global top
/// N first, then per-category quota from what's left" semantics.
pub fn run_pipeline(round: u8, stages: &[SelectionStage], pool: &[Candidate]) -> Vec<Candidate> {
    let mut remaining: Vec<Candidate> = pool.to_vec();
    let mut selected: Vec<Candidate> = Vec::new();
    for (si, stage) in stages.iter().enumerate() {
        let picked = match stage.group {
            GroupKey::None => pick_global(stage, &remaining),
            GroupKey::Category => pick_per_group(stage, &remaining),
        };
        debug!(
            "round {}: stage {} promoted {} of {} candidates",
            round,
            si + 1,
            picked.len(),
            remaining.len()
        );
        let picked_ids: HashSet<String> = picked.iter().map(|c| c.id.clone()).collect();
        remaining.retain(|c| !picked_ids.contains(&c.id));
        selected.extend(picked);
    }
    selected
}

fn ranked_order(remaining: &[Candidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..remaining.len()).collect();
    // Stable sort: ties keep the original pool order.
    order.sort_by(|&a, &b| remaining[b].votes.cmp(&remaining[a].votes));
    order
}

fn pick_global(stage: &SelectionStage, remaining: &[Candidate]) -> Vec<Candidate> {
    let quota = stage.num.unwrap_or(remaining.len());
    ranked_order(remaining)
        .into_iter()
        .take(quota)
        .enumerate()
        .map(|(rank, idx)| {
            let mut c = remaining[idx].clone();
            c.comment = stage.comment.format(rank + 1, c.votes, "");
            c
        })
        .collect()
}

fn pick_per_group(stage: &SelectionStage, remaining: &[Candidate]) -> Vec<Candidate> {
    // Group order = order of first appearance in the remaining pool.
    let mut groups: Vec<(Option<String>, String, Vec<usize>)> = Vec::new();
    for (idx, c) in remaining.iter().enumerate() {
        let key = c.category.as_ref().map(|cat| cat.key.clone());
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, members)) => members.push(idx),
            None => {
                let label = c
                    .category
                    .as_ref()
                    .map(|cat| cat.label.clone())
                    .unwrap_or_default();
                groups.push((key, label, vec![idx]));
            }
        }
    }
    let mut picked: Vec<Candidate> = Vec::new();
    for (_, label, members) in groups {
        let mut order = members.clone();
        order.sort_by(|&a, &b| remaining[b].votes.cmp(&remaining[a].votes));
        let quota = stage.num.unwrap_or(order.len());
        for (rank, idx) in order.into_iter().take(quota).enumerate() {
            let mut c = remaining[idx].clone();
            c.comment = stage.comment.format(rank + 1, c.votes, &label);
            picked.push(c);
        }
    }
    picked
}
