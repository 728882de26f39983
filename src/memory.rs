//! Layered context assembled for each node invocation.
//!
//! - **L1**: node-local scratch. Reserved; always empty today.
//! - **L2**: the outputs of the node's parents, merged under numbered headers
//!   and truncated to a character budget.
//! - **L3**: global facts shared by every node of the pipeline.
//!
//! A [`MemoryContext`] is rebuilt for every invocation and never persisted.

use crate::prompt::{numbered_list, references_namespace, section, Namespace, TemplateVars};
use crate::types::Node;
use std::collections::{BTreeMap, HashMap};

/// Appended whenever [`truncate_summary`] shortens its input.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Default L2 budget in characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 8_000;

const SENTENCE_ENDS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Output of one upstream node, as seen by a dependent.
///
/// `output` is empty when the parent failed or recorded nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentOutput {
    pub id: String,
    pub label: String,
    pub output: String,
}

impl ParentOutput {
    pub fn new(id: impl Into<String>, label: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            output: output.into(),
        }
    }
}

/// Shorten `text` to at most `max_chars` characters plus the marker.
///
/// Text that fits is returned unchanged. Otherwise the text is cut at
/// `max_chars`; if the last sentence end inside that slice lies past its
/// midpoint the cut moves back to just after it, so the summary does not stop
/// mid-sentence. [`TRUNCATION_MARKER`] is appended either way.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let slice = &text[..cut];

    let boundary = slice
        .char_indices()
        .rev()
        .find(|(_, c)| SENTENCE_ENDS.contains(c))
        .map(|(i, c)| i + c.len_utf8());

    let kept = match boundary {
        Some(end) if slice[..end].chars().count() * 2 > max_chars => &slice[..end],
        _ => slice,
    };
    format!("{}{}", kept, TRUNCATION_MARKER)
}

/// Merge parent outputs under numbered headers, then truncate to `max_chars`.
pub fn build_l2_context(parents: &[ParentOutput], max_chars: usize) -> String {
    let merged = parents
        .iter()
        .enumerate()
        .map(|(i, p)| format!("### [{}] {}\n{}", i + 1, p.label, p.output))
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_summary(&merged, max_chars)
}

/// Rough token estimate: four ASCII characters per token, one token per
/// non-ASCII character (CJK text tokenizes close to that).
pub fn estimate_tokens(text: &str) -> usize {
    let (ascii, other) = text.chars().fold((0usize, 0usize), |(a, o), c| {
        if c.is_ascii() {
            (a + 1, o)
        } else {
            (a, o + 1)
        }
    });
    ascii.div_ceil(4) + other
}

/// The three context layers for one node invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryContext {
    /// Node-local scratch. Reserved.
    pub l1: Vec<String>,
    /// Merged, truncated parent outputs.
    pub l2: String,
    /// Global facts.
    pub l3: BTreeMap<String, String>,
}

impl MemoryContext {
    pub fn build(parents: &[ParentOutput], globals: &BTreeMap<String, String>, max_chars: usize) -> Self {
        let l2 = if parents.is_empty() {
            String::new()
        } else {
            build_l2_context(parents, max_chars)
        };
        Self {
            l1: Vec::new(),
            l2,
            l3: globals.clone(),
        }
    }

    /// Template variables for `node`: `prev.output` is L2, `prev.<id>` each
    /// parent's raw output, `global.*` L3, `user.*` the run inputs and
    /// `node.*` the node's own identity.
    pub fn template_vars(
        &self,
        node: &Node,
        parents: &[ParentOutput],
        user: &HashMap<String, String>,
    ) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert(Namespace::Prev, "output", self.l2.clone());
        for p in parents {
            vars.insert(Namespace::Prev, p.id.clone(), p.output.clone());
        }
        vars.extend(Namespace::Global, &self.l3);
        vars.extend(Namespace::User, user);
        vars.insert(Namespace::Node, "id", node.id.clone());
        vars.insert(Namespace::Node, "label", node.display_name());
        vars.insert(Namespace::Node, "model", node.model.clone());
        vars.insert(Namespace::Node, "provider", node.provider.as_str());
        vars
    }

    /// Final user prompt: context sections the template did not pull in
    /// explicitly, followed by the rendered template.
    pub fn compose(&self, rendered: &str, template: &str) -> String {
        let mut sections = Vec::new();

        if !self.l3.is_empty() && !references_namespace(template, Namespace::Global) {
            let facts: Vec<String> = self.l3.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
            sections.push(section("Global Facts", &numbered_list(&facts)));
        }
        if !self.l2.is_empty() && !references_namespace(template, Namespace::Prev) {
            sections.push(section("Upstream Context", &self.l2));
        }

        if sections.is_empty() {
            return rendered.to_string();
        }
        sections.push(section("Task", rendered));
        sections.join("\n\n")
    }
}
