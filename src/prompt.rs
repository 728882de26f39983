//! Prompt templating with namespaced `{{namespace.key}}` placeholders.
//!
//! Templates are user-authored, so rendering never fails: a placeholder with
//! an unknown namespace or key is left in the output exactly as written.

use std::collections::HashMap;
use std::fmt;

/// The fixed set of placeholder namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Upstream outputs: `prev.output` (merged context) and `prev.<nodeId>`.
    Prev,
    /// Global facts shared by every node of the pipeline.
    Global,
    /// Caller-supplied run inputs.
    User,
    /// The node being rendered (`node.id`, `node.model`, ...).
    Node,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Prev => "prev",
            Namespace::Global => "global",
            Namespace::User => "user",
            Namespace::Node => "node",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "prev" => Some(Namespace::Prev),
            "global" => Some(Namespace::Global),
            "user" => Some(Namespace::User),
            "node" => Some(Namespace::Node),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values available to a template, grouped by namespace.
///
/// # Example
///
/// ```
/// use llm_flow::prompt::{render_template, Namespace, TemplateVars};
///
/// let vars = TemplateVars::new()
///     .with(Namespace::Prev, "output", "A")
///     .with(Namespace::Global, "tone", "terse");
/// assert_eq!(
///     render_template("{{prev.output}}+{{unknown.x}} ({{ global.tone }})", &vars),
///     "A+{{unknown.x}} (terse)"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<Namespace, HashMap<String, String>>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value (builder style).
    pub fn with(mut self, ns: Namespace, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(ns, key, value);
        self
    }

    pub fn insert(&mut self, ns: Namespace, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .entry(ns)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Insert every pair of `entries` under `ns`.
    pub fn extend<'a, I>(&mut self, ns: Namespace, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let map = self.values.entry(ns).or_default();
        for (k, v) in entries {
            map.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, ns: Namespace, key: &str) -> Option<&str> {
        self.values.get(&ns)?.get(key).map(|s| s.as_str())
    }
}

/// Resolve the text between `{{` and `}}`.
fn resolve<'v>(inner: &str, vars: &'v TemplateVars) -> Option<&'v str> {
    let (ns, key) = inner.trim().split_once('.')?;
    let ns = Namespace::parse(ns.trim())?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    vars.get(ns, key)
}

/// Substitute `{{namespace.key}}` placeholders.
///
/// Whitespace inside the braces is ignored. Substituted values are not
/// scanned again, so upstream output containing braces is inserted literally.
pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &after[..end];

        // "{{ {{prev.output}}": emit the first pair and rescan from the second.
        if inner.contains("{{") {
            out.push_str("{{");
            rest = after;
            continue;
        }

        match resolve(inner, vars) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Whether `template` contains any placeholder under `ns`, resolvable or not.
pub fn references_namespace(template: &str, ns: Namespace) -> bool {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return false;
        };
        let inner = after[..end].trim();
        if inner
            .split_once('.')
            .is_some_and(|(n, _)| n.trim() == ns.as_str())
        {
            return true;
        }
        rest = &after[end + 2..];
    }
    false
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}
