//! Named prompt templates with `${name}` placeholders.
//!
//! Templates are loaded once at startup from a directory of `*.txt` files
//! (the file stem is the template name, e.g. `analysis.txt` → `analysis`)
//! and shared read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cache::canonical;
use crate::error::{Result, StockdeskError};

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(\w+)\}").unwrap());

const TEMPLATE_EXTENSION: &str = "txt";

/// Process-wide set of prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl PromptLibrary {
    /// Build from in-memory `(name, template)` pairs.
    pub fn from_templates<I, K, V>(templates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            templates: templates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load every `*.txt` file in `dir`. A missing directory yields an empty
    /// library; an unreadable file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            debug!(dir = %dir.display(), "Prompt directory missing, no templates loaded");
            return Ok(Self::default());
        }

        let mut templates = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let body = std::fs::read_to_string(&path).map_err(|e| {
                StockdeskError::Config(format!("cannot read prompt {}: {}", path.display(), e))
            })?;
            templates.insert(name.to_string(), body);
        }

        info!(dir = %dir.display(), count = templates.len(), "Prompt templates loaded");
        Ok(Self { templates })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Render template `name` against `vars`. Unknown template is
    /// `InvalidRequest`; unknown placeholders render as empty strings.
    pub fn render(&self, name: &str, vars: &Map<String, Value>) -> Result<String> {
        let template = self.templates.get(name).ok_or_else(|| {
            StockdeskError::InvalidRequest(format!("unknown request type '{}'", name))
        })?;
        Ok(render_template(template, vars))
    }
}

/// Substitute `${name}` placeholders. Values render in canonical form, so
/// strings appear unquoted and nested objects have a stable key order.
pub fn render_template(template: &str, vars: &Map<String, Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            canonical::serialize_opt(vars.get(&caps[1]))
        })
        .into_owned()
}

/// Merge `context` and `params` into one variable map; `params` wins.
pub fn merge_vars(context: &Value, params: &Value) -> Map<String, Value> {
    let mut vars = context.as_object().cloned().unwrap_or_default();
    if let Some(p) = params.as_object() {
        for (k, v) in p {
            vars.insert(k.clone(), v.clone());
        }
    }
    vars
}
