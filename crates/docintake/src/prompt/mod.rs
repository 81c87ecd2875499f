//! Category-specific prompt selection and placeholder substitution.

pub mod templates;

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::Utc;
use regex::{Captures, Regex};

use crate::error::PromptError;

/// Context used when none is given or the given one is unknown.
pub const DEFAULT_CONTEXT: &str = "general";

/// Substituted for the user instruction when none was supplied.
pub const NO_INSTRUCTION: &str = "None";

pub const USER_INSTRUCTION: &str = "USER_INSTRUCTION";
pub const KNOWN_CATEGORIES: &str = "KNOWN_CATEGORIES";
pub const ANALYSIS_TEXT: &str = "ANALYSIS_TEXT";
pub const CURRENT_DATE: &str = "CURRENT_DATE";

static RE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").unwrap());

/// One prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateSpec {
    pub name: &'static str,
    pub body: &'static str,
    /// Whether the already-known categories are worth fetching for it.
    pub uses_known_categories: bool,
}

impl TemplateSpec {
    /// Placeholder names referenced by the body, in order of appearance.
    pub fn placeholders(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = RE_PLACEHOLDER
            .captures_iter(self.body)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        names.dedup();
        names
    }
}

#[derive(Debug, Default, Clone)]
struct ContextTemplates {
    default: Option<TemplateSpec>,
    sub_contexts: BTreeMap<String, TemplateSpec>,
}

/// Maps `(context, sub_context)` to a template.
///
/// Every context must carry a default entry that catches unmatched
/// sub-contexts; [`TemplateRegistry::validate`] enforces this.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    contexts: BTreeMap<String, ContextTemplates>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in templates; see [`templates::builtin`].
    pub fn builtin() -> Self {
        templates::builtin()
    }

    /// Registers `spec` as the default for `context` (when `sub_context`
    /// is `None`) or for one of its sub-contexts.
    pub fn register(&mut self, context: &str, sub_context: Option<&str>, spec: TemplateSpec) {
        let entry = self.contexts.entry(selector_key(context)).or_default();
        match sub_context {
            None => entry.default = Some(spec),
            Some(sub) => {
                entry.sub_contexts.insert(selector_key(sub), spec);
            }
        }
    }

    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), PromptError> {
        if !self.contexts.contains_key(DEFAULT_CONTEXT) {
            return Err(PromptError::MissingFallbackContext(
                DEFAULT_CONTEXT.to_string(),
            ));
        }
        for (name, templates) in &self.contexts {
            if templates.default.is_none() {
                return Err(PromptError::MissingDefault(name.clone()));
            }
        }
        Ok(())
    }

    /// Resolves a template. Unknown contexts fall back to
    /// [`DEFAULT_CONTEXT`]; unknown sub-contexts to the context default.
    pub fn select(
        &self,
        context: Option<&str>,
        sub_context: Option<&str>,
    ) -> Result<&TemplateSpec, PromptError> {
        let requested = context.map(selector_key).filter(|c| !c.is_empty());

        let (name, templates) = match requested
            .as_deref()
            .and_then(|c| self.contexts.get_key_value(c))
        {
            Some(found) => found,
            None => self
                .contexts
                .get_key_value(DEFAULT_CONTEXT)
                .ok_or_else(|| PromptError::MissingFallbackContext(DEFAULT_CONTEXT.to_string()))?,
        };

        let sub = sub_context
            .map(selector_key)
            .and_then(|s| templates.sub_contexts.get(&s));

        sub.or(templates.default.as_ref())
            .ok_or_else(|| PromptError::MissingDefault(name.clone()))
    }

    pub fn assemble(&self, request: &PromptRequest<'_>) -> Result<AssembledPrompt, PromptError> {
        let spec = self.select(request.context, request.sub_context)?;
        let _span = tracing::info_span!("assemble_prompt", template = spec.name).entered();

        let instruction = request
            .instruction
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .unwrap_or(NO_INSTRUCTION);

        let known = if spec.uses_known_categories {
            format_known_categories(request.known_categories)
        } else {
            NO_INSTRUCTION.to_string()
        };

        let mut values: HashMap<&str, String> = HashMap::new();
        values.insert(USER_INSTRUCTION, instruction.to_string());
        values.insert(KNOWN_CATEGORIES, known);
        values.insert(ANALYSIS_TEXT, request.analysis_text.to_string());
        values.insert(CURRENT_DATE, Utc::now().format("%Y-%m-%d").to_string());
        for (name, value) in &request.extra {
            values.insert(*name, value.clone());
        }

        tracing::debug!(template = spec.name, "Prompt template selected");

        Ok(AssembledPrompt {
            template: spec.name,
            text: substitute(spec.body, &values),
        })
    }
}

/// Inputs for one prompt assembly.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest<'a> {
    pub context: Option<&'a str>,
    pub sub_context: Option<&'a str>,
    pub instruction: Option<&'a str>,
    pub known_categories: &'a [String],
    pub analysis_text: &'a str,
    /// Template-specific placeholder values.
    pub extra: Vec<(&'a str, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub template: &'static str,
    pub text: String,
}

/// Replaces `{{NAME}}` tokens in one pass. Tokens without a value are left
/// untouched, and substituted values are never rescanned.
pub fn substitute(template: &str, values: &HashMap<&str, String>) -> String {
    RE_PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match values.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn format_known_categories(categories: &[String]) -> String {
    if categories.is_empty() {
        return NO_INSTRUCTION.to_string();
    }
    categories.join(", ")
}

/// Lowercases and turns spaces and hyphens into underscores, so
/// "Human Resources" selects `human_resources`.
fn selector_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}
