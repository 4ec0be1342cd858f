use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use docreview_core::placeholder::{PRIOR_OUTPUT, RESERVED};
use serde::{Deserialize, Serialize};

use crate::catalog::SkillDefinition;
use crate::error::TemplateError;

/// The semantic slots a prompt can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    Consultancy,
    ConsultancyTask,
    Client,
    ClientBackground,
    ProblemStatement,
    ResearchQuestions,
    ThematicAreas,
}

impl ContextField {
    pub const ALL: [ContextField; 7] = [
        ContextField::Consultancy,
        ContextField::ConsultancyTask,
        ContextField::Client,
        ContextField::ClientBackground,
        ContextField::ProblemStatement,
        ContextField::ResearchQuestions,
        ContextField::ThematicAreas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextField::Consultancy => "consultancy",
            ContextField::ConsultancyTask => "consultancy_task",
            ContextField::Client => "client",
            ContextField::ClientBackground => "client_background",
            ContextField::ProblemStatement => "problem_statement",
            ContextField::ResearchQuestions => "research_questions",
            ContextField::ThematicAreas => "thematic_areas",
        }
    }

    pub fn named_marker(&self) -> String {
        format!("{{{{{}}}}}", self.as_str())
    }

    /// Single-glyph markers found in older context blobs.
    pub fn legacy_marker(&self) -> &'static str {
        match self {
            ContextField::Consultancy => "$",
            ContextField::ConsultancyTask => "#",
            ContextField::Client => "^",
            ContextField::ClientBackground => ">",
            ContextField::ProblemStatement => "<",
            ContextField::ResearchQuestions => "~",
            ContextField::ThematicAreas => "&",
        }
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub marker: String,
    #[serde(default)]
    pub replacement: String,
}

/// Marker/replacement pairs per context field. Markers are checked on
/// construction: non-empty, unique, none nested in another, none touching a
/// reserved placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<ContextField, Placeholder>",
    into = "BTreeMap<ContextField, Placeholder>"
)]
pub struct AgentInternals {
    fields: BTreeMap<ContextField, Placeholder>,
}

impl AgentInternals {
    pub fn new(fields: BTreeMap<ContextField, Placeholder>) -> Result<Self, TemplateError> {
        validate_markers(&fields)?;
        Ok(Self { fields })
    }

    /// Every field with its `{{name}}` marker and an empty replacement.
    pub fn named() -> Self {
        Self {
            fields: ContextField::ALL
                .iter()
                .map(|field| {
                    (
                        *field,
                        Placeholder {
                            marker: field.named_marker(),
                            replacement: String::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn legacy() -> Self {
        Self {
            fields: ContextField::ALL
                .iter()
                .map(|field| {
                    (
                        *field,
                        Placeholder {
                            marker: field.legacy_marker().to_string(),
                            replacement: String::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, field: ContextField) -> Option<&Placeholder> {
        self.fields.get(&field)
    }

    pub fn replacement(&self, field: ContextField) -> Option<&str> {
        self.fields.get(&field).map(|p| p.replacement.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextField, &Placeholder)> {
        self.fields.iter().map(|(field, placeholder)| (*field, placeholder))
    }

    /// Same markers, replacements taken from `lookup` (empty when it has none).
    pub fn with_replacements<F>(&self, mut lookup: F) -> Self
    where
        F: FnMut(ContextField) -> Option<String>,
    {
        let fields = self
            .fields
            .iter()
            .map(|(field, placeholder)| {
                (
                    *field,
                    Placeholder {
                        marker: placeholder.marker.clone(),
                        replacement: lookup(*field).unwrap_or_default(),
                    },
                )
            })
            .collect();
        Self { fields }
    }

    /// Replaces every marker occurrence in one left-to-right pass.
    /// Replacement text is emitted as-is and never scanned again.
    pub fn substitute(&self, text: &str) -> String {
        let pairs: Vec<(&str, &str)> = self
            .fields
            .values()
            .map(|p| (p.marker.as_str(), p.replacement.as_str()))
            .collect();
        substitute(text, &pairs)
    }
}

impl TryFrom<BTreeMap<ContextField, Placeholder>> for AgentInternals {
    type Error = TemplateError;

    fn try_from(fields: BTreeMap<ContextField, Placeholder>) -> Result<Self, TemplateError> {
        Self::new(fields)
    }
}

impl From<AgentInternals> for BTreeMap<ContextField, Placeholder> {
    fn from(value: AgentInternals) -> Self {
        value.fields
    }
}

fn validate_markers(fields: &BTreeMap<ContextField, Placeholder>) -> Result<(), TemplateError> {
    for (field, placeholder) in fields {
        let marker = placeholder.marker.as_str();
        if marker.is_empty() {
            return Err(TemplateError::EmptyMarker(*field));
        }
        if let Some(placeholder) = RESERVED
            .iter()
            .find(|reserved| reserved.contains(marker) || marker.contains(*reserved))
        {
            return Err(TemplateError::ReservedMarker {
                marker: marker.to_string(),
                field: *field,
                placeholder: *placeholder,
            });
        }
    }
    let entries: Vec<(&ContextField, &Placeholder)> = fields.iter().collect();
    for (i, (first, a)) in entries.iter().enumerate() {
        for (second, b) in entries.iter().skip(i + 1) {
            if a.marker == b.marker {
                return Err(TemplateError::DuplicateMarker {
                    marker: a.marker.clone(),
                    first: **first,
                    second: **second,
                });
            }
            let nested = if b.marker.contains(&a.marker) {
                Some((a, **first, b, **second))
            } else if a.marker.contains(&b.marker) {
                Some((b, **second, a, **first))
            } else {
                None
            };
            if let Some((inner, inner_field, outer, outer_field)) = nested {
                return Err(TemplateError::NestedMarker {
                    inner: inner.marker.clone(),
                    inner_field,
                    outer: outer.marker.clone(),
                    outer_field,
                });
            }
        }
    }
    Ok(())
}

/// Single-pass literal substitution. At most one marker can match at any
/// position once markers are validated; empty markers are ignored.
pub fn substitute(text: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for (marker, replacement) in pairs {
            if !marker.is_empty() && rest.starts_with(marker) {
                out.push_str(replacement);
                rest = &rest[marker.len()..];
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

/// `role + instructions` with every context marker resolved.
pub fn populate(skill: &SkillDefinition, internals: &AgentInternals) -> String {
    let mut prompt = String::with_capacity(skill.role.len() + skill.instructions.len());
    prompt.push_str(&skill.role);
    prompt.push_str(&skill.instructions);
    internals.substitute(&prompt)
}

/// Splices a prerequisite skill's output into a resolved prompt.
pub fn contiguous_on(base_prompt: &str, prior_output: &str) -> String {
    base_prompt.replace(PRIOR_OUTPUT, prior_output)
}
