use docreview_core::ReviewError;
use thiserror::Error;

use crate::template::ContextField;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("marker for {0} is empty")]
    EmptyMarker(ContextField),
    #[error("marker {marker:?} is used by both {first} and {second}")]
    DuplicateMarker {
        marker: String,
        first: ContextField,
        second: ContextField,
    },
    #[error("marker {inner:?} ({inner_field}) occurs inside marker {outer:?} ({outer_field})")]
    NestedMarker {
        inner: String,
        inner_field: ContextField,
        outer: String,
        outer_field: ContextField,
    },
    #[error("marker {marker:?} for {field} collides with reserved placeholder {placeholder}")]
    ReservedMarker {
        marker: String,
        field: ContextField,
        placeholder: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("agent internals are missing from the context")]
    MissingInternals,
    #[error("invalid agent internals: {0}")]
    InvalidInternals(#[from] TemplateError),
    #[error("context extraction for {step} gave no valid JSON after {attempts} attempts")]
    Exhausted { step: String, attempts: usize },
}

#[derive(Error, Debug)]
pub enum SkillError {
    #[error("skill {0:?} is not in the skill catalog")]
    InvalidSkill(String),
    #[error("skill {0:?} is declared more than once")]
    DuplicateSkill(String),
    #[error("skill {skill:?} depends on {prerequisite:?}, which is not available")]
    MissingPrerequisite { skill: String, prerequisite: String },
    #[error("skill dependency cycle through {0:?}")]
    DependencyCycle(String),
    #[error("document has no readable text")]
    EmptyDocument,
    #[error(transparent)]
    Core(#[from] ReviewError),
}
