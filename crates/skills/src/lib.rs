pub mod catalog;
pub mod error;
pub mod executor;
pub mod prompts;
pub mod template;

pub use catalog::{SkillCatalog, SkillDefinition};
pub use error::{ContextError, SkillError, TemplateError};
pub use executor::{
    ChainSettings, FailureKind, RefusalPolicy, SkillChain, SkillOutcome, DEFAULT_TOKEN_THRESHOLD,
};
pub use template::{contiguous_on, populate, substitute, AgentInternals, ContextField, Placeholder};
