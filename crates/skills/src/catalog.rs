use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::SkillError;
use crate::prompts;

pub const SUMMARIZATION: &str = "summarization";
pub const FIGURES_TOC: &str = "figures_toc";
pub const ACTION_ITEMS: &str = "action_items";
pub const KEYPOINTS: &str = "keypoints";
pub const QUOTES: &str = "quotes";
pub const RESEARCH_ANSWERING: &str = "research_answering";

/// A named prompt. `contiguous_on` names a skill whose output is spliced
/// into this one's prompt; that skill always runs first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    pub role: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contiguous_on: Option<String>,
}

impl SkillDefinition {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            instructions: instructions.into(),
            contiguous_on: None,
        }
    }

    pub fn contiguous_on(mut self, prerequisite: impl Into<String>) -> Self {
        self.contiguous_on = Some(prerequisite.into());
        self
    }

    /// Prompt used to answer research questions against the index.
    pub fn research_answering() -> Self {
        Self::new(RESEARCH_ANSWERING, prompts::ROLE, prompts::RESEARCH_ANSWERING)
    }
}

/// Validated skill set, held in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillCatalog {
    skills: Vec<SkillDefinition>,
}

impl SkillCatalog {
    /// Orders `skills` so every prerequisite precedes its dependents. The
    /// order is otherwise the declaration order.
    pub fn new(skills: Vec<SkillDefinition>) -> Result<Self, SkillError> {
        let mut names = HashSet::new();
        for skill in &skills {
            if !names.insert(skill.name.as_str()) {
                return Err(SkillError::DuplicateSkill(skill.name.clone()));
            }
        }
        for skill in &skills {
            if let Some(prerequisite) = &skill.contiguous_on {
                if !names.contains(prerequisite.as_str()) {
                    return Err(SkillError::MissingPrerequisite {
                        skill: skill.name.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        let mut pending: Vec<SkillDefinition> = skills;
        let mut ordered: Vec<SkillDefinition> = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready = pending.iter().position(|skill| match &skill.contiguous_on {
                None => true,
                Some(prerequisite) => ordered.iter().any(|done| &done.name == prerequisite),
            });
            match ready {
                Some(idx) => ordered.push(pending.remove(idx)),
                None => return Err(SkillError::DependencyCycle(pending[0].name.clone())),
            }
        }
        Ok(Self { skills: ordered })
    }

    pub fn builtin() -> Self {
        Self {
            skills: vec![
                SkillDefinition::new(SUMMARIZATION, prompts::ROLE, prompts::SUMMARIZATION),
                SkillDefinition::new(FIGURES_TOC, prompts::ROLE, prompts::FIGURES_TOC),
                SkillDefinition::new(ACTION_ITEMS, prompts::ROLE, prompts::ACTION_ITEMS),
                SkillDefinition::new(KEYPOINTS, prompts::ROLE, prompts::KEYPOINTS),
                SkillDefinition::new(QUOTES, prompts::ROLE, prompts::QUOTES).contiguous_on(KEYPOINTS),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&SkillDefinition> {
        self.skills.iter().find(|skill| skill.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.skills.iter().map(|skill| skill.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The requested skills in execution order. Unknown names and dependents
    /// requested without their prerequisite are rejected.
    pub fn plan<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<&SkillDefinition>, SkillError> {
        let mut wanted = HashSet::new();
        for name in requested {
            let name = name.as_ref();
            if self.get(name).is_none() {
                return Err(SkillError::InvalidSkill(name.to_string()));
            }
            wanted.insert(name);
        }
        let plan: Vec<&SkillDefinition> = self
            .skills
            .iter()
            .filter(|skill| wanted.contains(skill.name.as_str()))
            .collect();
        for skill in &plan {
            if let Some(prerequisite) = &skill.contiguous_on {
                if !wanted.contains(prerequisite.as_str()) {
                    return Err(SkillError::MissingPrerequisite {
                        skill: skill.name.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }
        Ok(plan)
    }
}

impl Default for SkillCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
