use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::PERSONA;
use crate::skill::{ConfigField, Skill, SkillExecutionContext, SkillManifest, SkillOutput};

/// Static description of the account owner the agent speaks for.
#[derive(Debug, Clone, Default)]
pub struct Persona {
    pub name: String,
    /// SOUL.md - personality and values
    pub soul_md: String,
    /// STYLE.md - default writing style
    pub style_md: String,
    /// BOUNDARIES.md - topics and commitments to avoid
    pub boundaries_md: String,
}

impl Persona {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Soul -> Style -> Boundaries, skipping empty parts.
    pub fn assembled_prompt(&self, include_boundaries: bool) -> String {
        let mut parts = vec![format!("You are replying as {}.", self.name)];

        if !self.soul_md.is_empty() {
            parts.push(format!("## Soul\n{}", self.soul_md.trim()));
        }

        if !self.style_md.is_empty() {
            parts.push(format!("## Style\n{}", self.style_md.trim()));
        }

        if include_boundaries && !self.boundaries_md.is_empty() {
            parts.push(format!("## Boundaries\n{}", self.boundaries_md.trim()));
        }

        parts.join("\n\n")
    }
}

/// Load persona files from `{prompts_dir}/SOUL.md`, `STYLE.md` and `BOUNDARIES.md`.
/// Missing files are treated as empty.
pub fn load_persona(prompts_dir: &Path, name: &str) -> Result<Persona> {
    let soul_md = read_optional_md(&prompts_dir.join("SOUL.md"))
        .with_context(|| format!("loading persona from {}", prompts_dir.display()))?
        .unwrap_or_default();
    let style_md = read_optional_md(&prompts_dir.join("STYLE.md"))?.unwrap_or_default();
    let boundaries_md = read_optional_md(&prompts_dir.join("BOUNDARIES.md"))?.unwrap_or_default();

    Ok(Persona {
        name: name.to_string(),
        soul_md,
        style_md,
        boundaries_md,
    })
}

fn read_optional_md(path: &Path) -> Result<Option<String>> {
    if path.exists() {
        Ok(Some(std::fs::read_to_string(path)?))
    } else {
        Ok(None)
    }
}

pub struct PersonaSkill {
    manifest: SkillManifest,
    persona: Persona,
}

impl PersonaSkill {
    pub fn new(persona: Persona) -> Self {
        Self {
            manifest: SkillManifest {
                id: PERSONA.to_string(),
                name: "Persona".to_string(),
                version: "1.0.0".to_string(),
                description: "Owner persona and default voice".to_string(),
                config_fields: vec![
                    ConfigField::select(
                        "tone",
                        "Tone override",
                        &["default", "casual", "formal", "playful"],
                        "default",
                    ),
                    ConfigField::boolean("includeBoundaries", "Include boundaries", true),
                ],
                permissions: vec![],
            },
            persona,
        }
    }
}

#[async_trait]
impl Skill for PersonaSkill {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    async fn execute(&self, ctx: &SkillExecutionContext) -> Result<SkillOutput> {
        let include_boundaries = ctx.config_bool("includeBoundaries").unwrap_or(true);
        let mut text = format!(
            "## Persona\n{}",
            self.persona.assembled_prompt(include_boundaries)
        );
        match ctx.config_str("tone") {
            Some(tone) if tone != "default" => {
                text.push_str(&format!("\n\nKeep the tone {tone}."));
            }
            _ => {}
        }
        if ctx.relationship_type != "unknown" {
            text.push_str(&format!(
                "\n\nThe sender is your {}.",
                ctx.relationship_type
            ));
        }
        Ok(SkillOutput::context(text, 1))
    }
}
