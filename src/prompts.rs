use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Templates every handler depends on. A missing file is a startup failure.
const REQUIRED_TEMPLATES: &[&str] = &[
    "persona_prompt",
    "normal_monologue",
    "themed_monologue",
    "integrated_response",
    "initial_greeting",
    "ending_greeting",
    "daily_summary",
];

/// Prompt templates loaded once at startup. `{variable}` placeholders are
/// substituted at render time; unknown placeholders are left as-is.
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl PromptLibrary {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut templates = HashMap::new();
        for name in REQUIRED_TEMPLATES {
            let path = dir.join(format!("{name}.txt"));
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("read required prompt template: {}", path.display()))?;
            templates.insert(name.to_string(), content);
        }
        Ok(Self { templates })
    }

    #[cfg(test)]
    pub fn from_templates(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn persona(&self) -> &str {
        // Guaranteed present: load() fails without it.
        self.templates
            .get("persona_prompt")
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Result<String> {
        let template = self
            .templates
            .get(name)
            .with_context(|| format!("unknown prompt template: {name}"))?;
        let mut rendered = template.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_variables() {
        let mut templates = HashMap::new();
        templates.insert(
            "greeting".to_string(),
            "こんにちは、{name}。モードは{current_mode}。".to_string(),
        );
        let lib = PromptLibrary::from_templates(templates);

        let mut vars = HashMap::new();
        vars.insert("name", "みなさん".to_string());
        vars.insert("current_mode", "normal_monologue".to_string());
        let rendered = lib.render("greeting", &vars).unwrap();
        assert_eq!(rendered, "こんにちは、みなさん。モードはnormal_monologue。");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let lib = PromptLibrary::from_templates(HashMap::new());
        assert!(lib.render("missing", &HashMap::new()).is_err());
    }

    #[test]
    fn load_fails_fast_on_missing_file() {
        let dir = std::env::temp_dir().join("aituber-prompts-missing");
        let _ = std::fs::create_dir_all(&dir);
        assert!(PromptLibrary::load(&dir).is_err());
    }
}
