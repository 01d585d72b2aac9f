use std::{
    fs,
    path::{Path, PathBuf},
};

use handlebars::Handlebars;
use serde_json::{json, Value};

pub const SYSTEM_PROMPT: &str = "system_prompt";
pub const USER_REQUEST: &str = "user_request";

/// File extension of prompt templates in a prompts directory.
pub const PROMPT_EXTENSION: &str = "hbs";

const BUILTIN_SYSTEM_PROMPT: &str = include_str!("../prompts/system_prompt.hbs");
const BUILTIN_USER_REQUEST: &str = include_str!("../prompts/user_request.hbs");

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("failed to read prompt template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("template render error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// System and user prompt templates. Files in a prompts directory override the
/// built-in templates of the same name.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    registry: Handlebars<'static>,
}

impl PromptLibrary {
    pub fn builtin() -> Result<Self, PromptError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_template_string(SYSTEM_PROMPT, BUILTIN_SYSTEM_PROMPT)?;
        registry.register_template_string(USER_REQUEST, BUILTIN_USER_REQUEST)?;

        Ok(Self { registry })
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self, PromptError> {
        let mut library = Self::builtin()?;

        for path in prompt_files(dir.as_ref()).map_err(|source| PromptError::Io {
            path: dir.as_ref().to_path_buf(),
            source,
        })? {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path).map_err(|source| PromptError::Io {
                path: path.clone(),
                source,
            })?;
            library.registry.register_template_string(name, source)?;
            tracing::debug!(template = name, path = %path.display(), "loaded prompt template");
        }

        Ok(library)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    pub fn render_system(&self, variables: &Value, actions: &str) -> Result<String, PromptError> {
        let data = json!({
            "actions": actions,
            "variables": variables,
            "variables_json": serde_json::to_string_pretty(variables)?,
            "has_variables": has_entries(variables),
        });

        Ok(self.registry.render(SYSTEM_PROMPT, &data)?)
    }

    pub fn render_user(&self, request: &str, variables: &Value) -> Result<String, PromptError> {
        let names = variables
            .as_object()
            .map(|map| map.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let data = json!({
            "request": request,
            "variables": variables,
            "variable_names": names,
            "has_variables": has_entries(variables),
        });

        Ok(self.registry.render(USER_REQUEST, &data)?.trim_end().to_string())
    }
}

fn has_entries(variables: &Value) -> bool {
    variables.as_object().map_or(false, |map| !map.is_empty())
}

/// Prompt template files of a directory, sorted by file name. A missing
/// directory has no templates.
pub fn prompt_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(PROMPT_EXTENSION)
        {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}
