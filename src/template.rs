use std::sync::Arc;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("template render error: {0}")]
    Render(String),
}

/// Compiles and renders payload templates.
pub trait TemplateEngine: Send + Sync {
    /// Checks that the template parses.
    fn compile(&self, template: &str) -> Result<(), TemplateError>;

    fn render(&self, template: &str, bindings: &Value) -> Result<String, TemplateError>;
}

/// Handlebars with HTML escaping turned off, so quotes and ampersands in
/// bound values reach the payload untouched. Missing variables render empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlebarsEngine;

const TEMPLATE_NAME: &str = "config";

impl TemplateEngine for HandlebarsEngine {
    fn compile(&self, template: &str) -> Result<(), TemplateError> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .map_err(|error| TemplateError::Syntax(error.to_string()))
    }

    fn render(&self, template: &str, bindings: &Value) -> Result<String, TemplateError> {
        let compiled = handlebars::Template::compile(template)
            .map_err(|error| TemplateError::Syntax(error.to_string()))?;

        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        hb.register_template(TEMPLATE_NAME, compiled);

        hb.render(TEMPLATE_NAME, bindings)
            .map_err(|error| TemplateError::Render(error.to_string()))
    }
}

/// Outcome of checking one proposed template. `renders_to_json` can only be
/// true when `syntax_valid` is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCheck {
    pub syntax_valid: bool,
    pub renders_to_json: bool,
    pub rendered: Option<String>,
}

#[derive(Clone)]
pub struct TemplateValidator {
    engine: Arc<dyn TemplateEngine>,
}

impl std::fmt::Debug for TemplateValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateValidator").finish_non_exhaustive()
    }
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateValidator {
    pub fn new() -> Self {
        Self::with_engine(Arc::new(HandlebarsEngine))
    }

    pub fn with_engine(engine: Arc<dyn TemplateEngine>) -> Self {
        Self { engine }
    }

    pub fn validate(&self, template: &str, bindings: &Value) -> TemplateCheck {
        if let Err(error) = self.engine.compile(template) {
            tracing::debug!(%error, "template failed to compile");
            return TemplateCheck::default();
        }

        let rendered = match self.engine.render(template, bindings) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::debug!(%error, "template failed to render");
                return TemplateCheck::default();
            }
        };

        let renders_to_json = serde_json::from_str::<Value>(&rendered).is_ok();

        TemplateCheck {
            syntax_valid: true,
            renders_to_json,
            rendered: Some(rendered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unterminated_tag_is_a_syntax_error() {
        let check = TemplateValidator::new().validate("{{ invalid", &json!({}));
        assert_eq!(check, TemplateCheck::default());
    }

    #[test]
    fn valid_template_with_non_json_output() {
        let check = TemplateValidator::new().validate("{{ x }}", &json!({ "x": "not json" }));
        assert!(check.syntax_valid);
        assert!(!check.renders_to_json);
        assert_eq!(check.rendered.as_deref(), Some("not json"));
    }

    #[test]
    fn valid_template_rendering_json() {
        let check =
            TemplateValidator::new().validate(r#"{ "k": "{{ x }}" }"#, &json!({ "x": "v" }));
        assert_eq!(
            check,
            TemplateCheck {
                syntax_valid: true,
                renders_to_json: true,
                rendered: Some(r#"{ "k": "v" }"#.to_string()),
            }
        );
    }

    #[test]
    fn dotted_paths_and_missing_values() {
        let bindings = json!({ "lead": { "email": "a&b@example.com" } });
        let check = TemplateValidator::new().validate(
            r#"{ "email": "{{ lead.email }}", "phone": "{{ lead.phone }}" }"#,
            &bindings,
        );
        assert_eq!(
            check.rendered.as_deref(),
            Some(r#"{ "email": "a&b@example.com", "phone": "" }"#)
        );
        assert!(check.renders_to_json);
    }

    struct FailingRender;

    impl TemplateEngine for FailingRender {
        fn compile(&self, _template: &str) -> Result<(), TemplateError> {
            Ok(())
        }

        fn render(&self, _template: &str, _bindings: &Value) -> Result<String, TemplateError> {
            Err(TemplateError::Render("boom".into()))
        }
    }

    #[test]
    fn render_failure_is_reported_as_invalid() {
        let check = TemplateValidator::with_engine(Arc::new(FailingRender)).validate("{}", &json!({}));
        assert_eq!(check, TemplateCheck::default());
    }
}
