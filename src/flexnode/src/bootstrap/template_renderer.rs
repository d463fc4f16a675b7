/// Template renderer using Tera for Jinja2-style node configuration files
use super::embedded_templates;
use crate::provisioner::ProvisionError;
use tera::{Context, Tera};

pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    /// Build from the templates compiled into the binary.
    pub fn from_embedded() -> Result<Self, ProvisionError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(embedded_templates::ALL_TEMPLATES.iter().copied())
            .map_err(|e| {
                ProvisionError::Template(format!("Failed to load embedded templates: {}", e))
            })?;

        tracing::debug!(
            "[TemplateRenderer] Loaded {} embedded templates",
            embedded_templates::ALL_TEMPLATES.len()
        );
        Ok(Self { tera })
    }

    pub fn render(&self, template_name: &str, context: &Context) -> Result<String, ProvisionError> {
        let rendered = self.tera.render(template_name, context).map_err(|e| {
            ProvisionError::Template(format!("{template_name}: {e}"))
        })?;

        tracing::debug!(
            "[TemplateRenderer] {} -> {} bytes",
            template_name,
            rendered.len()
        );
        Ok(rendered)
    }

    /// Embedded template names, sorted.
    pub fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tera.get_template_names().map(String::from).collect();
        names.sort();
        names
    }
}
