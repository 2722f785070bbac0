//! Template resources.
//!
//! Templates are rendered by minijinja with strict undefined handling.
//! They take no variables: all dynamic content comes from named
//! zero-argument functions, called as `{{ NodeUpSource() }}`.

use crate::error::{FunctionError, RenderError};
use indexmap::IndexMap;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, context};
use std::fmt;
use std::sync::Arc;

/// A template function
pub type TemplateFunction = Arc<dyn Fn() -> Result<String, FunctionError> + Send + Sync>;

/// Named template functions, in registration order
pub type FunctionMap = IndexMap<String, TemplateFunction>;

/// A template plus the functions it may call
pub struct TemplateResource {
    name: &'static str,
    env: Environment<'static>,
}

impl TemplateResource {
    /// Compile `source` and register `functions`
    ///
    /// # Errors
    ///
    /// Returns error if the template fails to parse
    pub fn new(
        name: &'static str,
        source: &'static str,
        functions: FunctionMap,
    ) -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);

        for (fn_name, function) in functions {
            env.add_function(fn_name, move || {
                function().map_err(|e| {
                    minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
                })
            });
        }

        env.add_template(name, source)
            .map_err(|e| RenderError::Template {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { name, env })
    }

    /// Template name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Render the template
    ///
    /// # Errors
    ///
    /// Returns error if evaluation or any called function fails
    pub fn render(&self) -> Result<String, RenderError> {
        let render_err = |e: minijinja::Error| RenderError::Render {
            name: self.name.to_string(),
            message: e.to_string(),
        };
        self.env
            .get_template(self.name)
            .map_err(render_err)?
            .render(context! {})
            .map_err(render_err)
    }
}

impl fmt::Debug for TemplateResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateResource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
