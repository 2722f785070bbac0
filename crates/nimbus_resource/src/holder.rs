//! Lazily-materialized resources.

use crate::error::RenderError;
use crate::template::TemplateResource;
use nimbus_core::Hash;
use once_cell::sync::OnceCell;
use std::fmt;

type Generator = Box<dyn Fn() -> Result<Vec<u8>, RenderError> + Send + Sync>;

/// A named artifact whose content is generated on first read
///
/// The generator runs at most once; its result, success or failure, is
/// cached for the lifetime of the holder. Holders are shared behind an
/// `Arc` by the tasks that reference them.
pub struct ResourceHolder {
    name: String,
    generator: Generator,
    cache: OnceCell<Result<Vec<u8>, RenderError>>,
}

impl ResourceHolder {
    /// Create a holder around a generator
    #[must_use]
    pub fn new<F>(name: impl Into<String>, generator: F) -> Self
    where
        F: Fn() -> Result<Vec<u8>, RenderError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            generator: Box::new(generator),
            cache: OnceCell::new(),
        }
    }

    /// Create a holder with content known up front
    #[must_use]
    pub fn from_static(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let cache = OnceCell::with_value(Ok(content.into()));
        let missing = name.clone();
        Self {
            name,
            generator: Box::new(move || {
                Err(RenderError::Generate {
                    name: missing.clone(),
                    reason: "static resource has no generator".to_string(),
                })
            }),
            cache,
        }
    }

    /// Create a holder that renders `template` on first read
    #[must_use]
    pub fn from_template(name: impl Into<String>, template: TemplateResource) -> Self {
        Self::new(name, move || template.render().map(String::into_bytes))
    }

    /// Create a holder that always fails with `error`
    #[must_use]
    pub fn failed(name: impl Into<String>, error: RenderError) -> Self {
        let name = name.into();
        Self {
            name,
            generator: Box::new(move || Err(error.clone())),
            cache: OnceCell::new(),
        }
    }

    /// Resource name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the content has been generated
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Get the content, generating it on first call
    ///
    /// # Errors
    ///
    /// Returns the generator's error, which is cached like content
    pub fn content(&self) -> Result<&[u8], RenderError> {
        let cached = self.cache.get_or_init(|| {
            let result = (self.generator)();
            match &result {
                Ok(bytes) => tracing::debug!(
                    resource = %self.name,
                    size = bytes.len(),
                    hash = %Hash::compute(bytes).short(),
                    "materialized resource"
                ),
                Err(e) => tracing::debug!(resource = %self.name, error = %e, "resource generation failed"),
            }
            result
        });
        match cached {
            Ok(bytes) => Ok(bytes.as_slice()),
            Err(e) => Err(e.clone()),
        }
    }

    /// Get the content as text
    ///
    /// # Errors
    ///
    /// Returns error if generation fails or the content is not UTF-8
    pub fn as_str(&self) -> Result<&str, RenderError> {
        std::str::from_utf8(self.content()?).map_err(|_| RenderError::Encoding {
            name: self.name.clone(),
        })
    }

    /// Content hash, generating the content if needed
    ///
    /// # Errors
    ///
    /// Returns error if generation fails
    pub fn hash(&self) -> Result<Hash, RenderError> {
        self.content().map(Hash::compute)
    }
}

impl fmt::Debug for ResourceHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHolder")
            .field("name", &self.name)
            .field("materialized", &self.is_materialized())
            .finish_non_exhaustive()
    }
}
