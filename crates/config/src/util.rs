// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::Figment;
use serde::de::DeserializeOwned;

/// A part of the configuration file, which can be loaded and validated on its
/// own
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Where this section lives relative to the root, if not at the root
    const PATH: Option<&'static str> = None;

    /// Validate the configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(
        &self,
        _figment: &Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(())
    }

    /// Extract and validate the section from a [`Figment`]
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration could not be loaded, or is
    /// invalid
    fn extract(
        figment: &Figment,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let this: Self = match Self::PATH {
            Some(path) => figment.extract_inner(path)?,
            None => figment.extract()?,
        };

        this.validate(figment)?;
        Ok(this)
    }
}

/// Extension trait for [`ConfigurationSection`] which falls back to the
/// default value when the section is absent
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Extract the section from the given [`Figment`], or return the default
    /// value if the section is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration section is invalid.
    fn extract_or_default(
        figment: &Figment,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        if let Some(path) = Self::PATH {
            if !figment.contains(path) {
                return Ok(Self::default());
            }
        }

        Self::extract(figment)
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}

/// Build a validation error pointing at a field of a section, so that figment
/// reports where the faulty value came from
pub(crate) fn field_error<S: ConfigurationSection>(
    figment: &Figment,
    field: &'static str,
    message: impl Into<String>,
) -> figment::Error {
    let mut error = figment::Error::from(message.into());
    let mut path = Vec::new();
    if let Some(section) = S::PATH {
        error.metadata = figment.find_metadata(section).cloned();
        path.push(section.to_owned());
    }
    path.push(field.to_owned());
    error.profile = Some(figment::Profile::Default);
    error.path = path;
    error
}
