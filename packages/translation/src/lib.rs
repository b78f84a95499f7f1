#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Active locale state for an application.
//!
//! [`Translation`] holds the locale that translated table joins resolve against, and
//! picks it per request from the `Accept-Language` header or an explicit parameter.

use std::sync::{PoisonError, RwLock};

use rowkit_config::TranslationConfig;

pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug)]
pub struct Translation {
    locale: RwLock<String>,
    all_locales: Vec<String>,
}

impl Default for Translation {
    fn default() -> Self {
        Self::new(DEFAULT_LOCALE, Vec::<String>::new())
    }
}

impl Translation {
    /// When `all_locales` is empty, the default locale is the only supported one.
    #[must_use]
    pub fn new<S: Into<String>>(
        default_locale: impl Into<String>,
        all_locales: impl IntoIterator<Item = S>,
    ) -> Self {
        let default_locale = default_locale.into();
        let mut all_locales = all_locales
            .into_iter()
            .map(|x| x.into().trim().to_string())
            .filter(|x| !x.is_empty())
            .collect::<Vec<_>>();

        if all_locales.is_empty() {
            all_locales.push(default_locale.clone());
        }

        Self {
            locale: RwLock::new(default_locale),
            all_locales,
        }
    }

    #[must_use]
    pub fn from_config(config: Option<&TranslationConfig>) -> Self {
        let default_locale = config
            .and_then(|x| x.default.as_deref())
            .unwrap_or(DEFAULT_LOCALE);

        Self::new(
            default_locale,
            config.map(|x| x.all.clone()).unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn locale(&self) -> String {
        self.locale
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_locale(&self, locale: impl Into<String>) {
        let locale = locale.into();
        log::debug!("set_locale: {locale}");
        *self.locale.write().unwrap_or_else(PoisonError::into_inner) = locale;
    }

    #[must_use]
    pub fn all_locales(&self) -> &[String] {
        &self.all_locales
    }

    #[must_use]
    pub fn has_multi_locales(&self) -> bool {
        self.all_locales.len() > 1
    }

    #[must_use]
    pub fn supports(&self, locale: &str) -> bool {
        self.all_locales.iter().any(|x| x == locale)
    }

    /// Picks the active locale for a request and returns it.
    ///
    /// The neutral (two letter) part of `accept_language` is applied first, then the
    /// explicitly `requested` locale. Either is ignored unless it is supported. Nothing
    /// changes when only one locale is configured.
    pub fn resolve_locale(&self, accept_language: Option<&str>, requested: Option<&str>) -> String {
        if !self.has_multi_locales() {
            return self.locale();
        }

        if let Some(accept_language) = accept_language
            && let Some(neutral) = accept_language.trim().get(..2)
        {
            let neutral = neutral.to_ascii_lowercase();
            if self.supports(&neutral) {
                self.set_locale(neutral);
            }
        }

        if let Some(requested) = requested
            && self.supports(requested)
        {
            self.set_locale(requested);
        }

        self.locale()
    }
}

#[cfg(feature = "database")]
impl rowkit_database::LocaleProvider for Translation {
    fn current_locale(&self) -> String {
        self.locale()
    }
}
