//! Arbiter configuration.

use serde::{Deserialize, Serialize};

use agrosentinel_common::{Error, Result};

/// Routes, prefixes and cache generation names used by the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Generation holding the shell and other cache-first assets.
    pub static_generation: String,
    /// Generation holding network-first API reads.
    pub api_generation: String,
    /// Further generations that survive activation.
    pub retained_generations: Vec<String>,
    /// Assets pre-cached on install. Install fails if any of them fails.
    pub shell_assets: Vec<String>,
    /// Document served when a navigation cannot reach the network.
    pub shell_document: String,
    /// Client-side routes treated as navigations.
    pub navigation_routes: Vec<String>,
    /// Path prefixes served cache-first.
    pub static_prefixes: Vec<String>,
    /// Path prefix served network-first.
    pub api_prefix: String,
    /// Most API responses kept; the least recently stored go first.
    pub max_api_entries: usize,
    /// Message in the synthesized offline response.
    pub offline_message: String,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            static_generation: "agrosentinel-static-v2".to_string(),
            api_generation: "agrosentinel-api-v2".to_string(),
            retained_generations: vec!["agrosentinel-v2".to_string()],
            shell_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            shell_document: "/index.html".to_string(),
            navigation_routes: ["/", "/scan", "/drone", "/chat", "/history"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            static_prefixes: vec!["/assets/".to_string(), "/icons/".to_string()],
            api_prefix: "/api/".to_string(),
            max_api_entries: 200,
            offline_message: "You are offline".to_string(),
        }
    }
}

impl ArbiterConfig {
    /// Generations kept by `activate`.
    pub fn allow_list(&self) -> Vec<&str> {
        let mut names = vec![self.static_generation.as_str(), self.api_generation.as_str()];
        names.extend(self.retained_generations.iter().map(String::as_str));
        names
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// - Empty generation names or API prefix
    /// - A zero API entry limit
    /// - Paths not starting with `/`
    /// - Shell document missing from the shell assets
    pub fn validate(&self) -> Result<()> {
        if self.static_generation.is_empty() || self.api_generation.is_empty() {
            return Err(Error::InvalidInput(
                "Cache generation names must not be empty".to_string(),
            ));
        }
        if self.static_generation == self.api_generation {
            return Err(Error::InvalidInput(
                "Static and API generations must differ".to_string(),
            ));
        }
        if self.api_prefix.is_empty() {
            return Err(Error::InvalidInput("API prefix must not be empty".to_string()));
        }
        if self.max_api_entries == 0 {
            return Err(Error::InvalidInput(
                "API entry limit must be positive".to_string(),
            ));
        }

        let paths = self
            .shell_assets
            .iter()
            .chain(&self.navigation_routes)
            .chain(&self.static_prefixes)
            .chain(std::iter::once(&self.api_prefix))
            .chain(std::iter::once(&self.shell_document));
        for path in paths {
            if !path.starts_with('/') {
                return Err(Error::InvalidInput(format!(
                    "Path must start with '/': {}",
                    path
                )));
            }
        }

        if !self.shell_assets.contains(&self.shell_document) {
            return Err(Error::InvalidInput(format!(
                "Shell document {} is not a shell asset",
                self.shell_document
            )));
        }
        Ok(())
    }
}
