//! Deterministic entity identity
//!
//! An entity key is a pure function of (source, parent scope, external id):
//! `"<prefix>:<scope>...:<external_id>"`, e.g. `spb:123` or `msk:45-6-7:89`.
//! Re-crawling the same page, or two workers reaching the same entity
//! concurrently, always produce the same key - which is what makes every
//! upsert idempotent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::source::Source;

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    source: Source,
    scope: Vec<String>,
    external_id: String,
}

impl EntityRef {
    /// Unscoped entity (players, fhspb teams).
    pub fn new(source: Source, external_id: impl Into<String>) -> DomainResult<Self> {
        Self::scoped(source, Vec::<String>::new(), external_id)
    }

    /// Entity whose external id is only unique inside its parent (teams per
    /// tournament, tournaments per season).
    pub fn scoped<I, S>(source: Source, scope: I, external_id: impl Into<String>) -> DomainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let external_id = validate_component("external_id", external_id.into())?;
        let scope = scope
            .into_iter()
            .map(|s| validate_component("scope", s.into()))
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self { source, scope, external_id })
    }

    /// Inverse of [`EntityRef::render`].
    pub fn parse(key: &str) -> DomainResult<Self> {
        let mut parts: Vec<&str> = key.split(SEPARATOR).collect();
        if parts.len() < 2 {
            return Err(DomainError::invalid_format("entity_key", format!("'{key}' has no source prefix")));
        }
        let source = Source::from_key_prefix(parts[0])
            .ok_or_else(|| DomainError::invalid_format("entity_key", format!("unknown prefix in '{key}'")))?;
        let external_id = parts.pop().unwrap_or_default();
        Self::scoped(source, parts[1..].iter().copied(), external_id)
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut key = String::from(self.source.key_prefix());
        for part in self.scope.iter().chain(std::iter::once(&self.external_id)) {
            key.push(SEPARATOR);
            key.push_str(part);
        }
        key
    }

    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    #[must_use]
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    #[must_use]
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Child reference scoped under this entity's scope plus its own id.
    pub fn child(&self, external_id: impl Into<String>) -> DomainResult<Self> {
        let mut scope = self.scope.clone();
        scope.push(self.external_id.clone());
        Self::scoped(self.source, scope, external_id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn validate_component(field: &str, value: String) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(field, format!("{field} must not be empty")));
    }
    if trimmed.contains(SEPARATOR) {
        return Err(DomainError::validation(
            field,
            format!("{field} '{trimmed}' must not contain '{SEPARATOR}'"),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn renders_source_prefixed_keys() {
        let player = EntityRef::new(Source::Fhspb, "123").unwrap();
        assert_eq!(player.render(), "spb:123");

        let team = EntityRef::scoped(Source::Mihf, ["45-6-7"], "89").unwrap();
        assert_eq!(team.render(), "msk:45-6-7:89");
    }

    #[test]
    fn same_id_in_different_sources_never_collides() {
        let a = EntityRef::new(Source::Fhspb, "100").unwrap();
        let b = EntityRef::new(Source::Junior, "100").unwrap();
        assert_ne!(a.render(), b.render());
    }

    #[test]
    fn scope_cannot_smuggle_separator() {
        // "1:2" as a single scope would render like two scopes and collide
        assert!(EntityRef::scoped(Source::Mihf, ["1:2"], "3").is_err());
        assert!(EntityRef::new(Source::Mihf, "  ").is_err());
    }

    #[test]
    fn child_extends_scope() {
        let tournament = EntityRef::scoped(Source::Junior, ["2024"], "77").unwrap();
        let team = tournament.child("5").unwrap();
        assert_eq!(team.render(), "fhr:2024:77:5");
    }

    proptest! {
        #[test]
        fn parse_is_inverse_of_render(
            scope in proptest::collection::vec("[a-z0-9-]{1,8}", 0..4),
            id in "[A-Za-z0-9_-]{1,12}",
        ) {
            let original = EntityRef::scoped(Source::Mihf, scope, id).unwrap();
            let parsed = EntityRef::parse(&original.render()).unwrap();
            prop_assert_eq!(parsed, original);
        }
    }
}
