//! Durable hockey entities
//!
//! Lifecycle: created on first sight, updated forever, never deleted by the
//! crawler. Updates follow one rule for every field: an incoming value
//! replaces the stored one only when it is non-empty, so a thin re-scrape
//! never erases what a richer scrape already supplied.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::entity_ref::EntityRef;

/// Field-wise "non-empty incoming wins" merge.
///
/// The SQL repositories implement the same rule with
/// `COALESCE(NULLIF(excluded.col, ''), table.col)`.
pub trait Mergeable {
    fn merge_from(&mut self, incoming: Self);
}

/// Treats blank strings as absent.
#[must_use]
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn merge_opt<T>(current: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *current = incoming;
    }
}

fn merge_text(current: &mut Option<String>, incoming: Option<String>) {
    merge_opt(current, non_empty(incoming));
}

fn merge_name(current: &mut String, incoming: String) {
    let trimmed = incoming.trim();
    if !trimmed.is_empty() {
        *current = trimmed.to_string();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub key: EntityRef,
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub birth_year: Option<i32>,
    pub position: Option<String>,
    pub handedness: Option<String>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<i32>,
    pub citizenship: Option<String>,
    pub photo_url: Option<String>,
    pub profile_url: Option<String>,
}

impl Player {
    #[must_use]
    pub fn new(key: EntityRef, full_name: impl Into<String>) -> Self {
        Self {
            key,
            full_name: full_name.into().trim().to_string(),
            birth_date: None,
            birth_year: None,
            position: None,
            handedness: None,
            height_cm: None,
            weight_kg: None,
            citizenship: None,
            photo_url: None,
            profile_url: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> String {
        self.key.render()
    }

    /// Birth year from the explicit field, falling back to the birth date.
    #[must_use]
    pub fn effective_birth_year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.birth_year.or_else(|| self.birth_date.map(|d| d.year()))
    }
}

impl Mergeable for Player {
    fn merge_from(&mut self, incoming: Self) {
        merge_name(&mut self.full_name, incoming.full_name);
        merge_opt(&mut self.birth_date, incoming.birth_date);
        merge_opt(&mut self.birth_year, incoming.birth_year);
        merge_text(&mut self.position, incoming.position);
        merge_text(&mut self.handedness, incoming.handedness);
        merge_opt(&mut self.height_cm, incoming.height_cm);
        merge_opt(&mut self.weight_kg, incoming.weight_kg);
        merge_text(&mut self.citizenship, incoming.citizenship);
        merge_text(&mut self.photo_url, incoming.photo_url);
        merge_text(&mut self.profile_url, incoming.profile_url);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub key: EntityRef,
    pub tournament_id: Option<String>,
    pub name: String,
    pub city: Option<String>,
    pub logo_url: Option<String>,
    pub url: Option<String>,
}

impl Team {
    #[must_use]
    pub fn new(key: EntityRef, name: impl Into<String>) -> Self {
        Self {
            key,
            tournament_id: None,
            name: name.into().trim().to_string(),
            city: None,
            logo_url: None,
            url: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> String {
        self.key.render()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub key: EntityRef,
    /// Set for sub-tournaments (mihf stages, junior conferences)
    pub parent_id: Option<String>,
    pub season: Option<String>,
    pub name: String,
    pub group_name: Option<String>,
    pub birth_year: Option<i32>,
    pub url: Option<String>,
}

impl Tournament {
    #[must_use]
    pub fn new(key: EntityRef, name: impl Into<String>) -> Self {
        Self {
            key,
            parent_id: None,
            season: None,
            name: name.into().trim().to_string(),
            group_name: None,
            birth_year: None,
            url: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> String {
        self.key.render()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub key: EntityRef,
    pub tournament_id: String,
    pub home_team_id: Option<String>,
    pub away_team_id: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub played_at: Option<NaiveDateTime>,
    pub venue: Option<String>,
    pub url: Option<String>,
}

impl Match {
    #[must_use]
    pub fn id(&self) -> String {
        self.key.render()
    }
}

/// Player-on-team membership, keyed by (player_id, team_id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: String,
    pub team_id: String,
    pub jersey_number: Option<i32>,
    pub position: Option<String>,
}

/// Per-tournament counters, keyed by (player_id, tournament_id, team_id)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatistic {
    pub player_id: String,
    pub tournament_id: String,
    pub team_id: String,
    pub games: Option<i32>,
    pub goals: Option<i32>,
    pub assists: Option<i32>,
    pub points: Option<i32>,
    pub penalty_minutes: Option<i32>,
    pub plus_minus: Option<i32>,
}
