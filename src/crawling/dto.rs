//! Parser output
//!
//! What a source parser hands back to its orchestrator. External ids are the
//! source's own identifiers, not yet rendered into entity keys; the
//! orchestrator owns identity.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::crawling::pagination::PostbackState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonDto {
    pub external_id: String,
    pub name: String,
    pub url: String,
}

/// mihf competition group (age class or league)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDto {
    pub external_id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentDto {
    pub external_id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub birth_year: Option<i32>,
    #[serde(default)]
    pub group_name: Option<String>,
    /// Paginated match list
    #[serde(default)]
    pub schedule_url: Option<String>,
    /// Paginated player statistics
    #[serde(default)]
    pub stats_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDto {
    pub external_id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// One roster row on a team page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntryDto {
    pub player_external_id: String,
    pub full_name: String,
    /// Profile page, when the roster links one
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub jersey_number: Option<i32>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub birth_year: Option<i32>,
}

/// Player profile page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDto {
    pub external_id: String,
    pub full_name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub birth_year: Option<i32>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub handedness: Option<String>,
    #[serde(default)]
    pub height_cm: Option<i32>,
    #[serde(default)]
    pub weight_kg: Option<i32>,
    #[serde(default)]
    pub citizenship: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDto {
    pub external_id: String,
    #[serde(default)]
    pub home_team_external_id: Option<String>,
    #[serde(default)]
    pub away_team_external_id: Option<String>,
    #[serde(default)]
    pub home_score: Option<i32>,
    #[serde(default)]
    pub away_score: Option<i32>,
    #[serde(default)]
    pub played_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatDto {
    pub player_external_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub team_external_id: Option<String>,
    #[serde(default)]
    pub games: Option<i32>,
    #[serde(default)]
    pub goals: Option<i32>,
    #[serde(default)]
    pub assists: Option<i32>,
    #[serde(default)]
    pub points: Option<i32>,
    #[serde(default)]
    pub penalty_minutes: Option<i32>,
    #[serde(default)]
    pub plus_minus: Option<i32>,
}

/// One page of a paginated table plus the state needed to ask for the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub postback: Option<PostbackState>,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn single(items: Vec<T>) -> Self {
        Self { items, postback: None }
    }
}
