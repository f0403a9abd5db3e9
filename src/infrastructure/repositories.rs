//! SQLite repository implementations
//!
//! Every upsert merges on the server side: text columns use
//! `COALESCE(NULLIF(excluded.col, ''), table.col)`, numeric ones
//! `COALESCE(excluded.col, table.col)`. No application-level locking and no
//! transaction spans more than one row.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;

use crate::domain::{
    DomainError, DomainResult, EntityRef, Match, Player, PlayerStatistic, Repositories, RosterEntry, Source, Team,
    Tournament,
    repositories::{MatchRepository, PlayerRepository, StatisticsRepository, TeamRepository, TournamentRepository},
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Blank text binds as NULL so it can never win the merge
fn text(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(raw: Option<String>) -> DomainResult<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| DomainError::invalid_format("birth_date", e.to_string()))
    })
    .transpose()
}

fn parse_datetime(raw: Option<String>) -> DomainResult<Option<NaiveDateTime>> {
    raw.map(|s| {
        NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
            .map_err(|e| DomainError::invalid_format("played_at", e.to_string()))
    })
    .transpose()
}

async fn count_rows(pool: &SqlitePool, table: &'static str) -> DomainResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?)
}

async fn id_exists(pool: &SqlitePool, table: &'static str, id: &str) -> DomainResult<bool> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)");
    Ok(sqlx::query_scalar::<_, bool>(&sql).bind(id).fetch_one(pool).await?)
}

impl Repositories {
    /// All repositories over one pool
    #[must_use]
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            players: Arc::new(SqlitePlayerRepository::new(pool.clone())),
            teams: Arc::new(SqliteTeamRepository::new(pool.clone())),
            tournaments: Arc::new(SqliteTournamentRepository::new(pool.clone())),
            matches: Arc::new(SqliteMatchRepository::new(pool.clone())),
            statistics: Arc::new(SqliteStatisticsRepository::new(pool)),
        }
    }
}

// ============================================================================
// Players
// ============================================================================

pub struct SqlitePlayerRepository {
    pool: SqlitePool,
}

impl SqlitePlayerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_player(row: &SqliteRow) -> DomainResult<Player> {
        let id: String = row.try_get("id")?;
        let mut player = Player::new(EntityRef::parse(&id)?, row.try_get::<String, _>("full_name")?);
        player.birth_date = parse_date(row.try_get("birth_date")?)?;
        player.birth_year = row.try_get("birth_year")?;
        player.position = row.try_get("position")?;
        player.handedness = row.try_get("handedness")?;
        player.height_cm = row.try_get("height_cm")?;
        player.weight_kg = row.try_get("weight_kg")?;
        player.citizenship = row.try_get("citizenship")?;
        player.photo_url = row.try_get("photo_url")?;
        player.profile_url = row.try_get("profile_url")?;
        Ok(player)
    }
}

#[async_trait]
impl PlayerRepository for SqlitePlayerRepository {
    async fn upsert(&self, player: &Player) -> DomainResult<String> {
        let id = player.id();
        sqlx::query(
            r#"
            INSERT INTO players (
                id, source, external_id, full_name, birth_date, birth_year, position, handedness,
                height_cm, weight_kg, citizenship, photo_url, profile_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT(id) DO UPDATE SET
                full_name = COALESCE(NULLIF(excluded.full_name, ''), players.full_name),
                birth_date = COALESCE(excluded.birth_date, players.birth_date),
                birth_year = COALESCE(excluded.birth_year, players.birth_year),
                position = COALESCE(NULLIF(excluded.position, ''), players.position),
                handedness = COALESCE(NULLIF(excluded.handedness, ''), players.handedness),
                height_cm = COALESCE(excluded.height_cm, players.height_cm),
                weight_kg = COALESCE(excluded.weight_kg, players.weight_kg),
                citizenship = COALESCE(NULLIF(excluded.citizenship, ''), players.citizenship),
                photo_url = COALESCE(NULLIF(excluded.photo_url, ''), players.photo_url),
                profile_url = COALESCE(NULLIF(excluded.profile_url, ''), players.profile_url),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&id)
        .bind(player.key.source().as_str())
        .bind(player.key.external_id())
        .bind(player.full_name.trim())
        .bind(player.birth_date.map(|d| d.format(DATE_FORMAT).to_string()))
        .bind(player.birth_year)
        .bind(text(&player.position))
        .bind(text(&player.handedness))
        .bind(player.height_cm)
        .bind(player.weight_kg)
        .bind(text(&player.citizenship))
        .bind(text(&player.photo_url))
        .bind(text(&player.profile_url))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_by_external_id(&self, source: Source, external_id: &str) -> DomainResult<Option<Player>> {
        let id = EntityRef::new(source, external_id)?.render();
        let row = sqlx::query("SELECT * FROM players WHERE id = $1")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_player).transpose()
    }

    async fn exists(&self, source: Source, external_id: &str) -> DomainResult<bool> {
        let id = EntityRef::new(source, external_id)?.render();
        id_exists(&self.pool, "players", &id).await
    }

    async fn count(&self) -> DomainResult<i64> {
        count_rows(&self.pool, "players").await
    }
}

// ============================================================================
// Teams and roster memberships
// ============================================================================

pub struct SqliteTeamRepository {
    pool: SqlitePool,
}

impl SqliteTeamRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_team(row: &SqliteRow) -> DomainResult<Team> {
        let id: String = row.try_get("id")?;
        let mut team = Team::new(EntityRef::parse(&id)?, row.try_get::<String, _>("name")?);
        team.tournament_id = row.try_get("tournament_id")?;
        team.city = row.try_get("city")?;
        team.logo_url = row.try_get("logo_url")?;
        team.url = row.try_get("url")?;
        Ok(team)
    }
}

#[async_trait]
impl TeamRepository for SqliteTeamRepository {
    async fn upsert(&self, team: &Team) -> DomainResult<String> {
        let id = team.id();
        sqlx::query(
            r#"
            INSERT INTO teams (id, source, external_id, tournament_id, name, city, logo_url, url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(id) DO UPDATE SET
                tournament_id = COALESCE(NULLIF(excluded.tournament_id, ''), teams.tournament_id),
                name = COALESCE(NULLIF(excluded.name, ''), teams.name),
                city = COALESCE(NULLIF(excluded.city, ''), teams.city),
                logo_url = COALESCE(NULLIF(excluded.logo_url, ''), teams.logo_url),
                url = COALESCE(NULLIF(excluded.url, ''), teams.url),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&id)
        .bind(team.key.source().as_str())
        .bind(team.key.external_id())
        .bind(text(&team.tournament_id))
        .bind(team.name.trim())
        .bind(text(&team.city))
        .bind(text(&team.logo_url))
        .bind(text(&team.url))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_by_external_id(
        &self,
        source: Source,
        external_id: &str,
        scope: &[String],
    ) -> DomainResult<Option<Team>> {
        let id = EntityRef::scoped(source, scope, external_id)?.render();
        let row = sqlx::query("SELECT * FROM teams WHERE id = $1")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_team).transpose()
    }

    async fn exists(&self, source: Source, external_id: &str, scope: &[String]) -> DomainResult<bool> {
        let id = EntityRef::scoped(source, scope, external_id)?.render();
        id_exists(&self.pool, "teams", &id).await
    }

    async fn upsert_roster_entry(&self, entry: &RosterEntry) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roster_entries (player_id, team_id, jersey_number, position)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(player_id, team_id) DO UPDATE SET
                jersey_number = COALESCE(excluded.jersey_number, roster_entries.jersey_number),
                position = COALESCE(NULLIF(excluded.position, ''), roster_entries.position),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&entry.player_id)
        .bind(&entry.team_id)
        .bind(entry.jersey_number)
        .bind(text(&entry.position))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> DomainResult<i64> {
        count_rows(&self.pool, "teams").await
    }
}

// ============================================================================
// Tournaments
// ============================================================================

pub struct SqliteTournamentRepository {
    pool: SqlitePool,
}

impl SqliteTournamentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_tournament(row: &SqliteRow) -> DomainResult<Tournament> {
        let id: String = row.try_get("id")?;
        let mut tournament = Tournament::new(EntityRef::parse(&id)?, row.try_get::<String, _>("name")?);
        tournament.parent_id = row.try_get("parent_id")?;
        tournament.season = row.try_get("season")?;
        tournament.group_name = row.try_get("group_name")?;
        tournament.birth_year = row.try_get("birth_year")?;
        tournament.url = row.try_get("url")?;
        Ok(tournament)
    }
}

#[async_trait]
impl TournamentRepository for SqliteTournamentRepository {
    async fn upsert(&self, tournament: &Tournament) -> DomainResult<String> {
        let id = tournament.id();
        sqlx::query(
            r#"
            INSERT INTO tournaments (id, source, external_id, parent_id, season, name, group_name, birth_year, url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT(id) DO UPDATE SET
                parent_id = COALESCE(NULLIF(excluded.parent_id, ''), tournaments.parent_id),
                season = COALESCE(NULLIF(excluded.season, ''), tournaments.season),
                name = COALESCE(NULLIF(excluded.name, ''), tournaments.name),
                group_name = COALESCE(NULLIF(excluded.group_name, ''), tournaments.group_name),
                birth_year = COALESCE(excluded.birth_year, tournaments.birth_year),
                url = COALESCE(NULLIF(excluded.url, ''), tournaments.url),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&id)
        .bind(tournament.key.source().as_str())
        .bind(tournament.key.external_id())
        .bind(text(&tournament.parent_id))
        .bind(text(&tournament.season))
        .bind(tournament.name.trim())
        .bind(text(&tournament.group_name))
        .bind(tournament.birth_year)
        .bind(text(&tournament.url))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_by_external_id(
        &self,
        source: Source,
        external_id: &str,
        scope: &[String],
    ) -> DomainResult<Option<Tournament>> {
        let id = EntityRef::scoped(source, scope, external_id)?.render();
        let row = sqlx::query("SELECT * FROM tournaments WHERE id = $1")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_tournament).transpose()
    }

    async fn exists(&self, source: Source, external_id: &str, scope: &[String]) -> DomainResult<bool> {
        let id = EntityRef::scoped(source, scope, external_id)?.render();
        id_exists(&self.pool, "tournaments", &id).await
    }

    async fn count(&self) -> DomainResult<i64> {
        count_rows(&self.pool, "tournaments").await
    }
}

// ============================================================================
// Matches
// ============================================================================

pub struct SqliteMatchRepository {
    pool: SqlitePool,
}

impl SqliteMatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> DomainResult<Option<Match>> {
        let row = sqlx::query("SELECT * FROM matches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> DomainResult<Match> {
            let id: String = row.try_get("id")?;
            Ok(Match {
                key: EntityRef::parse(&id)?,
                tournament_id: row.try_get("tournament_id")?,
                home_team_id: row.try_get("home_team_id")?,
                away_team_id: row.try_get("away_team_id")?,
                home_score: row.try_get("home_score")?,
                away_score: row.try_get("away_score")?,
                played_at: parse_datetime(row.try_get("played_at")?)?,
                venue: row.try_get("venue")?,
                url: row.try_get("url")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MatchRepository for SqliteMatchRepository {
    async fn upsert(&self, game: &Match) -> DomainResult<String> {
        let id = game.id();
        sqlx::query(
            r#"
            INSERT INTO matches (
                id, source, external_id, tournament_id, home_team_id, away_team_id,
                home_score, away_score, played_at, venue, url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(id) DO UPDATE SET
                tournament_id = COALESCE(NULLIF(excluded.tournament_id, ''), matches.tournament_id),
                home_team_id = COALESCE(NULLIF(excluded.home_team_id, ''), matches.home_team_id),
                away_team_id = COALESCE(NULLIF(excluded.away_team_id, ''), matches.away_team_id),
                home_score = COALESCE(excluded.home_score, matches.home_score),
                away_score = COALESCE(excluded.away_score, matches.away_score),
                played_at = COALESCE(excluded.played_at, matches.played_at),
                venue = COALESCE(NULLIF(excluded.venue, ''), matches.venue),
                url = COALESCE(NULLIF(excluded.url, ''), matches.url),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&id)
        .bind(game.key.source().as_str())
        .bind(game.key.external_id())
        .bind(game.tournament_id.trim())
        .bind(text(&game.home_team_id))
        .bind(text(&game.away_team_id))
        .bind(game.home_score)
        .bind(game.away_score)
        .bind(game.played_at.map(|t| t.format(DATETIME_FORMAT).to_string()))
        .bind(text(&game.venue))
        .bind(text(&game.url))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn count(&self) -> DomainResult<i64> {
        count_rows(&self.pool, "matches").await
    }
}

// ============================================================================
// Player statistics
// ============================================================================

pub struct SqliteStatisticsRepository {
    pool: SqlitePool,
}

impl SqliteStatisticsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatisticsRepository for SqliteStatisticsRepository {
    async fn upsert(&self, stat: &PlayerStatistic) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO player_statistics (
                player_id, tournament_id, team_id, games, goals, assists, points, penalty_minutes, plus_minus
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT(player_id, tournament_id, team_id) DO UPDATE SET
                games = COALESCE(excluded.games, player_statistics.games),
                goals = COALESCE(excluded.goals, player_statistics.goals),
                assists = COALESCE(excluded.assists, player_statistics.assists),
                points = COALESCE(excluded.points, player_statistics.points),
                penalty_minutes = COALESCE(excluded.penalty_minutes, player_statistics.penalty_minutes),
                plus_minus = COALESCE(excluded.plus_minus, player_statistics.plus_minus),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&stat.player_id)
        .bind(&stat.tournament_id)
        .bind(&stat.team_id)
        .bind(stat.games)
        .bind(stat.goals)
        .bind(stat.assists)
        .bind(stat.points)
        .bind(stat.penalty_minutes)
        .bind(stat.plus_minus)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> DomainResult<i64> {
        count_rows(&self.pool, "player_statistics").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn pool() -> SqlitePool {
        DatabaseConnection::in_memory().await.unwrap().pool().clone()
    }

    #[tokio::test]
    async fn player_upsert_never_erases_fields() {
        let repo = SqlitePlayerRepository::new(pool().await);
        let key = EntityRef::new(Source::Fhspb, "1001").unwrap();

        let mut rich = Player::new(key.clone(), "Ivan Petrov");
        rich.birth_date = NaiveDate::from_ymd_opt(2008, 5, 1);
        rich.position = Some("Defender".into());
        rich.height_cm = Some(178);
        assert_eq!(repo.upsert(&rich).await.unwrap(), "spb:1001");

        let mut thin = Player::new(key, "");
        thin.position = Some(" ".into());
        thin.weight_kg = Some(70);
        repo.upsert(&thin).await.unwrap();

        let stored = repo.get_by_external_id(Source::Fhspb, "1001").await.unwrap().unwrap();
        assert_eq!(stored.full_name, "Ivan Petrov");
        assert_eq!(stored.birth_date, NaiveDate::from_ymd_opt(2008, 5, 1));
        assert_eq!(stored.position.as_deref(), Some("Defender"));
        assert_eq!(stored.height_cm, Some(178));
        assert_eq!(stored.weight_kg, Some(70));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scoped_team_ids_do_not_collide() {
        let repo = SqliteTeamRepository::new(pool().await);
        let scope_a = vec!["45".to_string()];
        let scope_b = vec!["46".to_string()];

        let a = Team::new(EntityRef::scoped(Source::Mihf, &scope_a, "7").unwrap(), "Dynamo");
        let b = Team::new(EntityRef::scoped(Source::Mihf, &scope_b, "7").unwrap(), "Spartak");
        assert_eq!(repo.upsert(&a).await.unwrap(), "msk:45:7");
        repo.upsert(&b).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        assert!(repo.exists(Source::Mihf, "7", &scope_a).await.unwrap());
        assert!(!repo.exists(Source::Mihf, "7", &[]).await.unwrap());
        let loaded = repo.get_by_external_id(Source::Mihf, "7", &scope_b).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Spartak");
    }

    #[tokio::test]
    async fn roster_and_statistics_merge_on_composite_keys() {
        let pool = pool().await;
        let teams = SqliteTeamRepository::new(pool.clone());
        let stats = SqliteStatisticsRepository::new(pool.clone());

        let entry = RosterEntry {
            player_id: "spb:1".into(),
            team_id: "spb:9".into(),
            jersey_number: Some(17),
            position: Some("F".into()),
        };
        teams.upsert_roster_entry(&entry).await.unwrap();
        teams
            .upsert_roster_entry(&RosterEntry {
                jersey_number: None,
                position: None,
                ..entry
            })
            .await
            .unwrap();

        let stat = PlayerStatistic {
            player_id: "spb:1".into(),
            tournament_id: "spb:2024:5".into(),
            team_id: "spb:9".into(),
            games: Some(10),
            goals: Some(4),
            ..PlayerStatistic::default()
        };
        stats.upsert(&stat).await.unwrap();
        stats
            .upsert(&PlayerStatistic {
                goals: None,
                assists: Some(3),
                ..stat
            })
            .await
            .unwrap();
        assert_eq!(stats.count().await.unwrap(), 1);

        let roster: (Option<i64>, Option<String>) = sqlx::query_as(
            "SELECT jersey_number, position FROM roster_entries WHERE player_id = $1 AND team_id = $2",
        )
        .bind("spb:1")
        .bind("spb:9")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(roster, (Some(17), Some("F".to_string())));

        let totals: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT games, goals, assists, points FROM player_statistics
             WHERE player_id = $1 AND tournament_id = $2 AND team_id = $3",
        )
        .bind("spb:1")
        .bind("spb:2024:5")
        .bind("spb:9")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(totals, (Some(10), Some(4), Some(3), None));
    }
}
