//! Default stats.mihf.ru page parser
//!
//! The portal uses path ids (`/stage/12`, `/team/89`). Statistics grids list
//! counters in the order games, goals, assists, points, penalty minutes,
//! plus/minus in the last six columns.

use scraper::Html;
use std::collections::HashSet;

use crate::crawling::dto::{GroupDto, Page, PlayerDto, PlayerStatDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto};
use crate::crawling::sources::markup::{postback_state, profile_from_page, roster_from_table};
use crate::crawling::sources::mihf::MihfParser;
use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::html_extract::{PageExtractor, document, parse_int, parse_year, path_segment_after, text_of};

/// Trailing counter columns of a statistics row
const COUNTER_COLUMNS: usize = 6;

pub struct HtmlMihfParser {
    extractor: PageExtractor,
}

impl HtmlMihfParser {
    pub fn new() -> DomainResult<Self> {
        Ok(Self {
            extractor: PageExtractor::new()?,
        })
    }

    /// Unique (id, href, text) for links into `/<marker>/<id>`
    fn linked(&self, doc: &Html, marker: &str) -> Vec<(String, String, String)> {
        let mut seen = HashSet::new();
        self.extractor
            .links_containing(doc.root_element(), &format!("/{marker}/"))
            .into_iter()
            .filter_map(|(href, text)| {
                let id = path_segment_after(&href, marker)?;
                (!text.is_empty() && seen.insert(id.clone())).then_some((id, href, text))
            })
            .collect()
    }

    fn tournaments(&self, html: &[u8], marker: &str, with_stats: bool) -> Vec<TournamentDto> {
        let doc = document(html);
        self.linked(&doc, marker)
            .into_iter()
            .map(|(external_id, url, name)| TournamentDto {
                stats_url: with_stats.then(|| format!("/{marker}/{external_id}/stats")),
                birth_year: parse_year(&name),
                external_id,
                name,
                url,
                group_name: None,
                schedule_url: None,
            })
            .collect()
    }
}

impl MihfParser for HtmlMihfParser {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>> {
        let seasons: Vec<SeasonDto> = self
            .linked(&document(html), "season")
            .into_iter()
            .map(|(external_id, url, name)| SeasonDto { external_id, name, url })
            .collect();
        if seasons.is_empty() {
            return Err(DomainError::parsing_temporary("seasons", "no season links on page"));
        }
        Ok(seasons)
    }

    fn parse_groups(&self, html: &[u8]) -> DomainResult<Vec<GroupDto>> {
        Ok(self
            .linked(&document(html), "group")
            .into_iter()
            .map(|(external_id, url, name)| GroupDto { external_id, name, url })
            .collect())
    }

    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>> {
        Ok(self.tournaments(html, "tournament", false))
    }

    fn parse_sub_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>> {
        Ok(self.tournaments(html, "stage", true))
    }

    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>> {
        Ok(self
            .linked(&document(html), "team")
            .into_iter()
            .map(|(external_id, url, name)| TeamDto {
                external_id,
                name,
                url,
                city: None,
                logo_url: None,
            })
            .collect())
    }

    fn parse_stats(&self, html: &[u8]) -> DomainResult<Page<PlayerStatDto>> {
        let doc = document(html);
        let mut items = Vec::new();

        for cells in self.extractor.table_rows(doc.root_element(), 3) {
            let Some(player_at) = cells
                .iter()
                .position(|c| self.extractor.first_link(*c, "/player/").is_some())
            else {
                continue;
            };
            let Some((href, name)) = self.extractor.first_link(cells[player_at], "/player/") else {
                continue;
            };
            let Some(player_external_id) = path_segment_after(&href, "player") else {
                continue;
            };
            let team_external_id = cells
                .iter()
                .find_map(|c| self.extractor.first_link(*c, "/team/"))
                .and_then(|(team_href, _)| path_segment_after(&team_href, "team"));

            let first_counter = cells.len().saturating_sub(COUNTER_COLUMNS).max(player_at + 1);
            let counters: Vec<Option<i32>> = cells[first_counter..]
                .iter()
                .map(|c| parse_int(&text_of(*c)))
                .collect();
            let counter = |i: usize| counters.get(i).copied().flatten();

            items.push(PlayerStatDto {
                player_external_id,
                full_name: Some(name),
                team_external_id,
                games: counter(0),
                goals: counter(1),
                assists: counter(2),
                points: counter(3),
                penalty_minutes: counter(4),
                plus_minus: counter(5),
            });
        }

        Ok(Page {
            items,
            postback: postback_state(&self.extractor, &doc),
        })
    }

    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>> {
        let doc = document(html);
        Ok(roster_from_table(&self.extractor, &doc, "/player/", |href| {
            path_segment_after(href, "player")
        }))
    }

    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto> {
        let doc = document(html);
        profile_from_page(&self.extractor, &doc, String::new())
    }
}
