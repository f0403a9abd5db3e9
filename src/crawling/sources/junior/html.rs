//! Default junior.fhr.ru page parser

use scraper::Html;
use std::collections::HashSet;

use crate::crawling::dto::{PlayerDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto};
use crate::crawling::sources::junior::JuniorParser;
use crate::crawling::sources::markup::{profile_from_page, roster_from_table};
use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::html_extract::{PageExtractor, document, parse_year, path_segment_after};

pub struct HtmlJuniorParser {
    extractor: PageExtractor,
}

impl HtmlJuniorParser {
    pub fn new() -> DomainResult<Self> {
        Ok(Self {
            extractor: PageExtractor::new()?,
        })
    }

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
}

impl JuniorParser for HtmlJuniorParser {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>> {
        let seasons: Vec<SeasonDto> = self
            .linked(&document(html), "seasons")
            .into_iter()
            .map(|(external_id, url, name)| SeasonDto { external_id, name, url })
            .collect();
        if seasons.is_empty() {
            return Err(DomainError::parsing_temporary("seasons", "no season links on page"));
        }
        Ok(seasons)
    }

    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>> {
        Ok(self
            .linked(&document(html), "tournaments")
            .into_iter()
            .map(|(external_id, url, name)| TournamentDto {
                birth_year: parse_year(&name),
                external_id,
                name,
                url,
                group_name: None,
                schedule_url: None,
                stats_url: None,
            })
            .collect())
    }

    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>> {
        let doc = document(html);
        Ok(self
            .linked(&doc, "teams")
            .into_iter()
            .map(|(external_id, url, name)| TeamDto {
                logo_url: self.extractor.image_containing(doc.root_element(), &format!("/{external_id}.")),
                external_id,
                name,
                url,
                city: None,
            })
            .collect())
    }

    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>> {
        let doc = document(html);
        Ok(roster_from_table(&self.extractor, &doc, "/players/", |href| {
            path_segment_after(href, "players")
        }))
    }

    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto> {
        let doc = document(html);
        profile_from_page(&self.extractor, &doc, String::new())
    }
}
