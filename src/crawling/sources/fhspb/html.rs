//! Default fhspb.ru page parser
//!
//! Pages are located by the query parameters of their links
//! (`SeasonID`, `TournamentID`, `TeamID`, `PlayerID`, `MatchID`).

use chrono::NaiveTime;
use regex::Regex;
use std::collections::HashSet;

use crate::crawling::dto::{MatchDto, Page, PlayerDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto};
use crate::crawling::sources::fhspb::FhspbParser;
use crate::crawling::sources::markup::{postback_state, profile_from_page, roster_from_table};
use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::html_extract::{PageExtractor, document, parse_date, parse_year, query_param, text_of};

pub struct HtmlFhspbParser {
    extractor: PageExtractor,
    score: Regex,
    time: Regex,
}

impl HtmlFhspbParser {
    pub fn new() -> DomainResult<Self> {
        let pattern = |p: &str| Regex::new(p).map_err(|e| DomainError::invalid_format("pattern", e.to_string()));
        Ok(Self {
            extractor: PageExtractor::new()?,
            score: pattern(r"(\d+)\s*:\s*(\d+)")?,
            time: pattern(r"\b(\d{1,2}):(\d{2})\b")?,
        })
    }

    /// Unique (id, href, text) triples for links carrying `param`
    fn linked_ids(&self, body: &[u8], param: &str) -> Vec<(String, String, String)> {
        let doc = document(body);
        let mut seen = HashSet::new();
        self.extractor
            .links_containing(doc.root_element(), &format!("{param}="))
            .into_iter()
            .filter_map(|(href, text)| {
                let id = query_param(&href, param)?;
                (!text.is_empty() && seen.insert(id.clone())).then_some((id, href, text))
            })
            .collect()
    }
}

fn require<T>(items: Vec<T>, what: &str) -> DomainResult<Vec<T>> {
    if items.is_empty() {
        // Layout drift or a half-rendered page; worth another look later
        Err(DomainError::parsing_temporary(what, format!("no {what} found on page")))
    } else {
        Ok(items)
    }
}

impl FhspbParser for HtmlFhspbParser {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>> {
        let seasons = self
            .linked_ids(html, "SeasonID")
            .into_iter()
            .map(|(external_id, url, name)| SeasonDto { external_id, name, url })
            .collect();
        require(seasons, "seasons")
    }

    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>> {
        Ok(self
            .linked_ids(html, "TournamentID")
            .into_iter()
            .map(|(external_id, url, name)| TournamentDto {
                schedule_url: Some(format!("/Schedule.aspx?TournamentID={external_id}")),
                birth_year: parse_year(&name),
                external_id,
                name,
                url,
                group_name: None,
                stats_url: None,
            })
            .collect())
    }

    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>> {
        Ok(self
            .linked_ids(html, "TeamID")
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

    fn parse_schedule(&self, html: &[u8]) -> DomainResult<Page<MatchDto>> {
        let doc = document(html);
        let mut items = Vec::new();

        for cells in self.extractor.table_rows(doc.root_element(), 3) {
            let Some((href, link_text)) = cells.iter().find_map(|c| self.extractor.first_link(*c, "matchid="))
            else {
                continue;
            };
            let Some(external_id) = query_param(&href, "MatchID") else {
                continue;
            };
            let teams: Vec<String> = cells
                .iter()
                .flat_map(|c| self.extractor.links_containing(*c, "teamid="))
                .filter_map(|(team_href, _)| query_param(&team_href, "TeamID"))
                .collect();
            let texts: Vec<String> = cells.iter().map(|c| text_of(*c)).collect();

            let date = texts.iter().find_map(|t| t.split_whitespace().find_map(parse_date));
            let time = texts.iter().find_map(|t| {
                let caps = self.time.captures(t)?;
                NaiveTime::from_hms_opt(caps[1].parse::<u32>().ok()?, caps[2].parse::<u32>().ok()?, 0)
            });
            // The match link is labelled with the final score
            let score = self
                .score
                .captures(&link_text)
                .and_then(|caps| Some((caps[1].parse::<i32>().ok()?, caps[2].parse::<i32>().ok()?)));

            items.push(MatchDto {
                external_id,
                home_team_external_id: teams.first().cloned(),
                away_team_external_id: teams.get(1).cloned(),
                home_score: score.map(|(home, _)| home),
                away_score: score.map(|(_, away)| away),
                played_at: date.and_then(|d| time.map(|t| d.and_time(t)).or_else(|| d.and_hms_opt(0, 0, 0))),
                venue: None,
                url: Some(href),
            });
        }

        Ok(Page {
            items,
            postback: postback_state(&self.extractor, &doc),
        })
    }

    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>> {
        let doc = document(html);
        Ok(roster_from_table(&self.extractor, &doc, "playerid=", |href| {
            query_param(href, "PlayerID")
        }))
    }

    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto> {
        let doc = document(html);
        let external_id = self
            .extractor
            .first_link(doc.root_element(), "playerid=")
            .and_then(|(href, _)| query_param(&href, "PlayerID"))
            .unwrap_or_default();
        profile_from_page(&self.extractor, &doc, external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn seasons_are_deduplicated_links() {
        let parser = HtmlFhspbParser::new().unwrap();
        let html = br#"
            <a href="/Season.aspx?SeasonID=24">2024/2025</a>
            <a href="/Season.aspx?SeasonID=23">2023/2024</a>
            <a href="/Season.aspx?SeasonID=24">2024/2025</a>"#;
        let seasons = parser.parse_seasons(html).unwrap();
        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[0].external_id, "24");
        assert_eq!(seasons[1].name, "2023/2024");
    }

    #[test]
    fn empty_season_list_is_retryable() {
        let parser = HtmlFhspbParser::new().unwrap();
        let err = parser.parse_seasons(b"<html><body>maintenance</body></html>").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn tournament_birth_year_comes_from_title() {
        let parser = HtmlFhspbParser::new().unwrap();
        let html = r#"<a href="/Tournament.aspx?TournamentID=310">Первенство СПб, юноши 2010 г.р.</a>"#;
        let tournaments = parser.parse_tournaments(html.as_bytes()).unwrap();
        assert_eq!(tournaments[0].birth_year, Some(2010));
        assert_eq!(tournaments[0].schedule_url.as_deref(), Some("/Schedule.aspx?TournamentID=310"));
    }

    #[test]
    fn schedule_rows_and_pager() {
        let parser = HtmlFhspbParser::new().unwrap();
        let html = br#"
            <form>
              <input type="hidden" name="__VIEWSTATE" value="abc" />
              <table>
                <tr>
                  <td>12.10.2024 14:30</td>
                  <td><a href="/Team.aspx?TeamID=5">SKA</a></td>
                  <td><a href="/Team.aspx?TeamID=9">Dynamo</a></td>
                  <td><a href="/Match.aspx?MatchID=1001">4 : 2</a></td>
                </tr>
                <tr><td colspan="4"><a href="javascript:__doPostBack('ctl00$grid','Page$2')">2</a></td></tr>
              </table>
            </form>"#;
        let page = parser.parse_schedule(html).unwrap();
        assert_eq!(page.items.len(), 1);
        let game = &page.items[0];
        assert_eq!(game.home_team_external_id.as_deref(), Some("5"));
        assert_eq!(game.away_team_external_id.as_deref(), Some("9"));
        assert_eq!((game.home_score, game.away_score), (Some(4), Some(2)));
        assert_eq!(
            game.played_at,
            NaiveDate::from_ymd_opt(2024, 10, 12).and_then(|d| d.and_hms_opt(14, 30, 0))
        );
        let state = page.postback.unwrap();
        assert_eq!(state.event_target, "ctl00$grid");
        assert_eq!(state.total_pages, 2);
    }
}
