//! Page layouts the three hockey portals have in common
//!
//! Player profiles are label/value tables, rosters are tables with a player
//! link per row, and paged grids use ASP.NET pager postbacks.

use scraper::Html;
use std::collections::HashSet;

use crate::crawling::dto::{PlayerDto, RosterEntryDto};
use crate::crawling::pagination::PostbackState;
use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::html_extract::{
    PageExtractor, non_blank, parse_date, parse_int, parse_year, selector, text_of,
};

const BIRTH_DATE_LABELS: &[&str] = &["дата рождения", "д.р.", "birth date"];
const BIRTH_YEAR_LABELS: &[&str] = &["год рождения", "г.р."];
const POSITION_LABELS: &[&str] = &["амплуа", "позиция", "position"];
const HANDEDNESS_LABELS: &[&str] = &["хват", "shoots"];
const HEIGHT_LABELS: &[&str] = &["рост", "height"];
const WEIGHT_LABELS: &[&str] = &["вес", "weight"];
const CITIZENSHIP_LABELS: &[&str] = &["гражданство", "citizenship"];
const NAME_LABELS: &[&str] = &["фио", "игрок", "name"];

/// Postback state of a paged grid, if the page has a pager
pub fn postback_state(extractor: &PageExtractor, doc: &Html) -> Option<PostbackState> {
    let pager = extractor.pager(doc)?;
    PostbackState::from_hidden_fields(&extractor.hidden_fields(doc), &pager.event_target, pager.max_page)
}

/// Profile page to DTO; the caller supplies the id it already knows
pub fn profile_from_page(extractor: &PageExtractor, doc: &Html, external_id: String) -> DomainResult<PlayerDto> {
    let values = extractor.labelled_values(doc);
    let lookup = |labels: &[&str]| labels.iter().find_map(|label| values.get(*label)).cloned();

    let heading = selector("h1")?;
    let full_name = doc
        .select(&heading)
        .map(text_of)
        .find(|t| !t.is_empty())
        .or_else(|| lookup(NAME_LABELS))
        .ok_or_else(|| DomainError::invalid_format("player", "profile page has no player name"))?;

    let birth_date = lookup(BIRTH_DATE_LABELS).as_deref().and_then(parse_date);
    let birth_year = lookup(BIRTH_YEAR_LABELS).as_deref().and_then(parse_year);

    Ok(PlayerDto {
        external_id,
        full_name,
        birth_date,
        birth_year,
        position: lookup(POSITION_LABELS),
        handedness: lookup(HANDEDNESS_LABELS),
        height_cm: lookup(HEIGHT_LABELS).as_deref().and_then(parse_int),
        weight_kg: lookup(WEIGHT_LABELS).as_deref().and_then(parse_int),
        citizenship: lookup(CITIZENSHIP_LABELS),
        photo_url: extractor.image_containing(doc.root_element(), "photo"),
    })
}

/// Roster rows: one player link per row, identified by `player_id(href)`
///
/// A leading numeric cell is the jersey number; a `dd.mm.yyyy` cell is the
/// birth date and a bare four-digit cell the birth year.
pub fn roster_from_table<F>(extractor: &PageExtractor, doc: &Html, needle: &str, player_id: F) -> Vec<RosterEntryDto>
where
    F: Fn(&str) -> Option<String>,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for cells in extractor.table_rows(doc.root_element(), 2) {
        let Some((href, name)) = cells.iter().find_map(|cell| extractor.first_link(*cell, needle)) else {
            continue;
        };
        let Some(id) = player_id(&href) else {
            continue;
        };
        if name.is_empty() || !seen.insert(id.clone()) {
            continue;
        }

        let texts: Vec<String> = cells.iter().map(|c| text_of(*c)).collect();
        let jersey_number = texts
            .first()
            .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()))
            .and_then(|t| parse_int(t));
        let birth_date = texts.iter().find_map(|t| parse_date(t));
        let birth_year = texts
            .iter()
            .filter(|t| t.len() == 4)
            .find_map(|t| parse_year(t));
        let position = texts
            .iter()
            .find(|t| is_position(t))
            .cloned()
            .and_then(non_blank);

        entries.push(RosterEntryDto {
            player_external_id: id,
            full_name: name,
            url: Some(href),
            jersey_number,
            position,
            birth_date,
            birth_year,
        });
    }
    entries
}

fn is_position(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["вратарь", "защитник", "нападающий", "goalie", "defense", "forward"]
        .iter()
        .any(|p| lower == *p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::html_extract::{document, query_param};
    use chrono::NaiveDate;

    #[test]
    fn profile_reads_labelled_rows() {
        let html = r#"
            <h1>Иван Петров</h1>
            <table>
              <tr><td>Дата рождения:</td><td>14.03.2009</td></tr>
              <tr><td>Амплуа</td><td>Нападающий</td></tr>
              <tr><td>Хват</td><td>Левый</td></tr>
              <tr><td>Рост</td><td>181 см</td></tr>
              <tr><td>Вес</td><td>74 кг</td></tr>
            </table>
            <img src="/Photos/77.jpg">"#;
        let extractor = PageExtractor::new().unwrap();
        let dto = profile_from_page(&extractor, &document(html.as_bytes()), "77".into()).unwrap();
        assert_eq!(dto.full_name, "Иван Петров");
        assert_eq!(dto.birth_date, NaiveDate::from_ymd_opt(2009, 3, 14));
        assert_eq!(dto.position.as_deref(), Some("Нападающий"));
        assert_eq!(dto.height_cm, Some(181));
        assert_eq!(dto.weight_kg, Some(74));
        assert_eq!(dto.photo_url.as_deref(), Some("/Photos/77.jpg"));
    }

    #[test]
    fn nameless_profile_is_rejected() {
        let extractor = PageExtractor::new().unwrap();
        let err = profile_from_page(&extractor, &document(b"<p>nothing</p>"), "1".into()).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn roster_rows_with_player_links() {
        let html = r#"
            <table>
              <tr><th>#</th><th>Игрок</th><th>Амплуа</th><th>Д.р.</th></tr>
              <tr><td>17</td><td><a href="/Player.aspx?PlayerID=77">Иван Петров</a></td><td>Нападающий</td><td>14.03.2009</td></tr>
              <tr><td>1</td><td><a href="/Player.aspx?PlayerID=78">Олег Сидоров</a></td><td>Вратарь</td><td>2009</td></tr>
              <tr><td>17</td><td><a href="/Player.aspx?PlayerID=77">Иван Петров</a></td><td></td><td></td></tr>
            </table>"#;
        let extractor = PageExtractor::new().unwrap();
        let roster = roster_from_table(&extractor, &document(html.as_bytes()), "playerid=", |href| {
            query_param(href, "PlayerID")
        });
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].jersey_number, Some(17));
        assert_eq!(roster[0].birth_date, NaiveDate::from_ymd_opt(2009, 3, 14));
        assert_eq!(roster[1].position.as_deref(), Some("Вратарь"));
        assert_eq!(roster[1].birth_year, Some(2009));
    }
}
