//! Markup helpers shared by the per-source HTML parsers
//!
//! Nothing here knows about hockey. The helpers pull links, table cells,
//! ASP.NET hidden fields and pager postback targets out of a document.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

use crate::domain::{DomainError, DomainResult};

/// Compile a CSS selector, reporting failures as permanent parse errors
pub fn selector(css: &str) -> DomainResult<Selector> {
    Selector::parse(css).map_err(|e| DomainError::invalid_format("selector", format!("'{css}': {e}")))
}

pub fn document(body: &[u8]) -> Html {
    Html::parse_document(&String::from_utf8_lossy(body))
}

/// Element text with runs of whitespace collapsed
pub fn text_of(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// `None` for blank text
pub fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Leading signed integer, ignoring spaces and trailing units (`"181 см"` -> 181)
pub fn parse_int(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    let (sign, rest) = match trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('\u{2212}')) {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest
        .chars()
        .filter(|c| !c.is_whitespace())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<i32>().ok().map(|n| n * sign)
}

/// `dd.mm.yyyy` or ISO `yyyy-mm-dd`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    ["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// First four-digit year in the text (`"2008 г.р."`, `"Юноши 2009"`)
pub fn parse_year(raw: &str) -> Option<i32> {
    raw.split(|c: char| !c.is_ascii_digit())
        .find(|chunk| chunk.len() == 4)
        .and_then(|chunk| chunk.parse().ok())
        .filter(|year| (1900..=2100).contains(year))
}

/// Query parameter of a possibly relative href
pub fn query_param(href: &str, name: &str) -> Option<String> {
    let base = Url::parse("http://placeholder.invalid/").ok()?;
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Last non-empty path segment (`/player/123/` -> `123`)
pub fn last_path_segment(href: &str) -> Option<String> {
    let base = Url::parse("http://placeholder.invalid/").ok()?;
    let url = base.join(href).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Path segment following `marker` (`/stage/12/stats`, `stage` -> `12`)
pub fn path_segment_after(href: &str, marker: &str) -> Option<String> {
    let base = Url::parse("http://placeholder.invalid/").ok()?;
    let url = base.join(href).ok()?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    segments.find(|s| s.eq_ignore_ascii_case(marker))?;
    segments.next().map(str::to_string)
}

/// Pager postback target and the highest page number it links to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerLinks {
    pub event_target: String,
    pub max_page: u32,
}

/// Pre-compiled selectors and patterns for common page furniture
pub struct PageExtractor {
    hidden_input: Selector,
    anchor: Selector,
    row: Selector,
    cell: Selector,
    image: Selector,
    postback: Regex,
}

impl PageExtractor {
    pub fn new() -> DomainResult<Self> {
        Ok(Self {
            hidden_input: selector("input[type='hidden'][name]")?,
            anchor: selector("a[href]")?,
            row: selector("tr")?,
            cell: selector("td, th")?,
            image: selector("img[src]")?,
            postback: Regex::new(r"__doPostBack\('([^']+)','Page\$(\d+)'\)")
                .map_err(|e| DomainError::invalid_format("pattern", e.to_string()))?,
        })
    }

    /// Hidden inputs by name (`__VIEWSTATE`, `__EVENTVALIDATION`, ...)
    pub fn hidden_fields(&self, doc: &Html) -> HashMap<String, String> {
        doc.select(&self.hidden_input)
            .filter_map(|input| {
                let el = input.value();
                let name = el.attr("name")?;
                Some((name.to_string(), el.attr("value").unwrap_or_default().to_string()))
            })
            .collect()
    }

    /// Links whose href contains `needle`, as (href, text) pairs in document order
    pub fn links_containing(&self, scope: ElementRef<'_>, needle: &str) -> Vec<(String, String)> {
        scope
            .select(&self.anchor)
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                href.to_ascii_lowercase()
                    .contains(&needle.to_ascii_lowercase())
                    .then(|| (href.to_string(), text_of(a)))
            })
            .collect()
    }

    /// First link inside `scope` whose href contains `needle`
    pub fn first_link(&self, scope: ElementRef<'_>, needle: &str) -> Option<(String, String)> {
        self.links_containing(scope, needle).into_iter().next()
    }

    /// Table rows under `scope` that have at least `min_cells` cells, as cell lists
    pub fn table_rows<'a>(&self, scope: ElementRef<'a>, min_cells: usize) -> Vec<Vec<ElementRef<'a>>> {
        scope
            .select(&self.row)
            .map(|row| row.select(&self.cell).collect::<Vec<_>>())
            .filter(|cells| cells.len() >= min_cells)
            .collect()
    }

    /// Two-cell `label | value` rows, labels lowercased without a trailing colon
    pub fn labelled_values(&self, doc: &Html) -> HashMap<String, String> {
        self.table_rows(doc.root_element(), 2)
            .into_iter()
            .filter_map(|cells| {
                let label = text_of(cells[0]).trim_end_matches(':').trim().to_lowercase();
                let value = text_of(cells[1]);
                (!label.is_empty() && !value.is_empty()).then_some((label, value))
            })
            .collect()
    }

    /// First image under `scope` whose src contains `needle`
    pub fn image_containing(&self, scope: ElementRef<'_>, needle: &str) -> Option<String> {
        scope
            .select(&self.image)
            .filter_map(|img| img.value().attr("src"))
            .find(|src| src.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
            .map(str::to_string)
    }

    /// `javascript:__doPostBack('grid','Page$N')` pager links
    pub fn pager(&self, doc: &Html) -> Option<PagerLinks> {
        let mut found: Option<PagerLinks> = None;
        for a in doc.select(&self.anchor) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let Some(caps) = self.postback.captures(href) else {
                continue;
            };
            let page = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
            let target = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            match &mut found {
                Some(links) => links.max_page = links.max_page.max(page),
                None => {
                    found = Some(PagerLinks {
                        event_target: target,
                        max_page: page,
                    });
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_dates_and_years() {
        assert_eq!(parse_int(" 181 см"), Some(181));
        assert_eq!(parse_int("-3"), Some(-3));
        assert_eq!(parse_int("+12"), Some(12));
        assert_eq!(parse_int("—"), None);
        assert_eq!(parse_date("14.03.2009"), NaiveDate::from_ymd_opt(2009, 3, 14));
        assert_eq!(parse_date("2009-03-14"), NaiveDate::from_ymd_opt(2009, 3, 14));
        assert_eq!(parse_year("Юноши 2009 г.р."), Some(2009));
        assert_eq!(parse_year("Группа А"), None);
    }

    #[test]
    fn href_helpers() {
        assert_eq!(query_param("/Team.aspx?TeamID=42&x=1", "teamid").as_deref(), Some("42"));
        assert_eq!(query_param("/Team.aspx", "TeamID"), None);
        assert_eq!(last_path_segment("/players/1007/").as_deref(), Some("1007"));
        assert_eq!(path_segment_after("/stage/12/stats", "stage").as_deref(), Some("12"));
        assert_eq!(path_segment_after("/stage/", "stage"), None);
    }

    #[test]
    fn hidden_fields_and_pager() {
        let html = r#"
            <form>
              <input type="hidden" name="__VIEWSTATE" value="vs==" />
              <input type="hidden" name="__EVENTVALIDATION" value="ev" />
              <table><tr><td>
                <span>1</span>
                <a href="javascript:__doPostBack('ctl00$Main$grid','Page$2')">2</a>
                <a href="javascript:__doPostBack('ctl00$Main$grid','Page$3')">3</a>
              </td></tr></table>
              <a href="/Team.aspx?TeamID=5">Team five</a>
            </form>"#;
        let extractor = PageExtractor::new().unwrap();
        let doc = document(html.as_bytes());

        let fields = extractor.hidden_fields(&doc);
        assert_eq!(fields.get("__VIEWSTATE").map(String::as_str), Some("vs=="));

        let pager = extractor.pager(&doc).unwrap();
        assert_eq!(pager.event_target, "ctl00$Main$grid");
        assert_eq!(pager.max_page, 3);

        let links = extractor.links_containing(doc.root_element(), "team.aspx");
        assert_eq!(links, vec![("/Team.aspx?TeamID=5".to_string(), "Team five".to_string())]);
    }

    #[test]
    fn labelled_profile_rows() {
        let html = r#"
            <table>
              <tr><th>Дата рождения:</th><td>14.03.2009</td></tr>
              <tr><th>Рост</th><td>181 см</td></tr>
              <tr><td>only one cell</td></tr>
            </table>
            <img src="/img/logo.png"><img src="/Photos/77.jpg">"#;
        let extractor = PageExtractor::new().unwrap();
        let doc = document(html.as_bytes());

        let values = extractor.labelled_values(&doc);
        assert_eq!(values.get("дата рождения").map(String::as_str), Some("14.03.2009"));
        assert_eq!(values.get("рост").map(String::as_str), Some("181 см"));
        assert_eq!(values.len(), 2);
        assert_eq!(extractor.image_containing(doc.root_element(), "photo").as_deref(), Some("/Photos/77.jpg"));
    }
}
