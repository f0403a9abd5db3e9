use serde::Serialize;
use std::fmt;
use std::ops::AddAssign;
use tracing::info;

use crate::crawling::bounded_stage::{StageCounters, StageReport};
use crate::domain::Source;

/// Totals for one crawl run, folded bottom-up through the stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub seasons: usize,
    pub groups: usize,
    pub tournaments: usize,
    pub sub_tournaments: usize,
    pub teams: usize,
    pub players: usize,
    pub roster_entries: usize,
    pub matches: usize,
    pub statistics: usize,
    /// Skipped by the birth-year filter
    pub filtered: usize,
    /// Units whose handler failed at any level
    pub failed: usize,
    /// Units never started because the run was cancelled
    pub skipped: usize,
}

impl CrawlSummary {
    /// Counters of a finished stage, plus its failure and skip tallies
    #[must_use]
    pub fn absorb(report: StageReport<Self>) -> Self {
        let mut summary = report.counters;
        summary.failed += report.failed;
        summary.skipped += report.skipped;
        summary
    }

    pub fn log(&self, source: Source) {
        info!("📊 {} crawl finished: {}", source, self);
    }
}

impl AddAssign for CrawlSummary {
    fn add_assign(&mut self, other: Self) {
        self.seasons += other.seasons;
        self.groups += other.groups;
        self.tournaments += other.tournaments;
        self.sub_tournaments += other.sub_tournaments;
        self.teams += other.teams;
        self.players += other.players;
        self.roster_entries += other.roster_entries;
        self.matches += other.matches;
        self.statistics += other.statistics;
        self.filtered += other.filtered;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl StageCounters for CrawlSummary {
    fn merge(&mut self, other: Self) {
        *self += other;
    }
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seasons={} groups={} tournaments={} sub_tournaments={} teams={} players={} roster={} matches={} stats={} filtered={} failed={} skipped={}",
            self.seasons,
            self.groups,
            self.tournaments,
            self.sub_tournaments,
            self.teams,
            self.players,
            self.roster_entries,
            self.matches,
            self.statistics,
            self.filtered,
            self.failed,
            self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_carries_failures_up() {
        let report = StageReport {
            total: 5,
            started: 5,
            succeeded: 4,
            failed: 1,
            skipped: 0,
            counters: CrawlSummary {
                teams: 4,
                players: 40,
                failed: 2,
                ..CrawlSummary::default()
            },
        };
        let summary = CrawlSummary::absorb(report);
        assert_eq!(summary.teams, 4);
        assert_eq!(summary.failed, 3);
    }
}
