//! Arrival matchers
//!
//! Matchers are tried in registration order; the first whose pattern matches
//! the raw key decides how the file is staged.

use regex::{Captures, Regex};

/// Byte ceiling for daily headered text drops.
pub const DAILY_HEADERED_MAX_SIZE: i64 = 500_000;

/// Header lines dropped from daily headered drops while staging.
pub const DAILY_HEADERED_HEADER_LINES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// `business/operation/system/table/latest/<name>.csv`
    Latest,
    /// `a/b/c/d/YYYY-MM-DD/<name>.csv`, historical snapshots that are not staged
    DatedSnapshot,
    /// `hive-ads/tables/impressions/dt=YYYY-MM-DD-HH-MM/<name>.log`
    HourlyLog,
    /// `source/region/table/year=YYYY/month=MM/day=DD/<name>.txt`
    DailyHeadered,
    /// `dummy/<name>.txt`, smoke tests
    Dummy,
}

impl MatcherKind {
    pub fn name(self) -> &'static str {
        match self {
            MatcherKind::Latest => "latest",
            MatcherKind::DatedSnapshot => "dated-snapshot",
            MatcherKind::HourlyLog => "hourly-log",
            MatcherKind::DailyHeadered => "daily-headered",
            MatcherKind::Dummy => "dummy",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            MatcherKind::Latest => {
                r"^([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/latest/([A-Za-z0-9_]+\.csv)$"
            }
            MatcherKind::DatedSnapshot => {
                r"^(?:[A-Za-z0-9_]+/){4}(\d{4}-\d{2}-\d{2})/([A-Za-z0-9_]+\.csv)$"
            }
            MatcherKind::HourlyLog => {
                r"^(hive-ads)/(tables)/(impressions)/(dt=\d{4}-\d{2}-\d{2}-\d{2}-\d{2})/([A-Za-z0-9_.-]+\.log)$"
            }
            MatcherKind::DailyHeadered => {
                r"^([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/year=(\d{4})/month=(0\d|1[0-2])/day=([0-3]\d)/([A-Za-z0-9_.-]+\.txt)$"
            }
            MatcherKind::Dummy => r"^(dummy)/([A-Za-z0-9_.-]+\.txt)$",
        }
    }
}

/// How the payload is moved into staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Server-side copy.
    Copy,
    /// Download, drop the first `n` lines, upload.
    DropHeaderLines(usize),
}

/// Everything a handler needs to stage one file. Paths are relative to the
/// staging container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    pub matcher: MatcherKind,
    pub staging_dir: String,
    pub staged_key: String,
    pub data_source: String,
    pub object_name: String,
    pub partition: Option<String>,
    pub transform: Transform,
    pub max_size: Option<i64>,
    /// Whether to fetch size/type/mtime from the source object.
    pub probe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Stage(StagingPlan),
    /// Recognised but deliberately not staged.
    Ignore(String),
}

#[derive(Debug)]
pub struct Matcher {
    kind: MatcherKind,
    pattern: Regex,
}

fn group<'k>(caps: &Captures<'k>, index: usize) -> &'k str {
    caps.get(index).map_or("", |m| m.as_str())
}

impl Matcher {
    pub fn new(kind: MatcherKind) -> Result<Self, regex::Error> {
        Ok(Self {
            kind,
            pattern: Regex::new(kind.pattern())?,
        })
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn route(&self, key: &str) -> Option<Route> {
        let caps = self.pattern.captures(key)?;

        let plan = match self.kind {
            MatcherKind::Latest => {
                let (business, operation, system, table, file) = (
                    group(&caps, 1),
                    group(&caps, 2),
                    group(&caps, 3),
                    group(&caps, 4),
                    group(&caps, 5),
                );
                let staging_dir = format!("{business}/{operation}/{system}/{table}");
                StagingPlan {
                    matcher: self.kind,
                    staged_key: format!("{staging_dir}/latest/{file}"),
                    staging_dir,
                    data_source: business.to_string(),
                    object_name: file.to_string(),
                    partition: None,
                    transform: Transform::Copy,
                    max_size: None,
                    probe: true,
                }
            }
            MatcherKind::DatedSnapshot => {
                return Some(Route::Ignore(format!(
                    "Historical snapshot {} for {} is not staged",
                    group(&caps, 2),
                    group(&caps, 1)
                )));
            }
            MatcherKind::HourlyLog => {
                let (operation, system, table, partition, file) = (
                    group(&caps, 1),
                    group(&caps, 2),
                    group(&caps, 3),
                    group(&caps, 4),
                    group(&caps, 5),
                );
                let staging_dir = format!("{operation}/{system}/{table}");
                StagingPlan {
                    matcher: self.kind,
                    staged_key: format!("{staging_dir}/{partition}/{file}"),
                    staging_dir,
                    data_source: operation.to_string(),
                    object_name: file.to_string(),
                    partition: None,
                    transform: Transform::Copy,
                    max_size: None,
                    probe: true,
                }
            }
            MatcherKind::DailyHeadered => {
                let (source, region, table) = (group(&caps, 1), group(&caps, 2), group(&caps, 3));
                let date = format!("{}-{}-{}", group(&caps, 4), group(&caps, 5), group(&caps, 6));
                let file = group(&caps, 7);
                let staging_dir = format!("{region}/{source}/{table}");
                StagingPlan {
                    matcher: self.kind,
                    staged_key: format!("{staging_dir}/dt={date}/{file}"),
                    staging_dir,
                    data_source: source.to_string(),
                    object_name: file.to_string(),
                    partition: Some(date),
                    transform: Transform::DropHeaderLines(DAILY_HEADERED_HEADER_LINES),
                    max_size: Some(DAILY_HEADERED_MAX_SIZE),
                    probe: true,
                }
            }
            MatcherKind::Dummy => {
                let (dir, file) = (group(&caps, 1), group(&caps, 2));
                StagingPlan {
                    matcher: self.kind,
                    staging_dir: dir.to_string(),
                    staged_key: key.to_string(),
                    data_source: dir.to_string(),
                    object_name: file.to_string(),
                    partition: None,
                    transform: Transform::Copy,
                    max_size: None,
                    probe: false,
                }
            }
        };

        Some(Route::Stage(plan))
    }
}

/// Ordered list of matchers.
#[derive(Debug)]
pub struct MatcherRegistry {
    matchers: Vec<Matcher>,
}

impl MatcherRegistry {
    /// The built-in matchers, in priority order.
    pub fn builtin() -> Result<Self, regex::Error> {
        Self::from_kinds(&[
            MatcherKind::Latest,
            MatcherKind::DatedSnapshot,
            MatcherKind::HourlyLog,
            MatcherKind::DailyHeadered,
            MatcherKind::Dummy,
        ])
    }

    pub fn from_kinds(kinds: &[MatcherKind]) -> Result<Self, regex::Error> {
        let matchers = kinds
            .iter()
            .map(|kind| Matcher::new(*kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    /// First matcher that accepts `key`, with its route.
    pub fn resolve(&self, key: &str) -> Option<(MatcherKind, Route)> {
        self.matchers
            .iter()
            .find_map(|m| m.route(key).map(|route| (m.kind(), route)))
    }

    pub fn kinds(&self) -> Vec<MatcherKind> {
        self.matchers.iter().map(Matcher::kind).collect()
    }
}
