use std::fmt;

use chrono::{Days, NaiveDate};

use super::resource::Resource;
use super::DATE_FORMAT;

/// What slice of a resource a fetch unit asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchTarget {
    /// A single trading date.
    Date(NaiveDate),
    /// An inclusive date window.
    Range { from: NaiveDate, to: NaiveDate },
    /// One page of an event feed, 1-based.
    Page(u32),
    /// The current state of a snapshot resource.
    Latest,
    /// One entity (ticker) of the fundamentals category.
    Entity(String),
}

impl FetchTarget {
    /// Inclusive date window covered by this target, if it is date-scoped.
    pub fn window(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            FetchTarget::Date(d) => Some((*d, *d)),
            FetchTarget::Range { from, to } => Some((*from, *to)),
            _ => None,
        }
    }

    /// Every date in the window, oldest first. Empty for non-date targets.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let Some((from, to)) = self.window() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut d = from;
        while d <= to {
            out.push(d);
            match d.checked_add_days(Days::new(1)) {
                Some(next) => d = next,
                None => break,
            }
        }
        out
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            FetchTarget::Range { from, to } => write!(
                f,
                "{}..{}",
                from.format(DATE_FORMAT),
                to.format(DATE_FORMAT)
            ),
            FetchTarget::Page(p) => write!(f, "page {p}"),
            FetchTarget::Latest => f.write_str("latest"),
            FetchTarget::Entity(e) => f.write_str(e),
        }
    }
}

/// The smallest independently retryable piece of work: one target of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchUnit {
    pub resource: Resource,
    pub target: FetchTarget,
}

impl FetchUnit {
    pub fn new(resource: Resource, target: FetchTarget) -> Self {
        Self { resource, target }
    }
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn range_dates_are_inclusive() {
        let target = FetchTarget::Range {
            from: d("2026-02-25"),
            to: d("2026-02-27"),
        };
        assert_eq!(
            target.dates(),
            vec![d("2026-02-25"), d("2026-02-26"), d("2026-02-27")]
        );
    }

    #[test]
    fn non_date_targets_have_no_window() {
        assert_eq!(FetchTarget::Page(1).window(), None);
        assert_eq!(FetchTarget::Latest.window(), None);
        assert!(FetchTarget::Entity("FPT".into()).dates().is_empty());
    }

    #[test]
    fn display_names_resource_and_target() {
        let unit = FetchUnit::new(
            Resource::VnTa,
            FetchTarget::Range {
                from: d("2026-02-25"),
                to: d("2026-02-27"),
            },
        );
        assert_eq!(unit.to_string(), "vn_ta[2026-02-25..2026-02-27]");
        let unit = FetchUnit::new(Resource::Fundamentals, FetchTarget::Entity("FPT".into()));
        assert_eq!(unit.to_string(), "fundamentals[FPT]");
    }
}
