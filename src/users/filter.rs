use time::{
    format_description::FormatItem, macros::format_description, Date, Duration, OffsetDateTime,
};

const DAY_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const JOINED_FORMAT: &[FormatItem<'static>] = format_description!("[day] [month repr:short]");

/// Creation-date window for the user listing. Days are UTC days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    All,
    Today,
    Yesterday,
    /// From the start of the day `n` days ago.
    LastDays(i64),
    /// Inclusive whole-day range; `None` when either bound was omitted.
    Custom(Option<(Date, Date)>),
}

impl DateFilter {
    /// `None` for an unknown code or a malformed custom date.
    pub fn parse(code: &str, from: Option<&str>, to: Option<&str>) -> Option<Self> {
        Some(match code {
            "all" => Self::All,
            "1" => Self::Today,
            "2" => Self::Yesterday,
            "7" => Self::LastDays(7),
            "30" => Self::LastDays(30),
            "90" => Self::LastDays(90),
            "custom" => match (non_empty(from), non_empty(to)) {
                (Some(from), Some(to)) => Self::Custom(Some((
                    Date::parse(from, DAY_FORMAT).ok()?,
                    Date::parse(to, DAY_FORMAT).ok()?,
                ))),
                _ => Self::Custom(None),
            },
            _ => return None,
        })
    }

    /// Inclusive `created_at` bounds relative to `now`.
    pub fn bounds(self, now: OffsetDateTime) -> (Option<OffsetDateTime>, Option<OffsetDateTime>) {
        let today = now.date();
        match self {
            Self::All | Self::Custom(None) => (None, None),
            Self::Today => (Some(start_of(today)), None),
            Self::Yesterday => {
                let day = today - Duration::days(1);
                (Some(start_of(day)), Some(end_of(day)))
            }
            Self::LastDays(n) => (Some(start_of(today - Duration::days(n))), None),
            Self::Custom(Some((from, to))) => (Some(start_of(from)), Some(end_of(to))),
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn start_of(day: Date) -> OffsetDateTime {
    day.midnight().assume_utc()
}

fn end_of(day: Date) -> OffsetDateTime {
    start_of(day) + Duration::days(1) - Duration::nanoseconds(1)
}

/// Relative join time as shown in the portal tables.
pub fn joined_at(created: OffsetDateTime, now: OffsetDateTime) -> String {
    let elapsed = now - created;
    let minutes = elapsed.whole_minutes();
    let hours = elapsed.whole_hours();
    let plural = |n: i64| if n > 1 { "s" } else { "" };

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes} minute{} ago", plural(minutes))
    } else if hours < 24 {
        format!("{hours} hour{} ago", plural(hours))
    } else {
        match elapsed.whole_days() {
            1 => "1 day ago".to_string(),
            2 => "2 days ago".to_string(),
            _ => created
                .format(JOINED_FORMAT)
                .unwrap_or_else(|_| created.date().to_string()),
        }
    }
}
