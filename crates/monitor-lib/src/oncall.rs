//! On-call resolution from iCalendar feeds

use crate::error::OnCallError;
use crate::models::{OnCallShift, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait OnCallSource: Send + Sync {
    /// Shifts of `schedule` that cover `now`
    async fn current_oncall(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Vec<OnCallShift>, OnCallError>;
}

pub struct IcalFeedSource {
    client: Client,
}

impl IcalFeedSource {
    pub fn new(timeout: Duration) -> Result<Self, OnCallError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OnCallSource for IcalFeedSource {
    async fn current_oncall(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Vec<OnCallShift>, OnCallError> {
        let response = self.client.get(&schedule.feed_url).send().await?;
        if !response.status().is_success() {
            return Err(OnCallError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let shifts = parse_calendar(&body)?;
        debug!(schedule = %schedule.name, events = shifts.len(), "Parsed on-call feed");
        Ok(shifts_at(shifts, now))
    }
}

pub fn shifts_at(shifts: Vec<OnCallShift>, now: DateTime<Utc>) -> Vec<OnCallShift> {
    shifts
        .into_iter()
        .filter(|s| s.start <= now && now < s.end)
        .collect()
}

/// Join folded continuation lines (those starting with a space or tab)
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match (line.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(rest), Some(previous)) => previous.push_str(rest),
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

enum DateValue {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl DateValue {
    fn start(&self) -> DateTime<Utc> {
        match self {
            DateValue::DateTime(dt) => *dt,
            DateValue::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }
}

/// Parse `DTSTART`-style values. Floating and TZID-qualified times are
/// taken as UTC.
fn parse_date(params: &str, value: &str) -> Result<DateValue, OnCallError> {
    let value = value.trim();
    let malformed = || OnCallError::Parse(format!("bad date value {value:?}"));

    if params.to_ascii_uppercase().contains("VALUE=DATE") && !value.contains('T') {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(DateValue::Date)
            .map_err(|_| malformed());
    }

    let naive = value.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S")
        .map(|dt| DateValue::DateTime(dt.and_utc()))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y%m%d").map(DateValue::Date)
        })
        .map_err(|_| malformed())
}

fn unescape(text: &str) -> String {
    text.replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// Extract every VEVENT as a shift
pub fn parse_calendar(text: &str) -> Result<Vec<OnCallShift>, OnCallError> {
    let mut shifts = Vec::new();
    let mut in_event = false;
    let mut summary = String::new();
    let mut start: Option<DateValue> = None;
    let mut end: Option<DateValue> = None;

    for line in unfold(text) {
        let Some((head, value)) = line.split_once(':') else {
            continue;
        };
        let (name, params) = head.split_once(';').unwrap_or((head, ""));

        match (name.to_ascii_uppercase().as_str(), value) {
            ("BEGIN", v) if v.eq_ignore_ascii_case("VEVENT") => {
                in_event = true;
                summary.clear();
                start = None;
                end = None;
            }
            ("END", v) if v.eq_ignore_ascii_case("VEVENT") && in_event => {
                in_event = false;
                let Some(begin) = start.take() else {
                    return Err(OnCallError::Parse("VEVENT without DTSTART".to_string()));
                };
                let finish = match (end.take(), &begin) {
                    (Some(e), _) => e.start(),
                    (None, DateValue::Date(d)) => d
                        .checked_add_days(Days::new(1))
                        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
                        .unwrap_or_else(|| begin.start()),
                    (None, DateValue::DateTime(dt)) => *dt,
                };
                shifts.push(OnCallShift {
                    name: summary.trim().to_string(),
                    start: begin.start(),
                    end: finish,
                });
            }
            ("SUMMARY", v) if in_event => summary = unescape(v),
            ("DTSTART", v) if in_event => start = Some(parse_date(params, v)?),
            ("DTEND", v) if in_event => end = Some(parse_date(params, v)?),
            _ => {}
        }
    }
    Ok(shifts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:1\r\n\
DTSTART:20240301T090000Z\r\n\
DTEND:20240301T170000Z\r\n\
SUMMARY:Alice\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:2\r\n\
DTSTART;VALUE=DATE:20240301\r\n\
SUMMARY:Bob\\, backup on\r\n \tcall\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
DTSTART:20240302T090000\r\n\
DTEND:20240302T170000\r\n\
SUMMARY:Carol\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn test_parse_calendar_forms() {
        let shifts = parse_calendar(FEED).unwrap();
        assert_eq!(shifts.len(), 3);

        assert_eq!(shifts[0].name, "Alice");
        assert_eq!(shifts[0].start, Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());

        // Folded line joined, all-day event lasts one day
        assert_eq!(shifts[1].name, "Bob, backup on\tcall");
        assert_eq!(shifts[1].end, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());

        assert_eq!(shifts[2].end, Utc.with_ymd_and_hms(2024, 3, 2, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_shifts_at_filters_by_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
        let current = shifts_at(parse_calendar(FEED).unwrap(), now);
        let names: Vec<_> = current.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Bob, backup on\tcall"]);
    }

    #[test]
    fn test_bad_date_is_parse_error() {
        let feed = "BEGIN:VEVENT\nDTSTART:tomorrow\nEND:VEVENT\n";
        assert!(matches!(parse_calendar(feed), Err(OnCallError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_feed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/oncall.ics")
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let source = IcalFeedSource::new(Duration::from_secs(5)).unwrap();
        let schedule = Schedule {
            id: 1,
            name: "Main".to_string(),
            feed_url: format!("{}/oncall.ics", server.url()),
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let shifts = source.current_oncall(&schedule, now).await.unwrap();

        assert_eq!(shifts.len(), 2);
    }

    #[tokio::test]
    async fn test_feed_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/oncall.ics")
            .with_status(404)
            .create_async()
            .await;

        let source = IcalFeedSource::new(Duration::from_secs(5)).unwrap();
        let schedule = Schedule {
            id: 1,
            name: "Main".to_string(),
            feed_url: format!("{}/oncall.ics", server.url()),
        };
        assert!(matches!(
            source.current_oncall(&schedule, Utc::now()).await,
            Err(OnCallError::Status(404))
        ));
    }
}
