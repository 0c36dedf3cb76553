use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::model::attendance::DtrEntry;

const MISSING: &str = "-";

#[derive(Serialize)]
struct ReportRow<'a> {
    #[serde(rename = "Employee")]
    employee: &'a str,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Morning In")]
    morning_in: String,
    #[serde(rename = "Morning Out")]
    morning_out: String,
    #[serde(rename = "Afternoon In")]
    afternoon_in: String,
    #[serde(rename = "Afternoon Out")]
    afternoon_out: String,
    #[serde(rename = "Total Hours")]
    total_hours: String,
}

fn clock(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

pub fn report_filename(today: NaiveDate) -> String {
    format!("DTR_Report_{}.csv", today.format("%Y-%m-%d"))
}

/// Render entries as CSV with a header row. Times are `HH:MM`, gaps `-`.
pub fn render_csv(entries: &[DtrEntry]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for entry in entries {
        let r = &entry.record;
        writer.serialize(ReportRow {
            employee: entry.username.as_deref().unwrap_or("Unknown"),
            date: r.date.format("%Y-%m-%d").to_string(),
            morning_in: clock(r.morning_in),
            morning_out: clock(r.morning_out),
            afternoon_in: clock(r.afternoon_in),
            afternoon_out: clock(r.afternoon_out),
            total_hours: r
                .total_hours()
                .map(|h| format!("{h:.2}"))
                .unwrap_or_else(|| MISSING.to_string()),
        })?;
    }

    if entries.is_empty() {
        writer.write_record([
            "Employee",
            "Date",
            "Morning In",
            "Morning Out",
            "Afternoon In",
            "Afternoon Out",
            "Total Hours",
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
