use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use utoipa::ToSchema;

/// One of the four shift boundaries an employee can punch, in shift order.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum PunchKind {
    MorningIn,
    MorningOut,
    AfternoonIn,
    AfternoonOut,
}

impl PunchKind {
    pub const ALL: [PunchKind; 4] = [
        PunchKind::MorningIn,
        PunchKind::MorningOut,
        PunchKind::AfternoonIn,
        PunchKind::AfternoonOut,
    ];

    fn position(self) -> usize {
        match self {
            PunchKind::MorningIn => 0,
            PunchKind::MorningOut => 1,
            PunchKind::AfternoonIn => 2,
            PunchKind::AfternoonOut => 3,
        }
    }

    /// Column holding this punch in the `dtrs` table.
    pub fn column(self) -> &'static str {
        match self {
            PunchKind::MorningIn => "morning_in",
            PunchKind::MorningOut => "morning_out",
            PunchKind::AfternoonIn => "afternoon_in",
            PunchKind::AfternoonOut => "afternoon_out",
        }
    }

    /// The clock-in an `*Out` punch closes.
    pub fn clock_in(self) -> Option<PunchKind> {
        match self {
            PunchKind::MorningOut => Some(PunchKind::MorningIn),
            PunchKind::AfternoonOut => Some(PunchKind::AfternoonIn),
            _ => None,
        }
    }

    fn earlier(self) -> impl Iterator<Item = PunchKind> {
        Self::ALL.into_iter().take(self.position())
    }

    fn later(self) -> impl Iterator<Item = PunchKind> {
        Self::ALL.into_iter().skip(self.position() + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PunchError {
    #[error("{0} already recorded for today")]
    AlreadyRecorded(PunchKind),

    #[error("cannot record {kind} before {needs}")]
    MissingClockIn { kind: PunchKind, needs: PunchKind },

    #[error("cannot record {kind} after {later} has been recorded")]
    OutOfOrder { kind: PunchKind, later: PunchKind },

    #[error("{kind} at {at} is earlier than {previous} at {previous_at}")]
    BeforePrevious {
        kind: PunchKind,
        at: NaiveTime,
        previous: PunchKind,
        previous_at: NaiveTime,
    },
}

/// A daily time record: one user's punches for one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DtrRecord {
    pub id: u64,
    pub user_id: u64,
    pub date: NaiveDate,
    pub morning_in: Option<NaiveTime>,
    pub morning_out: Option<NaiveTime>,
    pub afternoon_in: Option<NaiveTime>,
    pub afternoon_out: Option<NaiveTime>,
    /// The punch that created the record.
    pub kind: PunchKind,
}

impl DtrRecord {
    pub fn new(user_id: u64, date: NaiveDate, kind: PunchKind) -> Self {
        Self {
            id: 0,
            user_id,
            date,
            morning_in: None,
            morning_out: None,
            afternoon_in: None,
            afternoon_out: None,
            kind,
        }
    }

    pub fn get(&self, kind: PunchKind) -> Option<NaiveTime> {
        match kind {
            PunchKind::MorningIn => self.morning_in,
            PunchKind::MorningOut => self.morning_out,
            PunchKind::AfternoonIn => self.afternoon_in,
            PunchKind::AfternoonOut => self.afternoon_out,
        }
    }

    fn slot_mut(&mut self, kind: PunchKind) -> &mut Option<NaiveTime> {
        match kind {
            PunchKind::MorningIn => &mut self.morning_in,
            PunchKind::MorningOut => &mut self.morning_out,
            PunchKind::AfternoonIn => &mut self.afternoon_in,
            PunchKind::AfternoonOut => &mut self.afternoon_out,
        }
    }

    /// Stamp `kind` with `at`, enforcing shift order.
    ///
    /// A punch is rejected when it is already recorded, when a later
    /// boundary is already recorded, when it is a clock-out without its
    /// clock-in, or when `at` is earlier than a previous boundary's time.
    /// The record is unchanged on error.
    pub fn stamp(&mut self, kind: PunchKind, at: NaiveTime) -> Result<(), PunchError> {
        if self.get(kind).is_some() {
            return Err(PunchError::AlreadyRecorded(kind));
        }

        if let Some(later) = kind.later().find(|k| self.get(*k).is_some()) {
            return Err(PunchError::OutOfOrder { kind, later });
        }

        if let Some(needs) = kind.clock_in() {
            if self.get(needs).is_none() {
                return Err(PunchError::MissingClockIn { kind, needs });
            }
        }

        let latest_previous = kind
            .earlier()
            .filter_map(|k| self.get(k).map(|t| (k, t)))
            .max_by_key(|(_, t)| *t);

        if let Some((previous, previous_at)) = latest_previous {
            if at < previous_at {
                return Err(PunchError::BeforePrevious {
                    kind,
                    at,
                    previous,
                    previous_at,
                });
            }
        }

        *self.slot_mut(kind) = Some(at);
        Ok(())
    }

    /// Hours covered by completed shifts, rounded to two decimals.
    pub fn total_hours(&self) -> Option<f64> {
        let spans = [
            (self.morning_in, self.morning_out),
            (self.afternoon_in, self.afternoon_out),
        ];

        let seconds: Option<i64> = spans
            .iter()
            .filter_map(|span| match span {
                (Some(start), Some(end)) if end >= start => Some((*end - *start).num_seconds()),
                _ => None,
            })
            .fold(None, |acc, s| Some(acc.unwrap_or(0) + s));

        seconds.map(|s| (s as f64 / 3600.0 * 100.0).round() / 100.0)
    }
}

/// Time-of-day for a punch at `at`, truncated to whole seconds.
pub fn punch_time(at: NaiveDateTime) -> NaiveTime {
    let time = at.time();
    time.with_nanosecond(0).unwrap_or(time)
}

/// A record joined with its owner's username, if the owner still exists.
#[derive(Debug, Clone, PartialEq)]
pub struct DtrEntry {
    pub record: DtrRecord,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DtrFilter {
    pub user_id: Option<u64>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DtrFilter {
    pub fn matches(&self, record: &DtrRecord) -> bool {
        self.user_id.is_none_or(|id| record.user_id == id)
            && self.date.is_none_or(|d| record.date == d)
            && self.from.is_none_or(|d| record.date >= d)
            && self.to.is_none_or(|d| record.date <= d)
    }
}
