use serde::Serialize;
use utoipa::ToSchema;

/// Arrival states the API reports instead of a countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    ArrivingSoon,
    AwaitingDeparture,
    OutOfService,
}

/// Time (or distance) until a bus reaches a stop
///
/// Recreated from server data on every successful poll and decayed locally
/// once per second in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum RemainTime {
    Countdown { minutes: u32, seconds: u32 },
    Stops { count: u32 },
    Status { status: ArrivalStatus },
}

impl RemainTime {
    /// Builds a countdown, normalising seconds above 59 into minutes
    pub fn from_seconds(total: u32) -> Self {
        RemainTime::Countdown {
            minutes: total / 60,
            seconds: total % 60,
        }
    }

    pub fn total_seconds(&self) -> Option<u32> {
        match self {
            RemainTime::Countdown { minutes, seconds } => Some(minutes.saturating_mul(60).saturating_add(*seconds)),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds() == Some(0)
    }

    /// Removes one second, borrowing from minutes. Zero stays zero and the
    /// non-countdown forms are left as they are.
    pub fn decrement(&mut self) {
        if let RemainTime::Countdown { minutes, seconds } = self {
            if *seconds > 0 {
                *seconds -= 1;
            } else if *minutes > 0 {
                *minutes -= 1;
                *seconds = 59;
            }
        }
    }
}

/// A parsed arrival message such as `"2분18초후[2번째 전]"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ArrivalMessage {
    pub remain: RemainTime,
    /// Stops between the bus and the queried stop, when the API reports it
    pub stops_away: Option<u32>,
}

impl ArrivalMessage {
    /// Parses the arrival strings returned by `getArrInfoByRoute`.
    ///
    /// Recognised shapes: `"{m}분{s}초후[{n}번째 전]"`, `"{m}분후[{n}번째 전]"`,
    /// `"{s}초후[..]"`, `"곧 도착"`, `"출발대기"`, `"운행종료"`. Returns `None`
    /// for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw {
            "곧 도착" => {
                return Some(Self {
                    remain: RemainTime::Status { status: ArrivalStatus::ArrivingSoon },
                    stops_away: Some(0),
                })
            }
            "출발대기" => {
                return Some(Self {
                    remain: RemainTime::Status { status: ArrivalStatus::AwaitingDeparture },
                    stops_away: None,
                })
            }
            "운행종료" => {
                return Some(Self {
                    remain: RemainTime::Status { status: ArrivalStatus::OutOfService },
                    stops_away: None,
                })
            }
            _ => {}
        }

        let (time_part, position_part) = match raw.split_once('[') {
            Some((time, rest)) => (time.trim(), Some(rest.trim_end_matches(']'))),
            None => (raw, None),
        };

        let stops_away = position_part.and_then(parse_stops_away);
        let remain = match parse_countdown(time_part) {
            Countdown::Seconds(seconds) => RemainTime::from_seconds(seconds),
            Countdown::Overflow => return None,
            Countdown::Absent => RemainTime::Stops { count: stops_away? },
        };

        Some(Self { remain, stops_away })
    }
}

enum Countdown {
    Seconds(u32),
    /// Digits too large to be a real countdown
    Overflow,
    Absent,
}

/// `"2분18초후"` → 138, `"5분후"` → 300, `"40초후"` → 40
fn parse_countdown(raw: &str) -> Countdown {
    let raw = raw.strip_suffix('후').unwrap_or(raw);
    if raw.is_empty() {
        return Countdown::Absent;
    }

    let (minutes, rest) = match raw.split_once('분') {
        Some((m, rest)) => match m.trim().parse::<u32>() {
            Ok(m) => (m, rest),
            Err(_) => return Countdown::Absent,
        },
        None => (0, raw),
    };
    let seconds = match rest.strip_suffix('초') {
        Some(s) => match s.trim().parse::<u32>() {
            Ok(s) => s,
            Err(_) => return Countdown::Absent,
        },
        None if rest.is_empty() => 0,
        None => return Countdown::Absent,
    };

    match minutes.checked_mul(60).and_then(|m| m.checked_add(seconds)) {
        Some(total) => Countdown::Seconds(total),
        None => Countdown::Overflow,
    }
}

/// `"2번째 전"` → 2, `"도착"`-style positions → 0
fn parse_stops_away(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.contains("도착") {
        return Some(0);
    }
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
