use anyhow::{
  Context,
  anyhow
};
use chrono::{
  Datelike,
  Duration,
  NaiveDate,
  NaiveTime,
  Weekday
};
use regex::Regex;

/// Resolves a due-date expression relative
/// to `today`.
///
/// Accepts `today`, `tomorrow`,
/// `yesterday`, weekday names (next
/// occurrence, never today), month names
/// (the 1st of the next such month),
/// signed offsets like `+3d`, `-1w` or
/// `+2m`, and `YYYY-MM-DD`.
pub fn parse_due_date(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" | "now" => {
      return Ok(today);
    }
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today,
      target_weekday
    ));
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let mut year = today.year();
    if target_month <= today.month() {
      year = year.saturating_add(1);
    }
    return NaiveDate::from_ymd_opt(
      year,
      target_month,
      1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month/year \
         candidate"
      )
    });
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwm])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let num =
      if sign == "-" { -num } else { num };

    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    return match unit {
      | "d" => Ok(add_days(today, num)),
      | "w" => {
        Ok(add_days(today, num * 7))
      }
      | "m" => {
        let months = i32::try_from(num)
          .context(
            "relative month offset out \
             of range"
          )?;
        Ok(shift_months(today, months))
      }
      | _ => {
        Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .with_context(|| {
    format!(
      "unrecognized date expression: \
       {token}"
    )
  })
}

/// Parses `HH:MM`, `H:MMam`, `3pm` style
/// clock times.
pub fn parse_clock_time(
  token: &str
) -> anyhow::Result<NaiveTime> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)?$",
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  let invalid = || {
    anyhow!(
      "unrecognized time: {}",
      token.trim()
    )
  };

  let captures = clock_re
    .captures(token.trim())
    .ok_or_else(invalid)?;

  let raw_hour = captures
    .name("hour")
    .ok_or_else(invalid)?
    .as_str()
    .parse::<u32>()
    .map_err(|_| invalid())?;
  let minute = match captures
    .name("minute")
  {
    | Some(m) => {
      m.as_str()
        .parse::<u32>()
        .map_err(|_| invalid())?
    }
    | None => 0
  };

  let hour = match captures
    .name("ampm")
    .map(|m| m.as_str().to_ascii_lowercase())
  {
    | Some(ampm) => {
      if raw_hour == 0 || raw_hour > 12 {
        return Err(invalid());
      }
      match (ampm.as_str(), raw_hour) {
        | ("am", 12) => 0,
        | ("am", h) => h,
        | ("pm", 12) => 12,
        | (_, h) => h + 12
      }
    }
    | None => {
      if captures.name("minute").is_none()
      {
        return Err(invalid());
      }
      raw_hour
    }
  };

  NaiveTime::from_hms_opt(
    hour, minute, 0
  )
  .ok_or_else(invalid)
}

pub fn parse_week_start(
  raw: &str
) -> Weekday {
  if raw
    .trim()
    .eq_ignore_ascii_case("sunday")
  {
    Weekday::Sun
  } else {
    Weekday::Mon
  }
}

pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

pub fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let total = date.year() * 12
    + date.month0() as i32
    + months;
  let year = total.div_euclid(12);
  let month =
    total.rem_euclid(12) as u32 + 1;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}

/// `dueTime` on the wire: `HH:MM`, with the
/// empty string standing for "no time".
pub mod clock_time_serde {
  use chrono::NaiveTime;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    value: &Option<NaiveTime>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match value {
      | Some(time) => {
        serializer.serialize_str(
          &time
            .format("%H:%M")
            .to_string()
        )
      }
      | None => serializer.serialize_str("")
    }
  }

  pub fn serialize_patch<S>(
    value: &Option<Option<NaiveTime>>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serialize(&value.flatten(), serializer)
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<Option<NaiveTime>, D::Error>
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    match opt.as_deref().map(str::trim) {
      | None | Some("") => Ok(None),
      | Some(raw) => {
        NaiveTime::parse_from_str(
          raw, "%H:%M"
        )
        .or_else(|_| {
          NaiveTime::parse_from_str(
            raw, "%H:%M:%S"
          )
        })
        .map(Some)
        .map_err(serde::de::Error::custom)
      }
    }
  }
}
