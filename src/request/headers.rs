//! Values derived from request headers: cookies, accepted locales and HTTP dates.

use http::header::{HeaderMap, ACCEPT_LANGUAGE, COOKIE};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One `name=value` pair from a `Cookie` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Cookies from every `Cookie` header, in order.
///
/// Values wrapped in double quotes are unquoted. Pairs without a name and
/// `$`-prefixed attributes (`$Version`, `$Path`) are skipped.
#[must_use]
pub fn parse_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            if name.is_empty() || name.starts_with('$') {
                return None;
            }
            let value = parts.next().unwrap_or("").trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some(Cookie {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// A language with an optional country, as in `en-GB`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Locale {
    pub language: String,
    pub country: Option<String>,
}

impl Locale {
    fn from_tag(tag: &str) -> Self {
        match tag.split_once('-') {
            Some((language, country)) => Self {
                language: language.trim().to_string(),
                country: Some(country.trim().to_string()).filter(|c| !c.is_empty()),
            },
            None => Self {
                language: tag.trim().to_string(),
                country: None,
            },
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{}-{}", self.language, country),
            None => f.write_str(&self.language),
        }
    }
}

/// Comma separated values of every `name` header, parameters stripped, ordered by
/// their `q` weight (stable for equal weights). Values with `q=0` are dropped.
#[must_use]
pub fn quality_list(headers: &HeaderMap, name: impl http::header::AsHeaderName) -> Vec<String> {
    let mut weighted: Vec<(u16, String)> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(','))
        .filter_map(|item| {
            let mut parts = item.split(';');
            let value = parts.next()?.trim();
            if value.is_empty() {
                return None;
            }
            let weight = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .map(parse_weight)
                .next()
                .unwrap_or(1000);
            (weight > 0).then(|| (weight, value.to_string()))
        })
        .collect();
    weighted.sort_by(|a, b| b.0.cmp(&a.0));
    weighted.into_iter().map(|(_, v)| v).collect()
}

/// `q` value in thousandths; unparseable weights count as zero
fn parse_weight(q: &str) -> u16 {
    match q.trim().parse::<f32>() {
        Ok(w) if (0.0..=1.0).contains(&w) => (w * 1000.0).round() as u16,
        _ => 0,
    }
}

/// Locales from `Accept-Language`, most preferred first. `*` is skipped.
#[must_use]
pub fn parse_locales(headers: &HeaderMap) -> Vec<Locale> {
    quality_list(headers, ACCEPT_LANGUAGE)
        .iter()
        .filter(|tag| tag.as_str() != "*")
        .map(|tag| Locale::from_tag(tag))
        .collect()
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parse an HTTP date in IMF-fixdate, RFC 850 or asctime form
#[must_use]
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let mut day = None;
    let mut month = None;
    let mut year = None;
    let mut time = None;

    for token in value
        .split(|c: char| c == ' ' || c == ',' || c == '-')
        .filter(|t| !t.is_empty())
    {
        if token.contains(':') {
            time = Some(parse_time(token)?);
        } else if let Some(m) = MONTHS
            .iter()
            .position(|m| token.get(..3).is_some_and(|p| p.eq_ignore_ascii_case(m)))
        {
            month = Some(m as u32 + 1);
        } else if token.bytes().all(|b| b.is_ascii_digit()) {
            let n: u32 = token.parse().ok()?;
            if day.is_none() && token.len() <= 2 {
                day = Some(n);
            } else {
                year = Some(match (token.len(), n) {
                    (2, n) if n < 70 => 2000 + n,
                    (2, n) => 1900 + n,
                    _ => n,
                });
            }
        }
    }

    let (day, month, year) = (day?, month?, year?);
    let (hour, minute, second) = time?;
    if !(1..=31).contains(&day) || year < 1970 {
        return None;
    }
    let days = days_from_civil(i64::from(year), month, day);
    let secs = days * 86_400 + i64::from(hour * 3600 + minute * 60 + second);
    let secs = u64::try_from(secs).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

fn parse_time(token: &str) -> Option<(u32, u32, u32)> {
    let mut parts = token.split(':').map(|p| p.parse::<u32>().ok());
    let hour = parts.next()??;
    let minute = parts.next()??;
    let second = parts.next()??;
    (hour < 24 && minute < 60 && second < 61).then_some((hour, minute, second))
}

/// Days since 1970-01-01 for a proleptic Gregorian date
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year - era * 400;
    let month = i64::from(month);
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
