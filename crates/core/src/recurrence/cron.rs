//! CRON 风格的重复规则编码
//!
//! 编码由若干 `<字段><取值>` 对组成，例如 `h3m0,30s15`。字段依次为
//! `o`(月 1-12)、`d`(日 1-31)、`w`(星期 0-6，周一为 0)、`h`(时)、`m`(分)、`s`(秒)。
//! 取值为 `*` 或升序的逗号分隔整数列表。未给出的字段取全部合法值，
//! 秒字段除外：秒字段随机取一个值，避免大量相同规则在同一秒触发。

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use rand::Rng;

use crate::errors::{FleetError, FleetResult};

/// 没有匹配结果时向后扫描的最大天数
const MAX_SCAN_DAYS: u32 = 366 * 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Month,
    Day,
    Weekday,
    Hour,
    Minute,
    Second,
}

impl CronField {
    /// 规范编码中的字段顺序
    pub const ALL: [CronField; 6] = [
        CronField::Month,
        CronField::Day,
        CronField::Weekday,
        CronField::Hour,
        CronField::Minute,
        CronField::Second,
    ];

    pub fn letter(&self) -> char {
        match self {
            CronField::Month => 'o',
            CronField::Day => 'd',
            CronField::Weekday => 'w',
            CronField::Hour => 'h',
            CronField::Minute => 'm',
            CronField::Second => 's',
        }
    }

    pub fn range(&self) -> (u32, u32) {
        match self {
            CronField::Month => (1, 12),
            CronField::Day => (1, 31),
            CronField::Weekday => (0, 6),
            CronField::Hour => (0, 23),
            CronField::Minute => (0, 59),
            CronField::Second => (0, 59),
        }
    }

    /// 解析字段名，接受单字母和完整名称
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "o" | "month" | "months" => CronField::Month,
            "d" | "day" | "days" => CronField::Day,
            "w" | "weekday" | "weekdays" | "dow" => CronField::Weekday,
            "h" | "hour" | "hours" => CronField::Hour,
            "m" | "minute" | "minutes" => CronField::Minute,
            "s" | "second" | "seconds" => CronField::Second,
            _ => return None,
        };
        Some(field)
    }

    fn index(&self) -> usize {
        match self {
            CronField::Month => 0,
            CronField::Day => 1,
            CronField::Weekday => 2,
            CronField::Hour => 3,
            CronField::Minute => 4,
            CronField::Second => 5,
        }
    }

    fn full(&self) -> BTreeSet<u32> {
        let (lo, hi) = self.range();
        (lo..=hi).collect()
    }

    fn default_values<R: Rng>(&self, rng: &mut R) -> BTreeSet<u32> {
        match self {
            CronField::Second => BTreeSet::from([rng.random_range(0..60)]),
            _ => self.full(),
        }
    }

    fn parse_values(&self, raw: &str) -> Result<BTreeSet<u32>, String> {
        if raw == "*" {
            return Ok(self.full());
        }
        if raw.is_empty() {
            return Err(format!("字段 {} 缺少取值", self.letter()));
        }
        let (lo, hi) = self.range();
        let mut values = BTreeSet::new();
        for part in raw.split(',') {
            let value: u32 = part
                .parse()
                .map_err(|_| format!("字段 {} 的取值无效: {part:?}", self.letter()))?;
            if value < lo || value > hi {
                return Err(format!(
                    "字段 {} 的取值 {value} 超出范围 {lo}-{hi}",
                    self.letter()
                ));
            }
            values.insert(value);
        }
        Ok(values)
    }
}

/// 预置的重复周期，生成随机化的编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronPreset {
    HalfHourly,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl CronPreset {
    pub fn encoding(&self) -> String {
        self.encoding_with_rng(&mut rand::rng())
    }

    pub fn encoding_with_rng<R: Rng>(&self, rng: &mut R) -> String {
        let minute: u32 = rng.random_range(0..60);
        let hour: u32 = rng.random_range(0..24);
        match self {
            CronPreset::HalfHourly => {
                let m: u32 = rng.random_range(0..30);
                format!("m{},{}", m, m + 30)
            }
            CronPreset::Hourly => format!("m{minute}"),
            CronPreset::Daily => format!("h{hour}m{minute}"),
            CronPreset::Weekly => {
                let weekday: u32 = rng.random_range(0..7);
                format!("w{weekday}h{hour}m{minute}")
            }
            CronPreset::Monthly => {
                // 只取每个月都有的日期
                let day: u32 = rng.random_range(1..=28);
                format!("d{day}h{hour}m{minute}")
            }
        }
    }
}

impl FromStr for CronPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HALFHOURLY" => Ok(CronPreset::HalfHourly),
            "HOURLY" => Ok(CronPreset::Hourly),
            "DAILY" => Ok(CronPreset::Daily),
            "WEEKLY" => Ok(CronPreset::Weekly),
            "MONTHLY" => Ok(CronPreset::Monthly),
            _ => Err(format!("Invalid cron preset: {s}")),
        }
    }
}

/// 解码后的规则，每个字段一组允许值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    fields: [BTreeSet<u32>; 6],
}

impl CronFields {
    pub fn decode(encoding: &str) -> FleetResult<Self> {
        Self::decode_with_rng(encoding, &mut rand::rng())
    }

    /// 解码编码字符串，预置名称（如 `DAILY`）也被接受
    pub fn decode_with_rng<R: Rng>(encoding: &str, rng: &mut R) -> FleetResult<Self> {
        let malformed = |message: String| FleetError::MalformedCron {
            encoding: encoding.to_string(),
            message,
        };

        let trimmed = encoding.trim();
        if trimmed.is_empty() {
            return Err(malformed("编码为空".to_string()));
        }
        if let Ok(preset) = trimmed.parse::<CronPreset>() {
            return Self::decode_with_rng(&preset.encoding_with_rng(rng), rng);
        }

        let mut parsed: [Option<BTreeSet<u32>>; 6] = Default::default();
        let chars: Vec<char> = trimmed.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i].is_whitespace() {
                i += 1;
                continue;
            }
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphabetic() {
                i += 1;
            }
            let name = chars[start..i]
                .iter()
                .collect::<String>()
                .to_ascii_lowercase();
            if name.is_empty() {
                return Err(malformed(format!("位置 {start} 缺少字段名")));
            }
            let field = CronField::from_name(&name)
                .ok_or_else(|| malformed(format!("未知字段: {name}")))?;

            let value_start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit() || chars[i] == ',' || chars[i] == '*')
            {
                i += 1;
            }
            let raw: String = chars[value_start..i].iter().collect();
            let values = field.parse_values(&raw).map_err(&malformed)?;
            if parsed[field.index()].replace(values).is_some() {
                return Err(malformed(format!("字段 {} 重复出现", field.letter())));
            }
        }

        let fields = std::array::from_fn(|idx| {
            parsed[idx]
                .take()
                .unwrap_or_else(|| CronField::ALL[idx].default_values(rng))
        });
        Ok(Self { fields })
    }

    /// 规范编码：单字母字段名、去重升序、全范围写作 `*`
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for field in CronField::ALL {
            let values = self.values(field);
            out.push(field.letter());
            if *values == field.full() {
                out.push('*');
            } else {
                let joined = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                out.push_str(&joined);
            }
        }
        out
    }

    pub fn values(&self, field: CronField) -> &BTreeSet<u32> {
        &self.fields[field.index()]
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        self.values(CronField::Month).contains(&date.month())
            && self.values(CronField::Day).contains(&date.day())
            && self
                .values(CronField::Weekday)
                .contains(&date.weekday().num_days_from_monday())
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.date_matches(at.date_naive())
            && self.values(CronField::Hour).contains(&at.hour())
            && self.values(CronField::Minute).contains(&at.minute())
            && self.values(CronField::Second).contains(&at.second())
    }

    /// 当天不早于 (hour, minute, second) 的第一个允许时刻
    fn first_time_from(&self, hour: u32, minute: u32, second: u32) -> Option<(u32, u32, u32)> {
        for &h in self.values(CronField::Hour).range(hour..) {
            let min_floor = if h == hour { minute } else { 0 };
            for &m in self.values(CronField::Minute).range(min_floor..) {
                let sec_floor = if h == hour && m == minute { second } else { 0 };
                if let Some(&s) = self.values(CronField::Second).range(sec_floor..).next() {
                    return Some((h, m, s));
                }
            }
        }
        None
    }

    /// 严格晚于 `base` 的下一次触发时刻（精确到秒）
    ///
    /// 先在秒、分、时上逐级进位，再逐日向后扫描，直到月、日和星期同时满足。
    pub fn calculate_next(&self, base: DateTime<Utc>) -> FleetResult<DateTime<Utc>> {
        let truncated = base - Duration::nanoseconds(base.timestamp_subsec_nanos() as i64);
        let start = truncated + Duration::seconds(1);

        let mut date = start.date_naive();
        let (mut hour, mut minute, mut second) = (start.hour(), start.minute(), start.second());
        for _ in 0..MAX_SCAN_DAYS {
            if self.date_matches(date) {
                if let Some((h, m, s)) = self.first_time_from(hour, minute, second) {
                    let naive = date.and_hms_opt(h, m, s).ok_or_else(|| {
                        FleetError::Internal(format!("无效的时刻 {date} {h}:{m}:{s}"))
                    })?;
                    return Ok(Utc.from_utc_datetime(&naive));
                }
            }
            date = date.succ_opt().ok_or_else(|| {
                FleetError::Internal(format!("日期 {date} 之后无法继续计算"))
            })?;
            (hour, minute, second) = (0, 0, 0);
        }

        Err(FleetError::MalformedCron {
            encoding: self.encode(),
            message: "在四年内没有匹配的时刻".to_string(),
        })
    }
}

impl fmt::Display for CronFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for CronFields {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// 解码再编码得到规范形式
pub fn canonicalize(encoding: &str) -> FleetResult<String> {
    Ok(CronFields::decode(encoding)?.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_canonical_encoding_is_idempotent() {
        for encoding in [
            "o*d*w*h*m*s*",
            "h3m15s0",
            "minutes30,0 hours12 seconds5",
            "s59,0,0,30",
            "w0,1,2,3,4,5,6h1s1",
            "DAILY",
            "HALFHOURLY",
            "m7",
        ] {
            let once = canonicalize(encoding).unwrap();
            let twice = canonicalize(&once).unwrap();
            assert_eq!(once, twice, "{encoding}");
        }
    }

    #[test]
    fn test_encode_uses_star_and_sorted_values() {
        let fields = CronFields::decode("seconds30,0,30 minutes5 w6,5,4,3,2,1,0").unwrap();
        assert_eq!(fields.encode(), "o*d*w*h*m5s0,30");
    }

    #[test]
    fn test_seconds_default_to_single_random_value() {
        let mut rng = StdRng::seed_from_u64(7);
        let fields = CronFields::decode_with_rng("h*m*", &mut rng).unwrap();
        assert_eq!(fields.values(CronField::Second).len(), 1);
        assert_eq!(fields.values(CronField::Minute).len(), 60);
    }

    #[test]
    fn test_malformed_encodings() {
        for encoding in ["", "x5", "h24", "m", "h1h2", "m1,,2", "5h", "h*1"] {
            assert!(
                matches!(
                    CronFields::decode(encoding),
                    Err(FleetError::MalformedCron { .. })
                ),
                "{encoding:?}"
            );
        }
    }

    #[test]
    fn test_next_every_second() {
        let fields = CronFields::decode("o*d*w*h*m*s*").unwrap();
        let base = at("2024-01-01T00:00:00.250Z");
        assert_eq!(
            fields.calculate_next(base).unwrap(),
            at("2024-01-01T00:00:01Z")
        );
    }

    #[test]
    fn test_next_carries_and_resets_lower_fields() {
        let fields = CronFields::decode("h12m0s0").unwrap();
        assert_eq!(
            fields.calculate_next(at("2024-01-01T11:59:59Z")).unwrap(),
            at("2024-01-01T12:00:00Z")
        );
        assert_eq!(
            fields.calculate_next(at("2024-01-01T12:00:00Z")).unwrap(),
            at("2024-01-02T12:00:00Z")
        );

        let fields = CronFields::decode("m15,45s30").unwrap();
        assert_eq!(
            fields.calculate_next(at("2024-12-31T23:45:30Z")).unwrap(),
            at("2025-01-01T00:15:30Z")
        );
    }

    #[test]
    fn test_next_respects_weekday() {
        // 2024-01-03 是周三，下一个周一是 2024-01-08
        let fields = CronFields::decode("w0h9m0s0").unwrap();
        assert_eq!(
            fields.calculate_next(at("2024-01-03T10:00:00Z")).unwrap(),
            at("2024-01-08T09:00:00Z")
        );
    }

    #[test]
    fn test_next_scans_to_leap_day() {
        let fields = CronFields::decode("o2d29h0m0s0").unwrap();
        assert_eq!(
            fields.calculate_next(at("2023-03-01T00:00:00Z")).unwrap(),
            at("2024-02-29T00:00:00Z")
        );
    }

    #[test]
    fn test_impossible_date_is_malformed() {
        let fields = CronFields::decode("o2d30").unwrap();
        assert!(matches!(
            fields.calculate_next(Utc::now()),
            Err(FleetError::MalformedCron { .. })
        ));
    }

    #[test]
    fn test_next_result_matches_rule() {
        let fields = CronFields::decode("d1,15w*h6,18m0,20,40s10").unwrap();
        let mut base = at("2024-05-20T07:00:00Z");
        for _ in 0..20 {
            let next = fields.calculate_next(base).unwrap();
            assert!(next > base);
            assert!(fields.matches(next));
            base = next;
        }
    }

    #[test]
    fn test_presets_produce_expected_cadence() {
        let mut rng = StdRng::seed_from_u64(42);
        let half = CronFields::decode_with_rng("HALFHOURLY", &mut rng).unwrap();
        let minutes: Vec<u32> = half.values(CronField::Minute).iter().copied().collect();
        assert_eq!(minutes.len(), 2);
        assert_eq!(minutes[1] - minutes[0], 30);

        let weekly = CronFields::decode_with_rng("weekly", &mut rng).unwrap();
        assert_eq!(weekly.values(CronField::Weekday).len(), 1);
        assert_eq!(weekly.values(CronField::Hour).len(), 1);

        let monthly = CronFields::decode_with_rng("MONTHLY", &mut rng).unwrap();
        assert!(monthly.values(CronField::Day).iter().all(|d| *d <= 28));
    }
}
