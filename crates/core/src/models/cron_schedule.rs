use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScheduleKey;
use crate::errors::FleetResult;
use crate::recurrence::CronFields;

/// CRON 风格调度
///
/// `next` 是由 `base` 和 `encoding` 推导的缓存值，每次触发后失效。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    pub id: i64,
    pub task_id: i64,
    pub queue: String,
    /// 0 表示无限次
    pub repetitions: i64,
    pub remaining: i64,
    pub base: DateTime<Utc>,
    pub encoding: String,
    pub make_up: bool,
    pub scheduler_id: Option<i64>,
    pub changed: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 缓存的下一次触发时刻，不持久化
    #[serde(skip)]
    pub next: Option<DateTime<Utc>>,
}

impl CronSchedule {
    /// 创建时即规范化编码，随机选取的秒值随记录一起保存
    pub fn new(
        task_id: i64,
        queue: impl Into<String>,
        encoding: &str,
        repetitions: i64,
    ) -> FleetResult<Self> {
        let encoding = CronFields::decode(encoding)?.encode();
        let now = Utc::now();
        Ok(Self {
            id: 0, // 将由数据库生成
            task_id,
            queue: queue.into(),
            repetitions,
            remaining: repetitions,
            base: now,
            encoding,
            make_up: false,
            scheduler_id: None,
            changed: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            next: None,
        })
    }

    pub fn with_make_up(mut self, make_up: bool) -> Self {
        self.make_up = make_up;
        self
    }

    pub fn with_base(mut self, base: DateTime<Utc>) -> Self {
        self.base = base;
        self.next = None;
        self
    }

    pub fn key(&self) -> ScheduleKey {
        ScheduleKey::Cron(self.id)
    }

    pub fn is_finished(&self) -> bool {
        self.repetitions > 0 && self.remaining <= 0
    }

    pub fn fields(&self) -> FleetResult<CronFields> {
        CronFields::decode(&self.encoding)
    }

    /// 下一次触发时刻，结果缓存到下一次 `enqueued` 为止
    pub fn next_fire(&mut self) -> FleetResult<DateTime<Utc>> {
        if let Some(next) = self.next {
            return Ok(next);
        }
        let next = self.fields()?.calculate_next(self.base)?;
        self.next = Some(next);
        Ok(next)
    }

    /// 确认一次触发已入队：补触发时基准移到错过的时刻，否则移到当前时间
    pub fn enqueued(&mut self, now: DateTime<Utc>) -> FleetResult<()> {
        let fired = self.next_fire()?;
        if self.repetitions > 0 {
            self.remaining -= 1;
        }
        self.base = if self.make_up { fired } else { now };
        self.next = None;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_canonicalizes_encoding() {
        let schedule = CronSchedule::new(1, "default", "minutes0,30 hours*", 0).unwrap();
        assert!(schedule.encoding.starts_with("o*d*w*h*m0,30s"));
        let again = CronSchedule::new(1, "default", &schedule.encoding, 0).unwrap();
        assert_eq!(again.encoding, schedule.encoding);
    }

    #[test]
    fn test_enqueued_without_make_up_resets_base_to_now() {
        let past = Utc::now() - Duration::hours(3);
        let mut schedule = CronSchedule::new(1, "default", "o*d*w*h*m*s*", 3)
            .unwrap()
            .with_base(past);
        let now = Utc::now();
        schedule.enqueued(now).unwrap();
        assert_eq!(schedule.remaining, 2);
        assert_eq!(schedule.base, now);
        assert!(schedule.next_fire().unwrap() > now);
    }

    #[test]
    fn test_enqueued_with_make_up_replays_missed_firings() {
        let past = Utc::now() - Duration::hours(3);
        let mut schedule = CronSchedule::new(1, "default", "m*s0", 0)
            .unwrap()
            .with_make_up(true)
            .with_base(past);
        let first = schedule.next_fire().unwrap();
        schedule.enqueued(Utc::now()).unwrap();
        assert_eq!(schedule.base, first);
        let second = schedule.next_fire().unwrap();
        assert_eq!(second - first, Duration::minutes(1));
        assert!(!schedule.is_finished());
    }

    #[test]
    fn test_malformed_encoding_is_rejected() {
        assert!(CronSchedule::new(1, "default", "h99", 1).is_err());
    }
}
