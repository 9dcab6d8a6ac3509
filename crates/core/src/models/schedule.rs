use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::CronSchedule;
use crate::errors::{FleetError, FleetResult};
use crate::recurrence::advance_interval;

/// 调度记录的标识，区分两张调度表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ScheduleKey {
    Interval(i64),
    Cron(i64),
}

impl ScheduleKey {
    pub fn id(&self) -> i64 {
        match self {
            ScheduleKey::Interval(id) | ScheduleKey::Cron(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleKey::Interval(_) => "interval",
            ScheduleKey::Cron(_) => "cron",
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "interval" => Some(ScheduleKey::Interval(id)),
            "cron" => Some(ScheduleKey::Cron(id)),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// 固定周期调度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub task_id: i64,
    pub queue: String,
    /// 0 表示无限次
    pub repetitions: i64,
    pub remaining: i64,
    pub period_seconds: i64,
    pub next: Option<DateTime<Utc>>,
    pub make_up: bool,
    pub scheduler_id: Option<i64>,
    pub changed: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        task_id: i64,
        queue: impl Into<String>,
        period_seconds: i64,
        repetitions: i64,
        first: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            task_id,
            queue: queue.into(),
            repetitions,
            remaining: repetitions,
            period_seconds,
            next: Some(first),
            make_up: false,
            scheduler_id: None,
            changed: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_make_up(mut self, make_up: bool) -> Self {
        self.make_up = make_up;
        self
    }

    pub fn key(&self) -> ScheduleKey {
        ScheduleKey::Interval(self.id)
    }

    pub fn period(&self) -> Duration {
        Duration::seconds(self.period_seconds)
    }

    pub fn is_finished(&self) -> bool {
        self.next.is_none() || (self.repetitions > 0 && self.remaining <= 0)
    }

    /// 确认一次触发已入队后推进状态，触发时刻必须严格早于 `now`
    pub fn enqueued(&mut self, now: DateTime<Utc>) -> FleetResult<()> {
        let next = self.next.ok_or_else(|| {
            FleetError::ScheduleState(format!("调度 {} 没有下一次触发时间", self.key()))
        })?;
        if next >= now {
            return Err(FleetError::ScheduleState(format!(
                "调度 {} 的触发时间 {next} 不早于当前时间 {now}",
                self.key()
            )));
        }

        if self.repetitions > 0 {
            self.remaining -= 1;
        }
        self.updated_at = now;
        if self.is_finished() {
            self.next = None;
            return Ok(());
        }
        if self.period_seconds > 0 {
            self.next = Some(advance_interval(next, now, self.period(), self.make_up));
        }
        Ok(())
    }
}

/// 两种调度记录的统一视图
#[derive(Debug, Clone)]
pub enum ScheduleRecord {
    Interval(Schedule),
    Cron(CronSchedule),
}

impl ScheduleRecord {
    pub fn key(&self) -> ScheduleKey {
        match self {
            ScheduleRecord::Interval(s) => s.key(),
            ScheduleRecord::Cron(c) => c.key(),
        }
    }

    pub fn task_id(&self) -> i64 {
        match self {
            ScheduleRecord::Interval(s) => s.task_id,
            ScheduleRecord::Cron(c) => c.task_id,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            ScheduleRecord::Interval(s) => &s.queue,
            ScheduleRecord::Cron(c) => &c.queue,
        }
    }

    pub fn scheduler_id(&self) -> Option<i64> {
        match self {
            ScheduleRecord::Interval(s) => s.scheduler_id,
            ScheduleRecord::Cron(c) => c.scheduler_id,
        }
    }

    pub fn remaining(&self) -> i64 {
        match self {
            ScheduleRecord::Interval(s) => s.remaining,
            ScheduleRecord::Cron(c) => c.remaining,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            ScheduleRecord::Interval(s) => s.deleted,
            ScheduleRecord::Cron(c) => c.deleted,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            ScheduleRecord::Interval(s) => s.is_finished(),
            ScheduleRecord::Cron(c) => c.is_finished(),
        }
    }

    /// 下一次触发时刻，已完成时为 None；CRON 编码无效时返回错误
    pub fn next_fire(&mut self) -> FleetResult<Option<DateTime<Utc>>> {
        if self.is_finished() {
            return Ok(None);
        }
        match self {
            ScheduleRecord::Interval(s) => Ok(s.next),
            ScheduleRecord::Cron(c) => c.next_fire().map(Some),
        }
    }

    pub fn enqueued(&mut self, now: DateTime<Utc>) -> FleetResult<()> {
        match self {
            ScheduleRecord::Interval(s) => s.enqueued(now),
            ScheduleRecord::Cron(c) => c.enqueued(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_missed_periods_without_make_up() {
        let now = Utc::now();
        let mut schedule = Schedule::new(1, "default", 60, 0, now - Duration::hours(5));
        schedule.enqueued(now).unwrap();
        let next = schedule.next.unwrap();
        assert!(next >= now);
        assert!(next - now < Duration::seconds(60));
        assert_eq!(schedule.remaining, 0);
        assert!(!schedule.is_finished());
    }

    #[test]
    fn test_make_up_keeps_missed_firings() {
        let now = Utc::now();
        let first = now - Duration::seconds(100);
        let mut schedule = Schedule::new(1, "default", 10, 10, first).with_make_up(true);
        for fired in 1..=10 {
            schedule.enqueued(now).unwrap();
            assert_eq!(schedule.remaining, 10 - fired);
        }
        assert!(schedule.is_finished());
        assert!(schedule.next.is_none());
    }

    #[test]
    fn test_enqueued_rejects_future_firing() {
        let now = Utc::now();
        let mut schedule = Schedule::new(1, "default", 10, 3, now + Duration::seconds(30));
        assert!(matches!(
            schedule.enqueued(now),
            Err(FleetError::ScheduleState(_))
        ));
        assert_eq!(schedule.remaining, 3);
    }

    #[test]
    fn test_enqueued_rejects_firing_at_now() {
        let now = Utc::now();
        let mut schedule = Schedule::new(1, "default", 10, 3, now);
        assert!(matches!(
            schedule.enqueued(now),
            Err(FleetError::ScheduleState(_))
        ));
        assert_eq!(schedule.next, Some(now));
        assert_eq!(schedule.remaining, 3);

        let later = now + Duration::milliseconds(1);
        schedule.enqueued(later).unwrap();
        assert_eq!(schedule.remaining, 2);
        assert_eq!(schedule.next, Some(now + Duration::seconds(10)));
    }

    #[test]
    fn test_schedule_key_display() {
        assert_eq!(ScheduleKey::Cron(7).to_string(), "cron:7");
        assert_eq!(
            ScheduleKey::from_parts("interval", 3),
            Some(ScheduleKey::Interval(3))
        );
        assert_eq!(ScheduleKey::from_parts("weekly", 3), None);
    }
}
