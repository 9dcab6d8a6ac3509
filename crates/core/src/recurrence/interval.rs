use chrono::{DateTime, Duration, Utc};

/// 固定周期的下一次触发时刻
///
/// 先前进一个周期。`make_up` 为 false 时跳过所有已错过的周期，结果不早于 `now`。
pub fn advance_interval(
    next: DateTime<Utc>,
    now: DateTime<Utc>,
    period: Duration,
    make_up: bool,
) -> DateTime<Utc> {
    let advanced = next + period;
    if make_up || advanced >= now || period <= Duration::zero() {
        return advanced;
    }
    let behind = (now - advanced).num_milliseconds();
    let step = period.num_milliseconds().max(1);
    let skipped = (behind + step - 1) / step;
    advanced + Duration::milliseconds(skipped * step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_up_advances_one_period() {
        let now = Utc::now();
        let next = now - Duration::seconds(100);
        let advanced = advance_interval(next, now, Duration::seconds(10), true);
        assert_eq!(advanced, next + Duration::seconds(10));
        assert!(advanced < now);
    }

    #[test]
    fn test_skip_lands_at_or_after_now() {
        let now = Utc::now();
        for behind in [1, 9, 10, 11, 99, 100, 3601] {
            let next = now - Duration::seconds(behind);
            let advanced = advance_interval(next, now, Duration::seconds(10), false);
            assert!(advanced >= now, "behind {behind}");
            assert!(advanced - now < Duration::seconds(10), "behind {behind}");
            // 仍在原周期网格上
            assert_eq!((advanced - next).num_milliseconds() % 10_000, 0);
        }
    }

    #[test]
    fn test_future_next_moves_one_period() {
        let now = Utc::now();
        let advanced = advance_interval(now, now, Duration::seconds(5), false);
        assert_eq!(advanced, now + Duration::seconds(5));
    }
}
