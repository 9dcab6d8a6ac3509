use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use taskfleet_core::{FleetResult, ScheduleKey};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// 到期后在计时器任务中执行的回调，需要继续重复时由回调自己重新登记
pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, FleetResult<()>> + Send>;

/// 把异步闭包包装为计时器回调
pub fn callback<F, Fut>(f: F) -> TimerCallback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = FleetResult<()>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// 触发时刻：绝对时间或相对当前的延迟
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FireAt {
    At(DateTime<Utc>),
    After(chrono::Duration),
}

impl FireAt {
    fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            FireAt::At(at) => at,
            FireAt::After(delay) => now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl From<DateTime<Utc>> for FireAt {
    fn from(at: DateTime<Utc>) -> Self {
        FireAt::At(at)
    }
}

impl From<chrono::Duration> for FireAt {
    fn from(delay: chrono::Duration) -> Self {
        FireAt::After(delay)
    }
}

impl From<std::time::Duration> for FireAt {
    fn from(delay: std::time::Duration) -> Self {
        FireAt::After(chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX))
    }
}

/// 以秒为单位的延迟，负数表示立即触发
impl From<f64> for FireAt {
    fn from(seconds: f64) -> Self {
        let millis = (seconds * 1000.0).round() as i64;
        FireAt::After(chrono::Duration::milliseconds(millis))
    }
}

struct Entry {
    fire_at: DateTime<Utc>,
    seq: u64,
    key: Option<ScheduleKey>,
    callback: TimerCallback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // 同一时刻按登记顺序触发
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct TimerInner {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
    wake: Notify,
    cancelled: AtomicBool,
}

/// 进程内的最小堆计时器
///
/// 单个循环按触发时刻顺序依次执行回调。堆为空时一直等待，新登记的条目成为最早
/// 的一个或调用 `cancel` 时提前唤醒。回调出错或 panic 只记录日志，不影响计时器。
#[derive(Clone)]
pub struct RecurringTimer {
    inner: Arc<TimerInner>,
}

impl RecurringTimer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TimerInner {
                heap: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                wake: Notify::new(),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Reverse<Entry>>> {
        // 回调不在持锁期间执行，锁中毒时堆本身仍然完整
        self.inner
            .heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, when: impl Into<FireAt>, callback: TimerCallback) -> DateTime<Utc> {
        self.push(None, when.into(), callback)
    }

    /// 带调度标识登记，之后可用 `remove_keyed` 撤销
    ///
    /// 每个调度最多保留一个条目，同一标识的旧条目被新条目替换。
    pub fn add_keyed(
        &self,
        key: ScheduleKey,
        when: impl Into<FireAt>,
        callback: TimerCallback,
    ) -> DateTime<Utc> {
        self.push(Some(key), when.into(), callback)
    }

    fn push(&self, key: Option<ScheduleKey>, when: FireAt, callback: TimerCallback) -> DateTime<Utc> {
        let fire_at = when.resolve(Utc::now());
        if self.is_cancelled() {
            debug!("计时器已取消，忽略新条目");
            return fire_at;
        }

        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let earliest = {
            let mut heap = self.heap();
            if let Some(key) = key {
                let before = heap.len();
                heap.retain(|Reverse(entry)| entry.key != Some(key));
                if heap.len() < before {
                    debug!(schedule.key = %key, "替换调度的旧计时器条目");
                }
            }
            let earliest = heap
                .peek()
                .map(|Reverse(head)| fire_at < head.fire_at)
                .unwrap_or(true);
            heap.push(Reverse(Entry {
                fire_at,
                seq,
                key,
                callback,
            }));
            earliest
        };
        if earliest {
            self.inner.wake.notify_one();
        }
        fire_at
    }

    /// 撤销某个调度尚未触发的全部条目，返回撤销数量
    pub fn remove_keyed(&self, key: ScheduleKey) -> usize {
        let mut heap = self.heap();
        let before = heap.len();
        heap.retain(|Reverse(entry)| entry.key != Some(key));
        before - heap.len()
    }

    pub fn pending(&self) -> usize {
        self.heap().len()
    }

    pub fn contains_key(&self, key: ScheduleKey) -> bool {
        self.heap()
            .iter()
            .any(|Reverse(entry)| entry.key == Some(key))
    }

    /// 停止循环，尚未触发的回调全部丢弃
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, AtomicOrdering::SeqCst);
        self.heap().clear();
        self.inner.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(AtomicOrdering::SeqCst)
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let timer = self.clone();
        tokio::spawn(async move { timer.run().await })
    }

    pub async fn run(&self) {
        debug!("计时器启动");
        while !self.is_cancelled() {
            let head = self.heap().peek().map(|Reverse(entry)| entry.fire_at);
            let Some(fire_at) = head else {
                self.inner.wake.notified().await;
                continue;
            };

            let now = Utc::now();
            if fire_at > now {
                let pause = (fire_at - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.inner.wake.notified() => {}
                }
                continue;
            }

            let due = self.heap().pop();
            if let Some(Reverse(entry)) = due {
                self.invoke(entry).await;
            }
        }
        debug!("计时器已停止");
    }

    async fn invoke(&self, entry: Entry) {
        let key = entry.key;
        let callback = entry.callback;
        let outcome = AssertUnwindSafe(async move { callback().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(schedule.key = ?key, "计时器回调出错: {}", e),
            Err(_) => error!(schedule.key = ?key, "计时器回调发生 panic"),
        }
    }
}

impl Default for RecurringTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskfleet_core::FleetError;
    use tokio::sync::mpsc;

    fn record(tx: &mpsc::UnboundedSender<u32>, value: u32) -> TimerCallback {
        let tx = tx.clone();
        callback(move || async move {
            let _ = tx.send(value);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_fires_in_time_order() {
        let timer = RecurringTimer::new();
        let handle = timer.spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.add(0.15, record(&tx, 3));
        timer.add(Duration::from_millis(50), record(&tx, 1));
        timer.add(chrono::Duration::milliseconds(100), record(&tx, 2));

        let mut fired = Vec::new();
        for _ in 0..3 {
            fired.push(
                tokio::time::timeout(Duration::from_secs(2), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(fired, vec![1, 2, 3]);

        timer.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_earlier_entry_wakes_sleeping_loop() {
        let timer = RecurringTimer::new();
        let handle = timer.spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.add(Duration::from_secs(60), record(&tx, 60));
        tokio::time::sleep(Duration::from_millis(20)).await;
        timer.add(Utc::now(), record(&tx, 0));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, 0);
        assert_eq!(timer.pending(), 1);

        timer.cancel();
        handle.await.unwrap();
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test]
    async fn test_failing_callbacks_do_not_stop_timer() {
        let timer = RecurringTimer::new();
        let handle = timer.spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.add(
            0.0,
            callback(|| async { Err(FleetError::Internal("bad".into())) }),
        );
        timer.add(
            0.01,
            callback(|| async {
                if true {
                    panic!("callback panicked");
                }
                Ok(())
            }),
        );
        timer.add(0.05, record(&tx, 7));

        let value = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);

        timer.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_callbacks() {
        let timer = RecurringTimer::new();
        let handle = timer.spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.add(0.2, record(&tx, 1));
        timer.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
        // 取消后的登记被忽略
        timer.add(0.0, record(&tx, 2));
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test]
    async fn test_remove_keyed() {
        let timer = RecurringTimer::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        timer.add_keyed(ScheduleKey::Cron(1), 10.0, record(&tx, 1));
        timer.add_keyed(ScheduleKey::Interval(1), 10.0, record(&tx, 2));
        timer.add(10.0, record(&tx, 3));

        assert!(timer.contains_key(ScheduleKey::Cron(1)));
        assert_eq!(timer.remove_keyed(ScheduleKey::Cron(1)), 1);
        assert!(!timer.contains_key(ScheduleKey::Cron(1)));
        assert_eq!(timer.pending(), 2);
    }

    #[tokio::test]
    async fn test_add_keyed_keeps_one_entry_per_schedule() {
        let timer = RecurringTimer::new();
        let handle = timer.spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = ScheduleKey::Interval(7);

        // 回调执行期间条目已出堆，回调自己重新登记的同时外部又登记了一次
        let rearm = timer.clone();
        let inner_tx = tx.clone();
        timer.add_keyed(
            key,
            0.0,
            callback(move || async move {
                let _ = inner_tx.send(1);
                tokio::time::sleep(Duration::from_millis(100)).await;
                rearm.add_keyed(key, 30.0, record(&inner_tx, 2));
                Ok(())
            }),
        );

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, 1);
        assert!(!timer.contains_key(key));
        assert_eq!(timer.remove_keyed(key), 0);
        timer.add_keyed(key, 20.0, record(&tx, 3));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(timer.pending(), 1);
        assert!(timer.contains_key(key));

        timer.cancel();
        handle.await.unwrap();
    }
}
