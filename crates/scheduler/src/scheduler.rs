use async_trait::async_trait;
use chrono::Utc;
use taskfleet_core::{
    Daemon, DaemonContext, DaemonKind, DaemonStatus, FleetError, FleetResult, Instance, Request,
    ScheduleKey, ScheduleRecord, SchedulerConfig, StructuredLogger,
};
use taskfleet_infrastructure::FleetMetrics;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::timer::{callback, FireAt, RecurringTimer};

/// 调度器守护进程
///
/// 主循环每个轮询周期处理一次控制请求，并在 RUNNING 时认领一批无主调度。
/// 认领到的调度登记到计时器，触发由计时器任务执行。
pub struct Scheduler {
    config: SchedulerConfig,
    timer: RecurringTimer,
    timer_handle: Option<JoinHandle<()>>,
    metrics: FleetMetrics,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            timer: RecurringTimer::new(),
            timer_handle: None,
            metrics: FleetMetrics::new(),
        }
    }

    pub fn timer(&self) -> &RecurringTimer {
        &self.timer
    }

    fn dispatcher(&self, ctx: &DaemonContext) -> Dispatcher {
        Dispatcher {
            ctx: ctx.clone(),
            timer: self.timer.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// 处理一个请求，返回主循环是否应当结束
    async fn handle_request(&self, ctx: &DaemonContext, request: Request) -> FleetResult<bool> {
        let status = ctx.status().await;
        let done = match request {
            Request::Pause => {
                if status == DaemonStatus::Running {
                    ctx.set_status(DaemonStatus::Paused).await?;
                }
                false
            }
            Request::Resume => {
                if matches!(status, DaemonStatus::Paused | DaemonStatus::Suspended) {
                    ctx.set_status(DaemonStatus::Running).await?;
                }
                false
            }
            Request::Stop => {
                ctx.set_status(DaemonStatus::Ended).await?;
                true
            }
            Request::Kill => {
                ctx.set_status(DaemonStatus::Killed).await?;
                true
            }
            Request::Reload => {
                self.reload(ctx).await?;
                false
            }
        };
        StructuredLogger::log_request_handled(ctx.id(), request, ctx.status().await);
        Ok(done)
    }

    /// 重新登记本调度器名下被标记为已修改的调度
    async fn reload(&self, ctx: &DaemonContext) -> FleetResult<()> {
        let store = ctx.store();
        let dispatcher = self.dispatcher(ctx);
        let changed = store.schedules.list_changed(ctx.id()).await?;
        info!(daemon.id = ctx.id(), count = changed.len(), "重新加载已修改的调度");

        for record in changed {
            let key = record.key();
            let removed = self.timer.remove_keyed(key);
            debug!(schedule.key = %key, removed, "撤销旧的计时器条目");
            store.schedules.set_changed(key, false).await?;
            dispatcher.arm(record).await?;
        }
        Ok(())
    }

    /// 认领一批无主或归属已失效的调度并登记到计时器
    async fn claim_batch(&self, ctx: &DaemonContext) -> FleetResult<usize> {
        let store = ctx.store();
        let records = store
            .schedules
            .list_claimable(
                self.config.max_claim_batch,
                Utc::now(),
                ctx.config().failure_window(),
            )
            .await?;

        let dispatcher = self.dispatcher(ctx);
        let mut claimed = 0;
        for record in records {
            let key = record.key();
            let previous = record.scheduler_id();
            // 自己的心跳短暂过期时，自己名下的调度也会出现在列表里
            if previous == Some(ctx.id()) {
                continue;
            }
            if !store.schedules.claim(key, previous, ctx.id()).await? {
                debug!(schedule.key = %key, "调度已被其他调度器认领");
                continue;
            }
            if let Some(owner) = previous {
                warn!(schedule.key = %key, previous.owner = owner, "接管已失去存活的调度器的调度");
            }
            claimed += 1;
            dispatcher.arm(record).await?;
        }

        if claimed > 0 {
            self.metrics.record_claimed(claimed as u64);
            info!(daemon.id = ctx.id(), claimed, "认领调度");
        }
        Ok(claimed)
    }
}

#[async_trait]
impl Daemon for Scheduler {
    fn kind(&self) -> DaemonKind {
        DaemonKind::Scheduler
    }

    async fn can_start(&mut self, ctx: &DaemonContext) -> FleetResult<bool> {
        let alive = ctx
            .store()
            .daemons
            .list_alive(
                DaemonKind::Scheduler,
                Utc::now(),
                ctx.config().failure_window(),
            )
            .await?;
        let others: Vec<i64> = alive
            .iter()
            .map(|d| d.id)
            .filter(|id| *id != ctx.id())
            .collect();
        if !others.is_empty() {
            warn!(daemon.id = ctx.id(), alive = ?others, "已有存活的调度器，拒绝启动");
            return Ok(false);
        }
        Ok(true)
    }

    async fn run(&mut self, ctx: &DaemonContext) -> FleetResult<()> {
        self.timer_handle = Some(self.timer.spawn());

        loop {
            if let Some(request) = ctx.pending_request().await? {
                let done = self.handle_request(ctx, request).await?;
                ctx.clear_request(request).await?;
                if done {
                    break;
                }
            }

            if ctx.status().await == DaemonStatus::Running {
                self.claim_batch(ctx).await?;
            }

            ctx.wait_poll_period().await;
        }
        Ok(())
    }

    async fn clean_up(&mut self, ctx: &DaemonContext) -> FleetResult<()> {
        self.timer.cancel();
        if let Some(handle) = self.timer_handle.take() {
            if let Err(e) = handle.await {
                error!(daemon.id = ctx.id(), "计时器任务异常退出: {}", e);
            }
        }

        let released = ctx.store().schedules.release_all(ctx.id()).await?;
        self.metrics.record_released(released);
        info!(daemon.id = ctx.id(), released, "已释放全部调度");
        Ok(())
    }
}

/// 计时器回调持有的调度上下文
#[derive(Clone)]
struct Dispatcher {
    ctx: DaemonContext,
    timer: RecurringTimer,
    metrics: FleetMetrics,
}

impl Dispatcher {
    /// 按调度的下一次触发时刻登记；已完成的释放，编码无效的软删除后释放
    async fn arm(&self, mut record: ScheduleRecord) -> FleetResult<()> {
        let key = record.key();
        match record.next_fire() {
            Ok(Some(next)) => {
                self.schedule(key, next);
                StructuredLogger::log_schedule_claimed(key, self.ctx.id(), next);
                Ok(())
            }
            Ok(None) => self.release(key, "已完成").await,
            Err(e @ FleetError::MalformedCron { .. }) => {
                error!(schedule.key = %key, "调度编码无效，软删除: {}", e);
                self.ctx.store().schedules.soft_delete(key).await?;
                self.release(key, "编码无效").await
            }
            Err(e) => Err(e),
        }
    }

    fn schedule(&self, key: ScheduleKey, when: impl Into<FireAt>) {
        let dispatcher = self.clone();
        self.timer.add_keyed(
            key,
            when,
            callback(move || async move {
                if let Err(e) = dispatcher.fire(key).await {
                    // 释放后由下一轮认领重新登记
                    error!(schedule.key = %key, "调度触发失败: {}", e);
                    dispatcher.release(key, "触发失败").await?;
                }
                Ok(())
            }),
        );
    }

    async fn release(&self, key: ScheduleKey, reason: &str) -> FleetResult<()> {
        if self
            .ctx
            .store()
            .schedules
            .release(key, self.ctx.id())
            .await?
        {
            self.metrics.record_released(1);
            StructuredLogger::log_schedule_released(key, self.ctx.id(), reason);
        }
        Ok(())
    }

    /// 一次触发：重新读取调度、校验归属、创建实例入队并推进调度
    async fn fire(&self, key: ScheduleKey) -> FleetResult<()> {
        match self.ctx.status().await {
            DaemonStatus::Running => {}
            DaemonStatus::Paused => {
                // 暂停期间不入队，推迟一个轮询周期再看
                self.schedule(key, self.ctx.config().poll_interval());
                return Ok(());
            }
            status => {
                debug!(schedule.key = %key, status = %status, "调度器不在运行，丢弃触发");
                return Ok(());
            }
        }

        let store = self.ctx.store();
        let Some(mut record) = store.schedules.get(key).await? else {
            return self.release(key, "已不存在").await;
        };
        if record.is_deleted() {
            return self.release(key, "已删除").await;
        }
        if record.scheduler_id() != Some(self.ctx.id()) {
            debug!(schedule.key = %key, owner = ?record.scheduler_id(), "调度已不归本调度器所有");
            return Ok(());
        }

        let next = match record.next_fire() {
            Ok(Some(next)) => next,
            Ok(None) => return self.release(key, "已完成").await,
            Err(_) => return self.arm(record).await,
        };
        let now = Utc::now();
        if next >= now {
            // 尚未到期，或调度在登记后被修改过，按新的时刻重新登记
            self.schedule(key, next);
            return Ok(());
        }

        let task = store.get_task(record.task_id()).await?;
        let instance = store
            .instances
            .create(&Instance::for_schedule(&task, key))
            .await?;
        store.enqueue(&instance, record.queue()).await?;
        self.metrics.record_enqueued();
        StructuredLogger::log_instance_enqueued(instance.id, task.id, record.queue());

        record.enqueued(now)?;
        store.schedules.save_progress(&record).await?;
        debug!(schedule.key = %key, remaining = record.remaining(), "调度已推进");

        if record.is_finished() {
            self.release(key, "已完成").await
        } else {
            self.arm(record).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskfleet_core::DaemonConfig;

    #[test]
    fn test_scheduler_kind_and_valid_requests() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        assert_eq!(scheduler.kind(), DaemonKind::Scheduler);
        assert!(scheduler.kind().accepts(Request::Reload));
        assert_eq!(scheduler.timer().pending(), 0);
        assert!(DaemonConfig::default().poll_interval().as_millis() > 0);
    }
}
