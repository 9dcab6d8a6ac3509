use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::DaemonContext;
use crate::errors::FleetResult;
use crate::models::Request;

/// 把进程信号转换为对本守护进程的请求：SIGINT → STOP，SIGTERM → KILL
pub fn forward_signals(ctx: DaemonContext) -> FleetResult<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        Ok(tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    received = sigint.recv() => match received {
                        Some(()) => Request::Stop,
                        None => break,
                    },
                    received = sigterm.recv() => match received {
                        Some(()) => Request::Kill,
                        None => break,
                    },
                };
                submit(&ctx, request).await;
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                submit(&ctx, Request::Stop).await;
            }
        }))
    }
}

async fn submit(ctx: &DaemonContext, request: Request) {
    info!(daemon.id = ctx.id(), request = %request, "收到进程信号");
    match ctx.make_request(request).await {
        Ok(true) => {}
        Ok(false) => warn!(daemon.id = ctx.id(), request = %request, "守护进程拒绝了信号对应的请求"),
        Err(e) => error!(daemon.id = ctx.id(), "写入信号请求失败: {}", e),
    }
}
