//! 进程内事件总线（EventBus）
//!
//! 在调用方任务上按注册顺序依次执行处理器：
//! - 单个处理器返回错误只记录日志，不影响其余处理器与其余事件；
//! - 处理器 panic 被捕获并记录，总线继续工作；
//! - 未启动（或已停止）的总线拒绝发布，交由 outbox 重试。
//!
use super::context::HandlerContext;
use super::handler::{EventHandler, HandledEventType};
use super::registry::HandlerRegistry;
use crate::domain_event::{AnyEvent, SharedEvent};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 事件投递端口：outbox 处理器只依赖这一操作
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, ctx: &HandlerContext, events: &[SharedEvent]) -> Result<()>;
}

#[async_trait]
impl<T> EventPublisher for Arc<T>
where
    T: EventPublisher + ?Sized,
{
    async fn publish(&self, ctx: &HandlerContext, events: &[SharedEvent]) -> Result<()> {
        (**self).publish(ctx, events).await
    }
}

#[derive(Default)]
pub struct EventBus {
    registry: HandlerRegistry,
    running: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("event bus started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("event bus stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 订阅：`event_types` 为空时使用处理器自身声明的订阅类型
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>, event_types: &[&str]) {
        let types = if event_types.is_empty() {
            handler.handled_event_type()
        } else {
            HandledEventType::from_types(event_types.iter().copied())
        };
        tracing::debug!(handler = handler.handler_name(), ?types, "handler subscribed");
        self.registry.register(handler, types);
    }

    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        self.registry.unregister(handler)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 发布单个事件
    pub async fn publish_event(&self, ctx: &HandlerContext, event: &dyn AnyEvent) -> Result<()> {
        self.ensure_running()?;
        self.dispatch(ctx, event).await;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(DomainError::event_bus("event bus is not running"))
        }
    }

    async fn dispatch(&self, ctx: &HandlerContext, event: &dyn AnyEvent) {
        let handlers = self.registry.get_handlers(event.event_type());
        if handlers.is_empty() {
            tracing::debug!(
                event_id = %event.event_id(),
                event_type = event.event_type(),
                "no handler subscribed"
            );
            return;
        }

        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(ctx, event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(
                        handler = handler.handler_name(),
                        event_id = %event.event_id(),
                        event_type = event.event_type(),
                        "event handled"
                    );
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        handler = handler.handler_name(),
                        event_id = %event.event_id(),
                        event_type = event.event_type(),
                        error = format!("{err:#}"),
                        "event handler failed"
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        handler = handler.handler_name(),
                        event_id = %event.event_id(),
                        event_type = event.event_type(),
                        panic = panic_message(panic.as_ref()),
                        "event handler panicked"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, ctx: &HandlerContext, events: &[SharedEvent]) -> Result<()> {
        self.ensure_running()?;
        for event in events {
            self.dispatch(ctx, event.as_ref()).await;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
