//! 事件处理器（EventHandler）
//!
//! 定义消费某类/多类/全部事件的处理逻辑与元信息（名称、订阅类型）。
//!
use super::context::HandlerContext;
use crate::domain_event::AnyEvent;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

impl HandledEventType {
    /// 由显式类型列表构造，空列表即通配
    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut types: Vec<String> = types.into_iter().map(Into::into).collect();
        match types.len() {
            0 => HandledEventType::All,
            1 => HandledEventType::One(types.remove(0)),
            _ => HandledEventType::Many(types),
        }
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志与幂等键）
    fn handler_name(&self) -> &str;
    /// 返回该处理器支持的事件类型
    fn handled_event_type(&self) -> HandledEventType;
    /// 处理事件
    async fn handle(&self, ctx: &HandlerContext, event: &dyn AnyEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<T> EventHandler for Arc<T>
where
    T: EventHandler + ?Sized,
{
    fn handler_name(&self) -> &str {
        (**self).handler_name()
    }

    fn handled_event_type(&self) -> HandledEventType {
        (**self).handled_event_type()
    }

    async fn handle(&self, ctx: &HandlerContext, event: &dyn AnyEvent) -> anyhow::Result<()> {
        (**self).handle(ctx, event).await
    }
}
