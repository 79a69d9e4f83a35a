//! 处理器注册表（HandlerRegistry）
//!
//! 按事件类型分桶，另设通配桶；同一处理器在同一桶内只出现一次。
//!
use super::handler::{EventHandler, HandledEventType};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
pub struct HandlerRegistry {
    buckets: RwLock<Buckets>,
}

#[derive(Default)]
struct Buckets {
    by_type: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    all: Vec<Arc<dyn EventHandler>>,
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn push_unique(bucket: &mut Vec<Arc<dyn EventHandler>>, handler: &Arc<dyn EventHandler>) {
    if !bucket.iter().any(|h| same_handler(h, handler)) {
        bucket.push(handler.clone());
    }
}

impl HandlerRegistry {
    /// 按各处理器自身声明的订阅类型构建
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let registry = Self::default();
        for h in handlers {
            let types = h.handled_event_type();
            registry.register(h, types);
        }
        registry
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>, event_types: HandledEventType) {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        match event_types {
            HandledEventType::All => push_unique(&mut buckets.all, &handler),
            HandledEventType::One(t) => {
                push_unique(buckets.by_type.entry(t).or_default(), &handler);
            }
            HandledEventType::Many(ts) => {
                for t in ts {
                    push_unique(buckets.by_type.entry(t).or_default(), &handler);
                }
            }
        }
    }

    /// 从所有桶中移除，返回是否确有移除
    pub fn unregister(&self, handler: &Arc<dyn EventHandler>) -> bool {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;

        let before = buckets.all.len();
        buckets.all.retain(|h| !same_handler(h, handler));
        removed |= buckets.all.len() != before;

        for list in buckets.by_type.values_mut() {
            let before = list.len();
            list.retain(|h| !same_handler(h, handler));
            removed |= list.len() != before;
        }
        buckets.by_type.retain(|_, list| !list.is_empty());
        removed
    }

    /// 先按注册顺序返回该类型的处理器，再追加通配处理器
    pub fn get_handlers(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut merged: Vec<Arc<dyn EventHandler>> = Vec::new();
        if let Some(list) = buckets.by_type.get(event_type) {
            merged.extend(list.iter().cloned());
        }
        merged.extend(buckets.all.iter().cloned());
        merged
    }

    /// 全部处理器，按实例去重
    pub fn get_all_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut unique: Vec<Arc<dyn EventHandler>> = Vec::new();
        for h in buckets.by_type.values().flatten().chain(buckets.all.iter()) {
            push_unique(&mut unique, h);
        }
        unique
    }

    pub fn is_empty(&self) -> bool {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.all.is_empty() && buckets.by_type.is_empty()
    }
}
