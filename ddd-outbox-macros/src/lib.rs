//! ddd-outbox 的过程宏
//!
//! 目前只有 `#[domain_event]`：为具名字段结构体注入事件元数据字段，
//! 并生成 `DomainEvent` / `EventSchema` 实现。
//!
mod derive_utils;
mod domain_event;
mod field_utils;

use proc_macro::TokenStream;

/// 领域事件宏
///
/// ```ignore
/// #[domain_event(event_type = "SalesOrderCreated", version = 2)]
/// pub struct SalesOrderCreated {
///     pub order_no: String,
/// }
/// ```
///
/// - 缺少 `metadata` 字段时在最前注入 `#[serde(flatten)] metadata: EventMetadata`；
///   已存在则补上 `#[serde(flatten)]`
/// - 合并/追加派生：Debug, Clone, Serialize, Deserialize
/// - `event_type` 缺省为结构体名，`version` 缺省为 1
#[proc_macro_attribute]
pub fn domain_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    domain_event::expand(attr, item)
}
