//! 常用升级原语
//!
//! 每个函数返回一个 `JsonObject -> DomainResult<JsonObject>` 的变换，可直接交给
//! [`FnUpgrader`](super::FnUpgrader)，也可以用 [`compose`] 串成一步升级。
//!
use super::upgrader::JsonObject;
use crate::error::{DomainError, DomainResult as Result};
use serde_json::Value;
use std::fmt::Display;

/// 文档变换的装箱形态，便于放入集合后组合
pub type DocumentTransform = Box<dyn Fn(JsonObject) -> Result<JsonObject> + Send + Sync>;

/// 依次应用多个变换
pub fn compose(
    steps: Vec<DocumentTransform>,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync {
    move |document| steps.iter().try_fold(document, |doc, step| step(doc))
}

/// 字段不存在时以默认值补齐；已存在则保持原值
pub fn add_field(
    name: impl Into<String>,
    default: Value,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync {
    let name = name.into();
    move |mut document| {
        if !document.contains_key(&name) {
            document.insert(name.clone(), default.clone());
        }
        Ok(document)
    }
}

pub fn remove_field(
    name: impl Into<String>,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync {
    let name = name.into();
    move |mut document| {
        document.remove(&name);
        Ok(document)
    }
}

/// 重命名字段；源字段不存在时不做任何事
pub fn rename_field(
    from: impl Into<String>,
    to: impl Into<String>,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync {
    let from = from.into();
    let to = to.into();
    move |mut document| {
        if let Some(value) = document.remove(&from) {
            document.insert(to.clone(), value);
        }
        Ok(document)
    }
}

/// 变换字段的值；字段不存在时跳过
pub fn transform_field<F>(
    name: impl Into<String>,
    transform: F,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    let name = name.into();
    move |mut document| {
        if let Some(value) = document.remove(&name) {
            let value = transform(value)?;
            document.insert(name.clone(), value);
        }
        Ok(document)
    }
}

/// 把一个字段拆成多个：移除源字段，合入 `split` 返回的所有字段
pub fn split_field<F>(
    name: impl Into<String>,
    split: F,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync
where
    F: Fn(Value) -> Result<JsonObject> + Send + Sync,
{
    let name = name.into();
    move |mut document| {
        if let Some(value) = document.remove(&name) {
            document.extend(split(value)?);
        }
        Ok(document)
    }
}

/// 把多个字段合成一个：`merge` 收到的是源字段中实际存在的那部分
pub fn merge_fields<F>(
    sources: Vec<String>,
    target: impl Into<String>,
    merge: F,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync
where
    F: Fn(JsonObject) -> Result<Value> + Send + Sync,
{
    let target = target.into();
    move |mut document| {
        let mut picked = JsonObject::new();
        for source in &sources {
            if let Some(value) = document.remove(source) {
                picked.insert(source.clone(), value);
            }
        }
        let merged = merge(picked)?;
        document.insert(target.clone(), merged);
        Ok(document)
    }
}

/// 转换字段类型，失败时报告字段名
pub fn change_field_type<F, E>(
    name: impl Into<String>,
    convert: F,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync
where
    F: Fn(&Value) -> std::result::Result<Value, E> + Send + Sync,
    E: Display,
{
    let name = name.into();
    move |mut document| {
        if let Some(value) = document.get(&name) {
            let converted = convert(value).map_err(|e| DomainError::Parse {
                reason: format!("failed to convert field {name}: {e}"),
            })?;
            document.insert(name.clone(), converted);
        }
        Ok(document)
    }
}

/// 把若干顶层字段移入新的嵌套对象 `target`
pub fn wrap_in_object(
    fields: Vec<String>,
    target: impl Into<String>,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync {
    let target = target.into();
    move |mut document| {
        let mut nested = JsonObject::new();
        for field in &fields {
            if let Some(value) = document.remove(field) {
                nested.insert(field.clone(), value);
            }
        }
        document.insert(target.clone(), Value::Object(nested));
        Ok(document)
    }
}

/// 把嵌套对象 `source` 的字段提升到顶层；同名字段以嵌套对象中的为准
pub fn unwrap_from_object(
    source: impl Into<String>,
) -> impl Fn(JsonObject) -> Result<JsonObject> + Send + Sync {
    let source = source.into();
    move |mut document| {
        match document.remove(&source) {
            Some(Value::Object(nested)) => document.extend(nested),
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(DomainError::Parse {
                    reason: format!("field {source} is not an object"),
                });
            }
        }
        Ok(document)
    }
}
