use crate::derive_utils::apply_derives;
use crate::field_utils::{ensure_leading_field, find_field_mut, has_serde_flatten};
use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Item, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

const METADATA_FIELD: &str = "metadata";

/// #[domain_event] 宏实现
/// - 仅支持具名字段结构体
/// - 确保存在 `#[serde(flatten)] metadata: ::ddd_outbox::domain_event::EventMetadata`
/// - 生成 `DomainEvent`（metadata 访问器）与 `EventSchema`（EVENT_TYPE/SCHEMA_VERSION）
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    let st = match &mut input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(
                other.span(),
                "#[domain_event] can only be used on struct types",
            )
            .to_compile_error()
            .into();
        }
    };

    let fields = match &mut st.fields {
        syn::Fields::Named(f) => f,
        other => {
            return syn::Error::new(
                other.span(),
                "#[domain_event] supports only named-field structs, e.g., struct E { x: T }",
            )
            .to_compile_error()
            .into();
        }
    };

    let metadata: syn::Field = syn::parse_quote! {
        #[serde(flatten)]
        metadata: ::ddd_outbox::domain_event::EventMetadata
    };
    if !ensure_leading_field(fields, metadata) {
        if let Some(existing) = find_field_mut(fields, METADATA_FIELD) {
            if !has_serde_flatten(&existing.attrs) {
                existing.attrs.push(syn::parse_quote!(#[serde(flatten)]));
            }
        }
    }

    // 合并/追加默认派生：Debug, Clone, Serialize, Deserialize
    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    apply_derives(&mut st.attrs, required);

    let ident = &st.ident;
    let event_type = cfg
        .event_type
        .unwrap_or_else(|| syn::LitStr::new(&ident.to_string(), ident.span()));
    let version = cfg
        .version
        .unwrap_or_else(|| syn::LitInt::new("1", proc_macro2::Span::call_site()));
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    let out = quote! {
        #st

        impl #impl_generics ::ddd_outbox::domain_event::DomainEvent for #ident #ty_generics #where_clause {
            fn metadata(&self) -> &::ddd_outbox::domain_event::EventMetadata {
                &self.metadata
            }
        }

        impl #impl_generics ::ddd_outbox::domain_event::EventSchema for #ident #ty_generics #where_clause {
            const EVENT_TYPE: &'static str = #event_type;
            const SCHEMA_VERSION: u32 = #version;
        }
    };

    TokenStream::from(out)
}

// -------- parsing --------

// 结构体级配置：事件类型名、结构版本
struct EventAttrConfig {
    event_type: Option<syn::LitStr>,
    version: Option<syn::LitInt>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut event_type: Option<syn::LitStr> = None;
        let mut version: Option<syn::LitInt> = None;

        if input.is_empty() {
            return Ok(Self {
                event_type,
                version,
            });
        }

        let pairs: Punctuated<syn::ExprAssign, Token![,]> =
            Punctuated::<syn::ExprAssign, Token![,]>::parse_terminated(input)?;

        for assign in pairs {
            let key_ident = match *assign.left {
                syn::Expr::Path(p) if p.path.segments.len() == 1 => {
                    p.path.segments[0].ident.clone()
                }
                other => return Err(syn::Error::new(other.span(), "invalid attribute key")),
            };
            match key_ident.to_string().as_str() {
                "event_type" => {
                    if event_type.is_some() {
                        return Err(syn::Error::new(
                            key_ident.span(),
                            "duplicate key 'event_type' in attribute",
                        ));
                    }
                    let lit: syn::LitStr = syn::parse2(assign.right.to_token_stream())?;
                    if lit.value().trim().is_empty() {
                        return Err(syn::Error::new(lit.span(), "'event_type' must not be empty"));
                    }
                    event_type = Some(lit);
                }
                "version" => {
                    if version.is_some() {
                        return Err(syn::Error::new(
                            key_ident.span(),
                            "duplicate key 'version' in attribute",
                        ));
                    }
                    let lit: syn::LitInt = syn::parse2(assign.right.to_token_stream())?;
                    if lit.base10_parse::<u32>()? == 0 {
                        return Err(syn::Error::new(lit.span(), "'version' must be at least 1"));
                    }
                    // 去掉后缀，保证落在 `u32` 常量上
                    version = Some(syn::LitInt::new(lit.base10_digits(), lit.span()));
                }
                _ => {
                    return Err(syn::Error::new(
                        key_ident.span(),
                        "unknown key; expected 'event_type' | 'version'",
                    ));
                }
            }
        }

        Ok(Self {
            event_type,
            version,
        })
    }
}
