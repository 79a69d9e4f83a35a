use quote::ToTokens;
use syn::{Attribute, Field, FieldsNamed};

pub(crate) fn find_field_mut<'a>(fields: &'a mut FieldsNamed, name: &str) -> Option<&'a mut Field> {
    fields
        .named
        .iter_mut()
        .find(|f| f.ident.as_ref().is_some_and(|i| i == name))
}

/// 缺少同名字段时把 `field` 插到最前，其余字段保持原始顺序
///
/// 返回是否发生了插入。
pub(crate) fn ensure_leading_field(fields: &mut FieldsNamed, field: Field) -> bool {
    let Some(name) = field.ident.as_ref().map(ToString::to_string) else {
        return false;
    };
    if find_field_mut(fields, &name).is_some() {
        return false;
    }
    fields.named.insert(0, field);
    true
}

/// 字段是否已带 `#[serde(flatten)]`
pub(crate) fn has_serde_flatten(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("serde")
            && attr
                .meta
                .to_token_stream()
                .into_iter()
                .any(|tt| tt.to_string().contains("flatten"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_missing_field_first() {
        let mut fields: FieldsNamed = syn::parse_quote!({ amount: i64 });
        assert!(ensure_leading_field(&mut fields, syn::parse_quote!(metadata: Meta)));
        assert!(!ensure_leading_field(&mut fields, syn::parse_quote!(metadata: Meta)));

        let names: Vec<String> = fields
            .named
            .iter()
            .filter_map(|f| f.ident.as_ref().map(ToString::to_string))
            .collect();
        assert_eq!(names, vec!["metadata", "amount"]);
    }

    #[test]
    fn detects_flatten() {
        let field: Field = syn::parse_quote!(#[serde(flatten)] metadata: Meta);
        assert!(has_serde_flatten(&field.attrs));
        let field: Field = syn::parse_quote!(#[serde(default)] metadata: Meta);
        assert!(!has_serde_flatten(&field.attrs));
    }
}
