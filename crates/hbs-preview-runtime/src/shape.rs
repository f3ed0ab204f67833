use serde::Deserialize;
use std::collections::BTreeMap;

/// Maximum nesting of factory / nested-key wrappers around a recipe.
pub const MAX_RECIPE_DEPTH: usize = 10;

/// Recipe field name -> value handle, after merging.
pub type RecipeFields = BTreeMap<String, u32>;

/// What a script value looks like, as reported by the realm.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ValueKind {
    Empty,
    Function,
    Promise,
    Value,
    Object {
        #[serde(default)]
        fields: RecipeFields,
        #[serde(default)]
        nested: Vec<(String, u32)>,
    },
}

/// How an exported value contributes to the recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportShape {
    /// A callable: invoke with the processing context, then recurse.
    Factory,
    /// An object exposing `getPreviewRecipe` / `getPreviewConfig` /
    /// `getPreviewData` / `default`; its own recipe fields come first and
    /// each nested value is merged over them in that order.
    Nested {
        fields: RecipeFields,
        nested: Vec<(String, u32)>,
    },
    Plain(RecipeFields),
    Empty,
}

impl From<ValueKind> for ExportShape {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Function => Self::Factory,
            ValueKind::Object { fields, nested } if nested.is_empty() => Self::Plain(fields),
            ValueKind::Object { fields, nested } => Self::Nested { fields, nested },
            ValueKind::Empty | ValueKind::Value | ValueKind::Promise => Self::Empty,
        }
    }
}

/// Shallow merge: fields present in `later` override `base`.
pub fn merge(base: &mut RecipeFields, later: RecipeFields) {
    base.extend(later);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        let kind: ValueKind = serde_json::from_str(r#"{"kind":"function"}"#).unwrap();
        assert_eq!(ExportShape::from(kind), ExportShape::Factory);

        let kind: ValueKind =
            serde_json::from_str(r#"{"kind":"object","fields":{"title":3},"nested":[]}"#).unwrap();
        assert_eq!(
            ExportShape::from(kind),
            ExportShape::Plain(RecipeFields::from([("title".to_string(), 3)]))
        );

        let kind: ValueKind = serde_json::from_str(
            r#"{"kind":"object","fields":{},"nested":[["getPreviewData",4],["default",5]]}"#,
        )
        .unwrap();
        match ExportShape::from(kind) {
            ExportShape::Nested { nested, .. } => {
                assert_eq!(nested, vec![("getPreviewData".to_string(), 4), ("default".to_string(), 5)]);
            }
            other => panic!("unexpected shape {other:?}"),
        }

        let kind: ValueKind = serde_json::from_str(r#"{"kind":"value"}"#).unwrap();
        assert_eq!(ExportShape::from(kind), ExportShape::Empty);
    }

    #[test]
    fn test_merge_later_wins() {
        let mut base = RecipeFields::from([("title".to_string(), 1), ("data".to_string(), 2)]);
        merge(&mut base, RecipeFields::from([("data".to_string(), 7), ("helpers".to_string(), 8)]));
        assert_eq!(base["title"], 1);
        assert_eq!(base["data"], 7);
        assert_eq!(base["helpers"], 8);
    }
}
