//! Resolve mapping rules against items: which marketplace category an item
//! belongs to, and which value a mapped field takes.

use {marketsync_common::value, serde_json::Value};

use crate::{
    Result,
    expr::ExpressionEvaluator,
    store::ItemStore,
    types::{AttributeMapping, CategoryMapping, Channel, Item},
};

/// Read an attribute by identifier.
///
/// `$id`, `$identifier`, `$typeId` and `$name` address item fields. An
/// `attr#lang` suffix selects one language of a localized value; a plain
/// identifier on a localized value picks `language`.
pub fn read_attribute(item: &Item, ident: &str, language: &str) -> Option<Value> {
    let out = match ident {
        "$id" => Value::from(item.id),
        "$identifier" => Value::from(item.identifier.clone()),
        "$typeId" => Value::from(item.type_id),
        "$name" => Value::from(item.name.get(language)?.clone()),
        _ => {
            let (attr, lang) = ident.split_once('#').unwrap_or((ident, language));
            match item.values.get(attr)? {
                Value::Object(localized) if localized.contains_key(lang) => localized[lang].clone(),
                other => other.clone(),
            }
        },
    };
    (!out.is_null()).then_some(out)
}

/// Value a field mapping produces for `item`. `None` when the mapping is
/// absent or yields nothing.
///
/// Precedence: expression, then attribute reference, then constant.
pub async fn value_by_mapping(
    evaluator: &dyn ExpressionEvaluator,
    channel: &Channel,
    item: &Item,
    mapping: Option<&AttributeMapping>,
    language: &str,
) -> Result<Option<Value>> {
    let Some(mapping) = mapping else {
        return Ok(None);
    };
    let out = if let Some(expr) = mapping.expr.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(evaluator.evaluate(channel, item, expr).await?)
    } else if let Some(ident) = mapping.attr_ident.as_deref().filter(|a| !a.is_empty()) {
        read_attribute(item, ident, language)
    } else {
        mapping.value.clone()
    };
    Ok(out.filter(|v| !v.is_null()))
}

/// First category mapping that accepts `item`, with its channel category id.
///
/// A mapping accepts an item when it is eligible, lists the item's type, and
/// one of its criteria holds: a `visible` node on the item's path (or on the
/// path of an item related through `visible_relation`), a truthy
/// `category_expr`, or `category_attr` loosely equal to `category_attr_value`.
pub async fn resolve_category<'c>(
    evaluator: &dyn ExpressionEvaluator,
    store: &dyn ItemStore,
    channel: &'c Channel,
    item: &Item,
) -> Result<Option<(&'c str, &'c CategoryMapping)>> {
    let type_id = item.type_id.to_string();
    for (key, mapping) in &channel.mappings {
        if !mapping.is_eligible() || !mapping.valid.contains(&type_id) {
            continue;
        }
        let id = if mapping.id.is_empty() {
            key.as_str()
        } else {
            mapping.id.as_str()
        };
        if !mapping.visible.is_empty() {
            if let Some(relation_id) = mapping.visible_relation {
                let sources = store
                    .find_relation_sources(&item.tenant_id, relation_id, item.id)
                    .await?;
                if sources.iter().any(|s| on_visible_path(mapping, s)) {
                    return Ok(Some((id, mapping)));
                }
            } else if on_visible_path(mapping, item) {
                return Ok(Some((id, mapping)));
            }
        } else if let Some(expr) = mapping.category_expr.as_deref().filter(|e| !e.trim().is_empty())
        {
            if value::is_truthy(&evaluator.evaluate(channel, item, expr).await?) {
                return Ok(Some((id, mapping)));
            }
        } else if let (Some(attr), Some(expected)) =
            (mapping.category_attr.as_deref(), mapping.category_attr_value.as_ref())
            && let Some(actual) = item.values.get(attr)
            && value::loose_eq(actual, expected)
        {
            return Ok(Some((id, mapping)));
        }
    }
    Ok(None)
}

fn on_visible_path(mapping: &CategoryMapping, item: &Item) -> bool {
    item.path_nodes()
        .any(|node| mapping.visible.iter().any(|v| v == node))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{expr::BasicExpressionEvaluator, store_memory::InMemoryStore, types::ChannelType},
        serde_json::json,
    };

    fn channel(mappings: Value) -> Channel {
        Channel {
            id: 1,
            tenant_id: "t1".into(),
            identifier: "ozon".into(),
            name: String::new(),
            channel_type: ChannelType::Ozon,
            active: true,
            config: Default::default(),
            mappings: serde_json::from_value(mappings).unwrap(),
        }
    }

    fn item(type_id: i64, path: &str, values: Value) -> Item {
        Item {
            id: 0,
            tenant_id: "t1".into(),
            identifier: "SKU-1".into(),
            type_id,
            path: path.into(),
            name: [("ru".to_string(), "Ботинки".to_string())].into(),
            values: values.as_object().cloned().unwrap(),
            channels: Default::default(),
        }
    }

    #[test]
    fn reads_special_and_localized_attributes() {
        let it = item(3, "1.7", json!({"descr": {"ru": "Описание", "en": "Descr"}, "sku": "S"}));
        assert_eq!(read_attribute(&it, "$name", "ru"), Some(json!("Ботинки")));
        assert_eq!(read_attribute(&it, "$typeId", "ru"), Some(json!(3)));
        assert_eq!(read_attribute(&it, "descr", "ru"), Some(json!("Описание")));
        assert_eq!(read_attribute(&it, "descr#en", "ru"), Some(json!("Descr")));
        assert_eq!(read_attribute(&it, "sku", "ru"), Some(json!("S")));
        assert_eq!(read_attribute(&it, "nope", "ru"), None);
        assert_eq!(read_attribute(&it, "$name", "de"), None);
    }

    #[tokio::test]
    async fn mapping_precedence() {
        let ch = channel(json!({}));
        let it = item(3, "1", json!({"price": "100"}));
        let ev = BasicExpressionEvaluator;
        let by_attr: AttributeMapping =
            serde_json::from_value(json!({"id": "#price", "attrIdent": "price", "value": 5}))
                .unwrap();
        assert_eq!(
            value_by_mapping(&ev, &ch, &it, Some(&by_attr), "ru")
                .await
                .unwrap(),
            Some(json!("100"))
        );
        let by_expr: AttributeMapping = serde_json::from_value(
            json!({"id": "#vat", "expr": "'0.2'", "attrIdent": "price"}),
        )
        .unwrap();
        assert_eq!(
            value_by_mapping(&ev, &ch, &it, Some(&by_expr), "ru")
                .await
                .unwrap(),
            Some(json!("0.2"))
        );
        let constant: AttributeMapping =
            serde_json::from_value(json!({"id": "#vat", "value": "0"})).unwrap();
        assert_eq!(
            value_by_mapping(&ev, &ch, &it, Some(&constant), "ru")
                .await
                .unwrap(),
            Some(json!("0"))
        );
        assert_eq!(
            value_by_mapping(&ev, &ch, &it, None, "ru").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn category_resolution_paths() {
        let store = InMemoryStore::new();
        let ev = BasicExpressionEvaluator;
        let ch = channel(json!({
            "cat_1": {"name": "Boots", "valid": [3], "visible": ["7"]},
            "cat_2": {"name": "Hats", "valid": [4], "categoryExpr": "values.kind == 'hat'"},
            "cat_3": {"name": "Acme", "valid": ["3"], "categoryAttr": "brand", "categoryAttrValue": "acme"},
            "cat_4": {"name": "Ignored", "valid": [3]},
        }));

        let boots = item(3, "1.7.10", json!({}));
        let (id, m) = resolve_category(&ev, &store, &ch, &boots).await.unwrap().unwrap();
        assert_eq!(id, "cat_1");
        assert_eq!(m.name, "Boots");

        let hat = item(4, "1.2", json!({"kind": "hat"}));
        let (id, _) = resolve_category(&ev, &store, &ch, &hat).await.unwrap().unwrap();
        assert_eq!(id, "cat_2");

        let acme = item(3, "1.2", json!({"brand": "acme"}));
        let (id, _) = resolve_category(&ev, &store, &ch, &acme).await.unwrap().unwrap();
        assert_eq!(id, "cat_3");

        let stray = item(3, "1.2", json!({"brand": "other"}));
        assert!(resolve_category(&ev, &store, &ch, &stray).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn visibility_through_relation() {
        let store = InMemoryStore::new();
        let ev = BasicExpressionEvaluator;
        let ch = channel(json!({
            "cat_9": {"valid": [5], "visible": ["7"], "visibleRelation": 2},
        }));
        let variant_id = store.insert_item(&item(5, "1.99", json!({}))).await.unwrap();
        let parent_id = store.insert_item(&item(3, "1.7.3", json!({}))).await.unwrap();
        let mut variant = store.get_item(variant_id).await.unwrap().unwrap();

        assert!(resolve_category(&ev, &store, &ch, &variant).await.unwrap().is_none());
        store.add_relation("t1", 2, parent_id, variant_id, 0).await.unwrap();
        variant.path = "1.99".into();
        let (id, _) = resolve_category(&ev, &store, &ch, &variant).await.unwrap().unwrap();
        assert_eq!(id, "cat_9");
    }
}
