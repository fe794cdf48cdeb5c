//! Product import payload and the pieces of mapping logic that only shape it.

use {
    serde::Serialize,
    serde_json::{Map, Value, json},
};

use crate::api::ProductAttributesResponse;

/// Complex attribute group holding product videos.
pub const VIDEO_COMPLEX_ID: i64 = 4018;
pub const VIDEO_URL_ATTR: i64 = 4074;
pub const VIDEO_NAME_ATTR: i64 = 4068;
/// Video attributes Ozon fills in after upload; resubmitting without them
/// drops the videos.
pub const UPLOADED_VIDEO_ATTRS: [i64; 2] = [21837, 21841];

/// Fields every product needs, with the label used in error messages.
pub const MANDATORY_FIELDS: [(&str, &str); 9] = [
    ("#productCode", "Product code"),
    ("#vat", "VAT"),
    ("#barcode", "Barcode"),
    ("#price", "Price"),
    ("#depth", "Package depth"),
    ("#width", "Package width"),
    ("#height", "Package height"),
    ("#weight", "Weight with package"),
    ("#name", "Product name"),
];

pub const OLD_PRICE: &str = "#oldprice";
pub const PREMIUM_PRICE: &str = "#premprice";
pub const VIDEO_URLS: &str = "#videoUrls";
pub const VIDEO_NAMES: &str = "#videoNames";
pub const IMAGES_360: &str = "#images360Urls";

/// Whether a mapping id names a product field rather than a schema attribute.
pub fn is_product_field(id: &str) -> bool {
    MANDATORY_FIELDS.iter().any(|(field, _)| *field == id)
        || [OLD_PRICE, PREMIUM_PRICE, VIDEO_URLS, VIDEO_NAMES, IMAGES_360].contains(&id)
}

/// Ozon category number of a `cat_<n>` id.
pub fn category_number(id: &str) -> Option<i64> {
    id.strip_prefix("cat_")?.parse().ok()
}

/// Ozon attribute number of an `attr_<n>` id.
pub fn attribute_number(id: &str) -> Option<i64> {
    id.strip_prefix("attr_")?.parse().ok()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeValues {
    pub complex_id: i64,
    pub id: i64,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComplexAttributes {
    pub attributes: Vec<Value>,
}

/// One entry of a `/v2/product/import` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductPayload {
    pub attributes: Vec<AttributeValues>,
    pub category_id: i64,
    pub offer_id: Value,
    pub barcode: Value,
    pub price: Value,
    pub weight: Value,
    pub weight_unit: &'static str,
    pub depth: Value,
    pub height: Value,
    pub width: Value,
    pub dimension_unit: &'static str,
    pub vat: Value,
    pub name: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_price: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_price: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub complex_attributes: Vec<ComplexAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_image: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images360: Vec<Value>,
}

/// Mandatory product field values, in [`MANDATORY_FIELDS`] order.
#[derive(Debug, Clone)]
pub struct ProductFields {
    pub offer_id: Value,
    pub vat: Value,
    pub barcode: Value,
    pub price: Value,
    pub depth: Value,
    pub width: Value,
    pub height: Value,
    pub weight: Value,
    pub name: Value,
}

impl ProductPayload {
    pub fn new(category_id: i64, fields: ProductFields) -> Self {
        Self {
            category_id,
            offer_id: fields.offer_id,
            barcode: fields.barcode,
            price: fields.price,
            weight: fields.weight,
            weight_unit: "g",
            depth: fields.depth,
            height: fields.height,
            width: fields.width,
            dimension_unit: "mm",
            vat: fields.vat,
            name: fields.name,
            ..Default::default()
        }
    }

    /// Append to the first complex attribute group, creating it if needed.
    pub fn push_complex(&mut self, attribute: Value) {
        match self.complex_attributes.first_mut() {
            Some(group) => group.attributes.push(attribute),
            None => self.complex_attributes.push(ComplexAttributes {
                attributes: vec![attribute],
            }),
        }
    }

    /// Add video URL and name attributes. Empty inputs are ignored.
    pub fn set_videos(&mut self, urls: Option<Value>, names: Option<Value>) {
        for (attr_id, value) in [(VIDEO_URL_ATTR, urls), (VIDEO_NAME_ATTR, names)] {
            let Some(value) = value else {
                continue;
            };
            let values: Vec<Value> = as_list(value)
                .into_iter()
                .map(|v| json!({ "value": v }))
                .collect();
            self.push_complex(json!({
                "complex_id": VIDEO_COMPLEX_ID,
                "id": attr_id,
                "values": values,
            }));
        }
    }
}

/// A scalar becomes a one-element list.
pub fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Trim string values; other values pass through.
pub fn trimmed(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    }
}

/// Already uploaded video attributes of an existing product, rewritten into
/// import form (`attribute_id` becomes `id`). `None` unless both are present.
pub fn uploaded_videos(existing: &ProductAttributesResponse) -> Option<Vec<Value>> {
    let product = existing.result.first()?;
    let mut found: [Option<Value>; 2] = [None, None];
    for group in &product.complex_attributes {
        for attribute in &group.attributes {
            let id = attribute.get("attribute_id").and_then(Value::as_i64);
            if let Some(slot) = UPLOADED_VIDEO_ATTRS.iter().position(|a| Some(*a) == id)
                && let Value::Object(fields) = attribute
            {
                let mut fields: Map<String, Value> = fields.clone();
                fields.remove("attribute_id");
                fields.insert("id".into(), Value::from(UPLOADED_VIDEO_ATTRS[slot]));
                found[slot] = Some(Value::Object(fields));
            }
        }
    }
    let [urls, names] = found;
    Some(vec![urls?, names?])
}
