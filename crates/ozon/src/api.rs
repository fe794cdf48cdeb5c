//! Wire types of the Ozon Seller API endpoints used by the handler.
//!
//! Response types default every field so partial or evolving payloads
//! still decode.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── Categories ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryTreeResponse {
    pub result: Vec<RemoteCategory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteCategory {
    pub category_id: i64,
    pub title: String,
    pub children: Vec<RemoteCategory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryAttributeRequest {
    pub attribute_type: &'static str,
    pub category_id: Vec<i64>,
    pub language: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryAttributeResponse {
    pub result: Vec<CategoryAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryAttributes {
    pub category_id: i64,
    pub attributes: Vec<RemoteAttribute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteAttribute {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_required: bool,
    pub dictionary_id: i64,
}

// ── Dictionaries ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AttributeValuesRequest {
    pub attribute_id: i64,
    pub category_id: i64,
    pub language: &'static str,
    pub last_value_id: i64,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttributeValuesResponse {
    pub result: Vec<DictionaryValue>,
    pub has_next: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryValue {
    pub id: i64,
    pub value: String,
}

// ── Products ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ImportRequest<'a, P> {
    pub items: &'a [P],
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportResponse {
    pub result: ImportResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportResult {
    pub task_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportInfoRequest {
    pub task_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportInfoResponse {
    pub result: ImportInfoResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportInfoResult {
    pub items: Vec<ImportedItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportedItem {
    pub offer_id: String,
    pub product_id: i64,
    pub status: String,
    pub errors: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductInfoRequest {
    pub product_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductInfoResponse {
    pub result: ProductInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductInfo {
    pub id: i64,
    /// Prices arrive as decimal strings such as `"1000.0000"`.
    pub price: Value,
    pub old_price: Value,
    pub premium_price: Value,
    /// Kept raw: its text becomes the item's channel message.
    pub status: Value,
    pub sources: Vec<ProductSource>,
}

impl ProductInfo {
    fn flag(&self, key: &str) -> bool {
        self.status.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_created(&self) -> bool {
        self.flag("is_created")
    }

    pub fn is_failed(&self) -> bool {
        self.flag("is_failed")
    }

    pub fn is_declined(&self) -> bool {
        self.status.get("moderate_status").and_then(Value::as_str) == Some("declined")
    }

    /// SKU published through `source` (`fbs` or `fbo`).
    pub fn sku(&self, source: &str) -> Option<&Value> {
        self.sources
            .iter()
            .find(|s| s.source == source)
            .map(|s| &s.sku)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductSource {
    pub source: String,
    pub sku: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductAttributesRequest {
    pub filter: ProductAttributesFilter,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductAttributesFilter {
    pub product_id: Vec<i64>,
    pub visibility: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductAttributesResponse {
    pub result: Vec<ProductAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductAttributes {
    pub id: i64,
    pub complex_attributes: Vec<ComplexAttributeGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComplexAttributeGroup {
    pub attributes: Vec<Value>,
}
