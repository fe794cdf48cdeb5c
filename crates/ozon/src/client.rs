//! Thin JSON client over the Ozon Seller API.

use std::time::Duration;

use {
    reqwest::Client,
    secrecy::ExposeSecret,
    serde::{Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    api::{
        AttributeValuesRequest, AttributeValuesResponse, CategoryAttributeRequest,
        CategoryAttributeResponse, CategoryTreeResponse, ImportInfoRequest, ImportInfoResponse,
        ImportRequest, ImportResponse, ProductAttributesFilter, ProductAttributesRequest,
        ProductAttributesResponse, ProductInfoRequest, ProductInfoResponse,
    },
    settings::Credentials,
};

const LANGUAGE: &str = "DEFAULT";

/// HTTP client bound to one API base URL.
#[derive(Debug, Clone)]
pub struct OzonClient {
    http: Client,
    base_url: String,
}

impl OzonClient {
    /// Build a client with a bounded per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|source| Error::external("failed to build HTTP client", source))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn category_tree(&self, creds: &Credentials) -> Result<CategoryTreeResponse> {
        self.post(
            creds,
            "/v2/category/tree",
            &serde_json::json!({ "language": LANGUAGE }),
        )
        .await
    }

    pub async fn category_attributes(
        &self,
        creds: &Credentials,
        category_id: i64,
    ) -> Result<CategoryAttributeResponse> {
        let body = CategoryAttributeRequest {
            attribute_type: "ALL",
            category_id: vec![category_id],
            language: LANGUAGE,
        };
        self.post(creds, "/v3/category/attribute", &body).await
    }

    /// One dictionary page starting after `last_value_id`.
    pub async fn attribute_values(
        &self,
        creds: &Credentials,
        category_id: i64,
        attribute_id: i64,
        last_value_id: i64,
        limit: u32,
    ) -> Result<AttributeValuesResponse> {
        let body = AttributeValuesRequest {
            attribute_id,
            category_id,
            language: LANGUAGE,
            last_value_id,
            limit,
        };
        self.post(creds, "/v2/category/attribute/values", &body)
            .await
    }

    /// Same as [`attribute_values`](Self::attribute_values) but returns the
    /// undecoded body.
    pub async fn attribute_values_raw(
        &self,
        creds: &Credentials,
        category_id: i64,
        attribute_id: i64,
        limit: u32,
    ) -> Result<serde_json::Value> {
        let body = AttributeValuesRequest {
            attribute_id,
            category_id,
            language: LANGUAGE,
            last_value_id: 0,
            limit,
        };
        self.post(creds, "/v2/category/attribute/values", &body)
            .await
    }

    pub async fn import_products<P: Serialize + Sync>(
        &self,
        creds: &Credentials,
        items: &[P],
    ) -> Result<ImportResponse> {
        self.post(creds, "/v2/product/import", &ImportRequest { items })
            .await
    }

    pub async fn import_info(&self, creds: &Credentials, task_id: i64) -> Result<ImportInfoResponse> {
        self.post(creds, "/v1/product/import/info", &ImportInfoRequest { task_id })
            .await
    }

    pub async fn product_info(
        &self,
        creds: &Credentials,
        product_id: i64,
    ) -> Result<ProductInfoResponse> {
        self.post(creds, "/v2/product/info", &ProductInfoRequest { product_id })
            .await
    }

    pub async fn product_attributes(
        &self,
        creds: &Credentials,
        product_id: i64,
    ) -> Result<ProductAttributesResponse> {
        let body = ProductAttributesRequest {
            filter: ProductAttributesFilter {
                product_id: vec![product_id],
                visibility: "ALL",
            },
            limit: 1000,
        };
        self.post(creds, "/v3/products/info/attributes", &body)
            .await
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn post<B, R>(&self, creds: &Credentials, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, client_id = %creds.client_id, "sending request to Ozon");

        let resp = self
            .http
            .post(&url)
            .header("Client-Id", &creds.client_id)
            .header("Api-Key", creds.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|source| Error::external(format!("request to {path} failed"), source))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%url, %status, "Ozon request failed");
            return Err(Error::Api {
                status: status
                    .canonical_reason()
                    .unwrap_or(status.as_str())
                    .to_string(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|source| Error::external(format!("invalid response from {path}"), source))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        mockito::Matcher,
        secrecy::Secret,
        serde_json::json,
    };

    fn creds() -> Credentials {
        Credentials {
            client_id: "42".into(),
            api_key: Secret::new("key".into()),
        }
    }

    #[tokio::test]
    async fn sends_credentials_and_decodes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/product/import/info")
            .match_header("client-id", "42")
            .match_header("api-key", "key")
            .match_body(Matcher::Json(json!({"task_id": 123})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"result": {"items": [{"product_id": 555, "status": "imported"}]}})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = OzonClient::with_client(Client::new(), server.url());
        let info = client.import_info(&creds(), 123).await.unwrap();
        assert_eq!(info.result.items[0].product_id, 555);
        assert_eq!(info.result.items[0].status, "imported");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_carries_reason_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/product/info")
            .with_status(404)
            .with_body("{\"message\":\"not found\"}")
            .create_async()
            .await;

        let client = OzonClient::with_client(Client::new(), format!("{}/", server.url()));
        let err = client.product_info(&creds(), 1).await.unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Ozon request error: Not Found"), "{text}");
        assert!(text.contains("not found"));
    }
}
