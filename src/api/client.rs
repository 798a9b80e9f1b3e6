use super::auth::Authenticator;
use super::types::{DisplayValue, Envelope, ListQuery, Record};
use crate::config::{HTTP_TIMEOUT, UPDATED_BY_FIELD, VERSION_FIELD};
use crate::error::{errors, SnResult, SnSyncError};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Table API client; every request is authorized on demand.
#[derive(Clone)]
pub struct TableClient {
    http: reqwest::Client,
    instance: String,
    auth: Arc<dyn Authenticator>,
}

impl TableClient {
    pub fn new(instance: &str, auth: Arc<dyn Authenticator>) -> SnResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            instance: instance.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Classic-UI link to a record
    pub fn record_url(&self, table: &str, sys_id: &str) -> String {
        record_url(&self.instance, table, sys_id)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.instance, table)
    }

    pub async fn list(&self, table: &str, query: &ListQuery) -> SnResult<Vec<Record>> {
        let request = self
            .http
            .get(self.table_url(table))
            .query(&query.to_params());
        self.send(request).await
    }

    /// One record by id, limited to `fields` when non-empty
    pub async fn get(
        &self,
        table: &str,
        sys_id: &str,
        fields: &[&str],
        display: DisplayValue,
    ) -> SnResult<Record> {
        let query = ListQuery::new()
            .fields(fields.iter().copied())
            .display(display);
        let request = self
            .http
            .get(format!("{}/{}", self.table_url(table), sys_id))
            .query(&query.to_params());
        self.send(request).await
    }

    /// Current version stamp and last editor of a record
    pub async fn version_of(&self, table: &str, sys_id: &str) -> SnResult<(Option<String>, Option<String>)> {
        let record = self
            .get(table, sys_id, &[VERSION_FIELD, UPDATED_BY_FIELD], DisplayValue::Raw)
            .await?;
        Ok((record.version(), record.updated_by()))
    }

    pub async fn update(&self, table: &str, sys_id: &str, payload: &Map<String, Value>) -> SnResult<Record> {
        let request = self
            .http
            .request(Method::PUT, format!("{}/{}", self.table_url(table), sys_id))
            .json(payload);
        self.send(request).await
    }

    pub async fn create(&self, table: &str, payload: &Map<String, Value>) -> SnResult<Record> {
        let request = self.http.post(self.table_url(table)).json(payload);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> SnResult<T> {
        let request = self
            .auth
            .authorize(request.header("Accept", "application/json"))
            .await?;
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        debug!("{} <- {}", status, url);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, url, &body));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| SnSyncError::Remote {
            message: format!("Unexpected response body: {e}"),
            status: Some(status.as_u16()),
            url: Some(url),
            source: Some(Box::new(e)),
        })?;
        Ok(envelope.result)
    }
}

/// `<instance>/now/nav/ui/classic/params/target/<table>.do%3Fsys_id%3D<id>`
pub fn record_url(instance: &str, table: &str, sys_id: &str) -> String {
    format!(
        "{}/now/nav/ui/classic/params/target/{}.do%3Fsys_id%3D{}",
        instance.trim_end_matches('/'),
        table,
        sys_id
    )
}

fn status_error(status: StatusCode, url: String, body: &str) -> SnSyncError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            let message = error.get("message").and_then(Value::as_str)?.to_string();
            Some(match error.get("detail").and_then(Value::as_str) {
                Some(detail) if !detail.is_empty() => format!("{message} ({detail})"),
                _ => message,
            })
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED => errors::auth_error(format!("Instance rejected the credentials: {detail}")),
        StatusCode::NOT_FOUND => errors::not_found(url, format!("Remote resource not found: {detail}")),
        _ => errors::remote_error(Some(status.as_u16()), Some(url), format!("{status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::BasicAuth;
    use crate::error::ErrorCategory;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::Server) -> TableClient {
        TableClient::new(&server.url(), Arc::new(BasicAuth::new("admin", Some("pw".into())))).unwrap()
    }

    #[tokio::test]
    async fn list_sends_query_parameters_and_unwraps_result() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/api/now/table/sys_script_include")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("sysparm_query".into(), "active=true".into()),
                Matcher::UrlEncoded("sysparm_fields".into(), "sys_id,name".into()),
                Matcher::UrlEncoded("sysparm_display_value".into(), "false".into()),
                Matcher::UrlEncoded("sysparm_limit".into(), "100".into()),
            ]))
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_body(json!({"result": [{"sys_id": "a1", "name": "Util"}]}).to_string())
            .create_async()
            .await;

        let query = ListQuery::new()
            .query("active=true")
            .fields(["sys_id", "name"])
            .limit(100);
        let rows = client(&server).list("sys_script_include", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].raw("name").as_deref(), Some("Util"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn error_message_comes_from_the_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("PUT", "/api/now/table/incident/x1")
            .with_status(403)
            .with_body(json!({"error": {"message": "ACL denied", "detail": "write"}}).to_string())
            .create_async()
            .await;

        let err = client(&server)
            .update("incident", "x1", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Remote);
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("ACL denied (write)"));
    }

    #[tokio::test]
    async fn unauthorized_is_an_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":{"message":"User Not Authenticated"}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .list("incident", &ListQuery::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn record_url_targets_the_classic_ui() {
        assert_eq!(
            record_url("https://dev1.service-now.com/", "sys_script_include", "abc"),
            "https://dev1.service-now.com/now/nav/ui/classic/params/target/sys_script_include.do%3Fsys_id%3Dabc"
        );
    }
}
