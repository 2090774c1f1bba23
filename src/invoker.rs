//! HTTP invoker - performs an authenticated call for a function definition.
//!
//! Every failure that can be detected locally (unbound path segment,
//! unparseable OBJECT argument, missing credential) is raised before any
//! network I/O happens.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::auth::{AuthenticatorManager, Credential, InjectionPlace};
use crate::error::Error;
use crate::registry::{FunctionDefinition, HttpMethod, ParamType};
use crate::Result;

/// A fully prepared call, before credentials are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub method: HttpMethod,
    pub url: String,
    /// Raw query pairs sorted by argument name, with a query credential
    /// appended last. Percent-encoded when the URL is built.
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PreparedCall {
    fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let encoded: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, sep, encoded.join("&"))
    }
}

/// Invokes stored functions over HTTP.
pub struct HttpInvoker {
    http: Client,
    auth: Arc<AuthenticatorManager>,
}

impl HttpInvoker {
    pub fn new(http: Client, auth: Arc<AuthenticatorManager>) -> Self {
        Self { http, auth }
    }

    /// Call a function with model-supplied arguments.
    pub async fn invoke(&self, def: &FunctionDefinition, args: &Value) -> Result<Value> {
        let mut call = prepare(def, args)?;

        if let Some(auth_id) = &def.authenticator_ref {
            let credential = self.auth.credential_for(auth_id).await?;
            apply_query_credential(&mut call, &credential);
            return self.send(def, call, Some(credential)).await;
        }

        self.send(def, call, None).await
    }

    async fn send(
        &self,
        def: &FunctionDefinition,
        call: PreparedCall,
        credential: Option<Credential>,
    ) -> Result<Value> {
        let url = call.full_url();
        info!(
            "Invoking {} {} for function {}",
            call.method.as_reqwest(),
            call.url,
            def.name
        );

        let mut request = self.http.request(call.method.as_reqwest(), &url);
        if let Some(cred) = credential.filter(|c| c.place == InjectionPlace::Header) {
            request = request.header(cred.key.as_str(), cred.value.as_str());
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!("Function {} failed with {}", def.name, status);
            return Err(Error::Invocation {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body: parse_body(&text),
            });
        }

        debug!("Function {} returned {} bytes", def.name, text.len());
        Ok(parse_body(&text))
    }
}

fn apply_query_credential(call: &mut PreparedCall, credential: &Credential) {
    if credential.place == InjectionPlace::Query {
        call.query.push((credential.key.clone(), credential.value.clone()));
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Build the call for a definition: path substitution, argument coercion
/// and method-dependent encoding.
pub fn prepare(def: &FunctionDefinition, args: &Value) -> Result<PreparedCall> {
    let empty = Map::new();
    let args = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(Error::Validation(format!(
                "Arguments for {} must be an object, got {}",
                def.name, other
            )))
        }
    };

    let (url, used) = substitute_path(&def.url_template, args)?;

    let mut remaining = Map::new();
    for (name, value) in args {
        if used.contains(&name.as_str()) {
            continue;
        }
        remaining.insert(name.clone(), coerce(def, name, value)?);
    }

    if def.http_method == HttpMethod::Get {
        let query = remaining
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), crate::auth::scalar_to_string(v)))
            .collect();
        Ok(PreparedCall {
            method: def.http_method,
            url,
            query,
            body: None,
        })
    } else {
        Ok(PreparedCall {
            method: def.http_method,
            url,
            query: Vec::new(),
            body: Some(Value::Object(remaining)),
        })
    }
}

/// Replace `:name` segments; every unbound segment is reported at once.
fn substitute_path<'a>(
    template: &str,
    args: &'a Map<String, Value>,
) -> Result<(String, Vec<&'a str>)> {
    let (base, suffix) = match template.find(['?', '#']) {
        Some(idx) => template.split_at(idx),
        None => (template, ""),
    };
    let path_start = base
        .find("://")
        .and_then(|idx| base[idx + 3..].find('/').map(|p| idx + 3 + p))
        .unwrap_or(0);
    let (authority, path) = base.split_at(path_start);

    let mut used = Vec::new();
    let mut missing = Vec::new();
    let mut segments = Vec::new();

    for segment in path.split('/') {
        match segment.strip_prefix(':').filter(|name| !name.is_empty()) {
            Some(name) => match args.get_key_value(name).filter(|(_, v)| !v.is_null()) {
                Some((key, value)) => {
                    used.push(key.as_str());
                    let raw = crate::auth::scalar_to_string(value);
                    segments.push(urlencoding::encode(&raw).into_owned());
                }
                None => missing.push(name.to_string()),
            },
            None => segments.push(segment.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::NotFound(format!(
            "Missing path parameter(s): {}",
            missing.join(", ")
        )));
    }

    Ok((format!("{}{}{}", authority, segments.join("/"), suffix), used))
}

/// OBJECT-typed arguments supplied as strings are parsed as JSON.
fn coerce(def: &FunctionDefinition, name: &str, value: &Value) -> Result<Value> {
    let is_object = def
        .param(name)
        .map(|p| p.param_type == ParamType::Object)
        .unwrap_or(false);

    match value {
        Value::String(raw) if is_object => serde_json::from_str(raw).map_err(|e| {
            Error::Validation(format!("Argument {name} is not valid JSON: {e}"))
        }),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, ExchangeConfig};
    use crate::registry::ParameterSpec;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn invoker(store: Arc<InMemoryStore>) -> HttpInvoker {
        let http = Client::new();
        let auth = Arc::new(AuthenticatorManager::new(store, http.clone()));
        HttpInvoker::new(http, auth)
    }

    fn orders(base: &str) -> FunctionDefinition {
        FunctionDefinition::new(
            "orders",
            HttpMethod::Get,
            &format!("{base}/users/:id/orders/:orderId"),
        )
        .with_param(ParameterSpec::required("id", ParamType::Integer))
        .with_param(ParameterSpec::required("orderId", ParamType::String))
    }

    #[tokio::test]
    async fn test_unbound_placeholder_fails_without_network() {
        let mut server = mockito::Server::new_async().await;
        let any = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let invoker = invoker(Arc::new(InMemoryStore::new()));
        let err = invoker.invoke(&orders(&server.url()), &json!({"id": 5})).await.unwrap_err();

        match err {
            Error::NotFound(msg) => {
                assert!(msg.contains("orderId"));
                assert!(!msg.contains("id,"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        any.assert_async().await;
    }

    #[test]
    fn test_path_substitution() {
        let call = prepare(
            &orders("https://api.test"),
            &json!({"id": 5, "orderId": "a b", "expand": true}),
        )
        .unwrap();
        assert_eq!(call.url, "https://api.test/users/5/orders/a%20b");
        assert_eq!(call.query, vec![("expand".to_string(), "true".to_string())]);
    }

    #[test]
    fn test_query_pairs_sorted_by_name() {
        let def = FunctionDefinition::new("search", HttpMethod::Get, "https://api.test/search");
        let call = prepare(&def, &json!({"q": "shoes", "limit": 5, "after": "x"})).unwrap();
        let names: Vec<&str> = call.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["after", "limit", "q"]);
        assert_eq!(call.full_url(), "https://api.test/search?after=x&limit=5&q=shoes");
    }

    #[test]
    fn test_object_argument_coercion() {
        let def = FunctionDefinition::new("create", HttpMethod::Post, "https://api.test/items")
            .with_param(ParameterSpec::required("payload", ParamType::Object))
            .with_param(ParameterSpec::optional("label", ParamType::String));

        let call = prepare(&def, &json!({"payload": "{\"a\":1}", "label": "{\"a\":1}"})).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["payload"], json!({"a": 1}));
        assert_eq!(body["label"], json!("{\"a\":1}"));

        let err = prepare(&def, &json!({"payload": "not-json"})).unwrap_err();
        match err {
            Error::Validation(msg) => assert!(msg.contains("payload")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_encodes_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Exact("q=hi%20there".to_string()))
            .with_status(200)
            .with_body(r#"{"hits": 1}"#)
            .create_async()
            .await;

        let def = FunctionDefinition::new(
            "search",
            HttpMethod::Get,
            &format!("{}/search", server.url()),
        )
        .with_param(ParameterSpec::required("q", ParamType::String));
        let result = invoker(Arc::new(InMemoryStore::new()))
            .invoke(&def, &json!({"q": "hi there"}))
            .await
            .unwrap();

        assert_eq!(result, json!({"hits": 1}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_body(mockito::Matcher::Json(json!({"q": "hi there"})))
            .with_status(201)
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let mut def = FunctionDefinition::new(
            "search",
            HttpMethod::Get,
            &format!("{}/search", server.url()),
        )
        .with_param(ParameterSpec::required("q", ParamType::String));
        def.http_method = HttpMethod::Post;

        let result = invoker(Arc::new(InMemoryStore::new()))
            .invoke(&def, &json!({"q": "hi there"}))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_2xx_preserves_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fail")
            .with_status(422)
            .with_body(r#"{"field": "q"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/text")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let invoker = invoker(Arc::new(InMemoryStore::new()));
        let def = FunctionDefinition::new(
            "fail",
            HttpMethod::Get,
            &format!("{}/fail", server.url()),
        );
        match invoker.invoke(&def, &json!({})).await.unwrap_err() {
            Error::Invocation { status, status_text, body } => {
                assert_eq!(status, 422);
                assert_eq!(status_text, "Unprocessable Entity");
                assert_eq!(body, json!({"field": "q"}));
            }
            other => panic!("expected Invocation, got {other:?}"),
        }

        let def = FunctionDefinition::new(
            "text",
            HttpMethod::Get,
            &format!("{}/text", server.url()),
        );
        match invoker.invoke(&def, &json!({})).await.unwrap_err() {
            Error::Invocation { body, .. } => assert_eq!(body, json!("boom")),
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_header_credential_injected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/me")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_authenticator(Authenticator::static_key(
                "k",
                "x-api-key",
                "secret",
                InjectionPlace::Header,
            ))
            .unwrap();
        let def = FunctionDefinition::new(
            "me",
            HttpMethod::Get,
            &format!("{}/me", server.url()),
        )
        .with_authenticator("k");

        invoker(store).invoke(&def, &json!({})).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_credential_replaces_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/me")
            .match_query(mockito::Matcher::UrlEncoded("api_key".into(), "secret".into()))
            .match_header("api_key", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_authenticator(Authenticator::static_key(
                "k",
                "api_key",
                "secret",
                InjectionPlace::Query,
            ))
            .unwrap();
        let def = FunctionDefinition::new(
            "me",
            HttpMethod::Get,
            &format!("{}/me", server.url()),
        )
        .with_authenticator("k");

        invoker(store).invoke(&def, &json!({})).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_exchange_skips_target_call() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/token").with_status(500).create_async().await;
        let target = server.mock("GET", "/data").expect(0).create_async().await;

        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_authenticator(Authenticator::endpoint_bearer(
                "crm",
                ExchangeConfig {
                    url: format!("{}/token", server.url()),
                    method: HttpMethod::Post,
                    params: BTreeMap::new(),
                    token_path: "token".to_string(),
                    refresh_path: None,
                    header_name: "Authorization".to_string(),
                    query_param: "access_token".to_string(),
                },
                InjectionPlace::Header,
                60,
            ))
            .unwrap();
        let def = FunctionDefinition::new(
            "data",
            HttpMethod::Get,
            &format!("{}/data", server.url()),
        )
        .with_authenticator("crm");

        let err = invoker(store).invoke(&def, &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        target.assert_async().await;
    }
}
