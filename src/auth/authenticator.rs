//! Authenticator records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::registry::HttpMethod;
use crate::Result;

use super::credentials::CachedToken;

/// Where a credential is injected into the outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionPlace {
    Header,
    Query,
}

/// Token exchange call for endpoint-bearer authenticators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeConfig {
    pub url: String,
    #[serde(default = "default_exchange_method")]
    pub method: HttpMethod,
    /// Sent as query parameters for GET, JSON body otherwise.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Dotted path to the token in the exchange response, e.g. `data.access_token`.
    pub token_path: String,
    /// Dotted path to the token lifetime in seconds, when the endpoint reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_path: Option<String>,
    #[serde(default = "default_bearer_header")]
    pub header_name: String,
    /// Query parameter carrying the raw token when injected into the URL.
    #[serde(default = "default_query_param")]
    pub query_param: String,
}

fn default_exchange_method() -> HttpMethod {
    HttpMethod::Post
}

fn default_bearer_header() -> String {
    "Authorization".to_string()
}

fn default_query_param() -> String {
    "access_token".to_string()
}

/// Credential strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticatorKind {
    StaticKey {
        #[serde(rename = "keyName")]
        key_name: String,
        value: String,
    },
    EndpointBearer(ExchangeConfig),
}

/// A stored credential strategy with its cached token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticator {
    pub id: String,
    #[serde(flatten)]
    pub kind: AuthenticatorKind,
    pub place: InjectionPlace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<CachedToken>,
    /// Seconds a cached token stays valid; 0 means it never expires.
    #[serde(default)]
    pub life_time: u64,
}

impl Authenticator {
    pub fn static_key(id: &str, key_name: &str, value: &str, place: InjectionPlace) -> Self {
        Self {
            id: id.to_string(),
            kind: AuthenticatorKind::StaticKey {
                key_name: key_name.to_string(),
                value: value.to_string(),
            },
            place,
            cached: None,
            life_time: 0,
        }
    }

    pub fn endpoint_bearer(
        id: &str,
        exchange: ExchangeConfig,
        place: InjectionPlace,
        life_time: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind: AuthenticatorKind::EndpointBearer(exchange),
            place,
            cached: None,
            life_time,
        }
    }

    /// Checked when an authenticator is written to a store.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("Authenticator id cannot be empty".to_string()));
        }
        match &self.kind {
            AuthenticatorKind::StaticKey { key_name, value } => {
                if key_name.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "Authenticator {} has an empty key name",
                        self.id
                    )));
                }
                if value.is_empty() {
                    return Err(Error::Validation(format!(
                        "Authenticator {} has an empty static value",
                        self.id
                    )));
                }
            }
            AuthenticatorKind::EndpointBearer(exchange) => {
                url::Url::parse(&exchange.url).map_err(|e| {
                    Error::Validation(format!(
                        "Authenticator {} has an invalid exchange URL: {e}",
                        self.id
                    ))
                })?;
                if exchange.token_path.split('.').any(str::is_empty) {
                    return Err(Error::Validation(format!(
                        "Authenticator {} has an invalid token path '{}'",
                        self.id, exchange.token_path
                    )));
                }
                let key = match self.place {
                    InjectionPlace::Header => &exchange.header_name,
                    InjectionPlace::Query => &exchange.query_param,
                };
                if key.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "Authenticator {} has an empty credential key",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}
