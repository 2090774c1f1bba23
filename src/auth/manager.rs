//! Authenticator manager - resolves and caches outbound credentials.
//!
//! Static keys are formatted as-is. Endpoint-bearer authenticators exchange
//! against their configured endpoint, cache the token on the authenticator
//! record and reuse it while it is still valid.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::Error;
use crate::registry::HttpMethod;
use crate::store::AuthenticatorStore;
use crate::Result;

use super::authenticator::{Authenticator, AuthenticatorKind, ExchangeConfig, InjectionPlace};
use super::credentials::{CachedToken, Clock, Credential, SystemClock};

/// Resolves credentials for function calls.
pub struct AuthenticatorManager {
    store: Arc<dyn AuthenticatorStore>,
    http: Client,
    clock: Arc<dyn Clock>,
    /// One refresh at a time per authenticator id.
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuthenticatorManager {
    pub fn new(store: Arc<dyn AuthenticatorStore>, http: Client) -> Self {
        Self {
            store,
            http,
            clock: Arc::new(SystemClock),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load an authenticator by id and resolve its credential.
    pub async fn credential_for(&self, authenticator_id: &str) -> Result<Credential> {
        let auth = self.store.authenticator(authenticator_id).await?;
        self.get_credential(&auth).await
    }

    /// Resolve the credential for an authenticator, refreshing if needed.
    pub async fn get_credential(&self, auth: &Authenticator) -> Result<Credential> {
        let exchange = match &auth.kind {
            AuthenticatorKind::StaticKey { key_name, value } => {
                return Ok(Credential {
                    place: auth.place,
                    key: key_name.clone(),
                    value: value.clone(),
                });
            }
            AuthenticatorKind::EndpointBearer(exchange) => exchange,
        };

        if let Some(token) = self.valid_cached(auth) {
            debug!("Using cached token for authenticator {}", auth.id);
            return Ok(format_bearer(auth.place, exchange, token));
        }

        let lock = self.refresh_lock(&auth.id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let latest = match self.store.authenticator(&auth.id).await {
            Ok(stored) => stored,
            Err(_) => auth.clone(),
        };
        if let Some(token) = self.valid_cached(&latest) {
            debug!("Token for authenticator {} refreshed by a concurrent caller", auth.id);
            return Ok(format_bearer(auth.place, exchange, token));
        }

        let (token, life_time) = self.exchange(&auth.id, exchange, latest.life_time).await?;
        self.store.save_token(&auth.id, token.clone(), life_time).await?;
        Ok(format_bearer(auth.place, exchange, &token))
    }

    fn valid_cached<'a>(&self, auth: &'a Authenticator) -> Option<&'a CachedToken> {
        auth.cached
            .as_ref()
            .filter(|token| token.is_valid(auth.life_time, self.clock.now()))
    }

    fn refresh_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    async fn exchange(
        &self,
        id: &str,
        config: &ExchangeConfig,
        life_time: u64,
    ) -> Result<(CachedToken, u64)> {
        info!("Exchanging token for authenticator {}", id);

        let request = self.http.request(config.method.as_reqwest(), &config.url);
        let request = if config.method == HttpMethod::Get {
            let query: Vec<(String, String)> = config
                .params
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect();
            request.query(&query)
        } else {
            let body: Map<String, Value> = config.params.clone().into_iter().collect();
            request.json(&body)
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange for {id} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Authentication(format!(
                "Token exchange for {id} returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| {
                Error::Authentication(format!(
                    "Token exchange for {id} returned invalid JSON: {e}"
                ))
            })?;

        let raw = lookup_path(&body, &config.token_path)
            .and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::Authentication(format!(
                    "Token exchange for {id} returned no token at '{}'",
                    config.token_path
                ))
            })?;

        let life_time = config
            .refresh_path
            .as_deref()
            .and_then(|path| lookup_path(&body, path))
            .and_then(Value::as_u64)
            .unwrap_or(life_time);

        Ok((CachedToken::bearer(raw, self.clock.now()), life_time))
    }
}

fn format_bearer(
    place: InjectionPlace,
    config: &ExchangeConfig,
    token: &CachedToken,
) -> Credential {
    match place {
        InjectionPlace::Header => Credential {
            place,
            key: config.header_name.clone(),
            value: token.value.clone(),
        },
        InjectionPlace::Query => Credential {
            place,
            key: config.query_param.clone(),
            value: token.raw.clone(),
        },
    }
}

/// Walk a dotted path (`data.items.0.token`) into a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
