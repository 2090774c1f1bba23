//! Function definition records

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

/// HTTP method of a stored function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Declared parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn json_schema_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// One entry of a function's parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn required(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: &str, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// A stored, callable HTTP function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub normalized_name: String,
    #[serde(default)]
    pub description: String,
    pub http_method: HttpMethod,
    /// May contain `:param` path placeholders.
    pub url_template: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_ref: Option<String>,
}

impl FunctionDefinition {
    pub fn new(name: &str, http_method: HttpMethod, url_template: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            normalized_name: normalize_name(name),
            description: String::new(),
            http_method,
            url_template: url_template.to_string(),
            parameters: Vec::new(),
            authenticator_ref: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_param(mut self, param: ParameterSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_authenticator(mut self, authenticator_id: &str) -> Self {
        self.authenticator_ref = Some(authenticator_id.to_string());
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of the `:param` placeholders in the URL template, in order.
    pub fn path_placeholders(&self) -> Vec<&str> {
        path_segments(&self.url_template)
            .filter_map(|segment| segment.strip_prefix(':'))
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// JSON Schema for the tool catalog.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = json!({ "type": param.param_type.json_schema_type() });
            if !param.description.is_empty() {
                prop["description"] = json!(param.description);
            }
            if param.param_type == ParamType::Array {
                prop["items"] = json!({});
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(param.name.clone());
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checked when a definition is written to a store.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Function name cannot be empty".to_string()));
        }
        self.normalized_name = normalize_name(&self.name);
        if self.normalized_name.is_empty() {
            return Err(Error::Validation(format!(
                "Function name {:?} has no letters or digits to build a tool name from",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.is_empty() {
                return Err(Error::Validation(format!(
                    "Function {} has a parameter with no name",
                    self.name
                )));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Function {} declares parameter {} twice",
                    self.name, param.name
                )));
            }
        }

        let undeclared: Vec<&str> = self
            .path_placeholders()
            .into_iter()
            .filter(|name| self.param(name).is_none())
            .collect();
        if !undeclared.is_empty() {
            return Err(Error::Validation(format!(
                "Function {} uses undeclared path parameter(s): {}",
                self.name,
                undeclared.join(", ")
            )));
        }

        url::Url::parse(&self.url_template).map_err(|e| {
            Error::Validation(format!("Invalid URL template {}: {e}", self.url_template))
        })?;

        Ok(())
    }
}

/// Path segments of a URL template, skipping scheme and authority.
fn path_segments(template: &str) -> impl Iterator<Item = &str> {
    let without_query = template.split(['?', '#']).next().unwrap_or(template);
    let path = match without_query.find("://") {
        Some(idx) => {
            let rest = &without_query[idx + 3..];
            rest.find('/').map(|p| &rest[p..]).unwrap_or("")
        }
        None => without_query,
    };
    path.split('/')
}

/// Lowercase, with runs of anything outside `[a-z0-9_]` collapsed to `_`.
pub fn normalize_name(name: &str) -> String {
    static NON_IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    let lowered = name.trim().to_lowercase();
    match NON_IDENT.get_or_init(|| Regex::new(r"[^a-z0-9_]+").ok()) {
        Some(re) => re.replace_all(&lowered, "_").trim_matches('_').to_string(),
        None => lowered,
    }
}
