use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Value of a custom or private user attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, `bool` and vectors.
///
/// ```
/// # use statsig_core::DynamicValue;
/// let plan: DynamicValue = "enterprise".into();
/// let seats: DynamicValue = 42.0.into();
/// let beta: DynamicValue = true.into();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum DynamicValue {
    /// A null value or absence of value.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A numerical value.
    Number(f64),
    /// A string value.
    String(String),
    /// A list of values.
    Array(Vec<DynamicValue>),
    /// A nested key/value map.
    Object(HashMap<String, DynamicValue>),
}

impl From<&str> for DynamicValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for DynamicValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for DynamicValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<serde_json::Value> for DynamicValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(a) => Self::Array(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => {
                Self::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl DynamicValue {
    /// String representation used by string and membership operators. Numbers without a
    /// fractional part are rendered as integers (`10.0` becomes `"10"`).
    pub fn to_string_value(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some((*n as i64).to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::Null | Self::Array(_) | Self::Object(_) => None,
        }
    }

    /// Numeric representation. Strings are parsed as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A user (or other unit) being evaluated.
///
/// `private_attributes` take part in evaluation but are never serialized, so logged events and
/// exposure payloads never carry them.
///
/// ```
/// # use statsig_core::StatsigUser;
/// let user = StatsigUser::with_user_id("a-user")
///     .email("someone@statsig.com")
///     .custom_id("companyID", "statsig");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsigUser {
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, DynamicValue>,
    #[serde(default, skip_serializing)]
    pub private_attributes: HashMap<String, DynamicValue>,
    #[serde(rename = "customIDs", default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_ids: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub statsig_environment: HashMap<String, String>,
}

impl StatsigUser {
    pub fn with_user_id(user_id: impl Into<String>) -> StatsigUser {
        StatsigUser {
            user_id: user_id.into(),
            ..StatsigUser::default()
        }
    }

    pub fn with_custom_ids(custom_ids: HashMap<String, String>) -> StatsigUser {
        StatsigUser {
            custom_ids,
            ..StatsigUser::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> StatsigUser {
        self.email = Some(email.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> StatsigUser {
        self.ip = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> StatsigUser {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> StatsigUser {
        self.country = Some(country.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> StatsigUser {
        self.locale = Some(locale.into());
        self
    }

    pub fn app_version(mut self, app_version: impl Into<String>) -> StatsigUser {
        self.app_version = Some(app_version.into());
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: impl Into<DynamicValue>) -> StatsigUser {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn private_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<DynamicValue>,
    ) -> StatsigUser {
        self.private_attributes.insert(key.into(), value.into());
        self
    }

    pub fn custom_id(mut self, id_type: impl Into<String>, id: impl Into<String>) -> StatsigUser {
        self.custom_ids.insert(id_type.into(), id.into());
        self
    }

    pub fn environment(mut self, key: impl Into<String>, value: impl Into<String>) -> StatsigUser {
        self.statsig_environment.insert(key.into(), value.into());
        self
    }

    /// Return the unit ID used for bucketing under `id_type`.
    ///
    /// An empty `id_type` or `userID` (case-insensitive) resolves to the primary user ID.
    pub fn unit_id(&self, id_type: &str) -> Option<&str> {
        if id_type.is_empty() || id_type.eq_ignore_ascii_case("userid") {
            return (!self.user_id.is_empty()).then_some(self.user_id.as_str());
        }
        self.custom_ids
            .get(id_type)
            .or_else(|| {
                self.custom_ids
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(id_type))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Key identifying this user for exposure deduplication: user ID plus sorted custom IDs.
    pub fn dedupe_key(&self) -> String {
        let mut custom_ids = self.custom_ids.iter().collect::<Vec<_>>();
        custom_ids.sort();
        // JSON quoting keeps IDs containing separators from colliding.
        serde_json::to_string(&(&self.user_id, custom_ids)).unwrap_or_default()
    }

    /// Payload sent to the server when evaluation escalates. Unlike logged events, the server
    /// needs private attributes to evaluate.
    pub fn to_evaluation_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let (Some(obj), false) = (value.as_object_mut(), self.private_attributes.is_empty()) {
            obj.insert(
                "privateAttributes".to_owned(),
                serde_json::to_value(&self.private_attributes).unwrap_or_default(),
            );
        }
        value
    }
}
