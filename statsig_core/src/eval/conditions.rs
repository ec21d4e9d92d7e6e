use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;

use crate::{id_list::IdList, sharder::hash_id_for_list, spec::ConditionOperator, DynamicValue};

/// Marker returned when a condition cannot be evaluated locally and the server should decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchFromServer;

impl ConditionOperator {
    /// Apply the operator to the values. Returns `Ok(false)` if the operator cannot be applied or
    /// there's a misconfiguration, and `Err(FetchFromServer)` if the operator is unknown.
    pub(crate) fn eval(
        &self,
        value: Option<&DynamicValue>,
        target: &Value,
        id_lists: &HashMap<String, Arc<IdList>>,
    ) -> Result<bool, FetchFromServer> {
        if *self == Self::Unsupported {
            return Err(FetchFromServer);
        }
        Ok(self.try_eval(value, target, id_lists).unwrap_or(false))
    }

    /// Try applying the operator, returning `None` if it cannot be applied.
    fn try_eval(
        &self,
        value: Option<&DynamicValue>,
        target: &Value,
        id_lists: &HashMap<String, Arc<IdList>>,
    ) -> Option<bool> {
        match self {
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => {
                let value = value?.as_f64()?;
                let target = json_as_f64(target)?;
                Some(match self {
                    Self::Gt => value > target,
                    Self::Gte => value >= target,
                    Self::Lt => value < target,
                    _ => value <= target,
                })
            }

            Self::VersionGt
            | Self::VersionGte
            | Self::VersionLt
            | Self::VersionLte
            | Self::VersionEq
            | Self::VersionNeq => {
                let value = parse_version(&value?.to_string_value()?)?;
                let target = parse_version(&json_as_string(target)?)?;
                let ordering = compare_versions(&value, &target);
                Some(match self {
                    Self::VersionGt => ordering == Ordering::Greater,
                    Self::VersionGte => ordering != Ordering::Less,
                    Self::VersionLt => ordering == Ordering::Less,
                    Self::VersionLte => ordering != Ordering::Greater,
                    Self::VersionEq => ordering == Ordering::Equal,
                    _ => ordering != Ordering::Equal,
                })
            }

            Self::Any | Self::AnyCaseSensitive => {
                Some(array_contains(target, value?, *self == Self::Any))
            }
            // A missing value is in none of the targets.
            Self::NotAny | Self::NoneCaseSensitive => Some(match value {
                Some(value) => !array_contains(target, value, *self == Self::NotAny),
                None => true,
            }),

            Self::StrStartsWithAny | Self::StrEndsWithAny | Self::StrContainsAny => {
                let value = value?.to_string_value()?.to_lowercase();
                Some(targets(target).any(|t| {
                    json_as_string(t).is_some_and(|t| {
                        let t = t.to_lowercase();
                        match self {
                            Self::StrStartsWithAny => value.starts_with(&t),
                            Self::StrEndsWithAny => value.ends_with(&t),
                            _ => value.contains(&t),
                        }
                    })
                }))
            }
            Self::StrContainsNone => {
                let Some(value) = value.and_then(DynamicValue::to_string_value) else {
                    return Some(true);
                };
                let value = value.to_lowercase();
                Some(!targets(target).any(|t| {
                    json_as_string(t).is_some_and(|t| value.contains(&t.to_lowercase()))
                }))
            }
            Self::StrMatches => {
                let value = value?.to_string_value()?;
                let regex = Regex::new(&format!("(?i){}", json_as_string(target)?)).ok()?;
                Some(regex.is_match(&value))
            }

            Self::Eq | Self::Neq => {
                let equal = match value {
                    Some(value) => *value == DynamicValue::from(target.clone()),
                    None => target.is_null(),
                };
                Some(equal == (*self == Self::Eq))
            }

            Self::Before | Self::After | Self::On => {
                let value = parse_time(value?)?;
                let target = parse_time(&DynamicValue::from(target.clone()))?;
                Some(match self {
                    Self::Before => value < target,
                    Self::After => value > target,
                    _ => value.date_naive() == target.date_naive(),
                })
            }

            Self::InSegmentList | Self::NotInSegmentList => {
                let in_list = value
                    .and_then(DynamicValue::to_string_value)
                    .zip(json_as_string(target))
                    .and_then(|(value, list)| {
                        let list = id_lists.get(&list)?;
                        Some(list.contains(&hash_id_for_list(&value)))
                    })
                    .unwrap_or(false);
                Some(in_list == (*self == Self::InSegmentList))
            }

            Self::Unsupported => None,
        }
    }
}

fn targets(target: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match target {
        Value::Array(values) => Box::new(values.iter()),
        Value::Null => Box::new(std::iter::empty()),
        other => Box::new(std::iter::once(other)),
    }
}

fn array_contains(target: &Value, value: &DynamicValue, ignore_case: bool) -> bool {
    let value_str = value.to_string_value();
    targets(target).any(|t| match t {
        Value::String(t) => value_str.as_deref().is_some_and(|v| {
            if ignore_case {
                v.to_lowercase() == t.to_lowercase()
            } else {
                v == t
            }
        }),
        Value::Number(t) => value.as_f64().is_some_and(|v| Some(v) == t.as_f64()),
        other => *value == DynamicValue::from(other.clone()),
    })
}

fn json_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_as_string(value: &Value) -> Option<String> {
    DynamicValue::from(value.clone()).to_string_value()
}

/// Parse a dotted version, dropping any pre-release suffix after `-`. Returns `None` if a
/// component is not a number.
fn parse_version(version: &str) -> Option<Vec<u64>> {
    let version = version.trim();
    let version = version.split('-').next()?;
    if version.is_empty() {
        return None;
    }
    let mut parts = version
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() < 4 {
        parts.resize(4, 0);
    }
    Some(parts)
}

fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Unix seconds or milliseconds (values below 1e11 are seconds), RFC 3339 or `YYYY-MM-DD`.
pub(crate) fn parse_time(value: &DynamicValue) -> Option<DateTime<Utc>> {
    if let Some(n) = value.as_f64() {
        let millis = if n.abs() < 1e11 { n * 1000.0 } else { n };
        return DateTime::from_timestamp_millis(millis as i64);
    }
    let DynamicValue::String(s) = value else {
        return None;
    };
    let s = s.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
}
