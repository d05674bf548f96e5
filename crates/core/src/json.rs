//! Read helpers over raw API objects (`serde_json::Value`).
//!
//! Objects are kept opaque; each resource kind reads only the fields it needs through these.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Deserialize;
use serde_json::Value as Json;

pub fn str_at<'a>(v: &'a Json, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(|x| x.as_str())
}

pub fn i64_at(v: &Json, pointer: &str) -> Option<i64> {
    v.pointer(pointer).and_then(|x| x.as_i64())
}

/// Typed view of `metadata`; malformed metadata reads as empty.
pub fn object_meta(v: &Json) -> ObjectMeta {
    v.get("metadata")
        .and_then(|m| ObjectMeta::deserialize(m).ok())
        .unwrap_or_default()
}

pub fn name(v: &Json) -> Option<&str> {
    str_at(v, "/metadata/name")
}

pub fn uid(v: &Json) -> Option<&str> {
    str_at(v, "/metadata/uid")
}

pub fn label<'a>(v: &'a Json, key: &str) -> Option<&'a str> {
    v.get("metadata")?.get("labels")?.get(key)?.as_str()
}

pub fn annotation<'a>(v: &'a Json, key: &str) -> Option<&'a str> {
    v.get("metadata")?.get("annotations")?.get(key)?.as_str()
}

pub fn generation(v: &Json) -> Option<i64> {
    i64_at(v, "/metadata/generation")
}

pub fn observed_generation(v: &Json) -> Option<i64> {
    i64_at(v, "/status/observedGeneration")
}

/// True when the controller has reacted to the latest spec. A missing observedGeneration is stale.
pub fn generation_is_current(v: &Json) -> bool {
    match (generation(v), observed_generation(v)) {
        (Some(g), Some(o)) => g == o,
        _ => false,
    }
}

/// True when `child` lists `owner_uid` among its owner references.
pub fn owned_by(child: &Json, owner_uid: &str) -> bool {
    object_meta(child)
        .owner_references
        .unwrap_or_default()
        .iter()
        .any(|r| r.uid == owner_uid)
}

/// Entry of `status.conditions` with the given `type`.
pub fn condition<'a>(v: &'a Json, type_: &str) -> Option<&'a Json> {
    v.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(type_))
}

pub fn condition_status<'a>(v: &'a Json, type_: &str) -> Option<&'a str> {
    condition(v, type_)?.get("status")?.as_str()
}

pub fn condition_is_true(v: &Json, type_: &str) -> bool {
    condition_status(v, type_) == Some("True")
}

/// Render a scalar the way it would be compared against an annotation value.
pub fn scalar_string(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve an int-or-percent field (e.g. `maxUnavailable`) against `total`.
/// Percentages round up when `round_up`, otherwise down, as the controllers do.
pub fn scaled_int_or_percent(v: &Json, total: i64, round_up: bool) -> Option<i64> {
    match IntOrString::deserialize(v).ok()? {
        IntOrString::Int(i) => Some(i64::from(i)),
        IntOrString::String(s) => {
            let pct: i64 = s.trim().strip_suffix('%')?.parse().ok()?;
            let scaled = total.checked_mul(pct)?;
            Some(if round_up { scaled.checked_add(99)? / 100 } else { scaled / 100 })
        }
    }
}
