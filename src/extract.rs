//! Defensive accessors over framework request/response captures.
//!
//! Frameworks hand over request and response objects of wildly varying
//! shape, captured here as `serde_json::Value`. Every accessor returns a
//! typed value with a fixed fallback when any step of the access chain is
//! absent, null, or of the wrong type. No accessor ever panics.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::record::{RequestData, ResponseData};

/// HTTP method, falling back to "UNKNOWN".
pub fn method(req: Option<&Value>) -> String {
    req.and_then(|r| r.get("method"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("UNKNOWN")
        .to_string()
}

/// Request URL, falling back to "/".
pub fn url(req: Option<&Value>) -> String {
    req.and_then(|r| r.get("url").or_else(|| r.get("originalUrl")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("/")
        .to_string()
}

/// String map at the given key, falling back to an empty map. Non-string
/// values are stringified rather than dropped.
fn string_map(obj: Option<&Value>, key: &str) -> BTreeMap<String, String> {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn headers(req: Option<&Value>) -> BTreeMap<String, String> {
    string_map(req, "headers")
}

pub fn query(req: Option<&Value>) -> BTreeMap<String, String> {
    string_map(req, "query")
}

pub fn params(req: Option<&Value>) -> BTreeMap<String, String> {
    string_map(req, "params")
}

/// Request body as-is, absent when missing or null.
pub fn body(obj: Option<&Value>) -> Option<Value> {
    obj.and_then(|o| o.get("body"))
        .filter(|b| !b.is_null())
        .cloned()
}

/// Client IP: explicit `ip` field, then the connection-layer remote address,
/// then the socket-layer one, falling back to the literal "unknown".
pub fn ip(req: Option<&Value>) -> String {
    let direct = req.and_then(|r| r.get("ip")).and_then(Value::as_str);
    let connection = req
        .and_then(|r| r.get("connection"))
        .and_then(|c| c.get("remoteAddress"))
        .and_then(Value::as_str);
    let socket = req
        .and_then(|r| r.get("socket"))
        .and_then(|s| s.get("remoteAddress"))
        .and_then(Value::as_str);

    direct
        .or(connection)
        .or(socket)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// User agent from either casing of the header, falling back to "".
pub fn user_agent(req: Option<&Value>) -> String {
    let headers = req.and_then(|r| r.get("headers"));
    headers
        .and_then(|h| h.get("user-agent").or_else(|| h.get("User-Agent")))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Response status: `status` field, then `statusCode`, falling back to 200.
pub fn status_code(res: Option<&Value>) -> u16 {
    res.and_then(|r| r.get("status").or_else(|| r.get("statusCode")))
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(200)
}

/// User id attached to the request by upstream auth middleware, if any.
pub fn user_id(req: Option<&Value>) -> Option<String> {
    req.and_then(|r| r.get("user"))
        .and_then(|u| u.get("id"))
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// Correlation id propagated by an upstream proxy, if any.
pub fn correlation_id(req: Option<&Value>) -> Option<String> {
    req.and_then(|r| r.get("headers"))
        .and_then(|h| h.get("x-correlation-id").or_else(|| h.get("X-Correlation-Id")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Assemble the full request view in one pass.
pub fn request_data(req: Option<&Value>) -> RequestData {
    RequestData {
        method: method(req),
        url: url(req),
        headers: headers(req),
        body: body(req),
        query: query(req),
        params: params(req),
        ip: ip(req),
        user_agent: user_agent(req),
    }
}

/// Assemble the response view; `size_bytes` is computed by the caller from
/// the sanitized body.
pub fn response_data(res: Option<&Value>, size_bytes: u64) -> ResponseData {
    ResponseData {
        status_code: status_code(res),
        headers: string_map(res, "headers"),
        body: body(res),
        size_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_fallbacks() {
        assert_eq!(method(None), "UNKNOWN");
        assert_eq!(method(Some(&Value::Null)), "UNKNOWN");
        assert_eq!(method(Some(&json!({}))), "UNKNOWN");
        assert_eq!(method(Some(&json!({"method": 5}))), "UNKNOWN");
        assert_eq!(method(Some(&json!({"method": "POST"}))), "POST");
    }

    #[test]
    fn url_fallbacks() {
        assert_eq!(url(None), "/");
        assert_eq!(url(Some(&json!({}))), "/");
        assert_eq!(url(Some(&json!({"url": "/api/users"}))), "/api/users");
        assert_eq!(url(Some(&json!({"originalUrl": "/orig"}))), "/orig");
    }

    #[test]
    fn headers_fall_back_to_empty_map() {
        assert!(headers(None).is_empty());
        assert!(headers(Some(&Value::Null)).is_empty());
        assert!(headers(Some(&json!({"headers": "nope"}))).is_empty());

        let h = headers(Some(&json!({"headers": {"host": "x", "retries": 3}})));
        assert_eq!(h.get("host").map(String::as_str), Some("x"));
        assert_eq!(h.get("retries").map(String::as_str), Some("3"));
    }

    #[test]
    fn ip_resolution_order() {
        assert_eq!(ip(None), "unknown");
        assert_eq!(ip(Some(&json!({}))), "unknown");
        assert_eq!(
            ip(Some(&json!({"socket": {"remoteAddress": "10.0.0.3"}}))),
            "10.0.0.3"
        );
        assert_eq!(
            ip(Some(
                &json!({"connection": {"remoteAddress": "10.0.0.2"}, "socket": {"remoteAddress": "10.0.0.3"}})
            )),
            "10.0.0.2"
        );
        assert_eq!(
            ip(Some(
                &json!({"ip": "10.0.0.1", "connection": {"remoteAddress": "10.0.0.2"}})
            )),
            "10.0.0.1"
        );
    }

    #[test]
    fn user_agent_checks_both_casings() {
        assert_eq!(user_agent(None), "");
        assert_eq!(
            user_agent(Some(&json!({"headers": {"user-agent": "curl/8"}}))),
            "curl/8"
        );
        assert_eq!(
            user_agent(Some(&json!({"headers": {"User-Agent": "curl/8"}}))),
            "curl/8"
        );
    }

    #[test]
    fn status_code_fallbacks() {
        assert_eq!(status_code(None), 200);
        assert_eq!(status_code(Some(&json!({}))), 200);
        assert_eq!(status_code(Some(&json!({"statusCode": 404}))), 404);
        assert_eq!(status_code(Some(&json!({"status": 201, "statusCode": 404}))), 201);
        assert_eq!(status_code(Some(&json!({"status": 99999}))), 200);
    }

    #[test]
    fn body_drops_null() {
        assert_eq!(body(Some(&json!({"body": null}))), None);
        assert_eq!(body(Some(&json!({"body": {"a": 1}}))), Some(json!({"a": 1})));
    }

    #[test]
    fn user_and_correlation_ids() {
        assert_eq!(user_id(None), None);
        assert_eq!(user_id(Some(&json!({"user": {"id": "u42"}}))), Some("u42".into()));
        assert_eq!(user_id(Some(&json!({"user": {"id": 42}}))), Some("42".into()));
        assert_eq!(
            correlation_id(Some(&json!({"headers": {"x-correlation-id": "abc"}}))),
            Some("abc".into())
        );
    }

    #[test]
    fn full_request_view_from_empty_object() {
        let data = request_data(Some(&json!({})));
        assert_eq!(data.method, "UNKNOWN");
        assert_eq!(data.url, "/");
        assert_eq!(data.ip, "unknown");
        assert_eq!(data.user_agent, "");
        assert!(data.headers.is_empty());
        assert!(data.body.is_none());
    }
}
