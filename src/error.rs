use anyhow::anyhow;
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::{CLIENT_ID_ENV, CLIENT_SECRET_ENV};

/// Error payloads returned by the Process API and by the OAuth token endpoint.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum ShErrorResponse {
    // {"error": {"status": 400, "reason": "...", "message": "...", "code": "..."}}
    Process {
        error: ProcessError,
    },
    // {"error": "invalid_client", "error_description": "..."}
    OAuth {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessError {
    #[serde(default)]
    pub(crate) status: Option<u16>,
    #[serde(default)]
    pub(crate) reason: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) errors: Option<Value>,
}

pub(crate) fn format_sh_error(status: StatusCode, url: &str, e: &ShErrorResponse) -> anyhow::Error {
    let (message, detail, code) = match e {
        ShErrorResponse::Process { error } => (
            error
                .message
                .as_deref()
                .or(error.reason.as_deref())
                .unwrap_or("")
                .to_string(),
            error
                .errors
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            error.code.clone().unwrap_or_default(),
        ),
        ShErrorResponse::OAuth {
            error,
            error_description,
        } => (
            error_description.clone().unwrap_or_default(),
            String::new(),
            error.clone(),
        ),
    };
    let status_in_body = match e {
        ShErrorResponse::Process { error } => error.status.unwrap_or(status.as_u16()),
        ShErrorResponse::OAuth { .. } => status.as_u16(),
    };

    let bad_client = matches!(e, ShErrorResponse::OAuth { error, .. } if error == "invalid_client" || error == "unauthorized_client");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || bad_client {
        return anyhow!(
            "Sentinel Hub authentication/authorization failed (HTTP {}).\n- Check {} and {} (or the stored profile) hold a valid OAuth client\n- Clients created on one deployment do not work on another; check the profile's base and token URLs\n\nServer message: {}\ncode: {}\nrequest: {}",
            status_in_body,
            CLIENT_ID_ENV,
            CLIENT_SECRET_ENV,
            message,
            if code.is_empty() { "(none)" } else { code.as_str() },
            url
        );
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return anyhow!(
            "Sentinel Hub rate limit or processing-unit quota exceeded (HTTP 429).\n\nServer message: {}\nrequest: {}",
            message,
            url
        );
    }

    anyhow!(
        "API request failed: HTTP {} for url ({})\n{}{}{}",
        status_in_body,
        url,
        message,
        if code.is_empty() { String::new() } else { format!(" [{}]", code) },
        if detail.is_empty() { String::new() } else { format!("\n{}", detail) }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ShErrorResponse {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn process_error_keeps_message_and_code() {
        let e = parse(
            r#"{"error":{"status":400,"reason":"Bad Request","message":"Invalid bbox","code":"COMMON_BAD_PAYLOAD"}}"#,
        );
        let msg = format_sh_error(StatusCode::BAD_REQUEST, "https://x/api/v1/process", &e).to_string();
        assert!(msg.contains("HTTP 400"));
        assert!(msg.contains("Invalid bbox"));
        assert!(msg.contains("COMMON_BAD_PAYLOAD"));
    }

    #[test]
    fn oauth_error_points_at_credentials() {
        let e = parse(r#"{"error":"invalid_client","error_description":"Invalid client credentials"}"#);
        let msg = format_sh_error(StatusCode::BAD_REQUEST, "https://x/token", &e).to_string();
        assert!(msg.contains("authentication"));
        assert!(msg.contains(CLIENT_ID_ENV));
        assert!(msg.contains("Invalid client credentials"));
    }

    #[test]
    fn quota_error_is_explicit() {
        let e = parse(r#"{"error":{"status":429,"reason":"Too Many Requests","message":"quota"}}"#);
        let msg = format_sh_error(StatusCode::TOO_MANY_REQUESTS, "u", &e).to_string();
        assert!(msg.contains("quota exceeded"));
    }
}
