//! Rendering a `WriteReport` as the JSON response seen by the admin page.

use axum::http::StatusCode;
use serde_json::{json, Map, Value};

use super::WriteReport;
use crate::upstream::classify::{
    error_field, is_invalid_key_message, looks_like_html, mentions_missing_entry_function,
};
use crate::util::truncate_chars;

/// Upstream bodies echoed back for diagnostics are cut to this many
/// characters.
pub const UPSTREAM_BODY_LIMIT: usize = 800;

const UNREACHABLE: &str = "Falha ao enviar para Apps Script.";
const INVALID_KEY_HINT: &str =
    "Chave invalida no Apps Script. Verifique a constante ADMIN_KEY do script.";
const BROKEN_DEPLOYMENT: &str =
    "Apps Script invalido para Web App. Publique novamente a implantacao web.";

/// Map the final state of a write request to a status and JSON body.
pub fn render(report: &WriteReport) -> (StatusCode, Value) {
    let Some(reply) = report.last_reply.as_ref() else {
        return (
            StatusCode::BAD_GATEWAY,
            json!({ "ok": false, "error": UNREACHABLE }),
        );
    };

    if !reply.is_success() {
        let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let error = reply
            .object()
            .and_then(|o| o.get("error"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Apps Script retornou {}", reply.status));
        return (
            status,
            json!({
                "ok": false,
                "error": error,
                "upstream_status": reply.status,
                "upstream_body": truncate_chars(&reply.text, UPSTREAM_BODY_LIMIT),
            }),
        );
    }

    if let Some(object) = reply.object() {
        return match object.get("ok").and_then(Value::as_bool) {
            Some(false)
                if error_field(reply.parsed.as_ref())
                    .as_deref()
                    .is_some_and(is_invalid_key_message) =>
            {
                (
                    StatusCode::UNAUTHORIZED,
                    json!({
                        "ok": false,
                        "error": INVALID_KEY_HINT,
                        "tried_keys": report.tried_keys,
                    }),
                )
            }
            Some(_) => (StatusCode::OK, Value::Object(object.clone())),
            None => {
                let mut wrapped = Map::new();
                wrapped.insert("ok".to_string(), Value::Bool(true));
                wrapped.extend(object.clone());
                (StatusCode::OK, Value::Object(wrapped))
            }
        };
    }

    if looks_like_html(&reply.text) || mentions_missing_entry_function(&reply.text) {
        return (
            StatusCode::BAD_GATEWAY,
            json!({
                "ok": false,
                "error": BROKEN_DEPLOYMENT,
                "upstream_status": reply.status,
                "upstream_body": truncate_chars(&reply.text, UPSTREAM_BODY_LIMIT),
            }),
        );
    }

    let message = if reply.text.is_empty() {
        "OK"
    } else {
        reply.text.as_str()
    };
    (StatusCode::OK, json!({ "ok": true, "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{classify, UpstreamReply};

    fn report(reply: Option<UpstreamReply>) -> WriteReport {
        let last_outcome = reply
            .as_ref()
            .map(|r| classify(r.status, r.parsed.as_ref(), &r.text));
        WriteReport {
            last_reply: reply,
            last_outcome,
            tried_keys: 5,
            attempts: 1,
            used_fallback: false,
        }
    }

    #[test]
    fn no_reply_is_bad_gateway() {
        let (status, body) = render(&report(None));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, json!({"ok": false, "error": UNREACHABLE}));
    }

    #[test]
    fn upstream_error_status_is_propagated_with_its_message() {
        let reply = UpstreamReply::new(500, r#"{"ok":false,"error":"linha inexistente"}"#);
        let (status, body) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "linha inexistente");
        assert_eq!(body["upstream_status"], 500);
        assert_eq!(body["upstream_body"], r#"{"ok":false,"error":"linha inexistente"}"#);
    }

    #[test]
    fn upstream_error_without_message_is_synthesized() {
        let reply = UpstreamReply::new(503, "x".repeat(2_000));
        let (status, body) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Apps Script retornou 503");
        assert_eq!(
            body["upstream_body"].as_str().map(|s| s.chars().count()),
            Some(UPSTREAM_BODY_LIMIT)
        );
    }

    #[test]
    fn explicit_ok_objects_pass_through() {
        let reply = UpstreamReply::new(200, r#"{"ok":true,"row":42}"#);
        let (status, body) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "row": 42}));

        let domain_error = UpstreamReply::new(200, r#"{"ok":false,"error":"Data invalida"}"#);
        let (status, body) = render(&report(Some(domain_error)));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": false, "error": "Data invalida"}));
    }

    #[test]
    fn rejected_key_becomes_configuration_hint() {
        let reply = UpstreamReply::new(200, r#"{"ok":false,"error":"Chave inválida"}"#);
        let (status, body) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body,
            json!({"ok": false, "error": INVALID_KEY_HINT, "tried_keys": 5})
        );
    }

    #[test]
    fn objects_without_ok_are_wrapped() {
        let reply = UpstreamReply::new(200, r#"{"row":9,"status":"created"}"#);
        let (status, body) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "row": 9, "status": "created"}));
    }

    #[test]
    fn html_success_page_is_reported_as_broken_deployment() {
        let page = format!("<!DOCTYPE html><html>{}</html>", "a".repeat(1_000));
        let reply = UpstreamReply::new(200, page);
        let (status, body) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], BROKEN_DEPLOYMENT);
        assert_eq!(body["upstream_status"], 200);
        assert_eq!(
            body["upstream_body"].as_str().map(|s| s.chars().count()),
            Some(UPSTREAM_BODY_LIMIT)
        );
    }

    #[test]
    fn missing_entry_function_text_is_broken_deployment() {
        let reply = UpstreamReply::new(200, "Função de script não encontrada: doGet");
        let (status, _) = render(&report(Some(reply)));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn plain_text_success_becomes_message() {
        let (status, body) = render(&report(Some(UpstreamReply::new(200, "Salvo"))));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "message": "Salvo"}));

        let (_, body) = render(&report(Some(UpstreamReply::new(200, ""))));
        assert_eq!(body, json!({"ok": true, "message": "OK"}));
    }
}
