use chrono::Utc;
use trident_portal::models::{
    AuditLog, CallbackRequest, CallbackResponse, CallbackStatus, LoginRequest, LoginResponse,
    Role, WhoAmIResponse,
};
use uuid::Uuid;

// --- Tests ---

#[test]
fn test_anonymous_whoami_serialization() {
    let json_output = serde_json::to_string(&WhoAmIResponse::default()).unwrap();

    // Anonymous callers learn nothing beyond the flag.
    assert_eq!(json_output, r#"{"authenticated":false,"sections":[]}"#);
}

#[test]
fn test_whoami_role_is_lowercase() {
    let response = WhoAmIResponse {
        authenticated: true,
        user_id: Some(Uuid::nil()),
        email: None,
        role: Some(Role::Admin),
        full_name: Some("Ada".to_string()),
        sections: vec!["/admin".to_string()],
    };

    let json_output = serde_json::to_string(&response).unwrap();
    assert!(json_output.contains(r#""role":"admin""#));
    assert!(!json_output.contains("email"));
}

#[test]
fn test_whoami_tolerates_unknown_role() {
    // A newer portal may know roles this build does not; they read as the lowest tier.
    let parsed: WhoAmIResponse =
        serde_json::from_str(r#"{"authenticated":true,"role":"owner"}"#).unwrap();

    assert_eq!(parsed.role, Some(Role::Student));
    assert!(parsed.sections.is_empty());
}

#[test]
fn test_callback_response_optionality() {
    let ok = CallbackResponse {
        status: CallbackStatus::Ok,
        redirect: Some("/mentor".to_string()),
        message: None,
    };
    let json_output = serde_json::to_string(&ok).unwrap();
    assert_eq!(json_output, r#"{"status":"ok","redirect":"/mentor"}"#);

    let failed = CallbackResponse {
        status: CallbackStatus::Error,
        redirect: None,
        message: Some("malformed callback URL".to_string()),
    };
    let json_output = serde_json::to_string(&failed).unwrap();
    assert!(json_output.contains(r#""status":"error""#));
    assert!(!json_output.contains("redirect"));
}

#[test]
fn test_callback_request_parsing() {
    let request: CallbackRequest = serde_json::from_str(
        r#"{"url":"https://portal.example/auth/callback#access_token=a&refresh_token=r"}"#,
    )
    .unwrap();

    assert!(request.url.ends_with("refresh_token=r"));
}

#[test]
fn test_audit_log_details_stay_structured() {
    let log = AuditLog {
        id: 1,
        user_id: None,
        action: "SIGN_IN_FAILED".to_string(),
        details: serde_json::json!({ "step": "code" }),
        created_at: Utc::now(),
    };

    let value = serde_json::to_value(&log).unwrap();
    assert_eq!(value["details"]["step"], "code");
    assert!(value["user_id"].is_null());
}

#[test]
fn test_login_request_address_validation() {
    let login = |email: &str| LoginRequest {
        email: email.to_string(),
    };

    assert_eq!(login(" s@uni.example ").address(), Some("s@uni.example"));
    assert_eq!(login("").address(), None);
    assert_eq!(login("no-at-sign").address(), None);
    assert_eq!(login("@uni.example").address(), None);
    assert_eq!(login("s@").address(), None);
}

#[test]
fn test_login_response_omits_empty_message() {
    let json_output = serde_json::to_string(&LoginResponse {
        sent: true,
        message: None,
    })
    .unwrap();
    assert_eq!(json_output, r#"{"sent":true}"#);
}
