//! Integration tests for the FFI layer
//!
//! These tests verify the C-compatible FFI functions that are called from the host app.
//! Tests focus on handle lifecycle, error handling, and JSON marshalling.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use painlog::ffi::*;

// ============ Helper Functions ============

fn c_str(s: &str) -> CString {
    CString::new(s).expect("CString creation failed")
}

fn from_c_str_and_free(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        let result = unsafe { CStr::from_ptr(ptr).to_str().ok().map(String::from) };
        painlog_free_string(ptr);
        result
    }
}

fn json_and_free(ptr: *mut c_char) -> serde_json::Value {
    let text = from_c_str_and_free(ptr).expect("FFI call returned null");
    serde_json::from_str(&text).expect("FFI call returned invalid JSON")
}

fn new_handle() -> *mut PainlogHandle {
    let meds = c_str(r#"[{"id": "med-ibu", "name": "Ibuprofen 400 mg"}, {"name": "Sumatriptan 50 mg"}]"#);
    painlog_lexicon_new(meds.as_ptr())
}

// ============ Handle Lifecycle Tests ============

#[test]
fn test_new_and_free() {
    let handle = new_handle();
    assert!(!handle.is_null(), "painlog_lexicon_new should not return null");
    painlog_lexicon_free(handle);
}

#[test]
fn test_new_with_null_list() {
    let handle = painlog_lexicon_new(ptr::null());
    assert!(!handle.is_null());
    painlog_lexicon_free(handle);
}

#[test]
fn test_new_with_invalid_json() {
    let bad = c_str("not json");
    let handle = painlog_lexicon_new(bad.as_ptr());
    assert!(handle.is_null());
}

#[test]
fn test_free_null_handle() {
    painlog_lexicon_free(ptr::null_mut());
}

// ============ Parse Tests ============

#[test]
fn test_parse() {
    let handle = new_handle();
    let text = c_str("Schmerzstärke 6, Ibuprofen genommen");
    let json = json_and_free(painlog_parse(handle, text.as_ptr()));

    assert_eq!(json["entry_type"], "new_entry");
    assert_eq!(json["pain"]["value"], 6);
    assert_eq!(json["medications"][0]["name"], "Ibuprofen 400 mg");
    assert_eq!(json["medications"][0]["medication_id"], "med-ibu");

    assert!(painlog_last_error(handle).is_null());
    painlog_lexicon_free(handle);
}

#[test]
fn test_parse_null_transcript() {
    let handle = new_handle();
    let result = painlog_parse(handle, ptr::null());
    assert!(result.is_null());

    let error = from_c_str_and_free(painlog_last_error(handle));
    assert!(error.is_some_and(|e| e.contains("Transcript")));
    painlog_lexicon_free(handle);
}

#[test]
fn test_parse_null_handle() {
    let text = c_str("Schmerzstärke 6");
    assert!(painlog_parse(ptr::null_mut(), text.as_ptr()).is_null());
}

#[test]
fn test_parse_request() {
    let handle = new_handle();
    let request = c_str(
        r#"{"transcript": "vor 20 Minuten Schmerzstärke 5", "stt_confidence": 0.3, "reference_time": "2024-06-12T14:00:00"}"#,
    );
    let json = json_and_free(painlog_parse_request(handle, request.as_ptr()));

    assert_eq!(json["time"]["minutes_ago"], 20);
    assert_eq!(json["time"]["instant"], "2024-06-12T13:40:00");
    assert_eq!(json["needs_review"], true);
    let reasons = json["review_reasons"].as_array().unwrap();
    assert!(reasons.iter().any(|r| r == "low_stt_confidence"));
    painlog_lexicon_free(handle);
}

#[test]
fn test_error_cleared_after_success() {
    let handle = new_handle();
    let bad = c_str("{");
    assert!(painlog_parse_request(handle, bad.as_ptr()).is_null());
    assert!(from_c_str_and_free(painlog_last_error(handle)).is_some());

    let text = c_str("Migräne");
    let _ = json_and_free(painlog_parse(handle, text.as_ptr()));
    assert!(painlog_last_error(handle).is_null());
    painlog_lexicon_free(handle);
}

// ============ Lexicon Update Tests ============

#[test]
fn test_lexicon_update() {
    let handle = painlog_lexicon_new(ptr::null());
    let text = c_str("Rizatriptan genommen");

    let before = json_and_free(painlog_parse(handle, text.as_ptr()));
    assert_eq!(before["medications"][0]["is_registered"], false);

    let meds = c_str(r#"[{"name": "Rizatriptan 10 mg"}]"#);
    assert!(painlog_lexicon_update(handle, meds.as_ptr()));

    let after = json_and_free(painlog_parse(handle, text.as_ptr()));
    assert_eq!(after["medications"][0]["name"], "Rizatriptan 10 mg");
    assert_eq!(after["medications"][0]["is_registered"], true);
    painlog_lexicon_free(handle);
}

#[test]
fn test_lexicon_update_invalid_json() {
    let handle = new_handle();
    let bad = c_str(r#"[{"id": 1}]"#);
    assert!(!painlog_lexicon_update(handle, bad.as_ptr()));
    assert!(from_c_str_and_free(painlog_last_error(handle)).is_some());
    painlog_lexicon_free(handle);
}

// ============ Command Tests ============

#[test]
fn test_plan_intent() {
    let handle = new_handle();
    let command = c_str("Öffne das Tagebuch");
    let source = c_str("speech");
    let json = json_and_free(painlog_plan_intent(handle, command.as_ptr(), source.as_ptr()));

    assert_eq!(json["plan"]["kind"], "open_diary");
    assert_eq!(json["plan"]["category"], "navigate");
    assert_eq!(json["decision"]["kind"], "auto_execute");
    painlog_lexicon_free(handle);
}

#[test]
fn test_plan_intent_destructive() {
    let handle = new_handle();
    let command = c_str("Lösche den letzten Eintrag");
    let json = json_and_free(painlog_plan_intent(handle, command.as_ptr(), ptr::null()));

    assert_eq!(json["plan"]["kind"], "delete_last_entry");
    assert_eq!(json["plan"]["destructive"], true);
    assert_eq!(json["decision"]["kind"], "confirm");
    assert_eq!(json["decision"]["reason"], "destructive");
    painlog_lexicon_free(handle);
}

#[test]
fn test_plan_intent_invalid_source() {
    let handle = new_handle();
    let command = c_str("Öffne das Tagebuch");
    let source = c_str("telepathy");
    assert!(painlog_plan_intent(handle, command.as_ptr(), source.as_ptr()).is_null());
    assert!(from_c_str_and_free(painlog_last_error(handle)).is_some());
    painlog_lexicon_free(handle);
}

#[test]
fn test_evaluate_policy() {
    let input = c_str(r#"{"confidence": 0.7, "category": "mutation", "source": "typed"}"#);
    let json = json_and_free(painlog_evaluate_policy(input.as_ptr()));
    assert_eq!(json["kind"], "confirm");
    assert_eq!(json["reason"], "below_auto_execute");
    assert_eq!(json["message"], "Confidence 0.70 below auto-execute 0.90");
}

#[test]
fn test_evaluate_policy_invalid_input() {
    assert!(painlog_evaluate_policy(ptr::null()).is_null());
    let bad = c_str(r#"{"confidence": 0.7}"#);
    assert!(painlog_evaluate_policy(bad.as_ptr()).is_null());
}

// ============ String Memory Tests ============

#[test]
fn test_free_null_string() {
    painlog_free_string(ptr::null_mut());
}
