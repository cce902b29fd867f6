//! FFI layer for host app integration
//!
//! Provides C-compatible functions that can be called from Swift or Kotlin.
//! Uses an opaque handle and JSON-encoded C strings in both directions.

// FFI functions necessarily work with raw pointers - this is expected behavior
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::PolicyThresholds;
use crate::error::{Error, Result};
use crate::intent::{IntentPlan, IntentPlanner};
use crate::lexicon::LexiconStore;
use crate::parser::{ParseRequest, VoiceParser};
use crate::policy::{InputSource, PolicyDecision, PolicyInput, evaluate_policy};
use crate::types::UserMedication;

/// Errors raised before a handle exists (or with a null handle)
static GLOBAL_LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// Opaque handle holding the medication lexicon and the parsers built on it
pub struct PainlogHandle {
    lexicons: LexiconStore,
    parser: VoiceParser,
    planner: IntentPlanner,
    last_error: Mutex<Option<String>>,
}

/// Planner output plus the policy decision for it
#[derive(Debug, Serialize)]
struct PlannedCommand {
    plan: IntentPlan,
    decision: PolicyDecision,
}

fn set_last_error(handle: Option<&PainlogHandle>, message: impl Into<String>) {
    let message = message.into();
    error!("{}", message);
    match handle {
        Some(handle) => *handle.last_error.lock() = Some(message),
        None => *GLOBAL_LAST_ERROR.lock() = Some(message),
    }
}

fn clear_last_error(handle: &PainlogHandle) {
    *handle.last_error.lock() = None;
}

fn handle_ref<'a>(handle: *mut PainlogHandle) -> Option<&'a PainlogHandle> {
    if handle.is_null() {
        set_last_error(None, "Null painlog handle");
        return None;
    }
    Some(unsafe { &*handle })
}

/// Borrow a C string as UTF-8
fn read_str<'a>(value: *const c_char, what: &str) -> Result<&'a str> {
    if value.is_null() {
        return Err(Error::InvalidInput(format!("{} is null", what)));
    }
    unsafe { CStr::from_ptr(value) }
        .to_str()
        .map_err(|_| Error::InvalidInput(format!("{} is not valid UTF-8", what)))
}

fn to_json_ptr<T: Serialize>(value: &T) -> Result<*mut c_char> {
    let json = serde_json::to_string(value)?;
    CString::new(json)
        .map(CString::into_raw)
        .map_err(|_| Error::InvalidInput("Output contains a NUL byte".to_string()))
}

fn parse_medications(json: *const c_char) -> Result<Vec<UserMedication>> {
    if json.is_null() {
        return Ok(Vec::new());
    }
    let json = read_str(json, "Medication list")?;
    Ok(serde_json::from_str(json)?)
}

fn parse_source(source: *const c_char) -> Result<InputSource> {
    if source.is_null() {
        return Ok(InputSource::default());
    }
    let source = read_str(source, "Input source")?;
    Ok(serde_json::from_value(serde_json::Value::String(
        source.to_string(),
    ))?)
}

/// Run `f` against a live handle, recording any error on it
fn with_handle(
    handle: *mut PainlogHandle,
    f: impl FnOnce(&PainlogHandle) -> Result<*mut c_char>,
) -> *mut c_char {
    let Some(handle) = handle_ref(handle) else {
        return ptr::null_mut();
    };
    match f(handle) {
        Ok(out) => {
            clear_last_error(handle);
            out
        }
        Err(e) => {
            set_last_error(Some(handle), e.to_string());
            ptr::null_mut()
        }
    }
}

// ============ Lifecycle ============

/// Create a handle from a JSON array of medications:
/// `[{"id": "...", "name": "Ibuprofen 400 mg", "active_ingredient": "..."}, ...]`
/// A null pointer creates a handle with an empty lexicon.
/// Returns null on failure (see `painlog_last_error` with a null handle).
#[unsafe(no_mangle)]
pub extern "C" fn painlog_lexicon_new(medications_json: *const c_char) -> *mut PainlogHandle {
    let medications = match parse_medications(medications_json) {
        Ok(m) => m,
        Err(e) => {
            set_last_error(None, format!("Failed to read medications: {}", e));
            return ptr::null_mut();
        }
    };

    let lexicons = LexiconStore::new();
    lexicons.refresh(&medications);
    let handle = PainlogHandle {
        lexicons,
        parser: VoiceParser::default(),
        planner: IntentPlanner::default(),
        last_error: Mutex::new(None),
    };
    *GLOBAL_LAST_ERROR.lock() = None;
    debug!("Painlog handle created with {} medication(s)", medications.len());
    Box::into_raw(Box::new(handle))
}

/// Replace the medication list. The lexicon is only rebuilt when the list changed.
/// Returns true on success
#[unsafe(no_mangle)]
pub extern "C" fn painlog_lexicon_update(
    handle: *mut PainlogHandle,
    medications_json: *const c_char,
) -> bool {
    let Some(handle) = handle_ref(handle) else {
        return false;
    };
    match parse_medications(medications_json) {
        Ok(medications) => {
            handle.lexicons.refresh(&medications);
            clear_last_error(handle);
            true
        }
        Err(e) => {
            set_last_error(Some(handle), format!("Failed to read medications: {}", e));
            false
        }
    }
}

/// Destroy the handle and free resources
#[unsafe(no_mangle)]
pub extern "C" fn painlog_lexicon_free(handle: *mut PainlogHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
        debug!("Painlog handle destroyed");
    }
}

// ============ Parsing ============

/// Parse a transcript against the local clock
/// Returns VoiceParseResult JSON (caller must free with painlog_free_string), or null on failure
#[unsafe(no_mangle)]
pub extern "C" fn painlog_parse(handle: *mut PainlogHandle, transcript: *const c_char) -> *mut c_char {
    with_handle(handle, |handle| {
        let transcript = read_str(transcript, "Transcript")?;
        let lexicon = handle.lexicons.current();
        to_json_ptr(&handle.parser.parse(transcript, &lexicon))
    })
}

/// Parse a request: `{"transcript": "...", "stt_confidence": 0.8, "reference_time": "2024-06-12T14:00:00"}`
/// Returns VoiceParseResult JSON (caller must free with painlog_free_string), or null on failure
#[unsafe(no_mangle)]
pub extern "C" fn painlog_parse_request(
    handle: *mut PainlogHandle,
    request_json: *const c_char,
) -> *mut c_char {
    with_handle(handle, |handle| {
        let request: ParseRequest = serde_json::from_str(read_str(request_json, "Request")?)?;
        let lexicon = handle.lexicons.current();
        to_json_ptr(&handle.parser.parse_request(&request, &lexicon))
    })
}

// ============ Commands ============

/// Plan a voice command and run it through the policy gate with default thresholds
/// source: "typed", "speech" or "speech_fallback" (null = "speech")
/// Returns `{"plan": {...}, "decision": {"kind": "...", "reason": "...", "message": "..."}}`
/// Caller must free the returned string with painlog_free_string
#[unsafe(no_mangle)]
pub extern "C" fn painlog_plan_intent(
    handle: *mut PainlogHandle,
    command: *const c_char,
    source: *const c_char,
) -> *mut c_char {
    with_handle(handle, |handle| {
        let command = read_str(command, "Command")?;
        let source = parse_source(source)?;
        let lexicon = handle.lexicons.current();
        let plan = handle
            .planner
            .plan(command, &lexicon, Local::now().naive_local());
        let decision = evaluate_policy(&plan.policy_input(source), &PolicyThresholds::default());
        to_json_ptr(&PlannedCommand { plan, decision })
    })
}

/// Evaluate the policy gate for a PolicyInput JSON with default thresholds
/// Returns PolicyDecision JSON (caller must free with painlog_free_string), or null on failure
#[unsafe(no_mangle)]
pub extern "C" fn painlog_evaluate_policy(input_json: *const c_char) -> *mut c_char {
    let result = read_str(input_json, "Policy input")
        .and_then(|json| Ok(serde_json::from_str::<PolicyInput>(json)?))
        .and_then(|input| to_json_ptr(&evaluate_policy(&input, &PolicyThresholds::default())));
    match result {
        Ok(out) => {
            *GLOBAL_LAST_ERROR.lock() = None;
            out
        }
        Err(e) => {
            set_last_error(None, format!("Failed to evaluate policy: {}", e));
            ptr::null_mut()
        }
    }
}

// ============ Memory & Errors ============

/// Free a string returned by any painlog function
#[unsafe(no_mangle)]
pub extern "C" fn painlog_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Get the last error message for a handle, or the global one for a null handle
/// Returns null when there is no error; caller must free with painlog_free_string
#[unsafe(no_mangle)]
pub extern "C" fn painlog_last_error(handle: *mut PainlogHandle) -> *mut c_char {
    let message = if handle.is_null() {
        GLOBAL_LAST_ERROR.lock().clone()
    } else {
        unsafe { &*handle }.last_error.lock().clone()
    };
    match message {
        Some(text) => match CString::new(text) {
            Ok(cstr) => cstr.into_raw(),
            Err(_) => ptr::null_mut(),
        },
        None => ptr::null_mut(),
    }
}
