//! FFI bindings for Integrity Flux
//!
//! C-compatible functions for replaying session logs from other languages.
//! All functions take null-terminated C strings and return allocated memory that
//! must be freed by the caller using `integrity_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::pipeline::{replay_session, IntegrityProcessor};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Parse an optional config JSON pointer (NULL means defaults)
unsafe fn config_from_ptr(config_json: *const c_char) -> MonitorResult<MonitorConfig> {
    match cstr_to_string(config_json) {
        Some(json) => MonitorConfig::from_json(&json),
        None => Ok(MonitorConfig::default()),
    }
}

/// Convert a JSON result into a C string, recording the error on failure
fn json_result_to_cstr(result: MonitorResult<String>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay an NDJSON session log and return the SessionReport JSON.
///
/// # Safety
/// - `ndjson` must be a valid null-terminated C string.
/// - `config_json` may be NULL (default configuration) or a valid C string.
/// - Returns a newly allocated string that must be freed with `integrity_free_string`.
/// - Returns NULL on error; call `integrity_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn integrity_replay(
    ndjson: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let log = match cstr_to_string(ndjson) {
        Some(s) => s,
        None => {
            set_last_error("Invalid NDJSON string pointer");
            return ptr::null_mut();
        }
    };

    json_result_to_cstr(
        config_from_ptr(config_json)
            .and_then(|config| replay_session(&log, &config))
            .and_then(|report| report.to_json_compact()),
    )
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to an IntegrityProcessor
pub struct IntegrityProcessorHandle {
    processor: IntegrityProcessor,
}

/// Create a new processor for one session.
///
/// # Safety
/// - `config_json` may be NULL (default configuration) or a valid C string.
/// - Returns a pointer that must be freed with `integrity_processor_free`.
/// - Returns NULL on error; call `integrity_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn integrity_processor_new(
    config_json: *const c_char,
) -> *mut IntegrityProcessorHandle {
    clear_last_error();

    match config_from_ptr(config_json).and_then(IntegrityProcessor::with_config) {
        Ok(processor) => Box::into_raw(Box::new(IntegrityProcessorHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `integrity_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn integrity_processor_free(processor: *mut IntegrityProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Push one NDJSON record and return the violations it produced as a JSON array.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `integrity_processor_new`.
/// - `line` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `integrity_free_string`.
/// - Returns NULL on error; call `integrity_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn integrity_processor_push(
    processor: *mut IntegrityProcessorHandle,
    line: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let line_str = match cstr_to_string(line) {
        Some(s) => s,
        None => {
            set_last_error("Invalid record string pointer");
            return ptr::null_mut();
        }
    };

    json_result_to_cstr(
        handle
            .processor
            .process_line(&line_str)
            .and_then(|violations| serde_json::to_string(&violations).map_err(MonitorError::from)),
    )
}

/// End the session and return the final SessionReport JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `integrity_processor_new`.
/// - Returns a newly allocated string that must be freed with `integrity_free_string`.
/// - Returns NULL on error; call `integrity_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn integrity_processor_finish(
    processor: *mut IntegrityProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    json_result_to_cstr(
        handle
            .processor
            .finish()
            .and_then(|report| report.to_json_compact()),
    )
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Integrity Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an Integrity Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn integrity_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Integrity Flux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn integrity_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn integrity_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> CString {
        CString::new(
            [
                r#"{"record":"session","session_id":"s-ffi","subject_id":"cand-1","started_at":"2024-01-15T14:00:00Z"}"#,
                r#"{"record":"browser","timestamp":"2024-01-15T14:00:01Z","kind":{"type":"visibility_change","hidden":true}}"#,
                r#"{"record":"browser","timestamp":"2024-01-15T14:00:02Z","kind":{"type":"context_menu"}}"#,
            ]
            .join("\n"),
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_replay() {
        let log = sample_log();
        unsafe {
            let result = integrity_replay(log.as_ptr(), ptr::null());
            assert!(!result.is_null());

            let json: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(json["sessionId"], "s-ffi");
            assert_eq!(json["integrityScore"], 70);
            assert_eq!(json["totalViolations"], 2);

            integrity_free_string(result);
        }
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        unsafe {
            let processor = integrity_processor_new(ptr::null());
            assert!(!processor.is_null());

            let line = CString::new(
                r#"{"record":"browser","timestamp":"2024-01-15T14:00:01Z","kind":{"type":"window_blur"}}"#,
            )
            .unwrap();
            let violations = integrity_processor_push(processor, line.as_ptr());
            assert!(!violations.is_null());
            let parsed: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(violations).to_str().unwrap()).unwrap();
            assert_eq!(parsed[0]["type"], "window_blur");
            integrity_free_string(violations);

            let report = integrity_processor_finish(processor);
            assert!(!report.is_null());
            let report_str = CStr::from_ptr(report).to_str().unwrap();
            assert!(report_str.contains("\"integrityScore\":90"));
            integrity_free_string(report);

            integrity_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            let result = integrity_replay(invalid.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = integrity_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("line 1"));

            let bad_config = CString::new(r#"{"distance": {"min_area": 0.9}}"#).unwrap();
            let processor = integrity_processor_new(bad_config.as_ptr());
            assert!(processor.is_null());
            assert!(!integrity_last_error().is_null());

            assert!(integrity_processor_push(ptr::null_mut(), invalid.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = integrity_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, crate::ENGINE_VERSION);
        }
    }
}
