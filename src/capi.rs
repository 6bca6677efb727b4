//! C ABI.
//!
//! A thin shim over the context value for C and C++ hosts (or any FFI with
//! a C-compatible ABI). The context lives in a process-global slot behind a
//! one-time initializer; errors are reported as `0`/`1` returns with the
//! message parked in a thread-local slot that `flop_get_error` borrows from.
//! Nothing unwinds across the boundary.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::analysis::{AnalyzeRequest, Summary, Tonemap};
use crate::context::{Context, ContextOptions};
use crate::error::Error;

/// Mirror of the C `FlopSummary` struct.
#[repr(C)]
pub struct FlopSummary {
    pub width: c_int,
    pub height: c_int,
    pub milliseconds_elapsed: c_int,
}

lazy_static! {
    static ref CONTEXT: Mutex<Option<Context>> = Mutex::new(None);
}

static VALIDATION: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

fn set_last_error(error: &Error) {
    let message = CString::new(error.to_string()).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

fn lock_context() -> std::sync::MutexGuard<'static, Option<Context>> {
    match CONTEXT.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Returns the last reported error message, or "" if none was reported.
/// The pointer stays valid until the next failing call on this thread.
#[no_mangle]
pub extern "C" fn flop_get_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

/// Opts in to GPU validation layers at the next `flop_init`.
#[no_mangle]
pub extern "C" fn flop_config_enable_validation() {
    VALIDATION.store(true, Ordering::SeqCst);
}

unsafe fn collect_extensions(count: u32, names: *const *const c_char) -> Vec<String> {
    let mut extensions = Vec::new();
    if names.is_null() {
        return extensions;
    }
    for i in 0..count as usize {
        let name = *names.add(i);
        if !name.is_null() {
            extensions.push(CStr::from_ptr(name).to_string_lossy().into_owned());
        }
    }
    extensions
}

fn init_in_slot(slot: &mut Option<Context>, instance_extensions: Vec<String>) -> c_int {
    if slot.is_some() {
        return 0;
    }
    let options = ContextOptions {
        validation: VALIDATION.load(Ordering::SeqCst),
        instance_extensions,
        preferred_device: None,
    };
    match Context::new(&options) {
        Ok(context) => {
            *slot = Some(context);
            0
        }
        Err(error) => {
            set_last_error(&error);
            1
        }
    }
}

/// Prepares the runtime for image analysis. Idempotent: a second call is a
/// no-op. Passing instance extensions also enables the swapchain device
/// extension for presenting hosts.
///
/// # Safety
///
/// `ext_names` must point to `ext_count` valid C strings (or be null when
/// `ext_count` is 0).
#[no_mangle]
pub unsafe extern "C" fn flop_init(ext_count: u32, ext_names: *const *const c_char) -> c_int {
    let extensions = collect_extensions(ext_count, ext_names);
    init_in_slot(&mut lock_context(), extensions)
}

unsafe fn path_argument(pointer: *const c_char) -> Option<PathBuf> {
    if pointer.is_null() {
        None
    } else {
        Some(PathBuf::from(
            CStr::from_ptr(pointer).to_string_lossy().into_owned(),
        ))
    }
}

fn write_summary(out_summary: *mut FlopSummary, summary: &Summary) {
    if !out_summary.is_null() {
        unsafe {
            (*out_summary).width = summary.width as c_int;
            (*out_summary).height = summary.height as c_int;
            (*out_summary).milliseconds_elapsed = summary.milliseconds_elapsed as c_int;
        }
    }
}

unsafe fn run_analysis(
    reference_path: *const c_char,
    test_path: *const c_char,
    output_path: *const c_char,
    exposure_stops: f32,
    tonemap: Option<Tonemap>,
    out_summary: *mut FlopSummary,
) -> c_int {
    let mut guard = lock_context();
    if init_in_slot(&mut guard, Vec::new()) != 0 {
        return 1;
    }
    let context = guard.as_mut().unwrap();

    let reference = match path_argument(reference_path) {
        Some(path) => path,
        None => {
            set_last_error(&Error::InvalidReferencePath);
            return 1;
        }
    };
    let test = match path_argument(test_path) {
        Some(path) => path,
        None => {
            set_last_error(&Error::InvalidTestPath);
            return 1;
        }
    };
    let output = path_argument(output_path);

    let request = AnalyzeRequest {
        reference: &reference,
        test: &test,
        output: output.as_deref(),
        exposure_stops,
        tonemap,
    };
    match context.analyze(&request) {
        Ok(summary) => {
            write_summary(out_summary, &summary);
            0
        }
        Err(error) => {
            set_last_error(&error);
            1
        }
    }
}

/// Compares two LDR images; sRGB decode, no tonemap.
///
/// # Safety
///
/// Path arguments must be valid C strings (`output_path` and `out_summary`
/// may be null).
#[no_mangle]
pub unsafe extern "C" fn flop_analyze(
    reference_path: *const c_char,
    test_path: *const c_char,
    output_path: *const c_char,
    out_summary: *mut FlopSummary,
) -> c_int {
    run_analysis(reference_path, test_path, output_path, 0.0, None, out_summary)
}

/// Compares two HDR images. `tonemap_index` selects 0 = ACES, 1 = Reinhard,
/// 2 = Hable; `exposure_stops` scales the input by `2^stops`.
///
/// # Safety
///
/// Path arguments must be valid C strings (`output_path` and `out_summary`
/// may be null).
#[no_mangle]
pub unsafe extern "C" fn flop_analyze_hdr(
    reference_path: *const c_char,
    test_path: *const c_char,
    output_path: *const c_char,
    exposure_stops: f32,
    tonemap_index: c_int,
    out_summary: *mut FlopSummary,
) -> c_int {
    run_analysis(
        reference_path,
        test_path,
        output_path,
        exposure_stops,
        Some(Tonemap::from_abi_index(tonemap_index)),
        out_summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_slot_starts_empty() {
        let message = unsafe { CStr::from_ptr(flop_get_error()) };
        assert_eq!(message.to_str().unwrap(), "");
    }

    #[test]
    fn error_slot_returns_the_last_message() {
        set_last_error(&Error::ExtentMismatch);
        let message = unsafe { CStr::from_ptr(flop_get_error()) };
        assert_eq!(
            message.to_str().unwrap(),
            "Reference and test images do not have matching extents."
        );
    }

    #[test]
    fn summary_layout_matches_the_abi() {
        assert_eq!(std::mem::size_of::<FlopSummary>(), 12);
    }
}
