//! Panic guard for `extern "C"` trampolines.
//!
//! Unwinding across the FFI boundary is undefined behaviour, so every
//! trampoline body runs inside [`ffi_guard!`].

/// Run `body`, returning `fallback` if it panics.
///
/// ```ignore
/// unsafe extern "C" fn trampoline(user: *mut c_void) -> u32 {
///     ffi_guard!(0 => {
///         // ... body ...
///         written
///     })
/// }
/// ```
macro_rules! ffi_guard {
    ($fallback:expr => $body:block) => {{
        use std::panic::{self, AssertUnwindSafe};

        match panic::catch_unwind(AssertUnwindSafe(move || $body)) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("panic caught at FFI boundary");
                $fallback
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn ffi_guard_returns_value_on_success() {
        let result: u32 = ffi_guard!(0 => { 7 });
        assert_eq!(result, 7);
    }

    #[test]
    fn ffi_guard_returns_fallback_on_panic() {
        let result: u32 = ffi_guard!(0 => {
            panic!("test panic");
        });
        assert_eq!(result, 0);
    }

    #[test]
    fn ffi_guard_unit_fallback() {
        let hit = std::cell::Cell::new(false);
        let flag = &hit;
        ffi_guard!(() => {
            flag.set(true);
        });
        assert!(hit.get());
    }
}
