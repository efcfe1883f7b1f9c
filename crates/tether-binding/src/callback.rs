//! Pinned, C-callable trampolines into host methods
//!
//! For every attach candidate the binder synthesizes a libffi closure whose
//! code pointer native code can hold and invoke at any time until the
//! library is unloaded. [`PinnedCallback`] owns both the closure and the
//! heap state it captures; the owning session keeps it alive for the whole
//! binding, which is the Rust rendition of pinning a delegate.
//!
//! Errors cannot cross the C boundary, so a handler returning a value of the
//! wrong kind is logged and flattened to zero/null — native code keeps a
//! well-defined value either way.

use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Mutex;

use libffi::low::ffi_cif;
use libffi::middle::Closure;

use crate::signature::{PrimitiveKind, ReturnKind, SignatureDescriptor};
use crate::site::{ExportHandler, NativeValue};

struct CallbackData {
    method_name: String,
    shape: SignatureDescriptor,
    handler: ExportHandler,
    /// Strings handed to native code as return values; retained until the
    /// callback is released so the pointers stay valid.
    retained_strings: Mutex<Vec<CString>>,
}

/// A host callback pinned for native use.
///
/// The code pointer stays valid exactly as long as this value lives.
#[derive(Debug)]
pub struct PinnedCallback {
    closure: ManuallyDrop<Closure<'static>>,
    data: *mut CallbackData,
}

// Safety: the callback state is uniquely owned, the handler is Send + Sync
// and the string retention list is behind a Mutex; the closure itself is
// only entered by native code, never through these references.
unsafe impl Send for PinnedCallback {}
unsafe impl Sync for PinnedCallback {}

impl PinnedCallback {
    /// Pin `handler` as a C-callable function of the given shape.
    pub(crate) fn new(
        method_name: String,
        shape: SignatureDescriptor,
        handler: ExportHandler,
    ) -> Self {
        let data: &'static CallbackData = Box::leak(Box::new(CallbackData {
            method_name,
            shape: shape.clone(),
            handler,
            retained_strings: Mutex::new(Vec::new()),
        }));
        let cif = shape.cif();
        let closure = match shape.ret() {
            ReturnKind::Void => Closure::new(cif, trampoline_void, data),
            ReturnKind::Value(
                PrimitiveKind::UInt64 | PrimitiveKind::Int32 | PrimitiveKind::UInt32,
            ) => Closure::new(cif, trampoline_word, data),
            ReturnKind::Value(PrimitiveKind::Pointer | PrimitiveKind::Utf8String) => {
                Closure::new(cif, trampoline_pointer, data)
            }
        };
        Self {
            closure: ManuallyDrop::new(closure),
            data: data as *const CallbackData as *mut CallbackData,
        }
    }

    /// The function pointer native code receives.
    pub fn code_ptr(&self) -> *const c_void {
        (*self.closure.code_ptr()) as *const c_void
    }
}

impl Drop for PinnedCallback {
    fn drop(&mut self) {
        // The closure references the leaked data; release in that order.
        unsafe {
            ManuallyDrop::drop(&mut self.closure);
            drop(Box::from_raw(self.data));
        }
    }
}

/// Read the incoming C arguments per the shape's parameter kinds.
unsafe fn decode_args(data: &CallbackData, args: *const *const c_void) -> Vec<NativeValue> {
    data.shape
        .params()
        .iter()
        .enumerate()
        .map(|(index, kind)| {
            let slot = *args.add(index);
            match kind {
                PrimitiveKind::UInt64 => NativeValue::UInt64(*(slot as *const u64)),
                PrimitiveKind::Int32 => NativeValue::Int32(*(slot as *const i32)),
                PrimitiveKind::UInt32 => NativeValue::UInt32(*(slot as *const u32)),
                PrimitiveKind::Pointer => NativeValue::Pointer(*(slot as *const *mut c_void)),
                PrimitiveKind::Utf8String => {
                    let ptr = *(slot as *const *const c_char);
                    if ptr.is_null() {
                        NativeValue::Str(String::new())
                    } else {
                        NativeValue::Str(CStr::from_ptr(ptr).to_string_lossy().into_owned())
                    }
                }
            }
        })
        .collect()
}

unsafe extern "C" fn trampoline_void(
    _cif: &ffi_cif,
    _result: &mut (),
    args: *const *const c_void,
    data: &CallbackData,
) {
    let values = decode_args(data, args);
    let returned = (data.handler)(&values);
    if returned != NativeValue::Unit {
        log::error!(
            "callback {} returned a value from a void shape; dropped",
            data.method_name
        );
    }
}

// Integral returns are written through a full machine word: libffi's closure
// convention promotes return values narrower than ffi_arg.
unsafe extern "C" fn trampoline_word(
    _cif: &ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    data: &CallbackData,
) {
    let values = decode_args(data, args);
    let returned = (data.handler)(&values);
    *result = match (data.shape.ret(), &returned) {
        (ReturnKind::Value(PrimitiveKind::UInt64), NativeValue::UInt64(v)) => *v,
        (ReturnKind::Value(PrimitiveKind::Int32), NativeValue::Int32(v)) => *v as i64 as u64,
        (ReturnKind::Value(PrimitiveKind::UInt32), NativeValue::UInt32(v)) => *v as u64,
        _ => {
            log::error!(
                "callback {} returned {:?} for shape {}; substituting 0",
                data.method_name,
                returned.kind(),
                data.shape.short_name()
            );
            0
        }
    };
}

unsafe extern "C" fn trampoline_pointer(
    _cif: &ffi_cif,
    result: &mut *mut c_void,
    args: *const *const c_void,
    data: &CallbackData,
) {
    let values = decode_args(data, args);
    let returned = (data.handler)(&values);
    *result = match (data.shape.ret(), returned) {
        (ReturnKind::Value(PrimitiveKind::Pointer), NativeValue::Pointer(p)) => p,
        (ReturnKind::Value(PrimitiveKind::Utf8String), NativeValue::Str(s)) => {
            match CString::new(s) {
                Ok(c) => {
                    let ptr = c.as_ptr() as *mut c_void;
                    match data.retained_strings.lock() {
                        Ok(mut retained) => {
                            retained.push(c);
                            ptr
                        }
                        Err(_) => {
                            log::error!(
                                "callback {} cannot retain its returned string (poisoned \
                                 retention list); substituting null",
                                data.method_name
                            );
                            std::ptr::null_mut()
                        }
                    }
                }
                Err(_) => {
                    log::error!(
                        "callback {} returned a string with an interior NUL; substituting null",
                        data.method_name
                    );
                    std::ptr::null_mut()
                }
            }
        }
        (_, other) => {
            log::error!(
                "callback {} returned {:?} for shape {}; substituting null",
                data.method_name,
                other.kind(),
                data.shape.short_name()
            );
            std::ptr::null_mut()
        }
    };
}
