//! Callable proxies for resolved import sites
//!
//! A [`NativeProxy`] wraps a resolved native address together with the shape
//! the host declared for it and the owning session's liveness flag. Calls
//! marshal [`NativeValue`]s through the shape's CIF; once the session is torn
//! down every call is rejected instead of crossing into unloaded memory.

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libffi::middle::{arg, Arg, CodePtr};
use thiserror::Error;

use tether_dynlib::RawSymbol;

use crate::signature::{PrimitiveKind, ReturnKind, SignatureDescriptor};
use crate::site::NativeValue;

/// Proxy-call errors
#[derive(Error, Debug)]
pub enum CallError {
    #[error("proxy for '{symbol}' is dead: its binding session was disposed")]
    SessionDisposed { symbol: String },

    #[error("'{symbol}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        symbol: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} of '{symbol}' must be {expected:?}")]
    TypeMismatch {
        symbol: String,
        index: usize,
        expected: PrimitiveKind,
    },

    #[error("string argument contains an interior NUL byte")]
    NulInString(#[from] std::ffi::NulError),

    #[error("'{symbol}' returned a null string")]
    NullStringReturned { symbol: String },
}

// Marshaled argument storage; strings live separately as CStrings so the
// pointers here stay valid for the duration of the call.
enum RawArg {
    U64(u64),
    I32(i32),
    U32(u32),
    Ptr(*mut c_void),
}

/// A callable value wrapping one resolved native function.
///
/// Cheap to clone; all clones share the owning session's liveness flag.
#[derive(Clone, Debug)]
pub struct NativeProxy {
    symbol: String,
    address: RawSymbol,
    shape: SignatureDescriptor,
    alive: Arc<AtomicBool>,
}

impl NativeProxy {
    pub(crate) fn new(
        symbol: String,
        address: RawSymbol,
        shape: SignatureDescriptor,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            symbol,
            address,
            shape,
            alive,
        }
    }

    /// The native symbol this proxy was resolved from.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn shape(&self) -> &SignatureDescriptor {
        &self.shape
    }

    /// Whether the owning session is still live.
    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// The raw resolved address, for hosts that cast to a concrete function
    /// pointer type themselves. Invalid once the session is torn down.
    pub fn raw_address(&self) -> *const () {
        self.address.as_ptr()
    }

    /// Call the native function with `args` marshaled per the declared shape.
    ///
    /// # Safety
    ///
    /// The declared shape must match the actual native signature; a mismatch
    /// is undefined behavior on the native side. The liveness check rejects
    /// calls after disposal but cannot defend against a mismatched shape.
    pub unsafe fn call(&self, args: &[NativeValue]) -> Result<NativeValue, CallError> {
        if !self.is_live() {
            return Err(CallError::SessionDisposed {
                symbol: self.symbol.clone(),
            });
        }
        if args.len() != self.shape.arity() {
            return Err(CallError::ArityMismatch {
                symbol: self.symbol.clone(),
                expected: self.shape.arity(),
                got: args.len(),
            });
        }

        let mut strings: Vec<CString> = Vec::new();
        let mut slots: Vec<RawArg> = Vec::with_capacity(args.len());
        for (index, (value, kind)) in args.iter().zip(self.shape.params()).enumerate() {
            match (kind, value) {
                (PrimitiveKind::UInt64, NativeValue::UInt64(v)) => slots.push(RawArg::U64(*v)),
                (PrimitiveKind::Int32, NativeValue::Int32(v)) => slots.push(RawArg::I32(*v)),
                (PrimitiveKind::UInt32, NativeValue::UInt32(v)) => slots.push(RawArg::U32(*v)),
                (PrimitiveKind::Pointer, NativeValue::Pointer(p)) => slots.push(RawArg::Ptr(*p)),
                (PrimitiveKind::Utf8String, NativeValue::Str(s)) => {
                    let c = CString::new(s.as_str())?;
                    slots.push(RawArg::Ptr(c.as_ptr() as *mut c_void));
                    strings.push(c);
                }
                _ => {
                    return Err(CallError::TypeMismatch {
                        symbol: self.symbol.clone(),
                        index,
                        expected: *kind,
                    })
                }
            }
        }

        let ffi_args: Vec<Arg> = slots
            .iter()
            .map(|slot| match slot {
                RawArg::U64(v) => arg(v),
                RawArg::I32(v) => arg(v),
                RawArg::U32(v) => arg(v),
                RawArg::Ptr(p) => arg(p),
            })
            .collect();

        let cif = self.shape.cif();
        let code = CodePtr(self.address.as_ptr() as *mut _);
        let result = match self.shape.ret() {
            ReturnKind::Void => {
                cif.call::<()>(code, &ffi_args);
                NativeValue::Unit
            }
            ReturnKind::Value(PrimitiveKind::UInt64) => {
                NativeValue::UInt64(cif.call::<u64>(code, &ffi_args))
            }
            ReturnKind::Value(PrimitiveKind::Int32) => {
                NativeValue::Int32(cif.call::<i32>(code, &ffi_args))
            }
            ReturnKind::Value(PrimitiveKind::UInt32) => {
                NativeValue::UInt32(cif.call::<u32>(code, &ffi_args))
            }
            ReturnKind::Value(PrimitiveKind::Pointer) => {
                NativeValue::Pointer(cif.call::<*mut c_void>(code, &ffi_args))
            }
            ReturnKind::Value(PrimitiveKind::Utf8String) => {
                let ptr = cif.call::<*const c_char>(code, &ffi_args);
                if ptr.is_null() {
                    return Err(CallError::NullStringReturned {
                        symbol: self.symbol.clone(),
                    });
                }
                NativeValue::Str(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        };
        drop(strings);
        Ok(result)
    }
}
