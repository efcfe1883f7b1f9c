//! The host object's binding surface
//!
//! The binder never reflects over the host; the host hands over two tagged
//! sets instead: import sites (slots to be filled with native proxies) and
//! export sites (methods native code may call back into). This is the whole
//! introspection contract.

use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use crate::proxy::NativeProxy;
use crate::signature::{PrimitiveKind, SignatureDescriptor};

/// A value crossing the native boundary, one variant per primitive kind plus
/// the void result.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    UInt64(u64),
    Int32(i32),
    UInt32(u32),
    Pointer(*mut c_void),
    Str(String),
    /// The result of a void call; never valid as an argument.
    Unit,
}

impl NativeValue {
    /// The primitive kind this value carries, or `None` for [`NativeValue::Unit`].
    pub fn kind(&self) -> Option<PrimitiveKind> {
        match self {
            NativeValue::UInt64(_) => Some(PrimitiveKind::UInt64),
            NativeValue::Int32(_) => Some(PrimitiveKind::Int32),
            NativeValue::UInt32(_) => Some(PrimitiveKind::UInt32),
            NativeValue::Pointer(_) => Some(PrimitiveKind::Pointer),
            NativeValue::Str(_) => Some(PrimitiveKind::Utf8String),
            NativeValue::Unit => None,
        }
    }
}

/// The storage location of an import site.
///
/// The host keeps a clone and calls through it once bound. Filled at bind
/// time and emptied again by session teardown (or by a failed bind's
/// unwind), so the same site can be bound to another library afterwards.
/// While a session is live the slot refuses a second fill.
#[derive(Clone, Default, Debug)]
pub struct ImportSlot {
    inner: Arc<Mutex<Option<NativeProxy>>>,
}

impl ImportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound proxy, if this slot is bound and the session is still live.
    pub fn proxy(&self) -> Option<NativeProxy> {
        let slot = self.inner.lock().ok()?;
        slot.as_ref().filter(|proxy| proxy.is_live()).cloned()
    }

    pub(crate) fn fill(&self, proxy: NativeProxy) -> bool {
        match self.inner.lock() {
            Ok(mut slot) if slot.is_none() => {
                *slot = Some(proxy);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            slot.take();
        }
    }
}

/// A host storage location tagged for native binding.
#[derive(Clone)]
pub struct ImportSite {
    /// Host-side identifier of the field, PascalCase.
    pub field_name: String,
    /// Explicit native symbol name; bypasses identifier translation entirely.
    pub native_name: Option<String>,
    /// The call shape the host declared for this slot.
    pub shape: SignatureDescriptor,
    /// Where the resolved proxy lands.
    pub slot: ImportSlot,
}

impl ImportSite {
    pub fn new(field_name: impl Into<String>, shape: SignatureDescriptor) -> Self {
        Self {
            field_name: field_name.into(),
            native_name: None,
            shape,
            slot: ImportSlot::new(),
        }
    }

    pub fn with_native_name(mut self, native_name: impl Into<String>) -> Self {
        self.native_name = Some(native_name.into());
        self
    }
}

/// Handler invoked when native code calls back into a host method.
pub type ExportHandler = Arc<dyn Fn(&[NativeValue]) -> NativeValue + Send + Sync>;

/// A host method visible to export resolution.
///
/// `exported == false` models a method that exists by name but is not tagged
/// exportable; a native request for it is an error rather than an accidental
/// match.
#[derive(Clone)]
pub struct ExportSite {
    pub method_name: String,
    pub exported: bool,
    pub handler: ExportHandler,
}

impl ExportSite {
    /// A method tagged exportable.
    pub fn exported(method_name: impl Into<String>, handler: ExportHandler) -> Self {
        Self {
            method_name: method_name.into(),
            exported: true,
            handler,
        }
    }

    /// A method present on the host but not tagged exportable.
    pub fn unexported(method_name: impl Into<String>, handler: ExportHandler) -> Self {
        Self {
            method_name: method_name.into(),
            exported: false,
            handler,
        }
    }
}

/// The host object as the binder sees it.
pub trait Bindable {
    /// Storage locations tagged for native binding, discovered once at
    /// session start.
    fn import_sites(&self) -> Vec<ImportSite>;

    /// Methods visible to export resolution, tagged or not.
    fn export_sites(&self) -> Vec<ExportSite>;
}
