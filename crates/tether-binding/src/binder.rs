//! Binding orchestration: one session per (host object, library) pair
//!
//! [`NativeBinder::bind`] performs the whole handshake in one synchronous
//! pass: load, resolve imports, resolve exports, report stragglers. Any
//! failure unwinds everything acquired so far and propagates the original
//! error; a session is never handed out partially bound.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libffi::middle::{arg, CodePtr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_dynlib::{exported_symbols, DynamicLibrary, DynlibError, DynlibResult, Relocation};

use crate::callback::PinnedCallback;
use crate::naming::{to_native_name, AttachCandidate, MalformedAttachSymbol, DEFAULT_ATTACH_PREFIX};
use crate::proxy::NativeProxy;
use crate::signature::{SignatureDescriptor, UnknownSignature};
use crate::site::{Bindable, ImportSlot};

/// Binding errors
#[derive(Error, Debug)]
pub enum BindError {
    #[error(transparent)]
    Dynlib(#[from] DynlibError),

    #[error(transparent)]
    UnknownSignature(#[from] UnknownSignature),

    #[error(transparent)]
    MalformedAttachSymbol(#[from] MalformedAttachSymbol),

    #[error("could not find method '{method}' requested by attach symbol '{symbol}'")]
    MissingExport { method: String, symbol: String },

    #[error("method '{method}' is requested by '{symbol}' but is not marked exportable")]
    UntaggedExport { method: String, symbol: String },

    #[error("method '{method}' already has an attach binding; '{symbol}' is a duplicate")]
    DuplicateAttach { method: String, symbol: String },

    #[error("import slot for '{field}' was already filled")]
    SlotAlreadyFilled { field: String },
}

/// Binder configuration.
///
/// The default attach prefix matches what the bundled native cores export;
/// embedders loading third-party libraries can override it. Relocation
/// defaults to `Now` so missing symbols surface at load time rather than
/// mid-emulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderOptions {
    pub attach_prefix: String,
    pub relocation: Relocation,
}

impl Default for BinderOptions {
    fn default() -> Self {
        Self {
            attach_prefix: DEFAULT_ATTACH_PREFIX.to_string(),
            relocation: Relocation::Now,
        }
    }
}

/// Record of one resolved import site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundImport {
    pub field_name: String,
    pub native_name: String,
}

/// Record of one attached export: the pinned callback plus where it went.
#[derive(Debug)]
pub struct AttachBinding {
    method_name: String,
    symbol: String,
    // Held for its ownership: keeps the trampoline alive for the session
    _callback: PinnedCallback,
}

impl AttachBinding {
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

/// Binds a host object to a native library and hands out sessions.
#[derive(Debug, Clone, Default)]
pub struct NativeBinder {
    options: BinderOptions,
}

impl NativeBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BinderOptions) -> Self {
        Self { options }
    }

    /// Bind `host` to the library at `library_path`.
    ///
    /// Fails atomically: on any error the library is unloaded and every
    /// callback pinned so far is released (in that order), then the original
    /// error propagates.
    pub fn bind(
        &self,
        host: &dyn Bindable,
        library_path: impl AsRef<Path>,
    ) -> Result<BindingSession, BindError> {
        let path = library_path.as_ref().to_path_buf();
        let library = DynamicLibrary::load(&path, self.options.relocation)?;
        let alive = Arc::new(AtomicBool::new(true));
        let mut imports = Vec::new();
        let mut slots = Vec::new();
        let mut attachments = Vec::new();
        let mut stragglers = Vec::new();

        let outcome =
            resolve_imports(&library, &alive, host, &mut imports, &mut slots).and_then(|()| {
                resolve_exports(
                    &library,
                    &path,
                    &self.options,
                    host,
                    &mut attachments,
                    &mut stragglers,
                )
            });

        match outcome {
            Ok(()) => Ok(BindingSession {
                path,
                library: Some(library),
                alive,
                imports,
                slots,
                attachments,
                stragglers,
            }),
            Err(error) => {
                // Unwind: kill the proxies, unload, release the pins, then
                // empty the slots so the host can be bound again
                alive.store(false, Ordering::SeqCst);
                if let Err(unload_error) = library.close() {
                    log::warn!("teardown after failed bind: {unload_error}");
                }
                attachments.clear();
                for slot in &slots {
                    slot.clear();
                }
                Err(error)
            }
        }
    }
}

fn resolve_imports(
    library: &DynamicLibrary,
    alive: &Arc<AtomicBool>,
    host: &dyn Bindable,
    imports: &mut Vec<BoundImport>,
    slots: &mut Vec<ImportSlot>,
) -> Result<(), BindError> {
    log::debug!("binding managed -> native calls");
    for site in host.import_sites() {
        let native_name = site
            .native_name
            .clone()
            .unwrap_or_else(|| to_native_name(&site.field_name));
        log::debug!("binding {} as {}", site.field_name, native_name);
        let address = library.symbol_address(&native_name)?;
        let proxy = NativeProxy::new(
            native_name.clone(),
            address,
            site.shape.clone(),
            alive.clone(),
        );
        if !site.slot.fill(proxy) {
            return Err(BindError::SlotAlreadyFilled {
                field: site.field_name.clone(),
            });
        }
        slots.push(site.slot.clone());
        imports.push(BoundImport {
            field_name: site.field_name,
            native_name,
        });
    }
    Ok(())
}

fn resolve_exports(
    library: &DynamicLibrary,
    path: &Path,
    options: &BinderOptions,
    host: &dyn Bindable,
    attachments: &mut Vec<AttachBinding>,
    stragglers: &mut Vec<String>,
) -> Result<(), BindError> {
    log::debug!("binding native -> managed calls");
    let symbols = exported_symbols(path)?;
    let sites = host.export_sites();
    let mut attached: HashSet<String> = HashSet::new();

    for symbol in symbols
        .iter()
        .filter(|symbol| symbol.starts_with(&options.attach_prefix))
    {
        let candidate = AttachCandidate::parse(symbol)?;
        let shape = SignatureDescriptor::from_short_name(&candidate.short_name)?;
        let method = candidate.host_method_name();
        log::debug!(
            "binding {} as {} of shape {}",
            candidate.c_name,
            method,
            candidate.short_name
        );

        let site = sites
            .iter()
            .find(|site| site.method_name == method)
            .ok_or_else(|| BindError::MissingExport {
                method: method.clone(),
                symbol: symbol.clone(),
            })?;
        if !site.exported {
            return Err(BindError::UntaggedExport {
                method,
                symbol: symbol.clone(),
            });
        }
        if !attached.insert(method.clone()) {
            return Err(BindError::DuplicateAttach {
                method,
                symbol: symbol.clone(),
            });
        }

        let attacher_cif = shape.attacher_cif();
        let callback = PinnedCallback::new(method.clone(), shape, site.handler.clone());
        let attacher = library.symbol_address(&candidate.full_symbol)?;
        // The one native call the binder itself performs: hand the pinned
        // trampoline to the attacher. From here on native code may call it.
        let code_ptr = callback.code_ptr();
        unsafe {
            attacher_cif.call::<()>(CodePtr(attacher.as_ptr() as *mut _), &[arg(&code_ptr)]);
        }
        attachments.push(AttachBinding {
            method_name: method,
            symbol: symbol.clone(),
            _callback: callback,
        });
    }

    for site in sites
        .iter()
        .filter(|site| site.exported && !attached.contains(&site.method_name))
    {
        log::warn!(
            "method {} is marked exportable but '{}' never attached it",
            site.method_name,
            path.display()
        );
        stragglers.push(site.method_name.clone());
    }
    Ok(())
}

/// One live binding between a host object and a loaded library.
///
/// Exclusively owns the library handle, the resolved imports and every
/// pinned callback. [`BindingSession::dispose`] releases everything
/// deterministically; dropping the session does the same on a best-effort
/// basis (any unload error is only logged, and ordering against process
/// teardown is not guaranteed).
#[derive(Debug)]
pub struct BindingSession {
    path: PathBuf,
    library: Option<DynamicLibrary>,
    alive: Arc<AtomicBool>,
    imports: Vec<BoundImport>,
    slots: Vec<ImportSlot>,
    attachments: Vec<AttachBinding>,
    stragglers: Vec<String>,
}

impl BindingSession {
    /// Path of the bound library.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The imports resolved for this session, in discovery order.
    pub fn imports(&self) -> &[BoundImport] {
        &self.imports
    }

    /// The attach bindings created for this session, in symbol-table order.
    pub fn attachments(&self) -> &[AttachBinding] {
        &self.attachments
    }

    /// Exportable methods that no attach symbol asked for. Reportable, never
    /// fatal.
    pub fn stragglers(&self) -> &[String] {
        &self.stragglers
    }

    /// Tear the session down: invalidate every proxy, unload the library
    /// exactly once, release the pinned callbacks and empty the import
    /// slots, leaving the host bindable again.
    ///
    /// An unload failure is surfaced, but the proxies are invalidated and
    /// the callbacks released regardless.
    pub fn dispose(mut self) -> DynlibResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        let result = match self.library.take() {
            Some(library) => library.close(),
            None => Ok(()),
        };
        self.attachments.clear();
        for slot in self.slots.drain(..) {
            slot.clear();
        }
        result
    }
}

impl Drop for BindingSession {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(library) = self.library.take() {
            if let Err(error) = library.close() {
                log::warn!("best-effort session teardown failed: {error}");
            }
        }
        for slot in self.slots.drain(..) {
            slot.clear();
        }
        // attachments are dropped after this body runs, i.e. after unload
    }
}
