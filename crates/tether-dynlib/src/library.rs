//! Shared-library handles: load, unload, symbol resolution
//!
//! Thin wrapper over `libloading` that keeps the library path for error
//! reporting and exposes relocation control on platforms that have it.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;
use serde::{Deserialize, Serialize};

use crate::{DynlibError, DynlibResult};

/// When the loader performs relocation: deferred or at load time.
///
/// Maps onto `RTLD_LAZY`/`RTLD_NOW` on Unix. Windows has no equivalent and
/// ignores the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Relocation {
    Lazy,
    #[default]
    Now,
}

/// A resolved symbol address.
///
/// Only an address; the caller is responsible for interpreting it with the
/// correct signature and for not using it after the owning library has been
/// unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSymbol(*const ());

impl RawSymbol {
    /// Wrap an address obtained outside the loader, e.g. a function defined
    /// in-process.
    pub fn from_ptr(ptr: *const ()) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *const () {
        self.0
    }
}

// Safety: a symbol address is just a code/data pointer; sharing the address
// value between threads is fine. Dereferencing it is the caller's problem.
unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

/// A loaded shared library.
///
/// Unloading is explicit via [`DynamicLibrary::close`], which consumes the
/// handle so it cannot happen twice. Dropping the handle unloads as a
/// fallback, discarding any unload error.
#[derive(Debug)]
pub struct DynamicLibrary {
    inner: Library,
    path: PathBuf,
}

impl DynamicLibrary {
    /// Load a shared library from `path`.
    pub fn load(path: impl AsRef<Path>, relocation: Relocation) -> DynlibResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = Self::open(&path, relocation).map_err(|e| DynlibError::Load {
            path: path.clone(),
            reason: os_reason(&e),
        })?;
        log::debug!("loaded '{}' ({:?} relocation)", path.display(), relocation);
        Ok(Self { inner, path })
    }

    #[cfg(unix)]
    fn open(path: &Path, relocation: Relocation) -> Result<Library, libloading::Error> {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

        let mode = match relocation {
            Relocation::Lazy => RTLD_LAZY,
            Relocation::Now => RTLD_NOW,
        };
        unsafe { UnixLibrary::open(Some(path), mode | RTLD_LOCAL) }.map(Library::from)
    }

    #[cfg(not(unix))]
    fn open(path: &Path, _relocation: Relocation) -> Result<Library, libloading::Error> {
        unsafe { Library::new(path) }
    }

    /// Get the address of the symbol `name`.
    ///
    /// A zero address is reported as not-found even though some platforms do
    /// not strictly rule out a symbol living at address zero.
    pub fn symbol_address(&self, name: &str) -> DynlibResult<RawSymbol> {
        let not_found = || DynlibError::SymbolNotFound {
            path: self.path.clone(),
            symbol: name.to_string(),
        };
        let address: *mut c_void = unsafe { self.inner.get::<*mut c_void>(name.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|_| not_found())?;
        if address.is_null() {
            return Err(not_found());
        }
        Ok(RawSymbol(address as *const ()))
    }

    /// Unload the library and free the memory taken by it.
    ///
    /// Consumes the handle, so a successful or failed unload can only be
    /// attempted once.
    pub fn close(self) -> DynlibResult<()> {
        let DynamicLibrary { inner, path } = self;
        log::debug!("unloading '{}'", path.display());
        inner.close().map_err(|e| DynlibError::Unload {
            path,
            reason: os_reason(&e),
        })
    }

    /// Best-effort probe: does a loadable library named `name` exist next to
    /// the running executable?
    ///
    /// Attempts a lazy load and immediately unloads on success. Never
    /// propagates errors.
    pub fn exists(name: &str) -> bool {
        let base = match std::env::current_exe() {
            Ok(exe) => match exe.parent() {
                Some(dir) => dir.to_path_buf(),
                None => return false,
            },
            Err(_) => return false,
        };
        match Self::load(base.join(name), Relocation::Lazy) {
            Ok(library) => {
                let _ = library.close();
                true
            }
            Err(e) => {
                log::debug!("library probe for '{name}' failed: {e}");
                false
            }
        }
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Some loaders report failures with an empty message.
fn os_reason(error: &libloading::Error) -> String {
    let reason = error.to_string();
    if reason.is_empty() {
        "unknown error".to_string()
    } else {
        reason
    }
}
