//! Dynamic-library plumbing for the Tether binder
//!
//! Provides:
//! - Loading/unloading shared libraries and resolving symbol addresses
//!   (`DynamicLibrary`)
//! - Enumerating the exported symbol names of a library file without loading
//!   it, dispatching on the container format (`exported_symbols`)
//!
//! # Safety
//!
//! Loading a dynamic library runs its initialization code in this process.
//! The caller must trust the library file.

pub mod library;
pub mod symbols;

use std::path::PathBuf;
use thiserror::Error;

/// Dynamic-library errors
#[derive(Error, Debug)]
pub enum DynlibError {
    #[error("error while opening dynamic library '{path}': {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("error while unloading dynamic library '{path}': {reason}")]
    Unload { path: PathBuf, reason: String },

    #[error("symbol '{symbol}' not found in '{path}'")]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error("'{path}' is not a recognized ELF, Mach-O or PE image")]
    UnrecognizedFormat { path: PathBuf },

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type for dynamic-library operations
pub type DynlibResult<T> = Result<T, DynlibError>;

pub use library::{DynamicLibrary, RawSymbol, Relocation};
pub use symbols::exported_symbols;
