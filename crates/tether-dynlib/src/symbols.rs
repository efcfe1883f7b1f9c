//! Exported-symbol enumeration without loading the library
//!
//! Reads the file's own container format instead of asking the OS loader, so
//! a library can be inspected before any of its code runs. Dispatches on the
//! binary format:
//!
//! - Mach-O: symbol table, with the platform-convention leading underscores
//!   stripped from each name
//! - PE: export directory
//! - ELF: `.symtab` entries, names used exactly as stored
//!
//! Anything else is rejected as [`DynlibError::UnrecognizedFormat`] rather
//! than blind-parsed as ELF.

use std::fs;
use std::path::Path;

use object::{BinaryFormat, Object, ObjectSymbol};

use crate::{DynlibError, DynlibResult};

/// Enumerate every exported symbol name of the library file at `path`.
///
/// Names are returned in symbol-table order. The order is stable for a given
/// file but carries no further meaning.
pub fn exported_symbols(path: impl AsRef<Path>) -> DynlibResult<Vec<String>> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|source| DynlibError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file = object::File::parse(&*data).map_err(|_| DynlibError::UnrecognizedFormat {
        path: path.to_path_buf(),
    })?;

    match file.format() {
        BinaryFormat::MachO => Ok(file
            .symbols()
            .filter_map(|sym| sym.name().ok())
            .filter(|name| !name.is_empty())
            .map(|name| name.trim_start_matches('_').to_string())
            .collect()),
        BinaryFormat::Pe => {
            let exports = file
                .exports()
                .map_err(|_| DynlibError::UnrecognizedFormat {
                    path: path.to_path_buf(),
                })?;
            Ok(exports
                .iter()
                .map(|export| String::from_utf8_lossy(export.name()).into_owned())
                .collect())
        }
        BinaryFormat::Elf => Ok(file
            .symbols()
            .filter_map(|sym| sym.name().ok())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()),
        _ => Err(DynlibError::UnrecognizedFormat {
            path: path.to_path_buf(),
        }),
    }
}
