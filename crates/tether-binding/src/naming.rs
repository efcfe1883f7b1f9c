//! Identifier-case translation between host and native naming
//!
//! The host spells identifiers in PascalCase, the native side in snake_case.
//! Both translators are total over arbitrary strings, and deliberately NOT
//! inverses of each other: digits, leading underscores and multi-letter
//! acronyms translate lossily, one direction by convention. In particular
//! `to_native_name("ID") == "i_d"` — native libraries already name their
//! symbols by this convention, so the quirk is protocol.
//!
//! This module also parses the reserved attach-symbol family
//! `<prefix>__<ShapeName>__<cName>` exported by native libraries that want
//! callbacks registered.

use thiserror::Error;

/// Default reserved prefix of the attach-symbol family.
pub const DEFAULT_ATTACH_PREFIX: &str = "tether_external_attach";

/// A reserved-prefix symbol that does not have the three-part attach form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("attach symbol '{0}' does not split into prefix, shape and method name")]
pub struct MalformedAttachSymbol(pub String);

/// Translate a host identifier to the native symbol convention.
///
/// Splits into maximal runs, each beginning at an uppercase letter (the
/// first run may begin at position 0 regardless), lowercases every run and
/// joins with `_`: `ReadRegister` → `read_register`.
pub fn to_native_name(identifier: &str) -> String {
    let mut runs: Vec<String> = Vec::new();
    for ch in identifier.chars() {
        if ch.is_uppercase() || runs.is_empty() {
            runs.push(String::new());
        }
        if let Some(run) = runs.last_mut() {
            run.extend(ch.to_lowercase());
        }
    }
    runs.join("_")
}

/// Translate a native identifier to the host convention.
///
/// Splits on `_`, uppercases the first letter of every piece and joins with
/// no separator: `read_register` → `ReadRegister`.
pub fn to_host_name(identifier: &str) -> String {
    identifier.split('_').map(first_letter_upper).collect()
}

fn first_letter_upper(piece: &str) -> String {
    let mut chars = piece.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A parsed attach symbol, consumed during export resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachCandidate {
    /// Shape short name, e.g. `ActionUInt64`.
    pub short_name: String,
    /// Raw method-name part: either a literal host name or `$`-prefixed
    /// snake_case.
    pub c_name: String,
    /// The complete exported symbol, resolved later to call the attacher.
    pub full_symbol: String,
}

impl AttachCandidate {
    /// Parse an attach symbol. The caller has already filtered by prefix;
    /// splitting on `__` must yield exactly {prefix, shortName, cName}.
    pub fn parse(symbol: &str) -> Result<Self, MalformedAttachSymbol> {
        let parts: Vec<&str> = symbol.split("__").collect();
        match parts.as_slice() {
            [_prefix, short_name, c_name] if !short_name.is_empty() && !c_name.is_empty() => {
                Ok(Self {
                    short_name: short_name.to_string(),
                    c_name: c_name.to_string(),
                    full_symbol: symbol.to_string(),
                })
            }
            _ => Err(MalformedAttachSymbol(symbol.to_string())),
        }
    }

    /// Host method name requested by this candidate: `$`-prefixed names are
    /// translated from snake_case, anything else is taken verbatim.
    pub fn host_method_name(&self) -> String {
        match self.c_name.strip_prefix('$') {
            Some(snake) => to_host_name(snake),
            None => self.c_name.clone(),
        }
    }
}
