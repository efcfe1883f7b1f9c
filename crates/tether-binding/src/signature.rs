//! The closed call-shape catalog
//!
//! A [`SignatureDescriptor`] is one of the 936 call shapes the binder
//! supports: arity 0–3 over five primitive kinds, with six return choices
//! (6 × (1 + 5 + 25 + 125) = 936). The catalog is enumerable and its
//! short-name scheme is load-bearing wire protocol: native libraries name
//! their attach symbols with exactly these tags.
//!
//! Shapes are realized at call time as libffi CIFs instead of a generated
//! table of function-pointer types; the descriptor itself stays plain data.

use libffi::middle::{Cif, Type};
use thiserror::Error;

/// Highest parameter count in the catalog.
pub const MAX_ARITY: usize = 3;

/// A shape name that is not in the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown call shape '{0}'")]
pub struct UnknownSignature(pub String);

/// The primitive-type alphabet of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    UInt64,
    Int32,
    UInt32,
    Pointer,
    Utf8String,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 5] = [
        PrimitiveKind::UInt64,
        PrimitiveKind::Int32,
        PrimitiveKind::UInt32,
        PrimitiveKind::Pointer,
        PrimitiveKind::Utf8String,
    ];

    /// The tag this kind contributes to a shape's short name.
    ///
    /// These literals come from the native side's generated naming table, so
    /// they are protocol, not style: `Pointer` is spelled `IntPtr` and
    /// `Utf8String` is spelled `String`.
    pub fn tag(self) -> &'static str {
        match self {
            PrimitiveKind::UInt64 => "UInt64",
            PrimitiveKind::Int32 => "Int32",
            PrimitiveKind::UInt32 => "UInt32",
            PrimitiveKind::Pointer => "IntPtr",
            PrimitiveKind::Utf8String => "String",
        }
    }

    fn ffi_type(self) -> Type {
        match self {
            PrimitiveKind::UInt64 => Type::u64(),
            PrimitiveKind::Int32 => Type::i32(),
            PrimitiveKind::UInt32 => Type::u32(),
            // Strings cross the boundary as C string pointers
            PrimitiveKind::Pointer | PrimitiveKind::Utf8String => Type::pointer(),
        }
    }

    fn strip_tag(name: &str) -> Option<(PrimitiveKind, &str)> {
        // No tag is a prefix of another, so first match wins unambiguously.
        PrimitiveKind::ALL
            .iter()
            .find_map(|kind| name.strip_prefix(kind.tag()).map(|rest| (*kind, rest)))
    }
}

/// What a shape returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    Void,
    Value(PrimitiveKind),
}

impl ReturnKind {
    pub const ALL: [ReturnKind; 6] = [
        ReturnKind::Void,
        ReturnKind::Value(PrimitiveKind::UInt64),
        ReturnKind::Value(PrimitiveKind::Int32),
        ReturnKind::Value(PrimitiveKind::UInt32),
        ReturnKind::Value(PrimitiveKind::Pointer),
        ReturnKind::Value(PrimitiveKind::Utf8String),
    ];

    fn ffi_type(self) -> Type {
        match self {
            ReturnKind::Void => Type::void(),
            ReturnKind::Value(kind) => kind.ffi_type(),
        }
    }
}

/// One call shape from the catalog: ordered parameter kinds plus return kind.
///
/// Immutable once constructed; identity is the (params, ret) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureDescriptor {
    params: Vec<PrimitiveKind>,
    ret: ReturnKind,
}

impl SignatureDescriptor {
    /// Build a descriptor, rejecting arities outside the catalog.
    pub fn new(params: &[PrimitiveKind], ret: ReturnKind) -> Result<Self, UnknownSignature> {
        if params.len() > MAX_ARITY {
            return Err(UnknownSignature(Self::build_short_name(params, ret)));
        }
        Ok(Self {
            params: params.to_vec(),
            ret,
        })
    }

    pub fn params(&self) -> &[PrimitiveKind] {
        &self.params
    }

    pub fn ret(&self) -> ReturnKind {
        self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// The shape's short name: `Action` for void returns, `Func<RetTag>`
    /// otherwise, followed by one tag per parameter in order.
    ///
    /// The zero-arity void shape is therefore named exactly `Action`.
    pub fn short_name(&self) -> String {
        Self::build_short_name(&self.params, self.ret)
    }

    fn build_short_name(params: &[PrimitiveKind], ret: ReturnKind) -> String {
        let mut name = match ret {
            ReturnKind::Void => "Action".to_string(),
            ReturnKind::Value(kind) => format!("Func{}", kind.tag()),
        };
        for param in params {
            name.push_str(param.tag());
        }
        name
    }

    /// Look a shape up by its short name.
    ///
    /// Fails with [`UnknownSignature`] for names outside the catalog,
    /// including well-formed names with more than [`MAX_ARITY`] parameters.
    pub fn from_short_name(name: &str) -> Result<Self, UnknownSignature> {
        let unknown = || UnknownSignature(name.to_string());

        let (ret, mut rest) = if let Some(rest) = name.strip_prefix("Action") {
            (ReturnKind::Void, rest)
        } else if let Some(rest) = name.strip_prefix("Func") {
            let (kind, rest) = PrimitiveKind::strip_tag(rest).ok_or_else(unknown)?;
            (ReturnKind::Value(kind), rest)
        } else {
            return Err(unknown());
        };

        let mut params = Vec::new();
        while !rest.is_empty() {
            let (kind, remainder) = PrimitiveKind::strip_tag(rest).ok_or_else(unknown)?;
            params.push(kind);
            rest = remainder;
        }
        if params.len() > MAX_ARITY {
            return Err(unknown());
        }
        Ok(Self { params, ret })
    }

    /// Name of the native attacher entry point for this shape.
    pub fn attacher_name(&self) -> String {
        format!("Attach{}", self.short_name())
    }

    /// The libffi CIF for calling a function of this shape, cdecl.
    pub fn cif(&self) -> Cif {
        Cif::new(
            self.params.iter().map(|kind| kind.ffi_type()),
            self.ret.ffi_type(),
        )
    }

    /// The CIF of the matching attacher: one pointer argument, void return.
    pub fn attacher_cif(&self) -> Cif {
        Cif::new([Type::pointer()], Type::void())
    }

    /// Every descriptor in the catalog, all 936 of them.
    ///
    /// Generated, not enumerated by hand: the cartesian product of arities
    /// 0..=3 over [`PrimitiveKind::ALL`] crossed with [`ReturnKind::ALL`].
    pub fn catalog() -> Vec<SignatureDescriptor> {
        let mut tuples: Vec<Vec<PrimitiveKind>> = vec![Vec::new()];
        let mut frontier: Vec<Vec<PrimitiveKind>> = vec![Vec::new()];
        for _ in 0..MAX_ARITY {
            let mut next = Vec::new();
            for tuple in &frontier {
                for kind in PrimitiveKind::ALL {
                    let mut extended = tuple.clone();
                    extended.push(kind);
                    next.push(extended);
                }
            }
            tuples.extend(next.iter().cloned());
            frontier = next;
        }

        ReturnKind::ALL
            .iter()
            .flat_map(|ret| {
                tuples.iter().map(|params| SignatureDescriptor {
                    params: params.clone(),
                    ret: *ret,
                })
            })
            .collect()
    }
}
