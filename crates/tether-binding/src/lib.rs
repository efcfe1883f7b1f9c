//! Tether binding core: two-way calls between a host object and a native
//! shared library
//!
//! A [`NativeBinder`] wires one host object (a [`Bindable`]) to one native
//! library for the lifetime of a [`BindingSession`]:
//!
//! - every import site on the host is resolved to a callable proxy for a
//!   native symbol, named by the host→C identifier convention or an explicit
//!   override;
//! - every attach symbol exported by the library is parsed, matched against
//!   an exportable host method, synthesized into a pinned C-callable
//!   trampoline, and registered with native code by calling the attacher.
//!
//! The session exclusively owns the library handle and every pinned
//! trampoline; tearing it down invalidates all proxies and unloads the
//! library. Callback pins are never released before the library is unloaded,
//! so native code can hold a callback address right up to unload.
//!
//! Only the flat C ABI is supported, over a closed catalog of call shapes
//! (arity 0–3 over five primitive kinds, six return kinds; see
//! [`SignatureDescriptor`]).

pub mod binder;
pub mod callback;
pub mod naming;
pub mod proxy;
pub mod signature;
pub mod site;

pub use binder::{
    AttachBinding, BindError, BinderOptions, BindingSession, BoundImport, NativeBinder,
};
pub use callback::PinnedCallback;
pub use naming::{
    to_host_name, to_native_name, AttachCandidate, MalformedAttachSymbol, DEFAULT_ATTACH_PREFIX,
};
pub use proxy::{CallError, NativeProxy};
pub use signature::{PrimitiveKind, ReturnKind, SignatureDescriptor, UnknownSignature, MAX_ARITY};
pub use site::{Bindable, ExportHandler, ExportSite, ImportSite, ImportSlot, NativeValue};

pub use tether_dynlib::Relocation;
