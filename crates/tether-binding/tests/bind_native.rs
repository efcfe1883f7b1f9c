//! End-to-end binding against stub native libraries compiled at test time.
//!
//! Each scenario compiles a small C library into a temp directory with the
//! system C compiler. When no compiler is available the tests print a notice
//! and return early instead of failing.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use tether_binding::{
    BindError, Bindable, BindingSession, CallError, ExportSite, ImportSite, NativeBinder,
    NativeValue, PrimitiveKind, ReturnKind, SignatureDescriptor,
};

fn compile_stub(dir: &Path, name: &str, source: &str) -> Option<PathBuf> {
    let _ = env_logger::builder().is_test(true).try_init();
    let src = dir.join(format!("{name}.c"));
    fs::write(&src, source).unwrap();
    let out = dir.join(format!("lib{name}.so"));
    let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let status = Command::new(compiler)
        .args(["-shared", "-fPIC", "-o"])
        .arg(&out)
        .arg(&src)
        .status();
    match status {
        Ok(status) if status.success() => Some(out),
        _ => {
            eprintln!("no working C compiler, skipping native binding test");
            None
        }
    }
}

fn shape(params: &[PrimitiveKind], ret: ReturnKind) -> SignatureDescriptor {
    SignatureDescriptor::new(params, ret).unwrap()
}

struct TestHost {
    imports: Vec<ImportSite>,
    exports: Vec<ExportSite>,
}

impl Bindable for TestHost {
    fn import_sites(&self) -> Vec<ImportSite> {
        self.imports.clone()
    }

    fn export_sites(&self) -> Vec<ExportSite> {
        self.exports.clone()
    }
}

/// Counter + tick library: one importable pair of functions, one attach
/// symbol for a `Tick(UInt64)` callback, plus introspection helpers.
const TICK_LIBRARY: &str = r#"
#include <stdint.h>

static uint64_t counter;
static void (*tick_cb)(uint64_t);
static uint64_t attach_calls;

void counter_add(uint64_t amount) { counter += amount; }
uint64_t read_counter(void) { return counter; }
uint64_t tick_attach_count(void) { return attach_calls; }
void fire_tick(uint64_t value) { if (tick_cb) tick_cb(value); }

void attach_tick(void (*cb)(uint64_t))
    __asm__("tether_external_attach__ActionUInt64__$tick");
void attach_tick(void (*cb)(uint64_t)) {
    tick_cb = cb;
    attach_calls += 1;
}
"#;

fn tick_host(ticks: &Arc<Mutex<Vec<u64>>>) -> TestHost {
    let sink = ticks.clone();
    TestHost {
        imports: vec![
            ImportSite::new(
                "CounterAdd",
                shape(&[PrimitiveKind::UInt64], ReturnKind::Void),
            ),
            ImportSite::new(
                "ReadCounter",
                shape(&[], ReturnKind::Value(PrimitiveKind::UInt64)),
            ),
            ImportSite::new(
                "TickAttachCount",
                shape(&[], ReturnKind::Value(PrimitiveKind::UInt64)),
            ),
            ImportSite::new("FireTick", shape(&[PrimitiveKind::UInt64], ReturnKind::Void)),
        ],
        exports: vec![
            ExportSite::exported(
                "Tick",
                Arc::new(move |args| {
                    if let [NativeValue::UInt64(value)] = args {
                        sink.lock().unwrap().push(*value);
                    }
                    NativeValue::Unit
                }),
            ),
            // Exportable but never requested by the library: a straggler
            ExportSite::exported("Reset", Arc::new(|_| NativeValue::Unit)),
        ],
    }
}

fn call_import(host: &TestHost, field: &str, args: &[NativeValue]) -> NativeValue {
    let site = host
        .imports
        .iter()
        .find(|site| site.field_name == field)
        .unwrap();
    let proxy = site.slot.proxy().expect("import should be bound");
    unsafe { proxy.call(args) }.unwrap()
}

#[test]
fn binds_imports_and_attaches_exports() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "tick", TICK_LIBRARY) else {
        return;
    };

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let host = tick_host(&ticks);
    let session = NativeBinder::new().bind(&host, &library).unwrap();

    // All four imports resolved, in discovery order
    let fields: Vec<&str> = session
        .imports()
        .iter()
        .map(|import| import.field_name.as_str())
        .collect();
    assert_eq!(
        fields,
        ["CounterAdd", "ReadCounter", "TickAttachCount", "FireTick"]
    );

    // Managed -> native direction
    call_import(&host, "CounterAdd", &[NativeValue::UInt64(40)]);
    call_import(&host, "CounterAdd", &[NativeValue::UInt64(2)]);
    assert_eq!(
        call_import(&host, "ReadCounter", &[]),
        NativeValue::UInt64(42)
    );

    // Exactly one attach binding, for Tick, and the attacher ran exactly once
    assert_eq!(session.attachments().len(), 1);
    assert_eq!(session.attachments()[0].method_name(), "Tick");
    assert_eq!(
        call_import(&host, "TickAttachCount", &[]),
        NativeValue::UInt64(1)
    );

    // Native -> managed direction: the library calls back into the host
    call_import(&host, "FireTick", &[NativeValue::UInt64(7)]);
    call_import(&host, "FireTick", &[NativeValue::UInt64(9)]);
    assert_eq!(*ticks.lock().unwrap(), vec![7, 9]);

    // Reset never got an attach symbol: reported, not fatal
    assert_eq!(session.stragglers(), ["Reset".to_string()]);

    session.dispose().unwrap();
}

#[test]
fn disposal_invalidates_import_proxies() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "tick_dispose", TICK_LIBRARY) else {
        return;
    };

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let host = tick_host(&ticks);
    let session = NativeBinder::new().bind(&host, &library).unwrap();

    let site = &host.imports[0];
    let proxy = site.slot.proxy().unwrap();
    session.dispose().unwrap();

    // The retained proxy is rejected rather than calling into unloaded code
    let err = unsafe { proxy.call(&[NativeValue::UInt64(1)]) }.unwrap_err();
    assert!(matches!(err, CallError::SessionDisposed { .. }));
    // And the slot no longer hands the proxy out at all
    assert!(site.slot.proxy().is_none());
}

#[test]
fn host_can_rebind_after_disposal() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "tick_rebind", TICK_LIBRARY) else {
        return;
    };

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let host = tick_host(&ticks);
    let session = NativeBinder::new().bind(&host, &library).unwrap();
    call_import(&host, "CounterAdd", &[NativeValue::UInt64(1)]);
    session.dispose().unwrap();

    // Teardown returned every import site to a bindable state; the fresh
    // load starts from a zeroed counter, so the first session's state is
    // genuinely gone.
    let session = NativeBinder::new().bind(&host, &library).unwrap();
    call_import(&host, "CounterAdd", &[NativeValue::UInt64(2)]);
    assert_eq!(
        call_import(&host, "ReadCounter", &[]),
        NativeValue::UInt64(2)
    );
    assert_eq!(session.attachments().len(), 1);
    session.dispose().unwrap();
}

#[test]
fn drop_is_a_best_effort_backstop() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "tick_drop", TICK_LIBRARY) else {
        return;
    };

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let host = tick_host(&ticks);
    let slot = host.imports[0].slot.clone();
    {
        let _session: BindingSession = NativeBinder::new().bind(&host, &library).unwrap();
        assert!(slot.proxy().is_some());
    }
    assert!(slot.proxy().is_none());
}

/// One resolvable import, one attach symbol naming a method the host does
/// not have. Load and unload each append a marker to the file at `@LOG@`.
const BROKEN_EXPORT_LIBRARY: &str = r#"
#include <stdio.h>

static void note(char mark) {
    FILE *log = fopen("@LOG@", "a");
    if (log) { fputc(mark, log); fclose(log); }
}

__attribute__((constructor)) static void on_load(void) { note('+'); }
__attribute__((destructor)) static void on_unload(void) { note('-'); }

void do_work(void) {}

void attach_missing(void (*cb)(void))
    __asm__("tether_external_attach__Action__$no_such_method");
void attach_missing(void (*cb)(void)) { (void)cb; }
"#;

#[test]
fn failed_export_resolution_unwinds_imports_and_unloads() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("load.log");
    let source = BROKEN_EXPORT_LIBRARY.replace("@LOG@", marker.to_str().unwrap());
    let Some(library) = compile_stub(dir.path(), "broken", &source) else {
        return;
    };

    let host = TestHost {
        imports: vec![ImportSite::new("DoWork", shape(&[], ReturnKind::Void))],
        exports: vec![ExportSite::exported("Tick", Arc::new(|_| NativeValue::Unit))],
    };

    let err = NativeBinder::new().bind(&host, &library).unwrap_err();
    assert!(
        matches!(&err, BindError::MissingExport { method, .. } if method == "NoSuchMethod"),
        "unexpected error: {err}"
    );

    // Atomic failure: the already-resolved import is not left bound, and the
    // library's destructor has run, so the handle was genuinely unloaded
    assert!(host.imports[0].slot.proxy().is_none());
    assert_eq!(fs::read_to_string(&marker).unwrap(), "+-");

    // The unwound host is still bindable against a library that cooperates
    let Some(plain) = compile_stub(dir.path(), "plain", "void do_work(void) {}\n") else {
        return;
    };
    let session = NativeBinder::new().bind(&host, &plain).unwrap();
    assert_eq!(call_import(&host, "DoWork", &[]), NativeValue::Unit);
    assert_eq!(session.stragglers(), ["Tick".to_string()]);
    session.dispose().unwrap();
}

const UNKNOWN_SHAPE_LIBRARY: &str = r#"
void attach_bogus(void (*cb)(void))
    __asm__("tether_external_attach__FuncBogus__$tick");
void attach_bogus(void (*cb)(void)) { (void)cb; }
"#;

#[test]
fn unsupported_shape_requests_fail_the_bind() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "bogus_shape", UNKNOWN_SHAPE_LIBRARY) else {
        return;
    };

    let host = TestHost {
        imports: Vec::new(),
        exports: vec![ExportSite::exported("Tick", Arc::new(|_| NativeValue::Unit))],
    };

    let err = NativeBinder::new().bind(&host, &library).unwrap_err();
    assert!(matches!(err, BindError::UnknownSignature(_)));
}

const UNTAGGED_LIBRARY: &str = r#"
void attach_tick(void (*cb)(void))
    __asm__("tether_external_attach__Action__$tick");
void attach_tick(void (*cb)(void)) { (void)cb; }
"#;

#[test]
fn untagged_methods_never_satisfy_native_requests() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "untagged", UNTAGGED_LIBRARY) else {
        return;
    };

    // Same-named method exists but is not marked exportable
    let host = TestHost {
        imports: Vec::new(),
        exports: vec![ExportSite::unexported(
            "Tick",
            Arc::new(|_| NativeValue::Unit),
        )],
    };

    let err = NativeBinder::new().bind(&host, &library).unwrap_err();
    assert!(
        matches!(&err, BindError::UntaggedExport { method, .. } if method == "Tick"),
        "unexpected error: {err}"
    );
}

#[test]
fn missing_import_symbol_aborts_binding() {
    let dir = tempfile::tempdir().unwrap();
    let Some(library) = compile_stub(dir.path(), "imports_only", TICK_LIBRARY) else {
        return;
    };

    let host = TestHost {
        imports: vec![ImportSite::new("NotInLibrary", shape(&[], ReturnKind::Void))],
        exports: Vec::new(),
    };

    let err = NativeBinder::new().bind(&host, &library).unwrap_err();
    assert!(matches!(
        err,
        BindError::Dynlib(tether_dynlib::DynlibError::SymbolNotFound { .. })
    ));
}
