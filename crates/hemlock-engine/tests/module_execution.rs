//! Module system tests: import binding forms, singleton semantics,
//! imported-binding immutability.

use hemlock_engine::vm::{Interp, ModuleCache, OutputSink, SharedState, VmError};
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_module(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(source.as_bytes()).unwrap();
    path
}

fn run_file(entry: &Path) -> (Result<(), VmError>, String) {
    let output = OutputSink::buffer();
    let shared = SharedState::new(ModuleCache::new(None), output.clone(), vec![]);
    let mut interp = Interp::new(shared);
    let result = interp.run_file(entry);
    (result, output.contents().unwrap())
}

#[test]
fn test_named_import_with_rename() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        "math.hml",
        "export fn double(x) { return x * 2; }\nexport let base = 10;",
    );
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { double, base as start } from \"./math\";\nprint(double(start));",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "20\n");
}

#[test]
fn test_namespace_import() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        "util.hml",
        "export let version = 3;\nexport fn triple(x) { return x * 3; }",
    );
    let main = write_module(
        dir.path(),
        "main.hml",
        "import * as util from \"./util\";\nprint(util.version);\nprint(util.triple(4));",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "3\n12\n");
}

#[test]
fn test_re_export() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "inner.hml", "export let answer = 42;");
    write_module(
        dir.path(),
        "outer.hml",
        "export { answer } from \"./inner\";",
    );
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { answer } from \"./outer\";\nprint(answer);",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn test_module_singleton_shared_state() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        "m.hml",
        "export let count = 0;\nexport fn inc() { count = count + 1; }",
    );
    write_module(
        dir.path(),
        "a.hml",
        "import { inc, count } from \"./m\";\nexport fn bump_a() { inc(); }\nexport fn read_a() { return count; }",
    );
    write_module(
        dir.path(),
        "b.hml",
        "import { inc, count } from \"./m\";\nexport fn bump_b() { inc(); }\nexport fn read_b() { return count; }",
    );
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { bump_a, read_a } from \"./a\";\n\
         import { bump_b, read_b } from \"./b\";\n\
         bump_a();\n\
         bump_b();\n\
         print(read_a());\n\
         print(read_b());",
    );
    // Both importers observe the same module state: two increments.
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "2\n2\n");
}

#[test]
fn test_imported_binding_sees_exporter_mutations() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        "m.hml",
        "export let count = 0;\nexport fn inc() { count = count + 1; }",
    );
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { inc, count } from \"./m\";\ninc();\ninc();\nprint(count);",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "2\n");
}

#[test]
fn test_imported_binding_is_immutable() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "m.hml", "export let count = 0;");
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { count } from \"./m\";\ncount = 5;",
    );
    let (result, _) = run_file(&main);
    match result {
        Err(VmError::Uncaught { rendered, .. }) => {
            assert!(rendered.contains("imported"), "got: {}", rendered);
        }
        other => panic!("expected uncaught error, got {:?}", other),
    }
}

#[test]
fn test_missing_named_export() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "m.hml", "export let a = 1;");
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { nonexistent } from \"./m\";",
    );
    let (result, _) = run_file(&main);
    match result {
        Err(VmError::Uncaught { rendered, .. }) => {
            assert!(rendered.contains("no export"), "got: {}", rendered);
        }
        other => panic!("expected uncaught error, got {:?}", other),
    }
}

#[test]
fn test_module_top_level_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        "noisy.hml",
        "print(\"init\");\nexport let x = 1;",
    );
    write_module(
        dir.path(),
        "a.hml",
        "import { x } from \"./noisy\";\nexport let ax = x;",
    );
    let main = write_module(
        dir.path(),
        "main.hml",
        "import { x } from \"./noisy\";\nimport { ax } from \"./a\";\nprint(x + ax);",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    // "init" printed exactly once even though two modules import noisy.
    assert_eq!(output, "init\n2\n");
}

#[test]
fn test_cycle_reported_as_load_error() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "a.hml", "import { b } from \"./b\";\nexport let a = 1;");
    write_module(dir.path(), "b.hml", "import { a } from \"./a\";\nexport let b = 2;");
    let main = write_module(dir.path(), "main.hml", "import { a } from \"./a\";");
    let (result, _) = run_file(&main);
    match result {
        Err(VmError::Module(message)) => assert!(message.contains("circular")),
        other => panic!("expected module error, got {:?}", other),
    }
}

#[test]
fn test_namespace_object_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "m.hml", "export let v = 1;");
    let main = write_module(
        dir.path(),
        "main.hml",
        "import * as m from \"./m\";\nm = null;",
    );
    let (result, _) = run_file(&main);
    assert!(matches!(result, Err(VmError::Uncaught { .. })));
}
