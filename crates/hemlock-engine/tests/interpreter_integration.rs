//! End-to-end interpreter tests: parse and evaluate source, observing
//! values and captured `print` output.

use hemlock_engine::vm::{Interp, ModuleCache, OutputSink, SharedState, Value, VmError};

fn run(source: &str) -> (Result<Value, VmError>, String) {
    let output = OutputSink::buffer();
    let shared = SharedState::new(ModuleCache::new(None), output.clone(), vec![]);
    let mut interp = Interp::new(shared);
    let result = interp.run_source(source);
    (result, output.contents().unwrap())
}

fn run_output(source: &str) -> String {
    let (result, output) = run(source);
    result.expect("program failed");
    output
}

fn run_value(source: &str) -> Value {
    run(source).0.expect("program failed")
}

// ============================================================================
// Closures and functions
// ============================================================================

#[test]
fn test_closure_captures_environment() {
    let output = run_output(
        "fn make(x) { return fn(y) { return x + y; }; }\n\
         let add5 = make(5); print(add5(3));",
    );
    assert_eq!(output, "8\n");
}

#[test]
fn test_closure_shares_mutable_capture() {
    let output = run_output(
        "fn counter() { let n = 0; return fn() { n = n + 1; return n; }; }\n\
         let c = counter(); c(); c(); print(c());",
    );
    assert_eq!(output, "3\n");
}

#[test]
fn test_parameter_defaults_evaluate_in_callee_env() {
    let output = run_output(
        "fn greet(name, punct = \"!\") { return name + punct; }\n\
         print(greet(\"hi\")); print(greet(\"hi\", \"?\"));",
    );
    assert_eq!(output, "hi!\nhi?\n");
}

#[test]
fn test_arity_errors() {
    let (result, _) = run("fn f(a, b) { return a; } f(1);");
    assert!(matches!(result, Err(VmError::Uncaught { .. })));
    let (result, _) = run("fn f(a) { return a; } f(1, 2);");
    assert!(matches!(result, Err(VmError::Uncaught { .. })));
}

#[test]
fn test_recursion() {
    let output = run_output(
        "fn fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }\n\
         print(fib(10));",
    );
    assert_eq!(output, "55\n");
}

#[test]
fn test_stack_overflow_is_catchable() {
    // The evaluator recurses on the host stack, so give the deep-recursion
    // test a roomy thread.
    let handle = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            run_output(
                "fn forever() { return forever(); }\n\
                 try { forever(); } catch (e) { print(\"caught\"); }",
            )
        })
        .unwrap();
    assert_eq!(handle.join().unwrap(), "caught\n");
}

// ============================================================================
// Numeric semantics
// ============================================================================

#[test]
fn test_promotion_in_language() {
    let value = run_value("let a: u8 = 200; let b = a + 1000; b;");
    assert_eq!(value, Value::I32(1200));
}

#[test]
fn test_division_by_zero_throws() {
    let output = run_output("try { let x = 1 / 0; } catch (e) { print(e); }");
    assert!(output.contains("division by zero"));
}

#[test]
fn test_float_arithmetic() {
    assert_eq!(run_value("1.5 * 2;"), Value::F64(3.0));
    assert_eq!(run_value("7 % 3;"), Value::I32(1));
}

#[test]
fn test_bitwise_and_shifts() {
    assert_eq!(run_value("(1 << 4) | 3;"), Value::I32(19));
    assert_eq!(run_value("~0;"), Value::I32(-1));
}

#[test]
fn test_unsigned_negation_widens() {
    let value = run_value("let x: u8 = 5; -x;");
    assert_eq!(value, Value::I16(-5));
    assert_eq!(value.type_name(), "i16");
}

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_string_codepoint_indexing() {
    let output = run_output(
        "let s = \"héllo\";\n\
         print(s.length); print(s.byte_length); print(s[1]);",
    );
    assert_eq!(output, "5\n6\né\n");
}

#[test]
fn test_string_interpolation() {
    let output = run_output("let n = 6; print(\"n=${n}, twice=${n * 2}\");");
    assert_eq!(output, "n=6, twice=12\n");
}

#[test]
fn test_string_methods() {
    assert_eq!(run_value("\"a,b,c\".split(\",\").length;"), Value::I32(3));
    assert_eq!(run_value("\"  x \".trim();"), Value::str("x"));
    assert_eq!(run_value("\"hello\".substr(1, 3);"), Value::str("ell"));
    assert_eq!(run_value("\"hello\".find(\"llo\");"), Value::I32(2));
    assert_eq!(run_value("\"héllo\".find(\"llo\");"), Value::I32(2));
    assert_eq!(run_value("\"ab\".repeat(3);"), Value::str("ababab"));
    assert_eq!(run_value("\"Ab\".to_upper();"), Value::str("AB"));
    assert_eq!(run_value("\"abc\".starts_with(\"ab\");"), Value::Bool(true));
    assert_eq!(run_value("\"a-b\".replace(\"-\", \"+\");"), Value::str("a+b"));
}

#[test]
fn test_string_concat_renders_primitives() {
    let output = run_output("print(\"v=\" + 3 + \"; ok=\" + true);");
    assert_eq!(output, "v=3; ok=true\n");
}

// ============================================================================
// Arrays and objects
// ============================================================================

#[test]
fn test_array_methods() {
    let output = run_output(
        "let xs = [1, 2, 3];\n\
         xs.push(4);\n\
         print(xs.length);\n\
         print(xs.pop());\n\
         print(xs.join(\"-\"));",
    );
    assert_eq!(output, "4\n4\n1-2-3\n");
}

#[test]
fn test_array_map_filter_reduce() {
    let output = run_output(
        "let xs = [1, 2, 3, 4];\n\
         let doubled = xs.map(fn(x) { return x * 2; });\n\
         let evens = xs.filter(fn(x) { return x % 2 == 0; });\n\
         let sum = xs.reduce(fn(acc, x) { return acc + x; }, 0);\n\
         print(doubled.join(\",\")); print(evens.join(\",\")); print(sum);",
    );
    assert_eq!(output, "2,4,6,8\n2,4\n10\n");
}

#[test]
fn test_array_bounds_check() {
    let output = run_output("let xs = [1]; try { print(xs[5]); } catch (e) { print(\"oob\"); }");
    assert_eq!(output, "oob\n");
}

#[test]
fn test_object_fields_and_methods() {
    let output = run_output(
        "let counter = { n: 0, bump: fn() { self.n = self.n + 1; return self.n; } };\n\
         counter.bump(); counter.bump();\n\
         print(counter.n);",
    );
    assert_eq!(output, "2\n");
}

#[test]
fn test_object_dynamic_fields() {
    let output = run_output(
        "let o = { a: 1 };\n\
         o.b = 2; o[\"c\"] = 3;\n\
         print(len(o)); print(o.b + o[\"c\"]);",
    );
    assert_eq!(output, "3\n5\n");
}

#[test]
fn test_missing_field_fails_but_optional_chain_is_null() {
    let output = run_output(
        "let o = { a: 1 };\n\
         try { print(o.missing); } catch (e) { print(\"missing\"); }\n\
         print(o?.missing == null);",
    );
    assert_eq!(output, "missing\ntrue\n");
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_c_style_for_and_break_continue() {
    let output = run_output(
        "let s = 0;\n\
         for (let i = 0; i < 10; i++) {\n\
           if (i == 3) { continue; }\n\
           if (i == 6) { break; }\n\
           s = s + i;\n\
         }\n\
         print(s);",
    );
    // 0+1+2+4+5 = 12
    assert_eq!(output, "12\n");
}

#[test]
fn test_for_in_over_array_object_string() {
    let output = run_output(
        "let total = 0;\n\
         for (v, i in [10, 20]) { total = total + v + i; }\n\
         print(total);\n\
         let names = \"\";\n\
         for (k, v in { a: 1, b: 2 }) { names = names + k + v; }\n\
         print(names);\n\
         let runes = 0;\n\
         for (c in \"héllo\") { runes = runes + 1; }\n\
         print(runes);",
    );
    assert_eq!(output, "31\na1b2\n5\n");
}

#[test]
fn test_switch_fallthrough_and_default() {
    let output = run_output(
        "fn classify(x) {\n\
           let out = \"\";\n\
           switch (x) {\n\
             case 1: out = out + \"one \";\n\
             case 2: out = out + \"two\"; break;\n\
             case 3: out = out + \"three\"; break;\n\
             default: out = \"other\";\n\
           }\n\
           return out;\n\
         }\n\
         print(classify(1)); print(classify(2)); print(classify(9));",
    );
    assert_eq!(output, "one two\ntwo\nother\n");
}

#[test]
fn test_switch_on_strings() {
    let output = run_output(
        "switch (\"b\") { case \"a\": print(\"A\"); break; case \"b\": print(\"B\"); break; }",
    );
    assert_eq!(output, "B\n");
}

#[test]
fn test_ternary_and_coalesce() {
    assert_eq!(run_value("true ? 1 : 2;"), Value::I32(1));
    assert_eq!(run_value("null ?? 7;"), Value::I32(7));
    assert_eq!(run_value("0 ?? 7;"), Value::I32(0));
}

#[test]
fn test_logical_short_circuit() {
    let output = run_output(
        "fn boom() { throw \"called\"; }\n\
         print(false && boom());\n\
         print(true || boom());",
    );
    assert_eq!(output, "false\ntrue\n");
}

#[test]
fn test_incdec_prefix_postfix() {
    let output = run_output("let i = 5; print(i++); print(i); print(--i); print(i);");
    assert_eq!(output, "5\n6\n5\n5\n");
}

#[test]
fn test_compound_assignment() {
    let output = run_output("let x = 2; x += 3; x *= 4; print(x);");
    assert_eq!(output, "20\n");
}

// ============================================================================
// Exceptions and defer
// ============================================================================

#[test]
fn test_try_catch_scenario() {
    let output = run_output("try { throw \"boom\"; } catch(e) { print(\"caught: \" + e); }");
    assert_eq!(output, "caught: boom\n");
}

#[test]
fn test_throw_object_value() {
    let output = run_output(
        "try { throw { code: 7, message: \"bad\" }; }\n\
         catch (e) { print(e.code); print(e.message); }",
    );
    assert_eq!(output, "7\nbad\n");
}

#[test]
fn test_finally_always_runs() {
    let output = run_output(
        "fn f() {\n\
           try { return \"r\"; } finally { print(\"finally\"); }\n\
         }\n\
         print(f());\n\
         try { try { throw \"x\"; } finally { print(\"cleanup\"); } }\n\
         catch (e) { print(\"outer \" + e); }",
    );
    assert_eq!(output, "finally\nr\ncleanup\nouter x\n");
}

#[test]
fn test_finally_replaces_control_flow() {
    let output = run_output(
        "fn f() { try { throw \"a\"; } finally { return \"b\"; } }\n\
         print(f());",
    );
    assert_eq!(output, "b\n");
}

#[test]
fn test_defer_lifo_order() {
    let output = run_output(
        "fn f() {\n\
           defer print(\"d1\");\n\
           defer print(\"d2\");\n\
           defer print(\"d3\");\n\
           print(\"body\");\n\
         }\n\
         f();",
    );
    assert_eq!(output, "body\nd3\nd2\nd1\n");
}

#[test]
fn test_defer_runs_on_throw() {
    let output = run_output(
        "fn f() { defer print(\"cleanup\"); throw \"err\"; }\n\
         try { f(); } catch (e) { print(\"caught \" + e); }",
    );
    assert_eq!(output, "cleanup\ncaught err\n");
}

#[test]
fn test_defer_exception_replaces_active() {
    let output = run_output(
        "fn boom() { throw \"from defer\"; }\n\
         fn f() { defer boom(); throw \"original\"; }\n\
         try { f(); } catch (e) { print(e); }",
    );
    assert_eq!(output, "from defer\n");
}

#[test]
fn test_uncaught_exception_reports_trace() {
    let (result, _) = run("fn inner() { throw \"bad\"; }\nfn outer() { inner(); }\nouter();");
    match result {
        Err(VmError::Uncaught { rendered, trace }) => {
            assert_eq!(rendered, "bad");
            assert!(trace[0].contains("inner"));
            assert!(trace[1].contains("outer"));
        }
        other => panic!("expected uncaught error, got {:?}", other.map(|v| v.type_name())),
    }
}

// ============================================================================
// define / enum / annotations
// ============================================================================

#[test]
fn test_define_validates_and_injects_defaults() {
    let output = run_output(
        "define Point { x: i32, y: i32 = 0 }\n\
         let p: Point = { x: 3 };\n\
         print(p.x); print(p.y);",
    );
    assert_eq!(output, "3\n0\n");
}

#[test]
fn test_define_missing_required_field_throws() {
    let output = run_output(
        "define Point { x: i32, y: i32 = 0 }\n\
         try { let p: Point = { y: 1 }; } catch (e) { print(\"invalid\"); }",
    );
    assert_eq!(output, "invalid\n");
}

#[test]
fn test_enum_values() {
    let output = run_output(
        "enum Color { Red, Green = 5, Blue }\n\
         print(Color.Red); print(Color.Green); print(Color.Blue);",
    );
    assert_eq!(output, "0\n5\n6\n");
}

#[test]
fn test_annotation_conversion() {
    assert_eq!(run_value("let x: u8 = 200; x;"), Value::U8(200));
    let (result, _) = run("let x: u8 = 300;");
    assert!(matches!(result, Err(VmError::Uncaught { .. })));
}

// ============================================================================
// Misc
// ============================================================================

#[test]
fn test_typeof_and_len() {
    assert_eq!(run_value("typeof(1);"), Value::str("i32"));
    assert_eq!(run_value("typeof(\"s\");"), Value::str("string"));
    assert_eq!(run_value("typeof(null);"), Value::str("null"));
    assert_eq!(run_value("len([1, 2, 3]);"), Value::I32(3));
}

#[test]
fn test_serialize_deserialize_round_trip() {
    let output = run_output(
        "let v = { a: 1, b: [true, null, \"s\"] };\n\
         let json = serialize(v);\n\
         let back = deserialize(json);\n\
         print(back.a); print(back.b[2]);",
    );
    assert_eq!(output, "1\ns\n");
}

#[test]
fn test_serialize_rejects_cycles() {
    let output = run_output(
        "let o = { a: 1 };\n\
         o.me = o;\n\
         try { serialize(o); } catch (e) { print(\"cycle\"); }",
    );
    assert_eq!(output, "cycle\n");
}

#[test]
fn test_buffer_builtin_and_indexing() {
    let output = run_output(
        "let b = buffer(4);\n\
         b[0] = 255; b[1] = 'A';\n\
         print(b.length); print(b[0]); print(b[1]);",
    );
    assert_eq!(output, "4\n255\n65\n");
}

#[test]
fn test_assert_builtin() {
    let output = run_output("try { assert(1 == 2, \"nope\"); } catch (e) { print(e); }");
    assert_eq!(output, "nope\n");
}

#[test]
fn test_rune_literals_and_comparison() {
    assert_eq!(run_value("'a' < 'b';"), Value::Bool(true));
    assert_eq!(run_value("\"x\" + 'y';"), Value::str("xy"));
}

#[test]
fn test_const_assignment_fails() {
    let (result, _) = run("const x = 1; x = 2;");
    assert!(matches!(result, Err(VmError::Uncaught { .. })));
}
