use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::interpreter::capabilities::{BufferLogger, Capabilities, RecordingDb, RecordingDevLog};
use crate::interpreter::error::ErrorClass;
use crate::interpreter::modules::ModuleCache;
use crate::interpreter::security::SecurityPolicy;
use crate::interpreter::value::Value;
use crate::interpreter::Evaluator;
use crate::parser::parse_program;

fn evaluator() -> Evaluator {
    Evaluator::new().with_module_cache(Arc::new(ModuleCache::new()))
}

fn eval_with(ev: &Evaluator, source: &str) -> Result<Value, crate::interpreter::error::RuntimeError> {
    let program = parse_program(source).expect("parse failed");
    ev.eval_program(&program)
}

/// Evaluate and render the result in literal form
fn eval_to_string(source: &str) -> String {
    let ev = evaluator();
    let value = eval_with(&ev, source).expect("eval failed");
    ev.inspect_value(&value).expect("render failed")
}

fn eval_err(source: &str) -> crate::interpreter::error::RuntimeError {
    let ev = evaluator();
    eval_with(&ev, source).expect_err("expected an error")
}

// Basics

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(eval_to_string("1 + 2 * 3"), "7");
    assert_eq!(eval_to_string("(1 + 2) * 3"), "9");
    assert_eq!(eval_to_string("7 / 2"), "3");
    assert_eq!(eval_to_string("7.0 / 2"), "3.5");
    assert_eq!(eval_to_string("7 % 3"), "1");
}

#[test]
fn division_by_zero_is_a_value_error() {
    let err = eval_err("1 / 0");
    assert_eq!(err.code, "VAL-0001");
    assert!(err.is_catchable());
}

#[test]
fn integer_overflow_is_a_catchable_value_error() {
    let err = eval_err("9223372036854775807 + 1");
    assert_eq!(err.code, "VAL-0003");
    assert!(err.is_catchable());

    assert_eq!(eval_err("9223372036854775807 * 2").code, "VAL-0003");
    assert_eq!(eval_err("0 - 9223372036854775807 - 2").code, "VAL-0003");
    // i64::MIN has no positive counterpart: negation, division by -1 and
    // the matching remainder all overflow
    let min = "(0 - 9223372036854775807 - 1)";
    assert_eq!(eval_err(&format!("-{}", min)).code, "VAL-0003");
    assert_eq!(eval_err(&format!("{} / (0 - 1)", min)).code, "VAL-0003");
    assert_eq!(eval_err(&format!("{} % (0 - 1)", min)).code, "VAL-0003");

    let recovered = eval_to_string(
        "let f = fn() { 9223372036854775807 + 1 }; (try f()).error != null",
    );
    assert_eq!(recovered, "true");
}

#[test]
fn string_concat_and_comparison() {
    assert_eq!(eval_to_string(r#""ab" + "cd""#), "\"abcd\"");
    assert_eq!(eval_to_string(r#""a" < "b""#), "true");
    assert_eq!(eval_to_string("2 == 2.0"), "true");
}

#[test]
fn truthiness_only_null_and_false_are_falsy() {
    assert_eq!(eval_to_string("if (0) { 1 } else { 2 }"), "1");
    assert_eq!(eval_to_string(r#"if ("") { 1 } else { 2 }"#), "1");
    assert_eq!(eval_to_string("if (null) { 1 } else { 2 }"), "2");
    assert_eq!(eval_to_string("if (false) { 1 } else { 2 }"), "2");
}

#[test]
fn coalesce_takes_the_first_non_null() {
    assert_eq!(eval_to_string("null ?? 5"), "5");
    assert_eq!(eval_to_string("false ?? 5"), "false");
}

#[test]
fn let_assign_and_shadowing() {
    assert_eq!(eval_to_string("let x = 1; x = x + 1; x"), "2");
    assert_eq!(
        eval_to_string("let x = 1; let f = fn() { let x = 10; x }; f() + x"),
        "11"
    );
}

#[test]
fn undefined_identifier_suggests_close_names() {
    let err = eval_err("let counter = 1; countre");
    assert_eq!(err.code, "UNDEF-0001");
    assert_eq!(err.class, ErrorClass::Undefined);
    assert!(err.hints[0].contains("counter"));
}

// Functions and closures

#[test]
fn closures_capture_their_environment() {
    let source = r#"
        let makeCounter = fn() {
            let count = 0
            fn() { count = count + 1; count }
        }
        let tick = makeCounter()
        tick(); tick(); tick()
    "#;
    assert_eq!(eval_to_string(source), "3");
}

#[test]
fn return_exits_the_function_early() {
    assert_eq!(
        eval_to_string("let f = fn(x) { if (x > 1) { return 99 }; 0 }; f(5)"),
        "99"
    );
}

#[test]
fn arity_errors_are_not_catchable() {
    let err = eval_err("let f = fn(a, b) { a + b }; f(1)");
    assert_eq!(err.class, ErrorClass::Arity);
    assert!(!err.is_catchable());
}

#[test]
fn spread_expands_arrays_in_calls() {
    assert_eq!(
        eval_to_string("let f = fn(a, b, c) { a + b + c }; let xs = [1, 2]; f(...xs, 3)"),
        "6"
    );
    assert_eq!(eval_to_string("[0, ...[1, 2], 3]"), "[0, 1, 2, 3]");
}

// Dictionaries

#[test]
fn dict_preserves_insertion_order_through_delete() {
    let source = r#"
        let d = { a: 1, b: 2, c: 3 }
        d.delete("b")
        d.set("e", 5)
        d.keys()
    "#;
    assert_eq!(eval_to_string(source), r#"["a", "c", "e"]"#);
}

#[test]
fn dict_entries_evaluate_lazily_on_every_access() {
    // the `hits` counter stays put until the entry is read, then moves on
    // each read: entries are expressions, not cached values
    let source = r#"
        let hits = 0
        let d = { expensive: fn() { hits = hits + 1; hits }() }
        let before = hits
        let first = d.expensive
        let second = d.expensive
        [before, first, second, hits]
    "#;
    assert_eq!(eval_to_string(source), "[0, 1, 2, 2]");
}

#[test]
fn dict_entries_see_current_bindings() {
    let source = r#"
        let price = 10
        let d = { total: price * 2 }
        let a = d.total
        price = 50
        [a, d.total]
    "#;
    assert_eq!(eval_to_string(source), "[20, 100]");
}

#[test]
fn dict_entries_read_the_current_context() {
    let ev = evaluator();
    ev.set_context_value("@params", Value::Int(1));
    eval_with(&ev, "let d = { p: @params }").unwrap();
    assert_eq!(eval_with(&ev, "d.p").unwrap(), Value::Int(1));

    // the same dictionary sees the new context on the next access
    ev.set_context_value("@params", Value::Int(2));
    assert_eq!(eval_with(&ev, "d.p").unwrap(), Value::Int(2));
}

#[test]
fn dict_equality_ignores_insertion_order() {
    assert_eq!(eval_to_string("{ a: 1, b: 2 } == { b: 2, a: 1 }"), "true");
    assert_eq!(eval_to_string("{ a: 1 } == { a: 2 }"), "false");
    assert_eq!(eval_to_string("{ a: 1 } == { a: 1, b: 2 }"), "false");
}

#[test]
fn reorder_returns_a_new_dict_and_keeps_the_original() {
    let source = r#"
        let d = { a: 1, b: 2, c: 3 }
        let r = d.reorder(["c", "a"])
        [r.keys(), d.keys()]
    "#;
    assert_eq!(
        eval_to_string(source),
        r#"[["c", "a", "b"], ["a", "b", "c"]]"#
    );
}

#[test]
fn dicts_share_mutations_across_handles() {
    let source = r#"
        let a = { n: 1 }
        let b = a
        b.n = 2
        a.n
    "#;
    assert_eq!(eval_to_string(source), "2");
}

#[test]
fn missing_dict_members_are_null() {
    assert_eq!(eval_to_string("{ a: 1 }.missing"), "null");
}

#[test]
fn dict_function_entries_are_callable_as_methods() {
    assert_eq!(
        eval_to_string("let d = { double: fn(x) { x * 2 } }; d.double(21)"),
        "42"
    );
}

// Null propagation

#[test]
fn member_access_on_null_is_null_but_unknown_names_error() {
    assert_eq!(eval_to_string("let user = null; user.name"), "null");
    assert_eq!(eval_to_string("let user = null; user.name.upper()"), "null");
    let err = eval_err("missingUser.name");
    assert_eq!(err.class, ErrorClass::Undefined);
}

// Arrays

#[test]
fn map_filter_reduce() {
    assert_eq!(eval_to_string("[1, 2, 3].map(fn(x) { x * 2 })"), "[2, 4, 6]");
    assert_eq!(eval_to_string("[1, 2, 3, 4].filter(fn(x) { x % 2 == 0 })"), "[2, 4]");
    assert_eq!(
        eval_to_string("[1, 2, 3, 4].reduce(fn(acc, x) { acc + x })"),
        "10"
    );
    assert_eq!(
        eval_to_string("[1, 2, 3].reduce(fn(acc, x) { acc + x }, 100)"),
        "106"
    );
}

#[test]
fn reduce_of_empty_array_without_seed_is_an_error() {
    let err = eval_err("[].reduce(fn(a, b) { a + b })");
    assert!(err.is_catchable());
}

#[test]
fn sort_and_slice_are_immutable() {
    let source = r#"
        let xs = [3, 1, 2]
        let sorted = xs.sort()
        [sorted, xs]
    "#;
    assert_eq!(eval_to_string(source), "[[1, 2, 3], [3, 1, 2]]");
    assert_eq!(eval_to_string("[1, 2, 3, 4].slice(1, 3)"), "[2, 3]");
    assert_eq!(eval_to_string("[1, 2, 3].indexOf(3)"), "2");
}

#[test]
fn negative_indexing_counts_from_the_end() {
    assert_eq!(eval_to_string("[1, 2, 3][-1]"), "3");
    assert_eq!(eval_to_string("[1, 2, 3][9]"), "null");
}

// For loops

#[test]
fn for_collects_non_null_results() {
    assert_eq!(
        eval_to_string("for (x in [1, 2, 3, 4]) { if (x % 2 == 0) { x * 10 } }"),
        "[20, 40]"
    );
}

#[test]
fn for_stop_and_skip() {
    assert_eq!(
        eval_to_string("for (x in [1, 2, 3, 4, 5]) { if (x == 4) { stop }; x }"),
        "[1, 2, 3]"
    );
    assert_eq!(
        eval_to_string("for (x in [1, 2, 3, 4]) { if (x == 2) { skip }; x }"),
        "[1, 3, 4]"
    );
}

#[test]
fn for_over_dict_follows_insertion_order() {
    assert_eq!(
        eval_to_string(r#"for (k, v in { b: 2, a: 1 }) { k + ":" + inspect(v) }"#),
        r#"["b:2", "a:1"]"#
    );
}

#[test]
fn for_with_function_body() {
    assert_eq!(eval_to_string("for ([1, 2, 3]) fn(x) { x * x }"), "[1, 4, 9]");
}

// try / fail

#[test]
fn try_wraps_success_and_catchable_failure() {
    assert_eq!(
        eval_to_string("let r = try fail(\"boom\"); r"),
        r#"{result: null, error: "boom"}"#
    );
    let source = r#"
        let half = fn(n) { n / 0 }
        let r = try half(4)
        r.error
    "#;
    assert_eq!(eval_to_string(source), "\"division by zero\"");
    assert_eq!(
        eval_to_string("let ok = fn() { 7 }; try ok()"),
        "{result: 7, error: null}"
    );
}

#[test]
fn try_result_dict_key_order_is_result_then_error() {
    assert_eq!(
        eval_to_string("let f = fn() { 1 }; (try f()).keys()"),
        r#"["result", "error"]"#
    );
}

#[test]
fn try_does_not_intercept_program_defects() {
    // calling an undefined function is a defect, not a runtime condition
    let err = eval_err("try nonExistentFn()");
    assert_eq!(err.class, ErrorClass::Undefined);

    let err = eval_err("let f = fn(a) { a }; try f()");
    assert_eq!(err.class, ErrorClass::Arity);
}

#[test]
fn fail_requires_a_string_message() {
    let err = eval_err("fail(42)");
    assert_eq!(err.code, "TYPE-0005");
    assert!(!err.is_catchable());
}

// Money

#[test]
fn money_arithmetic_and_formatting() {
    assert_eq!(eval_to_string("$12.50 + $2.50"), "$15.00");
    assert_eq!(eval_to_string("$10.00 - $2.50"), "$7.50");
    assert_eq!(eval_to_string("$10.00 * 3"), "$30.00");
    assert_eq!(eval_to_string("JPY#150 * 2"), "¥300");
}

#[test]
fn money_division_rounds_ties_to_even() {
    assert_eq!(eval_to_string("$0.05 / 2"), "$0.02");
    assert_eq!(eval_to_string("$0.15 / 2"), "$0.08");
    assert_eq!(eval_to_string("$10.00 / 3"), "$3.33");
    assert_eq!(eval_to_string("$0.05 * 0.5"), "$0.02");
}

#[test]
fn money_split_distributes_remainders_first() {
    assert_eq!(eval_to_string("$0.01.split(3)"), "[$0.01, $0.00, $0.00]");
    assert_eq!(eval_to_string("$10.00.split(3)"), "[$3.34, $3.33, $3.33]");
}

#[test]
fn mixed_currency_arithmetic_is_catchable() {
    let err = eval_err("$1.00 + EUR#1.00");
    assert_eq!(err.code, "VAL-0002");

    assert_eq!(
        eval_to_string("let f = fn() { $1.00 + EUR#1.00 }; (try f()).error"),
        "\"cannot combine USD and EUR amounts\""
    );
}

// Datetimes and durations

#[test]
fn datetime_plus_duration_is_calendar_aware() {
    assert_eq!(eval_to_string("@2024-01-31 + 1mo"), "@2024-02-29");
    assert_eq!(eval_to_string("@2024-12-25 + 1w"), "@2025-01-01");
    assert_eq!(
        eval_to_string("@2024-12-25T14:30:00Z - @2024-12-25T12:30:00Z"),
        "2h"
    );
}

#[test]
fn datetime_accessors() {
    assert_eq!(eval_to_string("@2024-12-25.year()"), "2024");
    assert_eq!(eval_to_string("@2024-12-25.weekday()"), "\"Wednesday\"");
}

// Regex

#[test]
fn regex_literals_and_methods() {
    assert_eq!(eval_to_string(r#"r/[a-z]+/.test("abc")"#), "true");
    assert_eq!(
        eval_to_string(r#"r/\d+/.findAll("a1 b22 c333")"#),
        r#"["1", "22", "333"]"#
    );
    assert_eq!(eval_to_string(r#"r/HELLO/i.test("hello")"#), "true");
}

// JSON

#[test]
fn json_round_trip_through_script_values() {
    assert_eq!(
        eval_to_string(r#"jsonEncode({ a: 1, b: [true, null] })"#),
        r#""{\"a\":1,\"b\":[true,null]}""#
    );
    assert_eq!(
        eval_to_string(r#"jsonDecode("{\"x\": [1, 2]}").x"#),
        "[1, 2]"
    );
    let err = eval_err(r#"jsonDecode("{nope")"#);
    assert!(err.is_catchable());
}

// Schemas and records

#[test]
fn schema_validates_dicts_into_records() {
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: { type: "string", required: true },
            active: { type: "bool", default: true },
        })
        let u = User({ id: 1, name: "ada" })
        [u.name, u.active]
    "#;
    assert_eq!(eval_to_string(source), r#"["ada", true]"#);
}

#[test]
fn schema_validation_failure_is_catchable() {
    let source = r#"
        let User = schema("User", { name: { type: "string", required: true } })
        let r = try User({})
        r.error
    "#;
    let rendered = eval_to_string(source);
    assert!(rendered.contains("missing required field 'name'"), "{}", rendered);
}

#[test]
fn schema_identity_is_nominal_not_structural() {
    let source = r#"
        let A = schema("Point", { x: "int" })
        let B = schema("Point", { x: "int" })
        let p = A({ x: 1 })
        [p is A, p is B, p is not B]
    "#;
    assert_eq!(eval_to_string(source), "[true, false, true]");
}

#[test]
fn schema_validate_method_reports_without_throwing() {
    let source = r#"
        let User = schema("User", { name: { type: "string", required: true } })
        let report = User.validate({})
        [report.valid, len(report.errors)]
    "#;
    assert_eq!(eval_to_string(source), "[false, 1]");
}

// Context values

#[test]
fn context_params_resolve_after_the_lexical_chain() {
    let ev = evaluator();
    ev.set_context_value("@params", Value::Str("from host".to_string()));
    let value = eval_with(&ev, "@params").unwrap();
    assert_eq!(value, Value::Str("from host".to_string()));

    // lexical bindings win over context
    let value = eval_with(&ev, "let f = fn() { let @params = 1; @params }; f()").unwrap();
    assert_eq!(value, Value::Int(1));
}

#[test]
fn unresolved_context_params_get_guidance() {
    let err = eval_err("@params.title");
    assert_eq!(err.code, "PART-0002");
    assert_eq!(err.class, ErrorClass::Undefined);
    assert!(err.hints.len() >= 2);
}

#[test]
fn host_bindings_are_protected() {
    let err = eval_err("@env = 1");
    assert_eq!(err.code, "VAL-0010");
    let err = eval_err("@args = []");
    assert_eq!(err.code, "VAL-0010");
}

// Logging

#[test]
fn log_goes_through_the_logger_capability() {
    let logger = Arc::new(BufferLogger::default());
    let ev = evaluator().with_capabilities(Capabilities {
        logger: logger.clone(),
        ..Capabilities::default()
    });
    eval_with(&ev, r#"logLine("hello", 42); log("tail")"#).unwrap();
    assert_eq!(logger.contents(), "hello 42\ntail");
}

#[test]
fn dev_log_entries_carry_route_level_and_call_site() {
    let sink = Arc::new(RecordingDevLog::default());
    let ev = evaluator().with_capabilities(Capabilities {
        dev_log: Some(sink.clone()),
        ..Capabilities::default()
    });
    ev.set_dev_route("/orders");
    eval_with(&ev, r#"devLog("total", 42, { level: "warn" })"#).unwrap();

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].route, "/orders");
    assert_eq!(entries[0].level, "warn");
    assert_eq!(entries[0].call, "devLog(total)");
    assert_eq!(entries[0].value, "42");
    assert_eq!(entries[0].line, 1);
}

#[test]
fn dev_log_defaults_to_info_and_no_label() {
    let sink = Arc::new(RecordingDevLog::default());
    let ev = evaluator().with_capabilities(Capabilities {
        dev_log: Some(sink.clone()),
        ..Capabilities::default()
    });
    eval_with(&ev, r#"devLog([1, 2]); devLog("count", 3)"#).unwrap();

    let entries = sink.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].level, "info");
    assert_eq!(entries[0].call, "devLog");
    assert_eq!(entries[0].value, "[1, 2]");
    assert_eq!(entries[1].call, "devLog(count)");
    assert_eq!(entries[1].value, "3");
}

#[test]
fn dev_log_clear_names_the_route() {
    let sink = Arc::new(RecordingDevLog::default());
    let ev = evaluator().with_capabilities(Capabilities {
        dev_log: Some(sink.clone()),
        ..Capabilities::default()
    });
    ev.set_dev_route("/orders");
    eval_with(&ev, r#"devLogClear(); devLogClear("/admin")"#).unwrap();
    assert_eq!(sink.cleared(), vec!["/orders".to_string(), "/admin".to_string()]);
}

#[test]
fn dev_log_without_a_writer_is_a_null_no_op() {
    assert_eq!(eval_to_string("devLog(1)"), "null");
    assert_eq!(eval_to_string("devLogClear()"), "null");
}

// Security

#[test]
fn writes_and_execution_are_denied_by_default() {
    let err = eval_err(r#"fileWrite("/tmp/sorrel-test-denied.txt", "x")"#);
    assert_eq!(err.class, ErrorClass::Security);
    assert!(!err.is_catchable());

    let err = eval_err(r#"shell("/bin/echo", "hi")"#);
    assert_eq!(err.class, ErrorClass::Security);
}

#[test]
fn security_errors_cannot_be_caught() {
    let source = r#"
        let w = fn() { fileWrite("/tmp/x.txt", "data") }
        try w()
    "#;
    let err = eval_err(source);
    assert_eq!(err.class, ErrorClass::Security);
}

// Commands

#[test]
fn cmd_builds_a_handle_without_running_anything() {
    // construction needs no execute permission; only run() is gated
    assert_eq!(eval_to_string(r#"type(cmd("/bin/echo", "hi"))"#), "\"command\"");
    assert_eq!(
        eval_to_string(r#"cmd("/bin/echo", "a", "b").args()"#),
        r#"["a", "b"]"#
    );
    assert_eq!(
        eval_to_string(r#"cmd("/bin/echo").program()"#),
        "\"/bin/echo\""
    );
}

#[test]
fn command_run_is_execute_gated() {
    let err = eval_err(r#"cmd("/bin/echo", "hi").run()"#);
    assert_eq!(err.class, ErrorClass::Security);
    assert!(!err.is_catchable());
}

#[cfg(unix)]
#[test]
fn command_run_captures_output_and_feeds_stdin() {
    let ev = evaluator().with_security(SecurityPolicy {
        allow_execute_all: true,
        ..SecurityPolicy::default()
    });
    let value = eval_with(&ev, r#"cmd("/bin/echo", "hi").run().stdout"#).unwrap();
    assert_eq!(value, Value::Str("hi\n".to_string()));

    let value = eval_with(&ev, r#"cmd("/bin/cat").run("piped").stdout"#).unwrap();
    assert_eq!(value, Value::Str("piped".to_string()));

    let value = eval_with(&ev, r#"shell("/bin/echo", "direct").exitCode"#).unwrap();
    assert_eq!(value, Value::Int(0));
}

#[test]
fn write_allow_list_permits_scoped_writes() {
    let dir = tempfile::tempdir().unwrap();
    let ev = evaluator().with_security(SecurityPolicy {
        allow_write: vec![dir.path().to_path_buf()],
        ..SecurityPolicy::default()
    });
    let target = dir.path().join("out.txt");
    let source = format!(r#"fileWrite("{}", "written")"#, target.display());
    eval_with(&ev, &source).unwrap();
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "written");
}

// Modules

#[test]
fn imports_evaluate_once_and_expose_exports() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("lib.sl");
    std::fs::write(&module, "export double = fn(x) { x * 2 }\nlet hidden = 1").unwrap();
    let main = dir.path().join("main.sl");
    std::fs::write(
        &main,
        r#"
            let lib = import @./lib.sl
            let again = import @./lib.sl
            [lib.double(21), lib.hidden]
        "#,
    )
    .unwrap();

    let ev = evaluator();
    let value = ev.run_file(&main).unwrap();
    assert_eq!(ev.inspect_value(&value).unwrap(), "[42, null]");
    assert_eq!(ev.module_cache().len(), 1);
}

#[test]
fn circular_imports_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.sl"), "let b = import @./b.sl\nexport x = 1").unwrap();
    std::fs::write(dir.path().join("b.sl"), "let a = import @./a.sl\nexport y = 2").unwrap();
    let main = dir.path().join("main.sl");
    std::fs::write(&main, "import @./a.sl").unwrap();

    let err = evaluator().run_file(&main).unwrap_err();
    assert_eq!(err.code, "IMPORT-0002");
}

#[test]
fn std_math_module() {
    assert_eq!(
        eval_to_string("let math = import @std/math; math.floor(3.7)"),
        "3"
    );
}

#[test]
fn cache_clear_forces_reevaluation() {
    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("counter.sl");
    std::fs::write(&module, "export n = 1").unwrap();
    let main = dir.path().join("main.sl");
    std::fs::write(&main, "(import @./counter.sl).n").unwrap();

    let ev = evaluator();
    assert_eq!(ev.run_file(&main).unwrap(), Value::Int(1));

    std::fs::write(&module, "export n = 2").unwrap();
    // still cached
    assert_eq!(ev.run_file(&main).unwrap(), Value::Int(1));
    ev.module_cache().clear();
    assert_eq!(ev.run_file(&main).unwrap(), Value::Int(2));
}

// Tables

#[test]
fn table_transforms_are_immutable() {
    let source = r#"
        let t = table(["name", "score"], [["ada", 3], ["bob", 1], ["cy", 2]])
        let top = t.orderBy("score", "desc").limit(2)
        [top.count(), t.count(), top.first().name]
    "#;
    assert_eq!(eval_to_string(source), r#"[2, 3, "ada"]"#);
}

#[test]
fn table_from_dicts_and_row_access() {
    let source = r#"
        let t = table([{ a: 1, b: 2 }, { a: 3, b: 4 }])
        [t[1].a, t.where("b", 2).count(), t.select(["b"]).first().b]
    "#;
    assert_eq!(eval_to_string(source), "[3, 1, 2]");
}

// Database bindings

#[test]
fn binding_insert_goes_through_positional_params() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db.clone()),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: { type: "string", required: true },
        })
        let users = bind(User, "users")
        users.insert({ id: 1, name: "ada" })
    "#;
    eval_with(&ev, source).unwrap();
    let recorded = db.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "INSERT INTO users (id, name) VALUES (?, ?)");
    assert_eq!(recorded[0].1, vec![Value::Int(1), Value::Str("ada".to_string())]);
}

#[test]
fn to_sql_previews_the_statement_that_would_run() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db.clone()),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        let preview = users.where("name", "ada").orderBy("id", "desc").toSQL()
        [preview.sql, preview.params]
    "#;
    let value = eval_with(&ev, source).unwrap();
    assert_eq!(
        value,
        Value::Array(vec![
            Value::Str("SELECT * FROM users WHERE name = ? ORDER BY id DESC".to_string()),
            Value::Array(vec![Value::Str("ada".to_string())]),
        ])
    );
    // previews never execute
    assert!(db.recorded().is_empty());
}

#[test]
fn to_sql_carries_the_write_statements_params() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db.clone()),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        let preview = users.toSQL("insert", { id: 3, name: "ada" })
        [preview.sql, preview.params]
    "#;
    let value = eval_with(&ev, source).unwrap();
    assert_eq!(
        value,
        Value::Array(vec![
            Value::Str("INSERT INTO users (id, name) VALUES (?, ?)".to_string()),
            Value::Array(vec![Value::Int(3), Value::Str("ada".to_string())]),
        ])
    );
    assert!(db.recorded().is_empty());
}

#[test]
fn query_chain_supports_select_offset_and_multi_column_order() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db.clone()),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        users.select(["id", "name"]).orderBy("name").orderBy("id", "desc")
            .limit(10).offset(20).toSQL().sql
    "#;
    let value = eval_with(&ev, source).unwrap();
    assert_eq!(
        value,
        Value::Str(
            "SELECT id, name FROM users ORDER BY name ASC, id DESC LIMIT 10 OFFSET 20"
                .to_string()
        )
    );
    assert!(db.recorded().is_empty());
}

#[test]
fn first_and_last_take_an_ordering_override() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db.clone()),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        users.first("name")
        users.last("name")
        users.last()
    "#;
    eval_with(&ev, source).unwrap();
    let recorded = db.recorded();
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorded[0].0, "SELECT * FROM users ORDER BY name ASC LIMIT 1");
    // last() reads from the far end of the ordering
    assert_eq!(recorded[1].0, "SELECT * FROM users ORDER BY name DESC LIMIT 1");
    assert_eq!(recorded[2].0, "SELECT * FROM users ORDER BY id DESC LIMIT 1");
}

#[test]
fn delete_accepts_a_bare_primary_key() {
    let db = Arc::new(RecordingDb::default());
    *db.next_rows.lock().unwrap() = vec![vec![
        ("id".to_string(), Value::Int(5)),
        ("name".to_string(), Value::Str("ada".to_string())),
    ]];
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db.clone()),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        users.delete(5)
    "#;
    eval_with(&ev, source).unwrap();
    let recorded = db.recorded();
    // the bare key is looked up first, then the row is deleted by key
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].0, "SELECT * FROM users WHERE id = ? LIMIT 1");
    assert_eq!(recorded[1].0, "DELETE FROM users WHERE id = ?");
    assert_eq!(recorded[1].1, vec![Value::Int(5)]);
}

#[test]
fn bare_primary_key_misses_are_catchable_db_errors() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        let gone = fn() { users.delete(99) }
        (try gone()).error
    "#;
    let value = eval_with(&ev, source).unwrap();
    match value {
        Value::Str(msg) => assert!(msg.contains("no users row with id = 99"), "{}", msg),
        other => panic!("expected error message, got {:?}", other),
    }
}

#[test]
fn update_without_pk_is_a_catchable_db_error() {
    let db = Arc::new(RecordingDb::default());
    let ev = evaluator().with_capabilities(Capabilities {
        db: Some(db),
        ..Capabilities::default()
    });
    let source = r#"
        let User = schema("User", {
            id: { type: "int", pk: true },
            name: "string",
        })
        let users = bind(User, "users")
        let r = try users.update({ name: "ada" })
        r.error
    "#;
    let value = eval_with(&ev, source).unwrap();
    match value {
        Value::Str(msg) => assert!(msg.contains("no 'id' value"), "{}", msg),
        other => panic!("expected error message, got {:?}", other),
    }
}

#[test]
fn bind_without_a_database_is_catchable() {
    let source = r#"
        let User = schema("User", { id: "int" })
        let connect = fn() { bind(User, "users") }
        (try connect()).error
    "#;
    let rendered = eval_to_string(source);
    assert!(rendered.contains("no database connection"), "{}", rendered);
}
