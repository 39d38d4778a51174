use std::sync::Arc;

use quarantine::{ExceptionKind, Namespace, Policy, Sandbox, SandboxError, Value, ValueKind};

fn run(source: &str) -> Namespace {
    Sandbox::new(Arc::new(Policy::standard()))
        .run(source, None)
        .expect("run should succeed")
}

/// Runs `source` and returns its `result` binding.
fn eval(source: &str) -> Value {
    run(source)
        .get("result")
        .expect("script should bind `result`")
}

fn eval_error(source: &str) -> SandboxError {
    match Sandbox::new(Arc::new(Policy::standard())).run(source, None) {
        Ok(namespace) => panic!("expected error, received namespace {namespace:?}"),
        Err(err) => err,
    }
}

fn exception_kind(source: &str) -> ExceptionKind {
    let err = eval_error(source);
    match err.exception() {
        Some(exception) => exception.kind,
        None => panic!("expected runtime exception, found {err}"),
    }
}

fn expect_int(value: &Value) -> i64 {
    match value.kind() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected Int, found {}", value.type_name()),
    }
}

fn expect_float(value: &Value) -> f64 {
    match value.kind() {
        ValueKind::Float(n) => *n,
        _ => panic!("expected Float, found {}", value.type_name()),
    }
}

fn expect_str(value: &Value) -> String {
    match value.kind() {
        ValueKind::String(s) => s.clone(),
        _ => panic!("expected String, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Bool(b) => *b,
        _ => panic!("expected Bool, found {}", value.type_name()),
    }
}

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(expect_int(&eval("result = 2 + 3 * 4")), 14);
    assert_eq!(expect_int(&eval("result = (2 + 3) * 4")), 20);
}

#[test]
fn division_always_yields_float() {
    assert_eq!(expect_float(&eval("result = 7 / 2")), 3.5);
    assert_eq!(expect_float(&eval("result = 4 / 2")), 2.0);
}

#[test]
fn modulo_takes_the_sign_of_the_divisor() {
    assert_eq!(expect_int(&eval("result = 7 % 3")), 1);
    assert_eq!(expect_int(&eval("result = 0 - 7 % 3")), -1);
    assert_eq!(expect_int(&eval("result = (0 - 7) % 3")), 2);
    assert_eq!(expect_int(&eval("result = 7 % (0 - 3)")), -2);
}

#[test]
fn arithmetic_failures_raise() {
    assert_eq!(exception_kind("x = 1 % 0"), ExceptionKind::ZeroDivisionError);
    assert_eq!(
        exception_kind("x = 9223372036854775807 + 1"),
        ExceptionKind::ValueError
    );
    assert_eq!(exception_kind("x = 1 + 'a'"), ExceptionKind::TypeError);
}

#[test]
fn concatenates_strings_and_arrays() {
    assert_eq!(expect_str(&eval("result = 'ab' + \"cd\"")), "abcd");
    assert_eq!(expect_str(&eval("result = 'ab' * 3")), "ababab");
    assert_eq!(eval("result = [1] + [2, 3]").to_string(), "[1, 2, 3]");
}

#[test]
fn string_repetition_checks_its_length() {
    assert_eq!(expect_str(&eval("result = 3 * 'ab'")), "ababab");
    assert_eq!(expect_str(&eval("result = 'ab' * (0 - 2)")), "");
    assert_eq!(
        exception_kind("result = 'ab' * 9223372036854775807"),
        ExceptionKind::ValueError
    );
    let err = eval_error("x = 1\nresult = 9223372036854775807 * 'ab'");
    assert!(err.to_string().contains("integer overflow"), "{err}");
}

#[test]
fn logical_operators_short_circuit_and_return_operands() {
    let namespace = run(
        r#"
        calls = []
        fn touch(v) {
            push(calls, v)
            return v
        }
        a = touch(0) && touch(1)
        b = touch(2) || touch(3)
        c = !none
        "#,
    );
    assert_eq!(expect_int(&namespace.get("a").unwrap()), 0);
    assert_eq!(expect_int(&namespace.get("b").unwrap()), 2);
    assert!(expect_bool(&namespace.get("c").unwrap()));
    assert_eq!(namespace.get("calls").unwrap().to_string(), "[0, 2]");
}

#[test]
fn if_else_chains() {
    let value = eval(
        r#"
        fn classify(n) {
            if n < 0 {
                return "negative"
            } else if n == 0 {
                return "zero"
            } else {
                return "positive"
            }
        }
        result = [classify(0 - 5), classify(0), classify(5)]
        "#,
    );
    assert_eq!(value.to_string(), r#"["negative", "zero", "positive"]"#);
}

#[test]
fn loops_support_break_and_continue() {
    let value = eval(
        r#"
        total = 0
        i = 0
        while true {
            i = i + 1
            if i > 10 { break }
            if i % 2 == 0 { continue }
            total = total + i
        }
        count = 0
        loop {
            count = count + 1
            if count == 3 { break }
        }
        result = [total, count]
        "#,
    );
    assert_eq!(value.to_string(), "[25, 3]");
}

#[test]
fn for_iterates_arrays_maps_and_strings() {
    let value = eval(
        r#"
        seen = []
        for n in [1, 2] { push(seen, n) }
        for key in {"a": 1, "b": 2} { push(seen, key) }
        for ch in "xy" { push(seen, ch) }
        result = seen
        "#,
    );
    assert_eq!(value.to_string(), r#"[1, 2, "a", "b", "x", "y"]"#);
}

#[test]
fn blocks_share_the_function_scope() {
    let namespace = run(
        r#"
        if true { inside = 1 }
        fn helper() {
            local = 2
            return local
        }
        value = helper()
        "#,
    );
    assert_eq!(expect_int(&namespace.get("inside").unwrap()), 1);
    assert_eq!(expect_int(&namespace.get("value").unwrap()), 2);
    assert!(!namespace.contains("local"));
}

#[test]
fn functions_take_defaults_and_keywords() {
    let value = eval(
        r#"
        fn greet(name, greeting = "hello", punct = "!") {
            return greeting + " " + name + punct
        }
        result = [greet("ada"), greet("bob", punct = "?"), greet(greeting = "hi", name = "cy")]
        "#,
    );
    assert_eq!(
        value.to_string(),
        r#"["hello ada!", "hello bob?", "hi cy!"]"#
    );
}

#[test]
fn defaults_are_evaluated_at_definition() {
    let value = eval(
        r#"
        base = 1
        fn read(x = base) { return x }
        base = 2
        result = read()
        "#,
    );
    assert_eq!(expect_int(&value), 1);
}

#[test]
fn argument_mismatches_are_type_errors() {
    for source in [
        "fn f(a) { return a }\nf()",
        "fn f(a) { return a }\nf(1, 2)",
        "fn f(a) { return a }\nf(b = 1)",
        "fn f(a) { return a }\nf(1, a = 2)",
        "len(x = [1])",
        "x = 5\nx()",
    ] {
        let err = eval_error(source);
        assert_eq!(
            err.exception().map(|e| e.kind),
            Some(ExceptionKind::TypeError),
            "source {source:?} gave {err}"
        );
    }
}

#[test]
fn closures_capture_their_scope() {
    let value = eval(
        r#"
        fn counter() {
            state = {"n": 0}
            fn bump() {
                state["n"] = state["n"] + 1
                return state["n"]
            }
            return bump
        }
        c = counter()
        c()
        c()
        result = c()
        "#,
    );
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn lambdas_are_expressions() {
    let value = eval(
        r#"
        add = |a, b| a + b
        seven = || 7
        result = add(seven(), 3)
        "#,
    );
    assert_eq!(expect_int(&value), 10);
}

#[test]
fn classes_dispatch_protocol_methods() {
    let namespace = run(
        r#"
        class Money {
            fn __init(self, cents) { self.cents = cents }
            fn __add(self, other) { return Money(self.cents + other.cents) }
            fn __lt(self, other) { return self.cents < other.cents }
            fn __str(self) { return "$" + str(self.cents) }
            fn __len(self) { return self.cents }
            fn double(self) { return Money(self.cents * 2) }
        }
        total = Money(150) + Money(50)
        total_cents = total.cents
        label = str(total.double())
        cheaper = Money(1) < Money(2)
        ordered = sorted([Money(3), Money(1), Money(2)])
        first = ordered[0].cents
        biggest = max(Money(4), Money(9)).cents
        size = len(Money(12))
        "#,
    );
    assert_eq!(expect_int(&namespace.get("total_cents").unwrap()), 200);
    assert_eq!(expect_str(&namespace.get("label").unwrap()), "$400");
    assert!(expect_bool(&namespace.get("cheaper").unwrap()));
    assert_eq!(expect_int(&namespace.get("first").unwrap()), 1);
    assert_eq!(expect_int(&namespace.get("biggest").unwrap()), 9);
    assert_eq!(expect_int(&namespace.get("size").unwrap()), 12);
}

#[test]
fn indexing_and_item_assignment() {
    let namespace = run(
        r#"
        items = [10, 20, 30]
        items[0 - 1] = 99
        last = items[2]
        m = {"a": 1, 2: "two"}
        m["b"] = 3
        two = m[2]
        letter = "hey"[1]
        "#,
    );
    assert_eq!(expect_int(&namespace.get("last").unwrap()), 99);
    assert_eq!(
        namespace.get("m").unwrap().to_string(),
        r#"{"a": 1, "2": "two", "b": 3}"#
    );
    assert_eq!(expect_str(&namespace.get("two").unwrap()), "two");
    assert_eq!(expect_str(&namespace.get("letter").unwrap()), "e");
}

#[test]
fn lookup_failures_raise() {
    assert_eq!(exception_kind("x = [1][3]"), ExceptionKind::IndexError);
    assert_eq!(exception_kind("x = {}['k']"), ExceptionKind::KeyError);
    assert_eq!(exception_kind("x = missing"), ExceptionKind::NameError);
    assert_eq!(
        exception_kind("class A {}\nx = A().nope"),
        ExceptionKind::AttributeError
    );
}

#[test]
fn raise_unwinds_to_the_nearest_catch() {
    let value = eval(
        r#"
        fn risky() {
            raise "bad input"
        }
        try {
            risky()
            result = "unreachable"
        } catch err {
            result = err.kind + ": " + err.message
        }
        "#,
    );
    assert_eq!(expect_str(&value), "Exception: bad input");
}

#[test]
fn top_level_return_stops_execution() {
    let namespace = run("a = 1\nreturn;\nb = 2");
    assert!(namespace.contains("a"));
    assert!(!namespace.contains("b"));
}

#[test]
fn break_outside_loop_is_a_syntax_error() {
    let err = eval_error("break");
    assert!(matches!(err, SandboxError::Syntax(_)), "found {err}");
}

#[test]
fn identifiers_are_ascii_only() {
    assert_eq!(expect_int(&eval("total_2 = 5\nresult = total_2")), 5);
    let err = eval_error("caf\u{e9} = 1");
    assert!(matches!(err, SandboxError::Syntax(_)), "found {err}");
    let err = eval_error("x\u{661} = 1");
    assert!(matches!(err, SandboxError::Syntax(_)), "found {err}");
}

#[test]
fn comments_are_ignored() {
    let value = eval(
        r#"
        // line comment
        result = 1 /* inline /* nested */ comment */ + 1
        "#,
    );
    assert_eq!(expect_int(&value), 2);
}

#[test]
fn conversion_builtins() {
    let value = eval(
        r#"
        result = [int("42"), int(3.9), float("1.5"), str(2.0), bool(""), repr("q"),
                  type(1), chr(65), ord("A"), round(2.5), round(3.14159, 2)]
        "#,
    );
    assert_eq!(
        value.to_string(),
        r#"[42, 3, 1.5, "2.0", false, "\"q\"", "Int", "A", 65, 2, 3.14]"#
    );
    assert_eq!(exception_kind("x = int('abc')"), ExceptionKind::ValueError);
}

#[test]
fn collection_builtins() {
    let namespace = run(
        r#"
        items = [3, 1, 2]
        popped = pop(items)
        has = contains(items, 1)
        pairs = enumerate(["a", "b"])
        backwards = reversed(range(1, 4))
        stepped = range(10, 0, 0 - 3)
        m = {"x": 1, "y": 2}
        ks = keys(m)
        vs = values(m)
        removed = pop(m, "x")
        smallest = min([5, 2, 8])
        total = sum([1, 2, 3], 10)
        same = hash("k") == hash("k")
        identical = id(items) == id(items)
        "#,
    );
    let get = |name: &str| namespace.get(name).unwrap().to_string();
    assert_eq!(get("popped"), "2");
    assert_eq!(get("items"), "[3, 1]");
    assert_eq!(get("has"), "true");
    assert_eq!(get("pairs"), r#"[[0, "a"], [1, "b"]]"#);
    assert_eq!(get("backwards"), "[3, 2, 1]");
    assert_eq!(get("stepped"), "[10, 7, 4, 1]");
    assert_eq!(get("ks"), r#"["x", "y"]"#);
    assert_eq!(get("vs"), "[1, 2]");
    assert_eq!(get("removed"), "1");
    assert_eq!(get("m"), r#"{"y": 2}"#);
    assert_eq!(get("smallest"), "2");
    assert_eq!(get("total"), "16");
    assert_eq!(get("same"), "true");
    assert_eq!(get("identical"), "true");
}

#[test]
fn string_and_regex_modules() {
    let namespace = run(
        r#"
        import string
        import re
        upper = string.upper("abc")
        parts = string.split("a,b,c", ",")
        joined = string.join(parts, "-")
        digits = re.find_all("[0-9]+", "a1b22c333")
        first = re.find("z", "abc")
        cleaned = re.replace("\\s+", "a  b   c", " ")
        "#,
    );
    let get = |name: &str| namespace.get(name).unwrap().to_string();
    assert_eq!(get("upper"), "ABC");
    assert_eq!(get("joined"), "a-b-c");
    assert_eq!(get("digits"), r#"["1", "22", "333"]"#);
    assert_eq!(get("first"), "none");
    assert_eq!(get("cleaned"), "a b c");
    assert_eq!(exception_kind("import re\nre.find('(', 'x')"), ExceptionKind::ValueError);
}

#[test]
fn json_module_round_trips_values() {
    let namespace = run(
        r#"
        import json
        text = json.dumps({"name": "ada", "tags": [1, 2.5, true, none]})
        back = json.loads(text)
        name = back["name"]
        "#,
    );
    assert_eq!(
        expect_str(&namespace.get("text").unwrap()),
        r#"{"name":"ada","tags":[1,2.5,true,null]}"#
    );
    assert_eq!(expect_str(&namespace.get("name").unwrap()), "ada");
    assert_eq!(
        exception_kind("import json\nx = json.dumps(|| 1)"),
        ExceptionKind::TypeError
    );
}

#[test]
fn datetime_module_formats_timestamps() {
    let namespace = run(
        r#"
        import datetime
        epoch = datetime.format(0, "%Y-%m-%d %H:%M")
        now = datetime.timestamp()
        "#,
    );
    assert_eq!(expect_str(&namespace.get("epoch").unwrap()), "1970-01-01 00:00");
    assert!(expect_float(&namespace.get("now").unwrap()) > 1_600_000_000.0);
}

#[test]
fn math_module_functions() {
    let namespace = run(
        r#"
        import math
        floor = math.floor(2.7)
        power = math.pow(2, 10)
        log = math.log(100, 10)
        "#,
    );
    assert_eq!(expect_int(&namespace.get("floor").unwrap()), 2);
    assert_eq!(expect_float(&namespace.get("power").unwrap()), 1024.0);
    assert!((expect_float(&namespace.get("log").unwrap()) - 2.0).abs() < 1e-9);
    assert_eq!(exception_kind("import math\nx = math.sqrt(0 - 1)"), ExceptionKind::ValueError);
}
