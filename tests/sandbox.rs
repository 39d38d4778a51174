use std::{sync::Arc, thread};

use indexmap::IndexMap;
use quarantine::{
    Bindings, ExceptionKind, Namespace, Policy, Sandbox, SandboxError, Value, ValueKind,
    ViolationKind,
};

fn sandbox() -> Sandbox {
    Sandbox::new(Arc::new(Policy::standard()))
}

fn permissive() -> Sandbox {
    Sandbox::new(Arc::new(Policy::new(
        Vec::<String>::new(),
        ["math", "string", "re", "json", "datetime"],
    )))
}

fn run(source: &str) -> Namespace {
    sandbox().run(source, None).expect("run should succeed")
}

fn run_error(source: &str) -> SandboxError {
    match sandbox().run(source, None) {
        Ok(namespace) => panic!("expected error, received namespace {namespace:?}"),
        Err(err) => err,
    }
}

fn eval(source: &str) -> Value {
    sandbox()
        .evaluate(source, None)
        .expect("evaluation should succeed")
}

fn violation(err: &SandboxError) -> ViolationKind {
    match err.violation() {
        Some(violation) => violation.kind,
        None => panic!("expected security violation, found {err}"),
    }
}

fn exception(err: &SandboxError) -> ExceptionKind {
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

fn expect_strings(value: &Value) -> Vec<String> {
    match value.kind() {
        ValueKind::Array(items) => items
            .borrow()
            .iter()
            .map(|item| item.as_str().expect("string element").to_string())
            .collect(),
        _ => panic!("expected Array, found {}", value.type_name()),
    }
}

fn binding(namespace: &Namespace, name: &str) -> Value {
    namespace
        .get(name)
        .unwrap_or_else(|| panic!("`{name}` should be bound"))
}

fn with_log() -> (Value, Bindings) {
    let log = Value::array(Vec::new());
    let mut additional = IndexMap::new();
    additional.insert("log".to_string(), log.clone());
    (log, additional)
}

#[test]
fn evaluates_simple_expression() {
    assert_eq!(expect_int(&eval("1+1")), 2);
}

#[test]
fn run_returns_resulting_bindings() {
    let namespace = run("x = 1\ny = x + 1");
    assert_eq!(expect_int(&binding(&namespace, "x")), 1);
    assert_eq!(expect_int(&binding(&namespace, "y")), 2);
}

#[test]
fn rejects_private_name_before_execution() {
    let err = sandbox().evaluate("__import('os')", None).unwrap_err();
    assert_eq!(violation(&err), ViolationKind::PrivateNameAccess);
    let found = err.violation().unwrap();
    assert_eq!(found.name, "__import");
    let position = found.position.expect("validator reports a position");
    assert_eq!((position.line, position.column), (1, 1));
}

#[test]
fn reports_position_of_private_attribute() {
    let err = run_error("x = 1\ny = x._z");
    let found = err.violation().unwrap();
    assert_eq!(found.kind, ViolationKind::PrivateNameAccess);
    let position = found.position.unwrap();
    assert_eq!((position.line, position.column), (2, 7));
}

#[test]
fn rejects_private_names_in_every_reference_position() {
    for source in [
        "_x = 1",
        "m = {}\nm['_k'] = 1",
        "m = {}\nm[('_k')] = 1",
        "m = {'k': 1}\nv = m[(('_k'))]",
        "f = |a| a\nf(_a = 1)",
        "from math import _hidden",
        "from math import sqrt as _root",
        "import math as _m",
        "for _i in [1] { }",
        "try { raise 1 } catch _err { }",
        "y = [1][0].__len",
    ] {
        let err = run_error(source);
        assert_eq!(
            violation(&err),
            ViolationKind::PrivateNameAccess,
            "source {source:?} should be rejected"
        );
    }
}

#[test]
fn definition_names_are_not_references() {
    let namespace = run(
        r#"
        class Counter {
            fn __init(self, start) {
                self.count = start
            }
        }
        c = Counter(3)
        total = c.count
        "#,
    );
    assert_eq!(expect_int(&binding(&namespace, "total")), 3);
}

#[test]
fn refuses_module_outside_allowlist() {
    let err = run_error("import os");
    assert_eq!(violation(&err), ViolationKind::DisallowedImport);
    assert_eq!(err.violation().unwrap().name, "os");
}

#[test]
fn refused_import_carries_its_position() {
    let err = run_error("x = 1\nfrom fs import read_text");
    let position = err.violation().unwrap().position.unwrap();
    assert_eq!(position.line, 2);
}

#[test]
fn imports_allowlisted_module() {
    let namespace = run("import math\nresult = math.sqrt(4)");
    assert_eq!(expect_float(&binding(&namespace, "result")), 2.0);
}

#[test]
fn from_import_binds_members_with_aliases() {
    let namespace = run("from math import sqrt as root, pi\nr = root(9)");
    assert_eq!(expect_float(&binding(&namespace, "r")), 3.0);
    assert!(namespace.contains("pi"));
    assert!(!namespace.contains("math"));
}

#[test]
fn allowlisted_but_unknown_module_is_an_import_error() {
    let sandbox = Sandbox::new(Arc::new(Policy::new(Vec::<String>::new(), ["missing"])));
    let err = sandbox.run("import missing", None).unwrap_err();
    assert_eq!(exception(&err), ExceptionKind::ImportError);
}

#[test]
fn repeated_runs_are_isolated() {
    let source = "items = [1, 2]\npush(items, 3)\ncount = len(items)\nlabel = str(count) + ' items'\nratio = count / 2";
    let first = run(source);
    let second = run(source);
    assert_eq!(first.names(), second.names());
    for ((name, left), (_, right)) in first.entries().iter().zip(second.entries().iter()) {
        assert_eq!(left.repr(), right.repr(), "binding `{name}` differs between runs");
    }
    assert_eq!(expect_int(&binding(&first, "count")), 3);
    assert_eq!(binding(&first, "label").as_str(), Some("3 items"));
    assert_eq!(expect_float(&binding(&second, "ratio")), 1.5);
    assert!(!binding(&first, "items").same_object(&binding(&second, "items")));
}

#[test]
fn module_objects_are_not_shared_between_runs() {
    let first = run("import math");
    let second = run("import math");
    assert!(!binding(&first, "math").same_object(&binding(&second, "math")));
}

#[test]
fn module_exports_are_read_only() {
    let err = run_error("import math\nmath.pi = 3");
    assert_eq!(exception(&err), ExceptionKind::AttributeError);
}

#[test]
fn implicit_protocol_dispatch_passes_validation() {
    // Documented gap: `__eq` runs through `==` without its name appearing.
    let (log, additional) = with_log();
    let namespace = sandbox()
        .run(
            r#"
            class Sneaky {
                fn __eq(self, other) {
                    push(log, "eq called")
                    return true
                }
            }
            result = Sneaky() == 5
            "#,
            Some(additional),
        )
        .expect("protocol methods are not visible to the validator");
    assert_eq!(binding(&namespace, "result").as_bool(), Some(true));
    assert_eq!(expect_strings(&log), vec!["eq called"]);
}

#[test]
fn nothing_runs_when_validation_fails() {
    let (log, additional) = with_log();
    let err = sandbox()
        .run("push(log, 1)\nsecret = log._items", Some(additional))
        .unwrap_err();
    assert_eq!(violation(&err), ViolationKind::PrivateNameAccess);
    assert!(expect_strings(&log).is_empty());
}

#[test]
fn refused_import_halts_mid_run() {
    let (log, additional) = with_log();
    let err = sandbox()
        .run(
            "push(log, 'before')\nimport os\npush(log, 'after')",
            Some(additional),
        )
        .unwrap_err();
    assert_eq!(violation(&err), ViolationKind::DisallowedImport);
    assert_eq!(expect_strings(&log), vec!["before"]);
}

#[test]
fn security_violations_cannot_be_caught() {
    let (log, additional) = with_log();
    let err = sandbox()
        .run(
            "try { import os } catch err { push(log, 'caught') }",
            Some(additional),
        )
        .unwrap_err();
    assert_eq!(violation(&err), ViolationKind::DisallowedImport);
    assert!(expect_strings(&log).is_empty());
}

#[test]
fn runtime_exceptions_can_be_caught() {
    let namespace = run("try { x = 1 / 0 } catch err { kind = err.kind }");
    assert_eq!(
        binding(&namespace, "kind").as_str(),
        Some("ZeroDivisionError")
    );
}

#[test]
fn runtime_errors_propagate_unchanged() {
    let err = sandbox().evaluate("1 / 0", None).unwrap_err();
    assert_eq!(exception(&err), ExceptionKind::ZeroDivisionError);

    let err = run_error("raise 'boom'");
    let raised = err.exception().unwrap();
    assert_eq!(raised.kind, ExceptionKind::Raised);
    assert_eq!(raised.message, "boom");
}

#[test]
fn syntax_errors_are_reported_before_validation() {
    let err = run_error("_x = ");
    assert!(matches!(err, SandboxError::Syntax(_)), "found {err}");
}

#[test]
fn namespace_withholds_denied_capabilities() {
    let namespace = run("");
    assert!(namespace.contains("print"));
    assert!(namespace.contains("len"));
    for denied in ["eval", "exec", "open", "globals", "vars", "system", "exit"] {
        assert!(!namespace.contains(denied), "`{denied}` should be withheld");
    }
}

#[test]
fn denied_capabilities_are_rejected_statically() {
    for (source, name) in [
        ("eval('1 + 1')", "eval"),
        ("f = open", "open"),
        ("exec = 1", "exec"),
        ("g = |x| system(x)", "system"),
    ] {
        let err = sandbox().run(source, None).unwrap_err();
        let found = err.violation().expect("violation");
        assert_eq!(found.kind, ViolationKind::DisallowedBuiltin);
        assert_eq!(found.name, name);
    }
}

#[test]
fn additional_entries_override_and_are_trusted() {
    let mut additional = IndexMap::new();
    additional.insert("len".to_string(), Value::int(7));
    additional.insert("exec".to_string(), Value::string("host supplied"));
    let sandbox = sandbox();

    let value = sandbox.evaluate("len", Some(additional.clone())).unwrap();
    assert_eq!(expect_int(&value), 7);
    let value = sandbox.evaluate("exec", Some(additional)).unwrap();
    assert_eq!(value.as_str(), Some("host supplied"));
}

#[test]
fn empty_additional_matches_none() {
    let sandbox = sandbox();
    let with_none = sandbox.run("", None).unwrap();
    let with_empty = sandbox.run("", Some(IndexMap::new())).unwrap();
    assert_eq!(with_none.names(), with_empty.names());
}

#[test]
fn reflection_refuses_private_names_at_run_time() {
    let err = run_error(
        r#"class Point { fn __init(self) { self.x = 1 } }
p = Point()
name = "_" + "secret"
getattr(p, name)"#,
    );
    let found = err.violation().expect("violation");
    assert_eq!(found.kind, ViolationKind::PrivateNameAccess);
    assert_eq!(found.name, "_secret");
    assert_eq!(found.position.map(|p| p.line), Some(4));

    let err = run_error("m = {}\nsetattr(m, '_' + 'k', 1)");
    assert_eq!(violation(&err), ViolationKind::PrivateNameAccess);
}

#[test]
fn reflection_works_on_public_names() {
    let namespace = run(
        r#"
        class Point { fn __init(self) { self.x = 1 } }
        p = Point()
        setattr(p, "y", 2)
        total = getattr(p, "x") + p.y
        missing = getattr(p, "z", 0)
        has = hasattr(p, "y")
        "#,
    );
    assert_eq!(expect_int(&binding(&namespace, "total")), 3);
    assert_eq!(expect_int(&binding(&namespace, "missing")), 0);
    assert_eq!(binding(&namespace, "has").as_bool(), Some(true));
}

#[test]
fn dir_omits_private_names() {
    let value = eval(r#"dir({"b": 1, "_hidden": 2, "a": 3})"#);
    assert_eq!(expect_strings(&value), vec!["a", "b"]);
}

#[test]
fn permissive_policy_exposes_private_state() {
    let namespace = permissive()
        .run(
            "class Box {}\nb = Box()\nexec('b._hidden = 42')\nfields = vars(b)",
            None,
        )
        .expect("nothing is denied");
    let fields = binding(&namespace, "fields");
    let ValueKind::Map(map) = fields.kind() else {
        panic!("vars returns a map");
    };
    assert_eq!(map.borrow().get("_hidden").map(expect_int), Some(42));
}

#[test]
fn vars_is_denied_by_default() {
    let err = run_error("class Box {}\nfields = vars(Box())");
    assert_eq!(violation(&err), ViolationKind::DisallowedBuiltin);
}

#[test]
fn accumulating_namespace_keeps_bindings() {
    let sandbox = sandbox();
    let namespace = sandbox.namespace(None);
    sandbox.run_in(&namespace, "fn double(x) { return x * 2 }").unwrap();
    sandbox.run_in(&namespace, "base = 20").unwrap();
    let value = sandbox.evaluate_in(&namespace, "double(base) + 2").unwrap();
    assert_eq!(expect_int(&value), 42);

    let err = sandbox.evaluate_in(&namespace, "base._x").unwrap_err();
    assert_eq!(violation(&err), ViolationKind::PrivateNameAccess);
}

#[test]
fn policy_is_shared_across_threads() {
    let policy = Arc::new(Policy::standard());
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let policy = Arc::clone(&policy);
            thread::spawn(move || {
                let sandbox = Sandbox::new(policy);
                let value = sandbox
                    .evaluate(&format!("sum(range({n} * 10))"), None)
                    .expect("evaluation succeeds");
                value.as_int().expect("int result")
            })
        })
        .collect();
    let results: Vec<i64> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread completes"))
        .collect();
    assert_eq!(results, vec![0, 45, 190, 435]);
}

#[test]
fn inserted_host_bindings_are_trusted() {
    let sandbox = sandbox();
    let mut namespace = sandbox.namespace(None);
    assert!(namespace.entries().iter().any(|(name, _)| name == "print"));
    assert!(!namespace.contains("exit"));

    namespace.insert("exit", Value::int(7));
    let value = sandbox.evaluate_in(&namespace, "exit + 1").unwrap();
    assert_eq!(expect_int(&value), 8);
}

#[test]
fn empty_namespace_has_no_capabilities() {
    let namespace = Namespace::empty();
    assert!(namespace.is_empty());
    let err = sandbox().evaluate_in(&namespace, "len([1])").unwrap_err();
    assert_eq!(exception(&err), ExceptionKind::NameError);
}
