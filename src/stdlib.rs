use std::{
    env, fs,
    hash::{DefaultHasher, Hash, Hasher},
    io::Write,
    path::Path,
    process::Command,
    rc::Rc,
};

use chrono::{DateTime, Local, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::{
    diagnostics::{Exception, ExceptionKind, Result, SandboxError, Violation, ViolationKind},
    policy::is_private,
    runtime::{Interpreter, map_key},
    value::{VARIADIC, Value, ValueKind},
};

/// Every capability a script could see before the denylist is applied.
pub fn ambient_capabilities() -> Vec<(&'static str, Value)> {
    vec![
        ("print", native("print", VARIADIC, builtin_print)),
        ("len", native("len", 1, builtin_len)),
        ("str", native("str", 1, builtin_str)),
        ("repr", native("repr", 1, builtin_repr)),
        ("int", native("int", 1, builtin_int)),
        ("float", native("float", 1, builtin_float)),
        ("bool", native("bool", 1, builtin_bool)),
        ("type", native("type", 1, builtin_type)),
        ("range", native("range", VARIADIC, builtin_range)),
        ("abs", native("abs", 1, math_abs)),
        ("min", native("min", VARIADIC, builtin_min)),
        ("max", native("max", VARIADIC, builtin_max)),
        ("sum", native("sum", VARIADIC, builtin_sum)),
        ("sorted", native("sorted", 1, builtin_sorted)),
        ("reversed", native("reversed", 1, builtin_reversed)),
        ("keys", native("keys", 1, collections_keys)),
        ("values", native("values", 1, collections_values)),
        ("push", native("push", 2, collections_push)),
        ("pop", native("pop", VARIADIC, collections_pop)),
        ("contains", native("contains", 2, collections_contains)),
        ("enumerate", native("enumerate", 1, builtin_enumerate)),
        ("round", native("round", VARIADIC, builtin_round)),
        ("chr", native("chr", 1, builtin_chr)),
        ("ord", native("ord", 1, builtin_ord)),
        ("id", native("id", 1, builtin_id)),
        ("hash", native("hash", 1, builtin_hash)),
        ("callable", native("callable", 1, builtin_callable)),
        ("getattr", native("getattr", VARIADIC, reflect_getattr)),
        ("setattr", native("setattr", 3, reflect_setattr)),
        ("hasattr", native("hasattr", 2, reflect_hasattr)),
        ("dir", native("dir", VARIADIC, reflect_dir)),
        ("globals", native("globals", 0, unsafe_globals)),
        ("vars", native("vars", 1, unsafe_vars)),
        ("eval", native("eval", 1, unsafe_eval)),
        ("exec", native("exec", 1, unsafe_exec)),
        ("open", native("open", 1, unsafe_open)),
        ("read_file", native("read_file", 1, fs_read_text)),
        ("write_file", native("write_file", 2, fs_write_text)),
        ("system", native("system", 1, os_system)),
        ("getenv", native("getenv", VARIADIC, os_getenv)),
        ("exit", native("exit", VARIADIC, unsafe_exit)),
    ]
}

/// Host module loader. Each call builds a fresh module object, so nothing a
/// script does to one import is visible to another.
pub fn load_module(name: &str) -> Option<Value> {
    let exports = match name {
        "math" => math_module(),
        "string" => string_module(),
        "re" => regex_module(),
        "json" => json_module(),
        "datetime" => datetime_module(),
        "os" => os_module(),
        "fs" => fs_module(),
        _ => return None,
    };
    Some(Value::module(name, exports))
}

fn math_module() -> IndexMap<String, Value> {
    let mut math = IndexMap::new();
    math.insert("pi".into(), Value::float(std::f64::consts::PI));
    math.insert("e".into(), Value::float(std::f64::consts::E));
    math.insert("sqrt".into(), native("sqrt", 1, math_sqrt));
    math.insert("floor".into(), native("floor", 1, math_floor));
    math.insert("ceil".into(), native("ceil", 1, math_ceil));
    math.insert("pow".into(), native("pow", 2, math_pow));
    math.insert("log".into(), native("log", VARIADIC, math_log));
    math.insert("sin".into(), native("sin", 1, math_sin));
    math.insert("cos".into(), native("cos", 1, math_cos));
    math.insert("abs".into(), native("abs", 1, math_abs));
    math
}

fn string_module() -> IndexMap<String, Value> {
    let mut string = IndexMap::new();
    string.insert("upper".into(), native("upper", 1, string_upper));
    string.insert("lower".into(), native("lower", 1, string_lower));
    string.insert("trim".into(), native("trim", 1, string_trim));
    string.insert("split".into(), native("split", 2, string_split));
    string.insert("replace".into(), native("replace", 3, string_replace));
    string.insert(
        "starts_with".into(),
        native("starts_with", 2, string_starts_with),
    );
    string.insert("ends_with".into(), native("ends_with", 2, string_ends_with));
    string.insert("join".into(), native("join", 2, string_join));
    string
}

fn regex_module() -> IndexMap<String, Value> {
    let mut re = IndexMap::new();
    re.insert("is_match".into(), native("is_match", 2, regex_is_match));
    re.insert("find".into(), native("find", 2, regex_find));
    re.insert("find_all".into(), native("find_all", 2, regex_find_all));
    re.insert("replace".into(), native("replace", 3, regex_replace));
    re.insert("split".into(), native("split", 2, regex_split));
    re
}

fn json_module() -> IndexMap<String, Value> {
    let mut json = IndexMap::new();
    json.insert("dumps".into(), native("dumps", 1, json_dumps));
    json.insert("loads".into(), native("loads", 1, json_loads));
    json
}

fn datetime_module() -> IndexMap<String, Value> {
    let mut datetime = IndexMap::new();
    datetime.insert("now".into(), native("now", 0, datetime_now));
    datetime.insert("today".into(), native("today", 0, datetime_today));
    datetime.insert("timestamp".into(), native("timestamp", 0, datetime_timestamp));
    datetime.insert("format".into(), native("format", 2, datetime_format));
    datetime
}

fn os_module() -> IndexMap<String, Value> {
    let mut os = IndexMap::new();
    os.insert("getenv".into(), native("getenv", VARIADIC, os_getenv));
    os.insert("system".into(), native("system", 1, os_system));
    os.insert("cwd".into(), native("cwd", 0, os_cwd));
    os
}

fn fs_module() -> IndexMap<String, Value> {
    let mut fs_mod = IndexMap::new();
    fs_mod.insert("read_text".into(), native("read_text", 1, fs_read_text));
    fs_mod.insert("write_text".into(), native("write_text", 2, fs_write_text));
    fs_mod.insert("exists".into(), native("exists", 1, fs_exists));
    fs_mod.insert("remove".into(), native("remove", 1, fs_remove));
    fs_mod
}

fn native(
    name: &'static str,
    arity: usize,
    callback: fn(&mut Interpreter, &[Value]) -> Result<Value>,
) -> Value {
    Value::native(name, arity, callback)
}

fn raise(kind: ExceptionKind, message: impl Into<String>) -> SandboxError {
    SandboxError::from(Exception::new(kind, message))
}

fn ensure_range(args: &[Value], min: usize, max: usize, name: &str) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(raise(
            ExceptionKind::TypeError,
            format!(
                "`{name}` expected {expected} arguments but received {}",
                args.len()
            ),
        ));
    }
    Ok(())
}

fn expect_string(value: &Value, name: &str) -> Result<String> {
    match value.kind() {
        ValueKind::String(s) => Ok(s.clone()),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("`{name}` expected String but found {}", value.type_name()),
        )),
    }
}

fn expect_int(value: &Value, name: &str) -> Result<i64> {
    match value.kind() {
        ValueKind::Int(n) => Ok(*n),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("`{name}` expected Int but found {}", value.type_name()),
        )),
    }
}

fn expect_number(value: &Value, name: &str) -> Result<f64> {
    match value.kind() {
        ValueKind::Int(n) => Ok(*n as f64),
        ValueKind::Float(f) => Ok(*f),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("`{name}` expected numeric but found {}", value.type_name()),
        )),
    }
}

/// Runtime half of the privacy rule, for names that arrive as strings.
fn ensure_public(name: &str) -> Result<()> {
    if is_private(name) {
        return Err(SandboxError::from(Violation::new(
            ViolationKind::PrivateNameAccess,
            name,
        )));
    }
    Ok(())
}

fn builtin_print(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let mut line = String::new();
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        line.push_str(&interp.stringify(arg)?);
    }
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    Ok(Value::none())
}

fn builtin_len(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    interp.length(&args[0]).map(Value::int)
}

fn builtin_str(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    interp.stringify(&args[0]).map(Value::string)
}

fn builtin_repr(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::string(args[0].repr()))
}

fn builtin_int(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Int(n) => Ok(Value::int(*n)),
        ValueKind::Bool(b) => Ok(Value::int(i64::from(*b))),
        ValueKind::Float(f) => {
            let truncated = f.trunc();
            if !truncated.is_finite() || truncated.abs() >= i64::MAX as f64 {
                return Err(raise(
                    ExceptionKind::ValueError,
                    format!("cannot convert {} to Int", args[0]),
                ));
            }
            Ok(Value::int(truncated as i64))
        }
        ValueKind::String(s) => s.trim().replace('_', "").parse::<i64>().map(Value::int).map_err(|_| {
            raise(
                ExceptionKind::ValueError,
                format!("invalid literal for int(): {s:?}"),
            )
        }),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("int() argument must be a string or a number, not {}", args[0].type_name()),
        )),
    }
}

fn builtin_float(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Int(n) => Ok(Value::float(*n as f64)),
        ValueKind::Float(f) => Ok(Value::float(*f)),
        ValueKind::Bool(b) => Ok(Value::float(if *b { 1.0 } else { 0.0 })),
        ValueKind::String(s) => s.trim().parse::<f64>().map(Value::float).map_err(|_| {
            raise(
                ExceptionKind::ValueError,
                format!("could not convert string to float: {s:?}"),
            )
        }),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("float() argument must be a string or a number, not {}", args[0].type_name()),
        )),
    }
}

fn builtin_bool(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::bool(args[0].is_truthy()))
}

fn builtin_type(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Instance(instance) => Ok(Value::string(instance.class_name())),
        _ => Ok(Value::string(args[0].type_name())),
    }
}

fn builtin_range(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 3, "range")?;
    let (start, end) = match args.len() {
        1 => (0, expect_int(&args[0], "range")?),
        _ => (expect_int(&args[0], "range")?, expect_int(&args[1], "range")?),
    };
    let step = match args.get(2) {
        Some(step) => expect_int(step, "range")?,
        None => 1,
    };
    if step == 0 {
        return Err(raise(ExceptionKind::ValueError, "range step must be non-zero"));
    }

    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        values.push(Value::int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::array(values))
}

// min/max accept either one iterable or several arguments.
fn candidates(interp: &mut Interpreter, args: &[Value], name: &str) -> Result<Vec<Value>> {
    ensure_range(args, 1, VARIADIC, name)?;
    let items = if args.len() == 1 {
        interp.iterate(&args[0])?
    } else {
        args.to_vec()
    };
    if items.is_empty() {
        return Err(raise(
            ExceptionKind::ValueError,
            format!("{name}() arg is an empty sequence"),
        ));
    }
    Ok(items)
}

fn builtin_min(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let items = candidates(interp, args, "min")?;
    let mut best = items[0].clone();
    for item in &items[1..] {
        if interp.less_than(item, &best)? {
            best = item.clone();
        }
    }
    Ok(best)
}

fn builtin_max(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let items = candidates(interp, args, "max")?;
    let mut best = items[0].clone();
    for item in &items[1..] {
        if interp.less_than(&best, item)? {
            best = item.clone();
        }
    }
    Ok(best)
}

fn builtin_sum(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "sum")?;
    let mut total = args.get(1).cloned().unwrap_or_else(|| Value::int(0));
    for item in interp.iterate(&args[0])? {
        total = match (total.kind(), item.kind()) {
            (ValueKind::Int(a), ValueKind::Int(b)) => Value::int(a.checked_add(*b).ok_or_else(
                || raise(ExceptionKind::ValueError, "integer overflow"),
            )?),
            _ => Value::float(expect_number(&total, "sum")? + expect_number(&item, "sum")?),
        };
    }
    Ok(total)
}

fn builtin_sorted(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let items = interp.iterate(&args[0])?;
    // Insertion sort: comparisons may call back into script code and fail.
    let mut sorted: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        let mut idx = sorted.len();
        while idx > 0 && interp.less_than(&item, &sorted[idx - 1])? {
            idx -= 1;
        }
        sorted.insert(idx, item);
    }
    Ok(Value::array(sorted))
}

fn builtin_reversed(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let mut items = interp.iterate(&args[0])?;
    items.reverse();
    Ok(Value::array(items))
}

fn builtin_enumerate(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let pairs = interp
        .iterate(&args[0])?
        .into_iter()
        .enumerate()
        .map(|(idx, item)| Value::array(vec![Value::int(idx as i64), item]))
        .collect();
    Ok(Value::array(pairs))
}

fn builtin_round(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "round")?;
    if let ValueKind::Int(n) = args[0].kind() {
        return Ok(Value::int(*n));
    }
    let number = expect_number(&args[0], "round")?;
    match args.get(1) {
        None => {
            let rounded = number.round_ties_even();
            if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
                return Err(raise(
                    ExceptionKind::ValueError,
                    format!("cannot round {number} to Int"),
                ));
            }
            Ok(Value::int(rounded as i64))
        }
        Some(digits) => {
            let digits = expect_int(digits, "round")?.clamp(-308, 308) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::float((number * scale).round_ties_even() / scale))
        }
    }
}

fn builtin_chr(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let code = expect_int(&args[0], "chr")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::string(c.to_string()))
        .ok_or_else(|| raise(ExceptionKind::ValueError, format!("chr() arg {code} not in range")))
}

fn builtin_ord(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "ord")?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::int(i64::from(u32::from(c)))),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!(
                "ord() expected a character, but string of length {} found",
                text.chars().count()
            ),
        )),
    }
}

fn builtin_id(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::int(Rc::as_ptr(&args[0].0) as usize as i64))
}

fn builtin_hash(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let mut hasher = DefaultHasher::new();
    match args[0].kind() {
        ValueKind::None => 0u8.hash(&mut hasher),
        ValueKind::Bool(b) => i64::from(*b).hash(&mut hasher),
        ValueKind::Int(n) => n.hash(&mut hasher),
        ValueKind::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            (*f as i64).hash(&mut hasher)
        }
        ValueKind::Float(f) => f.to_bits().hash(&mut hasher),
        ValueKind::String(s) => s.hash(&mut hasher),
        _ => {
            return Err(raise(
                ExceptionKind::TypeError,
                format!("unhashable type: {}", args[0].type_name()),
            ));
        }
    }
    Ok(Value::int(hasher.finish() as i64))
}

fn builtin_callable(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::bool(args[0].is_callable()))
}

fn reflect_getattr(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 2, 3, "getattr")?;
    let name = expect_string(&args[1], "getattr")?;
    ensure_public(&name)?;
    match (interp.get_attribute(&args[0], &name), args.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(SandboxError::Runtime(_)), Some(default)) => Ok(default.clone()),
        (Err(err), _) => Err(err),
    }
}

fn reflect_setattr(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let name = expect_string(&args[1], "setattr")?;
    ensure_public(&name)?;
    interp.set_attribute(&args[0], &name, args[2].clone())?;
    Ok(Value::none())
}

fn reflect_hasattr(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let name = expect_string(&args[1], "hasattr")?;
    ensure_public(&name)?;
    Ok(Value::bool(interp.has_attribute(&args[0], &name)))
}

fn reflect_dir(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "dir")?;
    let mut names: Vec<String> = match args.first().map(Value::kind) {
        None => interp.globals().borrow().bindings().keys().cloned().collect(),
        Some(ValueKind::Instance(instance)) => {
            let mut names: Vec<String> = instance.fields.borrow().keys().cloned().collect();
            if let ValueKind::Class(class) = instance.class.kind() {
                names.extend(class.methods.keys().cloned());
            }
            names
        }
        Some(ValueKind::Class(class)) => class.methods.keys().cloned().collect(),
        Some(ValueKind::Module(module)) => module.exports.keys().cloned().collect(),
        Some(ValueKind::Map(map)) => map.borrow().keys().cloned().collect(),
        Some(_) => Vec::new(),
    };
    names.retain(|name| !is_private(name));
    names.sort();
    names.dedup();
    Ok(Value::array(names.into_iter().map(Value::string).collect()))
}

fn collections_keys(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Map(map) => {
            let values = map.borrow().keys().cloned().map(Value::string).collect();
            Ok(Value::array(values))
        }
        _ => Err(raise(ExceptionKind::TypeError, "keys expects map")),
    }
}

fn collections_values(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Map(map) => Ok(Value::array(map.borrow().values().cloned().collect())),
        ValueKind::Array(arr) => Ok(Value::array(arr.borrow().clone())),
        _ => Err(raise(ExceptionKind::TypeError, "values expects map or array")),
    }
}

fn collections_push(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Array(values) => {
            values.borrow_mut().push(args[1].clone());
            Ok(Value::none())
        }
        _ => Err(raise(
            ExceptionKind::TypeError,
            "push expects array as first argument",
        )),
    }
}

fn collections_pop(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "pop")?;
    match (args[0].kind(), args.get(1)) {
        (ValueKind::Array(values), None) => values
            .borrow_mut()
            .pop()
            .ok_or_else(|| raise(ExceptionKind::IndexError, "pop from empty array")),
        (ValueKind::Map(map), Some(key)) => {
            let key = map_key(key)?;
            map.borrow_mut()
                .shift_remove(&key)
                .ok_or_else(|| raise(ExceptionKind::KeyError, format!("missing key `{key}`")))
        }
        _ => Err(raise(
            ExceptionKind::TypeError,
            "pop expects an array, or a map and a key",
        )),
    }
}

fn collections_contains(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Array(values) => {
            let values = values.borrow().clone();
            for value in &values {
                if interp.values_equal(value, &args[1])? {
                    return Ok(Value::bool(true));
                }
            }
            Ok(Value::bool(false))
        }
        ValueKind::Map(map) => {
            let key = map_key(&args[1])?;
            Ok(Value::bool(map.borrow().contains_key(&key)))
        }
        ValueKind::String(text) => {
            let needle = expect_string(&args[1], "contains")?;
            Ok(Value::bool(text.contains(&needle)))
        }
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("{} does not support `contains`", args[0].type_name()),
        )),
    }
}

fn unsafe_globals(interp: &mut Interpreter, _: &[Value]) -> Result<Value> {
    Ok(Value::map(interp.globals().borrow().bindings().clone()))
}

fn unsafe_vars(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Instance(instance) => Ok(Value::map(instance.fields.borrow().clone())),
        ValueKind::Module(module) => Ok(Value::map(module.exports.clone())),
        ValueKind::Map(map) => Ok(Value::map(map.borrow().clone())),
        _ => Err(raise(
            ExceptionKind::TypeError,
            format!("vars() argument must have fields, not {}", args[0].type_name()),
        )),
    }
}

fn unsafe_eval(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let source = expect_string(&args[0], "eval")?;
    interp.execute_unchecked(&source, true)
}

fn unsafe_exec(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let source = expect_string(&args[0], "exec")?;
    interp.execute_unchecked(&source, false)
}

fn unsafe_open(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "open")?;
    let contents = fs::read_to_string(&path).map_err(|err| io_error("open", &path, err))?;
    let mut file = IndexMap::new();
    file.insert("path".to_string(), Value::string(path));
    file.insert("text".to_string(), Value::string(contents));
    Ok(Value::map(file))
}

fn unsafe_exit(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 0, 1, "exit")?;
    let code = match args.first() {
        Some(code) => expect_int(code, "exit")?,
        None => 0,
    };
    warn!(code, "script requested process exit");
    std::process::exit(code as i32)
}

fn math_abs(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Int(n) => n
            .checked_abs()
            .map(Value::int)
            .ok_or_else(|| raise(ExceptionKind::ValueError, "integer overflow")),
        _ => Ok(Value::float(expect_number(&args[0], "abs")?.abs())),
    }
}

fn float_to_int(number: f64, name: &str) -> Result<Value> {
    if !number.is_finite() || number.abs() >= i64::MAX as f64 {
        return Err(raise(
            ExceptionKind::ValueError,
            format!("`{name}` result {number} does not fit in Int"),
        ));
    }
    Ok(Value::int(number as i64))
}

fn math_floor(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "math.floor")?;
    float_to_int(number.floor(), "math.floor")
}

fn math_ceil(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "math.ceil")?;
    float_to_int(number.ceil(), "math.ceil")
}

fn math_sqrt(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "math.sqrt")?;
    if number < 0.0 {
        return Err(raise(
            ExceptionKind::ValueError,
            "sqrt expects non-negative input",
        ));
    }
    Ok(Value::float(number.sqrt()))
}

fn math_pow(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let base = expect_number(&args[0], "math.pow")?;
    let exponent = expect_number(&args[1], "math.pow")?;
    Ok(Value::float(base.powf(exponent)))
}

fn math_log(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "math.log")?;
    let number = expect_number(&args[0], "math.log")?;
    if number <= 0.0 {
        return Err(raise(ExceptionKind::ValueError, "math domain error"));
    }
    match args.get(1) {
        Some(base) => Ok(Value::float(number.log(expect_number(base, "math.log")?))),
        None => Ok(Value::float(number.ln())),
    }
}

fn math_sin(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::float(expect_number(&args[0], "math.sin")?.sin()))
}

fn math_cos(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::float(expect_number(&args[0], "math.cos")?.cos()))
}

fn string_upper(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.upper")?;
    Ok(Value::string(text.to_uppercase()))
}

fn string_lower(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.lower")?;
    Ok(Value::string(text.to_lowercase()))
}

fn string_trim(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.trim")?;
    Ok(Value::string(text.trim()))
}

fn string_split(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.split")?;
    let separator = expect_string(&args[1], "string.split")?;
    if separator.is_empty() {
        return Err(raise(
            ExceptionKind::ValueError,
            "separator must not be empty",
        ));
    }
    let parts = text.split(&separator).map(Value::string).collect();
    Ok(Value::array(parts))
}

fn string_replace(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.replace")?;
    let from = expect_string(&args[1], "string.replace")?;
    let to = expect_string(&args[2], "string.replace")?;
    Ok(Value::string(text.replace(&from, &to)))
}

fn string_starts_with(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.starts_with")?;
    let prefix = expect_string(&args[1], "string.starts_with")?;
    Ok(Value::bool(text.starts_with(&prefix)))
}

fn string_ends_with(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "string.ends_with")?;
    let suffix = expect_string(&args[1], "string.ends_with")?;
    Ok(Value::bool(text.ends_with(&suffix)))
}

fn string_join(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let items = interp.iterate(&args[0])?;
    let separator = expect_string(&args[1], "string.join")?;
    let mut output = String::new();
    for (idx, item) in items.iter().enumerate() {
        let piece = expect_string(item, "string.join")?;
        if idx > 0 {
            output.push_str(&separator);
        }
        output.push_str(&piece);
    }
    Ok(Value::string(output))
}

fn compile_pattern(value: &Value, name: &str) -> Result<Regex> {
    let pattern = expect_string(value, name)?;
    Regex::new(&pattern).map_err(|err| {
        raise(
            ExceptionKind::ValueError,
            format!("`{name}` got an invalid pattern: {err}"),
        )
    })
}

fn regex_is_match(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let pattern = compile_pattern(&args[0], "re.is_match")?;
    let text = expect_string(&args[1], "re.is_match")?;
    Ok(Value::bool(pattern.is_match(&text)))
}

fn regex_find(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let pattern = compile_pattern(&args[0], "re.find")?;
    let text = expect_string(&args[1], "re.find")?;
    Ok(pattern
        .find(&text)
        .map(|found| Value::string(found.as_str()))
        .unwrap_or_else(Value::none))
}

fn regex_find_all(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let pattern = compile_pattern(&args[0], "re.find_all")?;
    let text = expect_string(&args[1], "re.find_all")?;
    let found = pattern
        .find_iter(&text)
        .map(|found| Value::string(found.as_str()))
        .collect();
    Ok(Value::array(found))
}

fn regex_replace(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let pattern = compile_pattern(&args[0], "re.replace")?;
    let text = expect_string(&args[1], "re.replace")?;
    let replacement = expect_string(&args[2], "re.replace")?;
    Ok(Value::string(
        pattern.replace_all(&text, replacement.as_str()),
    ))
}

fn regex_split(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let pattern = compile_pattern(&args[0], "re.split")?;
    let text = expect_string(&args[1], "re.split")?;
    Ok(Value::array(pattern.split(&text).map(Value::string).collect()))
}

fn to_json(value: &Value) -> Result<Json> {
    Ok(match value.kind() {
        ValueKind::None => Json::Null,
        ValueKind::Bool(b) => Json::Bool(*b),
        ValueKind::Int(n) => Json::from(*n),
        ValueKind::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| raise(ExceptionKind::ValueError, format!("{f} is not valid JSON")))?,
        ValueKind::String(s) => Json::String(s.clone()),
        ValueKind::Array(values) => Json::Array(
            values
                .borrow()
                .iter()
                .map(to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        ValueKind::Map(map) => {
            let mut object = serde_json::Map::new();
            for (key, value) in map.borrow().iter() {
                object.insert(key.clone(), to_json(value)?);
            }
            Json::Object(object)
        }
        _ => {
            return Err(raise(
                ExceptionKind::TypeError,
                format!("{} is not JSON serializable", value.type_name()),
            ));
        }
    })
}

fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::none(),
        Json::Bool(b) => Value::bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(n) => Value::int(n),
            None => Value::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::string(s),
        Json::Array(items) => Value::array(items.into_iter().map(from_json).collect()),
        Json::Object(object) => Value::map(
            object
                .into_iter()
                .map(|(key, value)| (key, from_json(value)))
                .collect(),
        ),
    }
}

fn json_dumps(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::string(to_json(&args[0])?.to_string()))
}

fn json_loads(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let text = expect_string(&args[0], "json.loads")?;
    serde_json::from_str::<Json>(&text)
        .map(from_json)
        .map_err(|err| raise(ExceptionKind::ValueError, format!("invalid JSON: {err}")))
}

fn datetime_now(_: &mut Interpreter, _: &[Value]) -> Result<Value> {
    Ok(Value::string(Local::now().to_rfc3339()))
}

fn datetime_today(_: &mut Interpreter, _: &[Value]) -> Result<Value> {
    Ok(Value::string(Local::now().format("%Y-%m-%d").to_string()))
}

fn datetime_timestamp(_: &mut Interpreter, _: &[Value]) -> Result<Value> {
    let now = Utc::now();
    Ok(Value::float(
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6,
    ))
}

fn datetime_format(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let seconds = expect_number(&args[0], "datetime.format")?;
    let pattern = expect_string(&args[1], "datetime.format")?;
    let moment = DateTime::<Utc>::from_timestamp(
        seconds.floor() as i64,
        ((seconds.fract() * 1e9) as u32).min(999_999_999),
    )
    .ok_or_else(|| {
        raise(
            ExceptionKind::ValueError,
            format!("timestamp {seconds} is out of range"),
        )
    })?;
    let mut output = String::new();
    std::fmt::Write::write_fmt(&mut output, format_args!("{}", moment.format(&pattern)))
        .map_err(|_| {
            raise(
                ExceptionKind::ValueError,
                format!("invalid format string {pattern:?}"),
            )
        })?;
    Ok(Value::string(output))
}

fn os_getenv(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    ensure_range(args, 1, 2, "getenv")?;
    let name = expect_string(&args[0], "getenv")?;
    match env::var(&name) {
        Ok(value) => Ok(Value::string(value)),
        Err(_) => Ok(args.get(1).cloned().unwrap_or_else(Value::none)),
    }
}

fn os_system(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let command = expect_string(&args[0], "system")?;
    debug!(command = %command, "spawning shell command");
    let status = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .map_err(|err| io_error("system", &command, err))?;
    Ok(Value::int(i64::from(status.code().unwrap_or(-1))))
}

fn os_cwd(_: &mut Interpreter, _: &[Value]) -> Result<Value> {
    let cwd = env::current_dir().map_err(|err| io_error("os.cwd", ".", err))?;
    Ok(Value::string(cwd.display().to_string()))
}

fn fs_read_text(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "fs.read_text")?;
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(Value::string(contents)),
        Err(err) => Err(io_error("fs.read_text", &path, err)),
    }
}

fn fs_write_text(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "fs.write_text")?;
    let contents = expect_string(&args[1], "fs.write_text")?;
    match fs::write(&path, contents) {
        Ok(_) => Ok(Value::none()),
        Err(err) => Err(io_error("fs.write_text", &path, err)),
    }
}

fn fs_exists(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "fs.exists")?;
    Ok(Value::bool(Path::new(&path).exists()))
}

fn fs_remove(_: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let path = expect_string(&args[0], "fs.remove")?;
    match fs::remove_file(&path) {
        Ok(_) => Ok(Value::none()),
        Err(err) => Err(io_error("fs.remove", &path, err)),
    }
}

fn io_error(name: &str, path: &str, err: std::io::Error) -> SandboxError {
    let mut message = format!("`{name}` failed for `{path}`: {err}");
    if let Some(code) = err.raw_os_error() {
        message.push_str(&format!(" (os error code: {code})"));
    }
    raise(ExceptionKind::OsError, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambient_names_are_public_and_unique() {
        let capabilities = ambient_capabilities();
        let mut names: Vec<_> = capabilities.iter().map(|(name, _)| *name).collect();
        assert!(names.iter().all(|name| !is_private(name)));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), capabilities.len());
    }

    #[test]
    fn modules_are_built_fresh() {
        let first = load_module("math").unwrap();
        let second = load_module("math").unwrap();
        assert!(!first.same_object(&second));
        assert!(load_module("nope").is_none());
    }

    #[test]
    fn json_conversion_keeps_order_and_types() {
        let json: Json = serde_json::from_str(r#"{"b": 1, "a": [true, 2.5, null]}"#).unwrap();
        let value = from_json(json);
        assert_eq!(value.to_string(), r#"{"b": 1, "a": [true, 2.5, none]}"#);
        assert_eq!(to_json(&value).unwrap().to_string(), r#"{"b":1,"a":[true,2.5,null]}"#);
    }
}
