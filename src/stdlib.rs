use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::parser::Number;
use crate::runtime::{NativeFunction, Value};

macro_rules! define_builtin {
    ($globals:expr, $name:literal, $func:expr) => {
        $globals.insert(
            $name.to_string(),
            Value::Native(NativeFunction {
                name: $name,
                func: Rc::new($func),
            }),
        )
    };
}

/// Builds the read-only global table: literal constants plus the native
/// functions. `files` writes through the supplied sink so callers can capture
/// program output.
pub fn create_globals(output: Rc<RefCell<dyn Write>>) -> FxHashMap<String, Value> {
    let mut globals = FxHashMap::default();

    globals.insert("truth".to_string(), Value::Boolean(true));
    globals.insert("lie".to_string(), Value::Boolean(false));
    globals.insert("alibi".to_string(), Value::Null);
    globals.insert("universe".to_string(), Value::Null);

    define_builtin!(globals, "files", move |args: &[Value]| {
        let mut sink = output.borrow_mut();
        let line = args
            .iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(sink, "{}", line).map_err(|e| format!("IO error: {}", e))?;
        Ok(Value::Null)
    });

    define_builtin!(globals, "risk", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        Ok(Value::Number(Number::Float(to_float(value)?)))
    });

    define_builtin!(globals, "theory", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        match value {
            Value::Number(Number::Int(n)) => Ok(Value::Number(Number::Int(*n))),
            Value::Number(Number::Float(x)) => Ok(Value::Number(Number::Int(x.trunc() as i64))),
            Value::Boolean(b) => Ok(Value::Number(Number::Int(*b as i64))),
            // Fractional strings fall back to a float result.
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(n) => Ok(Value::Number(Number::Int(n))),
                Err(_) => match s.trim().parse::<f64>() {
                    Ok(x) => Ok(Value::Number(Number::Float(x))),
                    Err(_) => Err(format!("cannot convert {:?} to a number", s)),
                },
            },
            other => Err(format!("cannot convert {} to a number", other.type_name())),
        }
    });

    define_builtin!(globals, "money", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        Ok(Value::Boolean(value.is_truthy()))
    });

    define_builtin!(globals, "len", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        let length = match value {
            Value::String(s) => s.chars().count(),
            Value::List(items) => items.len(),
            Value::Map(entries) => entries.len(),
            other => {
                return Err(format!("object of type {} has no length", other.type_name()))
            }
        };
        Ok(Value::Number(Number::Int(length as i64)))
    });

    define_builtin!(globals, "range", |args: &[Value]| {
        let (start, stop, step) = match args {
            [stop] => (0, expect_int(stop)?, 1),
            [start, stop] => (expect_int(start)?, expect_int(stop)?, 1),
            [start, stop, step] => (expect_int(start)?, expect_int(stop)?, expect_int(step)?),
            _ => return Err(format!("expected 1 to 3 arguments, got {}", args.len())),
        };
        if step == 0 {
            return Err("step must not be zero".to_string());
        }
        let mut items = Vec::new();
        let mut current = start;
        while (step > 0 && current < stop) || (step < 0 && current > stop) {
            items.push(Value::Number(Number::Int(current)));
            current += step;
        }
        Ok(Value::List(items))
    });

    define_builtin!(globals, "str", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        Ok(Value::String(value.to_string()))
    });

    define_builtin!(globals, "int", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        match value {
            Value::Number(Number::Int(n)) => Ok(Value::Number(Number::Int(*n))),
            Value::Number(Number::Float(x)) => Ok(Value::Number(Number::Int(x.trunc() as i64))),
            Value::Boolean(b) => Ok(Value::Number(Number::Int(*b as i64))),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(n) => Ok(Value::Number(Number::Int(n))),
                Err(_) => Err(format!("cannot convert {:?} to an integer", s)),
            },
            other => Err(format!("cannot convert {} to an integer", other.type_name())),
        }
    });

    define_builtin!(globals, "float", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        Ok(Value::Number(Number::Float(to_float(value)?)))
    });

    define_builtin!(globals, "bool", |args: &[Value]| {
        let [value] = args else {
            return Err(format!("expected 1 argument, got {}", args.len()));
        };
        Ok(Value::Boolean(value.is_truthy()))
    });

    globals
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => Ok(n.as_f64()),
        Value::Boolean(b) => Ok(*b as i64 as f64),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("cannot convert {:?} to a float", s)),
        other => Err(format!("cannot convert {} to a float", other.type_name())),
    }
}

fn expect_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(Number::Int(n)) => Ok(*n),
        other => Err(format!("expected an integer, got {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals() -> FxHashMap<String, Value> {
        create_globals(Rc::new(RefCell::new(Vec::new())))
    }

    fn call(globals: &FxHashMap<String, Value>, name: &str, args: &[Value]) -> Result<Value, String> {
        match globals.get(name) {
            Some(Value::Native(native)) => (native.func)(args),
            other => panic!("{} should be a built-in, got {:?}", name, other),
        }
    }

    #[test]
    fn test_constants_are_present() {
        let globals = globals();
        assert_eq!(globals.get("truth"), Some(&Value::Boolean(true)));
        assert_eq!(globals.get("lie"), Some(&Value::Boolean(false)));
        assert_eq!(globals.get("alibi"), Some(&Value::Null));
        assert_eq!(globals.get("universe"), Some(&Value::Null));
    }

    #[test]
    fn test_files_writes_to_the_sink() {
        let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let globals = create_globals(sink.clone());
        call(
            &globals,
            "files",
            &[Value::String("a".to_string()), Value::Number(Number::Int(1))],
        )
        .expect("files should succeed");
        let written = String::from_utf8(sink.borrow().clone()).expect("output should be utf-8");
        assert_eq!(written, "a 1\n");
    }

    #[test]
    fn test_len() {
        let globals = globals();
        assert_eq!(
            call(&globals, "len", &[Value::String("héllo".to_string())]),
            Ok(Value::Number(Number::Int(5)))
        );
        assert_eq!(
            call(&globals, "len", &[Value::List(vec![Value::Null])]),
            Ok(Value::Number(Number::Int(1)))
        );
        assert!(call(&globals, "len", &[Value::Null]).is_err());
    }

    #[test]
    fn test_theory_conversions() {
        let globals = globals();
        assert_eq!(
            call(&globals, "theory", &[Value::Number(Number::Float(3.9))]),
            Ok(Value::Number(Number::Int(3)))
        );
        assert_eq!(
            call(&globals, "theory", &[Value::String("2.5".to_string())]),
            Ok(Value::Number(Number::Float(2.5)))
        );
        assert_eq!(
            call(&globals, "theory", &[Value::Boolean(true)]),
            Ok(Value::Number(Number::Int(1)))
        );
    }

    #[test]
    fn test_int_is_strict_about_fractional_strings() {
        let globals = globals();
        assert!(call(&globals, "int", &[Value::String("2.5".to_string())]).is_err());
        assert_eq!(
            call(&globals, "int", &[Value::String(" 42 ".to_string())]),
            Ok(Value::Number(Number::Int(42)))
        );
    }

    #[test]
    fn test_range_forms() {
        let globals = globals();
        assert_eq!(
            call(&globals, "range", &[Value::Number(Number::Int(3))]),
            Ok(Value::List(vec![
                Value::Number(Number::Int(0)),
                Value::Number(Number::Int(1)),
                Value::Number(Number::Int(2)),
            ]))
        );
        assert_eq!(
            call(
                &globals,
                "range",
                &[
                    Value::Number(Number::Int(5)),
                    Value::Number(Number::Int(1)),
                    Value::Number(Number::Int(-2)),
                ]
            ),
            Ok(Value::List(vec![
                Value::Number(Number::Int(5)),
                Value::Number(Number::Int(3)),
            ]))
        );
        assert!(call(
            &globals,
            "range",
            &[
                Value::Number(Number::Int(0)),
                Value::Number(Number::Int(5)),
                Value::Number(Number::Int(0)),
            ]
        )
        .is_err());
    }

    #[test]
    fn test_risk_and_money() {
        let globals = globals();
        assert_eq!(
            call(&globals, "risk", &[Value::Number(Number::Int(2))]),
            Ok(Value::Number(Number::Float(2.0)))
        );
        assert_eq!(
            call(&globals, "money", &[Value::String(String::new())]),
            Ok(Value::Boolean(false))
        );
    }
}
