use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use log::debug;

use crate::environment::Environment;
use crate::error::{runtime_error, Result};
use crate::parser::{BinaryOp, Node, Number, Program, UnaryOp};
use crate::stdlib;

pub type NativeFn = Rc<dyn Fn(&[Value]) -> std::result::Result<Value, String>>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Node>,
}

#[derive(Clone)]
pub enum Value {
    Number(Number),
    String(String),
    Boolean(bool),
    Null,
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Function(Rc<Function>),
    Native(NativeFunction),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(Number::Int(n)) => *n != 0,
            Value::Number(Number::Float(x)) => *x != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Boolean(b) => *b,
            Value::Null => false,
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Function(_) | Value::Native(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(Number::Int(_)) => "integer",
            Value::Number(Number::Float(_)) => "float",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Native(_) => "built-in",
        }
    }

    /// Items produced by a loop over this value, or None if it is not
    /// iterable. Strings yield one-character strings, maps yield their keys
    /// in insertion order.
    fn iter_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::String(s) => Some(s.chars().map(|c| Value::String(c.to_string())).collect()),
            Value::Map(entries) => Some(entries.iter().map(|(k, _)| k.clone()).collect()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(Number::Int(a)), Value::Number(Number::Int(b))) => a == b,
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::List(a), Value::List(b)) => a == b,
            // Map equality ignores insertion order.
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(true) => write!(f, "truth"),
            Value::Boolean(false) => write!(f, "lie"),
            Value::Null => write!(f, "alibi"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {:?}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<plot {}>", func.name),
            Value::Native(native) => write!(f, "<built-in {}>", native.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

/// The result of evaluating a node: either an ordinary value, or a control
/// signal in flight toward the construct that consumes it.
pub enum Flow {
    Value(Value),
    Return(Option<Value>),
    Break,
}

/// Unwraps `Flow::Value`; any control signal short-circuits out of the
/// enclosing function.
macro_rules! value_of {
    ($flow:expr) => {
        match $flow {
            Flow::Value(value) => value,
            signal => return Ok(signal),
        }
    };
}

pub struct Interpreter {
    env: Environment,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_output(Rc::new(RefCell::new(io::stdout())))
    }

    pub fn with_output(output: Rc<RefCell<dyn Write>>) -> Self {
        Interpreter {
            env: Environment::new(stdlib::create_globals(output)),
        }
    }

    /// Runs a program to completion. A top-level return carries an exit
    /// status; a top-level break is a runtime error.
    pub fn execute(&mut self, program: &Program) -> Result<Option<i32>> {
        for statement in &program.statements {
            match self.eval(statement)? {
                Flow::Value(_) => {}
                Flow::Return(value) => return Ok(Some(exit_status(value))),
                Flow::Break => return runtime_error("'escape' outside loop"),
            }
        }
        Ok(None)
    }

    fn eval(&mut self, node: &Node) -> Result<Flow> {
        match node {
            Node::Number(n) => Ok(Flow::Value(Value::Number(*n))),
            Node::Str(s) => Ok(Flow::Value(Value::String(s.clone()))),
            Node::Boolean(b) => Ok(Flow::Value(Value::Boolean(*b))),
            Node::Null => Ok(Flow::Value(Value::Null)),
            Node::Identifier(name) => match self.env.get(name) {
                Some(value) => Ok(Flow::Value(value.clone())),
                None => runtime_error(format!("Undefined variable: {}", name)),
            },
            Node::List(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(value_of!(self.eval(element)?));
                }
                Ok(Flow::Value(Value::List(items)))
            }
            Node::Map(entries) => {
                let mut map: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
                for (key_node, value_node) in entries {
                    let key = value_of!(self.eval(key_node)?);
                    let value = value_of!(self.eval(value_node)?);
                    // A duplicate key keeps its slot; the value is replaced.
                    match map.iter_mut().find(|(k, _)| *k == key) {
                        Some(entry) => entry.1 = value,
                        None => map.push((key, value)),
                    }
                }
                Ok(Flow::Value(Value::Map(map)))
            }
            Node::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Node::Unary { op, operand } => {
                let value = value_of!(self.eval(operand)?);
                Ok(Flow::Value(eval_unary(*op, value)?))
            }
            Node::Assignment { name, value } => {
                let value = value_of!(self.eval(value)?);
                self.env.set(name.clone(), value.clone());
                Ok(Flow::Value(value))
            }
            Node::Call { name, args } => self.eval_call(name, args),
            Node::FunctionDef { name, params, body } => {
                let function = Value::Function(Rc::new(Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                }));
                self.env.set(name.clone(), function);
                Ok(Flow::Value(Value::Null))
            }
            Node::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = value_of!(self.eval(condition)?);
                if condition.is_truthy() {
                    self.exec_block(then_body)
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body)
                } else {
                    Ok(Flow::Value(Value::Null))
                }
            }
            Node::Loop { collection, body } => self.eval_loop(collection, body),
            Node::Return(value) => {
                let value = match value {
                    Some(node) => Some(value_of!(self.eval(node)?)),
                    None => None,
                };
                Ok(Flow::Return(value))
            }
            Node::Break => Ok(Flow::Break),
        }
    }

    fn exec_block(&mut self, body: &[Node]) -> Result<Flow> {
        for statement in body {
            match self.eval(statement)? {
                Flow::Value(_) => {}
                signal => return Ok(signal),
            }
        }
        Ok(Flow::Value(Value::Null))
    }

    fn eval_loop(&mut self, collection: &Node, body: &[Node]) -> Result<Flow> {
        let collection = value_of!(self.eval(collection)?);
        let items = match collection.iter_items() {
            Some(items) => items,
            None => {
                return runtime_error(format!(
                    "Cannot loop over non-iterable: {}",
                    collection.type_name()
                ))
            }
        };

        self.env.push_frame();
        let result = self.run_loop(items, body);
        self.env.pop_frame();
        result
    }

    fn run_loop(&mut self, items: Vec<Value>, body: &[Node]) -> Result<Flow> {
        for item in items {
            self.env.set("item".to_string(), item);
            match self.exec_block(body)? {
                Flow::Value(_) => {}
                Flow::Break => break,
                signal @ Flow::Return(_) => return Ok(signal),
            }
        }
        Ok(Flow::Value(Value::Null))
    }

    fn eval_call(&mut self, name: &str, args: &[Node]) -> Result<Flow> {
        // Arguments evaluate in the caller's frame, before the callee's frame
        // is pushed.
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(value_of!(self.eval(arg)?));
        }

        let callee = match self.env.get(name) {
            Some(value) => value.clone(),
            None => return runtime_error(format!("Undefined variable: {}", name)),
        };

        match callee {
            Value::Function(function) => {
                if values.len() != function.params.len() {
                    return runtime_error(format!(
                        "Function {} expects {} arguments, got {}",
                        function.name,
                        function.params.len(),
                        values.len()
                    ));
                }
                debug!("calling {} at frame depth {}", function.name, self.env.depth());
                self.env.push_frame();
                for (param, value) in function.params.iter().zip(values) {
                    self.env.set(param.clone(), value);
                }
                let result = self.exec_block(&function.body);
                self.env.pop_frame();
                match result? {
                    Flow::Return(value) => Ok(Flow::Value(value.unwrap_or(Value::Null))),
                    Flow::Value(_) => Ok(Flow::Value(Value::Null)),
                    // A break with no loop in the callee keeps travelling
                    // toward the caller's nearest loop.
                    Flow::Break => Ok(Flow::Break),
                }
            }
            Value::Native(native) => match (native.func)(&values) {
                Ok(value) => Ok(Flow::Value(value)),
                Err(detail) => runtime_error(format!("Error calling {}: {}", native.name, detail)),
            },
            other => runtime_error(format!("{} is not callable", other.type_name())),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> Result<Flow> {
        // Logical operators must not evaluate the right side eagerly.
        if op == BinaryOp::And {
            let left = value_of!(self.eval(left)?);
            if !left.is_truthy() {
                return Ok(Flow::Value(Value::Boolean(false)));
            }
            let right = value_of!(self.eval(right)?);
            return Ok(Flow::Value(Value::Boolean(right.is_truthy())));
        }
        if op == BinaryOp::Or {
            let left = value_of!(self.eval(left)?);
            if left.is_truthy() {
                return Ok(Flow::Value(Value::Boolean(true)));
            }
            let right = value_of!(self.eval(right)?);
            return Ok(Flow::Value(Value::Boolean(right.is_truthy())));
        }

        let left = value_of!(self.eval(left)?);
        let right = value_of!(self.eval(right)?);
        Ok(Flow::Value(apply_binary(op, left, right)?))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn exit_status(value: Option<Value>) -> i32 {
    match value {
        Some(Value::Number(n)) => n.as_f64().trunc() as i32,
        _ => 0,
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(add(a, b))),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => runtime_error(format!(
                "Cannot add {} and {}",
                a.type_name(),
                b.type_name()
            )),
        },
        BinaryOp::Subtract => {
            let (a, b) = number_pair(left, right, "subtract")?;
            Ok(Value::Number(match (a, b) {
                (Number::Int(x), Number::Int(y)) => Number::Int(x.wrapping_sub(y)),
                _ => Number::Float(a.as_f64() - b.as_f64()),
            }))
        }
        BinaryOp::Multiply => {
            let (a, b) = number_pair(left, right, "multiply")?;
            Ok(Value::Number(match (a, b) {
                (Number::Int(x), Number::Int(y)) => Number::Int(x.wrapping_mul(y)),
                _ => Number::Float(a.as_f64() * b.as_f64()),
            }))
        }
        BinaryOp::Divide => {
            let (a, b) = number_pair(left, right, "divide")?;
            if b.as_f64() == 0.0 {
                return runtime_error("Division by zero");
            }
            // True division, always a float.
            Ok(Value::Number(Number::Float(a.as_f64() / b.as_f64())))
        }
        BinaryOp::Modulo => {
            let (a, b) = number_pair(left, right, "take modulo of")?;
            if b.as_f64() == 0.0 {
                return runtime_error("Modulo by zero");
            }
            Ok(Value::Number(match (a, b) {
                // Result takes the divisor's sign.
                (Number::Int(x), Number::Int(y)) => {
                    Number::Int(x.wrapping_rem(y).wrapping_add(y).wrapping_rem(y))
                }
                _ => {
                    let (x, y) = (a.as_f64(), b.as_f64());
                    Number::Float((x % y + y) % y)
                }
            }))
        }
        BinaryOp::Equal => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOp::Less => Ok(Value::Boolean(compare(left, right)? == Ordering::Less)),
        BinaryOp::Greater => Ok(Value::Boolean(compare(left, right)? == Ordering::Greater)),
        BinaryOp::LessEqual => Ok(Value::Boolean(compare(left, right)? != Ordering::Greater)),
        BinaryOp::GreaterEqual => Ok(Value::Boolean(compare(left, right)? != Ordering::Less)),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit"),
    }
}

fn add(a: Number, b: Number) -> Number {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Number::Int(x.wrapping_add(y)),
        _ => Number::Float(a.as_f64() + b.as_f64()),
    }
}

fn number_pair(left: Value, right: Value, verb: &str) -> Result<(Number, Number)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((a, b)),
        (a, b) => runtime_error(format!(
            "Cannot {} {} and {}",
            verb,
            a.type_name(),
            b.type_name()
        )),
    }
}

fn compare(left: Value, right: Value) -> Result<Ordering> {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => {
            Ok(a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => runtime_error(format!(
            "Cannot order {} and {}",
            left.type_name(),
            right.type_name()
        )),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
        UnaryOp::Negate => match value {
            Value::Number(Number::Int(n)) => Ok(Value::Number(Number::Int(n.wrapping_neg()))),
            Value::Number(Number::Float(x)) => Ok(Value::Number(Number::Float(-x))),
            other => runtime_error(format!("Cannot negate {}", other.type_name())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;

    fn run_source(source: &str) -> Result<(String, Option<i32>)> {
        let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let mut interpreter = Interpreter::with_output(sink.clone());
        let program = parse(&tokenize(source)?)?;
        let status = interpreter.execute(&program)?;
        let output = String::from_utf8(sink.borrow().clone()).expect("output should be utf-8");
        Ok((output, status))
    }

    fn output_of(source: &str) -> String {
        run_source(source).expect("program should run").0
    }

    fn runtime_message(source: &str) -> String {
        match run_source(source) {
            Err(crate::error::Error::Runtime { message }) => message,
            other => panic!("expected runtime error, got {:?}", other.map(|r| r.0)),
        }
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(output_of("files 2 + 3 * 4\n"), "14\n");
        assert_eq!(output_of("files 7 % 3\n"), "1\n");
        assert_eq!(output_of("files -7 % 3\n"), "2\n");
        assert_eq!(output_of("files 7 % -3\n"), "-2\n");
    }

    #[test]
    fn test_division_is_always_float() {
        assert_eq!(output_of("files 7 / 2\n"), "3.5\n");
        assert_eq!(output_of("files 6 / 2\n"), "3.0\n");
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(runtime_message("files 1 / 0\n"), "Division by zero");
        assert_eq!(runtime_message("files 1 % 0\n"), "Modulo by zero");
    }

    #[test]
    fn test_logical_operators_return_booleans() {
        assert_eq!(output_of("files 1 and \"x\"\n"), "truth\n");
        assert_eq!(output_of("files 0 or []\n"), "lie\n");
        assert_eq!(output_of("files not truth and lie\n"), "lie\n");
    }

    #[test]
    fn test_short_circuit_skips_right_side() {
        // The undefined variable on the right is never evaluated.
        assert_eq!(output_of("files lie and nope\n"), "lie\n");
        assert_eq!(output_of("files truth or nope\n"), "truth\n");
    }

    #[test]
    fn test_string_and_list_concatenation() {
        assert_eq!(output_of("files \"ab\" + \"cd\"\n"), "abcd\n");
        assert_eq!(output_of("files [1] + [2, 3]\n"), "[1, 2, 3]\n");
        assert_eq!(
            runtime_message("files 1 + \"x\"\n"),
            "Cannot add integer and string"
        );
    }

    #[test]
    fn test_mixed_numeric_equality() {
        assert_eq!(output_of("files 1 == 1.0\n"), "truth\n");
        assert_eq!(output_of("files 1 < 1.5\n"), "truth\n");
        assert_eq!(
            runtime_message("files 1 < \"x\"\n"),
            "Cannot order integer and string"
        );
    }

    #[test]
    fn test_dynamic_scope_reads_callers_frame() {
        let source = "\
plot show():
    files x
plot caller():
    x = 99
    show()
caller()
";
        assert_eq!(output_of(source), "99\n");
    }

    #[test]
    fn test_callee_writes_do_not_leak() {
        let source = "\
x = 1
plot clobber():
    x = 2
clobber()
files x
";
        assert_eq!(output_of(source), "1\n");
    }

    #[test]
    fn test_loop_binds_item_and_escape_stops() {
        let source = "\
loop [1, 2, 3]:
    if item == 2:
        escape
    files item
";
        assert_eq!(output_of(source), "1\n");
    }

    #[test]
    fn test_break_crosses_function_boundary() {
        let source = "\
plot bail():
    escape
loop [1, 2, 3]:
    files item
    bail()
files \"done\"
";
        assert_eq!(output_of(source), "1\ndone\n");
    }

    #[test]
    fn test_escape_outside_loop_is_an_error() {
        assert_eq!(runtime_message("escape\n"), "'escape' outside loop");
        assert_eq!(
            runtime_message("plot f():\n    escape\nf()\n"),
            "'escape' outside loop"
        );
    }

    #[test]
    fn test_return_value_and_arity() {
        let source = "\
plot double(n):
    suicide n * 2
files double(21)
";
        assert_eq!(output_of(source), "42\n");
        assert_eq!(
            runtime_message("plot f():\n    suicide\nf(1)\n"),
            "Function f expects 0 arguments, got 1"
        );
    }

    #[test]
    fn test_top_level_return_sets_exit_status() {
        let source = "files \"before\"\nsuicide 7\nfiles \"after\"\n";
        let (output, status) = run_source(source).expect("program should run");
        assert_eq!(output, "before\n");
        assert_eq!(status, Some(7));
        assert_eq!(run_source("suicide 3.9\n").expect("run").1, Some(3));
        assert_eq!(run_source("suicide \"x\"\n").expect("run").1, Some(0));
        assert_eq!(run_source("files 1\n").expect("run").1, None);
    }

    #[test]
    fn test_map_duplicate_key_keeps_first_slot() {
        assert_eq!(
            output_of("files {\"a\": 1, \"b\": 2, \"a\": 3}\n"),
            "{\"a\": 3, \"b\": 2}\n"
        );
    }

    #[test]
    fn test_map_equality_ignores_order() {
        assert_eq!(
            output_of("files {1: 2, 3: 4} == {3: 4, 1: 2}\n"),
            "truth\n"
        );
    }

    #[test]
    fn test_iteration_over_strings_and_maps() {
        assert_eq!(output_of("loop \"ab\":\n    files item\n"), "a\nb\n");
        assert_eq!(
            output_of("loop {\"k\": 1, \"j\": 2}:\n    files item\n"),
            "k\nj\n"
        );
        assert_eq!(
            runtime_message("loop 5:\n    files item\n"),
            "Cannot loop over non-iterable: integer"
        );
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(runtime_message("files ghost\n"), "Undefined variable: ghost");
    }

    #[test]
    fn test_calling_a_non_function() {
        assert_eq!(runtime_message("x = 5\nx()\n"), "integer is not callable");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Boolean(true)), "truth");
        assert_eq!(format!("{}", Value::Null), "alibi");
        assert_eq!(format!("{}", Value::Number(Number::Float(3.0))), "3.0");
        assert_eq!(format!("{}", Value::Number(Number::Int(3))), "3");
        assert_eq!(
            format!(
                "{}",
                Value::List(vec![Value::String("a".to_string()), Value::Number(Number::Int(1))])
            ),
            "[\"a\", 1]"
        );
    }

    #[test]
    fn test_negation() {
        assert_eq!(output_of("files -3 + 1\n"), "-2\n");
        assert_eq!(output_of("files --3\n"), "3\n");
        assert_eq!(
            runtime_message("files -\"x\"\n"),
            "Cannot negate string"
        );
    }

    #[test]
    fn test_assignment_to_literal_keyword_shadows() {
        assert_eq!(output_of("truth = 5\nfiles truth + 1\n"), "6\n");
    }

    #[test]
    fn test_loop_body_writes_do_not_leak() {
        let source = "\
x = 1
loop [1]:
    x = 2
files x
";
        assert_eq!(output_of(source), "1\n");
    }
}
