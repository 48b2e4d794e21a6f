use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::error::{EvalError, EvalErrorKind};
use super::evaluator::Evaluator;
use super::heap::{Env, Heap, ThunkId, ThunkState};
use super::value::{PrimOpApp, Value};
use crate::op::BinOp;
use crate::token::Span;
use crate::util::{FastHashMap, fast_hash_map_with_capacity};

pub(crate) type BuiltinFn = fn(&mut Evaluator<'_>, &[ThunkId], Span) -> Result<Value, EvalError>;

pub struct Builtin {
    pub name: &'static str,
    pub arity: usize,
    pub doc: &'static str,
    /// Also reachable without the `builtins.` prefix.
    pub global: bool,
    pub(crate) func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "throw",
        arity: 1,
        doc: "Throw an error with the given message. The error can be reported but does not abort evaluation of unrelated values.",
        global: true,
        func: prim_throw,
    },
    Builtin {
        name: "abort",
        arity: 1,
        doc: "Abort the whole evaluation with the given message.",
        global: true,
        func: prim_abort,
    },
    Builtin {
        name: "toString",
        arity: 1,
        doc: "Convert a string, number, boolean, null or list of those to a string.",
        global: true,
        func: prim_to_string,
    },
    Builtin {
        name: "map",
        arity: 2,
        doc: "Apply a function to every element of a list, lazily.",
        global: true,
        func: prim_map,
    },
    Builtin {
        name: "isNull",
        arity: 1,
        doc: "Return true if the argument is null.",
        global: true,
        func: prim_is_null,
    },
    Builtin {
        name: "length",
        arity: 1,
        doc: "Return the number of elements of a list.",
        global: false,
        func: prim_length,
    },
    Builtin {
        name: "head",
        arity: 1,
        doc: "Return the first element of a non-empty list.",
        global: false,
        func: prim_head,
    },
    Builtin {
        name: "tail",
        arity: 1,
        doc: "Return the list without its first element.",
        global: false,
        func: prim_tail,
    },
    Builtin {
        name: "attrNames",
        arity: 1,
        doc: "Return the names of the attributes of a set, sorted alphabetically.",
        global: false,
        func: prim_attr_names,
    },
    Builtin {
        name: "typeOf",
        arity: 1,
        doc: "Return the type of a value as a string: int, float, string, bool, null, list, set or lambda.",
        global: false,
        func: prim_type_of,
    },
    Builtin {
        name: "isInt",
        arity: 1,
        doc: "Return true if the argument is an integer.",
        global: false,
        func: prim_is_int,
    },
    Builtin {
        name: "isString",
        arity: 1,
        doc: "Return true if the argument is a string.",
        global: false,
        func: prim_is_string,
    },
    Builtin {
        name: "isAttrs",
        arity: 1,
        doc: "Return true if the argument is a set.",
        global: false,
        func: prim_is_attrs,
    },
    Builtin {
        name: "isList",
        arity: 1,
        doc: "Return true if the argument is a list.",
        global: false,
        func: prim_is_list,
    },
    Builtin {
        name: "isFunction",
        arity: 1,
        doc: "Return true if the argument is a function.",
        global: false,
        func: prim_is_function,
    },
    Builtin {
        name: "add",
        arity: 2,
        doc: "Return the sum of two numbers.",
        global: false,
        func: prim_add,
    },
    Builtin {
        name: "elem",
        arity: 2,
        doc: "Return true if the first argument is equal to an element of the list.",
        global: false,
        func: prim_elem,
    },
];

static BY_NAME: Lazy<FastHashMap<&'static str, &'static Builtin>> = Lazy::new(|| {
    let mut map = fast_hash_map_with_capacity(BUILTINS.len());
    for builtin in BUILTINS {
        map.insert(builtin.name, builtin);
    }
    map
});

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BY_NAME.get(name).copied()
}

/// Names visible in the root scope: the global builtins plus `builtins` itself.
pub fn global_names() -> impl Iterator<Item = &'static str> {
    BUILTINS
        .iter()
        .filter(|b| b.global)
        .map(|b| b.name)
        .chain(std::iter::once("builtins"))
}

/// Create the root scope of a fresh heap.
pub(crate) fn install(heap: &mut Heap) -> Env {
    let base = heap.new_frame(None);
    let mut set = BTreeMap::new();
    for builtin in BUILTINS {
        let name: Arc<str> = Arc::from(builtin.name);
        let thunk = heap.ready(Value::PrimOp(Rc::new(PrimOpApp {
            builtin,
            args: Vec::new(),
        })));
        if builtin.global {
            heap.bind(base, name.clone(), thunk);
        }
        set.insert(name, thunk);
    }
    let builtins = heap.ready(Value::Attrs(Rc::new(set)));
    heap.bind(base, Arc::from("builtins"), builtins);
    base
}

fn expected(name: &str, what: &str, got: &Value, span: Span) -> EvalError {
    EvalError::new(
        EvalErrorKind::Type,
        format!("'{}' expects {} but got {}", name, what, got.type_name()),
    )
    .at(span)
}

fn force_arg(ev: &mut Evaluator<'_>, thunk: ThunkId, span: Span) -> Result<Value, EvalError> {
    ev.force(thunk).map_err(|e| e.at(span))
}

fn string_arg(ev: &mut Evaluator<'_>, thunk: ThunkId, span: Span, name: &str) -> Result<Rc<str>, EvalError> {
    match force_arg(ev, thunk, span)? {
        Value::Str(s) => Ok(s),
        other => Err(expected(name, "a string", &other, span)),
    }
}

fn list_arg(ev: &mut Evaluator<'_>, thunk: ThunkId, span: Span, name: &str) -> Result<Rc<[ThunkId]>, EvalError> {
    match force_arg(ev, thunk, span)? {
        Value::List(items) => Ok(items),
        other => Err(expected(name, "a list", &other, span)),
    }
}

fn prim_throw(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let message = string_arg(ev, args[0], span, "throw")?;
    Err(EvalError::new(EvalErrorKind::Thrown, message.to_string()).at(span))
}

fn prim_abort(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let message = string_arg(ev, args[0], span, "abort")?;
    Err(EvalError::new(
        EvalErrorKind::Aborted,
        format!("evaluation aborted with the following error message: '{}'", message),
    )
    .at(span))
}

fn coerce_to_string(ev: &mut Evaluator<'_>, value: &Value, span: Span, out: &mut String) -> Result<(), EvalError> {
    match value {
        Value::Str(s) => out.push_str(s),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format!("{:.6}", f)),
        Value::Bool(true) => out.push('1'),
        Value::Bool(false) | Value::Null => {}
        Value::List(items) => {
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                let item = force_arg(ev, *item, span)?;
                coerce_to_string(ev, &item, span, out)?;
            }
        }
        other => {
            return Err(EvalError::new(
                EvalErrorKind::Type,
                format!("cannot coerce {} to a string", other.type_name()),
            )
            .at(span));
        }
    }
    Ok(())
}

fn prim_to_string(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let value = force_arg(ev, args[0], span)?;
    let mut out = String::new();
    coerce_to_string(ev, &value, span, &mut out)?;
    Ok(Value::Str(Rc::from(out)))
}

fn prim_map(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let func = args[0];
    let items = list_arg(ev, args[1], span, "map")?;
    let mapped: Rc<[ThunkId]> = items
        .iter()
        .map(|item| ev.alloc_thunk(ThunkState::Apply { func, arg: *item, span }))
        .collect();
    Ok(Value::List(mapped))
}

fn prim_is_null(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(force_arg(ev, args[0], span)?, Value::Null)))
}

fn prim_length(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let items = list_arg(ev, args[0], span, "builtins.length")?;
    Ok(Value::Int(items.len() as i64))
}

fn prim_head(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let items = list_arg(ev, args[0], span, "builtins.head")?;
    match items.first() {
        Some(first) => force_arg(ev, *first, span),
        None => Err(EvalError::new(EvalErrorKind::Type, "'builtins.head' called on an empty list").at(span)),
    }
}

fn prim_tail(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let items = list_arg(ev, args[0], span, "builtins.tail")?;
    if items.is_empty() {
        return Err(EvalError::new(EvalErrorKind::Type, "'builtins.tail' called on an empty list").at(span));
    }
    Ok(Value::List(Rc::from(&items[1..])))
}

fn prim_attr_names(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let attrs = match force_arg(ev, args[0], span)? {
        Value::Attrs(attrs) => attrs,
        other => return Err(expected("builtins.attrNames", "a set", &other, span)),
    };
    let names: Rc<[ThunkId]> = attrs
        .keys()
        .map(|name| ev.alloc_thunk(ThunkState::Ready(Value::Str(Rc::from(name.as_ref())))))
        .collect();
    Ok(Value::List(names))
}

fn prim_type_of(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let value = force_arg(ev, args[0], span)?;
    Ok(Value::Str(Rc::from(value.type_name())))
}

fn prim_is_int(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(force_arg(ev, args[0], span)?, Value::Int(_))))
}

fn prim_is_string(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(force_arg(ev, args[0], span)?, Value::Str(_))))
}

fn prim_is_attrs(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(force_arg(ev, args[0], span)?, Value::Attrs(_))))
}

fn prim_is_list(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(force_arg(ev, args[0], span)?, Value::List(_))))
}

fn prim_is_function(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    Ok(Value::Bool(force_arg(ev, args[0], span)?.is_function()))
}

fn prim_add(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let l = force_arg(ev, args[0], span)?;
    let r = force_arg(ev, args[1], span)?;
    if l.as_f64().is_none() {
        return Err(expected("builtins.add", "a number", &l, span));
    }
    if r.as_f64().is_none() {
        return Err(expected("builtins.add", "a number", &r, span));
    }
    BinOp::Add.eval_vals(&l, &r).map_err(|e| e.at(span))
}

fn prim_elem(ev: &mut Evaluator<'_>, args: &[ThunkId], span: Span) -> Result<Value, EvalError> {
    let needle = force_arg(ev, args[0], span)?;
    let items = list_arg(ev, args[1], span, "builtins.elem")?;
    for item in items.iter() {
        let item = force_arg(ev, *item, span)?;
        if ev.values_equal(&needle, &item, span)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}
