#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        ast::parse,
        eval::{AutoArgs, EvalErrorKind, Interpreter, Value, ValueSnapshot},
        op::{BinOp, UnaryOp},
    };

    fn eval(src: &str) -> ValueSnapshot {
        let tree = parse(src).unwrap();
        let evaluation = Interpreter::default()
            .evaluate(&tree.arena, tree.root, &AutoArgs::new())
            .unwrap();
        evaluation.value.unwrap()
    }

    fn eval_err(src: &str) -> EvalErrorKind {
        let tree = parse(src).unwrap();
        let evaluation = Interpreter::default()
            .evaluate(&tree.arena, tree.root, &AutoArgs::new())
            .unwrap();
        evaluation.value.unwrap_err().kind
    }

    #[test]
    fn literal_list_operations() {
        let result = eval("[ 1 2 3 ] ++ [ 4 5 ]");
        let expected = ValueSnapshot::List((1..=5).map(ValueSnapshot::Int).collect());
        assert_eq!(result, expected);
    }

    #[test]
    fn literal_set_update() {
        let result = eval("{ a = 1; b = 2; } // { c = 3; a = 4; }");

        // right side wins: a = 4, b = 2, c = 3
        let attrs = result.as_attrs().expect("set");
        assert_eq!(attrs.get("a"), Some(&ValueSnapshot::Int(4)));
        assert_eq!(attrs.get("b"), Some(&ValueSnapshot::Int(2)));
        assert_eq!(attrs.get("c"), Some(&ValueSnapshot::Int(3)));
    }

    #[test]
    fn nested_literal_comparisons() {
        assert_eq!(eval("[ [ 1 2 ] [ 3 4 ] ] == [ [ 1 2 ] [ 3 4 ] ]"), ValueSnapshot::Bool(true));
        assert_eq!(eval("[ [ 1 2 ] [ 3 4 ] ] == [ [ 1 2 ] [ 3 5 ] ]"), ValueSnapshot::Bool(false));
        assert_eq!(
            eval(r#"{ user = { name = "Alice"; }; } == { user = { name = "Alice"; }; }"#),
            ValueSnapshot::Bool(true)
        );
        assert_eq!(
            eval(r#"{ user = { name = "Alice"; }; } == { user = { name = "Bob"; }; }"#),
            ValueSnapshot::Bool(false)
        );
    }

    #[test]
    fn mixed_type_comparisons() {
        assert_eq!(eval("[ 1 2 3 ] == 123"), ValueSnapshot::Bool(false));
        assert_eq!(eval("{ a = 1; } == 1"), ValueSnapshot::Bool(false));
        assert_eq!(eval("[ ] == { }"), ValueSnapshot::Bool(false));
        assert_eq!(eval("1 == 1.0"), ValueSnapshot::Bool(true));
        assert_eq!(eval("(x: x) == (x: x)"), ValueSnapshot::Bool(false));
    }

    #[test]
    fn arithmetic_and_ordering() {
        assert_eq!(eval("7 / 2"), ValueSnapshot::Int(3));
        assert_eq!(eval("7 / 2.0"), ValueSnapshot::Float(3.5));
        assert_eq!(eval(r#""ab" + "cd""#), ValueSnapshot::String("abcd".to_string()));
        assert_eq!(eval(r#""abc" < "abd""#), ValueSnapshot::Bool(true));
        assert_eq!(eval("2 >= 2.0"), ValueSnapshot::Bool(true));
        assert_eq!(eval("-(3 - 5)"), ValueSnapshot::Int(2));
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(eval("false && (throw \"never\")"), ValueSnapshot::Bool(false));
        assert_eq!(eval("true || (throw \"never\")"), ValueSnapshot::Bool(true));
        assert_eq!(eval("false -> (throw \"never\")"), ValueSnapshot::Bool(true));
        assert_eq!(eval("!(1 > 2)"), ValueSnapshot::Bool(true));
    }

    #[test]
    fn operator_errors() {
        assert_eq!(eval_err("1 / 0"), EvalErrorKind::DivisionByZero);
        assert_eq!(eval_err("1.0 / 0"), EvalErrorKind::DivisionByZero);
        assert_eq!(eval_err(r#"1 + "a""#), EvalErrorKind::Type);
        assert_eq!(eval_err("[ 1 ] ++ { }"), EvalErrorKind::Type);
        assert_eq!(eval_err("1 && true"), EvalErrorKind::Type);
        assert_eq!(eval_err("9223372036854775807 + 1"), EvalErrorKind::Type);
    }

    #[test]
    fn direct_value_ops() {
        let err = BinOp::Sub.eval_vals(&Value::Int(1), &Value::Null).unwrap_err();
        assert_eq!(err.message, "cannot apply '-' to int and null");
        assert!(err.span.is_none());

        assert!(matches!(
            BinOp::Lt.eval_vals(&Value::Float(f64::NAN), &Value::Int(1)),
            Ok(Value::Bool(false))
        ));
        assert!(matches!(UnaryOp::Neg.eval_val(&Value::Float(1.5)), Ok(Value::Float(f)) if f == -1.5));
        assert!(UnaryOp::Not.eval_val(&Value::Int(1)).is_err());

        let empty = Value::Attrs(std::rc::Rc::new(BTreeMap::new()));
        assert!(matches!(BinOp::Update.eval_vals(&empty, &empty), Ok(Value::Attrs(_))));
    }
}
