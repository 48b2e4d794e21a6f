#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        ast::parse,
        eval::{
            AutoArgs, EnvBinding, EnvSnapshot, ErrorCategory, EvalConfig, EvalError, EvalErrorKind, Evaluation, Interpreter,
            ValueSnapshot, builtins,
        },
    };

    fn run_with(src: &str, config: EvalConfig) -> Result<Evaluation, EvalError> {
        let tree = parse(src).unwrap_or_else(|e| panic!("parse {src:?}: {e}"));
        Interpreter::new(config).evaluate(&tree.arena, tree.root, &AutoArgs::new())
    }

    fn run(src: &str) -> Evaluation {
        run_with(src, EvalConfig::default()).unwrap()
    }

    fn value(src: &str) -> ValueSnapshot {
        match run(src).value {
            Ok(v) => v,
            Err(e) => panic!("evaluating {src:?} failed: {e}"),
        }
    }

    fn int(i: i64) -> ValueSnapshot {
        ValueSnapshot::Int(i)
    }

    fn string(s: &str) -> ValueSnapshot {
        ValueSnapshot::String(s.to_string())
    }

    fn attrs(entries: &[(&str, ValueSnapshot)]) -> ValueSnapshot {
        ValueSnapshot::Attrs(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn attribute_sets_are_self_referential() {
        assert_eq!(
            value("{ a = 1 + 1; b = a * 2; }"),
            attrs(&[("a", int(2)), ("b", int(4))])
        );
        assert_eq!(value("rec { x = 1; y = x; }"), attrs(&[("x", int(1)), ("y", int(1))]));
    }

    #[test]
    fn let_and_closures() {
        assert_eq!(value("let x = 5; f = y: y + x; in f 10"), int(15));
        assert_eq!(value("let add = a: b: a + b; inc = add 1; in inc 41"), int(42));
    }

    #[test]
    fn formals_defaults_and_alias() {
        assert_eq!(value("({ a, b ? 2, ... }: a + b) { a = 1; c = 3; }"), int(3));
        assert_eq!(value("({ a, b ? a * 10 }: b) { a = 4; }"), int(40));
        assert_eq!(value("(args @ { a, ... }: args.z) { a = 1; z = 9; }"), int(9));

        let evaluation = run("({ a }: a) { a = 1; b = 2; }");
        let err = evaluation.value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Type);
        assert!(err.message.contains("unexpected argument 'b'"));

        let err = run("({ a }: a) { }").value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::MissingAttribute);
    }

    #[test]
    fn select_default_and_has_attr() {
        let src = "let s = { a = { b = 3; }; }; in [ (s.a.b) (s.x or 7) (s ? a.b) (s ? x) ]";
        assert_eq!(
            value(src),
            ValueSnapshot::List(vec![
                int(3),
                int(7),
                ValueSnapshot::Bool(true),
                ValueSnapshot::Bool(false)
            ])
        );

        let err = run("{ a = 1; }.b").value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::MissingAttribute);
        assert_eq!(err.message, "attribute 'b' missing");
    }

    #[test]
    fn with_scopes_lose_to_lexical_bindings() {
        assert_eq!(value("with { x = 1; }; let y = 2; in x + y"), int(3));
        assert_eq!(value("let x = 1; in with { x = 2; }; x"), int(1));
        assert_eq!(value("with { x = 1; }; with { x = 2; }; x"), int(2));
    }

    #[test]
    fn inherit_forms() {
        assert_eq!(
            value("let a = 1; in { inherit a; b = a + 1; }"),
            attrs(&[("a", int(1)), ("b", int(2))])
        );
        assert_eq!(
            value("let s = { x = 1; y = 2; }; in { inherit (s) x y; }"),
            attrs(&[("x", int(1)), ("y", int(2))])
        );
    }

    #[test]
    fn unforced_errors_are_invisible() {
        let evaluation = run(r#"let bad = throw "boom"; in 1"#);
        assert_eq!(evaluation.value, Ok(int(1)));
        assert!(evaluation.errors.is_empty());
    }

    #[test]
    fn soft_errors_are_collected_while_forcing_deeply() {
        let evaluation = run(r#"{ ok = 1; bad = throw "boom"; also = 1 + "x"; }"#);
        let root = evaluation.value.expect("root itself evaluates");
        let root = root.as_attrs().unwrap();
        assert_eq!(root.get("ok"), Some(&int(1)));
        assert_eq!(root.get("bad"), Some(&ValueSnapshot::Error));
        assert_eq!(root.get("also"), Some(&ValueSnapshot::Error));

        let kinds: Vec<EvalErrorKind> = evaluation.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EvalErrorKind::Type, EvalErrorKind::Thrown]);
        let thrown = &evaluation.errors[1];
        assert_eq!(thrown.message, "boom");
        assert!(thrown.span.is_some());
    }

    #[test]
    fn repeated_failures_are_reported_once() {
        let evaluation = run(r#"{ a = throw "x"; b = a; }"#);
        assert_eq!(evaluation.errors.len(), 1);
    }

    #[test]
    fn root_errors() {
        let evaluation = run("assert 1 == 2; 3");
        let err = evaluation.value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::AssertionFailed);
        assert_eq!(evaluation.errors, vec![err]);

        let err = run("x + 1").value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedVariable);
        let span = err.span.unwrap();
        assert_eq!((span.start.offset, span.end.offset), (0, 1));

        let err = run("if 1 then 2 else 3").value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Type);
    }

    #[test]
    fn infinite_recursion_is_soft() {
        let err = run("let x = x; in x").value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::InfiniteRecursion);

        let evaluation = run("{ a = a; b = 2; }");
        assert_eq!(evaluation.errors.len(), 1);
        assert_eq!(evaluation.errors[0].kind, EvalErrorKind::InfiniteRecursion);
    }

    #[test]
    fn stack_overflow_is_fatal() {
        let err = run_with("let f = n: f (n + 1); in f 0", EvalConfig { max_depth: 64 })
            .err()
            .expect("fatal");
        assert_eq!(err.kind, EvalErrorKind::StackOverflow);
        assert!(err.is_fatal());
    }

    #[test]
    fn abort_is_fatal_even_when_nested() {
        let err = run_with(r#"{ a = 1; b = abort "stop"; }"#, EvalConfig::default())
            .err()
            .expect("fatal");
        assert_eq!(err.kind, EvalErrorKind::Aborted);
        assert!(err.message.contains("stop"));
    }

    #[test]
    fn builtins_work() {
        let src = r#"[
            (builtins.length [ 1 2 3 ])
            (builtins.head [ 4 5 ])
            (builtins.typeOf { })
            (toString 42)
            (builtins.attrNames { b = 1; a = 2; })
            (map (x: x * 2) [ 1 2 ])
            (builtins.elem 2 [ 1 2 ])
            (isNull null)
            (builtins.add 1 2.5)
            (toString [ 1 "a" true ])
            (builtins.tail [ 1 2 ])
            (builtins.isFunction map)
        ]"#;
        assert_eq!(
            value(src),
            ValueSnapshot::List(vec![
                int(3),
                int(4),
                string("set"),
                string("42"),
                ValueSnapshot::List(vec![string("a"), string("b")]),
                ValueSnapshot::List(vec![int(2), int(4)]),
                ValueSnapshot::Bool(true),
                ValueSnapshot::Bool(true),
                ValueSnapshot::Float(3.5),
                string("1 a 1"),
                ValueSnapshot::List(vec![int(2)]),
                ValueSnapshot::Bool(true),
            ])
        );
    }

    #[test]
    fn builtin_lookup_and_docs() {
        let map = builtins::lookup("map").expect("map builtin");
        assert_eq!(map.arity, 2);
        assert!(!map.doc.is_empty());
        assert!(builtins::global_names().any(|n| n == "builtins"));
        assert!(!builtins::global_names().any(|n| n == "length"));

        match value("builtins.length") {
            ValueSnapshot::PrimOp { name, doc } => {
                assert_eq!(name, "length");
                assert!(doc.contains("number of elements"));
            }
            other => panic!("expected primop, got {other:?}"),
        }
    }

    #[test]
    fn auto_args_call_root_functions_with_formals() {
        let mut tree = parse(r#"{ name, greeting ? "hello" }: greeting + " " + name"#).unwrap();
        let args: Vec<String> = ["--argstr", "name", "world"].iter().map(|s| s.to_string()).collect();
        let auto_args = AutoArgs::from_args(&mut tree.arena, &args).unwrap();
        let evaluation = Interpreter::default()
            .evaluate(&tree.arena, tree.root, &auto_args)
            .unwrap();
        assert_eq!(evaluation.value, Ok(string("hello world")));

        let mut tree = parse("{ n }: n * 2").unwrap();
        let args: Vec<String> = ["--arg", "n", "1 + 2", "--arg", "unused", "0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let auto_args = AutoArgs::from_args(&mut tree.arena, &args).unwrap();
        assert_eq!(auto_args.len(), 2);
        let evaluation = Interpreter::default()
            .evaluate(&tree.arena, tree.root, &auto_args)
            .unwrap();
        assert_eq!(evaluation.value, Ok(int(6)));
    }

    #[test]
    fn auto_args_errors() {
        let mut tree = parse("1").unwrap();
        let bad_flag: Vec<String> = vec!["--nope".into(), "a".into(), "b".into()];
        assert!(AutoArgs::from_args(&mut tree.arena, &bad_flag).is_err());
        let missing: Vec<String> = vec!["--arg".into(), "a".into()];
        assert!(AutoArgs::from_args(&mut tree.arena, &missing).is_err());
        let bad_expr: Vec<String> = vec!["--arg".into(), "a".into(), "1 +".into()];
        let err = AutoArgs::from_args(&mut tree.arena, &bad_expr).unwrap_err();
        assert!(err.to_string().contains("argument 'a'"));
    }

    #[test]
    fn plain_lambdas_are_not_auto_called() {
        match value("x: x") {
            ValueSnapshot::Lambda { signature } => assert_eq!(signature, "x"),
            other => panic!("expected lambda, got {other:?}"),
        }

        // formals are auto-called, so a required formal without an argument fails
        let err = run("{ a, b ? 1, ... } @ all: a").value.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::MissingAttribute);
        assert_eq!(value("{ b ? 1 }: b + 1"), int(2));
    }

    #[test]
    fn interpreter_is_reusable() {
        let tree = parse("{ a = 1; }").unwrap();
        let mut interpreter = Interpreter::default();
        for _ in 0..3 {
            let evaluation = interpreter.evaluate(&tree.arena, tree.root, &AutoArgs::new()).unwrap();
            assert_eq!(evaluation.value, Ok(attrs(&[("a", int(1))])));
        }
        assert_eq!(interpreter.runs(), 3);
    }

    #[test]
    fn error_taxonomy() {
        assert_eq!(EvalErrorKind::Thrown.category(), ErrorCategory::Assertion);
        assert_eq!(EvalErrorKind::MissingAttribute.category(), ErrorCategory::Type);
        assert_eq!(EvalErrorKind::StackOverflow.category(), ErrorCategory::Fatal);
        assert_eq!(ErrorCategory::Syntax.code(), "lazen_syntax_error");
        assert!(!EvalErrorKind::InfiniteRecursion.is_fatal());
        assert!(EvalErrorKind::Aborted.is_fatal());
    }

    #[test]
    fn snapshots_serialize_with_type_tags() {
        let value = run("{ n = 1; xs = [ true null ]; }").value.unwrap();
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({
                "type": "attrs",
                "value": {
                    "n": { "type": "int", "value": 1 },
                    "xs": { "type": "list", "value": [{ "type": "bool", "value": true }, { "type": "null" }] },
                },
            })
        );

        let env = EnvSnapshot {
            bindings: vec![EnvBinding {
                name: "x".to_string(),
                value: ValueSnapshot::Unevaluated,
            }],
            with_scopes: 0,
            truncated: true,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["bindings"][0]["value"], serde_json::json!({ "type": "unevaluated" }));
        assert_eq!(json["truncated"], true);
    }
}
