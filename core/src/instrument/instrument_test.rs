#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::{
        ast::{NodeId, NodeKind, parse},
        eval::{AutoArgs, EnvSnapshot, Interpreter, MAX_ENV_BINDINGS, ValueSnapshot},
        instrument::{Observer, RewriteError, combine, noop, observer, rewrite},
        op::BinOp,
    };

    type Seen = Arc<Mutex<Vec<(NodeId, ValueSnapshot, EnvSnapshot)>>>;

    fn recorder() -> (Observer, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let observer = observer(move |node, ev, env, value| {
            let snapshot = ev.snapshot(value);
            let env = ev.env_snapshot(env);
            sink.lock().unwrap().push((node.id, snapshot, env));
        });
        (observer, seen)
    }

    fn find(tree: &crate::ast::Tree, pred: impl Fn(&NodeKind) -> bool) -> NodeId {
        tree.arena
            .iter()
            .find(|n| pred(&n.kind))
            .map(|n| n.id)
            .expect("node present")
    }

    #[test]
    fn instrumented_tree_evaluates_identically() {
        for src in [
            "{ a = 1 + 1; b = a * 2; }",
            "let f = { x, y ? 3 }: x * y; in [ (f { x = 2; }) (f { x = 1; y = 1; }) ]",
            "with { z = 5; }; if z > 4 then \"big\" else \"small\"",
            r#"{ ok = 1; bad = throw "no"; }"#,
        ] {
            let mut tree = parse(src).unwrap();
            let plain = Interpreter::default()
                .evaluate(&tree.arena, tree.root, &AutoArgs::new())
                .unwrap();
            let root = rewrite(&mut tree.arena, tree.root, &noop()).unwrap();
            let observed = Interpreter::default()
                .evaluate(&tree.arena, root, &AutoArgs::new())
                .unwrap();
            assert_eq!(plain.value, observed.value, "{src}");
            assert_eq!(plain.errors, observed.errors, "{src}");
        }
    }

    #[test]
    fn observer_sees_value_and_environment() {
        let mut tree = parse("{ a = 1 + 1; b = a * 2; }").unwrap();
        let mul = find(&tree, |k| matches!(k, NodeKind::Binary { op: BinOp::Mul, .. }));
        let (observer, seen) = recorder();
        let root = rewrite(&mut tree.arena, tree.root, &observer).unwrap();
        Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();

        let seen = seen.lock().unwrap();
        let (_, value, env) = seen.iter().find(|(id, _, _)| *id == mul).expect("mul observed");
        assert_eq!(value, &ValueSnapshot::Int(4));
        assert_eq!(env.get("a"), Some(&ValueSnapshot::Int(2)));
        // b is being evaluated while its own body runs
        assert_eq!(env.get("b"), Some(&ValueSnapshot::Unevaluated));
        assert!(env.get("builtins").is_none());
        assert_eq!(tree.arena.node(mul).span.start.offset, 17);
        assert!(!env.truncated);
    }

    #[test]
    fn environment_snapshots_are_bounded() {
        let mut src = String::from("{ ");
        for i in 0..2000 {
            src.push_str(&format!("a{i} = {i}; "));
        }
        src.push_str("r = a0 + 1; }");
        let mut tree = parse(&src).unwrap();
        let add = find(&tree, |k| matches!(k, NodeKind::Binary { op: BinOp::Add, .. }));
        let (observer, seen) = recorder();
        let root = rewrite(&mut tree.arena, tree.root, &observer).unwrap();
        Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|(_, _, env)| env.bindings.len() <= MAX_ENV_BINDINGS));
        let (_, value, env) = seen.iter().find(|(id, _, _)| *id == add).expect("add observed");
        assert_eq!(value, &ValueSnapshot::Int(1));
        assert_eq!(env.bindings.len(), MAX_ENV_BINDINGS);
        assert!(env.truncated);
    }

    #[test]
    fn shadowed_names_appear_once() {
        let mut tree = parse("let a = 1; in let a = 2; in a + 1").unwrap();
        let add = find(&tree, |k| matches!(k, NodeKind::Binary { op: BinOp::Add, .. }));
        let (observer, seen) = recorder();
        let root = rewrite(&mut tree.arena, tree.root, &observer).unwrap();
        Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();

        let seen = seen.lock().unwrap();
        let (_, _, env) = seen.iter().find(|(id, _, _)| *id == add).expect("add observed");
        assert_eq!(env.bindings.iter().filter(|b| b.name == "a").count(), 1);
        assert_eq!(env.get("a"), Some(&ValueSnapshot::Int(2)));
    }

    #[test]
    fn failing_and_unforced_nodes_are_not_observed() {
        let mut tree = parse(r#"let unused = 1 + 2; in { bad = throw "x"; good = 3; }"#).unwrap();
        let add = find(&tree, |k| matches!(k, NodeKind::Binary { op: BinOp::Add, .. }));
        let throw_call = find(&tree, |k| matches!(k, NodeKind::Apply { .. }));
        let (observer, seen) = recorder();
        let root = rewrite(&mut tree.arena, tree.root, &observer).unwrap();
        let evaluation = Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();
        assert_eq!(evaluation.errors.len(), 1);

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|(id, _, _)| *id != add));
        assert!(seen.iter().all(|(id, _, _)| *id != throw_call));
        assert!(seen.iter().any(|(_, v, _)| *v == ValueSnapshot::Int(3)));
        assert!(seen.iter().all(|(id, _, _)| !matches!(tree.arena.node(*id).kind, NodeKind::Observed(_))));
    }

    #[test]
    fn shared_thunks_are_observed_once() {
        let mut tree = parse("let x = 1 + 2; in [ x x x ]").unwrap();
        let add = find(&tree, |k| matches!(k, NodeKind::Binary { op: BinOp::Add, .. }));
        let (observer, seen) = recorder();
        let root = rewrite(&mut tree.arena, tree.root, &observer).unwrap();
        Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|(id, _, _)| *id == add).count(), 1);
        // one Var observation per list element
        let vars = seen
            .iter()
            .filter(|(id, _, _)| matches!(tree.arena.node(*id).kind, NodeKind::Var(_)))
            .count();
        assert_eq!(vars, 3);
    }

    #[test]
    fn parens_are_not_wrapped() {
        let mut tree = parse("(1)").unwrap();
        let root = rewrite(&mut tree.arena, tree.root, &noop()).unwrap();
        match &tree.arena.node(root).kind {
            NodeKind::Paren(inner) => {
                assert!(matches!(tree.arena.node(*inner).kind, NodeKind::Observed(_)));
            }
            other => panic!("expected paren, got {other:?}"),
        }
        assert_eq!(tree.arena.unwrap_kind(tree.root).name(), "paren");
    }

    #[test]
    fn rewriting_twice_is_rejected() {
        let mut tree = parse("1 + 1").unwrap();
        let root = rewrite(&mut tree.arena, tree.root, &noop()).unwrap();
        let err = rewrite(&mut tree.arena, root, &noop()).unwrap_err();
        assert_eq!(err, RewriteError::AlreadyInstrumented { node: root });
        assert!(err.to_string().contains("already instrumented"));
    }

    #[test]
    fn shared_subtrees_are_copied_once() {
        let mut tree = parse("let s = { a = 1; b = 2; }; in { inherit (s) a b; }").unwrap();
        let before = tree.arena.len();
        let root = rewrite(&mut tree.arena, tree.root, &noop()).unwrap();
        assert_eq!(tree.arena.len(), before * 2);

        let evaluation = Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();
        let attrs = evaluation.value.unwrap();
        assert_eq!(attrs.as_attrs().unwrap().get("b"), Some(&ValueSnapshot::Int(2)));
    }

    #[test]
    fn combined_observers_all_run() {
        let mut tree = parse("1 + 1").unwrap();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        let root = rewrite(&mut tree.arena, tree.root, &combine(vec![first, second])).unwrap();
        Interpreter::default()
            .evaluate(&tree.arena, root, &AutoArgs::new())
            .unwrap();
        assert_eq!(first_seen.lock().unwrap().len(), 3);
        assert_eq!(second_seen.lock().unwrap().len(), 3);
    }
}
