use crate::error::Error;
use crate::flat::DottedPath;
use crate::pruning::{ArgBinding, CallLeaf, FuncId, KERNEL_FUNC_ID, Pruning, resolve_call_site};
use crate::signature::{ArgMetadata, CallableKind, Signature};
use crate::test::helpers::pair_type;

const F: FuncId = FuncId(7);

fn binding(caller: &str, callee: &str) -> ArgBinding {
    ArgBinding { caller_name: caller.into(), callee_name: callee.into() }
}

fn leaf(name: &str, suffix: &[&str]) -> CallLeaf {
    CallLeaf { name: name.into(), suffix: suffix.iter().map(|s| s.to_string()).collect() }
}

fn path(components: &[&str]) -> DottedPath {
    components.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_callee_needs_propagate_to_caller() {
    let mut pruning = Pruning::new();
    pruning.mark_used(F, "@x.a");
    pruning.record_after_call(
        KERNEL_FUNC_ID,
        F,
        &[binding("@s.a", "@x.a"), binding("@s.b", "@x.b"), binding("n", "m")],
    );

    assert!(pruning.is_used(KERNEL_FUNC_ID, "@s.a"));
    assert!(!pruning.is_used(KERNEL_FUNC_ID, "@s.b"));
    // Plain caller names are always passed and never tracked.
    assert!(!pruning.is_used(KERNEL_FUNC_ID, "n"));
    assert_eq!(pruning.child_name(F, "@s.a"), Some("@x.a"));
}

#[test]
fn test_leaf_bound_to_plain_parameter_is_used() {
    let mut pruning = Pruning::new();
    pruning.record_after_call(KERNEL_FUNC_ID, F, &[binding("@s.a", "v")]);
    assert!(pruning.is_used(KERNEL_FUNC_ID, "@s.a"));
}

#[test]
fn test_dotted_view_includes_prefixes() {
    let mut pruning = Pruning::new();
    pruning.mark_used(KERNEL_FUNC_ID, "@s.inner.x");
    pruning.mark_used(KERNEL_FUNC_ID, "plain");
    let enforced = pruning.enforce();

    let dotted = enforced.dotted(KERNEL_FUNC_ID).unwrap();
    assert!(dotted.contains(&path(&["s"])));
    assert!(dotted.contains(&path(&["s", "inner"])));
    assert!(dotted.contains(&path(&["s", "inner", "x"])));
    assert_eq!(dotted.len(), 3);
}

#[test]
fn test_filter_repeated_struct_argument() {
    // f(x, y) reads x.a and y.b; called as f(s, s).
    let mut pruning = Pruning::new();
    pruning.mark_used(F, "@x.a");
    pruning.mark_used(F, "@y.b");
    let bindings =
        [binding("@s.a", "@x.a"), binding("@s.b", "@x.b"), binding("@s.a", "@y.a"), binding("@s.b", "@y.b")];
    pruning.record_after_call(KERNEL_FUNC_ID, F, &bindings);
    let enforced = pruning.enforce();

    assert_eq!(enforced.filter_call_args(F, &bindings), ["@s.a", "@s.b"]);
    assert!(enforced.is_used(KERNEL_FUNC_ID, "@s.a"));
    assert!(enforced.is_used(KERNEL_FUNC_ID, "@s.b"));
}

#[test]
fn test_pruned_params_keep_plain_and_used() {
    let signature = Signature::new(
        "f",
        CallableKind::Func,
        vec![ArgMetadata::unannotated("n"), ArgMetadata::new("x", pair_type())],
        false,
    )
    .unwrap();
    let mut pruning = Pruning::new();
    pruning.mark_used(F, "@x.b");
    let kept: Vec<_> = pruning.pruned_params(F, signature.expanded()).iter().map(|p| p.name.clone()).collect();
    assert_eq!(kept, ["n", "@x.b"]);
}

fn callee(method: bool) -> Signature {
    let mut params = vec![ArgMetadata::new("x", pair_type()), ArgMetadata::unannotated("k").with_default(1)];
    if method {
        params.insert(0, ArgMetadata::unannotated("self"));
    }
    Signature::new("g", CallableKind::Func, params, method).unwrap()
}

#[test]
fn test_resolve_positional_struct_and_default() {
    let site = resolve_call_site(&callee(false), &[vec![leaf("@s.a", &["a"]), leaf("@s.b", &["b"])]], &[]).unwrap();
    assert_eq!(site.offset, 0);
    assert_eq!(
        site.bindings,
        [binding("@s.a", "@x.a"), binding("@s.b", "@x.b"), binding(CallLeaf::LITERAL, "k")]
    );
}

#[test]
fn test_resolve_keyword() {
    let site = resolve_call_site(
        &callee(false),
        &[],
        &[("k".into(), vec![leaf("n", &[])]), ("x".into(), vec![leaf("@s.a", &["a"]), leaf("@s.b", &["b"])])],
    )
    .unwrap();
    assert_eq!(site.bindings, [binding("@s.a", "@x.a"), binding("@s.b", "@x.b"), binding("n", "k")]);
}

#[test]
fn test_resolve_implicit_receiver() {
    let site =
        resolve_call_site(&callee(true), &[vec![leaf("@s.a", &["a"]), leaf("@s.b", &["b"])], vec![leaf("n", &[])]], &[])
            .unwrap();
    assert_eq!(site.offset, 1);
    assert_eq!(site.bindings, [binding("@s.a", "@x.a"), binding("@s.b", "@x.b"), binding("n", "k")]);
}

#[test]
fn test_resolve_errors() {
    let err = resolve_call_site(&callee(false), &[], &[]).unwrap_err();
    assert!(matches!(err, Error::MissingArgument { ref name, .. } if name == "@x.a"));

    let err = resolve_call_site(&callee(false), &[], &[("z".into(), vec![leaf("n", &[])])]).unwrap_err();
    assert!(matches!(err, Error::UnexpectedArgument { .. }));

    // A scalar passed where a struct is expected names the struct parameter.
    let err = resolve_call_site(&callee(false), &[vec![leaf("n", &[])]], &[]).unwrap_err();
    assert!(matches!(err, Error::StructTypeMismatch { ref arg, ref provided, .. } if arg == "x" && provided == "n"));

    let too_many = vec![vec![leaf("a", &[])], vec![leaf("b", &[])], vec![leaf("c", &[])]];
    let err = resolve_call_site(&callee(false), &too_many, &[]).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { .. }));
}

#[test]
fn test_literal_leaf() {
    let literal = CallLeaf::literal();
    assert_eq!(literal.name, CallLeaf::LITERAL);
    assert!(literal.suffix.is_empty());
}

#[test]
fn test_resolve_literal_struct_fills_every_leaf() {
    let site = resolve_call_site(&callee(false), &[vec![CallLeaf::literal()]], &[]).unwrap();
    assert_eq!(
        site.bindings,
        [binding(CallLeaf::LITERAL, "@x.a"), binding(CallLeaf::LITERAL, "@x.b"), binding(CallLeaf::LITERAL, "k")]
    );

    let site = resolve_call_site(&callee(false), &[], &[("x".into(), vec![CallLeaf::literal()])]).unwrap();
    assert_eq!(site.bindings[..2], [binding(CallLeaf::LITERAL, "@x.a"), binding(CallLeaf::LITERAL, "@x.b")]);
}

#[test]
fn test_filter_literal_struct_keeps_used_leaves() {
    let mut pruning = Pruning::new();
    pruning.mark_used(F, "@x.b");
    let bindings =
        [binding(CallLeaf::LITERAL, "@x.a"), binding(CallLeaf::LITERAL, "@x.b"), binding(CallLeaf::LITERAL, "k")];
    pruning.record_after_call(KERNEL_FUNC_ID, F, &bindings);
    let enforced = pruning.enforce();

    assert_eq!(enforced.filter_call_args(F, &bindings), [CallLeaf::LITERAL, CallLeaf::LITERAL]);
    assert!(enforced.used_parameters(KERNEL_FUNC_ID).is_none_or(|used| used.is_empty()));
}
