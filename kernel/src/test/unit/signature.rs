use kiln_dtype::ScalarDType;
use test_case::test_case;

use crate::annotation::{RecordType, TypeAnnotation};
use crate::error::Error;
use crate::signature::{ArgMetadata, CallableKind, ParamKind, Signature};
use crate::test::helpers::pair_type;
use crate::value::Value;

fn func_signature(params: Vec<ArgMetadata>) -> Signature {
    Signature::new("f", CallableKind::Func, params, false).unwrap()
}

#[test_case(ParamKind::VarPositional ; "variadic positional")]
#[test_case(ParamKind::VarKeyword ; "variadic keyword")]
#[test_case(ParamKind::KeywordOnly ; "keyword only")]
fn test_rejects_parameter_kind(kind: ParamKind) {
    let params = vec![ArgMetadata::new("x", ScalarDType::Int32).with_kind(kind)];
    let err = Signature::new("f", CallableKind::Func, params, false).unwrap_err();
    assert!(matches!(err, Error::UnsupportedParameter { .. }), "{err}");
}

#[test]
fn test_kernel_rejects_defaults() {
    let params = vec![ArgMetadata::new("x", ScalarDType::Int32).with_default(1)];
    let err = Signature::new("k", CallableKind::Kernel, params, false).unwrap_err();
    assert!(matches!(err, Error::KernelDefault { .. }));
}

#[test]
fn test_kernel_requires_annotations() {
    let params = vec![ArgMetadata::new("x", ScalarDType::Int32), ArgMetadata::unannotated("y")];
    let err = Signature::new("k", CallableKind::Kernel, params, false).unwrap_err();
    assert!(matches!(err, Error::MissingAnnotation { index: 1, .. }));
    assert!(err.to_string().contains("#1 (y)"));
}

#[test]
fn test_receiver_becomes_template() {
    let params = vec![ArgMetadata::unannotated("self"), ArgMetadata::new("x", ScalarDType::Float32)];
    let signature = Signature::new("k", CallableKind::Kernel, params, true).unwrap();
    assert!(signature.has_receiver());
    assert_eq!(signature.params()[0].annotation, TypeAnnotation::Template);
}

#[test]
fn test_sparse_builder_is_kernel_only() {
    let params = vec![ArgMetadata::new("b", TypeAnnotation::SparseMatrixBuilder)];
    assert!(Signature::new("k", CallableKind::Kernel, params.clone(), false).is_ok());
    let err = Signature::new("f", CallableKind::Func, params, false).unwrap_err();
    assert!(matches!(err, Error::InvalidAnnotation { .. }));
}

#[test]
fn test_duplicate_names() {
    let params = vec![ArgMetadata::unannotated("x"), ArgMetadata::unannotated("x")];
    let err = Signature::new("f", CallableKind::Func, params, false).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_expanded_flattens_nested_records() {
    let inner = RecordType::new("Inner", vec![("x".into(), ScalarDType::Float32.into())], true);
    let outer = RecordType::new(
        "Outer",
        vec![("a".into(), ScalarDType::Int32.into()), ("inner".into(), inner.into())],
        true,
    );
    let signature = func_signature(vec![
        ArgMetadata::new("n", ScalarDType::Int32).with_default(3),
        ArgMetadata::new("s", outer),
    ]);
    let names: Vec<_> = signature.expanded().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["n", "@s.a", "@s.inner.x"]);
    assert!(signature.expanded()[0].default.is_some());
    assert!(signature.expanded()[1].default.is_none());
}

#[test]
fn test_bind_call_fuses_keywords_and_defaults() {
    let signature = func_signature(vec![
        ArgMetadata::unannotated("a"),
        ArgMetadata::unannotated("b"),
        ArgMetadata::unannotated("c").with_default(7),
    ]);
    let fused = signature.bind_call(vec![Value::Int(1)], vec![("b".into(), Value::Int(2))]).unwrap();
    assert!(matches!(fused.as_slice(), [Value::Int(1), Value::Int(2), Value::Int(7)]));
}

#[test]
fn test_bind_call_errors() {
    let signature = func_signature(vec![ArgMetadata::unannotated("a"), ArgMetadata::unannotated("b")]);

    let err = signature.bind_call(vec![1.into(), 2.into(), 3.into()], vec![]).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 2, provided: 3, .. }));

    let err = signature.bind_call(vec![1.into()], vec![]).unwrap_err();
    assert!(matches!(err, Error::MissingArgument { ref name, .. } if name == "b"));

    let err = signature.bind_call(vec![1.into()], vec![("z".into(), 2.into())]).unwrap_err();
    assert!(matches!(err, Error::UnexpectedArgument { ref name, .. } if name == "z"));

    let err = signature.bind_call(vec![1.into()], vec![("a".into(), 2.into())]).unwrap_err();
    assert!(matches!(err, Error::MultipleValues { ref name, .. } if name == "a"));
}

#[test]
fn test_positional_only_rejects_keyword() {
    let signature = func_signature(vec![ArgMetadata::unannotated("a").with_kind(ParamKind::PositionalOnly)]);
    assert!(signature.bind_call(vec![], vec![("a".into(), 1.into())]).is_err());
    assert!(signature.bind_call(vec![1.into()], vec![]).is_ok());
}

#[test]
fn test_param_lookup() {
    let signature = func_signature(vec![ArgMetadata::new("p", pair_type())]);
    assert!(signature.param("p").is_some_and(|p| p.annotation.as_record().is_some()));
    assert!(signature.param("q").is_none());
}
