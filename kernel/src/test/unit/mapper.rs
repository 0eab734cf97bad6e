use std::sync::Arc;

use kiln_device::Ndarray;
use kiln_dtype::{DType, ScalarDType};

use crate::annotation::TypeAnnotation;
use crate::error::Error;
use crate::feature::ExtractOptions;
use crate::mapper::{ArgIdentity, InstantiationMapper};
use crate::signature::ArgMetadata;
use crate::test::helpers::{array_type, pair_type};
use crate::value::{RecordValue, Value};

fn mapper(params: Vec<ArgMetadata>) -> InstantiationMapper {
    InstantiationMapper::new("k", Arc::from(params), 16)
}

#[test]
fn test_ids_are_stable_and_dense() {
    let mut mapper = mapper(vec![ArgMetadata::template("n"), ArgMetadata::new("x", ScalarDType::Float32)]);
    let opts = ExtractOptions::default();

    let (a, _) = mapper.lookup(opts, &[Value::Int(1), Value::Float(0.0)]).unwrap();
    let (b, _) = mapper.lookup(opts, &[Value::Int(2), Value::Float(1.0)]).unwrap();
    let (c, _) = mapper.lookup(opts, &[Value::Int(1), Value::Float(9.0)]).unwrap();

    assert_eq!(a.index(), 0);
    assert_eq!(b.index(), 1);
    assert_eq!(a, c);
    assert_eq!(mapper.len(), 2);
    assert_eq!(a.to_string(), "#0");
}

#[test]
fn test_fast_path_skips_extraction() {
    let array = Ndarray::zeros(DType::Float32, &[8]);
    let mut mapper = mapper(vec![ArgMetadata::new("a", array_type(DType::Float32, 1))]);
    let args = [Value::Ndarray(array)];

    mapper.lookup(ExtractOptions::default(), &args).unwrap();
    mapper.lookup(ExtractOptions::default(), &args).unwrap();
    let stats = mapper.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fast_path_hits, 1);
    assert_eq!(mapper.fast_path_len(), 1);
}

#[test]
fn test_gradient_arguments_bypass_fast_path() {
    let array = Ndarray::zeros(DType::Float32, &[8]);
    array.enable_grad();
    let mut mapper = mapper(vec![ArgMetadata::new("a", array_type(DType::Float32, 1))]);
    let args = [Value::Ndarray(array)];

    mapper.lookup(ExtractOptions::default(), &args).unwrap();
    mapper.lookup(ExtractOptions::default(), &args).unwrap();
    let stats = mapper.stats();
    assert_eq!(stats.fast_path_hits, 0);
    assert_eq!(stats.hits, 1);
    assert_eq!(mapper.fast_path_len(), 0);
}

#[test]
fn test_struct_templates_specialize_by_identity() {
    let ty = pair_type();
    let mut mapper = mapper(vec![ArgMetadata::template("s"), ArgMetadata::new("n", ScalarDType::Int32)]);
    let opts = ExtractOptions::default();

    let a = Value::Record(RecordValue::new(&ty, vec![Value::Float(1.0), Value::Int(2)]));
    let b = Value::Record(RecordValue::new(&ty, vec![Value::Float(1.0), Value::Int(2)]));

    let (first, _) = mapper.lookup(opts, &[a.clone(), Value::Int(5)]).unwrap();
    let (again, _) = mapper.lookup(opts, &[a, Value::Int(5)]).unwrap();
    assert_eq!(first, again);
    assert_eq!(mapper.len(), 1);

    let (other, _) = mapper.lookup(opts, &[b, Value::Int(5)]).unwrap();
    assert_ne!(first, other);
    assert_eq!(mapper.len(), 2);
}

#[test]
fn test_arity_checked() {
    let mut mapper = mapper(vec![ArgMetadata::template("n")]);
    let err = mapper.lookup(ExtractOptions::default(), &[]).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 1, provided: 0, .. }));
}

#[test]
fn test_runtime_slots_share_identity() {
    let slot = TypeAnnotation::Primitive(ScalarDType::Int32);
    assert_eq!(ArgIdentity::of(&Value::Int(1), &slot), ArgIdentity::of(&Value::Int(2), &slot));
    assert_ne!(
        ArgIdentity::of(&Value::Int(1), &TypeAnnotation::Template),
        ArgIdentity::of(&Value::Int(2), &TypeAnnotation::Template)
    );
}

#[test]
fn test_zero_capacity_fast_path() {
    let mut mapper = InstantiationMapper::new("k", Arc::from(vec![ArgMetadata::template("n")]), 0);
    mapper.lookup(ExtractOptions::default(), &[Value::Int(1)]).unwrap();
    mapper.lookup(ExtractOptions::default(), &[Value::Int(1)]).unwrap();
    assert_eq!(mapper.stats().fast_path_hits, 0);
    assert_eq!(mapper.stats().hits, 1);
}
