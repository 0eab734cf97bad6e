use kiln_dtype::{DType, ScalarDType};

use crate::Ndarray;

#[test]
fn test_from_slice_roundtrip() {
    let array = Ndarray::from_slice(&[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(array.shape(), &[2, 3]);
    assert_eq!(array.nbytes(), 24);
    assert_eq!(array.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_size_and_dtype_checks() {
    assert!(Ndarray::from_slice(&[4], &[1i32, 2, 3]).is_err());
    let array = Ndarray::zeros(DType::Int32, &[3]);
    assert!(array.to_vec::<f32>().is_err());
}

#[test]
fn test_matrix_elements_excluded_from_shape() {
    let array = Ndarray::zeros(DType::matrix(ScalarDType::Float32, 2, 2), &[5]);
    assert_eq!(array.ndim(), 1);
    assert_eq!(array.numel(), 20);
    assert_eq!(array.nbytes(), 80);
}

#[test]
fn test_enable_grad_bumps_epoch_once() {
    let array = Ndarray::zeros(DType::Float64, &[4]);
    let before = array.token();
    assert!(!array.has_grad());

    let grad = array.enable_grad();
    let after = array.token();
    assert_eq!(before.id, after.id);
    assert_ne!(before.epoch, after.epoch);

    let again = array.enable_grad();
    assert_eq!(grad.id(), again.id());
    assert_eq!(array.token(), after);
    assert_eq!(array.as_arg().grad, Some(grad.base_ptr()));
}

#[test]
fn test_clones_share_identity() {
    let a = Ndarray::zeros(DType::Int8, &[1]);
    let b = a.clone();
    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), Ndarray::zeros(DType::Int8, &[1]).id());
}
