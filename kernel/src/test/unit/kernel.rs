use std::sync::Arc;

use kiln_device::{ExternalArray, Ndarray, Scalar};
use kiln_dtype::{DType, ScalarDType};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use crate::annotation::{NdarrayType, RecordType};
use crate::config::CompileConfig;
use crate::error::Error;
use crate::func::{Func, trace_fn};
use crate::kernel::{AutodiffMode, Callable, Kernel, KernelCompiler};
use crate::signature::ArgMetadata;
use crate::test::helpers::{RecordingCompiler, array_type, empty_body, kernel, pair_type, reads, test_config};
use crate::value::{RecordValue, Value};

#[test]
fn test_repeat_calls_hit_caches() {
    let compiler = RecordingCompiler::new();
    let k = kernel("k", vec![ArgMetadata::new("x", ScalarDType::Float32)], empty_body(), &compiler);

    k.call(&[Value::Float(1.0)]).unwrap();
    k.call(&[Value::Float(2.0)]).unwrap();

    let stats = k.stats();
    assert_eq!(stats.instantiations, 1);
    assert_eq!(stats.compilations, 1);
    assert_eq!(stats.launches, 2);
    assert_eq!(compiler.launches(), 2);
    // Scalar bindings are never cached.
    assert_eq!(stats.launch_cache_size, 0);
    assert_eq!(stats.launch_cache_misses, 2);
}

#[test]
fn test_struct_template_identity_drives_instantiation() {
    let compiler = RecordingCompiler::new();
    let k = kernel(
        "k",
        vec![ArgMetadata::template("s"), ArgMetadata::new("n", ScalarDType::Int32)],
        empty_body(),
        &compiler,
    );
    let ty = pair_type();
    let a = Value::Record(RecordValue::new(&ty, vec![Value::Float(1.0), Value::Int(2)]));
    let b = Value::Record(RecordValue::new(&ty, vec![Value::Float(1.0), Value::Int(2)]));

    k.call(&[a.clone(), Value::Int(5)]).unwrap();
    k.call(&[a, Value::Int(5)]).unwrap();
    assert_eq!(k.stats().instantiations, 1);

    k.call(&[b, Value::Int(5)]).unwrap();
    assert_eq!(k.stats().instantiations, 2);
    assert_eq!(compiler.compilations(), 2);
}

#[test]
fn test_pruned_forward_call() {
    let compiler = RecordingCompiler::new();
    let f = Func::builder().name("f").params(vec![ArgMetadata::new("x", pair_type())]).body(reads(&["x.a"])).build().unwrap();
    let ty = pair_type();
    let callee = Arc::clone(&f);
    let k = kernel(
        "k",
        vec![ArgMetadata::new("s", ty.clone())],
        trace_fn(move |t| t.call(&callee, &["s".into()], &[])),
        &compiler,
    );

    let value = RecordValue::new(&ty, vec![Value::Float(0.5), Value::Int(3)]);
    k.call(&[value.into()]).unwrap();

    let record = &compiler.records()[0];
    assert_eq!(record.params, ["@s.a"]);
    assert_eq!(record.slots, 1);
    assert_eq!(record.calls.len(), 1);
    assert_eq!(record.calls[0].callee, f.id());
    assert_eq!(record.calls[0].args, ["@s.a"]);
    assert!(!record.calls[0].args.iter().any(|a| a == "@s.b"));
}

#[test]
fn test_rank_mismatch_reported_before_launch() {
    let compiler = RecordingCompiler::new();
    let k = kernel("k", vec![ArgMetadata::new("x", NdarrayType::builder().ndim(2).build())], empty_body(), &compiler);
    let array = ExternalArray::new(ArrayD::<f32>::zeros(IxDyn(&[2, 2, 2])));

    let err = k.call(&[array.into()]).unwrap_err();
    assert!(matches!(err.innermost(), Error::NdimMismatch { expected: 2, actual: 3, .. }));
    let message = err.to_string();
    assert!(message.contains("in kernel 'k'") && message.contains("ndim=2") && message.contains("ndim=3"), "{message}");
    assert_eq!(compiler.launches(), 0);
}

#[test]
fn test_external_contents_swapped_in_place_are_rechecked() {
    let compiler = RecordingCompiler::new();
    let k = kernel("k", vec![ArgMetadata::new("x", NdarrayType::builder().ndim(2).build())], empty_body(), &compiler);
    let array = ExternalArray::new(ArrayD::<f32>::zeros(IxDyn(&[2, 3])));

    k.call(&[array.clone().into()]).unwrap();
    *array.write() = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 4])).into();

    let err = k.call(&[array.into()]).unwrap_err();
    assert!(matches!(err.innermost(), Error::NdimMismatch { expected: 2, actual: 3, .. }));
    assert_eq!(compiler.launches(), 1);
}

#[test]
fn test_default_config_checks_own_arrays() {
    let compiler = RecordingCompiler::new();
    let k = Kernel::builder()
        .name("k")
        .params(vec![ArgMetadata::new("x", array_type(DType::Float32, 2))])
        .body(empty_body())
        .compiler(Arc::clone(&compiler) as Arc<dyn KernelCompiler>)
        .config(CompileConfig::default())
        .build()
        .unwrap();

    let err = k.call(&[Ndarray::zeros(DType::Float32, &[4]).into()]).unwrap_err();
    assert!(matches!(err.innermost(), Error::NdimMismatch { expected: 2, actual: 1, .. }));
    assert_eq!(compiler.compilations(), 0);
}

#[test]
fn test_slot_cap_checked_before_compile() {
    let compiler = RecordingCompiler::new();
    let params = (0..513).map(|i| ArgMetadata::new(format!("x{i}"), ScalarDType::Float32)).collect();
    let k = kernel("wide", params, empty_body(), &compiler);
    let args: Vec<Value> = (0..513).map(|i| Value::Float(i as f64)).collect();

    let err = k.call(&args).unwrap_err();
    assert!(matches!(err.innermost(), Error::TooManyArguments { slots: 513, max: 512, .. }));
    assert_eq!(compiler.compilations(), 0);
    assert_eq!(compiler.launches(), 0);
}

#[test]
fn test_struct_leaves_count_toward_slot_cap() {
    let compiler = RecordingCompiler::new();
    let fields = (0..600).map(|i| (format!("f{i}"), ScalarDType::Float32.into())).collect();
    let ty = RecordType::new("Wide", fields, true);
    let values = (0..600).map(|_| Value::Float(0.0)).collect();
    let record = RecordValue::new(&ty, values);

    // Only two leaves are read, so the kernel fits.
    let k = kernel("k", vec![ArgMetadata::new("s", ty.clone())], reads(&["s.f0", "s.f599"]), &compiler);
    k.call(&[record.clone().into()]).unwrap();
    assert_eq!(compiler.records()[0].slots, 2);

    let everything = trace_fn(|t| t.read("s"));
    let k = kernel("all", vec![ArgMetadata::new("s", ty)], everything, &compiler);
    assert!(matches!(k.call(&[record.into()]).unwrap_err().innermost(), Error::TooManyArguments { .. }));
}

#[test]
fn test_launch_context_cache_keyed_on_identity() {
    let compiler = RecordingCompiler::new();
    let k = kernel("k", vec![ArgMetadata::new("a", array_type(DType::Float32, 1))], empty_body(), &compiler);
    let array = Ndarray::zeros(DType::Float32, &[16]);

    k.call(&[array.clone().into()]).unwrap();
    k.call(&[array.clone().into()]).unwrap();
    let stats = k.stats();
    assert_eq!(stats.launch_cache_hits, 1);
    assert_eq!(stats.launch_cache_size, 1);

    // A new gradient buffer bumps the array's epoch.
    array.enable_grad();
    k.call(&[array.into()]).unwrap();
    let stats = k.stats();
    assert_eq!(stats.launch_cache_hits, 1);
    assert_eq!(stats.launch_cache_misses, 2);
    assert_eq!(stats.instantiations, 2);
}

#[test]
fn test_reset_recompiles_with_same_ids() {
    let compiler = RecordingCompiler::new();
    let k = kernel("k", vec![ArgMetadata::template("n")], empty_body(), &compiler);
    let first = k.primal().ensure_compiled(&[Value::Int(1)]).unwrap();

    k.reset();
    assert!(k.primal().compiled(first).is_none());
    let again = k.primal().ensure_compiled(&[Value::Int(1)]).unwrap();
    assert_eq!(first, again);
    assert_eq!(compiler.compilations(), 2);
    assert_eq!(k.stats().instantiations, 1);
}

#[test]
fn test_adjoint_compiles_separately() {
    let compiler = RecordingCompiler::new();
    let k = kernel("k", vec![ArgMetadata::new("x", ScalarDType::Float32)], empty_body(), &compiler);
    k.call(&[Value::Float(1.0)]).unwrap();
    k.grad().call(&[Value::Float(1.0)]).unwrap();

    let modes: Vec<_> = compiler.records().iter().map(|r| r.autodiff_mode).collect();
    assert_eq!(modes, [AutodiffMode::None, AutodiffMode::Reverse]);
    assert_eq!(k.primal().stats().compilations, 1);
    assert_eq!(k.grad().stats().compilations, 1);
}

#[test]
fn test_call_with_keywords_and_returns() {
    let compiler = RecordingCompiler::with_hook(|ctx| {
        let sum = ctx.float(0)? + ctx.int(1)? as f64;
        ctx.push_return(Scalar::Float(sum));
        Ok(())
    });
    let k = kernel(
        "add",
        vec![ArgMetadata::new("x", ScalarDType::Float64), ArgMetadata::new("n", ScalarDType::Int32)],
        empty_body(),
        &compiler,
    );
    let returns = k.call_with(vec![Value::Float(1.5)], vec![("n".into(), Value::Int(2))]).unwrap();
    assert_eq!(returns.as_slice(), &[Scalar::Float(3.5)]);

    let err = k.call_with(vec![], vec![("m".into(), Value::Int(2))]).unwrap_err();
    assert!(matches!(err.innermost(), Error::UnexpectedArgument { .. }));
}

#[test]
fn test_launch_failure_surfaces() {
    let compiler = RecordingCompiler::with_hook(|ctx| ctx.matrix(0).map(|_| ()));
    let k = kernel("k", vec![ArgMetadata::new("x", ScalarDType::Float32)], empty_body(), &compiler);
    let err = k.call(&[Value::Float(0.0)]).unwrap_err();
    assert!(matches!(err.innermost(), Error::Launch { .. }));
}

/// Reads every element of a 2x3 array in row-major order into the returns.
fn read_back_kernel() -> (Kernel, Arc<RecordingCompiler>) {
    let compiler = RecordingCompiler::with_hook(|ctx| {
        let arg = ctx.array(0)?.clone();
        let data = unsafe { std::slice::from_raw_parts(arg.ptr.as_mut_ptr::<f32>() as *const f32, 6) };
        for v in data {
            ctx.push_return(Scalar::Float(f64::from(*v)));
        }
        Ok(())
    });
    let k = kernel("read_back", vec![ArgMetadata::new("x", array_type(DType::Float32, 2))], empty_body(), &compiler);
    (k, compiler)
}

#[test]
fn test_external_round_trip_has_no_transposition() {
    let (k, _compiler) = read_back_kernel();
    let values: Vec<f32> = (0..6).map(|v| v as f32).collect();

    let row_major = ArrayD::from_shape_vec(IxDyn(&[2, 3]), values.clone()).unwrap();
    let column_major = ArrayD::from_shape_vec(IxDyn(&[2, 3]).f(), values).unwrap();

    for host in [row_major, column_major] {
        let expected: Vec<f64> = host.iter().map(|v| f64::from(*v)).collect();
        let returns = k.call(&[ExternalArray::new(host).into()]).unwrap();
        let observed: Vec<f64> = returns.iter().map(|s| s.as_f64()).collect();
        assert_eq!(observed, expected);
    }
}

#[test]
fn test_callable_kinds() {
    let compiler = RecordingCompiler::new();
    let f = Func::builder().name("f").body(empty_body()).build().unwrap();
    let k = Kernel::builder()
        .name("k")
        .body(empty_body())
        .compiler(compiler as Arc<dyn KernelCompiler>)
        .config(test_config())
        .build()
        .unwrap();

    let kernel_callable = Callable::from(k);
    let func_callable = Callable::from(f);
    assert!(kernel_callable.as_kernel().is_some());
    assert!(func_callable.as_kernel().is_none());
    assert_eq!(kernel_callable.name(), "k");
    assert_eq!(func_callable.signature().params().len(), 0);
}
