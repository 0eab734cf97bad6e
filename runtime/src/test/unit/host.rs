use std::sync::Arc;

use kiln_device::Scalar;
use kiln_dtype::ScalarDType;
use kiln_kernel::{ArgMetadata, CompileConfig, Kernel, KernelCompiler, Value, trace_fn};

use crate::host::HostCompiler;

fn host_kernel(compiler: &Arc<HostCompiler>, name: &str, params: Vec<ArgMetadata>) -> Kernel {
    Kernel::builder()
        .name(name)
        .params(params)
        .body(trace_fn(|_| Ok(())))
        .compiler(Arc::clone(compiler) as Arc<dyn KernelCompiler>)
        .config(CompileConfig::builder().build())
        .build()
        .unwrap()
}

#[test]
fn test_host_kernel_runs_registered_body() {
    let compiler = HostCompiler::new();
    compiler.define("axpy", |ctx| {
        let (a, x, y) = (ctx.float(0)?, ctx.float(1)?, ctx.int(2)?);
        ctx.push_return(Scalar::Float(a * x + y as f64));
        Ok(())
    });

    let k = host_kernel(
        &compiler,
        "axpy",
        vec![
            ArgMetadata::new("a", ScalarDType::Float64),
            ArgMetadata::new("x", ScalarDType::Float32),
            ArgMetadata::new("y", ScalarDType::Int32),
        ],
    );

    let returns = k.call(&[Value::Float(2.0), Value::Float(3.0), Value::Int(1)]).unwrap();
    assert_eq!(returns.as_slice(), &[Scalar::Float(7.0)]);

    k.call(&[Value::Float(1.0), Value::Float(1.0), Value::Int(1)]).unwrap();
    assert_eq!(compiler.compilations(), 1);
}

#[test]
fn test_missing_body_fails_compilation() {
    let compiler = HostCompiler::new();
    let k = host_kernel(&compiler, "missing", vec![]);

    let err = k.call(&[]).unwrap_err();
    assert!(matches!(err.innermost(), kiln_kernel::Error::Compile { .. }));
    assert_eq!(compiler.compilations(), 0);
}

#[test]
fn test_host_backend_has_no_adjoint() {
    let compiler = HostCompiler::new();
    compiler.define("k", |_| Ok(()));
    let k = host_kernel(&compiler, "k", vec![]);

    k.call(&[]).unwrap();
    assert!(k.grad().call(&[]).is_err());
}
