use std::sync::Arc;

use proptest::prelude::*;

use crate::func::{Func, trace_fn};
use crate::kernel::KernelCompiler;
use crate::kernel::Kernel;
use crate::signature::ArgMetadata;
use crate::test::helpers::{RecordingCompiler, test_config};
use crate::value::{RecordValue, Value};

use super::generators::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The kernel forwards exactly the leaves the callee reads.
    #[test]
    fn forwarded_leaves_match_callee_reads(((ty, mask), values) in record_with_mask(8).prop_flat_map(|(ty, mask)| {
        let values = record_values(&ty);
        (Just((ty, mask)), values)
    })) {
        let read: Vec<String> = ty
            .fields
            .iter()
            .zip(&mask)
            .filter(|(_, read)| **read)
            .map(|((name, _), _)| format!("x.{name}"))
            .collect();
        let body_reads = read.clone();
        let f = Func::builder()
            .name("f")
            .params(vec![ArgMetadata::new("x", ty.clone())])
            .body(trace_fn(move |t| body_reads.iter().try_for_each(|path| t.read(path))))
            .build()
            .unwrap();

        let compiler = RecordingCompiler::new();
        let callee = Arc::clone(&f);
        let kernel = Kernel::builder()
            .name("k")
            .params(vec![ArgMetadata::new("s", ty.clone())])
            .body(trace_fn(move |t| t.call(&callee, &["s".into()], &[])))
            .compiler(Arc::clone(&compiler) as Arc<dyn KernelCompiler>)
            .config(test_config())
            .build()
            .unwrap();

        kernel.call(&[Value::Record(RecordValue::new(&ty, values))]).unwrap();

        let record = &compiler.records()[0];
        let expected_args: Vec<String> = read.iter().map(|p| format!("@s.{}", &p[2..])).collect();
        let expected_params: Vec<String> = read.iter().map(|p| format!("@{p}")).collect();
        prop_assert_eq!(&record.calls[0].args, &expected_args);
        prop_assert_eq!(&record.calls[0].params, &expected_params);
        prop_assert_eq!(&record.params, &expected_args);
        prop_assert_eq!(record.slots, read.len());
    }
}
