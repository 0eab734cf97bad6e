use proptest::prelude::*;
use rustc_hash::FxHashSet;

use kiln_device::DeviceSpec;

use crate::annotation::TypeAnnotation;
use crate::flat::DottedPath;
use crate::launch::{bind_args, expected_slot_count};
use crate::signature::ArgMetadata;
use crate::value::{RecordValue, Value};

use super::generators::*;

fn scalar_params() -> impl Strategy<Value = (Vec<ArgMetadata>, Vec<Value>)> {
    prop::collection::vec(slot_dtype(), 0..12).prop_flat_map(|dtypes| {
        let params: Vec<_> =
            dtypes.iter().enumerate().map(|(i, d)| ArgMetadata::new(format!("p{i}"), TypeAnnotation::Primitive(*d))).collect();
        let values: Vec<_> = dtypes.iter().map(|d| slot_value(*d)).collect();
        (Just(params), values)
    })
}

proptest! {
    /// Slots consumed by binding equal the count derived from the declaration.
    #[test]
    fn bound_slots_match_declaration(
        (params, values) in scalar_params(),
        ((ty, mask), fields) in record_with_mask(10).prop_flat_map(|(ty, mask)| {
            let fields = record_values(&ty);
            (Just((ty, mask)), fields)
        }),
    ) {
        let mut params = params;
        let mut args = values;
        params.push(ArgMetadata::new("s", ty.clone()));
        args.push(Value::Record(RecordValue::new(&ty, fields)));

        let mut used: FxHashSet<DottedPath> = FxHashSet::default();
        used.insert(["s".to_string()].into_iter().collect());
        for ((name, _), read) in ty.fields.iter().zip(&mask) {
            if *read {
                used.insert(["s".to_string(), name.clone()].into_iter().collect());
            }
        }

        let bound = bind_args(&params, &args, &used, DeviceSpec::Cpu).unwrap();
        let expected = expected_slot_count(&params, &used);
        prop_assert_eq!(bound.slots, expected);
        prop_assert_eq!(bound.ctx.filled(), expected);
        prop_assert_eq!(expected, params.len() - 1 + mask.iter().filter(|m| **m).count());
    }
}
