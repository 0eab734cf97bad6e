use std::sync::Arc;

use proptest::prelude::*;
use rustc_hash::FxHashMap;

use crate::feature::ExtractOptions;
use crate::mapper::InstantiationMapper;
use crate::signature::ArgMetadata;
use crate::value::Value;

proptest! {
    /// Equal template values map to equal ids; new values get the next dense id.
    #[test]
    fn instantiation_ids_stable_and_dense(calls in prop::collection::vec((0i64..6, any::<bool>()), 1..40)) {
        let params = vec![ArgMetadata::template("n"), ArgMetadata::template("flag")];
        let mut mapper = InstantiationMapper::new("k", Arc::from(params), 4);
        let mut seen = FxHashMap::default();

        for (n, flag) in calls {
            let (id, _) = mapper.lookup(ExtractOptions::default(), &[Value::Int(n), Value::Bool(flag)]).unwrap();
            match seen.get(&(n, flag)) {
                Some(previous) => prop_assert_eq!(*previous, id),
                None => {
                    prop_assert_eq!(id.index(), seen.len());
                    seen.insert((n, flag), id);
                }
            }
        }
        prop_assert_eq!(mapper.len(), seen.len());
    }
}
