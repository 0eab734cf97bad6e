use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bon::bon;

use crate::error::Result;
use crate::pruning::FuncId;
use crate::signature::{ArgMetadata, CallableKind, Signature};
use crate::trace::Tracer;

/// Body of a kernel or func: replays its reads and calls against a [`Tracer`].
pub type TraceFn = Arc<dyn Fn(&mut Tracer<'_>) -> Result<()> + Send + Sync>;

pub fn trace_fn(body: impl Fn(&mut Tracer<'_>) -> Result<()> + Send + Sync + 'static) -> TraceFn {
    Arc::new(body)
}

fn next_func_id() -> FuncId {
    // Zero is the kernel scope.
    static NEXT: AtomicU32 = AtomicU32::new(1);
    FuncId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A device function callable from kernels and other funcs.
pub struct Func {
    id: FuncId,
    signature: Signature,
    body: TraceFn,
}

#[bon]
impl Func {
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(into)] name: String,
        #[builder(default)] params: Vec<ArgMetadata>,
        body: TraceFn,
        /// First parameter is an implicit receiver.
        #[builder(default = false)]
        method: bool,
    ) -> Result<Arc<Self>> {
        let signature = Signature::new(name, CallableKind::Func, params, method)?;
        Ok(Arc::new(Self { id: next_func_id(), signature, body }))
    }
}

impl Func {
    pub fn id(&self) -> FuncId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.signature.name()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn body(&self) -> &TraceFn {
        &self.body
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("id", &self.id).field("name", &self.name()).finish_non_exhaustive()
    }
}
