//! Flattened names for struct leaves.
//!
//! A struct parameter `s` with field `a` is flattened into the leaf `@s.a`;
//! nested fields extend the same name (`@s.inner.x`). Neither `@` nor `.` can
//! occur in an identifier, so a flattened name never collides with a declared
//! parameter and `is_flat` distinguishes struct leaves from plain parameters.

use smallvec::SmallVec;

pub const FLAT_PREFIX: char = '@';
pub const FLAT_SEPARATOR: char = '.';

/// Path components of a flattened name, root first.
pub type DottedPath = SmallVec<[String; 3]>;

/// Name of `field` inside the (possibly already flattened) value named `base`.
pub fn flat_name(base: &str, field: &str) -> String {
    if is_flat(base) { format!("{base}{FLAT_SEPARATOR}{field}") } else { format!("{FLAT_PREFIX}{base}{FLAT_SEPARATOR}{field}") }
}

/// Extend `base` by every component of `suffix`.
pub fn join(base: &str, suffix: &[String]) -> String {
    suffix.iter().fold(base.to_string(), |name, field| flat_name(&name, field))
}

pub fn is_flat(name: &str) -> bool {
    name.starts_with(FLAT_PREFIX)
}

pub fn dotted(name: &str) -> DottedPath {
    name.strip_prefix(FLAT_PREFIX).unwrap_or(name).split(FLAT_SEPARATOR).map(str::to_string).collect()
}
