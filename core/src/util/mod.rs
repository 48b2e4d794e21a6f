mod fast_map;

pub use fast_map::{FastHashMap, FastHashSet, fast_hash_map_with_capacity};
