//! Function-support introspector (spec §4.8): a per-device tree of which API
//! functions are supported, under which enumerant variants and sensor
//! sub-variants. Built once at registry time from [`crate::registry::Device`]
//! support bitmaps. The iterator API is a plain owned-`Vec` cursor rather
//! than an opaque `void*` context, per the redesign note dropping the
//! C-style caller-managed iterator state.

use std::collections::HashMap;

pub const DEFAULT_VARIANT: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubVariant {
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub value: u64,
    pub sub_variants: Vec<SubVariant>,
}

/// Which functions, and under which variants, a single device supports.
#[derive(Debug, Clone, Default)]
pub struct FunctionTree {
    functions: HashMap<&'static str, Vec<Variant>>,
}

impl FunctionTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, function: &'static str, variant: Variant) {
        self.functions.entry(function).or_default().push(variant);
    }

    /// Inserts a no-variant function, recorded under the sentinel variant.
    pub fn insert_unvaried(&mut self, function: &'static str) {
        self.insert(
            function,
            Variant {
                value: DEFAULT_VARIANT,
                sub_variants: Vec::new(),
            },
        );
    }

    #[must_use]
    pub fn supports(&self, function: &str) -> bool {
        self.functions.contains_key(function)
    }

    /// Opens a cursor over every registered function name.
    #[must_use]
    pub fn function_ids(&self) -> FunctionIdIter {
        FunctionIdIter {
            names: self.functions.keys().copied().collect(),
            position: 0,
        }
    }

    /// Opens a cursor over `function`'s variants, or `None` if the function
    /// isn't registered at all.
    #[must_use]
    pub fn variants(&self, function: &str) -> Option<SubVariantTreeIter> {
        self.functions.get(function).map(|variants| SubVariantTreeIter {
            variants: variants.clone(),
            position: 0,
        })
    }
}

/// Cursor over a [`FunctionTree`]'s registered function names.
pub struct FunctionIdIter {
    names: Vec<&'static str>,
    position: usize,
}

impl FunctionIdIter {
    pub fn next(&mut self) -> Option<&'static str> {
        let name = *self.names.get(self.position)?;
        self.position += 1;
        Some(name)
    }

    #[must_use]
    pub fn value_get(&self) -> Option<&'static str> {
        self.names.get(self.position).copied()
    }
}

/// Cursor over one function's variants, each carrying its own sub-variant
/// cursor.
pub struct SubVariantTreeIter {
    variants: Vec<Variant>,
    position: usize,
}

impl SubVariantTreeIter {
    pub fn next(&mut self) -> Option<&Variant> {
        let variant = self.variants.get(self.position)?;
        self.position += 1;
        Some(variant)
    }

    #[must_use]
    pub fn value_get(&self) -> Option<u64> {
        self.variants.get(self.position).map(|v| v.value)
    }

    #[must_use]
    pub fn sub_variants(&self, variant: &Variant) -> SubVariantIter {
        SubVariantIter {
            sub_variants: variant.sub_variants.clone(),
            position: 0,
        }
    }
}

/// Cursor over one variant's sensor-scoped sub-variants.
pub struct SubVariantIter {
    sub_variants: Vec<SubVariant>,
    position: usize,
}

impl SubVariantIter {
    pub fn next(&mut self) -> Option<SubVariant> {
        let sub = *self.sub_variants.get(self.position)?;
        self.position += 1;
        Some(sub)
    }

    #[must_use]
    pub fn value_get(&self) -> Option<u64> {
        self.sub_variants.get(self.position).map(|s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unvaried_function_is_supported() {
        let mut tree = FunctionTree::new();
        tree.insert_unvaried("dev_vendor_id_get");
        assert!(tree.supports("dev_vendor_id_get"));
        assert!(!tree.supports("dev_power_cap_set"));
    }

    #[test]
    fn function_id_iter_walks_every_name() {
        let mut tree = FunctionTree::new();
        tree.insert_unvaried("a");
        tree.insert_unvaried("b");
        let mut iter = tree.function_ids();
        let mut seen = Vec::new();
        while let Some(name) = iter.next() {
            seen.push(name);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn variant_iter_exposes_sub_variants() {
        let mut tree = FunctionTree::new();
        tree.insert(
            "temp_metric_get",
            Variant {
                value: 0,
                sub_variants: vec![SubVariant { value: 1 }, SubVariant { value: 2 }],
            },
        );
        let mut variants = tree.variants("temp_metric_get").unwrap();
        let variant = variants.next().unwrap().clone();
        let mut subs = variants.sub_variants(&variant);
        assert_eq!(subs.next().unwrap().value, 1);
        assert_eq!(subs.next().unwrap().value, 2);
        assert!(subs.next().is_none());
    }
}
