use serde::Serialize;

/// Serialize a value as canonical JSON: object keys sorted, no
/// insignificant whitespace.
///
/// Recipes are compared byte-wise downstream, so everything that ends up
/// inside one must pass through here. Sorting comes from routing the value
/// through `serde_json::Value`, whose object representation is a `BTreeMap`.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let tree = serde_json::to_value(value)?;
    serde_json::to_string(&tree)
}
