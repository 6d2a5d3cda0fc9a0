//! Fixed-value and pattern comparison.

use serde_json::Value;

/// Exact equality, except that numbers compare by value (`1` == `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Whether `value` contains everything in `pattern`.
///
/// Objects match when every pattern property matches; arrays when every
/// pattern item matches some value item; anything else by equality.
pub fn matches_pattern(value: &Value, pattern: &Value) -> bool {
    match (value, pattern) {
        (Value::Object(val_obj), Value::Object(pat_obj)) => pat_obj.iter().all(|(key, pat_val)| {
            val_obj
                .get(key)
                .is_some_and(|val_val| matches_pattern(val_val, pat_val))
        }),
        (Value::Array(val_arr), Value::Array(pat_arr)) => pat_arr
            .iter()
            .all(|pat| val_arr.iter().any(|val| matches_pattern(val, pat))),
        _ => values_equal(value, pattern),
    }
}
