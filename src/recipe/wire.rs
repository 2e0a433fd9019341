//! Number rendering for outbound JSON. Integral values go out without a
//! fractional part (`90`, not `90.0`), the way the device backend writes them.

use serde::ser::{Serialize, SerializeSeq, Serializer};

// Beyond 2^53 an f64 no longer maps onto a unique integer.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// `serialize_with` helper for a single `f64` field.
pub fn number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let value = *value;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < EXACT_INTEGER_LIMIT {
        serializer.serialize_i64(value as i64)
    } else {
        serializer.serialize_f64(value)
    }
}

struct Number(f64);

impl Serialize for Number {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        number(&self.0, serializer)
    }
}

/// A borrowed list of numbers rendered like [`number`].
pub struct Numbers<'a>(pub &'a [f64]);

impl Serialize for Numbers<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for value in self.0 {
            seq.serialize_element(&Number(*value))?;
        }
        seq.end()
    }
}
