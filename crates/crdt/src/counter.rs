//! Replicated counters.
//!
//! A counter accumulates increments commutatively, so concurrent
//! increases from any number of replicas converge without conflict.
//! Addition wraps at the variant width, matching two's-complement
//! behavior across replicas.

use crate::error::{CrdtError, CrdtResult};
use crate::primitive::PrimitiveValue;
use serde::{Deserialize, Serialize};

/// The accumulator, in a 32-bit or 64-bit flavor. The flavor is fixed
/// at creation and increments are coerced into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterValue {
    Int(i32),
    Long(i64),
}

/// A numeric accumulator element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtCounter {
    value: CounterValue,
}

impl CrdtCounter {
    pub fn new(value: CounterValue) -> Self {
        Self { value }
    }

    pub fn value(&self) -> CounterValue {
        self.value
    }

    /// Apply an increment. Only integer primitives are accepted.
    pub fn increase(&mut self, delta: &PrimitiveValue) -> CrdtResult<()> {
        let amount = match delta {
            PrimitiveValue::Integer(i) => *i as i64,
            PrimitiveValue::Long(l) => *l,
            other => {
                return Err(CrdtError::TypeMismatch {
                    expected: "integer",
                    found: other.type_name(),
                })
            }
        };
        self.value = match self.value {
            CounterValue::Int(v) => CounterValue::Int(v.wrapping_add(amount as i32)),
            CounterValue::Long(v) => CounterValue::Long(v.wrapping_add(amount)),
        };
        Ok(())
    }

    pub fn to_json(&self) -> String {
        match self.value {
            CounterValue::Int(v) => v.to_string(),
            CounterValue::Long(v) => v.to_string(),
        }
    }
}
