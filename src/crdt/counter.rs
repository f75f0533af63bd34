//! Commutative numeric counters.
//!
//! Increases commute, so replicas converge no matter the delivery order.
//! An integer counter widens to a long when a sum leaves the `i32` range;
//! long and double counters keep their width (longs wrap).

use crate::crdt::primitive::Primitive;
use crate::crdt::primitive::double_to_json;
use crate::error::Error;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Counter {
    Integer(i32),
    Long(i64),
    Double(f64),
}

impl Counter {
    /// Build a counter from a numeric primitive.
    pub fn from_primitive(value: &Primitive) -> Result<Counter> {
        return match value {
            Primitive::Integer(v) => Ok(Counter::Integer(*v)),
            Primitive::Long(v) => Ok(Counter::Long(*v)),
            Primitive::Double(v) => Ok(Counter::Double(*v)),
            other => Err(Error::Unsupported(format!(
                "counter of {}",
                other.type_name()
            ))),
        };
    }

    pub fn type_name(&self) -> &'static str {
        return match self {
            Counter::Integer(_) => "integer counter",
            Counter::Long(_) => "long counter",
            Counter::Double(_) => "double counter",
        };
    }

    /// Add a numeric operand. Non-numeric operands are rejected untouched.
    pub fn increase(&mut self, operand: &Primitive) -> Result<()> {
        let (whole, real) = match operand {
            Primitive::Integer(v) => (*v as i64, *v as f64),
            Primitive::Long(v) => (*v, *v as f64),
            Primitive::Double(v) => (*v as i64, *v),
            other => {
                return Err(Error::Unsupported(format!(
                    "increase {} by {}",
                    self.type_name(),
                    other.type_name()
                )));
            }
        };

        *self = match *self {
            Counter::Integer(value) => {
                let sum = (value as i64).wrapping_add(whole);
                match i32::try_from(sum) {
                    Ok(narrow) => Counter::Integer(narrow),
                    Err(_) => Counter::Long(sum),
                }
            }
            Counter::Long(value) => Counter::Long(value.wrapping_add(whole)),
            Counter::Double(value) => Counter::Double(value + real),
        };
        return Ok(());
    }

    pub fn to_json(&self) -> String {
        return match self {
            Counter::Integer(value) => value.to_string(),
            Counter::Long(value) => value.to_string(),
            Counter::Double(value) => double_to_json(*value),
        };
    }
}
