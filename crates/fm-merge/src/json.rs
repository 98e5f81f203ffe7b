//! JSON adapter
//!
//! Lets any strategy over JSON input with a serializable output act as a
//! `MergeStrategy<Value, Value>`, so it can be boxed into a [`DynStrategy`],
//! used as a fieldwise per-field strategy, or stored in a registry.

use crate::strategy::{to_json, DynStrategy, MergeError, MergeResult, MergeStrategy};
use fm_value::TaggedValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Strategy whose merged value is converted to JSON
///
/// Agreement deserializes the merged JSON back into `R` and defers to the
/// wrapped strategy; a merged value that does not deserialize never agrees.
pub struct Json<S, R> {
    inner: S,
    output: PhantomData<fn() -> R>,
}

impl<S, R> Json<S, R> {
    /// Wrap a strategy
    #[inline]
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            output: PhantomData,
        }
    }

    /// Wrapped strategy
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Clone, R> Clone for Json<S, R> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl<S: fmt::Debug, R> fmt::Debug for Json<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Json").field(&self.inner).finish()
    }
}

impl<S, R> MergeStrategy<Value, Value> for Json<S, R>
where
    S: MergeStrategy<Value, R>,
    R: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn merge(&self, results: &[TaggedValue<Value>]) -> Result<MergeResult<Value>, MergeError> {
        let merged = self.inner.merge(results)?;
        let value = to_json(self.inner.name(), merged.value.value())?;
        Ok(MergeResult {
            value: merged.value.map(|_| value),
            provenance: merged.provenance,
            conflicts: merged.conflicts,
        })
    }

    fn agrees(&self, branch: &Value, merged: &Value) -> bool {
        serde_json::from_value::<R>(merged.clone()).is_ok_and(|merged| self.inner.agrees(branch, &merged))
    }
}

/// Adapters for strategies
pub trait StrategyExt: Sized {
    /// Adapt into a JSON-to-JSON strategy with output type `R`
    #[must_use]
    fn into_json<R>(self) -> Json<Self, R>
    where
        Self: MergeStrategy<Value, R>,
    {
        Json::new(self)
    }

    /// Box a JSON-to-JSON strategy
    #[must_use]
    fn boxed(self) -> DynStrategy
    where
        Self: MergeStrategy<Value, Value> + 'static,
    {
        Box::new(self)
    }
}

impl<S: fmt::Debug + Send + Sync> StrategyExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{merge, Custom, WeightedAverage};
    use fm_value::TraceId;
    use serde_json::json;

    fn sample(value: Value) -> TaggedValue<Value> {
        TaggedValue::new(value, 0.5, "adapter", TraceId::new()).unwrap()
    }

    #[test]
    fn average_output_becomes_json() {
        let strategy = WeightedAverage::new().into_json::<f64>();
        let merged = merge(&[sample(json!(2)), sample(json!(4))], &strategy).unwrap();
        assert_eq!(merged.value.value(), &json!(3.0));
        assert_eq!(strategy.name(), "weighted-average");
    }

    #[test]
    fn agreement_round_trips_through_output_type() {
        let strategy = WeightedAverage::new().with_tolerance(0.5).into_json::<f64>();
        assert!(strategy.agrees(&json!(3.2), &json!(3.0)));
        assert!(!strategy.agrees(&json!(5), &json!(3.0)));
        assert!(!strategy.agrees(&json!(3.0), &json!("three")));
    }

    #[test]
    fn custom_with_struct_output() {
        #[derive(Debug, Serialize, serde::Deserialize)]
        struct Count {
            n: usize,
        }
        let strategy = Custom::new("count", |values: &[&Value]| Ok(Count { n: values.len() }))
            .into_json::<Count>()
            .boxed();
        let merged = merge(&[sample(json!(1)), sample(json!(2))], &strategy).unwrap();
        assert_eq!(merged.value.value(), &json!({"n": 2}));
    }
}
