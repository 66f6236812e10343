//! Immutable call definitions.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;
use crate::request::RpcParam;
use crate::shape::ResultShape;

/// Conversion from a raw JSON result into the caller's type.
pub type Converter<R> = Arc<dyn Fn(Value) -> Result<R, RpcError> + Send + Sync>;

/// Description of one RPC operation: method, params, the raw shape the
/// result is expected to have, and how to turn that raw result into `R`.
///
/// A `Call` is built once and can be added to any number of batches.
/// Cloning is cheap; the converter is shared.
pub struct Call<R> {
    method: String,
    params: Vec<RpcParam>,
    shape: ResultShape,
    converter: Converter<R>,
}

impl Call<Value> {
    /// Call returning the raw JSON result unchanged.
    pub fn new(method: &str, params: Vec<RpcParam>) -> Result<Self, RpcError> {
        Self::with_converter(method, params, ResultShape::Any, Ok)
    }
}

impl Call<String> {
    /// Call whose result is a JSON string.
    pub fn string(method: &str, params: Vec<RpcParam>) -> Result<Self, RpcError> {
        Self::typed(method, params, ResultShape::String)
    }
}

impl<T: DeserializeOwned + 'static> Call<T> {
    /// Call whose result is deserialized into `T` with serde.
    pub fn typed(method: &str, params: Vec<RpcParam>, shape: ResultShape) -> Result<Self, RpcError> {
        Self::with_converter(method, params, shape, |raw| {
            serde_json::from_value(raw).map_err(RpcError::from)
        })
    }
}

impl<R> Call<R> {
    /// Call with an explicit converter.
    ///
    /// The method name is trimmed; an empty name is rejected.
    pub fn with_converter<F>(
        method: &str,
        params: Vec<RpcParam>,
        shape: ResultShape,
        converter: F,
    ) -> Result<Self, RpcError>
    where
        F: Fn(Value) -> Result<R, RpcError> + Send + Sync + 'static,
    {
        let method = method.trim();
        if method.is_empty() {
            return Err(RpcError::InvalidCall("method must not be empty".into()));
        }
        Ok(Self {
            method: method.to_string(),
            params,
            shape,
            converter: Arc::new(converter),
        })
    }

    /// Construct from a method name known to be valid at compile time.
    pub(crate) fn known<F>(
        method: &'static str,
        params: Vec<RpcParam>,
        shape: ResultShape,
        converter: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<R, RpcError> + Send + Sync + 'static,
    {
        Self {
            method: method.to_string(),
            params,
            shape,
            converter: Arc::new(converter),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    pub fn shape(&self) -> &ResultShape {
        &self.shape
    }

    /// Run the converter over a raw result.
    pub fn convert(&self, raw: Value) -> Result<R, RpcError> {
        (self.converter)(raw)
    }

    /// Same call with the expected raw shape replaced.
    pub fn with_shape(mut self, shape: ResultShape) -> Self {
        self.shape = shape;
        self
    }
}

impl<R: 'static> Call<R> {
    /// Compose a further conversion step on top of the existing converter.
    pub fn map<U: 'static, F>(self, f: F) -> Call<U>
    where
        F: Fn(R) -> Result<U, RpcError> + Send + Sync + 'static,
    {
        let inner = self.converter;
        Call {
            method: self.method,
            params: self.params,
            shape: self.shape,
            converter: Arc::new(move |raw| inner(raw).and_then(&f)),
        }
    }

    /// Call returning a JSON array whose elements each have this call's
    /// shape and are converted with this call's converter. A `null` result
    /// converts to an empty vector.
    pub fn as_array(self) -> Call<Vec<R>> {
        let inner = self.converter;
        Call {
            method: self.method,
            params: self.params,
            shape: ResultShape::array_of(self.shape),
            converter: Arc::new(move |raw| match raw {
                Value::Null => Ok(Vec::new()),
                Value::Array(items) => items.into_iter().map(|item| inner(item)).collect(),
                other => Err(RpcError::invalid_response(format!(
                    "expected array but received {other}"
                ))),
            }),
        }
    }
}

impl<R> Clone for Call<R> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            params: self.params.clone(),
            shape: self.shape.clone(),
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<R> PartialEq for Call<R> {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.params == other.params && self.shape == other.shape
    }
}

impl<R> fmt::Debug for Call<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl<R> fmt::Display for Call<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_is_trimmed() {
        let call = Call::new("  eth_blockNumber \n", vec![]).unwrap();
        assert_eq!(call.method(), "eth_blockNumber");
    }

    #[test]
    fn empty_method_rejected() {
        let err = Call::new("   ", vec![]).unwrap_err();
        assert!(matches!(err, RpcError::InvalidCall(_)));
    }

    #[test]
    fn equality_ignores_converter() {
        let a = Call::string("eth_getCode", vec![json!("0xabc"), json!("latest")]).unwrap();
        let b = Call::with_converter(
            "eth_getCode",
            vec![json!("0xabc"), json!("latest")],
            ResultShape::String,
            |_| Ok(String::from("ignored")),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_shape(ResultShape::Any));
    }

    #[test]
    fn map_composes_conversions() {
        let call = Call::string("eth_blockNumber", vec![])
            .unwrap()
            .map(|hex| Ok(hex.len()));
        assert_eq!(call.convert(json!("0x1234")).unwrap(), 6);
        assert!(call.convert(json!(5)).is_err());
    }

    #[test]
    fn as_array_converts_each_element() {
        let call = Call::string("eth_accounts", vec![])
            .unwrap()
            .map(|s| Ok(s.to_uppercase()))
            .as_array();
        assert_eq!(call.shape(), &ResultShape::array_of(ResultShape::String));
        assert_eq!(
            call.convert(json!(["0xab", "0xcd"])).unwrap(),
            vec!["0XAB".to_string(), "0XCD".to_string()]
        );
        assert!(call.convert(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn display_lists_params() {
        let call = Call::new("eth_getBalance", vec![json!("0x1"), json!("latest")]).unwrap();
        assert_eq!(call.to_string(), r#"eth_getBalance("0x1", "latest")"#);
    }
}
