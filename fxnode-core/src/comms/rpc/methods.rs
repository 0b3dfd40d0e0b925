//! Explicit method table for the RPC server.

use crate::comms::address::Address;
use crate::error::RpcError;
use fxnode::{Value, ValueMap};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcArgs {
    pub args: Vec<Value>,
    pub kwargs: ValueMap,
}

impl RpcArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Sets a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Looks an argument up by position, then by keyword.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }

    pub fn required(&self, index: usize, name: &str) -> Result<&Value, RpcError> {
        self.get(index, name)
            .ok_or_else(|| RpcError::invalid_arguments(format!("missing argument '{}'", name)))
    }

    pub fn string(&self, index: usize, name: &str) -> Result<String, RpcError> {
        let value = self.required(index, name)?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            RpcError::invalid_arguments(format!("'{}' must be a string, got {}", name, value))
        })
    }

    pub fn address(&self, index: usize, name: &str) -> Result<Address, RpcError> {
        Address::from_value(self.required(index, name)?)
            .map_err(|e| RpcError::invalid_arguments(format!("'{}': {}", name, e)))
    }
}

impl From<Vec<Value>> for RpcArgs {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: ValueMap::new(),
        }
    }
}

pub type MethodHandler = Arc<dyn Fn(RpcArgs) -> Result<Value, RpcError> + Send + Sync>;

/// Name to handler map, fixed once the server starts.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(RpcArgs) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Merges `other` into this table; entries of `other` win.
    pub fn extend(&mut self, other: MethodTable) {
        self.methods.extend(other.methods);
    }

    pub fn call(&self, name: &str, args: RpcArgs) -> Result<Value, RpcError> {
        match self.methods.get(name) {
            Some(handler) => handler(args),
            None => Err(RpcError::MethodNotFound(name.to_string())),
        }
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

/// Table with the `echo` method every node answers.
pub fn base_methods() -> MethodTable {
    let mut table = MethodTable::new();
    table.register("echo", |args: RpcArgs| {
        Ok(args.get(0, "value").cloned().unwrap_or_default())
    });
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_then_keyword_lookup() {
        let args = RpcArgs::new().arg("a").kwarg("address", Address::new("h", 1));
        assert_eq!(args.string(0, "name").unwrap(), "a");
        assert_eq!(args.address(1, "address").unwrap(), Address::new("h", 1));
        assert!(matches!(args.string(2, "other"), Err(RpcError::InvalidArguments(_))));
    }

    #[test]
    fn test_unknown_method() {
        let table = base_methods();
        let err = table.call("missing", RpcArgs::new()).unwrap_err();
        assert_eq!(err.to_string(), "method not found: missing");
    }

    #[test]
    fn test_echo() {
        let table = base_methods();
        let value = table
            .call("echo", RpcArgs::from(vec![Value::from("ping")]))
            .unwrap();
        assert_eq!(value, Value::from("ping"));
        assert_eq!(table.call("echo", RpcArgs::new()).unwrap(), Value::Nil);
    }
}
