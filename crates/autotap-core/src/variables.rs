//! Session variable storage and the integer arithmetic of `set_variable`.
//!
//! Provides:
//! - `VariableStore`: a plain name → number map
//! - `VariableUpdate`: one `set_variable` mutation (set/add/.../from_variable)
//! - `SharedVariables`: the lock-guarded handle shared by the trigger engine,
//!   the interpreter and any external variable sync

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A stored number. Arithmetic always produces `Int`; `Float` only enters
/// through external `set` calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Int(i64),
    Float(f64),
}

impl VariableValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            VariableValue::Int(n) => *n as f64,
            VariableValue::Float(n) => *n,
        }
    }

    /// Truncating integer view.
    pub fn as_i64(&self) -> i64 {
        match self {
            VariableValue::Int(n) => *n,
            VariableValue::Float(n) => *n as i64,
        }
    }
}

impl From<i64> for VariableValue {
    fn from(n: i64) -> Self {
        VariableValue::Int(n)
    }
}

impl From<i32> for VariableValue {
    fn from(n: i32) -> Self {
        VariableValue::Int(n as i64)
    }
}

impl From<f64> for VariableValue {
    fn from(n: f64) -> Self {
        VariableValue::Float(n)
    }
}

/// Operator of the `from_variable` calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalcOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "floordiv", alias = "//")]
    FloorDiv,
}

/// How a `set_variable` action changes its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum VariableOp {
    Set { value: i64 },
    Add { value: i64 },
    Subtract { value: i64 },
    Multiply { value: i64 },
    Divide { value: i64 },
    FromVariable {
        source_name: String,
        calc_op: CalcOp,
        operand: i64,
    },
}

/// A complete `set_variable` mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableUpdate {
    pub variable: String,
    #[serde(flatten)]
    pub op: VariableOp,
}

/// Arithmetic failures. The update is skipped, the store is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    #[error("division by zero while updating {0}")]
    DivisionByZero(String),
    #[error("source variable not found: {0}")]
    MissingSource(String),
}

/// Storage for session variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableStore {
    values: HashMap<String, VariableValue>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<VariableValue> {
        self.values.get(name).copied()
    }

    pub fn set<V: Into<VariableValue>>(&mut self, name: &str, value: V) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<VariableValue> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn snapshot(&self) -> HashMap<String, VariableValue> {
        self.values.clone()
    }

    /// Apply an update and return the new value.
    ///
    /// Missing targets start at 0 for add/subtract and at 1 for multiply/divide.
    pub fn apply(&mut self, update: &VariableUpdate) -> Result<i64, VariableError> {
        let name = update.variable.as_str();
        let current = |default: i64| self.get(name).map(|v| v.as_i64()).unwrap_or(default);

        let value = match &update.op {
            VariableOp::Set { value } => *value,
            VariableOp::Add { value } => current(0).wrapping_add(*value),
            VariableOp::Subtract { value } => current(0).wrapping_sub(*value),
            VariableOp::Multiply { value } => current(1).wrapping_mul(*value),
            VariableOp::Divide { value } => floor_div(current(1), *value)
                .ok_or_else(|| VariableError::DivisionByZero(name.to_string()))?,
            VariableOp::FromVariable {
                source_name,
                calc_op,
                operand,
            } => {
                let source = self
                    .get(source_name)
                    .ok_or_else(|| VariableError::MissingSource(source_name.clone()))?
                    .as_i64();
                match calc_op {
                    CalcOp::Add => source.wrapping_add(*operand),
                    CalcOp::Subtract => source.wrapping_sub(*operand),
                    CalcOp::Multiply => source.wrapping_mul(*operand),
                    CalcOp::FloorDiv => floor_div(source, *operand)
                        .ok_or_else(|| VariableError::DivisionByZero(name.to_string()))?,
                }
            }
        };

        self.values.insert(name.to_string(), VariableValue::Int(value));
        Ok(value)
    }
}

/// Integer division rounding toward negative infinity. `None` on zero divisor.
fn floor_div(lhs: i64, rhs: i64) -> Option<i64> {
    if rhs == 0 {
        return None;
    }
    let quotient = lhs.wrapping_div(rhs);
    if lhs.wrapping_rem(rhs) != 0 && ((lhs < 0) != (rhs < 0)) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

/// Lock-guarded store handle shared across workers.
///
/// Every read-modify-write holds the lock for its whole duration, so the poll
/// loop and a playback worker never lose each other's updates.
#[derive(Debug, Clone, Default)]
pub struct SharedVariables {
    inner: Arc<Mutex<VariableStore>>,
}

impl SharedVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_store(store: VariableStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the store. A poisoned lock is recovered; the map stays consistent
    /// because every mutation is a single insert.
    pub fn lock(&self) -> MutexGuard<'_, VariableStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<VariableValue> {
        self.lock().get(name)
    }

    pub fn set<V: Into<VariableValue>>(&self, name: &str, value: V) {
        self.lock().set(name, value);
    }

    pub fn apply(&self, update: &VariableUpdate) -> Result<i64, VariableError> {
        self.lock().apply(update)
    }

    pub fn snapshot(&self) -> HashMap<String, VariableValue> {
        self.lock().snapshot()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(variable: &str, op: VariableOp) -> VariableUpdate {
        VariableUpdate {
            variable: variable.to_string(),
            op,
        }
    }

    #[test]
    fn test_basic_arithmetic() {
        let mut store = VariableStore::new();

        assert_eq!(store.apply(&update("hp", VariableOp::Set { value: 10 })), Ok(10));
        assert_eq!(store.apply(&update("hp", VariableOp::Add { value: 5 })), Ok(15));
        assert_eq!(store.apply(&update("hp", VariableOp::Subtract { value: 3 })), Ok(12));
        assert_eq!(store.apply(&update("hp", VariableOp::Multiply { value: 2 })), Ok(24));
        assert_eq!(store.apply(&update("hp", VariableOp::Divide { value: 5 })), Ok(4));
        assert_eq!(store.get("hp"), Some(VariableValue::Int(4)));
    }

    #[test]
    fn test_missing_target_defaults() {
        let mut store = VariableStore::new();
        assert_eq!(store.apply(&update("a", VariableOp::Add { value: 3 })), Ok(3));
        assert_eq!(store.apply(&update("b", VariableOp::Subtract { value: 3 })), Ok(-3));
        assert_eq!(store.apply(&update("c", VariableOp::Multiply { value: 7 })), Ok(7));
        assert_eq!(store.apply(&update("d", VariableOp::Divide { value: 2 })), Ok(0));
    }

    #[test]
    fn test_divide_by_zero_leaves_value_unchanged() {
        let mut store = VariableStore::new();
        store.set("gold", 42);

        let result = store.apply(&update("gold", VariableOp::Divide { value: 0 }));
        assert_eq!(result, Err(VariableError::DivisionByZero("gold".into())));
        assert_eq!(store.get("gold"), Some(VariableValue::Int(42)));
    }

    #[test]
    fn test_float_values_are_truncated() {
        let mut store = VariableStore::new();
        store.set("ratio", 7.9);
        assert_eq!(store.apply(&update("ratio", VariableOp::Add { value: 1 })), Ok(8));
        assert_eq!(store.get("ratio"), Some(VariableValue::Int(8)));
    }

    #[test]
    fn test_floor_division_rounds_down() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(-8, 2), Some(-4));
        assert_eq!(floor_div(1, 0), None);
    }

    #[test]
    fn test_from_variable() {
        let mut store = VariableStore::new();
        store.set("base", 9);

        let op = VariableOp::FromVariable {
            source_name: "base".into(),
            calc_op: CalcOp::FloorDiv,
            operand: 2,
        };
        assert_eq!(store.apply(&update("half", op)), Ok(4));

        let op = VariableOp::FromVariable {
            source_name: "base".into(),
            calc_op: CalcOp::Multiply,
            operand: 3,
        };
        assert_eq!(store.apply(&update("triple", op)), Ok(27));
    }

    #[test]
    fn test_from_variable_failures_skip() {
        let mut store = VariableStore::new();
        store.set("target", 1);

        let missing = VariableOp::FromVariable {
            source_name: "nope".into(),
            calc_op: CalcOp::Add,
            operand: 1,
        };
        assert_eq!(
            store.apply(&update("target", missing)),
            Err(VariableError::MissingSource("nope".into()))
        );

        store.set("src", 5);
        let by_zero = VariableOp::FromVariable {
            source_name: "src".into(),
            calc_op: CalcOp::FloorDiv,
            operand: 0,
        };
        assert!(store.apply(&update("target", by_zero)).is_err());
        assert_eq!(store.get("target"), Some(VariableValue::Int(1)));
    }

    #[test]
    fn test_update_serde_shape() {
        let json = r#"{"variable":"hp","operation":"from_variable","source_name":"max_hp","calc_op":"//","operand":2}"#;
        let parsed: VariableUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.variable, "hp");
        assert!(matches!(
            parsed.op,
            VariableOp::FromVariable { calc_op: CalcOp::FloorDiv, operand: 2, .. }
        ));

        let json = r#"{"variable":"hp","operation":"add","value":5}"#;
        let parsed: VariableUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.op, VariableOp::Add { value: 5 });
    }

    #[test]
    fn test_shared_variables_concurrent_adds() {
        let shared = SharedVariables::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let vars = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        vars.apply(&update("n", VariableOp::Add { value: 1 })).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.get("n"), Some(VariableValue::Int(1000)));
    }
}
