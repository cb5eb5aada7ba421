// src/sandbox/convert.rs

//! Host ↔ Lua value translation.
//!
//! Host values are copied into fresh Lua values on the way in. On the way
//! out a table becomes an array only when its keys are exactly `1..=n`;
//! every other table (including the empty one) becomes a mapping with sorted
//! keys.

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::{Map, Number, Value};

/// Nesting bound for the way out; also stops self-referencing tables.
const MAX_DEPTH: usize = 64;

pub fn to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Number(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.raw_set(k.as_str(), to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

pub fn from_lua(value: &LuaValue) -> Result<Value, String> {
    from_lua_at(value, 0)
}

fn from_lua_at(value: &LuaValue, depth: usize) -> Result<Value, String> {
    if depth > MAX_DEPTH {
        return Err("returned value is nested too deeply".to_string());
    }
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
        LuaValue::Integer(i) => Ok(Value::from(*i)),
        LuaValue::Number(f) => Ok(Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)),
        LuaValue::String(s) => Ok(Value::String(s.to_string_lossy())),
        LuaValue::Table(t) => table_to_value(t, depth),
        other => Err(format!("cannot convert Lua {} to a value", other.type_name())),
    }
}

fn table_to_value(table: &Table, depth: usize) -> Result<Value, String> {
    let mut entries: Vec<(LuaValue, LuaValue)> = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        entries.push(pair.map_err(|e| e.to_string())?);
    }

    if entries.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    if let Some(indices) = sequence_indices(&entries) {
        let mut items = vec![Value::Null; entries.len()];
        for ((_, v), idx) in entries.iter().zip(indices) {
            items[idx] = from_lua_at(v, depth + 1)?;
        }
        return Ok(Value::Array(items));
    }

    let mut map = Map::new();
    for (k, v) in &entries {
        let key = match k {
            LuaValue::String(s) => s.to_string_lossy(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(f) => f.to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            other => return Err(format!("unsupported table key type {}", other.type_name())),
        };
        map.insert(key, from_lua_at(v, depth + 1)?);
    }
    Ok(Value::Object(map))
}

/// Zero-based positions when the keys are exactly `1..=n`.
fn sequence_indices(entries: &[(LuaValue, LuaValue)]) -> Option<Vec<usize>> {
    let n = entries.len();
    let mut seen = vec![false; n];
    let mut out = Vec::with_capacity(n);
    for (k, _) in entries {
        let i = match k {
            LuaValue::Integer(i) => *i,
            LuaValue::Number(f) if f.fract() == 0.0 => *f as i64,
            _ => return None,
        };
        if i < 1 || i as usize > n {
            return None;
        }
        let idx = (i - 1) as usize;
        if seen[idx] {
            return None;
        }
        seen[idx] = true;
        out.push(idx);
    }
    Some(out)
}
