//! Cache-path Filter DSL (§4.6): `{conditions, logic, orderBy, limit, offset,
//! includeFields, excludeFields}` applied to a fetched row list in the fixed
//! order filter → sort → offset → limit → projection.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
struct Condition {
    field: String,
    operator: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderBy {
    field: String,
    #[serde(default = "default_direction")]
    direction: String,
}

fn default_direction() -> String {
    "asc".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilterSpec {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    logic: Option<String>,
    #[serde(default, rename = "orderBy")]
    order_by: Vec<OrderBy>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default, rename = "includeFields")]
    include_fields: Option<Vec<String>>,
    #[serde(default, rename = "excludeFields")]
    exclude_fields: Option<Vec<String>>,
}

/// Applies the Filter DSL carried in `args` to `rows`, in the fixed order
/// filter → sort → offset → limit → projection. `args` that carry no DSL
/// fields pass `rows` through unchanged.
pub fn apply(rows: Vec<Value>, args: &Value) -> Vec<Value> {
    let spec: FilterSpec = serde_json::from_value(args.clone()).unwrap_or_default();

    let mut filtered = filter_rows(rows, &spec);
    sort_rows(&mut filtered, &spec.order_by);

    let offset = spec.offset.unwrap_or(0);
    let after_offset: Vec<Value> = filtered.into_iter().skip(offset).collect();

    let after_limit: Vec<Value> = match spec.limit {
        Some(n) => after_offset.into_iter().take(n).collect(),
        None => after_offset,
    };

    project(after_limit, spec.include_fields.as_deref(), spec.exclude_fields.as_deref())
}

fn filter_rows(rows: Vec<Value>, spec: &FilterSpec) -> Vec<Value> {
    if spec.conditions.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| evaluate_predicate(row, spec))
        .collect()
}

fn evaluate_predicate(row: &Value, spec: &FilterSpec) -> bool {
    let results: Vec<bool> = spec.conditions.iter().map(|c| eval_condition(row, c)).collect();
    match &spec.logic {
        Some(expr) => eval_logic(expr, &results).unwrap_or_else(|| results.iter().all(|r| *r)),
        None => results.iter().all(|r| *r),
    }
}

fn get_field<'a>(row: &'a Value, field: &str) -> Option<&'a Value> {
    let mut cur = row;
    for part in field.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

fn eval_condition(row: &Value, cond: &Condition) -> bool {
    let field_val = get_field(row, &cond.field);
    match cond.operator.as_str() {
        "equals" => field_val == cond.value.as_ref(),
        "not_equals" => field_val != cond.value.as_ref(),
        "contains" => match field_val {
            Some(Value::String(s)) => cond
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            Some(Value::Array(items)) => cond
                .value
                .as_ref()
                .map(|needle| items.contains(needle))
                .unwrap_or(false),
            _ => false,
        },
        "greater_than" => field_val
            .zip(cond.value.as_ref())
            .and_then(|(a, b)| cmp_values(a, b))
            .map(|o| o == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        "less_than" => field_val
            .zip(cond.value.as_ref())
            .and_then(|(a, b)| cmp_values(a, b))
            .map(|o| o == std::cmp::Ordering::Less)
            .unwrap_or(false),
        "in" => match (field_val, &cond.values) {
            (Some(v), Some(values)) => values.contains(v),
            _ => false,
        },
        "not_in" => match (field_val, &cond.values) {
            (Some(v), Some(values)) => !values.contains(v),
            (None, _) => true,
            _ => false,
        },
        "between" => match (field_val, &cond.values) {
            (Some(v), Some(values)) if values.len() == 2 => {
                let above = cmp_values(v, &values[0]).map(|o| o != std::cmp::Ordering::Less).unwrap_or(false);
                let below = cmp_values(v, &values[1]).map(|o| o != std::cmp::Ordering::Greater).unwrap_or(false);
                above && below
            }
            _ => false,
        },
        "is_null" => matches!(field_val, None | Some(Value::Null)),
        "is_not_null" => !matches!(field_val, None | Some(Value::Null)),
        _ => false,
    }
}

fn cmp_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// 1-indexed boolean expression over `AND`/`OR`/parens, e.g. `"1 AND (2 OR 3)"`.
/// Absent entirely, the caller ANDs every condition (§4.6).
fn eval_logic(expr: &str, results: &[bool]) -> Option<bool> {
    let tokens = tokenize(expr);
    let mut pos = 0;
    let value = parse_or(&tokens, &mut pos, results)?;
    if pos == tokens.len() {
        Some(value)
    } else {
        None
    }
}

fn tokenize(expr: &str) -> Vec<String> {
    let spaced = expr.replace('(', " ( ").replace(')', " ) ");
    spaced.split_whitespace().map(str::to_string).collect()
}

fn parse_or(tokens: &[String], pos: &mut usize, results: &[bool]) -> Option<bool> {
    let mut value = parse_and(tokens, pos, results)?;
    while tokens.get(*pos).map(|t| t.eq_ignore_ascii_case("OR")).unwrap_or(false) {
        *pos += 1;
        let rhs = parse_and(tokens, pos, results)?;
        value = value || rhs;
    }
    Some(value)
}

fn parse_and(tokens: &[String], pos: &mut usize, results: &[bool]) -> Option<bool> {
    let mut value = parse_atom(tokens, pos, results)?;
    while tokens.get(*pos).map(|t| t.eq_ignore_ascii_case("AND")).unwrap_or(false) {
        *pos += 1;
        let rhs = parse_atom(tokens, pos, results)?;
        value = value && rhs;
    }
    Some(value)
}

fn parse_atom(tokens: &[String], pos: &mut usize, results: &[bool]) -> Option<bool> {
    let tok = tokens.get(*pos)?;
    if tok == "(" {
        *pos += 1;
        let value = parse_or(tokens, pos, results)?;
        if tokens.get(*pos).map(|t| t.as_str()) != Some(")") {
            return None;
        }
        *pos += 1;
        Some(value)
    } else {
        let index: usize = tok.parse().ok()?;
        *pos += 1;
        results.get(index.checked_sub(1)?).copied()
    }
}

fn sort_rows(rows: &mut [Value], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for ob in order_by {
            let av = get_field(a, &ob.field);
            let bv = get_field(b, &ob.field);
            let ord = match (av, bv) {
                (Some(x), Some(y)) => cmp_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            let ord = if ob.direction.eq_ignore_ascii_case("desc") { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn project(rows: Vec<Value>, include: Option<&[String]>, exclude: Option<&[String]>) -> Vec<Value> {
    if include.is_none() && exclude.is_none() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            let Value::Object(map) = row else { return row };
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if let Some(inc) = include {
                    if !inc.iter().any(|f| f == &k) {
                        continue;
                    }
                }
                if let Some(exc) = exclude {
                    if exc.iter().any(|f| f == &k) {
                        continue;
                    }
                }
                out.insert(k, v);
            }
            Value::Object(out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, n: i64) -> Value {
        serde_json::json!({"id": id, "n": n})
    }

    #[test]
    fn no_dsl_fields_pass_through() {
        let rows = vec![row("a", 1), row("b", 2)];
        let out = apply(rows.clone(), &serde_json::json!({}));
        assert_eq!(out, rows);
    }

    #[test]
    fn absent_logic_ands_all_conditions() {
        let rows = vec![row("a", 1), row("b", 2), row("c", 2)];
        let args = serde_json::json!({
            "conditions": [
                {"field": "n", "operator": "equals", "value": 2},
                {"field": "id", "operator": "not_equals", "value": "b"},
            ]
        });
        let out = apply(rows, &args);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], "c");
    }

    #[test]
    fn logic_expression_with_or_and_parens() {
        let rows = vec![row("a", 1), row("b", 2), row("c", 3)];
        let args = serde_json::json!({
            "conditions": [
                {"field": "n", "operator": "equals", "value": 1},
                {"field": "n", "operator": "equals", "value": 2},
                {"field": "n", "operator": "equals", "value": 3},
            ],
            "logic": "1 OR (2 AND 3)"
        });
        // condition 2 and 3 can never both be true for one row, so only "a" survives.
        let out = apply(rows, &args);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], "a");
    }

    #[test]
    fn between_is_inclusive() {
        let rows = vec![row("a", 1), row("b", 5), row("c", 10), row("d", 11)];
        let args = serde_json::json!({
            "conditions": [{"field": "n", "operator": "between", "values": [1, 10]}]
        });
        let out = apply(rows, &args);
        let ids: Vec<_> = out.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn order_of_operations_is_filter_sort_offset_limit_projection() {
        let rows = vec![row("a", 3), row("b", 1), row("c", 2), row("d", 4)];
        let args = serde_json::json!({
            "orderBy": [{"field": "n", "direction": "asc"}],
            "offset": 1,
            "limit": 2,
            "includeFields": ["id"],
        });
        let out = apply(rows, &args);
        assert_eq!(out, vec![serde_json::json!({"id": "c"}), serde_json::json!({"id": "a"})]);
    }

    #[test]
    fn exclude_fields_drops_named_keys() {
        let rows = vec![row("a", 1)];
        let out = apply(rows, &serde_json::json!({"excludeFields": ["n"]}));
        assert_eq!(out[0], serde_json::json!({"id": "a"}));
    }

    #[test]
    fn is_null_and_is_not_null() {
        let rows = vec![serde_json::json!({"id": "a", "x": null}), serde_json::json!({"id": "b", "x": 1})];
        let nulls = apply(rows.clone(), &serde_json::json!({"conditions": [{"field": "x", "operator": "is_null"}]}));
        assert_eq!(nulls.len(), 1);
        assert_eq!(nulls[0]["id"], "a");

        let not_nulls = apply(rows, &serde_json::json!({"conditions": [{"field": "x", "operator": "is_not_null"}]}));
        assert_eq!(not_nulls.len(), 1);
        assert_eq!(not_nulls[0]["id"], "b");
    }

    #[test]
    fn in_and_not_in_operators() {
        let rows = vec![row("a", 1), row("b", 2), row("c", 3)];
        let in_set = apply(
            rows.clone(),
            &serde_json::json!({"conditions": [{"field": "n", "operator": "in", "values": [1, 3]}]}),
        );
        assert_eq!(in_set.len(), 2);

        let not_in_set = apply(rows, &serde_json::json!({"conditions": [{"field": "n", "operator": "not_in", "values": [1, 3]}]}));
        assert_eq!(not_in_set.len(), 1);
        assert_eq!(not_in_set[0]["id"], "b");
    }
}
