use std::collections::HashMap;

use crate::error::TableError;
use crate::table::Table;
use crate::value::Value;

/// Suffix for right-hand columns whose name collides with a left column.
pub const RIGHT_SUFFIX: &str = "_right";

/// Left outer join on pairwise key columns.
///
/// Every left row appears at least once: once per matching right row, or
/// once with empty right cells when nothing matches. Right key columns are
/// not repeated in the output (the left keys carry the value).
pub fn join_left(
    left: &Table,
    right: &Table,
    left_keys: &[String],
    right_keys: &[String],
) -> Result<Table, TableError> {
    if left_keys.len() != right_keys.len() || left_keys.is_empty() {
        return Err(TableError::KeyArity {
            left: left_keys.len(),
            right: right_keys.len(),
        });
    }
    let l_idx: Vec<usize> = left_keys
        .iter()
        .map(|k| left.require_column(k))
        .collect::<Result<_, _>>()?;
    let r_idx: Vec<usize> = right_keys
        .iter()
        .map(|k| right.require_column(k))
        .collect::<Result<_, _>>()?;

    let carried: Vec<usize> = (0..right.column_count())
        .filter(|i| !r_idx.contains(i))
        .collect();

    let carried_names: Vec<&String> = carried.iter().map(|&i| &right.columns()[i]).collect();
    let mut columns = left.columns().to_vec();
    for name in &carried_names {
        if !columns.contains(*name) {
            columns.push((*name).clone());
            continue;
        }
        // `V_right`, then `V_right.1`, ... skipping names either side already uses
        let base = format!("{name}{RIGHT_SUFFIX}");
        let mut renamed = base.clone();
        let mut n = 1;
        while columns.contains(&renamed) || carried_names.iter().any(|c| **c == renamed) {
            renamed = format!("{base}.{n}");
            n += 1;
        }
        columns.push(renamed);
    }

    let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (row_no, row) in right.rows().iter().enumerate() {
        let key: Vec<String> = r_idx.iter().map(|i| row[*i].key()).collect();
        index.entry(key).or_default().push(row_no);
    }

    let mut out = Table::new(columns)?;
    for row in left.rows() {
        let key: Vec<String> = l_idx.iter().map(|i| row[*i].key()).collect();
        match index.get(&key) {
            Some(matches) => {
                for &m in matches {
                    let mut joined = row.clone();
                    joined.extend(carried.iter().map(|&i| right.rows()[m][i].clone()));
                    out.push_row(joined)?;
                }
            }
            None => {
                let mut joined = row.clone();
                joined.extend(std::iter::repeat(Value::Empty).take(carried.len()));
                out.push_row(joined)?;
            }
        }
    }
    Ok(out)
}

/// Reorder to a configured schema: configured columns that exist keep the
/// configured order, everything else is dropped.
pub fn reorder<S: AsRef<str>>(table: &Table, schema: &[S]) -> Table {
    table.project(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn t(cols: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table::with_rows(cols.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn left_join_on_differently_named_keys() {
        let volume = t(
            &["Entrega", "Familia", "Cajas"],
            vec![
                vec![text("1"), text("C&B"), Value::Number(10.0)],
                vec![text("2"), text("BNA"), Value::Number(5.0)],
            ],
        );
        let returns = t(
            &["Entrega", "Segmento", "No Entregas"],
            vec![vec![Value::Number(1.0), text("C&B"), Value::Number(1.0)]],
        );
        let out = join_left(
            &volume,
            &returns,
            &keys(&["Entrega", "Familia"]),
            &keys(&["Entrega", "Segmento"]),
        )
        .unwrap();
        assert_eq!(out.columns(), &["Entrega", "Familia", "Cajas", "No Entregas"].map(String::from));
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.rows()[0][3], Value::Number(1.0));
        assert_eq!(out.rows()[1][3], Value::Empty);
    }

    #[test]
    fn multiple_matches_fan_out_and_collisions_get_suffix() {
        let left = t(&["K", "V"], vec![vec![text("a"), text("l")]]);
        let right = t(
            &["K", "V"],
            vec![vec![text("a"), text("r1")], vec![text("a"), text("r2")]],
        );
        let out = join_left(&left, &right, &keys(&["K"]), &keys(&["K"])).unwrap();
        assert_eq!(out.columns(), &["K", "V", "V_right"].map(String::from));
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.rows()[1][2], text("r2"));
    }

    #[test]
    fn suffixed_name_already_taken_gets_a_counter() {
        let left = t(&["K", "V", "V_right"], vec![vec![text("a"), text("l"), text("lr")]]);
        let right = t(&["K", "V"], vec![vec![text("a"), text("r")]]);
        let out = join_left(&left, &right, &keys(&["K"]), &keys(&["K"])).unwrap();
        assert_eq!(out.columns(), &["K", "V", "V_right", "V_right.1"].map(String::from));
        assert_eq!(out.rows()[0][3], text("r"));

        let right = t(&["K", "V", "V_right"], vec![vec![text("a"), text("r"), text("rr")]]);
        let left = t(&["K", "V"], vec![vec![text("a"), text("l")]]);
        let out = join_left(&left, &right, &keys(&["K"]), &keys(&["K"])).unwrap();
        assert_eq!(out.columns(), &["K", "V", "V_right.1", "V_right"].map(String::from));
    }

    #[test]
    fn key_arity_mismatch() {
        let a = t(&["K"], vec![]);
        assert!(matches!(
            join_left(&a, &a, &keys(&["K"]), &keys(&[])),
            Err(TableError::KeyArity { left: 1, right: 0 })
        ));
    }

    #[test]
    fn reorder_omits_unknown_and_drops_unlisted() {
        let table = t(&["B", "X", "A"], vec![vec![text("b"), text("x"), text("a")]]);
        let out = reorder(&table, &["A", "Missing", "B"]);
        assert_eq!(out.columns(), &["A", "B"].map(String::from));
        assert_eq!(out.rows()[0], vec![text("a"), text("b")]);
    }
}
