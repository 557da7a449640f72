//! Rewrites `%(name)s` placeholders into PostgreSQL `$n` parameters.
//!
//! A name used several times binds the same parameter. `%%` stands for a
//! literal percent sign. Any other `%` is copied through unchanged.

use std::collections::BTreeMap;

use crate::domain::ports::{SqlError, SqlValue};

fn is_parameter_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|ch| ch.is_alphanumeric() || ch == '_')
}

/// `sql` with numbered parameters and the values in binding order.
pub fn bind_named(
    sql: &str,
    values: &BTreeMap<String, SqlValue>,
) -> Result<(String, Vec<SqlValue>), SqlError> {
    let mut rewritten = String::with_capacity(sql.len());
    let mut order: Vec<&str> = Vec::new();
    let mut rest = sql;
    while let Some(at) = rest.find('%') {
        let (before, from_percent) = rest.split_at(at);
        rewritten.push_str(before);
        let after = from_percent.get(1..).unwrap_or_default();
        if let Some(tail) = after.strip_prefix('%') {
            rewritten.push('%');
            rest = tail;
            continue;
        }
        let Some((name, tail)) = after
            .strip_prefix('(')
            .and_then(|inner| inner.split_once(")s"))
            .filter(|(name, _)| is_parameter_name(name))
        else {
            rewritten.push('%');
            rest = after;
            continue;
        };
        let index = match order.iter().position(|seen| *seen == name) {
            Some(position) => position + 1,
            None => {
                order.push(name);
                order.len()
            }
        };
        rewritten.push('$');
        rewritten.push_str(&index.to_string());
        rest = tail;
    }
    rewritten.push_str(rest);

    let bound = order
        .into_iter()
        .map(|name| {
            values
                .get(name)
                .cloned()
                .ok_or_else(|| SqlError::query(format!("no value for parameter {name}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rewritten, bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, SqlValue> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), SqlValue::from(*value)))
            .collect()
    }

    #[test]
    fn repeated_names_share_a_parameter() {
        let (sql, bound) = bind_named(
            "SELECT %(a)s, %(b)s, %(a)s",
            &values(&[("a", "1"), ("b", "2")]),
        )
        .expect("bound");
        assert_eq!(sql, "SELECT $1, $2, $1");
        assert_eq!(bound, vec![SqlValue::from("1"), SqlValue::from("2")]);
    }

    #[rstest]
    #[case("SELECT '100%%'", "SELECT '100%'")]
    #[case("SELECT 5 % 2", "SELECT 5 % 2")]
    #[case("SELECT 1", "SELECT 1")]
    #[case("trailing %", "trailing %")]
    #[case("x LIKE '%(a b)s'", "x LIKE '%(a b)s'")]
    fn literal_percents_survive(#[case] sql: &str, #[case] expected: &str) {
        let (rewritten, bound) = bind_named(sql, &BTreeMap::new()).expect("bound");
        assert_eq!(rewritten, expected);
        assert!(bound.is_empty());
    }

    #[test]
    fn casts_after_placeholders_are_kept() {
        let (sql, _) = bind_named("%(s)s::TEXT[] IS NULL", &values(&[("s", "x")])).expect("bound");
        assert_eq!(sql, "$1::TEXT[] IS NULL");
    }

    #[test]
    fn missing_values_are_query_errors() {
        let err = bind_named("SELECT %(absent)s", &BTreeMap::new()).expect_err("unbound");
        assert_eq!(err, SqlError::query("no value for parameter absent"));
    }
}
