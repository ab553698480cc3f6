//! SELECT statement construction.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Build a SELECT statement from its clauses. Empty clauses are omitted.
///
/// `columns` of `None` or an empty slice selects `*`. A HAVING clause needs a
/// GROUP BY clause, and `limit` must be `N` or `N,M`.
///
/// # Examples
///
/// ```
/// use sqlite_session::build_query_string;
///
/// let sql = build_query_string(
///    true,
///    "people",
///    Some(&["name", "age"]),
///    Some("age > ?"),
///    None,
///    None,
///    Some("name"),
///    Some("10"),
/// )
/// .unwrap();
/// assert_eq!(sql, "SELECT DISTINCT name, age FROM people WHERE age > ? ORDER BY name LIMIT 10");
/// ```
#[allow(clippy::too_many_arguments)]
pub fn build_query_string(
   distinct: bool,
   tables: &str,
   columns: Option<&[&str]>,
   where_clause: Option<&str>,
   group_by: Option<&str>,
   having: Option<&str>,
   order_by: Option<&str>,
   limit: Option<&str>,
) -> Result<String> {
   if is_empty(group_by) && !is_empty(having) {
      return Err(Error::InvalidArgument(
         "HAVING clauses are only permitted when using a groupBy clause".to_string(),
      ));
   }
   if let Some(limit) = limit.filter(|l| !l.is_empty())
      && !is_valid_limit(limit)
   {
      return Err(Error::InvalidArgument(format!("invalid LIMIT clauses:{limit}")));
   }

   let mut query = String::with_capacity(120);
   query.push_str("SELECT ");
   if distinct {
      query.push_str("DISTINCT ");
   }
   match columns.filter(|c| !c.is_empty()) {
      Some(columns) => {
         query.push_str(&columns.join(", "));
         query.push(' ');
      }
      None => query.push_str("* "),
   }
   query.push_str("FROM ");
   query.push_str(tables);
   append_clause(&mut query, " WHERE ", where_clause);
   append_clause(&mut query, " GROUP BY ", group_by);
   append_clause(&mut query, " HAVING ", having);
   append_clause(&mut query, " ORDER BY ", order_by);
   append_clause(&mut query, " LIMIT ", limit);

   Ok(query)
}

fn is_empty(clause: Option<&str>) -> bool {
   clause.is_none_or(str::is_empty)
}

fn append_clause(query: &mut String, name: &str, clause: Option<&str>) {
   if let Some(clause) = clause.filter(|c| !c.is_empty()) {
      query.push_str(name);
      query.push_str(clause);
   }
}

fn is_valid_limit(limit: &str) -> bool {
   static RE: OnceLock<Regex> = OnceLock::new();
   let re = RE.get_or_init(|| {
      // `N` or `offset,N`, ASCII digits only
      Regex::new(r"^\s*[0-9]+\s*(,\s*[0-9]+\s*)?$").expect("invalid regex")
   });
   re.is_match(limit)
}

/// Quote `value` as an SQL string literal, doubling embedded single quotes.
pub fn sql_escape_string(value: &str) -> String {
   format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_select_star_when_no_columns() {
      let sql = build_query_string(false, "t", None, None, None, None, None, None).unwrap();
      assert_eq!(sql, "SELECT * FROM t");

      let sql = build_query_string(false, "t", Some(&[]), Some(""), None, None, None, None).unwrap();
      assert_eq!(sql, "SELECT * FROM t");
   }

   #[test]
   fn test_all_clauses_in_order() {
      let sql = build_query_string(
         false,
         "t",
         Some(&["kind", "count(*)"]),
         Some("a = ?"),
         Some("kind"),
         Some("count(*) > 1"),
         Some("kind DESC"),
         Some(" 5 , 10 "),
      )
      .unwrap();
      assert_eq!(
         sql,
         "SELECT kind, count(*) FROM t WHERE a = ? GROUP BY kind HAVING count(*) > 1 ORDER BY kind DESC LIMIT  5 , 10 "
      );
   }

   #[test]
   fn test_having_requires_group_by() {
      let err = build_query_string(false, "t", None, None, None, Some("x > 1"), None, None)
         .unwrap_err();
      assert!(err.to_string().contains("HAVING"));
   }

   #[test]
   fn test_limit_validation() {
      assert!(is_valid_limit("10"));
      assert!(is_valid_limit(" 1,2 "));
      assert!(!is_valid_limit("1,2,3"));
      assert!(!is_valid_limit("ten"));
      assert!(!is_valid_limit("1;DROP TABLE t"));
      assert!(!is_valid_limit(","));
      assert!(!is_valid_limit("\u{0661}\u{0662}"));

      let err = build_query_string(false, "t", None, None, None, None, None, Some("-1"))
         .unwrap_err();
      assert_eq!(err.error_code(), "INVALID_ARGUMENT");
   }

   #[test]
   fn test_sql_escape_string() {
      assert_eq!(sql_escape_string("it's"), "'it''s'");
      assert_eq!(sql_escape_string(""), "''");
   }
}
