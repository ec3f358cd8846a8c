//! Positional marker rewriting.
//!
//! Callers write `?` for every parameter. SQLite and MySQL consume `?`
//! natively; SQL Server wants indexed named markers and PostgreSQL wants
//! numbered markers. Rewriting is strictly left-to-right and textual: a `?`
//! inside a quoted string literal is rewritten like any other. Callers are
//! trusted not to embed literal question marks in SQL text; that limitation
//! is documented rather than solved with a tokenizer.

/// Rewrite each `?` into the indexed named marker the SQL Server driver binds
/// parameters under (`@P1`, `@P2`, ... in occurrence order). Supplied values
/// are bound to the same indexes, so marker N always receives value N.
pub fn to_named_markers(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push_str("@P");
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Rewrite each `?` into `$N`, N counted from 1 in occurrence order, for
/// PostgreSQL.
pub fn to_numbered_markers(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_markers_follow_occurrence_order() {
        assert_eq!(
            to_named_markers("INSERT INTO t (a, b, c) VALUES (?, ?, ?)"),
            "INSERT INTO t (a, b, c) VALUES (@P1, @P2, @P3)"
        );
    }

    #[test]
    fn numbered_markers_follow_occurrence_order() {
        assert_eq!(
            to_numbered_markers("UPDATE t SET a = ?, b = ? WHERE id = ?"),
            "UPDATE t SET a = $1, b = $2 WHERE id = $3"
        );
    }

    #[test]
    fn marker_count_matches_parameter_count() {
        let sql = "SELECT * FROM t WHERE a = ? AND b IN (?, ?, ?) AND c > ?";
        let named = to_named_markers(sql);
        let numbered = to_numbered_markers(sql);
        assert_eq!(named.matches("@P").count(), 5);
        for n in 1..=5 {
            assert!(named.contains(&format!("@P{n}")));
            assert!(numbered.contains(&format!("${n}")));
        }
    }

    #[test]
    fn statements_without_markers_pass_through() {
        let sql = "SELECT 1";
        assert_eq!(to_named_markers(sql), sql);
        assert_eq!(to_numbered_markers(sql), sql);
    }

    #[test]
    fn markers_inside_literals_are_rewritten_too() {
        // Documented limitation: rewriting is purely textual.
        assert_eq!(
            to_numbered_markers("SELECT '?' WHERE a = ?"),
            "SELECT '$1' WHERE a = $2"
        );
    }
}
