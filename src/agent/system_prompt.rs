//! Prompt Composer
//!
//! Builds the system prompt for each invocation: a fixed instruction
//! block plus dynamic context, either a preview of the active table
//! (code mode) or a digest of known tables with the schemas the
//! conversation has touched (SQL mode).

use crate::config::TabulaConfig;
use crate::session::SessionContext;
use crate::types::AgentMode;

/// Instructions for code mode. The sandbox binds the table to `df` and
/// surfaces whatever the script prints.
const CODE_MODE_INSTRUCTIONS: &str = "\
You are a Python+pandas data analysis expert with a strong attention to detail.
You are working with a pandas dataframe. The name of the dataframe is and always will be `df`.
Do not use any libraries other than pandas and matplotlib.
Try not to create intermediate tables; work only on the data provided via the `df` variable.
Use the run_code tool to execute code. Print the values you want to see; only printed output is returned to you.
If you make a mistake, rewrite your code and try again.

If you wish to show a plot to the user, simply call matplotlib's `plt.show()` as normal. You may never call `plt.savefig()`.
The image will be shown automatically to the user.

When you have the answer, reply in plain language without calling any tool.";

/// Instructions for SQL mode.
const SQL_MODE_INSTRUCTIONS: &str = "\
You are a SQL data analysis expert answering questions about a connected database.
Use describe_schema to inspect a table before querying it.
Use run_query to execute SQL. Results longer than the row limit are truncated in what you see; write aggregating queries instead of selecting everything.
Use create_chart to visualize the most recent query result when the user asks for a chart.
If a query fails, read the error, rewrite the query, and try again.

When you have the answer, reply in plain language without calling any tool.";

/// Returned when the model-call ceiling is hit without a final answer.
pub const ITERATION_LIMIT_FALLBACK: &str = "\
I apologize, but it seems I'm unable to solve this problem at the moment. \
However, I can attempt to gather more information or explore alternative \
approaches if you wish. Please let me know how you'd like to proceed, or if \
there's anything else I can assist you with.";

/// Returned when an invocation fails for any unexpected reason.
pub const CRITICAL_FAILURE_FALLBACK: &str =
    "Could not complete your request. Try a different prompt.";

/// Compose the full system prompt for the session's current mode.
pub fn compose_system_prompt(session: &SessionContext, config: &TabulaConfig) -> String {
    match session.mode {
        AgentMode::Code => compose_code_prompt(session, config),
        AgentMode::Sql => compose_sql_prompt(session),
    }
}

fn compose_code_prompt(session: &SessionContext, config: &TabulaConfig) -> String {
    let mut prompt = String::from(CODE_MODE_INSTRUCTIONS);
    if let Some(ref table) = session.table {
        prompt.push_str(&format!(
            "\n\nHere are the first {} rows of `df` (result of `df.head({})`):\n",
            config.preview_rows, config.preview_rows
        ));
        prompt.push_str(&table.preview_text(config.preview_rows));
    }
    prompt
}

fn compose_sql_prompt(session: &SessionContext) -> String {
    let mut prompt = String::from(SQL_MODE_INSTRUCTIONS);

    if !session.known_tables.is_empty() {
        prompt.push_str("\n\nTables in the connected database:\n");
        prompt.push_str(&session.known_tables.join(", "));
    }

    // Schemas the conversation has touched come first; the rest of the
    // cache follows.
    let mut ordered: Vec<&String> = session
        .schema_cache
        .keys()
        .filter(|t| session.important_tables.contains(*t))
        .collect();
    let mut rest: Vec<&String> = session
        .schema_cache
        .keys()
        .filter(|t| !session.important_tables.contains(*t))
        .collect();
    ordered.sort();
    rest.sort();
    ordered.extend(rest);

    for table in ordered {
        if let Some(columns) = session.schema_cache.get(table) {
            prompt.push_str(&format!("\n\nSchema of {}:\n", table));
            for col in columns {
                prompt.push_str(&format!(
                    "  {} {}{}\n",
                    col.name,
                    col.data_type,
                    if col.is_key { " (key)" } else { "" }
                ));
            }
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DataTable;
    use crate::types::{Cell, ColumnInfo};

    #[test]
    fn code_prompt_includes_table_preview() {
        let mut session = SessionContext::new(AgentMode::Code);
        session.table = Some(DataTable::new(
            "sales",
            vec!["Region".into()],
            vec![vec![Cell::Text("north".into())]],
        ));
        let prompt = compose_system_prompt(&session, &TabulaConfig::default());
        assert!(prompt.contains("`df`"));
        assert!(prompt.contains("north"));
    }

    #[test]
    fn sql_prompt_lists_important_schemas_first() {
        let mut session = SessionContext::new(AgentMode::Sql);
        session.known_tables = vec!["orders".into(), "users".into()];
        session.schema_cache.insert(
            "users".into(),
            vec![ColumnInfo {
                name: "id".into(),
                data_type: "int".into(),
                is_key: true,
            }],
        );
        session.schema_cache.insert(
            "orders".into(),
            vec![ColumnInfo {
                name: "total".into(),
                data_type: "float".into(),
                is_key: false,
            }],
        );
        session.important_tables.insert("users".into());

        let prompt = compose_system_prompt(&session, &TabulaConfig::default());
        let users_pos = prompt.find("Schema of users").unwrap();
        let orders_pos = prompt.find("Schema of orders").unwrap();
        assert!(users_pos < orders_pos);
        assert!(prompt.contains("id int (key)"));
    }
}
