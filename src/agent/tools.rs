//! Tool System
//!
//! Defines the tools the model can call and dispatches them by name.
//! Tool execution is a big match statement in `execute_tool`; unknown
//! names and bad arguments become error results fed back to the model,
//! never fatal errors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::chart::{self, Aggregation, ChartKind, ChartRequest};
use crate::config::{resolve_path, TabulaConfig};
use crate::session::SessionContext;
use crate::table::render_text;
use crate::types::{
    AgentMode, CodeSandbox, QueryGateway, QueryOutcome, ToolDefinition, ToolDefinitionFunction,
};

/// A tool exposed to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema parameter declaration, sent verbatim to the model.
    pub parameters: Value,
    /// Modes this tool is exposed in.
    pub modes: &'static [AgentMode],
}

/// Create the full tool registry.
pub fn create_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "run_code".to_string(),
            description: "Execute Python code against the dataframe `df`. Only printed output is returned.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Python code to execute. The dataframe is available as `df`."
                    }
                },
                "required": ["code"]
            }),
            modes: &[AgentMode::Code],
        },
        ToolSpec {
            name: "run_query".to_string(),
            description: "Execute a SQL query against the connected database and return the result.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The SQL query to execute"
                    }
                },
                "required": ["query"]
            }),
            modes: &[AgentMode::Sql],
        },
        ToolSpec {
            name: "describe_schema".to_string(),
            description: "Get column metadata and a small row sample for a table.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Name of the table to describe"
                    }
                },
                "required": ["table"]
            }),
            modes: &[AgentMode::Sql],
        },
        ToolSpec {
            name: "create_chart".to_string(),
            description: "Create a chart from the most recent query result. The chart is shown to the user automatically.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "chart_type": { "type": "string", "description": "bar, line, scatter, or pie" },
                    "x_column": { "type": "string", "description": "Column for the x axis / labels" },
                    "y_column": { "type": "string", "description": "Numeric column for the y axis / values" },
                    "aggregation": { "type": "string", "description": "Optional: sum, mean, min, max, or count per x value" },
                    "title": { "type": "string", "description": "Optional chart title" }
                },
                "required": ["chart_type", "x_column", "y_column"]
            }),
            modes: &[AgentMode::Sql],
        },
    ]
}

/// The registry entries exposed in the given mode.
pub fn tools_for_mode(tools: &[ToolSpec], mode: AgentMode) -> Vec<&ToolSpec> {
    tools.iter().filter(|t| t.modes.contains(&mode)).collect()
}

/// Convert tool specs to the wire format the chat-completions API expects.
pub fn tools_to_wire_format(tools: &[&ToolSpec]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            def_type: "function".to_string(),
            function: ToolDefinitionFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

/// Check the argument object against the declared schema: every required
/// key must be present, and every present key with a declared type must
/// match it, optional ones included.
pub fn validate_args(spec: &ToolSpec, args: &Value) -> std::result::Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };
    let properties = spec.parameters["properties"].as_object();
    let required = spec.parameters["required"].as_array();

    if let Some(required) = required {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !object.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    for (key, value) in object {
        let declared = properties
            .and_then(|p| p.get(key))
            .and_then(|p| p["type"].as_str());
        if let Some(declared) = declared {
            let matches = match declared {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !matches {
                return Err(format!("argument '{key}' must be a {declared}"));
            }
        }
    }
    Ok(())
}

/// Everything tool execution needs besides the arguments.
pub struct ToolContext<'a> {
    pub config: &'a TabulaConfig,
    pub gateway: &'a dyn QueryGateway,
    pub sandbox: &'a dyn CodeSandbox,
    pub session: &'a mut SessionContext,
}

/// Result of one tool execution. `arguments` always holds the arguments
/// as the model wrote them, even when the executed form differed.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub result: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ToolOutcome {
    /// The text fed back to the model as the tool result.
    pub fn feedback_text(&self) -> String {
        match self.error {
            Some(ref err) => format!("Error: {err}"),
            None => self.result.clone(),
        }
    }
}

/// Execute a tool call and return the result.
///
/// Lookup-or-error on the name, schema validation on the arguments, then
/// dispatch through a match on the tool name.
pub async fn execute_tool(
    tool_name: &str,
    args: &Value,
    tools: &[ToolSpec],
    ctx: &mut ToolContext<'_>,
) -> ToolOutcome {
    let start = Instant::now();
    let base = |result: String, error: Option<String>| ToolOutcome {
        id: format!("tc_{}", Uuid::new_v4()),
        name: tool_name.to_string(),
        arguments: args.clone(),
        result,
        duration_ms: start.elapsed().as_millis() as u64,
        error,
    };

    let Some(spec) = tools.iter().find(|t| t.name == tool_name) else {
        return base(String::new(), Some(format!("Unknown tool: {tool_name}")));
    };
    if let Err(reason) = validate_args(spec, args) {
        return base(String::new(), Some(reason));
    }

    match execute_tool_inner(tool_name, args, ctx).await {
        Ok(output) => base(output, None),
        Err(err) => base(String::new(), Some(format!("{err:#}"))),
    }
}

async fn execute_tool_inner(
    tool_name: &str,
    args: &Value,
    ctx: &mut ToolContext<'_>,
) -> Result<String> {
    match tool_name {
        "run_code" => {
            let code = args["code"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'code' argument"))?;

            let table = ctx
                .session
                .table
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("No table loaded; upload a file first"))?;

            // Execute the transformed code; the thread keeps the original.
            let rewrite = rewrite_plot_code(code, &resolve_path(&ctx.config.asset_dir));
            let output = ctx.sandbox.run(&rewrite.code, table).await?;

            if output.exit_code != 0 {
                anyhow::bail!(
                    "code exited with status {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                );
            }
            if let Some(chart_id) = rewrite.chart_id {
                ctx.session.pending_chart = Some(chart_id);
            }
            let stdout = output.stdout.trim_end();
            if stdout.is_empty() {
                Ok("(no output)".to_string())
            } else {
                Ok(stdout.to_string())
            }
        }

        "run_query" => {
            let query = args["query"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;

            for table in referenced_tables(query) {
                ctx.session.important_tables.insert(table);
            }

            match ctx.gateway.execute_query(query).await? {
                QueryOutcome::Rows(result) => {
                    let limit = ctx.config.query_row_limit;
                    let mut text = render_text(&result.headers, &result.rows, limit);
                    if result.rows.len() > limit {
                        text.push_str(&format!(
                            "(showing first {limit} of {} rows)\n",
                            result.rows.len()
                        ));
                    }
                    ctx.session.pending_table = Some(result.clone());
                    ctx.session.last_result = Some(result);
                    Ok(text)
                }
                QueryOutcome::Message(message) => Ok(message),
            }
        }

        "describe_schema" => {
            let table = args["table"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'table' argument"))?;

            if !ctx.session.known_tables.is_empty()
                && !ctx.session.known_tables.iter().any(|t| t == table)
            {
                anyhow::bail!("unknown table: {table}");
            }

            let columns = match ctx.session.schema_cache.get(table) {
                Some(cached) => cached.clone(),
                None => {
                    let fresh = ctx.gateway.get_schema(table).await?;
                    ctx.session
                        .schema_cache
                        .insert(table.to_string(), fresh.clone());
                    fresh
                }
            };
            ctx.session.important_tables.insert(table.to_string());

            let mut text = format!("Columns of {table}:\n");
            for col in &columns {
                text.push_str(&format!(
                    "  {} {}{}\n",
                    col.name,
                    col.data_type,
                    if col.is_key { " (key)" } else { "" }
                ));
            }

            // Sample rows are best-effort; schema alone is still useful.
            match ctx.gateway.get_preview(table, 3).await {
                Ok(sample) if !sample.rows.is_empty() => {
                    text.push_str("\nSample rows:\n");
                    text.push_str(&render_text(&sample.headers, &sample.rows, 3));
                }
                Ok(_) => {}
                Err(err) => debug!(table, error = %err, "sample fetch failed"),
            }
            Ok(text)
        }

        "create_chart" => {
            let chart_type = args["chart_type"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'chart_type' argument"))?;
            let x_column = args["x_column"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'x_column' argument"))?;
            let y_column = args["y_column"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'y_column' argument"))?;

            let result = ctx
                .session
                .last_result
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("no query result to chart; run a query first"))?;

            let request = ChartRequest {
                kind: ChartKind::from_str(chart_type)?,
                x_column: x_column.to_string(),
                y_column: y_column.to_string(),
                aggregation: match args["aggregation"].as_str() {
                    Some(a) => Some(Aggregation::from_str(a)?),
                    None => None,
                },
                title: args["title"].as_str().map(str::to_string),
            };

            let asset_dir = PathBuf::from(resolve_path(&ctx.config.asset_dir));
            let name = chart::render_chart(result, &request, &asset_dir)?;
            ctx.session.pending_chart = Some(name);
            Ok("Chart created. It will be shown to the user automatically.".to_string())
        }

        other => anyhow::bail!("Unknown tool: {other}"),
    }
}

/// Result of the silent plot-code rewrite.
pub struct PlotRewrite {
    pub code: String,
    /// Artifact name the rewritten code saves to, when a plot was found.
    pub chart_id: Option<String>,
}

/// Rewrite model-authored plotting code before execution: strip any
/// savefig call the model wrote, redirect `plt.show()` to save into the
/// asset store under a fresh name, and force the headless backend. Code
/// without plotting passes through untouched. The conversation keeps the
/// original text; only the executed form changes.
pub fn rewrite_plot_code(code: &str, asset_dir: &str) -> PlotRewrite {
    if !code.contains("matplotlib") && !code.contains("plt") {
        return PlotRewrite {
            code: code.to_string(),
            chart_id: None,
        };
    }

    let strip_savefig = Regex::new(r"(?m)^\s*plt\.savefig\(.*$").ok();
    let redirect_show = Regex::new(r"(\S*)(plt\.show\(\))").ok();

    let mut rewritten = code.to_string();
    if let Some(re) = strip_savefig {
        rewritten = re.replace_all(&rewritten, "").into_owned();
    }

    let chart_id = format!("{}.png", Uuid::new_v4());
    let mut saved = false;
    if let Some(re) = redirect_show {
        if re.is_match(&rewritten) {
            let target = format!("{asset_dir}/{chart_id}");
            rewritten = re
                .replace_all(&rewritten, format!("${{1}}plt.savefig(\"{target}\")").as_str())
                .into_owned();
            saved = true;
        }
    }

    rewritten = format!("import matplotlib\nmatplotlib.use(\"agg\")\n{rewritten}");
    PlotRewrite {
        code: rewritten,
        chart_id: saved.then_some(chart_id),
    }
}

/// Table names referenced by FROM/JOIN clauses, used to prioritize
/// schema inclusion in the prompt.
pub fn referenced_tables(query: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+["\[]?([A-Za-z_][A-Za-z0-9_.]*)"#) else {
        return Vec::new();
    };
    let mut seen = Vec::new();
    for cap in re.captures_iter(query) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        create_tools()
            .into_iter()
            .find(|t| t.name == "run_query")
            .unwrap()
    }

    #[test]
    fn validate_rejects_missing_and_mistyped_args() {
        let spec = spec();
        assert!(validate_args(&spec, &json!({"query": "SELECT 1"})).is_ok());
        assert!(validate_args(&spec, &json!({})).is_err());
        assert!(validate_args(&spec, &json!({"query": 42})).is_err());
        assert!(validate_args(&spec, &json!("not an object")).is_err());
    }

    #[test]
    fn validate_rejects_mistyped_optional_args() {
        let chart = create_tools()
            .into_iter()
            .find(|t| t.name == "create_chart")
            .unwrap();
        let ok = json!({"chart_type": "bar", "x_column": "a", "y_column": "b"});
        assert!(validate_args(&chart, &ok).is_ok());

        let bad = json!({"chart_type": "bar", "x_column": "a", "y_column": "b", "aggregation": 5});
        let err = validate_args(&chart, &bad).unwrap_err();
        assert!(err.contains("'aggregation'"));
    }

    #[test]
    fn mode_filtering_splits_the_registry() {
        let tools = create_tools();
        let code: Vec<&str> = tools_for_mode(&tools, AgentMode::Code)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(code, vec!["run_code"]);

        let sql: Vec<&str> = tools_for_mode(&tools, AgentMode::Sql)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(sql, vec!["run_query", "describe_schema", "create_chart"]);
    }

    #[test]
    fn rewrite_redirects_show_and_strips_savefig() {
        let code = "plt.savefig(\"evil.png\")\ndf.plot()\nplt.show()";
        let rewrite = rewrite_plot_code(code, "/tmp/assets");
        assert!(rewrite.code.starts_with("import matplotlib\nmatplotlib.use(\"agg\")"));
        assert!(!rewrite.code.contains("evil.png"));
        let chart = rewrite.chart_id.unwrap();
        assert!(rewrite.code.contains(&format!("/tmp/assets/{chart}")));
    }

    #[test]
    fn rewrite_leaves_plain_code_alone() {
        let rewrite = rewrite_plot_code("print(df.shape)", "/tmp/assets");
        assert_eq!(rewrite.code, "print(df.shape)");
        assert!(rewrite.chart_id.is_none());
    }

    #[test]
    fn indented_savefig_is_also_stripped() {
        let code = "if True:\n    plt.savefig(\"/tmp/escape.png\")\nplt.show()";
        let rewrite = rewrite_plot_code(code, "/tmp/assets");
        assert!(!rewrite.code.contains("escape.png"));
        let chart = rewrite.chart_id.unwrap();
        assert!(rewrite.code.contains(&format!("/tmp/assets/{chart}")));
    }

    #[test]
    fn plot_without_show_saves_nothing() {
        let rewrite = rewrite_plot_code("plt.plot(df[\"Sales\"])", "/tmp/assets");
        assert!(rewrite.chart_id.is_none());
        assert!(rewrite.code.contains("matplotlib.use"));
    }

    #[test]
    fn referenced_tables_from_and_join() {
        let tables = referenced_tables(
            "SELECT * FROM orders o JOIN users u ON o.uid = u.id WHERE u.id IN (SELECT id FROM admins)",
        );
        assert_eq!(tables, vec!["orders", "users", "admins"]);
    }
}
