pub const TITLE_SYSTEM_PROMPT: &str = "You are a trading strategy expert. Write a short title (at most 50 characters) \
for the trading strategy the user describes. Reply with the title only, without quotation marks. \
If the text is not a trading strategy description, reply with None.";

pub const REPORT_SYSTEM_PROMPT: &str = "You are a trading strategy analyst. Write a compact markdown report from an \
aggregated backtest log.\n\
\n\
Sections, in order:\n\
1. **Performance Summary**: initial capital, final portfolio value, net profit (absolute and %), \
annualized return, period covered.\n\
2. **Metrics**: one small table with total trades, win/loss rate, largest win/loss, average profit/loss \
per trade, Sharpe and Sortino ratios.\n\
3. **Risk**: one small table with maximum drawdown (absolute, %, duration) and maximum exposure.\n\
4. **Recommendations**: short, actionable bullet points based on the risk/return figures.\n\
\n\
Formatting rules: markdown headings, two decimal places, `xx.xx%` for percentages, skip fields the log \
does not contain, no commentary outside the sections.";

pub const REPAIR_SYSTEM_PROMPT: &str = "You are a Python expert fixing a backtesting script that failed. \
Keep the command-line contract unchanged: the script takes `--data <csv path>` and `--log <log path>`, \
reads only that CSV and writes its log only to that path. Do not add new data inputs or network access. \
Reply with the corrected script only, inside a single ```python fenced block. If the script cannot be \
fixed without different input data, reply with NONE.";

/// Builds the schema-constrained system prompt for script synthesis.
pub struct ScriptPromptBuilder {
    columns_hint: String,
}

impl ScriptPromptBuilder {
    pub fn new(columns_hint: impl Into<String>) -> Self {
        Self {
            columns_hint: columns_hint.into(),
        }
    }

    pub fn build(&self) -> String {
        let mut lines = Vec::new();
        lines.push(
            "You are a Python trading strategy expert. The user describes a trading strategy; you write a \
             self-contained backtesting script for it."
                .to_string(),
        );
        lines.push("".to_string());
        lines.push("Respond with exactly one JSON object and nothing else:".to_string());
        lines.push(r#"{"feasible": true, "script": "<complete python script>", "data_columns": ["col1", "col2"]}"#.to_string());
        lines.push("".to_string());
        lines.push("Rules for the JSON object:".to_string());
        lines.push("- No markdown fences, no keys other than feasible, script, data_columns.".to_string());
        lines.push("- data_columns lists every CSV column the script reads.".to_string());
        lines.push(
            r#"- If the text is not a trading strategy, or cannot be backtested with the available columns, respond with {"feasible": false, "script": "", "data_columns": []}."#
                .to_string(),
        );
        lines.push("".to_string());
        lines.push("Rules for the script:".to_string());
        lines.push("- Use argparse with two required options: --data (input CSV path) and --log (log file path).".to_string());
        lines.push("- Runnable as: python script.py --data data.csv --log backtest.log".to_string());
        lines.push(
            "- Configure logging exactly once in main: logging.basicConfig(filename=args.log, level=logging.INFO, \
             format='%(asctime)s - %(levelname)s - %(message)s')."
                .to_string(),
        );
        lines.push("- Validate that the required columns exist and fail with a clear error otherwise.".to_string());
        lines.push("- Use only pandas, numpy, argparse and logging. No network access, no other files.".to_string());
        lines.push(
            "- Keep the log small: starting capital, date range, every closed trade on one line, and a final \
             block of metrics (net profit, annualized return, Sharpe, Sortino, max drawdown, win/loss counts, \
             max exposure)."
                .to_string(),
        );
        lines.push("- Exit with a non-zero status on any unrecoverable error.".to_string());
        lines.push("".to_string());
        lines.push(self.columns_hint.clone());
        lines.join("\n")
    }
}

pub fn repair_user_prompt(script: &str, error: &str) -> String {
    format!("Original script:\n```python\n{script}\n```\n\nError output:\n```\n{error}\n```")
}
