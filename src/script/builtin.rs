//! Built-in script engine.
//!
//! [`BuiltinScriptTools`] evaluates the call-expression subset of scripts
//! that postprocessing and simple SCRIPT templates use:
//!
//! ```text
//! trim(resultString)
//! return removeQuotes(unwrapResult(answer));
//! uppercase("literal")
//! ```
//!
//! Identifiers resolve to script parameters; functions come from a registry
//! of text helpers plus any closures registered by the caller.

use super::{ScriptExecutionOptions, ScriptExecutionTools};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Languages this engine accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &["javascript", "typescript", "builtin"];

/// A text function callable from scripts.
pub type ScriptFunction = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// Common boilerplate prefixes that LLMs add to responses.
const SIMPLE_PREFIXES: &[&str] = &[
    "Sure! ",
    "Sure, ",
    "Sure.\n",
    "Of course! ",
    "Of course, ",
    "Of course.\n",
    "Certainly! ",
    "Certainly, ",
    "Certainly.\n",
    "Absolutely! ",
    "Absolutely, ",
];

/// Prefixes that consume up to the next newline or colon.
const LINE_PREFIXES: &[&str] = &["Here's ", "Here is ", "The answer is "];

/// Matching quote pairs removed by `removeQuotes`.
const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('`', '`'),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
    ('\u{00AB}', '\u{00BB}'),
];

/// Script engine with a registry of named text functions.
///
/// # Example
///
/// ```
/// use prompt_pipeline::script::BuiltinScriptTools;
///
/// let tools = BuiltinScriptTools::new()
///     .register("exclaim", |text: &str| Ok(format!("{}!", text)));
/// assert!(tools.has_function("exclaim"));
/// assert!(tools.has_function("trim"));
/// ```
#[derive(Clone)]
pub struct BuiltinScriptTools {
    functions: BTreeMap<String, ScriptFunction>,
}

impl BuiltinScriptTools {
    /// Engine with the built-in text functions.
    pub fn new() -> Self {
        let mut tools = Self {
            functions: BTreeMap::new(),
        };
        tools.insert("trim", |t| Ok(t.trim().to_string()));
        tools.insert("uppercase", |t| Ok(t.to_uppercase()));
        tools.insert("lowercase", |t| Ok(t.to_lowercase()));
        tools.insert("removeThinkTags", |t| Ok(strip_think_tags(t).trim().to_string()));
        tools.insert("trimCodeBlock", |t| Ok(trim_code_block(t)));
        tools.insert("trimEndOfCodeBlock", |t| Ok(trim_end_of_code_block(t)));
        tools.insert("unwrapResult", |t| Ok(unwrap_result(t)));
        tools.insert("removeQuotes", |t| Ok(remove_quotes(t)));
        tools.insert("removeMarkdownFormatting", |t| {
            Ok(remove_markdown_formatting(t))
        });
        tools
    }

    fn insert(
        &mut self,
        name: &str,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) {
        self.functions.insert(name.to_string(), Arc::new(f));
    }

    /// Register a function; replaces any function with the same name.
    pub fn register(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Names of all callable functions.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    fn evaluate(&self, expr: &Expr, parameters: &BTreeMap<String, String>) -> Result<String> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => parameters.get(name).cloned().ok_or_else(|| {
                PipelineError::Script(format!("Variable '{}' is not defined", name))
            }),
            Expr::Call(name, argument) => {
                let function = self.functions.get(name).ok_or_else(|| {
                    PipelineError::Script(format!("Function '{}' is not defined", name))
                })?;
                let argument = self.evaluate(argument, parameters)?;
                function(&argument).map_err(|e| {
                    PipelineError::Script(format!("Function '{}' failed: {}", name, e))
                })
            }
        }
    }
}

impl Default for BuiltinScriptTools {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuiltinScriptTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinScriptTools")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ScriptExecutionTools for BuiltinScriptTools {
    fn title(&self) -> &str {
        "Builtin"
    }

    async fn execute(&self, options: ScriptExecutionOptions) -> Result<String> {
        let language = options.script_language.to_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Err(PipelineError::Script(format!(
                "Script language '{}' is not supported",
                options.script_language
            )));
        }
        let expr = parse_script(&options.script)?;
        self.evaluate(&expr, &options.parameters)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(String),
    Variable(String),
    Call(String, Box<Expr>),
}

/// Parse `[return] expr[;]`.
fn parse_script(script: &str) -> Result<Expr> {
    let mut body = script.trim();
    body = body.strip_suffix(';').unwrap_or(body).trim_end();
    if let Some(rest) = body.strip_prefix("return ") {
        body = rest.trim_start();
    }
    let (expr, rest) = parse_expr(body)?;
    if !rest.trim().is_empty() {
        return Err(PipelineError::Script(format!(
            "Unexpected trailing input '{}' in script '{}'",
            rest.trim(),
            script.trim()
        )));
    }
    Ok(expr)
}

fn parse_expr(input: &str) -> Result<(Expr, &str)> {
    let input = input.trim_start();
    if let Some(rest) = input.strip_prefix('"') {
        return parse_string_literal(rest);
    }

    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(input.len());
    if end == 0 {
        return Err(PipelineError::Script(format!(
            "Expected an identifier at '{}'",
            input
        )));
    }
    let (name, rest) = input.split_at(end);
    let rest = rest.trim_start();

    match rest.strip_prefix('(') {
        Some(args) => {
            let (argument, rest) = parse_expr(args)?;
            let rest = rest.trim_start().strip_prefix(')').ok_or_else(|| {
                PipelineError::Script(format!("Expected ')' after argument of '{}'", name))
            })?;
            Ok((Expr::Call(name.to_string(), Box::new(argument)), rest))
        }
        None => Ok((Expr::Variable(name.to_string()), rest)),
    }
}

fn parse_string_literal(input: &str) -> Result<(Expr, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((Expr::Literal(value), &input[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, other)) => value.push(other),
                None => break,
            },
            other => value.push(other),
        }
    }
    Err(PipelineError::Script("Unterminated string literal".to_string()))
}

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// Handles complete blocks, incomplete blocks (no closing tag),
/// and multiple sequential blocks.
pub fn strip_think_tags(text: &str) -> String {
    let result = strip_tag_variant(text, "<think>", "</think>");
    strip_tag_variant(&result, "<thinking>", "</thinking>")
}

/// Strip a specific open/close tag pair from text.
fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        if let Some(end_offset) = result[start..].find(close) {
            let end = start + end_offset + close.len();
            result = format!("{}{}", &result[..start], &result[end..]);
        } else {
            // No closing tag: strip from open tag to end
            result.truncate(start);
            break;
        }
    }
    result
}

/// If the whole text is one fenced code block, return its content.
pub fn trim_code_block(text: &str) -> String {
    let trimmed = text.trim();
    let Some(after_fence) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(inner) = after_fence.strip_suffix("```") else {
        return trimmed.to_string();
    };
    // First line after the opening fence is the language hint.
    match inner.find('\n') {
        Some(line_end) => inner[line_end + 1..].trim().to_string(),
        None => inner.trim().to_string(),
    }
}

/// Remove a closing fence left at the end of the text.
pub fn trim_end_of_code_block(text: &str) -> String {
    let trimmed = text.trim_end();
    trimmed
        .strip_suffix("```")
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

/// Remove matching quotes around the whole text.
pub fn remove_quotes(text: &str) -> String {
    let trimmed = text.trim();
    for (open, close) in QUOTE_PAIRS {
        if let Some(inner) = trimmed
            .strip_prefix(*open)
            .and_then(|rest| rest.strip_suffix(*close))
        {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

/// Extract the answer from a chatty response.
///
/// Strips think blocks, boilerplate prefixes ("Sure! ", "Here's the
/// answer:") and quotes around the remaining text.
pub fn unwrap_result(text: &str) -> String {
    let cleaned = strip_think_tags(text);
    let cleaned = cleaned.trim();
    let mut result = cleaned;

    for prefix in SIMPLE_PREFIXES {
        if let Some(rest) = result.strip_prefix(prefix) {
            result = rest;
            break;
        }
    }

    // Only if no simple prefix was stripped
    if result == cleaned {
        for prefix in LINE_PREFIXES {
            if let Some(rest) = result.strip_prefix(prefix) {
                if let Some(pos) = rest.find('\n') {
                    result = rest[pos + 1..].trim_start();
                    break;
                } else if let Some(pos) = rest.find(':') {
                    result = rest[pos + 1..].trim_start();
                    break;
                }
            }
        }
    }

    remove_quotes(result)
}

/// Drop emphasis, inline code, heading and quote markers.
pub fn remove_markdown_formatting(text: &str) -> String {
    text.lines()
        .map(|line| {
            let heading = line.trim_start_matches('#');
            let line = if heading.len() != line.len() {
                heading.trim_start()
            } else {
                line
            };
            let line = line.strip_prefix("> ").unwrap_or(line);
            line.replace("**", "")
                .replace("__", "")
                .replace('`', "")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
