//! 宽松解析模型给出的结构化参数
//!
//! 模型输出的「JSON」不保证合法，按顺序尝试：严格 JSON → Python 字面量（单引号、True/False/None、元组、尾逗号）
//! → 原样保存在 `raw_weather_data` 键下。最后一档永远成功，调用方不会看到错误。

use serde_json::{json, Value};

/// 原样保存时使用的键
pub const RAW_KEY: &str = "raw_weather_data";

/// 命中的解析档位（写日志用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Json,
    PythonLiteral,
    Raw,
}

type Parser = fn(&str) -> Option<Value>;

const PARSERS: &[(ParseTier, Parser)] = &[
    (ParseTier::Json, parse_json),
    (ParseTier::PythonLiteral, parse_python_literal),
];

/// 依次尝试各解析器，全部失败则原样保存
pub fn parse_structured(text: &str) -> (Value, ParseTier) {
    PARSERS
        .iter()
        .find_map(|(tier, parse)| parse(text).map(|v| (v, *tier)))
        .unwrap_or_else(|| (json!({ RAW_KEY: text }), ParseTier::Raw))
}

fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

fn parse_python_literal(text: &str) -> Option<Value> {
    let converted = python_literal_to_json(text.trim())?;
    serde_json::from_str(&converted).ok()
}

/// 把 Python 字面量改写成 JSON 文本；遇到无法表示的结构返回 None
fn python_literal_to_json(src: &str) -> Option<String> {
    let mut out = String::with_capacity(src.len() + 8);
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                loop {
                    let ch = chars.next()?;
                    match ch {
                        '\\' => {
                            let escaped = chars.next()?;
                            match escaped {
                                '\'' => out.push('\''),
                                '"' => out.push_str("\\\""),
                                other => {
                                    out.push('\\');
                                    out.push(other);
                                }
                            }
                        }
                        _ if ch == quote => break,
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        _ => out.push(ch),
                    }
                }
                out.push('"');
            }
            '(' => out.push('['),
            ')' | ']' | '}' => {
                let trimmed_len = out.trim_end().len();
                out.truncate(trimmed_len);
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(if c == ')' { ']' } else { c });
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    // 数字里的指数（1e-3）等保持原样，交给 serde_json 判断
                    _ => out.push_str(&ident),
                }
            }
            _ => out.push(c),
        }
    }
    Some(out)
}
