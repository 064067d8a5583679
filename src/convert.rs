//! # v4 → v5 Source Converter
//!
//! v5 turned the relational operators into reserved words, so v4 programs
//! using them as identifiers no longer compile. The converter reads a v4
//! program on stdin and writes it to stdout with every clashing
//! identifier prefixed with `___`; string literals and comments pass
//! through untouched. The result should be reviewed before use.

use std::io::{Read, Write};

/// Words that became reserved in v5
const NEW_KEYWORDS: &[&str] = &[
    "join", "union", "minus", "project", "rename", "select", "extend", "summary", "per", "cnt",
    "min", "max", "avg", "add", "time", "index",
];

/// Rewrite one source text
pub fn convert(src: &str) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            out.push(c);
            i += 1;
            while i < chars.len() {
                out.push(chars[i]);
                if chars[i] == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if chars[i] == '"' {
                    i += 1;
                    break;
                }
                i += 1;
            }
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                out.push(chars[i]);
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if NEW_KEYWORDS.contains(&word.as_str()) {
                out.push_str("___");
            }
            out.push_str(&word);
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

/// The `convert` role: stdin to stdout
pub fn run() -> anyhow::Result<()> {
    let mut src = String::new();
    std::io::stdin().read_to_string(&mut src)?;
    let out = convert(&src);
    std::io::stdout().write_all(out.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_clashing_identifiers() {
        assert_eq!(convert("var index T;"), "var ___index T;");
        assert_eq!(convert("x = min + 1;"), "x = ___min + 1;");
    }

    #[test]
    fn test_leaves_other_identifiers() {
        assert_eq!(convert("var indexes T;"), "var indexes T;");
        assert_eq!(convert("fn Echo(b Book): Book"), "fn Echo(b Book): Book");
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        assert_eq!(convert("s = \"union of all\";"), "s = \"union of all\";");
        assert_eq!(convert("# union\nx = 1;"), "# union\nx = 1;");
        assert_eq!(convert("s = \"a \\\" union\";"), "s = \"a \\\" union\";");
    }
}
