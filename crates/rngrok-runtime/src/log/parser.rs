//! Shell-style tokenizer for agent log lines.
//!
//! The agent writes logfmt-like lines (`key=value` pairs separated by
//! whitespace) where values containing spaces are quoted. Splitting follows
//! POSIX shell quoting closely enough to recover those values.

/// Split a line into tokens using shell quoting rules.
///
/// - A backslash escapes the next character, except inside single quotes
///   where it is literal.
/// - Single or double quotes open a region in which whitespace does not end
///   the token; the quote characters themselves are dropped.
/// - A token produced only by a pair of quotes (`""`) is kept as an empty
///   token when the closing quote is immediately followed by whitespace or
///   the end of the line.
/// - An unterminated quote is closed implicitly at the end of the line.
pub fn shell_split(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut escaping = false;
    let mut quote: Option<char> = None;
    let mut last_close_quote: Option<usize> = None;
    let mut char_count = 0;

    for (i, c) in line.chars().enumerate() {
        char_count = i + 1;

        if escaping {
            current.push(c);
            escaping = false;
        } else if c == '\\' && quote != Some('\'') {
            escaping = true;
        } else if quote == Some(c) {
            quote = None;
            last_close_quote = Some(i);
        } else if quote.is_none() && (c == '\'' || c == '"') {
            quote = Some(c);
        } else if quote.is_none() && c.is_whitespace() {
            if !current.is_empty() || closed_at(last_close_quote, i.checked_sub(1)) {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() || closed_at(last_close_quote, char_count.checked_sub(1)) {
        tokens.push(current);
    }

    tokens
}

fn closed_at(last_close_quote: Option<usize>, index: Option<usize>) -> bool {
    last_close_quote.is_some() && last_close_quote == index
}
