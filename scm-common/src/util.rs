//! Shared utilities.

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }

        if c == '\\' {
            escaped = true;
            end += char_len;
            continue;
        }

        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            end += char_len;
            continue;
        }

        if c == '"' || c == '\'' {
            in_quote = Some(c);
            end += char_len;
            continue;
        }

        if c.is_whitespace() {
            break;
        }

        end += char_len;
    }
    end
}

/// Mask credentials in a command string before it is logged or returned
/// to a caller.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let patterns = [
        ("PASSWORD=", "PASSWORD=***"),
        ("SECRET=", "SECRET=***"),
        ("TOKEN=", "TOKEN=***"),
        ("--password ", "--password ***"),
        ("--password=", "--password=***"),
        ("--secret ", "--secret ***"),
        ("--secret=", "--secret=***"),
        ("--token ", "--token ***"),
        ("--token=", "--token=***"),
    ];

    let mut result = cmd.to_string();
    for (pattern, replacement) in patterns {
        // The replacement contains the pattern, so resume after it.
        let mut search_start = 0;
        while search_start < result.len() {
            let Some(start) = result[search_start..].find(pattern) else {
                break;
            };
            let abs_start = search_start + start;
            let value_start = abs_start + pattern.len();
            let value_end = value_start + find_value_end(&result[value_start..]);

            result = format!(
                "{}{}{}",
                &result[..abs_start],
                replacement,
                &result[value_end..]
            );
            search_start = abs_start + replacement.len();
        }
    }

    result
}

/// Case-insensitive set difference: entries of `wanted` missing from `have`.
///
/// OS account names may be case-folded, so membership comparisons ignore case.
pub fn missing_ignore_case(wanted: &[String], have: &[String]) -> Vec<String> {
    wanted
        .iter()
        .filter(|w| !have.iter().any(|h| h.eq_ignore_ascii_case(w)))
        .cloned()
        .collect()
}
