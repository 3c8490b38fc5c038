use super::synth::Synthesized;

pub const TMP_PLACEHOLDER: &str = "<tmp>";

/// Scrubs host paths from a compiler or runtime message and annotates
/// every `(line N, position M)` with the snippet line it maps to.
pub fn sanitize(message: &str, unit: &Synthesized) -> String {
    annotate_lines(&scrub_paths(message), unit)
}

pub fn scrub_paths(message: &str) -> String {
    let tmp = std::env::temp_dir();
    let tmp = tmp.to_string_lossy();
    let tmp = tmp.trim_end_matches(['/', '\\']);
    let text = if tmp.len() > 1 {
        message.replace(tmp, TMP_PLACEHOLDER)
    } else {
        message.to_string()
    };

    let mut out = String::with_capacity(text.len());
    for piece in text.split_inclusive(char::is_whitespace) {
        let body = piece.trim_end();
        let trailing = &piece[body.len()..];
        let core = body.trim_matches(|c: char| matches!(c, '\'' | '"' | '(' | ')' | '[' | ']' | ',' | ':'));
        if is_absolute_script_path(core) {
            out.push_str(&body.replacen(core, TMP_PLACEHOLDER, 1));
        } else {
            out.push_str(body);
        }
        out.push_str(trailing);
    }
    out
}

fn is_absolute_script_path(token: &str) -> bool {
    if !token.contains(".rhai") {
        return false;
    }
    let bytes = token.as_bytes();
    token.starts_with('/')
        || token.starts_with("\\\\")
        || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && matches!(bytes[2], b'\\' | b'/'))
}

fn annotate_lines(message: &str, unit: &Synthesized) -> String {
    const MARKER: &str = "(line ";
    let mut out = String::with_capacity(message.len() + 32);
    let mut rest = message;
    while let Some(start) = rest.find(MARKER) {
        let after = &rest[start + MARKER.len()..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        let close = after.find(')');
        match (digits.parse::<usize>().ok(), close) {
            (Some(line), Some(close)) => {
                out.push_str(&rest[..start + MARKER.len() + close]);
                if let Some(snippet) = unit.snippet_line(line) {
                    out.push_str(&format!("; snippet line {snippet}"));
                }
                out.push(')');
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..start + MARKER.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
