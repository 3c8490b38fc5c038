use super::classify::{Classified, Fragment};

pub const ENTRY_FN: &str = "execute";
/// Returned when a snippet has no loose statements to run.
pub const EMPTY_BODY_RESULT: &str = "No statements to execute";
pub const IMPLICIT_RESULT: &str = "success";

/// A compilable unit plus the snippet line each of its lines came from.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub source: String,
    /// `line_map[n]` is the snippet line of synthesized line `n + 1`, or
    /// `None` for generated lines.
    line_map: Vec<Option<usize>>,
}

impl Synthesized {
    pub fn snippet_line(&self, unit_line: usize) -> Option<usize> {
        unit_line
            .checked_sub(1)
            .and_then(|i| self.line_map.get(i).copied().flatten())
    }
}

#[derive(Default)]
struct Writer {
    source: String,
    line_map: Vec<Option<usize>>,
}

impl Writer {
    fn generated(&mut self, text: &str) {
        self.source.push_str(text);
        self.source.push('\n');
        self.line_map.push(None);
    }

    /// Writes fragments keeping their original line layout: fragments that
    /// shared a snippet line share an output line.
    fn fragments(&mut self, fragments: &[Fragment], indent: &str) {
        let mut last_line: Option<usize> = None;
        for fragment in fragments {
            let mut lines = fragment.text.split('\n');
            let first = lines.next().unwrap_or("");
            if last_line == Some(fragment.line) && self.source.ends_with('\n') {
                self.source.pop();
                self.source.push(' ');
                self.source.push_str(first);
                self.source.push('\n');
            } else {
                self.source.push_str(indent);
                self.source.push_str(first);
                self.source.push('\n');
                self.line_map.push(Some(fragment.line));
            }
            for (offset, line) in lines.enumerate() {
                self.source.push_str(indent);
                self.source.push_str(line);
                self.source.push('\n');
                self.line_map.push(Some(fragment.line + offset + 1));
            }
            last_line = Some(fragment.end_line());
        }
    }
}

fn is_terminated(fragment: &Fragment) -> bool {
    fragment.text.trim_end().ends_with(';')
}

/// imports, then type definitions, then hoisted functions, then the
/// generated entry point wrapping the loose statements.
pub fn synthesize(classified: &Classified) -> Synthesized {
    let mut out = Writer::default();
    for import in &classified.imports {
        out.generated(import);
    }
    out.fragments(&classified.types, "");
    out.fragments(&classified.functions, "");

    out.generated(&format!("fn {ENTRY_FN}() {{"));
    if classified.has_body() {
        out.fragments(&classified.statements, "    ");
        if !classified.statements.last().is_some_and(is_terminated) {
            // on its own line so a trailing `//` comment cannot swallow it
            out.generated("    ;");
        }
        out.generated(&format!("    return \"{IMPLICIT_RESULT}\";"));
    } else {
        out.generated(&format!("    return \"{EMPTY_BODY_RESULT}\";"));
    }
    out.generated("}");

    Synthesized {
        source: out.source,
        line_map: out.line_map,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::classify::{classify, DEFAULT_IMPORTS};

    #[test]
    fn unit_layout_and_line_map() {
        let snippet = "int Twice(int x) { return x * 2; }\nlet y = Twice(4);\nreturn y;";
        let unit = synthesize(&classify(snippet));
        let lines: Vec<&str> = unit.source.lines().collect();
        let imports = DEFAULT_IMPORTS.len();
        assert_eq!(lines[imports], "fn Twice(x) { return x * 2; }");
        assert_eq!(lines[imports + 1], "fn execute() {");
        assert_eq!(lines[imports + 2], "    let y = Twice(4);");
        assert_eq!(lines[imports + 4], "    return \"success\";");
        assert_eq!(unit.snippet_line(imports + 1), Some(1));
        assert_eq!(unit.snippet_line(imports + 3), Some(2));
        assert_eq!(unit.snippet_line(imports + 4), Some(3));
        assert_eq!(unit.snippet_line(1), None);
    }

    #[test]
    fn empty_body_returns_placeholder() {
        let unit = synthesize(&classify("fn unused() { 1 }"));
        assert!(unit.source.contains(EMPTY_BODY_RESULT));
        assert!(!unit.source.contains(IMPLICIT_RESULT));
    }

    #[test]
    fn unterminated_tail_gets_a_separator_line() {
        let unit = synthesize(&classify("let x = 40;\nx + 2 // answer"));
        assert!(unit
            .source
            .contains("    x + 2 // answer\n    ;\n    return \"success\";\n"));

        let terminated = synthesize(&classify("let x = 40;\nx + 2;"));
        assert!(!terminated.source.contains("\n    ;\n"));
    }

    #[test]
    fn same_line_fragments_stay_on_one_line() {
        let unit = synthesize(&classify("let a = 1; let b = 2;\nlet c = a + b;"));
        assert!(unit.source.contains("    let a = 1; let b = 2;\n    let c = a + b;\n"));
    }
}
