//! Splits a submitted snippet into imports, type declarations, hoisted
//! functions and loose statements.
//!
//! Leading import lines are collected first. The first line that is not
//! blank, a comment or an import switches to body mode for the rest of
//! the snippet. In body mode top-level `{ ... }` blocks are routed by their
//! header; everything else stays a loose statement in source order.

pub const DEFAULT_IMPORTS: &[&str] = &[
    r#"import "scene" as scene;"#,
    r#"import "host" as host;"#,
    r#"import "host" as Debug;"#,
    r#"import "scene" as Object;"#,
];

const TYPE_KEYWORDS: &[&str] = &["class", "interface", "enum", "struct", "record"];
const TYPE_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "internal", "static", "abstract", "sealed", "partial",
    "readonly", "unsafe",
];
const FN_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "internal", "static", "async", "override", "virtual",
    "sealed",
];
const NOT_A_RETURN_TYPE: &[&str] = &[
    "if", "else", "while", "for", "foreach", "switch", "return", "new", "let", "const", "fn",
    "loop", "do", "catch", "try", "using", "import", "throw", "lock", "in",
];

/// A piece of the snippet together with the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub line: usize,
    pub text: String,
}

impl Fragment {
    pub fn end_line(&self) -> usize {
        self.line + self.text.matches('\n').count()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Classified {
    pub imports: Vec<String>,
    pub types: Vec<Fragment>,
    pub namespaces: Vec<Fragment>,
    pub functions: Vec<Fragment>,
    pub statements: Vec<Fragment>,
}

impl Classified {
    pub fn has_body(&self) -> bool {
        self.statements.iter().any(|fragment| {
            fragment.text.lines().any(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with("//")
            })
        })
    }
}

pub fn classify(source: &str) -> Classified {
    let mut out = Classified::default();
    for default in DEFAULT_IMPORTS {
        push_import(&mut out.imports, default.to_string());
    }

    let mut body_start = None;
    let mut offset = 0;
    for (index, line) in source.split_inclusive('\n').enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            offset += line.len();
            continue;
        }
        match parse_import(trimmed) {
            Some(import) => {
                push_import(&mut out.imports, import);
                offset += line.len();
            }
            None => {
                body_start = Some((offset, index + 1));
                break;
            }
        }
    }

    if let Some((start, line)) = body_start {
        partition(&source[start..], line, &mut out);
    }
    out
}

fn push_import(imports: &mut Vec<String>, import: String) {
    let normalized = import.split_whitespace().collect::<Vec<_>>().join(" ");
    if !imports.contains(&normalized) {
        imports.push(normalized);
    }
}

/// `using m;` or `import "m" [as a];`, normalised to Rhai import syntax.
fn parse_import(line: &str) -> Option<String> {
    if let Some(rest) = line.strip_prefix("using ") {
        let module = rest.trim().strip_suffix(';')?.trim();
        if module.is_empty() || !module.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        return Some(format!("import \"{module}\" as {module};"));
    }
    let rest = line.strip_prefix("import ")?.trim().strip_suffix(';')?.trim();
    let rest = rest.strip_prefix('"')?;
    let close = rest.find('"')?;
    let module = &rest[..close];
    let tail = rest[close + 1..].trim();
    if tail.is_empty() {
        return Some(format!("import \"{module}\";"));
    }
    let alias = tail.strip_prefix("as")?.trim();
    if alias.is_empty() || !alias.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(format!("import \"{module}\" as {alias};"))
}

#[derive(Debug, Clone, PartialEq)]
enum BlockKind {
    Type,
    Namespace,
    Function,
    Loose,
}

#[derive(Debug, Clone, PartialEq)]
enum HeaderKind {
    Type,
    Namespace,
    NativeFn,
    TypedFn(String),
    Other,
}

#[derive(Default)]
struct Chunk {
    text: String,
    line: Option<usize>,
}

impl Chunk {
    fn push(&mut self, c: char, line: usize) {
        if self.line.is_none() && !c.is_whitespace() {
            self.line = Some(line);
        }
        if self.line.is_some() {
            self.text.push(c);
        }
    }

    fn take(&mut self) -> Option<Fragment> {
        let line = self.line.take()?;
        let text = std::mem::take(&mut self.text).trim_end().to_string();
        if text.is_empty() {
            return None;
        }
        Some(Fragment { line, text })
    }
}

fn partition(body: &str, first_line: usize, out: &mut Classified) {
    let chars: Vec<char> = body.chars().collect();
    let mut chunk = Chunk::default();
    let mut line = first_line;
    let mut depth = 0usize;
    let mut kind = BlockKind::Loose;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // comments and literals are copied verbatim; braces inside them do not count
        if let Some(end) = skip_lexeme(&chars, i) {
            for &ch in &chars[i..end] {
                chunk.push(ch, line);
                if ch == '\n' {
                    line += 1;
                }
            }
            i = end;
            continue;
        }

        match c {
            '{' if depth == 0 => {
                let header = HeaderText::from_chunk(&chunk);
                let hoisted = match header_kind(&header.signature) {
                    HeaderKind::Type => {
                        kind = BlockKind::Type;
                        None
                    }
                    HeaderKind::Namespace => {
                        kind = BlockKind::Namespace;
                        None
                    }
                    HeaderKind::NativeFn => Some(header.signature_text.clone()),
                    HeaderKind::TypedFn(normalized) => Some(format!("{normalized} ")),
                    HeaderKind::Other => {
                        kind = BlockKind::Loose;
                        None
                    }
                };
                if let Some(signature) = hoisted {
                    // comments above a hoisted function stay where they were
                    if let Some(fragment) = header.leading {
                        out.statements.push(fragment);
                    }
                    kind = BlockKind::Function;
                    chunk.text = signature;
                    chunk.line = Some(header.line);
                }
                chunk.push('{', line);
                depth = 1;
            }
            '{' => {
                chunk.push(c, line);
                depth += 1;
            }
            '}' if depth > 0 => {
                chunk.push(c, line);
                depth -= 1;
                if depth == 0 {
                    if let Some(fragment) = chunk.take() {
                        match kind {
                            BlockKind::Type => out.types.push(fragment),
                            BlockKind::Namespace => out.namespaces.push(fragment),
                            BlockKind::Function => out.functions.push(fragment),
                            BlockKind::Loose => out.statements.push(fragment),
                        }
                    }
                    kind = BlockKind::Loose;
                }
            }
            ';' if depth == 0 => {
                chunk.push(c, line);
                if let Some(fragment) = chunk.take() {
                    out.statements.push(fragment);
                }
            }
            '\n' => {
                chunk.push(c, line);
                line += 1;
            }
            _ => chunk.push(c, line),
        }
        i += 1;
    }

    if let Some(fragment) = chunk.take() {
        match kind {
            BlockKind::Type => out.types.push(fragment),
            BlockKind::Namespace => out.namespaces.push(fragment),
            BlockKind::Function => out.functions.push(fragment),
            BlockKind::Loose => out.statements.push(fragment),
        }
    }
}

/// End index of a comment or string literal starting at `i`, if any.
fn skip_lexeme(chars: &[char], i: usize) -> Option<usize> {
    let c = chars[i];
    let next = chars.get(i + 1).copied();
    match (c, next) {
        ('/', Some('/')) => {
            let mut j = i + 2;
            while j < chars.len() && chars[j] != '\n' {
                j += 1;
            }
            Some(j)
        }
        ('/', Some('*')) => {
            let mut j = i + 2;
            while j + 1 < chars.len() && !(chars[j] == '*' && chars[j + 1] == '/') {
                j += 1;
            }
            Some((j + 2).min(chars.len()))
        }
        ('"', _) | ('\'', _) | ('`', _) => {
            let mut j = i + 1;
            while j < chars.len() {
                match chars[j] {
                    '\\' => j += 2,
                    ch if ch == c => return Some(j + 1),
                    '\n' if c != '`' => return Some(j),
                    _ => j += 1,
                }
            }
            Some(chars.len())
        }
        _ => None,
    }
}

/// Header of a top-level block, split into the comment/statement text
/// that precedes the signature and the signature itself.
struct HeaderText {
    leading: Option<Fragment>,
    signature: String,
    signature_text: String,
    line: usize,
}

impl HeaderText {
    fn from_chunk(chunk: &Chunk) -> Self {
        let start = chunk.line.unwrap_or(1);
        let lines: Vec<&str> = chunk.text.split('\n').collect();
        let skipped = lines
            .iter()
            .take_while(|l| {
                let t = l.trim();
                t.is_empty() || t.starts_with("//")
            })
            .count()
            .min(lines.len().saturating_sub(1));
        let leading_text = lines[..skipped].join("\n");
        let leading = (!leading_text.trim().is_empty()).then(|| Fragment {
            line: start,
            text: leading_text.trim_end().to_string(),
        });
        let signature_text = lines[skipped..].join("\n");
        let signature = signature_text.split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            leading,
            signature,
            signature_text,
            line: start + skipped,
        }
    }
}

fn header_kind(header: &str) -> HeaderKind {
    let words: Vec<&str> = header.split_whitespace().collect();
    if words.is_empty() {
        return HeaderKind::Other;
    }

    let mut rest = words.iter().skip_while(|w| TYPE_MODIFIERS.contains(w));
    if let (Some(keyword), Some(_name)) = (rest.next(), rest.next()) {
        if TYPE_KEYWORDS.contains(keyword) {
            return HeaderKind::Type;
        }
    }
    if words[0] == "namespace" && words.len() >= 2 {
        return HeaderKind::Namespace;
    }

    if !header.ends_with(')') {
        return HeaderKind::Other;
    }
    let native = header.strip_prefix("private ").unwrap_or(header);
    if native.starts_with("fn ") {
        return HeaderKind::NativeFn;
    }
    match typed_signature(header) {
        Some(normalized) => HeaderKind::TypedFn(normalized),
        None => HeaderKind::Other,
    }
}

/// `[access] [static] ReturnType Name(Type a, Type b = 1)` becomes
/// `fn Name(a, b)`.
fn typed_signature(header: &str) -> Option<String> {
    let open = header.find('(')?;
    let params = &header[open + 1..header.len() - 1];
    if params.contains('(') || params.contains(')') {
        return None;
    }
    let before: Vec<&str> = header[..open]
        .split_whitespace()
        .skip_while(|w| FN_MODIFIERS.contains(w))
        .collect();
    let (name, return_type) = before.split_last()?;
    if return_type.is_empty() || NOT_A_RETURN_TYPE.contains(&return_type[0]) {
        return None;
    }
    if !is_identifier(name) {
        return None;
    }
    let return_type = return_type.join(" ");
    if !return_type
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '<' | '>' | '[' | ']' | ',' | '.' | '?' | ' '))
    {
        return None;
    }

    let mut names = Vec::new();
    for param in split_top_level(params) {
        let param = param.split('=').next().unwrap_or("").trim();
        if param.is_empty() {
            continue;
        }
        let last = param.split_whitespace().last()?.trim_start_matches('@');
        if last == "this" || !is_identifier(last) {
            return None;
        }
        names.push(last.to_string());
    }
    Some(format!("fn {name}({})", names.join(", ")))
}

fn split_top_level(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '<' | '[' => depth += 1,
            '>' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(fragments: &[Fragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn imports_are_deduplicated_and_stop_at_body() {
        let source = "using scene;\nimport \"host\"   as  log;\n\n// comment\nlet x = 1;\nusing host;\n";
        let classified = classify(source);
        assert_eq!(classified.imports.len(), DEFAULT_IMPORTS.len() + 1);
        assert!(classified.imports.contains(&"import \"host\" as log;".to_string()));
        // `using` after the body started is a statement, not an import
        assert_eq!(texts(&classified.statements), vec!["let x = 1;", "using host;"]);
        assert_eq!(classified.statements[0].line, 5);
    }

    #[test]
    fn typed_functions_are_hoisted_and_normalized() {
        let source = "int Add(int a, int b = 2) {\n  return a + b;\n}\nreturn Add(1, 2);";
        let classified = classify(source);
        assert_eq!(texts(&classified.functions), vec!["fn Add(a, b) {\n  return a + b;\n}"]);
        assert_eq!(texts(&classified.statements), vec!["return Add(1, 2);"]);
        assert_eq!(classified.statements[0].line, 4);

        let generic = classify("public static Dictionary<string, int> Build(List<int> xs) { return xs; }");
        assert_eq!(generic.functions[0].text, "fn Build(xs) { return xs; }");
    }

    #[test]
    fn native_functions_and_control_flow() {
        let source = "fn double(x) { x * 2 }\nif double(2) > 3 { host::log(\"big\"); } else { host::log(\"small\"); }";
        let classified = classify(source);
        assert_eq!(texts(&classified.functions), vec!["fn double(x) { x * 2 }"]);
        assert_eq!(classified.statements.len(), 2);
        assert!(classified.statements[0].text.starts_with("if double(2)"));
        assert!(classified.statements[1].text.starts_with("else"));
    }

    #[test]
    fn trailing_code_after_one_line_block_is_kept_in_order() {
        let source = "let a = 1;\nvoid Ping() { host::log(\"p\"); } let b = 2;\nlet c = 3;";
        let classified = classify(source);
        assert_eq!(classified.functions.len(), 1);
        assert_eq!(texts(&classified.statements), vec!["let a = 1;", "let b = 2;", "let c = 3;"]);
        assert_eq!(classified.statements[1].line, 2);
    }

    #[test]
    fn types_namespaces_and_literals() {
        let source = "public class Foo { int x; }\nnamespace Bar { }\nlet s = \"{ not a block\";\nlet m = #{ a: 1 };";
        let classified = classify(source);
        assert_eq!(classified.types.len(), 1);
        assert_eq!(classified.namespaces.len(), 1);
        assert_eq!(classified.statements[0].text, "let s = \"{ not a block\";");
        assert!(classified.statements.iter().any(|s| s.text.contains("#{ a: 1 }")));
    }

    #[test]
    fn header_detection() {
        assert_eq!(header_kind("if (x > 1)"), HeaderKind::Other);
        assert_eq!(header_kind("else if (ready)"), HeaderKind::Other);
        assert_eq!(header_kind("while (true)"), HeaderKind::Other);
        assert_eq!(header_kind("private fn helper(a)"), HeaderKind::NativeFn);
        assert_eq!(header_kind("enum Mode"), HeaderKind::Type);
        assert_eq!(
            header_kind("private static void Tick(float dt)"),
            HeaderKind::TypedFn("fn Tick(dt)".into())
        );
        assert_eq!(header_kind("let x = foo()"), HeaderKind::Other);
    }

    #[test]
    fn unterminated_last_statement_is_kept_verbatim() {
        let classified = classify("let x = 40;\nx + 2 // answer");
        assert_eq!(
            classified.statements.last().map(|f| f.text.trim()),
            Some("x + 2 // answer")
        );
    }
}
