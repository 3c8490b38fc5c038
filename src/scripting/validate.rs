use super::classify::Classified;
use crate::error::BridgeError;

/// Surface area refused in safe mode. Each entry is matched against the
/// raw source with comments left in, so a commented-out call still counts.
const DENYLIST: &[(&str, &str)] = &[
    ("Process.Start", "process start"),
    ("Process.Kill", "process control"),
    ("std::process", "process control"),
    ("Application.Quit", "process exit"),
    ("Environment.Exit", "process exit"),
    ("exit(", "process exit"),
    ("Environment.", "environment access"),
    ("std::env", "environment access"),
    ("System.IO", "file system access"),
    ("std::fs", "file system access"),
    ("File.", "file system access"),
    ("Directory.", "file system access"),
    ("System.Net", "network access"),
    ("TcpClient", "network access"),
    ("TcpListener", "network access"),
    ("UdpClient", "network access"),
    ("HttpClient", "network access"),
    ("WebClient", "network access"),
    ("WebRequest", "network access"),
    ("Socket", "network access"),
    ("Reflection.Emit", "reflection emit"),
    ("DllImport", "native interop"),
    ("Marshal.", "native interop"),
    ("extern ", "native interop"),
    ("unsafe ", "native interop"),
    ("eval(", "dynamic evaluation"),
];

const DENIED_MODULES: &[&str] = &["fs", "net", "os", "process", "env"];

/// Safe-mode check over the raw snippet. Runs before any compilation.
pub fn check_denylist(source: &str) -> Result<(), BridgeError> {
    for (needle, category) in DENYLIST {
        if let Some(pos) = find_token(source, needle) {
            let line = source[..pos].matches('\n').count() + 1;
            return Err(BridgeError::ValidationRejected(format!(
                "blocked {category}: '{}' on snippet line {line}",
                needle.trim_end_matches(['(', '.', ' '])
            )));
        }
    }
    for import in imported_modules(source) {
        let root = import.split(['/', ':', '.']).next().unwrap_or(&import);
        if DENIED_MODULES.contains(&root) {
            return Err(BridgeError::ValidationRejected(format!(
                "blocked module import '{import}'"
            )));
        }
    }
    Ok(())
}

/// Applies in every mode: this tier only admits statements and function
/// declarations.
pub fn check_structure(classified: &Classified) -> Result<(), BridgeError> {
    if let Some(ns) = classified.namespaces.first() {
        return Err(BridgeError::ValidationRejected(format!(
            "namespace declarations are not allowed (snippet line {}); submit statements and functions only",
            ns.line
        )));
    }
    if let Some(ty) = classified.types.first() {
        let header = ty.text.lines().next().unwrap_or("").trim_end_matches('{').trim();
        return Err(BridgeError::ValidationRejected(format!(
            "type declaration '{header}' is not allowed (snippet line {}); submit statements and functions only",
            ty.line
        )));
    }
    Ok(())
}

/// Position of `needle` where it is not the tail of a longer identifier
/// (`MyFile.` does not trip `File.`).
fn find_token(source: &str, needle: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = source[from..].find(needle) {
        let pos = from + found;
        let boundary = source[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if boundary {
            return Some(pos);
        }
        from = pos + needle.len();
    }
    None
}

fn imported_modules(source: &str) -> Vec<String> {
    let mut modules = Vec::new();
    let mut rest = source;
    while let Some(pos) = find_token(rest, "import") {
        let after = rest[pos + "import".len()..].trim_start();
        if let Some(quoted) = after.strip_prefix('"') {
            if let Some(end) = quoted.find('"') {
                modules.push(quoted[..end].trim().to_ascii_lowercase());
            }
        }
        rest = &rest[pos + "import".len()..];
    }
    for line in source.lines() {
        if let Some(module) = line.trim().strip_prefix("using ") {
            modules.push(module.trim().trim_end_matches(';').trim().to_ascii_lowercase());
        }
    }
    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::classify::classify;

    #[test]
    fn denylisted_tokens_are_rejected_with_line() {
        let err = check_denylist("let a = 1;\nProcess.Start(\"calc\");").unwrap_err();
        match err {
            BridgeError::ValidationRejected(msg) => {
                assert!(msg.contains("process start"), "{msg}");
                assert!(msg.contains("line 2"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_denylist("File.Delete(\"/tmp/x\");").is_err());
        assert!(check_denylist("import \"fs\" as fs;").is_err());
        assert!(check_denylist("using process;").is_err());
        assert!(check_denylist("eval(\"1\")").is_err());
    }

    #[test]
    fn lookalike_identifiers_pass() {
        assert!(check_denylist("let profile = MyFile.name; let socketCount = 2;").is_ok());
        assert!(check_denylist("scene::find(\"World/Player\")").is_ok());
        assert!(check_denylist("let reexit = 1;").is_ok());
    }

    #[test]
    fn structure_rejects_types_and_namespaces() {
        assert!(check_structure(&classify("class Foo { }")).is_err());
        assert!(check_structure(&classify("namespace A { }")).is_err());
        assert!(check_structure(&classify("fn f() { 1 }\nlet x = f();")).is_ok());
    }
}
