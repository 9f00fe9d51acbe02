//! Namespace introspection.
//!
//! Listing the variables of a live kernel means running a diagnostics script
//! inside the worker and parsing what it prints. Both halves depend on the
//! worker language, so they live behind [`NamespaceInspector`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One variable in a kernel namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    /// Variable name.
    pub name: String,
    /// Type name of the value.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Shape (`(3, 4)`) or length (`len=10`), empty when neither applies.
    #[serde(default)]
    pub shape: String,
    /// Truncated string form.
    #[serde(default)]
    pub preview: String,
    /// Approximate size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Language-specific variable listing.
pub trait NamespaceInspector: Send + Sync {
    /// Language this inspector understands.
    fn language(&self) -> &str;

    /// Code to run inside the worker. Must print a JSON array of variable
    /// records as its last line of stdout.
    fn script(&self) -> &str;

    /// Names that are interpreter internals rather than user variables.
    fn is_excluded(&self, name: &str) -> bool;

    /// Parse the script's stdout.
    ///
    /// Records that fail to decode are skipped, as are excluded names.
    fn parse(&self, stdout: &str) -> Vec<VariableInfo> {
        let Some(records) = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<Vec<Value>>(line.trim()).ok())
        else {
            if !stdout.trim().is_empty() {
                tracing::warn!("Variable listing produced no JSON array");
            }
            return Vec::new();
        };

        records
            .into_iter()
            .filter_map(|record| serde_json::from_value::<VariableInfo>(record).ok())
            .filter(|var| !self.is_excluded(&var.name))
            .collect()
    }
}

/// IPython-style internals that never count as user variables.
const PYTHON_EXCLUDED: &[&str] = &[
    "In", "Out", "get_ipython", "exit", "quit", "_", "__", "___", "_i", "_ii", "_iii", "_oh",
    "_dh", "_sh",
];

const PYTHON_SCRIPT: &str = r#"
import json as _gantry_json
import sys as _gantry_sys

def _gantry_var_info():
    result = []
    for name, value in list(get_ipython().user_ns.items()):
        if name.startswith('_') or name in ('In', 'Out', 'get_ipython', 'exit', 'quit'):
            continue
        try:
            if hasattr(value, 'shape'):
                shape = str(value.shape)
            elif hasattr(value, '__len__'):
                shape = 'len=%d' % len(value)
            else:
                shape = ''
            text = str(value)
            preview = text[:100] + '...' if len(text) > 100 else text
            try:
                size = _gantry_sys.getsizeof(value)
            except Exception:
                size = 0
            result.append({'name': name, 'type': type(value).__name__,
                           'shape': shape, 'preview': preview, 'size': size})
        except Exception:
            pass
    return result

print(_gantry_json.dumps(_gantry_var_info()))
del _gantry_var_info
"#;

/// Inspector for IPython-compatible workers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonInspector;

impl NamespaceInspector for PythonInspector {
    fn language(&self) -> &str {
        "python"
    }

    fn script(&self) -> &str {
        PYTHON_SCRIPT
    }

    fn is_excluded(&self, name: &str) -> bool {
        name.starts_with('_') || PYTHON_EXCLUDED.contains(&name)
    }
}

/// Inspector for a worker language, if one exists.
pub fn inspector_for(language: &str) -> Option<Arc<dyn NamespaceInspector>> {
    match language {
        "python" => Some(Arc::new(PythonInspector)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_python_reply() {
        let stdout = r#"[{"name": "df", "type": "DataFrame", "shape": "(3, 2)", "preview": "a b", "size": 512}, {"name": "x", "type": "int", "shape": "", "preview": "1", "size": 28}]"#;
        let vars = PythonInspector.parse(stdout);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name, "df");
        assert_eq!(vars[0].type_name, "DataFrame");
        assert_eq!(vars[1].size, 28);
    }

    #[test]
    fn test_parse_skips_bad_records_and_internals() {
        let stdout = "some noise\n[{\"name\": \"ok\", \"type\": \"str\"}, {\"type\": \"int\"}, {\"name\": \"Out\", \"type\": \"dict\"}, {\"name\": \"_private\", \"type\": \"int\"}]\n";
        let vars = PythonInspector.parse(stdout);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "ok");
        assert_eq!(vars[0].shape, "");
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(PythonInspector.parse("Traceback (most recent call last):").is_empty());
        assert!(PythonInspector.parse("").is_empty());
    }

    #[test]
    fn test_inspector_lookup() {
        assert!(inspector_for("python").is_some());
        assert!(inspector_for("rust").is_none());
    }
}
