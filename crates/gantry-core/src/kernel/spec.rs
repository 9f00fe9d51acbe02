//! Kernel specifications and create requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How to launch a particular kind of kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Spec name used in create requests (e.g. `python3`).
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Language spoken by the worker. Selects the namespace inspector.
    pub language: String,
    /// Worker command line. `argv[0]` is resolved on `PATH`.
    pub argv: Vec<String>,
    /// Extra environment for the worker process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl KernelSpec {
    /// The default Python spec, backed by the `gantry-python-worker` adapter.
    pub fn python3() -> Self {
        Self {
            name: "python3".to_string(),
            display_name: "Python 3".to_string(),
            language: "python".to_string(),
            argv: vec!["gantry-python-worker".to_string()],
            env: BTreeMap::new(),
        }
    }
}

/// Request to create a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCreate {
    /// Spec name to launch.
    #[serde(default = "default_spec_name")]
    pub name: String,
    /// Owning notebook, if any.
    #[serde(default)]
    pub notebook_id: Option<String>,
}

fn default_spec_name() -> String {
    "python3".to_string()
}

impl Default for KernelCreate {
    fn default() -> Self {
        Self {
            name: default_spec_name(),
            notebook_id: None,
        }
    }
}

impl KernelCreate {
    /// Create request for the named spec.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notebook_id: None,
        }
    }

    /// Attach an owning notebook.
    pub fn for_notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = Some(notebook_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_defaults_to_python() {
        let req: KernelCreate = serde_json::from_str("{}").unwrap();
        assert_eq!(req.name, "python3");
        assert!(req.notebook_id.is_none());
    }
}
