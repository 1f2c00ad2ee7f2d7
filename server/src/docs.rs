//! Concrete `DocumentationLookup` wiring `DocsGapAnalyzer` against
//! `TASKGEN_DOCUMENTED_TOOLS` (§6).

use std::collections::HashSet;

use tgt_core::analyzers::DocumentationLookup;

pub struct EnvDocumentationLookup {
    documented: HashSet<String>,
}

impl EnvDocumentationLookup {
    pub fn new(documented_tools: Vec<String>) -> Self {
        Self {
            documented: documented_tools.into_iter().collect(),
        }
    }
}

impl DocumentationLookup for EnvDocumentationLookup {
    fn is_documented(&self, tool_name: &str) -> bool {
        self.documented.contains(tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_configured_tools_as_documented() {
        let lookup = EnvDocumentationLookup::new(vec!["grep".to_string()]);
        assert!(lookup.is_documented("grep"));
        assert!(!lookup.is_documented("bash"));
    }
}
