//! Persists user-created templates to `templates.json` alongside the
//! built-in registry, with the same atomic-rewrite discipline the task store
//! uses for its cleanup pass.

use std::path::PathBuf;
use std::sync::Arc;

use tgt_core::template::{Template, TemplateError, TemplateRegistry};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

pub struct TemplatesStore {
    path: PathBuf,
    registry: RwLock<TemplateRegistry>,
}

impl TemplatesStore {
    pub async fn load(dir: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("templates.json");

        let mut registry = TemplateRegistry::with_builtins();
        if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            if !content.trim().is_empty() {
                let user_templates: Vec<Template> = serde_json::from_str(&content)?;
                for template in user_templates {
                    // Stored templates are all user-created by construction;
                    // ignore create() errors from stale built_in=true rows.
                    let _ = registry.create(template);
                }
            }
        }

        Ok(Arc::new(Self {
            path,
            registry: RwLock::new(registry),
        }))
    }

    pub async fn list(&self) -> Vec<Template> {
        self.registry.read().await.list().into_iter().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Template> {
        self.registry.read().await.get(id).cloned()
    }

    pub async fn create(&self, template: Template) -> Result<(), TemplateError> {
        let mut registry = self.registry.write().await;
        registry.create(template)?;
        self.persist(&registry).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to persist templates after create");
            TemplateError::BuiltIn("persist-failed".to_string())
        })
    }

    pub async fn update(&self, id: &str, template: Template) -> Result<(), TemplateError> {
        let mut registry = self.registry.write().await;
        registry.update(id, template)?;
        self.persist(&registry).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to persist templates after update");
            TemplateError::BuiltIn("persist-failed".to_string())
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), TemplateError> {
        let mut registry = self.registry.write().await;
        registry.delete(id)?;
        self.persist(&registry).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to persist templates after delete");
            TemplateError::BuiltIn("persist-failed".to_string())
        })
    }

    async fn persist(&self, registry: &TemplateRegistry) -> anyhow::Result<()> {
        let user_templates: Vec<&Template> =
            registry.list().into_iter().filter(|t| !t.built_in).collect();
        let json = serde_json::to_string_pretty(&user_templates)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(json.as_bytes()).await?;
        tmp.flush().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgt_core::task::{Severity, SuggestedFix};

    fn custom(id: &str) -> Template {
        Template {
            id: id.to_string(),
            title_pattern: "Custom {x}".to_string(),
            description_pattern: "desc {x}".to_string(),
            default_severity: Severity::Medium,
            default_priority: 40,
            default_suggested_fix: SuggestedFix::default(),
            default_acceptance_criteria: vec!["done".to_string()],
            tags: Vec::new(),
            built_in: false,
        }
    }

    #[tokio::test]
    async fn created_templates_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplatesStore::load(dir.path()).await.unwrap();
        store.create(custom("my-template")).await.unwrap();

        let reloaded = TemplatesStore::load(dir.path()).await.unwrap();
        assert!(reloaded.get("my-template").await.is_some());
    }

    #[tokio::test]
    async fn builtins_are_always_present_and_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplatesStore::load(dir.path()).await.unwrap();
        assert!(store.get("document-tool").await.is_some());
        let err = store.delete("document-tool").await;
        assert!(matches!(err, Err(TemplateError::BuiltIn(_))));
    }
}
