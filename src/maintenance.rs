//! Keyword and naming-pattern maintenance for stored templates.
//!
//! Derives a template's `semantic_model` from how it is used (attached file
//! names, child template names, analysed document text) and its
//! `name_pattern` from a sample of attached file names.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::collaborators::TextAnalyzer;
use crate::config::MatchingConfig;
use crate::error::{Result, StoreError, TemplateError};
use crate::keywords::{determine_name_pattern, extract_keywords};
use crate::store::TemplateStore;
use crate::types::Template;

pub struct TemplateMaintenance {
    store: Arc<dyn TemplateStore>,
    analyzer: Option<Arc<dyn TextAnalyzer>>,
    config: MatchingConfig,
}

impl TemplateMaintenance {
    pub fn new(store: Arc<dyn TemplateStore>, config: MatchingConfig) -> Self {
        Self {
            store,
            analyzer: None,
            config,
        }
    }

    pub fn with_text_analyzer(mut self, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Rebuild `semantic_model` from attached file names (extensions
    /// stripped) and the names of the template's children.
    ///
    /// When no keyword can be extracted the template is returned unchanged.
    #[instrument(skip(self, file_names), fields(files = file_names.len()))]
    pub async fn refresh_semantic_model<S: AsRef<str>>(
        &self,
        template_id: Uuid,
        file_names: &[S],
    ) -> Result<Template> {
        let template = self.require(template_id).await?;
        let children = self.store.list_children(template_id).await?;

        let mut corpus: Vec<&str> = file_names
            .iter()
            .map(|f| strip_extension(f.as_ref()))
            .collect();
        corpus.extend(children.iter().map(|c| c.name.as_str()));

        let keywords = extract_keywords(
            &corpus.join(" "),
            self.config.keyword_min_length,
            self.config.keyword_max_count,
        );
        if keywords.is_empty() {
            debug!("No keywords for template {}, leaving semantic model", template_id);
            return Ok(template);
        }

        let updated = self
            .store
            .update_semantic_model(template_id, Some(keywords.join(",")))
            .await
            .map_err(|e| not_found_or(e, template_id))?;
        info!(
            "Semantic model of {} ({}) set to '{}'",
            updated.name,
            updated.id,
            updated.semantic_model.as_deref().unwrap_or_default()
        );
        Ok(updated)
    }

    /// Store the naming pattern inferred from `file_names`.
    #[instrument(skip(self, file_names))]
    pub async fn refresh_name_pattern<S: AsRef<str>>(
        &self,
        template_id: Uuid,
        file_names: &[S],
    ) -> Result<Template> {
        let pattern = determine_name_pattern(file_names);
        let updated = self
            .store
            .update_name_pattern(template_id, Some(pattern.to_string()))
            .await
            .map_err(|e| not_found_or(e, template_id))?;
        info!("Name pattern of {} ({}) set to {}", updated.name, updated.id, pattern);
        Ok(updated)
    }

    /// Merge keywords of `text`, as reported by the text analyzer, into the
    /// existing semantic model. Existing keywords keep their order; new ones
    /// are appended, compared case-insensitively.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn enrich_from_text(&self, template_id: Uuid, text: &str) -> Result<Template> {
        let analyzer = self
            .analyzer
            .as_ref()
            .ok_or_else(|| TemplateError::unavailable("text analyzer", "not configured"))?;
        let template = self.require(template_id).await?;

        let limit = self.config.collaborator_timeout();
        let analysis = match tokio::time::timeout(limit, analyzer.analyze_text(text)).await {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => return Err(TemplateError::unavailable("text analyzer", e)),
            Err(_) => {
                return Err(TemplateError::Timeout {
                    service: "text analyzer",
                    after_ms: limit.as_millis() as u64,
                })
            }
        };

        let mut merged = template.semantic_keywords();
        let before = merged.len();
        for keyword in analysis.keywords {
            let keyword = keyword.trim();
            let folded = keyword.to_lowercase();
            if keyword.is_empty() || merged.iter().any(|k| k.to_lowercase() == folded) {
                continue;
            }
            merged.push(keyword.to_string());
        }
        if merged.len() == before {
            return Ok(template);
        }

        let updated = self
            .store
            .update_semantic_model(template_id, Some(merged.join(",")))
            .await
            .map_err(|e| not_found_or(e, template_id))?;
        info!(
            "Added {} keywords to semantic model of {} ({})",
            merged.len() - before,
            updated.name,
            updated.id
        );
        Ok(updated)
    }

    async fn require(&self, template_id: Uuid) -> Result<Template> {
        self.store
            .get_template(template_id)
            .await?
            .ok_or_else(|| TemplateError::NotFound(format!("template {}", template_id)))
    }
}

fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(dot) => &file_name[..dot],
    }
}

fn not_found_or(e: StoreError, id: Uuid) -> TemplateError {
    match e {
        StoreError::NotFound(_) => TemplateError::NotFound(format!("template {}", id)),
        other => other.into(),
    }
}
