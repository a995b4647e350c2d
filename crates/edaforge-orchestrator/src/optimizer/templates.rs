//! Named parameter templates and context-based recommendations.

use super::session::ProjectContext;
use super::transfer::context_similarity;
use chrono::{DateTime, Utc};
use edaforge_abstraction::Parameters;
use serde::{Deserialize, Serialize};

/// A reusable, named parameter set for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTemplate {
    /// Tool the template applies to.
    pub tool_name: String,
    /// Template name, unique per tool.
    pub name: String,
    /// Stored parameters.
    pub parameters: Parameters,
    /// Context the template was tuned for.
    #[serde(default)]
    pub project_context: ProjectContext,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ParameterTemplate {
    /// Creates a template stamped with the current time.
    pub fn new(
        tool_name: impl Into<String>,
        name: impl Into<String>,
        parameters: Parameters,
        project_context: ProjectContext,
    ) -> Self {
        Self { tool_name: tool_name.into(), name: name.into(), parameters, project_context, created_at: Utc::now() }
    }
}

/// A template ranked for a project context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The recommended template.
    pub template: ParameterTemplate,
    /// Context similarity in [0, 1].
    pub similarity: f64,
}

/// Ranks templates by similarity to `context`, most similar first.
///
/// Ties go to the newer template, then by name.
#[must_use]
pub fn rank_templates(templates: Vec<ParameterTemplate>, context: &ProjectContext, limit: usize) -> Vec<Recommendation> {
    let mut ranked: Vec<Recommendation> = templates
        .into_iter()
        .map(|template| {
            let similarity = context_similarity(context, &template.project_context);
            Recommendation { template, similarity }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.template.created_at.cmp(&a.template.created_at))
            .then_with(|| a.template.name.cmp(&b.template.name))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_templates_by_similarity() {
        let asic = ProjectContext::new().with_tag("asic").with_attribute("gate_count", 50_000.0);
        let fpga = ProjectContext::new().with_tag("fpga").with_attribute("gate_count", 2_000.0);
        let templates = vec![
            ParameterTemplate::new("yosys", "fpga_fast", Parameters::new(), fpga),
            ParameterTemplate::new("yosys", "asic_optimization", Parameters::new(), asic.clone()),
        ];

        let ranked = rank_templates(templates.clone(), &asic, 10);
        assert_eq!(ranked[0].template.name, "asic_optimization");
        assert!(ranked[0].similarity > ranked[1].similarity);

        assert_eq!(rank_templates(templates, &asic, 1).len(), 1);
    }
}
