use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A recipe suggested by the model for an uploaded photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRecipe {
    pub title: String,
    pub description: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cook_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
}

/// Photo handed to the model, still base64-encoded.
#[derive(Debug, Clone, Copy)]
pub struct RecipeImage<'a> {
    pub data_base64: &'a str,
    pub mime_type: &'a str,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    #[error("recipe generation is not configured")]
    Unconfigured,
    #[error("model returned no usable recipes")]
    NoRecipes,
    #[error("model request failed: {0}")]
    Upstream(String),
}

/// Turns a food photo into recipe suggestions.
#[async_trait]
pub trait RecipeGenerator: Send + Sync {
    async fn generate(&self, image: RecipeImage<'_>) -> Result<Vec<GeneratedRecipe>, GeneratorError>;
}

#[async_trait]
impl<T: RecipeGenerator + ?Sized> RecipeGenerator for Arc<T> {
    async fn generate(&self, image: RecipeImage<'_>) -> Result<Vec<GeneratedRecipe>, GeneratorError> {
        (**self).generate(image).await
    }
}

/// Stand-in used when no model client is wired up; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRecipeGenerator;

#[async_trait]
impl RecipeGenerator for UnconfiguredRecipeGenerator {
    async fn generate(&self, _image: RecipeImage<'_>) -> Result<Vec<GeneratedRecipe>, GeneratorError> {
        Err(GeneratorError::Unconfigured)
    }
}
